use crate::all::*;

use rand::{Rng, SeedableRng};
use rand_xoshiro::Xoshiro256PlusPlus;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Direction {
  // Frames up to and including the current one.
  Previous,
  Whole,
  // Frames from the current one on.
  Following,
}

// View window around the current frame used when resolving a clicked position.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FrameRange {
  pub before: usize,
  pub after: usize,
  pub current: Frame,
}

impl FrameRange {
  // Configured view window around `current`.
  pub fn around(current: Frame, p: &ParameterSet) -> FrameRange {
    FrameRange { before: p.show_before, after: p.show_after, current }
  }

  pub fn first(&self) -> Frame {
    self.current.saturating_sub(self.before)
  }

  pub fn last(&self) -> Frame {
    self.current + self.after
  }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PersonFrame {
  pub person: PersonId,
  pub frame: Frame,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InsertionKind {
  // The stored point at the frame was replaced by a better one.
  Replaced,
  // The point matched a stored one of higher or equal quality and was dropped.
  Kept,
  Extended,
  Created,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Insertion {
  pub person: PersonId,
  pub kind: InsertionKind,
}

// Persons an operation may touch. Empty means every person.
pub type Selection = HashSet<PersonId>;

struct StorageParameters {
  match_radius: f64,
  extend_radius: f64,
  select_radius: f64,
  multicolor_match_scale: f64,
  confirmed_quality: f64,
  purge_ratio: f64,
  purge_min_points: usize,
  color_outlier_distance: f64,
  default_height: f64,
  color_seed: u64,
}

pub struct PersonStorage {
  persons: Vec<TrackPerson>,
  next_id: usize,
  params: StorageParameters,
  rng: Xoshiro256PlusPlus,
}

fn is_eligible(eligible: &Selection, id: PersonId) -> bool {
  eligible.is_empty() || eligible.contains(&id)
}

// Fully saturated color of the given hue in degrees.
fn hue_to_color(hue: f64) -> Color {
  let h = (hue.rem_euclid(360.)) / 60.;
  let x = 1. - (h % 2. - 1.).abs();
  let (r, g, b) = match h as usize {
    0 => (1., x, 0.),
    1 => (x, 1., 0.),
    2 => (0., 1., x),
    3 => (0., x, 1.),
    4 => (x, 0., 1.),
    _ => (1., 0., x),
  };
  Color::from_vector(&(Vector3d::new(r, g, b) * 255.))
}

impl PersonStorage {
  pub fn new(p: &ParameterSet) -> PersonStorage {
    PersonStorage {
      persons: vec![],
      next_id: 1,
      params: StorageParameters {
        match_radius: p.match_radius,
        extend_radius: p.extend_radius,
        select_radius: p.select_radius,
        multicolor_match_scale: p.multicolor_match_scale,
        confirmed_quality: p.confirmed_quality,
        purge_ratio: p.purge_ratio,
        purge_min_points: p.purge_min_points,
        color_outlier_distance: p.color_outlier_distance,
        default_height: p.default_height,
        color_seed: p.color_seed,
      },
      rng: Xoshiro256PlusPlus::seed_from_u64(p.color_seed),
    }
  }

  pub fn len(&self) -> usize {
    self.persons.len()
  }

  pub fn is_empty(&self) -> bool {
    self.persons.is_empty()
  }

  pub fn persons(&self) -> &[TrackPerson] {
    &self.persons
  }

  pub fn get(&self, id: PersonId) -> Option<&TrackPerson> {
    self.persons.iter().find(|p| p.id == id)
  }

  pub fn get_mut(&mut self, id: PersonId) -> Option<&mut TrackPerson> {
    self.persons.iter_mut().find(|p| p.id == id)
  }

  fn fresh_id(&mut self) -> PersonId {
    let id = PersonId(self.next_id);
    self.next_id += 1;
    id
  }

  fn display_color(&mut self) -> Color {
    let hue = self.rng.gen_range(0. ..360.);
    hue_to_color(hue)
  }

  fn match_scale(&self, method: RecoMethod) -> f64 {
    match method {
      RecoMethod::MultiColor => self.params.multicolor_match_scale,
      _ => 1.,
    }
  }

  // Index of the eligible person with the point at `frame` closest to `position`,
  // strictly within `radius`.
  fn nearest_at(&self, position: &Vector2d, frame: Frame, eligible: &Selection, radius: f64) -> Option<usize> {
    let mut nearest = None;
    let mut min_dist = radius;
    for (i, person) in self.persons.iter().enumerate() {
      if !is_eligible(eligible, person.id) { continue }
      let Some(point) = person.point_at(frame) else { continue };
      let d = point.distance_to(position);
      if d < min_dist {
        min_dist = d;
        nearest = Some(i);
      }
    }
    nearest
  }

  // Eligible person whose range ends right before or starts right after `frame`, with
  // its boundary point closest to `position`. The flag tells if it starts after.
  fn nearest_adjacent(&self, position: &Vector2d, frame: Frame, eligible: &Selection) -> Option<(usize, bool)> {
    let mut nearest = None;
    let mut min_dist = self.params.extend_radius;
    for (i, person) in self.persons.iter().enumerate() {
      if !is_eligible(eligible, person.id) { continue }
      let (boundary, backward) = if frame.checked_sub(1) == Some(person.last_frame()) {
        (person.last_frame(), false)
      }
      else if person.first_frame().checked_sub(1) == Some(frame) {
        (person.first_frame(), true)
      }
      else {
        continue;
      };
      let Some(point) = person.point_at(boundary) else { continue };
      let d = point.distance_to(position);
      if d < min_dist {
        min_dist = d;
        nearest = Some((i, backward));
      }
    }
    nearest
  }

  // Reconciles one candidate point with the stored trajectories. Returns `None` when the
  // point was not persisted because `eligible` restricts the persons that may change.
  pub fn add_point(
    &mut self,
    point: TrackPoint,
    frame: Frame,
    eligible: &Selection,
    method: RecoMethod,
  ) -> Option<Insertion> {
    let radius = self.params.match_radius * self.match_scale(method);
    let confirms = method != RecoMethod::Manual && point.quality >= self.params.confirmed_quality;
    self.insert(point, frame, eligible, radius, confirms)
  }

  // Tracker result for `person`. Never creates a person and never counts as a
  // recognition.
  pub fn add_tracked_point(&mut self, point: TrackPoint, frame: Frame, person: PersonId) -> Option<Insertion> {
    let eligible = Selection::from([person]);
    self.insert(point, frame, &eligible, self.params.match_radius, false)
  }

  fn insert(
    &mut self,
    point: TrackPoint,
    frame: Frame,
    eligible: &Selection,
    radius: f64,
    confirms: bool,
  ) -> Option<Insertion> {
    let color = point.color;

    let insertion = if let Some(i) = self.nearest_at(&point.pixel, frame, eligible, radius) {
      let person = &mut self.persons[i];
      let kind = if person.replace_if_better(frame, point) {
        InsertionKind::Replaced
      }
      else {
        InsertionKind::Kept
      };
      Insertion { person: person.id, kind }
    }
    else if let Some((i, backward)) = self.nearest_adjacent(&point.pixel, frame, eligible) {
      let person = &mut self.persons[i];
      let extended = if backward { person.prepend(point) } else { person.append(point); true };
      if !extended {
        warn!("Person {} cannot be extended before frame 0.", person.id);
        return None;
      }
      Insertion { person: person.id, kind: InsertionKind::Extended }
    }
    else if eligible.is_empty() {
      let id = self.fresh_id();
      let mut person = TrackPerson::new(id, frame, point);
      person.display_color = self.display_color();
      self.persons.push(person);
      debug!("New person {} at frame {}.", id, frame);
      Insertion { person: id, kind: InsertionKind::Created }
    }
    else {
      debug!("Point at frame {} matches no selected person, not stored.", frame);
      return None;
    };

    if let Some(person) = self.get_mut(insertion.person) {
      if confirms { person.new_reco = true }
      if let Some(c) = color { person.add_color_sample(c) }
    }
    Some(insertion)
  }

  pub fn add_points(
    &mut self,
    points: Vec<TrackPoint>,
    frame: Frame,
    eligible: &Selection,
    method: RecoMethod,
  ) -> Vec<Insertion> {
    points.into_iter()
      .filter_map(|p| self.add_point(p, frame, eligible, method))
      .collect()
  }

  // Takes over an imported person, keeping its id when it is not taken.
  pub fn add_person(&mut self, mut person: TrackPerson) -> PersonId {
    if person.id.0 == 0 {
      person.id = self.fresh_id();
    }
    else if self.get(person.id).is_some() {
      let id = self.fresh_id();
      warn!("Person id {} already in use, imported as {}.", person.id, id);
      person.id = id;
    }
    self.next_id = self.next_id.max(person.id.0.saturating_add(1));
    person.display_color = self.display_color();
    let id = person.id;
    self.persons.push(person);
    id
  }

  pub fn del_point(
    &mut self,
    position: &Vector2d,
    direction: Direction,
    frame: Frame,
    eligible: &Selection,
  ) -> Option<PersonId> {
    let i = self.nearest_at(position, frame, eligible, self.params.select_radius)?;
    let person = &mut self.persons[i];
    let id = person.id;
    let keep = match direction {
      Direction::Whole => false,
      Direction::Previous => person.remove_up_to(frame),
      Direction::Following => person.remove_from(frame),
    };
    if !keep {
      self.persons.remove(i);
    }
    info!("Deleted {:?} trajectory of person {} at frame {}.", direction, id, frame);
    Some(id)
  }

  // Directional delete on every eligible person. Persons lying entirely on the deleted
  // side of `frame` are removed too. Returns the number of removed persons.
  pub fn del_point_all(&mut self, direction: Direction, frame: Frame, eligible: &Selection) -> usize {
    let before = self.persons.len();
    self.persons.retain_mut(|p| {
      if !is_eligible(eligible, p.id) { return true }
      if p.exists_at(frame) {
        return match direction {
          Direction::Whole => false,
          Direction::Previous => p.remove_up_to(frame),
          Direction::Following => p.remove_from(frame),
        };
      }
      match direction {
        Direction::Whole => false,
        Direction::Previous => p.last_frame() > frame,
        Direction::Following => p.first_frame() < frame,
      }
    });
    let removed = before - self.persons.len();
    info!("Deleted {:?} trajectories of selected persons at frame {}, {} removed.", direction, frame, removed);
    removed
  }

  // Removes trajectories that never enter `region`.
  pub fn del_persons_outside_region(&mut self, region: &Rect) -> usize {
    let before = self.persons.len();
    self.persons.retain(|p| p.points().iter().any(|pt| region.contains(&pt.pixel)));
    before - self.persons.len()
  }

  // Removes trajectories that enter `region` at least once.
  pub fn del_persons_inside_region(&mut self, region: &Rect) -> usize {
    let before = self.persons.len();
    self.persons.retain(|p| !p.points().iter().any(|pt| region.contains(&pt.pixel)));
    before - self.persons.len()
  }

  // The new person owns frames `>= frame`. Splitting at either end of a trajectory
  // does nothing.
  pub fn split_person_at(&mut self, position: &Vector2d, frame: Frame, eligible: &Selection) -> Option<PersonId> {
    let i = self.nearest_at(position, frame, eligible, self.params.select_radius)?;
    let person = &self.persons[i];
    if frame == person.first_frame() || frame == person.last_frame() {
      debug!("Split of person {} at its boundary frame {} ignored.", person.id, frame);
      return None;
    }
    let id = self.fresh_id();
    let color = self.display_color();
    let mut tail = self.persons[i].split_off(frame, id)?;
    tail.display_color = color;
    info!("Split person {} at frame {} into new person {}.", self.persons[i].id, frame, id);
    self.persons.push(tail);
    Some(id)
  }

  // Removes long trajectories at `frame` that were mostly only tracked and rarely
  // confirmed by recognition.
  pub fn purge(&mut self, frame: Frame) -> usize {
    let p = &self.params;
    let (min_points, ratio, quality) = (p.purge_min_points, p.purge_ratio, p.confirmed_quality);
    let before = self.persons.len();
    self.persons.retain(|person| {
      if person.len() <= min_points || !person.exists_at(frame) { return true }
      let unconfirmed = person.points().iter().filter(|pt| pt.quality < quality).count();
      unconfirmed as f64 / person.len() as f64 <= ratio
    });
    let removed = before - self.persons.len();
    if removed > 0 {
      info!("Purged {} unconfirmed trajectories at frame {}.", removed, frame);
    }
    removed
  }

  pub fn optimize_color(&mut self) {
    let d = self.params.color_outlier_distance;
    for person in &mut self.persons {
      person.optimize_color(d);
    }
  }

  // Fills the real-world coordinate of every point at `frame`. Points carrying a
  // measured depth contribute a height sample and keep their depth; others are
  // projected at the person's current height and stay unmeasured. Returns the number of points the projector could not resolve.
  pub fn calc_world_positions(&mut self, frame: Frame, projector: &dyn Projector) -> usize {
    let altitude = projector.altitude();
    let default_height = self.params.default_height;
    let mut unresolved = 0;
    for person in &mut self.persons {
      let Some(point) = person.point_at(frame) else { continue };
      let pixel = point.pixel;
      let measured = point.height(altitude);
      if let Some(h) = measured {
        person.add_height_sample(h);
      }
      let height = measured.unwrap_or(person.height_or(default_height));
      let world = projector.image_to_depth(pixel, height);
      if world.is_none() {
        debug!("No real-world position for person {} at frame {}.", person.id, frame);
        unresolved += 1;
      }
      let Some(point) = person.point_at_mut(frame) else { continue };
      match (measured, world) {
        (Some(_), None) => {},
        (Some(_), Some(w)) => point.world = Some(w),
        (None, w) => {
          point.world = w;
          point.depth_measured = false;
        },
      }
    }
    unresolved
  }

  pub fn recalc_height(&mut self, altitude: f64) {
    for person in &mut self.persons {
      person.recalc_height(altitude);
    }
  }

  pub fn edit_comment(&mut self, position: &Vector2d, frame: Frame, eligible: &Selection, comment: &str) -> Option<PersonId> {
    let i = self.nearest_at(position, frame, eligible, self.params.select_radius)?;
    self.persons[i].comment = comment.to_string();
    Some(self.persons[i].id)
  }

  pub fn set_person_height(&mut self, position: &Vector2d, frame: Frame, eligible: &Selection, height: f64) -> Option<PersonId> {
    let i = self.nearest_at(position, frame, eligible, self.params.select_radius)?;
    self.persons[i].set_height(height);
    Some(self.persons[i].id)
  }

  pub fn reset_person_height(&mut self, position: &Vector2d, frame: Frame, eligible: &Selection) -> Option<PersonId> {
    let i = self.nearest_at(position, frame, eligible, self.params.select_radius)?;
    self.persons[i].reset_height();
    Some(self.persons[i].id)
  }

  // One entry per eligible person with a point near `position` inside the window, naming
  // its closest frame. More than one entry means the position is ambiguous.
  pub fn get_proximal_persons(&self, position: &Vector2d, eligible: &Selection, range: &FrameRange) -> Vec<PersonFrame> {
    let mut result = vec![];
    for person in &self.persons {
      if !is_eligible(eligible, person.id) { continue }
      let first = range.first().max(person.first_frame());
      let last = range.last().min(person.last_frame());
      let mut best: Option<(f64, Frame)> = None;
      for frame in first..=last {
        let Some(point) = person.point_at(frame) else { continue };
        let d = point.distance_to(position);
        if d >= self.params.select_radius { continue }
        if best.map_or(true, |(min_d, _)| d < min_d) {
          best = Some((d, frame));
        }
      }
      if let Some((_, frame)) = best {
        result.push(PersonFrame { person: person.id, frame });
      }
    }
    result
  }

  pub fn select_unique(&self, position: &Vector2d, eligible: &Selection, range: &FrameRange) -> Result<Option<PersonFrame>> {
    let matches = self.get_proximal_persons(position, eligible, range);
    if matches.len() > 1 {
      bail!(TrackError::AmbiguousSelection(matches.len()));
    }
    Ok(matches.first().copied())
  }

  pub fn visible(&self, frame: Frame) -> usize {
    self.persons.iter().filter(|p| p.exists_at(frame)).count()
  }

  pub fn largest_first_frame(&self) -> Option<Frame> {
    self.persons.iter().map(|p| p.first_frame()).max()
  }

  pub fn largest_last_frame(&self) -> Option<Frame> {
    self.persons.iter().map(|p| p.last_frame()).max()
  }

  pub fn smallest_first_frame(&self) -> Option<Frame> {
    self.persons.iter().map(|p| p.first_frame()).min()
  }

  pub fn clear_new_reco(&mut self) {
    for person in &mut self.persons {
      person.new_reco = false;
    }
  }

  // Previously returned ids are invalid afterwards.
  pub fn clear(&mut self) {
    self.persons.clear();
    self.next_id = 1;
  }

  pub fn reset(&mut self) {
    self.clear();
    self.rng = Xoshiro256PlusPlus::seed_from_u64(self.params.color_seed);
  }
}
