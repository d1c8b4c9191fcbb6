use crate::all::*;

pub const MAX_QUALITY: f64 = 100.;
// Above `MAX_QUALITY` so that a manually placed point replaces whatever is stored.
pub const MANUAL_QUALITY: f64 = 110.;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PersonId(pub usize);

impl std::fmt::Display for PersonId {
  fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
    write!(f, "{}", self.0)
  }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Color {
  pub r: u8,
  pub g: u8,
  pub b: u8,
}

impl Color {
  pub fn new(r: u8, g: u8, b: u8) -> Color {
    Color { r, g, b }
  }

  pub fn to_vector(&self) -> Vector3d {
    Vector3d::new(self.r as f64, self.g as f64, self.b as f64)
  }

  pub fn from_vector(v: &Vector3d) -> Color {
    let c = |x: f64| x.round().clamp(0., 255.) as u8;
    Color::new(c(v[0]), c(v[1]), c(v[2]))
  }
}

// Which recognizer produced a point.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RecoMethod {
  Casern,
  Hermes,
  Color,
  Japan,
  MultiColor,
  Code,
  Stereo,
  Manual,
}

#[derive(Clone, Debug, PartialEq)]
pub struct TrackPoint {
  // Pixels.
  pub pixel: Vector2d,
  pub quality: f64,
  // Centimeters: ground plane x, y and distance below the camera as z.
  pub world: Option<Vector3d>,
  // Set when `world` holds an observed depth. Projected positions only encode the
  // height they were projected at.
  pub depth_measured: bool,
  pub marker_id: Option<i32>,
  pub color: Option<Color>,
  // Pixel where `color` was sampled.
  pub color_point: Option<Vector2d>,
}

impl TrackPoint {
  pub fn new(pixel: Vector2d, quality: f64) -> TrackPoint {
    TrackPoint {
      pixel,
      quality,
      world: None,
      depth_measured: false,
      marker_id: None,
      color: None,
      color_point: None,
    }
  }

  pub fn manual(pixel: Vector2d) -> TrackPoint {
    TrackPoint::new(pixel, MANUAL_QUALITY)
  }

  pub fn distance_to(&self, p: &Vector2d) -> f64 {
    distance(&self.pixel, p)
  }

  pub fn set_measured_world(&mut self, world: Vector3d) {
    self.world = Some(world);
    self.depth_measured = true;
  }

  // Height above ground implied by a measured depth, if any.
  pub fn height(&self, altitude: f64) -> Option<f64> {
    if !self.depth_measured { return None }
    match self.world {
      Some(w) if w[2] > 0. => Some(altitude - w[2]),
      _ => None,
    }
  }

  fn clamp_quality(&mut self) {
    if self.quality > MAX_QUALITY { self.quality = MAX_QUALITY }
  }
}

#[derive(Clone, Debug)]
pub struct TrackPerson {
  pub id: PersonId,
  first_frame: Frame,
  points: Vec<TrackPoint>,
  height: Option<f64>,
  height_count: usize,
  pub comment: String,
  pub marker_id: Option<i32>,
  pub color: Option<Color>,
  pub color_count: usize,
  pub display_color: Color,
  // Set when recognition confirmed the person during the current update.
  pub new_reco: bool,
}

impl TrackPerson {
  pub fn new(id: PersonId, first_frame: Frame, mut point: TrackPoint) -> TrackPerson {
    point.clamp_quality();
    TrackPerson {
      id,
      first_frame,
      points: vec![point],
      height: None,
      height_count: 0,
      comment: String::new(),
      marker_id: None,
      color: None,
      color_count: 0,
      display_color: Color::new(255, 255, 255),
      new_reco: false,
    }
  }

  pub fn from_points(id: PersonId, first_frame: Frame, points: Vec<TrackPoint>) -> Option<TrackPerson> {
    let mut it = points.into_iter();
    let mut person = TrackPerson::new(id, first_frame, it.next()?);
    for point in it {
      person.append(point);
    }
    Some(person)
  }

  pub fn first_frame(&self) -> Frame {
    self.first_frame
  }

  pub fn last_frame(&self) -> Frame {
    self.first_frame + (self.points.len() - 1)
  }

  pub fn len(&self) -> usize {
    self.points.len()
  }

  pub fn points(&self) -> &[TrackPoint] {
    &self.points
  }

  pub fn frames(&self) -> impl Iterator<Item = (Frame, &TrackPoint)> {
    let first = self.first_frame;
    self.points.iter().enumerate().map(move |(i, p)| (first + i, p))
  }

  pub fn exists_at(&self, frame: Frame) -> bool {
    frame >= self.first_frame && frame <= self.last_frame()
  }

  pub fn point_at(&self, frame: Frame) -> Option<&TrackPoint> {
    if !self.exists_at(frame) { return None }
    self.points.get(frame - self.first_frame)
  }

  pub fn point_at_mut(&mut self, frame: Frame) -> Option<&mut TrackPoint> {
    if !self.exists_at(frame) { return None }
    self.points.get_mut(frame - self.first_frame)
  }

  pub fn height(&self) -> Option<f64> {
    self.height
  }

  pub fn height_or(&self, default_height: f64) -> f64 {
    self.height.unwrap_or(default_height)
  }

  // Manually entered height, counts as a single sample.
  pub fn set_height(&mut self, height: f64) {
    self.height = Some(height);
    self.height_count = 1;
  }

  pub fn reset_height(&mut self) {
    self.height = None;
    self.height_count = 0;
  }

  // Running mean over all samples seen so far.
  pub fn add_height_sample(&mut self, height: f64) {
    let n = self.height_count as f64;
    self.height = Some(match self.height {
      Some(h) if self.height_count > 0 => (h * n + height) / (n + 1.),
      _ => height,
    });
    self.height_count += 1;
  }

  // Re-estimates height from the measured depth of every point. Keeps the previous value if no
  // point carries a usable depth.
  pub fn recalc_height(&mut self, altitude: f64) {
    let samples: Vec<f64> = self.points.iter()
      .filter_map(|p| p.height(altitude))
      .collect();
    if samples.is_empty() { return }
    self.reset_height();
    for h in samples {
      self.add_height_sample(h);
    }
  }

  // Insertion helpers below keep the points contiguous; callers check adjacency.

  pub fn append(&mut self, mut point: TrackPoint) {
    point.clamp_quality();
    self.points.push(point);
  }

  // Returns false, leaving the person unchanged, when it already starts at frame 0.
  pub fn prepend(&mut self, mut point: TrackPoint) -> bool {
    if self.first_frame == 0 { return false }
    point.clamp_quality();
    self.points.insert(0, point);
    self.first_frame -= 1;
    true
  }

  // Returns true if the stored point was replaced.
  pub fn replace_if_better(&mut self, frame: Frame, mut point: TrackPoint) -> bool {
    let Some(stored) = self.point_at_mut(frame) else { return false };
    if point.quality <= stored.quality { return false }
    point.clamp_quality();
    if point.color.is_none() {
      point.color = stored.color;
      point.color_point = stored.color_point;
    }
    if point.marker_id.is_none() {
      point.marker_id = stored.marker_id;
    }
    *stored = point;
    true
  }

  // Removes frames `<= frame`. Returns false if nothing remains.
  pub fn remove_up_to(&mut self, frame: Frame) -> bool {
    if frame < self.first_frame { return true }
    if frame >= self.last_frame() {
      self.points.clear();
      return false;
    }
    self.points.drain(..=(frame - self.first_frame));
    self.first_frame = frame + 1;
    true
  }

  // Removes frames `>= frame`. Returns false if nothing remains.
  pub fn remove_from(&mut self, frame: Frame) -> bool {
    if frame <= self.first_frame {
      self.points.clear();
      return false;
    }
    self.points.truncate(frame - self.first_frame);
    true
  }

  // Moves frames `>= frame` into a new person. The split must leave both parts non-empty.
  pub fn split_off(&mut self, frame: Frame, id: PersonId) -> Option<TrackPerson> {
    if frame <= self.first_frame || frame > self.last_frame() { return None }
    let tail = self.points.split_off(frame - self.first_frame);
    Some(TrackPerson {
      id,
      first_frame: frame,
      points: tail,
      height: self.height,
      height_count: self.height_count,
      comment: self.comment.clone(),
      marker_id: self.marker_id,
      color: self.color,
      color_count: self.color_count,
      display_color: self.display_color,
      new_reco: false,
    })
  }

  pub fn add_color_sample(&mut self, color: Color) {
    let n = self.color_count as f64;
    let mean = match self.color {
      Some(c) if self.color_count > 0 => (c.to_vector() * n + color.to_vector()) / (n + 1.),
      _ => color.to_vector(),
    };
    self.color = Some(Color::from_vector(&mean));
    self.color_count += 1;
  }

  // Quality weighted mean of the sampled colors lying within `outlier_distance` of
  // their per-channel median.
  pub fn optimize_color(&mut self, outlier_distance: f64) {
    let samples: Vec<(Vector3d, f64)> = self.points.iter()
      .filter_map(|p| p.color.map(|c| (c.to_vector(), p.quality.max(1.))))
      .collect();
    let Some(median) = channel_median(&samples) else { return };
    let inliers: Vec<&(Vector3d, f64)> = samples.iter()
      .filter(|(c, _)| (c - median).norm() <= outlier_distance)
      .collect();
    let mean = weighted_mean(inliers.iter().copied()).unwrap_or(median);
    self.color = Some(Color::from_vector(&mean));
    self.color_count = inliers.len().max(1);
  }
}

fn channel_median(samples: &[(Vector3d, f64)]) -> Option<Vector3d> {
  if samples.is_empty() { return None }
  let mut median = Vector3d::zeros();
  for i in 0..3 {
    let mut v: Vec<f64> = samples.iter().map(|(c, _)| c[i]).collect();
    v.sort_by(|a, b| a.total_cmp(b));
    median[i] = v[v.len() / 2];
  }
  Some(median)
}

fn weighted_mean<'a>(samples: impl Iterator<Item = &'a (Vector3d, f64)>) -> Option<Vector3d> {
  let mut sum = Vector3d::zeros();
  let mut weight = 0.;
  for (c, w) in samples {
    sum += c * *w;
    weight += w;
  }
  if weight <= 0. { return None }
  Some(sum / weight)
}
