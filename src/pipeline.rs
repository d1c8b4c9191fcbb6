// Per-frame processing: filter the image, follow the known persons into the frame,
// recognize new ones, and reconcile everything with the store.

use crate::all::*;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

// At most one update (or manual edit) at a time. Work arriving while the flight is
// taken is dropped, not queued.
#[derive(Clone, Default)]
pub struct SingleFlight {
  busy: Arc<AtomicBool>,
}

pub struct FlightGuard {
  busy: Arc<AtomicBool>,
}

impl SingleFlight {
  pub fn new() -> SingleFlight {
    SingleFlight::default()
  }

  pub fn try_acquire(&self) -> Option<FlightGuard> {
    self.busy.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire).ok()?;
    Some(FlightGuard { busy: self.busy.clone() })
  }

  pub fn is_busy(&self) -> bool {
    self.busy.load(Ordering::Acquire)
  }
}

impl Drop for FlightGuard {
  fn drop(&mut self) {
    self.busy.store(false, Ordering::Release);
  }
}

#[derive(Clone, Default)]
pub struct CancellationToken {
  cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
  pub fn new() -> CancellationToken {
    CancellationToken::default()
  }

  pub fn cancel(&self) {
    self.cancelled.store(true, Ordering::Release);
  }

  pub fn is_cancelled(&self) -> bool {
    self.cancelled.load(Ordering::Acquire)
  }
}

pub trait FrameSource {
  type Image;
  fn frame_count(&self) -> usize;
  fn load(&mut self, frame: Frame) -> Result<Self::Image>;
}

pub trait ImageFilter<I> {
  fn apply(&mut self, image: &mut I) -> Result<()>;
}

pub struct TrackTarget {
  pub person: PersonId,
  pub pixel: Vector2d,
  // Pixels.
  pub search_window: f64,
}

pub struct TrackedPoint {
  pub person: PersonId,
  pub point: TrackPoint,
}

pub trait PointTracker<I> {
  // Follows `targets`, given at frame `from`, into the adjacent frame `to` shown in
  // `image`. Quality of the results reflects the tracking confidence.
  fn track(&mut self, image: &I, from: Frame, to: Frame, targets: &[TrackTarget]) -> Result<Vec<TrackedPoint>>;
  fn reset(&mut self);
}

pub trait Recognizer<I> {
  fn method(&self) -> RecoMethod;
  fn recognize(&mut self, image: &I, frame: Frame) -> Result<Vec<TrackPoint>>;
}

#[derive(Debug, Default, PartialEq)]
pub struct FrameUpdate {
  pub frame: Frame,
  pub tracked: usize,
  pub recognized: usize,
  pub purged: usize,
  pub unresolved: usize,
}

#[derive(Debug, Default, PartialEq)]
pub struct BulkReport {
  pub forward_frames: usize,
  pub backward_frames: usize,
  pub dropped_frames: usize,
  pub cancelled: bool,
  pub persons: usize,
}

pub struct FramePipeline<I> {
  filters: Vec<Box<dyn ImageFilter<I>>>,
  tracker: Option<Box<dyn PointTracker<I>>>,
  recognizer: Option<Box<dyn Recognizer<I>>>,
  projector: Box<dyn Projector>,
  head_sizer: HeadSizer,
  flight: SingleFlight,
  last_frame: Option<Frame>,
  reco_step: usize,
  purge_after_recognition: bool,
  skip_back_track: bool,
  back_track_offset: usize,
  skip_color_optimization: bool,
  pub track_enabled: bool,
  pub reco_enabled: bool,
}

impl<I> FramePipeline<I> {
  pub fn new(p: &ParameterSet, projector: Box<dyn Projector>) -> FramePipeline<I> {
    FramePipeline {
      filters: vec![],
      tracker: None,
      recognizer: None,
      projector,
      head_sizer: HeadSizer::new(p),
      flight: SingleFlight::new(),
      last_frame: None,
      reco_step: p.reco_step.max(1),
      purge_after_recognition: p.purge_after_recognition,
      skip_back_track: p.skip_back_track,
      back_track_offset: p.back_track_offset,
      skip_color_optimization: p.skip_color_optimization,
      track_enabled: true,
      reco_enabled: true,
    }
  }

  pub fn add_filter(&mut self, filter: Box<dyn ImageFilter<I>>) {
    self.filters.push(filter);
  }

  pub fn set_tracker(&mut self, tracker: Box<dyn PointTracker<I>>) {
    self.tracker = Some(tracker);
  }

  pub fn set_recognizer(&mut self, recognizer: Box<dyn Recognizer<I>>) {
    self.recognizer = Some(recognizer);
  }

  pub fn projector(&self) -> &dyn Projector {
    self.projector.as_ref()
  }

  // Shared with manual edits so they never interleave with an update.
  pub fn flight(&self) -> SingleFlight {
    self.flight.clone()
  }

  pub fn calibration_changed(&mut self, storage: &mut PersonStorage, projector: Box<dyn Projector>) {
    info!("Calibration changed, clearing {} trajectories.", storage.len());
    storage.clear();
    if let Some(tracker) = &mut self.tracker { tracker.reset() }
    self.projector = projector;
    self.last_frame = None;
  }

  fn track_targets(&mut self, storage: &PersonStorage, from: Frame) -> Vec<TrackTarget> {
    let mut targets = vec![];
    for person in storage.persons() {
      let Some(point) = person.point_at(from) else { continue };
      let head_size = self.head_sizer.head_size(self.projector.as_ref(), Some(person), from);
      targets.push(TrackTarget {
        person: person.id,
        pixel: point.pixel,
        search_window: self.head_sizer.search_window_size(head_size),
      });
    }
    targets
  }

  // Processes one frame. Returns `None` when the frame was dropped because another
  // update or edit holds the flight.
  pub fn update(
    &mut self,
    storage: &mut PersonStorage,
    mut image: I,
    frame: Frame,
    force_reco: bool,
  ) -> Result<Option<FrameUpdate>> {
    let Some(_guard) = self.flight.try_acquire() else {
      debug!("Dropped frame {}, previous update still running.", frame);
      return Ok(None);
    };
    for filter in &mut self.filters {
      filter.apply(&mut image).context(format!("Failed to filter frame {}.", frame))?;
    }
    let mut update = FrameUpdate { frame, ..FrameUpdate::default() };

    // Tracked points go in before recognized ones, so on equal quality the tracked
    // point stays.
    let previous = self.last_frame.filter(|f| f.abs_diff(frame) == 1);
    if let Some(from) = previous.filter(|_| self.track_enabled && self.tracker.is_some()) {
      let targets = self.track_targets(storage, from);
      if let Some(tracker) = &mut self.tracker {
        let tracked = tracker.track(&image, from, frame, &targets)
          .context(format!("Failed to track into frame {}.", frame))?;
        for t in tracked {
          if storage.add_tracked_point(t.point, frame, t.person).is_some() { update.tracked += 1 }
        }
      }
    }

    let reco_due = force_reco || frame % self.reco_step == 0;
    if self.reco_enabled && reco_due {
      if let Some(recognizer) = &mut self.recognizer {
        let method = recognizer.method();
        let points = recognizer.recognize(&image, frame)
          .context(format!("Failed to recognize frame {}.", frame))?;
        update.recognized = storage.add_points(points, frame, &Selection::new(), method).len();
        if self.purge_after_recognition {
          update.purged = storage.purge(frame);
        }
      }
    }

    update.unresolved = storage.calc_world_positions(frame, self.projector.as_ref());
    self.last_frame = Some(frame);
    debug!("Frame {}: {} tracked, {} recognized, {} visible.",
      frame, update.tracked, update.recognized, storage.visible(frame));
    Ok(Some(update))
  }

  fn step<S: FrameSource<Image = I>>(
    &mut self,
    storage: &mut PersonStorage,
    source: &mut S,
    frame: Frame,
    force_reco: bool,
    report: &mut BulkReport,
  ) -> Result<bool> {
    let image = source.load(frame).context(format!("Failed to load frame {}.", frame))?;
    let done = self.update(storage, image, frame, force_reco)?.is_some();
    if !done { report.dropped_frames += 1 }
    Ok(done)
  }

  fn run_track_all<S: FrameSource<Image = I>>(
    &mut self,
    storage: &mut PersonStorage,
    source: &mut S,
    start: Frame,
    token: &CancellationToken,
    report: &mut BulkReport,
  ) -> Result<()> {
    let frame_count = source.frame_count();
    if start >= frame_count { bail!("Start frame {} beyond the {} frames of the sequence.", start, frame_count) }
    let last = frame_count - 1;
    self.track_enabled = true;
    self.reco_enabled = true;
    for frame in start..=last {
      if token.is_cancelled() {
        report.cancelled = true;
        return Ok(());
      }
      self.step(storage, source, frame, frame == start, report)?;
      report.forward_frames += 1;
    }
    if self.skip_back_track { return Ok(()) }

    // Persons found late in the forward pass are followed back to the beginning. The
    // first recognized points are often weak, hence the offset.
    let Some(largest_first) = storage.largest_first_frame() else { return Ok(()) };
    let from = (largest_first + self.back_track_offset).min(last);
    info!("Tracking backward from frame {}.", from);
    self.track_enabled = false;
    self.reco_enabled = false;
    self.step(storage, source, from, false, report)?;
    report.backward_frames += 1;
    self.track_enabled = true;
    for frame in (0..from).rev() {
      if token.is_cancelled() {
        report.cancelled = true;
        return Ok(());
      }
      // Frames already recognized forward are not recognized again.
      self.reco_enabled = frame <= start;
      self.step(storage, source, frame, false, report)?;
      report.backward_frames += 1;
    }
    Ok(())
  }

  // Tracks the whole sequence from `start`: forward to the end, then back to the first
  // frame. `token` is polled once per frame.
  pub fn track_all<S: FrameSource<Image = I>>(
    &mut self,
    storage: &mut PersonStorage,
    source: &mut S,
    start: Frame,
    token: &CancellationToken,
  ) -> Result<BulkReport> {
    let saved = (self.track_enabled, self.reco_enabled);
    let mut report = BulkReport::default();
    let result = self.run_track_all(storage, source, start, token, &mut report);
    (self.track_enabled, self.reco_enabled) = saved;
    result?;
    if report.cancelled {
      warn!("Tracking cancelled after {} frames.", report.forward_frames + report.backward_frames);
    }
    else if !self.skip_color_optimization {
      storage.optimize_color();
    }
    report.persons = storage.len();
    info!("Tracked {} persons, {} frames forward and {} backward.",
      report.persons, report.forward_frames, report.backward_frames);
    Ok(report)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::projector::tests::NadirProjector;
  use std::rc::Rc;
  use std::cell::RefCell;

  // Images are just their frame numbers.
  struct Sequence(usize);

  impl FrameSource for Sequence {
    type Image = Frame;

    fn frame_count(&self) -> usize {
      self.0
    }

    fn load(&mut self, frame: Frame) -> Result<Frame> {
      Ok(frame)
    }
  }

  // Reports every target where it was, with fixed quality.
  struct StillTracker {
    quality: f64,
    resets: Rc<RefCell<usize>>,
  }

  impl PointTracker<Frame> for StillTracker {
    fn track(&mut self, _: &Frame, _: Frame, _: Frame, targets: &[TrackTarget]) -> Result<Vec<TrackedPoint>> {
      Ok(targets.iter()
        .map(|t| TrackedPoint { person: t.person, point: TrackPoint::new(t.pixel, self.quality) })
        .collect())
    }

    fn reset(&mut self) {
      *self.resets.borrow_mut() += 1;
    }
  }

  // Finds one person at `pixel` from frame `from` on and logs the frames it ran on.
  struct FixedRecognizer {
    from: Frame,
    pixel: Vector2d,
    quality: f64,
    calls: Rc<RefCell<Vec<Frame>>>,
  }

  impl Recognizer<Frame> for FixedRecognizer {
    fn method(&self) -> RecoMethod {
      RecoMethod::Casern
    }

    fn recognize(&mut self, image: &Frame, frame: Frame) -> Result<Vec<TrackPoint>> {
      assert_eq!(*image, frame + 1000);
      self.calls.borrow_mut().push(frame);
      if frame < self.from { return Ok(vec![]) }
      Ok(vec![TrackPoint::new(self.pixel, self.quality)])
    }
  }

  struct Shift;

  impl ImageFilter<Frame> for Shift {
    fn apply(&mut self, image: &mut Frame) -> Result<()> {
      *image += 1000;
      Ok(())
    }
  }

  struct Setup {
    pipeline: FramePipeline<Frame>,
    storage: PersonStorage,
    calls: Rc<RefCell<Vec<Frame>>>,
    resets: Rc<RefCell<usize>>,
  }

  fn setup(p: ParameterSet, reco_from: Frame, reco_quality: f64, tracker_quality: f64) -> Setup {
    let projector = NadirProjector { altitude: 500., scale: 1., generation: 1 };
    let mut pipeline = FramePipeline::new(&p, Box::new(projector));
    let calls = Rc::new(RefCell::new(vec![]));
    let resets = Rc::new(RefCell::new(0));
    pipeline.add_filter(Box::new(Shift));
    pipeline.set_tracker(Box::new(StillTracker { quality: tracker_quality, resets: resets.clone() }));
    pipeline.set_recognizer(Box::new(FixedRecognizer {
      from: reco_from,
      pixel: Vector2d::new(100., 100.),
      quality: reco_quality,
      calls: calls.clone(),
    }));
    Setup { pipeline, storage: PersonStorage::new(&p), calls, resets }
  }

  #[test]
  fn test_single_flight() {
    let flight = SingleFlight::new();
    let guard = flight.try_acquire().unwrap();
    assert!(flight.clone().try_acquire().is_none());
    drop(guard);
    assert!(!flight.is_busy());
    assert!(flight.try_acquire().is_some());
  }

  #[test]
  fn test_busy_pipeline_drops_frame() {
    let mut s = setup(ParameterSet::default(), 0, 100., 60.);
    let guard = s.pipeline.flight().try_acquire().unwrap();
    assert_eq!(s.pipeline.update(&mut s.storage, 0, 0, false).unwrap(), None);
    assert!(s.storage.is_empty());
    drop(guard);
    let update = s.pipeline.update(&mut s.storage, 0, 0, false).unwrap().unwrap();
    assert_eq!(update.recognized, 1);
    assert_eq!(s.storage.len(), 1);
  }

  #[test]
  fn test_tracker_wins_ties() {
    let mut s = setup(ParameterSet::default(), 0, 60., 60.);
    s.pipeline.update(&mut s.storage, 0, 0, false).unwrap();
    let update = s.pipeline.update(&mut s.storage, 1, 1, false).unwrap().unwrap();
    assert_eq!(update.tracked, 1);
    assert_eq!(update.recognized, 1);
    assert_eq!(s.storage.len(), 1);
    assert_eq!(s.storage.persons()[0].len(), 2);
    // World positions are filled after the update.
    assert!(s.storage.persons()[0].point_at(1).unwrap().world.is_some());
  }

  #[test]
  fn test_reco_step() {
    let p = ParameterSet { reco_step: 3, ..ParameterSet::default() };
    let mut s = setup(p, 0, 100., 60.);
    for frame in 0..7 {
      s.pipeline.update(&mut s.storage, frame, frame, frame == 4).unwrap();
    }
    assert_eq!(*s.calls.borrow(), vec![0, 3, 4, 6]);
  }

  #[test]
  fn test_calibration_change_clears() {
    let mut s = setup(ParameterSet::default(), 0, 100., 60.);
    s.pipeline.update(&mut s.storage, 0, 0, false).unwrap();
    let projector = NadirProjector { altitude: 600., scale: 1., generation: 2 };
    s.pipeline.calibration_changed(&mut s.storage, Box::new(projector));
    assert!(s.storage.is_empty());
    assert_eq!(*s.resets.borrow(), 1);
    assert_eq!(s.pipeline.projector().altitude(), 600.);
  }

  #[test]
  fn test_track_all_back_tracks() {
    let mut s = setup(ParameterSet::default(), 3, 100., 60.);
    let report = s.pipeline.track_all(&mut s.storage, &mut Sequence(10), 0, &CancellationToken::new()).unwrap();
    assert_eq!(report.forward_frames, 10);
    // From frame 3 + 5 down to 0.
    assert_eq!(report.backward_frames, 9);
    assert!(!report.cancelled);
    assert_eq!(report.persons, 1);
    let person = &s.storage.persons()[0];
    assert_eq!((person.first_frame(), person.last_frame()), (0, 9));
    // Backward pass only recognizes once it is back at the start frame.
    assert_eq!(s.calls.borrow().iter().filter(|f| **f == 0).count(), 2);
    assert_eq!(s.calls.borrow().len(), 11);
    assert!(s.pipeline.track_enabled && s.pipeline.reco_enabled);
  }

  #[test]
  fn test_track_all_cancelled() {
    let mut s = setup(ParameterSet::default(), 0, 100., 60.);
    let token = CancellationToken::new();
    token.clone().cancel();
    let report = s.pipeline.track_all(&mut s.storage, &mut Sequence(10), 0, &token).unwrap();
    assert!(report.cancelled);
    assert_eq!(report.forward_frames, 0);
    assert!(s.storage.is_empty());
  }
}
