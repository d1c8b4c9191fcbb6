use crate::all::*;

// Drags a single stored point to a new pixel position. While a point is held the
// pipeline flight is taken, so no frame update can change the store underneath.
pub struct TrackPointMover {
  selected: Option<(PersonFrame, FlightGuard)>,
}

impl TrackPointMover {
  pub fn new() -> TrackPointMover {
    TrackPointMover { selected: None }
  }

  pub fn selected(&self) -> Option<PersonFrame> {
    self.selected.as_ref().map(|(pf, _)| *pf)
  }

  // Picks the point near `position`. Refuses with `TrackError::AmbiguousSelection` when
  // several trajectories are that close.
  pub fn select(
    &mut self,
    storage: &PersonStorage,
    flight: &SingleFlight,
    position: &Vector2d,
    eligible: &Selection,
    range: &FrameRange,
  ) -> Result<Option<PersonFrame>> {
    self.release();
    let Some(guard) = flight.try_acquire() else {
      bail!("Frame update in progress, cannot select a point.");
    };
    let Some(pf) = storage.select_unique(position, eligible, range)? else { return Ok(None) };
    debug!("Selected person {} at frame {}.", pf.person, pf.frame);
    self.selected = Some((pf, guard));
    Ok(Some(pf))
  }

  // The moved point counts as manually placed and loses its real-world coordinate.
  pub fn move_to(&mut self, storage: &mut PersonStorage, position: Vector2d) -> bool {
    let Some(pf) = self.selected() else { return false };
    let Some(point) = storage.get_mut(pf.person).and_then(|p| p.point_at_mut(pf.frame)) else {
      warn!("Selected person {} no longer has frame {}.", pf.person, pf.frame);
      return false;
    };
    point.pixel = position;
    point.quality = MAX_QUALITY;
    point.world = None;
    point.depth_measured = false;
    true
  }

  pub fn release(&mut self) -> Option<PersonFrame> {
    self.selected.take().map(|(pf, _)| pf)
  }
}
