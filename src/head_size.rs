use crate::all::*;

// Average head diameter, cm.
pub const HEAD_SIZE: f64 = 21.;
// Pixels, used when the calibration yields no sensible size at all.
const FALLBACK_HEAD_SIZE: f64 = 20.;

// Apparent head diameter in pixels, which sizes the tracker search windows.
pub struct HeadSizer {
  default_height: f64,
  min_height: f64,
  region_levels: usize,
  region_scale: f64,
  // Calibration generation and the head size of a default-height person.
  cached: Option<(u64, f64)>,
}

impl HeadSizer {
  pub fn new(p: &ParameterSet) -> HeadSizer {
    HeadSizer {
      default_height: p.default_height,
      min_height: p.min_height,
      region_levels: p.track_region_levels,
      region_scale: p.track_region_scale,
      cached: None,
    }
  }

  pub fn default_head_size(&mut self, projector: &dyn Projector) -> f64 {
    let generation = projector.calibration_generation();
    if let Some((g, size)) = self.cached {
      if g == generation { return size }
    }
    let size = match depth_head_size(projector, projector.altitude() - self.default_height) {
      Some(size) => size,
      None => {
        warn!("Calibration gives no head size, using {} pixels.", FALLBACK_HEAD_SIZE);
        FALLBACK_HEAD_SIZE
      },
    };
    debug!("Default head size {:.2} pixels for calibration generation {}.", size, generation);
    self.cached = Some((generation, size));
    size
  }

  // Head size of `person` at `frame`, falling back to coarser estimates whenever the
  // projector cannot resolve the head position.
  pub fn head_size(&mut self, projector: &dyn Projector, person: Option<&TrackPerson>, frame: Frame) -> f64 {
    let Some((person, point)) = person.and_then(|p| p.point_at(frame).map(|pt| (p, pt))) else {
      return self.default_head_size(projector);
    };
    let height = person.height_or(self.default_height);
    if let Some(size) = projected_head_size(projector, point.pixel, height) {
      return size;
    }
    let altitude = projector.altitude();
    if let Some(size) = point.world.and_then(|w| depth_head_size(projector, w[2])) {
      return size;
    }
    if let Some(h) = person.height() {
      if h > self.min_height {
        if let Some(size) = depth_head_size(projector, altitude - h) { return size }
      }
    }
    self.default_head_size(projector)
  }

  pub fn search_window_size(&self, head_size: f64) -> f64 {
    head_size / 2f64.powi(self.region_levels as i32) * self.region_scale / 10.
  }
}

// Head size for a head `depth` cm below the camera, using the ground resolution.
fn depth_head_size(projector: &dyn Projector, depth: f64) -> Option<f64> {
  let cm_per_pixel = projector.cm_per_pixel();
  if depth <= 0. || cm_per_pixel <= 0. { return None }
  let size = HEAD_SIZE * projector.altitude() / depth / cm_per_pixel;
  if size.is_finite() && size > 0. { Some(size) } else { None }
}

// Projects a head-sized cross around the 3D head position back into the image and
// takes the larger of its two extents.
pub fn projected_head_size(projector: &dyn Projector, pixel: Vector2d, height: f64) -> Option<f64> {
  let head = projector.image_to_world(pixel, height)?;
  let r = HEAD_SIZE * 0.5;
  let x1 = projector.world_to_image(head + Vector3d::new(r, 0., 0.))?;
  let x2 = projector.world_to_image(head - Vector3d::new(r, 0., 0.))?;
  let y1 = projector.world_to_image(head + Vector3d::new(0., r, 0.))?;
  let y2 = projector.world_to_image(head - Vector3d::new(0., r, 0.))?;
  Some(distance(&x1, &x2).max(distance(&y1, &y2)))
}
