use crate::all::*;

// Correspondence between image pixels and real-world centimeters. The store and the
// frame pipeline make no assumption about the calibration model behind it.
pub trait Projector {
  // Intersects the viewing ray of `pixel` with the horizontal plane `height` cm above
  // the ground. `None` if the ray never reaches that plane.
  fn image_to_world(&self, pixel: Vector2d, height: f64) -> Option<Vector3d>;

  fn world_to_image(&self, point: Vector3d) -> Option<Vector2d>;

  // Ground resolution at the image center.
  fn cm_per_pixel(&self) -> f64;

  // Camera height above the ground, cm.
  fn altitude(&self) -> f64;

  // Changes whenever the calibration does, so cached sizes can be invalidated.
  fn calibration_generation(&self) -> u64 {
    0
  }

  // Depth-encoded real-world coordinate as stored in `TrackPoint::world`.
  fn image_to_depth(&self, pixel: Vector2d, height: f64) -> Option<Vector3d> {
    let p = self.image_to_world(pixel, height)?;
    Some(Vector3d::new(p[0], p[1], self.altitude() - p[2]))
  }
}

#[cfg(test)]
pub mod tests {
  use super::*;

  // Camera looking straight down from `altitude`, `scale` cm per pixel at the ground,
  // principal point at the origin.
  pub struct NadirProjector {
    pub altitude: f64,
    pub scale: f64,
    pub generation: u64,
  }

  impl Projector for NadirProjector {
    fn image_to_world(&self, pixel: Vector2d, height: f64) -> Option<Vector3d> {
      if height >= self.altitude { return None }
      let k = self.scale * (self.altitude - height) / self.altitude;
      Some(Vector3d::new(pixel[0] * k, pixel[1] * k, height))
    }

    fn world_to_image(&self, point: Vector3d) -> Option<Vector2d> {
      if point[2] >= self.altitude { return None }
      let k = self.scale * (self.altitude - point[2]) / self.altitude;
      Some(Vector2d::new(point[0] / k, point[1] / k))
    }

    fn cm_per_pixel(&self) -> f64 {
      self.scale
    }

    fn altitude(&self) -> f64 {
      self.altitude
    }

    fn calibration_generation(&self) -> u64 {
      self.generation
    }
  }

  #[test]
  fn test_nadir_roundtrip() {
    let p = NadirProjector { altitude: 500., scale: 1., generation: 0 };
    let w = p.image_to_world(Vector2d::new(10., -4.), 100.).unwrap();
    assert!((w - Vector3d::new(8., -3.2, 100.)).norm() < 1e-12);
    assert!((p.world_to_image(w).unwrap() - Vector2d::new(10., -4.)).norm() < 1e-12);
    let d = p.image_to_depth(Vector2d::new(10., -4.), 100.).unwrap();
    assert_eq!(d[2], 400.);
    assert!(p.image_to_world(Vector2d::zeros(), 600.).is_none());
  }
}
