// Pinhole camera with OpenCV radial distortion and a world-to-camera transform.
// The world z axis points up from the ground plane; the camera looks along its own +z.

use crate::all::*;

const UNDISTORT_MAX_ITERATIONS: usize = 20;
const UNDISTORT_CONVERGENCE_THRESHOLD: f64 = 1e-5;
// Rays closer to parallel with the ground than this never hit a height plane.
const MIN_RAY_SLOPE: f64 = 1e-9;

pub struct PinholeProjector {
  pub camera_matrix: Matrix3d,
  pub distortion_coefficients: Vec<f64>,
  // World to camera.
  pub rotation: Matrix3d,
  pub translation: Vector3d,
  camera_center: Vector3d,
  cm_per_pixel: f64,
  generation: u64,
}

impl PinholeProjector {
  pub fn new(
    camera_matrix: Matrix3d,
    distortion_coefficients: Vec<f64>,
    rotation: Matrix3d,
    translation: Vector3d,
    generation: u64,
  ) -> Result<PinholeProjector> {
    if !distortion_coefficients.is_empty() && distortion_coefficients.len() != 3 {
      bail!("Expected 0 or 3 radial distortion coefficients, got {}.", distortion_coefficients.len());
    }
    if camera_matrix[(0, 0)] == 0. || camera_matrix[(1, 1)] == 0. {
      bail!("Camera matrix has a zero focal length.");
    }
    let mut projector = PinholeProjector {
      camera_matrix,
      distortion_coefficients,
      rotation,
      translation,
      camera_center: -(rotation.transpose() * translation),
      cm_per_pixel: 0.,
      generation,
    };
    projector.cm_per_pixel = projector.ground_resolution()
      .ok_or(TrackError::ProjectionUnavailable("the ground at the principal point".to_string()))?;
    Ok(projector)
  }

  fn principal_point(&self) -> Vector2d {
    Vector2d::new(self.camera_matrix[(0, 2)], self.camera_matrix[(1, 2)])
  }

  fn ground_resolution(&self) -> Option<f64> {
    let c = self.principal_point();
    let a = self.image_to_world(c, 0.)?;
    let b = self.image_to_world(c + Vector2d::new(1., 0.), 0.)?;
    Some((a - b).norm())
  }

  fn distort(&self, p: Vector2d, compute_derivative: bool) -> (Vector2d, Option<Matrix2d>) {
    if self.distortion_coefficients.is_empty() {
      return (p, if compute_derivative { Some(Matrix2d::identity()) } else { None });
    }
    let c = &self.distortion_coefficients;
    let x = p[0];
    let y = p[1];
    let r2 = x * x + y * y;
    let theta = 1. + r2 * (c[0] + r2 * (c[1] + r2 * c[2]));
    let dtheta = c[0] + r2 * (c[1] * 2. + r2 * c[2] * 3.);
    let dp = if compute_derivative {
      Some(Matrix2d::new(
        theta + x * dtheta * 2. * x, x * dtheta * 2. * y,
        y * dtheta * 2. * x, theta + y * dtheta * 2. * y
      ))
    }
    else {
      None
    };
    (Vector2d::new(x * theta, y * theta), dp)
  }

  fn undistort(&self, dist: Vector2d) -> Option<Vector2d> {
    if self.distortion_coefficients.is_empty() { return Some(dist) }
    let mut point = dist;
    for _ in 0..UNDISTORT_MAX_ITERATIONS {
      let (p, dp) = self.distort(point, true);
      let delta = dp?.try_inverse()? * (dist - p);
      point += delta;
      if delta.norm() < UNDISTORT_CONVERGENCE_THRESHOLD { break }
    }
    Some(point)
  }

  // Unit ray in camera coordinates.
  pub fn pixel_to_ray(&self, pixel: Vector2d) -> Option<Vector3d> {
    let dist = Vector2d::new(
      (pixel[0] - self.camera_matrix[(0, 2)]) / self.camera_matrix[(0, 0)],
      (pixel[1] - self.camera_matrix[(1, 2)]) / self.camera_matrix[(1, 1)],
    );
    let p = self.undistort(dist)?;
    Some(Vector3d::new(p[0], p[1], 1.).normalize())
  }

  pub fn ray_to_pixel(&self, ray: Vector3d) -> Option<Vector2d> {
    if ray[2] <= 0. { return None }
    let iz = 1. / ray[2];
    let (dist, _) = self.distort(iz * Vector2d::new(ray[0], ray[1]), false);
    let pixel = self.camera_matrix * Vector3d::new(dist[0], dist[1], 1.);
    Some(Vector2d::new(pixel[0], pixel[1]))
  }
}

impl Projector for PinholeProjector {
  fn image_to_world(&self, pixel: Vector2d, height: f64) -> Option<Vector3d> {
    let direction = self.rotation.transpose() * self.pixel_to_ray(pixel)?;
    if direction[2].abs() < MIN_RAY_SLOPE { return None }
    let s = (height - self.camera_center[2]) / direction[2];
    if s <= 0. { return None }
    Some(self.camera_center + s * direction)
  }

  fn world_to_image(&self, point: Vector3d) -> Option<Vector2d> {
    self.ray_to_pixel(transform_3d(&self.rotation, &self.translation, &point))
  }

  fn cm_per_pixel(&self) -> f64 {
    self.cm_per_pixel
  }

  fn altitude(&self) -> f64 {
    self.camera_center[2]
  }

  fn calibration_generation(&self) -> u64 {
    self.generation
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn nadir(distortion: Vec<f64>) -> PinholeProjector {
    let k = Matrix3d::new(
      1000., 0., 640.,
      0., 1000., 360.,
      0., 0., 1.,
    );
    let rotation = to_rotation_matrix(Vector3d::new(std::f64::consts::PI, 0., 0.));
    PinholeProjector::new(k, distortion, rotation, Vector3d::new(0., 0., 500.), 1).unwrap()
  }

  #[test]
  fn test_nadir_geometry() {
    let camera = nadir(vec![]);
    assert!((camera.altitude() - 500.).abs() < 1e-9);
    assert!((camera.cm_per_pixel() - 0.5).abs() < 1e-6);
    let ground = camera.image_to_world(Vector2d::new(640., 360.), 0.).unwrap();
    assert!(ground.norm() < 1e-9);
  }

  #[test]
  fn test_roundtrip() {
    let p0 = Vector3d::new(50., 20., 170.);
    let camera = nadir(vec![]);
    let pixel = camera.world_to_image(p0).unwrap();
    assert!((pixel - Vector2d::new(640. + 1000. * 50. / 330., 360. - 1000. * 20. / 330.)).norm() < 1e-6);
    let p = camera.image_to_world(pixel, 170.).unwrap();
    assert!((p - p0).norm() < 1e-6);

    let camera = nadir(vec![-0.28340811, 0.07395907, 0.00019359]);
    let pixel = camera.world_to_image(p0).unwrap();
    let p = camera.image_to_world(pixel, 170.).unwrap();
    assert!((p - p0).norm() < 1e-3);
  }

  #[test]
  fn test_plane_above_camera() {
    let camera = nadir(vec![]);
    assert!(camera.image_to_world(Vector2d::new(640., 360.), 600.).is_none());
    assert!(camera.world_to_image(Vector3d::new(0., 0., 700.)).is_none());
  }

  #[test]
  fn test_rejects_bad_distortion() {
    let r = PinholeProjector::new(Matrix3d::identity(), vec![0.1], Matrix3d::identity(), Vector3d::zeros(), 0);
    assert!(r.is_err());
  }
}
