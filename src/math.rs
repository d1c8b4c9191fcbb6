use crate::all::*;

pub fn distance(a: &Vector2d, b: &Vector2d) -> f64 {
  (a - b).norm()
}

// Rodrigues vector (axis scaled by angle) to rotation matrix.
pub fn to_rotation_matrix(r: Vector3d) -> Matrix3d {
  *nalgebra::Rotation3::new(r).matrix()
}

pub fn transform_3d(rotation: &Matrix3d, translation: &Vector3d, x: &Vector3d) -> Vector3d {
  rotation * x + translation
}
