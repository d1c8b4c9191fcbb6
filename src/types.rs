// Eigen-like aliases.
pub type Vector2d = nalgebra::Vector2::<f64>;
pub type Vector3d = nalgebra::Vector3::<f64>;
pub type Matrix2d = nalgebra::Matrix2::<f64>;
pub type Matrix3d = nalgebra::Matrix3::<f64>;

pub type Frame = usize;

// Axis-aligned region in pixels, used for region-of-interest deletes.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Rect {
  pub min: Vector2d,
  pub max: Vector2d,
}

impl Rect {
  pub fn new(x: f64, y: f64, width: f64, height: f64) -> Rect {
    Rect {
      min: Vector2d::new(x, y),
      max: Vector2d::new(x + width, y + height),
    }
  }

  pub fn contains(&self, p: &Vector2d) -> bool {
    p[0] >= self.min[0] && p[0] <= self.max[0] && p[1] >= self.min[1] && p[1] <= self.max[1]
  }
}
