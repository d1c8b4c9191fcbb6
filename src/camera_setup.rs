use crate::all::*;

use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Deserialize)]
#[allow(non_snake_case)]
pub struct CameraSetup {
  pub focalLengthX: f64,
  pub focalLengthY: f64,
  pub principalPointX: f64,
  pub principalPointY: f64,
  #[serde(default)]
  pub distortionCoefficients: Vec<f64>,
  // Rodrigues vector, world to camera.
  pub rotation: [f64; 3],
  // Centimeters, world to camera.
  pub translation: [f64; 3],
}

const MAX_PARENT_DIRECTORY_HEIGHT: usize = 1;
const SETUP_FILE_NAME: &'static str = "calibration.json";

// Every loaded calibration gets its own generation so cached head sizes notice the change.
static NEXT_GENERATION: AtomicU64 = AtomicU64::new(1);

impl PinholeProjector {
  pub fn load(path: &Path) -> Result<PinholeProjector> {
    let mut dir = Some(path);
    for _ in 0..(MAX_PARENT_DIRECTORY_HEIGHT + 1) {
      let Some(d) = dir else { break };
      let setup_path = d.join(SETUP_FILE_NAME);
      if setup_path.exists() {
        return parse_setup(&setup_path);
      }
      dir = d.parent();
    }
    bail!("Failed to find a {} in {} or its parent.", SETUP_FILE_NAME, path.display());
  }
}

fn parse_setup(path: &Path) -> Result<PinholeProjector> {
  let s = std::fs::read_to_string(path)
    .context(format!("Failed to read file {}.", path.display()))?;
  let setup: CameraSetup = serde_json::from_str(&s)
    .context(format!("Failed to parse {}.", path.display()))?;
  convert_setup(setup)
    .context(format!("Invalid calibration in {}.", path.display()))
}

pub fn convert_setup(d: CameraSetup) -> Result<PinholeProjector> {
  let camera_matrix = Matrix3d::new(
    d.focalLengthX, 0., d.principalPointX,
    0., d.focalLengthY, d.principalPointY,
    0., 0., 1.
  );
  let generation = NEXT_GENERATION.fetch_add(1, Ordering::Relaxed);
  let projector = PinholeProjector::new(
    camera_matrix,
    d.distortionCoefficients,
    to_rotation_matrix(Vector3d::from(d.rotation)),
    Vector3d::from(d.translation),
    generation,
  )?;
  info!("Loaded calibration, camera altitude {:.1} cm, {:.3} cm per pixel.",
    projector.altitude(), projector.cm_per_pixel());
  Ok(projector)
}
