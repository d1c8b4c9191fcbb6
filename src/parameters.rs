use crate::all::*;

use clap::Parser;

// Defaults live in the clap attributes. `Default` and the JSON loader both go through
// them so there is a single place to change a value.
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[derive(clap::Parser)]
#[serde(default)]
pub struct ParameterSet {
  // Person storage, pixels.
  #[clap(long, default_value = "15")]
  pub match_radius: f64,
  #[clap(long, default_value = "40")]
  pub extend_radius: f64,
  #[clap(long, default_value = "10")]
  pub select_radius: f64,
  #[clap(long, default_value = "1.5")]
  pub multicolor_match_scale: f64,

  // Quality of a point confirmed by recognition.
  #[clap(long, default_value = "100")]
  pub confirmed_quality: f64,
  #[clap(long, default_value = "0.8")]
  pub purge_ratio: f64,
  #[clap(long, default_value = "10")]
  pub purge_min_points: usize,
  #[clap(long)]
  pub purge_after_recognition: bool,

  // Euclidean distance in RGB space.
  #[clap(long, default_value = "60")]
  pub color_outlier_distance: f64,
  #[clap(long, default_value = "0")]
  pub color_seed: u64,

  // Heights, centimeters.
  #[clap(long, default_value = "176.5")]
  pub default_height: f64,
  #[clap(long, default_value = "50")]
  pub min_height: f64,

  // Tracking search window.
  #[clap(long, default_value = "3")]
  pub track_region_levels: usize,
  #[clap(long, default_value = "16")]
  pub track_region_scale: f64,

  // Frame pipeline.
  #[clap(long, default_value = "1")]
  pub reco_step: usize,
  #[clap(long)]
  pub skip_back_track: bool,
  #[clap(long, default_value = "5")]
  pub back_track_offset: usize,
  #[clap(long)]
  pub skip_color_optimization: bool,

  // Frame window for selecting trajectories by position.
  #[clap(long, default_value = "15")]
  pub show_before: usize,
  #[clap(long, default_value = "15")]
  pub show_after: usize,
}

impl Default for ParameterSet {
  fn default() -> ParameterSet {
    ParameterSet::parse_from(["pedtrack"])
  }
}

fn invalid(name: &'static str, reason: &str) -> anyhow::Error {
  TrackError::InvalidParameter { name, reason: reason.to_string() }.into()
}

impl ParameterSet {
  pub fn load(path: &Path) -> Result<ParameterSet> {
    let s = std::fs::read_to_string(path)
      .context(format!("Failed to read file {}.", path.display()))?;
    let p: ParameterSet = serde_json::from_str(&s)
      .context(format!("Failed to parse {}.", path.display()))?;
    p.validate()?;
    Ok(p)
  }

  pub fn validate(&self) -> Result<()> {
    for (name, v) in [
      ("match_radius", self.match_radius),
      ("extend_radius", self.extend_radius),
      ("select_radius", self.select_radius),
      ("multicolor_match_scale", self.multicolor_match_scale),
      ("default_height", self.default_height),
      ("track_region_scale", self.track_region_scale),
    ] {
      if !(v > 0.) { return Err(invalid(name, "must be positive")) }
    }
    if !(0. ..= 1.).contains(&self.purge_ratio) {
      return Err(invalid("purge_ratio", "must be within [0, 1]"));
    }
    if !(self.confirmed_quality > 0. && self.confirmed_quality <= MAX_QUALITY) {
      return Err(invalid("confirmed_quality", "must be within (0, 100]"));
    }
    if self.reco_step == 0 {
      return Err(invalid("reco_step", "must be at least 1"));
    }
    if self.min_height < 0. || self.min_height >= self.default_height {
      return Err(invalid("min_height", "must be within [0, default_height)"));
    }
    Ok(())
  }
}
