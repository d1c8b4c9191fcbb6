use pedtrack::all::*;
use pedtrack::util;

use clap::Parser;

// Imports trajectory files, optionally recomputes real-world positions and heights, and
// exports the merged result.
#[derive(Parser)]
struct Args {
  // `.trc` trajectory files or legacy `.txt` real-world trajectories.
  #[clap(required = true)]
  inputs: Vec<String>,
  // `.trc`, `.txt`, `.dat` or `.xml`. Without an extension both `.trc` and `.txt` are written.
  #[clap(short, long)]
  output: Vec<String>,
  // Folder holding `calibration.json`, or a subfolder of it.
  #[clap(long)]
  calibration: Option<String>,
  // JSON file replacing the parameters given on the command line.
  #[clap(long)]
  parameters: Option<String>,
  #[clap(long)]
  recalc_height: bool,
  #[clap(long, default_value = "25")]
  fps: f64,
  // Unix time of the first frame, seconds.
  #[clap(long, default_value = "0")]
  start_time: f64,
  #[clap(long, default_value = "")]
  caption: String,
  #[clap(long, default_value = "4")]
  trc_version: u32,
  // Write `.txt` positions in meters.
  #[clap(long)]
  meter: bool,
  #[clap(short, long)]
  verbose: bool,
  #[clap(flatten)]
  params: ParameterSet,
}

fn handle_error(err: &anyhow::Error) {
  for (i, e) in err.chain().enumerate() {
    println!("  {}: {}", i + 1, e);
  }
}

fn main() {
  if let Err(err) = run() {
    error!("Failed.");
    handle_error(&err);
    std::process::exit(1);
  }
}

fn import(storage: &mut PersonStorage, path: &Path, projector: Option<&PinholeProjector>) -> Result<()> {
  let extension = path.extension().and_then(|e| e.to_str()).map(|e| e.to_ascii_lowercase());
  match extension.as_deref() {
    Some("trc") => {
      let version = import_trajectories(storage, path)?;
      if version < TRC_VERSION {
        info!("{} uses version {}, exports are written as version {}.", path.display(), version, TRC_VERSION);
      }
    },
    Some("txt") => {
      let Some(projector) = projector else {
        bail!("Importing {} needs a calibration, see --calibration.", path.display());
      };
      import_legacy(storage, path, projector)?;
    },
    _ => bail!("Unknown trajectory format: {}.", path.display()),
  }
  Ok(())
}

fn first_frame_time(seconds: f64) -> Result<chrono::DateTime<chrono::Utc>> {
  if !seconds.is_finite() || seconds < 0. {
    bail!("Invalid start time {}.", seconds);
  }
  let t = std::time::UNIX_EPOCH + std::time::Duration::from_secs_f64(seconds);
  Ok(chrono::DateTime::<chrono::Utc>::from(t))
}

fn run() -> Result<()> {
  let args = Args::parse();

  env_logger::Builder::new()
    .filter_level(if args.verbose { LevelFilter::Debug } else { LevelFilter::Info })
    .format(util::format_log)
    .init();

  let params = match &args.parameters {
    Some(path) => ParameterSet::load(Path::new(path))?,
    None => {
      args.params.validate()?;
      args.params.clone()
    },
  };
  let projector = match &args.calibration {
    Some(folder) => Some(PinholeProjector::load(Path::new(folder))?),
    None => None,
  };

  let mut storage = PersonStorage::new(&params);
  for input in &args.inputs {
    import(&mut storage, Path::new(input), projector.as_ref())?;
  }
  info!("{} persons in total.", storage.len());

  if let Some(projector) = &projector {
    if let (Some(first), Some(last)) = (storage.smallest_first_frame(), storage.largest_last_frame()) {
      let mut unresolved = 0;
      for frame in first..=last {
        unresolved += storage.calc_world_positions(frame, projector);
      }
      if unresolved > 0 {
        warn!("{} points have no real-world position.", unresolved);
      }
    }
  }
  if args.recalc_height {
    let Some(projector) = &projector else {
      bail!("Recalculating heights needs a calibration, see --calibration.");
    };
    storage.recalc_height(projector.altitude());
  }

  let options = ExportOptions {
    caption: args.caption.clone(),
    fps: args.fps,
    first_frame_time: first_frame_time(args.start_time)?,
    trc_version: args.trc_version,
    use_meter: args.meter,
    altitude: projector.as_ref().map(|p| p.altitude()),
  };
  for output in &args.output {
    for path in export_trajectories(storage.persons(), Path::new(output), &options)? {
      info!("Wrote {}.", path.display());
    }
  }
  Ok(())
}
