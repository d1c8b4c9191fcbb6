use crate::all::*;

use chrono::{DateTime, Utc};

pub struct ExportOptions {
  pub caption: String,
  pub fps: f64,
  pub first_frame_time: DateTime<Utc>,
  pub trc_version: u32,
  // Real-world text in meters instead of centimeters.
  pub use_meter: bool,
  // Camera altitude turning stored depths back into heights above ground.
  pub altitude: Option<f64>,
}

impl Default for ExportOptions {
  fn default() -> ExportOptions {
    ExportOptions {
      caption: String::new(),
      fps: 25.,
      first_frame_time: DateTime::<Utc>::from(std::time::UNIX_EPOCH),
      trc_version: TRC_VERSION,
      use_meter: false,
      altitude: None,
    }
  }
}

fn or_nan(v: Option<f64>) -> f64 {
  v.unwrap_or(f64::NAN)
}

// Columnar form for plotting tools: one blank-line separated block per person.
pub fn write_dat<W: Write>(w: &mut W, persons: &[TrackPerson]) -> Result<()> {
  writeln!(w, "# frame x y quality wx wy height")?;
  for person in persons {
    writeln!(w)?;
    writeln!(w, "# person {}", person.id)?;
    let height = or_nan(person.height());
    for (frame, p) in person.frames() {
      writeln!(w, "{} {:.2} {:.2} {:.0} {:.2} {:.2} {:.2}",
        frame,
        p.pixel[0],
        p.pixel[1],
        p.quality,
        or_nan(p.world.map(|v| v[0])),
        or_nan(p.world.map(|v| v[1])),
        height,
      )?;
    }
  }
  Ok(())
}

fn escape_xml(s: &str) -> String {
  let mut out = String::with_capacity(s.len());
  for c in s.chars() {
    match c {
      '&' => out.push_str("&amp;"),
      '<' => out.push_str("&lt;"),
      '>' => out.push_str("&gt;"),
      '"' => out.push_str("&quot;"),
      '\'' => out.push_str("&apos;"),
      _ => out.push(c),
    }
  }
  out
}

// Frame-major XML document with ground positions in meters. Points without a
// real-world coordinate are left out.
pub fn write_xml<W: Write>(w: &mut W, persons: &[TrackPerson], options: &ExportOptions) -> Result<()> {
  let t = &options.first_frame_time;
  writeln!(w, "<?xml version=\"1.0\" encoding=\"UTF-8\"?>")?;
  writeln!(w, "<trajectoriesDataset>")?;
  writeln!(w, "    <header version=\"1.0\">")?;
  writeln!(w, "        <roomCaption>{}</roomCaption>", escape_xml(&options.caption))?;
  writeln!(w, "        <roomID>0</roomID>")?;
  writeln!(w, "        <agents>{}</agents>", persons.len())?;
  writeln!(w, "        <frameRate>{}</frameRate> <!--per second-->", options.fps)?;
  writeln!(w, "        <timeFirstFrame sec=\"{}\" microsec=\"{}\"/> <!-- {} -->",
    t.timestamp(),
    t.timestamp_subsec_micros(),
    t.format("%Y-%m-%d %H:%M:%S%.3f"),
  )?;
  writeln!(w, "    </header>")?;
  writeln!(w)?;

  let (Some(first), Some(last)) = (
    persons.iter().map(|p| p.first_frame()).min(),
    persons.iter().map(|p| p.last_frame()).max(),
  ) else {
    writeln!(w, "</trajectoriesDataset>")?;
    return Ok(());
  };
  for frame in first..=last {
    let agents: Vec<(PersonId, Vector3d, Option<f64>)> = persons.iter()
      .filter_map(|p| {
        let world = p.point_at(frame)?.world?;
        Some((p.id, world, p.height()))
      })
      .collect();
    if agents.is_empty() { continue }
    writeln!(w, "    <frame ID=\"{}\">", frame)?;
    for (id, world, height) in agents {
      write!(w, "        <agent ID=\"{}\" x=\"{:.4}\" y=\"{:.4}\"", id, world[0] / 100., world[1] / 100.)?;
      if let Some(h) = height { write!(w, " z=\"{:.4}\"", h / 100.)? }
      writeln!(w, "/>")?;
    }
    writeln!(w, "    </frame>")?;
  }
  writeln!(w, "</trajectoriesDataset>")?;
  Ok(())
}

// Real-world trajectories as `id frame x y z` rows, z being the height above ground,
// readable by `read_legacy`. Without an altitude the person's height stands in for z.
// Points lacking a real-world coordinate or any height are left out.
pub fn write_txt<W: Write>(w: &mut W, persons: &[TrackPerson], options: &ExportOptions) -> Result<()> {
  let (scale, unit, precision): (f64, &str, usize) = if options.use_meter { (0.01, "m", 4) } else { (1., "cm", 2) };
  writeln!(w, "# framerate: {} fps", options.fps)?;
  if persons.iter().any(|p| !p.comment.is_empty()) {
    writeln!(w, "# personal information:")?;
    writeln!(w, "# ID| Comment")?;
    for person in persons {
      let mut lines = person.comment.lines();
      writeln!(w, "#{:>3}|{}", person.id.0, lines.next().unwrap_or(""))?;
      for line in lines {
        writeln!(w, "#   |{}", line)?;
      }
    }
  }
  // Last header line, decides the unit on import.
  writeln!(w, "# id frame x/{} y/{} z/{}", unit, unit, unit)?;
  let mut skipped = 0;
  for person in persons {
    for (frame, p) in person.frames() {
      let height = match (p.world, options.altitude) {
        (Some(world), Some(altitude)) => Some(altitude - world[2]),
        (Some(_), None) => person.height(),
        (None, _) => None,
      };
      let (Some(world), Some(height)) = (p.world, height) else {
        skipped += 1;
        continue;
      };
      writeln!(w, "{} {} {:.*} {:.*} {:.*}",
        person.id,
        frame,
        precision, world[0] * scale,
        precision, world[1] * scale,
        precision, height * scale,
      )?;
    }
  }
  if skipped > 0 {
    debug!("{} points without a real-world position left out.", skipped);
  }
  Ok(())
}

fn export_one(persons: &[TrackPerson], path: &Path, kind: &str, options: &ExportOptions) -> Result<()> {
  info!("Exporting {} persons to {}.", persons.len(), path.display());
  write_atomically(path, |w| match kind {
    "trc" => write_trajectories(w, persons, options.trc_version),
    "dat" => write_dat(w, persons),
    "txt" => write_txt(w, persons, options),
    _ => write_xml(w, persons, options),
  })
}

// Picks the format from the extension. Without an extension both the trajectory file
// and the real-world text are written. Returns the written paths.
pub fn export_trajectories(persons: &[TrackPerson], path: &Path, options: &ExportOptions) -> Result<Vec<PathBuf>> {
  let extension = path.extension().and_then(|e| e.to_str()).map(|e| e.to_ascii_lowercase());
  let kinds: &[&str] = match extension.as_deref() {
    None => &["trc", "txt"],
    Some("trc") => &["trc"],
    Some("txt") => &["txt"],
    Some("dat") => &["dat"],
    Some("xml") => &["xml"],
    Some(e) => bail!("Unknown export format .{} for {}.", e, path.display()),
  };
  let mut written = vec![];
  for kind in kinds {
    let target = if extension.is_none() { path.with_extension(kind) } else { path.to_path_buf() };
    export_one(persons, &target, kind, options)?;
    written.push(target);
  }
  Ok(written)
}

#[cfg(test)]
mod tests {
  use super::*;

  fn sample() -> Vec<TrackPerson> {
    let mut a = TrackPerson::new(PersonId(1), 2, TrackPoint::new(Vector2d::new(1., 2.), 100.));
    a.append(TrackPoint::new(Vector2d::new(3., 4.), 50.));
    a.point_at_mut(2).unwrap().world = Some(Vector3d::new(120., -40., 320.));
    a.set_height(180.);
    let b = TrackPerson::new(PersonId(2), 3, TrackPoint::new(Vector2d::new(5., 6.), 70.));
    vec![a, b]
  }

  #[test]
  fn test_dat() {
    let mut out = vec![];
    write_dat(&mut out, &sample()).unwrap();
    let s = String::from_utf8(out).unwrap();
    let lines: Vec<&str> = s.lines().collect();
    assert_eq!(lines[2], "# person 1");
    assert_eq!(lines[3], "2 1.00 2.00 100 120.00 -40.00 180.00");
    assert_eq!(lines[4], "3 3.00 4.00 50 NaN NaN 180.00");
    assert_eq!(lines[5], "");
    assert_eq!(lines[7], "3 5.00 6.00 70 NaN NaN NaN");
  }

  #[test]
  fn test_xml() {
    let options = ExportOptions {
      caption: "Hall <A>".to_string(),
      fps: 16.,
      first_frame_time: DateTime::<Utc>::from(std::time::UNIX_EPOCH + std::time::Duration::from_micros(1_500_250)),
      ..ExportOptions::default()
    };
    let mut out = vec![];
    write_xml(&mut out, &sample(), &options).unwrap();
    let s = String::from_utf8(out).unwrap();
    assert!(s.contains("<roomCaption>Hall &lt;A&gt;</roomCaption>"));
    assert!(s.contains("<agents>2</agents>"));
    assert!(s.contains("<timeFirstFrame sec=\"1\" microsec=\"500250\"/> <!-- 1970-01-01 00:00:01.500 -->"));
    assert!(s.contains("<frame ID=\"2\">\n        <agent ID=\"1\" x=\"1.2000\" y=\"-0.4000\" z=\"1.8000\"/>\n    </frame>"));
    // No world coordinates at frame 3.
    assert!(!s.contains("<frame ID=\"3\">"));
    assert!(s.trim_end().ends_with("</trajectoriesDataset>"));
  }

  #[test]
  fn test_txt_reads_back() {
    let mut persons = sample();
    persons[0].comment = "red jacket\nslow".to_string();
    let options = ExportOptions { altitude: Some(500.), ..ExportOptions::default() };
    let mut out = vec![];
    write_txt(&mut out, &persons, &options).unwrap();
    let s = String::from_utf8(out).unwrap();
    assert!(s.starts_with("# framerate: 25 fps\n"));
    assert!(s.contains("#  1|red jacket\n#   |slow\n"));
    assert!(s.contains("\n1 2 120.00 -40.00 180.00\n"));
    let data = read_legacy(s.as_bytes()).unwrap();
    assert_eq!(data.len(), 1);
    assert_eq!(data[&1].len(), 1);
    assert_eq!(data[&1][&2], Vector3d::new(120., -40., 180.));

    let options = ExportOptions { use_meter: true, ..ExportOptions::default() };
    let mut out = vec![];
    write_txt(&mut out, &persons, &options).unwrap();
    let data = read_legacy(out.as_slice()).unwrap();
    assert!((data[&1][&2] - Vector3d::new(120., -40., 180.)).norm() < 1e-9);
  }

  #[test]
  fn test_dispatch() {
    let dir = tempfile::tempdir().unwrap();
    let dir = dir.path();
    let options = ExportOptions::default();
    let written = export_trajectories(&sample(), &dir.join("run"), &options).unwrap();
    assert_eq!(written, vec![dir.join("run.trc"), dir.join("run.txt")]);
    let t = load_trajectories(&written[0]).unwrap();
    assert_eq!(t.version, TRC_VERSION);
    assert_eq!(t.persons.len(), 2);
    let data = read_legacy(BufReader::new(File::open(&written[1]).unwrap())).unwrap();
    assert_eq!(data[&1][&2], Vector3d::new(120., -40., 180.));
    assert_eq!(export_trajectories(&sample(), &dir.join("run.dat"), &options).unwrap(), vec![dir.join("run.dat")]);
    assert!(export_trajectories(&sample(), &dir.join("run.csv"), &options).is_err());
  }
}
