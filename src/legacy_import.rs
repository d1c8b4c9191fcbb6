// Plain `personId frameId x y z` real-world trajectories. Header lines start with `#`;
// positions are centimeters when a header mentions `cm` and meters otherwise.

use crate::all::*;

// Quality given to imported points.
const IMPORT_QUALITY: f64 = 100.;

pub type LegacyData = BTreeMap<i64, BTreeMap<Frame, Vector3d>>;

pub fn read_legacy<R: BufRead>(reader: R) -> Result<LegacyData> {
  let mut data = LegacyData::new();
  let mut header = String::new();
  let mut scale = None;
  for (i, line) in reader.lines().enumerate() {
    let line = line?;
    let line = line.trim();
    if line.starts_with('#') {
      header = line.to_string();
      continue;
    }
    if line.is_empty() { continue }
    // The unit is decided by the header directly above the first record.
    let scale = *scale.get_or_insert_with(|| {
      if header.contains("cm") { 1. }
      else {
        warn!("No header with [cm] found, reading positions as meters.");
        100.
      }
    });
    let fields: Vec<&str> = line.split_whitespace().collect();
    if fields.len() < 5 {
      bail!(TrackError::Format(format!("line {}: expected `personId frameId x y z`", i + 1)));
    }
    let bad = |s: &str| TrackError::Format(format!("line {}: cannot parse `{}`", i + 1, s));
    let person: i64 = fields[0].parse().map_err(|_| bad(fields[0]))?;
    let frame: Frame = fields[1].parse().map_err(|_| bad(fields[1]))?;
    let mut p = Vector3d::zeros();
    for k in 0..3 {
      p[k] = fields[2 + k].parse::<f64>().map_err(|_| bad(fields[2 + k]))? * scale;
    }
    let frames = data.entry(person).or_default();
    if frames.insert(frame, p).is_some() {
      bail!(TrackError::DuplicateFrame { person, frame });
    }
  }
  Ok(data)
}

// Consecutive runs of frames.
fn contiguous_runs(frames: &BTreeMap<Frame, Vector3d>) -> Vec<Vec<(Frame, Vector3d)>> {
  let mut runs: Vec<Vec<(Frame, Vector3d)>> = vec![];
  for (&frame, &p) in frames {
    match runs.last_mut() {
      Some(run) if run.last().map(|(f, _)| f + 1) == Some(frame) => run.push((frame, p)),
      _ => runs.push(vec![(frame, p)]),
    }
  }
  runs
}

// Projects every record into the image. A person with missing frames becomes one person
// per contiguous run; only the first run keeps the file id.
pub fn legacy_persons(data: &LegacyData, projector: &dyn Projector) -> Result<Vec<TrackPerson>> {
  let altitude = projector.altitude();
  let mut persons = vec![];
  for (&id, frames) in data {
    let runs = contiguous_runs(frames);
    if runs.len() > 1 {
      warn!("Person {} has {} gaps, imported as separate trajectories.", id, runs.len() - 1);
    }
    for (k, run) in runs.into_iter().enumerate() {
      let first_frame = run[0].0;
      let height = run[0].1[2];
      let mut points = Vec::with_capacity(run.len());
      for (frame, p) in run {
        let pixel = projector.world_to_image(p).ok_or_else(|| {
          TrackError::ProjectionUnavailable(format!("person {} at frame {}", id, frame))
        })?;
        let mut point = TrackPoint::new(pixel, IMPORT_QUALITY);
        point.set_measured_world(Vector3d::new(p[0], p[1], altitude - p[2]));
        points.push(point);
      }
      let person_id = if k == 0 && id > 0 { PersonId(id as usize) } else { PersonId(0) };
      if let Some(mut person) = TrackPerson::from_points(person_id, first_frame, points) {
        person.set_height(height);
        persons.push(person);
      }
    }
  }
  Ok(persons)
}

// Nothing is added to `storage` unless the whole file converts. Returns the number of
// imported persons.
pub fn import_legacy(storage: &mut PersonStorage, path: &Path, projector: &dyn Projector) -> Result<usize> {
  let file = File::open(path).context(format!("Failed to open file {}.", path.display()))?;
  let data = read_legacy(BufReader::new(file))
    .context(format!("Failed to read trajectories from {}.", path.display()))?;
  let persons = legacy_persons(&data, projector)
    .context(format!("Failed to convert trajectories from {}.", path.display()))?;
  let n = persons.len();
  for person in persons {
    storage.add_person(person);
  }
  info!("Imported {} persons from {}.", n, path.display());
  Ok(n)
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::projector::tests::NadirProjector;

  fn projector() -> NadirProjector {
    NadirProjector { altitude: 500., scale: 1., generation: 0 }
  }

  #[test]
  fn test_units() {
    let cm = read_legacy("# id frame x/cm y/cm z/cm\n1 0 10 20 180\n".as_bytes()).unwrap();
    assert_eq!(cm[&1][&0], Vector3d::new(10., 20., 180.));
    let m = read_legacy("# id frame x y z\n1 0 0.1 0.2 1.8\n".as_bytes()).unwrap();
    assert!((m[&1][&0] - Vector3d::new(10., 20., 180.)).norm() < 1e-9);
  }

  #[test]
  fn test_duplicate_frame() {
    let err = read_legacy("# cm\n1 4 0 0 180\n2 4 0 0 170\n1 4 5 5 180\n".as_bytes()).unwrap_err();
    assert_eq!(err.downcast::<TrackError>().unwrap(), TrackError::DuplicateFrame { person: 1, frame: 4 });
  }

  #[test]
  fn test_convert() {
    let data = read_legacy("# cm\n7 3 32 0 180\n7 4 64 0 180\n".as_bytes()).unwrap();
    let persons = legacy_persons(&data, &projector()).unwrap();
    assert_eq!(persons.len(), 1);
    let p = &persons[0];
    assert_eq!(p.id, PersonId(7));
    assert_eq!((p.first_frame(), p.last_frame()), (3, 4));
    assert_eq!(p.height(), Some(180.));
    let a = p.point_at(3).unwrap();
    // 0.64 cm per pixel at 180 cm above ground.
    assert!((a.pixel - Vector2d::new(50., 0.)).norm() < 1e-9);
    assert_eq!(a.world, Some(Vector3d::new(32., 0., 320.)));
    assert!(a.depth_measured);
    assert_eq!(a.quality, 100.);
  }

  #[test]
  fn test_gaps_split_person() {
    let data = read_legacy("# cm\n2 0 0 0 170\n2 1 0 0 170\n2 5 0 0 170\n".as_bytes()).unwrap();
    let persons = legacy_persons(&data, &projector()).unwrap();
    assert_eq!(persons.len(), 2);
    assert_eq!(persons[0].id, PersonId(2));
    assert_eq!(persons[0].len(), 2);
    assert_eq!(persons[1].first_frame(), 5);

    let mut storage = PersonStorage::new(&ParameterSet::default());
    for p in persons {
      storage.add_person(p);
    }
    assert_eq!(storage.persons()[1].id, PersonId(3));
  }

  #[test]
  fn test_unprojectable_point() {
    let data = read_legacy("# cm\n1 0 0 0 600\n".as_bytes()).unwrap();
    let err = legacy_persons(&data, &projector()).unwrap_err();
    assert!(matches!(err.downcast::<TrackError>().unwrap(), TrackError::ProjectionUnavailable(_)));
  }
}
