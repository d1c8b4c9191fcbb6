// Versioned plain text exchange format for trajectories.
//
// Line 1 is `version N`, or a bare person count for the oldest files. Each person has a
// header line, from version 3 on a comment line, and one line per frame.

use crate::all::*;

pub const TRC_VERSION: u32 = 4;
const COMMENT_NEWLINE: &str = "<br>";

pub struct TrajectoryFile {
  pub version: u32,
  pub persons: Vec<TrackPerson>,
}

fn format_error(line: usize, what: impl std::fmt::Display) -> anyhow::Error {
  TrackError::Format(format!("line {}: {}", line, what)).into()
}

struct LineReader<R> {
  lines: std::io::Lines<R>,
  number: usize,
}

impl<R: BufRead> LineReader<R> {
  fn next_line(&mut self) -> Result<String> {
    self.number += 1;
    match self.lines.next() {
      Some(line) => Ok(line?),
      None => Err(format_error(self.number, "unexpected end of file")),
    }
  }

  fn next_fields(&mut self) -> Result<Fields> {
    loop {
      let line = self.next_line()?;
      if line.trim().is_empty() { continue }
      return Ok(Fields {
        values: line.split_whitespace().map(|s| s.to_string()).collect(),
        line: self.number,
        next: 0,
      });
    }
  }
}

struct Fields {
  values: Vec<String>,
  line: usize,
  next: usize,
}

impl Fields {
  fn expect_len(&self, n: usize) -> Result<()> {
    if self.values.len() != n {
      return Err(format_error(self.line, format!("expected {} fields, got {}", n, self.values.len())));
    }
    Ok(())
  }

  fn parse<T: std::str::FromStr>(&mut self) -> Result<T> {
    let value = self.values.get(self.next)
      .ok_or_else(|| format_error(self.line, "missing field"))?;
    self.next += 1;
    value.parse().map_err(|_| format_error(self.line, format!("cannot parse `{}`", value)))
  }

  // `-1 -1 -1` means no color.
  fn parse_color(&mut self) -> Result<Option<Color>> {
    let rgb: [i32; 3] = [self.parse()?, self.parse()?, self.parse()?];
    if rgb.iter().all(|c| *c < 0) { return Ok(None) }
    let c = |v: i32| v.clamp(0, 255) as u8;
    Ok(Some(Color::new(c(rgb[0]), c(rgb[1]), c(rgb[2]))))
  }

  fn parse_marker(&mut self) -> Result<Option<i32>> {
    let id: i32 = self.parse()?;
    Ok(if id < 0 { None } else { Some(id) })
  }
}

fn parse_version(header: &Fields) -> Result<(u32, Option<usize>)> {
  let line = header.line;
  match header.values.as_slice() {
    [keyword, n] if keyword == "version" => {
      let version: u32 = n.parse().map_err(|_| format_error(line, format!("bad version `{}`", n)))?;
      if !(1..=TRC_VERSION).contains(&version) {
        return Err(format_error(line, format!("unsupported version {}", version)));
      }
      Ok((version, None))
    },
    [count] => {
      let count = count.parse().map_err(|_| format_error(line, format!("bad header `{}`", count)))?;
      Ok((1, Some(count)))
    },
    _ => Err(format_error(line, "missing version header")),
  }
}

fn read_point(reader: &mut LineReader<impl BufRead>, version: u32) -> Result<TrackPoint> {
  let mut f = reader.next_fields()?;
  f.expect_len(match version {
    1 => 8,
    2 => 11,
    _ => 12,
  })?;
  let pixel = Vector2d::new(f.parse()?, f.parse()?);
  let world = if version >= 2 {
    let w = Vector3d::new(f.parse()?, f.parse()?, f.parse()?);
    if w[2] < 0. { None } else { Some(w) }
  }
  else {
    None
  };
  let mut point = TrackPoint::new(pixel, f.parse()?);
  if let Some(w) = world { point.set_measured_world(w) }
  let color_point = Vector2d::new(f.parse()?, f.parse()?);
  point.color = f.parse_color()?;
  if point.color.is_some() { point.color_point = Some(color_point) }
  if version >= 3 { point.marker_id = f.parse_marker()? }
  Ok(point)
}

fn read_person(reader: &mut LineReader<impl BufRead>, version: u32) -> Result<TrackPerson> {
  let mut f = reader.next_fields()?;
  f.expect_len(if version >= 4 { 10 } else { 9 })?;
  let line = f.line;
  let id: usize = f.parse()?;
  let height: f64 = f.parse()?;
  let first: Frame = f.parse()?;
  let last: Frame = f.parse()?;
  let color_count: usize = f.parse()?;
  let color = f.parse_color()?;
  let marker_id = if version >= 4 { f.parse_marker()? } else { None };
  let n: usize = f.parse()?;
  if last.checked_sub(first).and_then(|d| d.checked_add(1)) != Some(n) {
    return Err(format_error(line, format!("frames {}..{} do not match {} points", first, last, n)));
  }
  let comment = if version >= 3 {
    reader.next_line()?.trim_end_matches('\r').replace(COMMENT_NEWLINE, "\n")
  }
  else {
    String::new()
  };
  let mut points = vec![];
  for _ in 0..n {
    points.push(read_point(reader, version)?);
  }
  let mut person = TrackPerson::from_points(PersonId(id), first, points)
    .ok_or_else(|| format_error(line, "person without points"))?;
  if height >= 0. { person.set_height(height) }
  person.color = color;
  person.color_count = if color.is_some() { color_count } else { 0 };
  person.marker_id = marker_id;
  person.comment = comment;
  Ok(person)
}

pub fn read_trajectories<R: BufRead>(reader: R) -> Result<TrajectoryFile> {
  let mut reader = LineReader { lines: reader.lines(), number: 0 };
  let header = reader.next_fields()?;
  let (version, count) = parse_version(&header)?;
  let count = match count {
    Some(count) => count,
    None => {
      let mut f = reader.next_fields()?;
      f.expect_len(1)?;
      f.parse()?
    },
  };
  let mut persons = vec![];
  for _ in 0..count {
    persons.push(read_person(&mut reader, version)?);
  }
  Ok(TrajectoryFile { version, persons })
}

fn write_color(w: &mut impl Write, color: &Option<Color>) -> Result<()> {
  match color {
    Some(c) => write!(w, " {} {} {}", c.r, c.g, c.b)?,
    None => write!(w, " -1 -1 -1")?,
  }
  Ok(())
}

pub fn write_trajectories<W: Write>(w: &mut W, persons: &[TrackPerson], version: u32) -> Result<()> {
  if !(1..=TRC_VERSION).contains(&version) {
    bail!(TrackError::Format(format!("cannot write version {}", version)));
  }
  if version == 1 {
    writeln!(w, "{}", persons.len())?;
  }
  else {
    writeln!(w, "version {}", version)?;
    writeln!(w, "{}", persons.len())?;
  }
  for person in persons {
    write!(w, "{} {} {} {} {}",
      person.id,
      person.height().unwrap_or(-1.),
      person.first_frame(),
      person.last_frame(),
      person.color_count,
    )?;
    write_color(w, &person.color)?;
    if version >= 4 { write!(w, " {}", person.marker_id.unwrap_or(-1))? }
    writeln!(w, " {}", person.len())?;
    if version >= 3 {
      writeln!(w, "{}", person.comment.replace("\r\n", "\n").replace('\n', COMMENT_NEWLINE))?;
    }
    for p in person.points() {
      write!(w, "{} {}", p.pixel[0], p.pixel[1])?;
      if version >= 2 {
        // Projected positions are recomputed from the calibration on load.
        let world = p.world.filter(|_| p.depth_measured).unwrap_or(Vector3d::new(0., 0., -1.));
        write!(w, " {} {} {}", world[0], world[1], world[2])?;
      }
      let color_point = p.color_point.unwrap_or(p.pixel);
      write!(w, " {} {} {}", p.quality, color_point[0], color_point[1])?;
      write_color(w, &p.color)?;
      if version >= 3 { write!(w, " {}", p.marker_id.unwrap_or(-1))? }
      writeln!(w)?;
    }
  }
  Ok(())
}

pub fn load_trajectories(path: &Path) -> Result<TrajectoryFile> {
  let file = File::open(path).context(format!("Failed to open file {}.", path.display()))?;
  let t = read_trajectories(BufReader::new(file))
    .context(format!("Failed to read trajectories from {}.", path.display()))?;
  info!("Read {} persons from {} (version {}).", t.persons.len(), path.display(), t.version);
  Ok(t)
}

// Parses the whole file before touching `storage`. Returns the file version.
pub fn import_trajectories(storage: &mut PersonStorage, path: &Path) -> Result<u32> {
  let t = load_trajectories(path)?;
  for person in t.persons {
    storage.add_person(person);
  }
  Ok(t.version)
}

#[cfg(test)]
mod tests {
  use super::*;

  const V4: &str = "version 4
2
1 180.5 3 5 2 10 20 30 7 3
first line<br>second line
10 20 1 2 300 80 11 21 10 20 30 7
11 21 1.5 2.5 310 100 0 0 -1 -1 -1 -1
12 22 0 0 -1 40 0 0 -1 -1 -1 -1
4 -1 0 0 0 -1 -1 -1 -1 1

5 5 0 0 -1 90 0 0 -1 -1 -1 -1
";

  fn parse(s: &str) -> Result<TrajectoryFile> {
    read_trajectories(s.as_bytes())
  }

  #[test]
  fn test_read_v4() {
    let t = parse(V4).unwrap();
    assert_eq!(t.version, 4);
    assert_eq!(t.persons.len(), 2);
    let p = &t.persons[0];
    assert_eq!(p.id, PersonId(1));
    assert_eq!(p.height(), Some(180.5));
    assert_eq!((p.first_frame(), p.last_frame()), (3, 5));
    assert_eq!(p.comment, "first line\nsecond line");
    assert_eq!(p.color, Some(Color::new(10, 20, 30)));
    assert_eq!(p.color_count, 2);
    assert_eq!(p.marker_id, Some(7));
    let a = p.point_at(3).unwrap();
    assert_eq!(a.world, Some(Vector3d::new(1., 2., 300.)));
    assert_eq!(a.color_point, Some(Vector2d::new(11., 21.)));
    assert_eq!(a.marker_id, Some(7));
    assert_eq!(p.point_at(4).unwrap().color, None);
    assert_eq!(p.point_at(5).unwrap().world, None);

    let q = &t.persons[1];
    assert_eq!(q.height(), None);
    assert_eq!(q.comment, "");
    assert_eq!(q.marker_id, None);
  }

  #[test]
  fn test_roundtrip_through_storage() {
    let t = parse(V4).unwrap();
    let mut out = vec![];
    write_trajectories(&mut out, &t.persons, TRC_VERSION).unwrap();
    let u = parse(std::str::from_utf8(&out).unwrap()).unwrap();
    assert_eq!(u.version, 4);
    for (a, b) in t.persons.iter().zip(&u.persons) {
      assert_eq!(a.id, b.id);
      assert_eq!(a.points(), b.points());
      assert_eq!(a.first_frame(), b.first_frame());
      assert_eq!(a.height(), b.height());
      assert_eq!(a.comment, b.comment);
    }
  }

  #[test]
  fn test_read_v1_bare_count() {
    let t = parse("1\n3 -1 7 8 0 -1 -1 -1 2\n1 2 50 0 0 -1 -1 -1\n3 4 60 0 0 -1 -1 -1\n").unwrap();
    assert_eq!(t.version, 1);
    let p = &t.persons[0];
    assert_eq!(p.id, PersonId(3));
    assert_eq!(p.point_at(8).unwrap().pixel, Vector2d::new(3., 4.));
    assert_eq!(p.point_at(8).unwrap().quality, 60.);
  }

  #[test]
  fn test_write_older_version() {
    let t = parse(V4).unwrap();
    let mut out = vec![];
    write_trajectories(&mut out, &t.persons, 2).unwrap();
    let u = parse(std::str::from_utf8(&out).unwrap()).unwrap();
    assert_eq!(u.version, 2);
    assert_eq!(u.persons[0].comment, "");
    assert_eq!(u.persons[0].point_at(3).unwrap().world, Some(Vector3d::new(1., 2., 300.)));
  }

  #[test]
  fn test_bad_input() {
    let kind = |s: &str| parse(s).err().and_then(|e| e.downcast::<TrackError>().ok());
    assert!(matches!(kind("version 9\n0\n"), Some(TrackError::Format(_))));
    assert!(matches!(kind("trajectories\n"), Some(TrackError::Format(_))));
    // Frame range disagrees with the point count.
    assert!(matches!(kind("version 2\n1\n1 -1 0 5 0 -1 -1 -1 2\n"), Some(TrackError::Format(_))));
    // Truncated.
    assert!(matches!(kind("version 2\n1\n1 -1 0 1 0 -1 -1 -1 2\n1 1 0 0 -1 50 0 0 -1 -1 -1\n"),
      Some(TrackError::Format(_))));
  }

  #[test]
  fn test_oversized_header_values() {
    let kind = |s: &str| parse(s).err().and_then(|e| e.downcast::<TrackError>().ok());
    assert!(matches!(kind("version 4\n100000000000000000\n"), Some(TrackError::Format(_))));
    assert!(matches!(kind("version 2\n1\n1 -1 0 18446744073709551615 0 -1 -1 -1 5\n"),
      Some(TrackError::Format(_))));
    assert!(matches!(kind("version 2\n1\n1 -1 5 3 0 -1 -1 -1 18446744073709551615\n"),
      Some(TrackError::Format(_))));
    assert!(matches!(kind("version 2\n1\n1 -1 0 0 0 -1 -1 -1 1\n"), Some(TrackError::Format(_))));
    let t = parse("version 2\n1\n1 -1 18446744073709551615 18446744073709551615 0 -1 -1 -1 1\n\
      0 0 0 0 -1 50 0 0 -1 -1 -1\n").unwrap();
    assert_eq!(t.persons[0].last_frame(), usize::MAX);
  }

  #[test]
  fn test_projected_world_not_written() {
    let mut t = parse(V4).unwrap();
    let p = t.persons[0].point_at_mut(5).unwrap();
    p.world = Some(Vector3d::new(4., 5., 323.5));
    let mut out = vec![];
    write_trajectories(&mut out, &t.persons, TRC_VERSION).unwrap();
    let u = parse(std::str::from_utf8(&out).unwrap()).unwrap();
    assert_eq!(u.persons[0].point_at(5).unwrap().world, None);
    let a = u.persons[0].point_at(3).unwrap();
    assert_eq!(a.world, Some(Vector3d::new(1., 2., 300.)));
    assert!(a.depth_measured);
  }

  #[test]
  fn test_import_keeps_storage_on_error() {
    let mut storage = PersonStorage::new(&ParameterSet::default());
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("bad.trc");
    std::fs::write(&path, "version 4\n2\n1 -1 0 0 0 -1 -1 -1 -1 1\n\n1 1 0 0 -1 50 0 0 -1 -1 -1 -1\n").unwrap();
    assert!(import_trajectories(&mut storage, &path).is_err());
    assert!(storage.is_empty());
    std::fs::write(&path, V4).unwrap();
    assert_eq!(import_trajectories(&mut storage, &path).unwrap(), 4);
    assert_eq!(storage.len(), 2);
  }
}
