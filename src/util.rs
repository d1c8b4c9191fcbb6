use crate::all::*;

pub fn format_log(
  buf: &mut env_logger::fmt::Formatter,
  record: &log::Record,
) -> std::io::Result<()> {
  let mut style = buf.style();
  use env_logger::fmt::Color::*;
  use log::Level::*;
  style.set_color(match record.level() {
    Error => Red,
    Warn => Yellow,
    Info => Green,
    Debug => Magenta,
    Trace => Blue,
  });

  let location = format!("{}:{}",
    record.file().unwrap_or("?").trim_start_matches("src/"),
    record.line().unwrap_or(0),
  );
  writeln!(buf, "{}", style.value(format!("{:28}{}", location, record.args())))
}

// Writes through `f` into a sibling temporary file and renames it over `path`, so a
// failed write never leaves a truncated file behind.
pub fn write_atomically<F>(path: &Path, f: F) -> Result<()>
where F: FnOnce(&mut BufWriter<File>) -> Result<()> {
  let Some(name) = path.file_name() else {
    bail!("Not a file path: {}.", path.display());
  };
  let mut tmp_name = name.to_os_string();
  tmp_name.push(".tmp");
  let tmp_path = path.with_file_name(tmp_name);
  let file = File::create(&tmp_path)
    .context(format!("Failed to create file {}.", tmp_path.display()))?;
  let mut writer = BufWriter::new(file);
  let result = f(&mut writer).and_then(|_| Ok(writer.flush()?));
  if let Err(err) = result {
    drop(writer);
    if let Err(e) = std::fs::remove_file(&tmp_path) {
      warn!("Failed to remove {}: {}", tmp_path.display(), e);
    }
    return Err(err.context(format!("Failed to write {}.", path.display())));
  }
  drop(writer);
  std::fs::rename(&tmp_path, path)
    .context(format!("Failed to move {} to {}.", tmp_path.display(), path.display()))
}
