// NOTE This kind of import-all file isn't a common Rust idiom.

pub use crate::{
  camera_pinhole::*,
  camera_setup::*,
  error::TrackError,
  export::*,
  head_size::*,
  legacy_import::*,
  math::*,
  mover::*,
  parameters::*,
  person_storage::*,
  pipeline::*,
  projector::*,
  track::*,
  trajectory_file::*,
  types::*,
  util::*,
};

pub use {
  std::{
    collections::{BTreeMap, HashSet},
    fs::File,
    io::{BufRead, BufReader, BufWriter, Write},
    path::{Path, PathBuf},
  },
  log::{debug, error, info, warn, LevelFilter},
  serde::Deserialize,
  anyhow::{bail, Context as AnyhowContext, Result},
};
