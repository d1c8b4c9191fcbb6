use thiserror::Error;

use crate::types::Frame;

// Error kinds callers branch on. Everything else travels as plain `anyhow` context.
#[derive(Debug, Error, PartialEq)]
pub enum TrackError {
  // Unrecognized trajectory file version or malformed record.
  #[error("Unsupported trajectory file: {0}")]
  Format(String),

  // Legacy text import met the same (person, frame) twice.
  #[error("Person {person} has more than one record for frame {frame}.")]
  DuplicateFrame { person: i64, frame: Frame },

  // A position resolved to several trajectories, the edit was refused.
  #[error("{0} trajectories match the selected position, select fewer trajectories first.")]
  AmbiguousSelection(usize),

  #[error("Projector cannot resolve {0}.")]
  ProjectionUnavailable(String),

  #[error("Invalid parameter {name}: {reason}")]
  InvalidParameter { name: &'static str, reason: String },
}
