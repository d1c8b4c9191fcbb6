pub mod all;
pub mod camera_pinhole;
pub mod camera_setup;
pub mod error;
pub mod export;
pub mod head_size;
pub mod legacy_import;
pub mod math;
pub mod mover;
pub mod parameters;
pub mod person_storage;
pub mod pipeline;
pub mod projector;
pub mod track;
pub mod trajectory_file;
pub mod types;
pub mod util;
