//! Capture files: the container format, replay drivers and thumbnails.

pub mod capture_file;
pub mod container;
pub mod replay;
pub mod thumbnail;
pub mod types;

pub use capture_file::{create_replay_controller, support_local_replay, thumbnail_for, CaptureFile};
pub use container::CaptureWriter;
pub use replay::{DriverRegistry, ReplayController, ReplayDriver};
pub use types::{CaptureLocator, FileType, ReplayStatus, ReplaySupport};
