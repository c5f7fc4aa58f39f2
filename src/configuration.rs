//! Runtime settings consulted by the bridge, the launcher and the binary.

pub mod config;
pub mod types;

pub use config::ConfigStore;
pub use types::{SettingsFile, ADB_EXE_PATH, MAX_CONNECT_TIMEOUT};
