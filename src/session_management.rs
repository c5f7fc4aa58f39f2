//! Launching capture sessions on bridged devices.
//!
//! A capture session starts with the target package being relaunched with the capture layer
//! primed; the launcher then polls the package's control endpoint until it answers.

pub mod package_launcher;

pub use package_launcher::{normalize_package, PackageLaunch, PackageLauncher};
