//! Command relay for devices that are only reachable through `adb`.
//!
//! Re-exports:
//! - [`DeviceBridge`]: runs relay commands, forwards ports, lists devices.
//! - [`CommandRunner`], [`ProcessRunner`]: the process seam underneath it.

pub mod adb;
pub mod command_runner;

pub use adb::DeviceBridge;
pub use command_runner::{CommandRunner, ProcessRunner};
