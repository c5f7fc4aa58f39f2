//! Discovery, launch and control of capture-enabled processes.
//!
//! ```text
//!                 ┌──────────────┐   scan control window   ┌─────────────────┐
//!  analysis  ────▶│ PortScanner  │────────────────────────▶│ capture targets │
//!  client         └──────────────┘                         └─────────────────┘
//!     │           ┌──────────────┐   adb relay + forwards  ┌─────────────────┐
//!     ├──────────▶│ DeviceBridge │────────────────────────▶│ bridged device  │
//!     │           └──────────────┘   (PackageLauncher)     └─────────────────┘
//!     │           ┌─────────────────┐  preload / rendezvous ┌────────────────┐
//!     ├──────────▶│ ProcessInjector │──────────────────────▶│ local process  │
//!     │           └─────────────────┘                       └────────────────┘
//!     │           ┌──────────────┐
//!     └──────────▶│ CaptureFile  │ open, inspect and replay recorded captures
//!                 └──────────────┘
//! ```

pub mod configuration;
pub mod data_capture;
pub mod device_bridge;
pub mod diagnostics;
pub mod error_handling;
pub mod network;
pub mod process_injection;
pub mod session_management;

/// `major.minor` of this crate.
pub fn version_string() -> &'static str {
    concat!(
        env!("CARGO_PKG_VERSION_MAJOR"),
        ".",
        env!("CARGO_PKG_VERSION_MINOR")
    )
}

/// Port the remote replay server listens on unless told otherwise.
pub fn default_remote_server_port() -> u16 {
    network::types::REMOTE_SERVER_PORT
}
