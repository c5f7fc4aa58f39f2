//! # Process injection
//!
//! Gets the capture component into a target process, in one of four ways:
//!
//! ```text
//! launch_with_injection ─▶ new child, component preloaded, env list applied to its environment
//! attach_to_process     ─▶ running pid, request queued as a rendezvous file for the hook
//! install_global_hook   ─▶ every later `launch` whose path matches, until disabled
//! SelfHostCapture       ─▶ the calling process itself, through the component's entry point
//! ```

pub mod attach;
pub mod environment;
pub mod global_hook;
pub mod injector;
pub mod self_host;
pub mod types;

pub use attach::{process_exists, InjectionRequest};
pub use environment::{apply_modifications, Environment};
pub use global_hook::{GlobalHook, GlobalHookConfig};
pub use injector::{split_command_line, ProcessInjector, CAPTURE_FILE_VAR, CAPTURE_OPTIONS_VAR, PRELOAD_VAR};
pub use self_host::{CaptureApi, ComponentLoader, DynamicLoader, SelfHostCapture};
pub use types::{
    CaptureOptions, EnvMod, EnvSep, EnvironmentModification, EnvironmentModifications, ProcessId,
};
