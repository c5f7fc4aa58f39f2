//! Logging setup and externally routed log messages.

pub mod logger;

pub use logger::{
    debug_log_file, init_logging, log_message, log_text, reset_fatal_action, set_debug_log_file,
    set_fatal_action, LogSettings, LogType,
};
