//! # Logging sink
//!
//! Every component logs through the `log` facade. This module installs the `env_logger` sink,
//! keeps the optional debug log file (a process-wide target that can be changed at any time),
//! and routes externally supplied messages, including the fatal ones that must end in the
//! registered fatal action.

use chrono::Utc;
use log::{debug, Level, LevelFilter};
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, OnceLock, RwLock};

/// Severity of a message handed in from outside the crate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogType {
    Debug,
    Comment,
    Warning,
    Error,
    Fatal,
}

impl LogType {
    pub fn level(self) -> Level {
        match self {
            LogType::Debug => Level::Debug,
            LogType::Comment => Level::Info,
            LogType::Warning => Level::Warn,
            LogType::Error | LogType::Fatal => Level::Error,
        }
    }
}

#[derive(Debug, Clone)]
pub struct LogSettings {
    pub level: LevelFilter,
    pub log_file: Option<PathBuf>,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: LevelFilter::Info,
            log_file: None,
        }
    }
}

type FatalAction = Arc<dyn Fn(&str) + Send + Sync>;

struct DebugLogFile {
    path: PathBuf,
    file: File,
}

fn debug_log_slot() -> &'static Mutex<Option<DebugLogFile>> {
    static SLOT: OnceLock<Mutex<Option<DebugLogFile>>> = OnceLock::new();
    SLOT.get_or_init(|| Mutex::new(None))
}

fn fatal_slot() -> &'static RwLock<Option<FatalAction>> {
    static SLOT: OnceLock<RwLock<Option<FatalAction>>> = OnceLock::new();
    SLOT.get_or_init(|| RwLock::new(None))
}

/// Writer handed to `env_logger`: stderr plus the current debug log file, if any.
struct LogSink;

impl Write for LogSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        io::stderr().write_all(buf)?;
        if let Ok(mut slot) = debug_log_slot().lock() {
            if let Some(target) = slot.as_mut() {
                // A broken log file must never take stderr logging down with it.
                let _ = target.file.write_all(buf);
            }
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        io::stderr().flush()?;
        if let Ok(mut slot) = debug_log_slot().lock() {
            if let Some(target) = slot.as_mut() {
                let _ = target.file.flush();
            }
        }
        Ok(())
    }
}

/// Installs the process logger. Returns `false` if a logger was already installed.
///
/// `RUST_LOG` still overrides `settings.level`.
pub fn init_logging(settings: LogSettings) -> bool {
    if let Some(path) = settings.log_file.as_deref() {
        set_debug_log_file(path);
    }

    env_logger::Builder::new()
        .filter_level(settings.level)
        .parse_default_env()
        .format_target(false)
        .format(|buf, record| {
            writeln!(
                buf,
                "[{}] {:<5} {}",
                Utc::now().format("%Y-%m-%d %H:%M:%S%.3f UTC"),
                record.level(),
                record.args()
            )
        })
        .target(env_logger::Target::Pipe(Box::new(LogSink)))
        .try_init()
        .is_ok()
}

/// Redirects the debug log copy to `path`. Empty paths are ignored.
pub fn set_debug_log_file(path: &Path) {
    if path.as_os_str().is_empty() {
        return;
    }

    let file = match OpenOptions::new().create(true).append(true).open(path) {
        Ok(file) => file,
        Err(e) => {
            // The sink is not pointed at the new file yet, so this only reaches stderr.
            log::error!("Unable to open debug log {}: {}", path.display(), e);
            return;
        }
    };

    if let Ok(mut slot) = debug_log_slot().lock() {
        *slot = Some(DebugLogFile {
            path: path.to_path_buf(),
            file,
        });
    }
    debug!("Debug log redirected to {}", path.display());
}

/// Where the debug log is currently written, if anywhere.
pub fn debug_log_file() -> Option<PathBuf> {
    debug_log_slot()
        .lock()
        .ok()
        .and_then(|slot| slot.as_ref().map(|target| target.path.clone()))
}

/// Replaces the action run after a fatal message has been logged.
pub fn set_fatal_action<F>(action: F)
where
    F: Fn(&str) + Send + Sync + 'static,
{
    if let Ok(mut slot) = fatal_slot().write() {
        *slot = Some(Arc::new(action));
    }
}

/// Restores the default fatal action (flush, then abort).
pub fn reset_fatal_action() {
    if let Ok(mut slot) = fatal_slot().write() {
        *slot = None;
    }
}

fn run_fatal_action(text: &str) {
    let action = fatal_slot().read().ok().and_then(|slot| slot.clone());
    match action {
        Some(action) => action(text),
        None => {
            log::logger().flush();
            std::process::abort();
        }
    }
}

/// Records a free-form comment from an external caller.
pub fn log_text(text: &str) {
    log_message(LogType::Comment, Some("EXT"), Some("external"), 0, text);
}

/// Records a message on behalf of an external caller.
///
/// `Fatal` messages run the fatal action once they are logged.
pub fn log_message(
    kind: LogType,
    project: Option<&str>,
    file: Option<&str>,
    line: u32,
    text: &str,
) {
    let project = project.unwrap_or("UNK?");
    let file = file.unwrap_or("unknown");

    log::log!(kind.level(), "[{}] {}:{} {}", project, file, line, text);

    if kind == LogType::Fatal {
        run_fatal_action(text);
    }
}
