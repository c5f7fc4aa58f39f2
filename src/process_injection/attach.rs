//! Injection into a running process.
//!
//! A running process already has its environment, so nothing is changed at OS level. The
//! request is written as a rendezvous file named after the target pid in the hook directory;
//! the capture component, once resident in the target, picks it up and applies the
//! environment list to the variables it exposes to its own hooks.

use super::injector::ProcessInjector;
use super::types::{CaptureOptions, EnvironmentModifications, ProcessId};
use crate::error_handling::types::InjectionError;
use chrono::{DateTime, Utc};
use log::{debug, error, info};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Delay between liveness checks while waiting for an attached process to exit.
pub const EXIT_POLL_INTERVAL: Duration = Duration::from_millis(250);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InjectionRequest {
    pub pid: ProcessId,
    pub component: PathBuf,
    pub artifact_path: PathBuf,
    pub options: CaptureOptions,
    pub environment: EnvironmentModifications,
    pub requested_at: DateTime<Utc>,
}

impl ProcessInjector {
    pub fn rendezvous_path(&self, pid: ProcessId) -> PathBuf {
        self.hook_dir().join(format!("inject-{}.json", pid))
    }

    /// Hands the capture request to the already running process `pid`.
    ///
    /// With `wait_for_exit` the call returns only after the target has exited.
    ///
    /// # Errors
    ///
    /// - `InjectionError::ComponentMissing` if the capture component does not exist
    /// - `InjectionError::ProcessNotFound` if no process with that id is running
    /// - `InjectionError::RendezvousFailed` if the request cannot be written
    pub fn attach_to_process(
        &self,
        pid: ProcessId,
        env_mods: &EnvironmentModifications,
        artifact_path: &Path,
        options: &CaptureOptions,
        wait_for_exit: bool,
    ) -> Result<(), InjectionError> {
        if !cfg!(unix) {
            return Err(InjectionError::Unsupported(
                "attaching is only implemented on Unix".to_string(),
            ));
        }
        self.ensure_component()?;
        if !process_exists(pid) {
            error!("Cannot attach: no process with pid {}", pid);
            return Err(InjectionError::ProcessNotFound(pid));
        }

        let request = InjectionRequest {
            pid,
            component: self.component().to_path_buf(),
            artifact_path: artifact_path.to_path_buf(),
            options: options.clone(),
            environment: env_mods.clone(),
            requested_at: Utc::now(),
        };
        let encoded = serde_json::to_vec_pretty(&request)
            .map_err(|e| InjectionError::Serialization(e.to_string()))?;

        fs::create_dir_all(self.hook_dir()).map_err(InjectionError::RendezvousFailed)?;
        let target = self.rendezvous_path(pid);
        // Written aside and renamed so the hook never reads a partial request.
        let staging = target.with_extension("json.tmp");
        fs::write(&staging, encoded).map_err(InjectionError::RendezvousFailed)?;
        fs::rename(&staging, &target).map_err(InjectionError::RendezvousFailed)?;
        info!("Queued injection for pid {} at {}", pid, target.display());

        if wait_for_exit {
            debug!("Waiting for pid {} to exit", pid);
            while process_exists(pid) {
                std::thread::sleep(EXIT_POLL_INTERVAL);
            }
        }
        Ok(())
    }

    /// Reads back a queued request, as the injected component does.
    pub fn pending_request(&self, pid: ProcessId) -> Option<InjectionRequest> {
        let bytes = fs::read(self.rendezvous_path(pid)).ok()?;
        serde_json::from_slice(&bytes).ok()
    }
}

/// Whether a process with this id is currently running.
#[cfg(target_os = "linux")]
pub fn process_exists(pid: ProcessId) -> bool {
    pid != 0 && Path::new("/proc").join(pid.to_string()).exists()
}

#[cfg(all(unix, not(target_os = "linux")))]
pub fn process_exists(pid: ProcessId) -> bool {
    let Ok(pid) = libc::pid_t::try_from(pid) else {
        return false;
    };
    if pid <= 0 {
        return false;
    }
    // Signal 0 only checks for existence; EPERM means it exists under another user.
    let rc = unsafe { libc::kill(pid, 0) };
    rc == 0 || std::io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
}

#[cfg(not(unix))]
pub fn process_exists(_pid: ProcessId) -> bool {
    false
}
