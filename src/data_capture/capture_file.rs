//! # Capture file handle
//!
//! [`CaptureFile`] opens a recorded capture, or a remote target holding one, and answers the
//! questions a client asks before replaying: did it open, can it be replayed here, what does
//! it look like. The open status is decided by [`CaptureFile::open`] itself, so a handle always
//! exists even when the capture could not be read.
//!
//! ```text
//! open(locator) ──▶ Succeeded ──▶ open_capture / get_thumbnail / local_replay_support
//!       │                                    │
//!       └────────▶ failure status ───────────┴──▶ shutdown (consumes the handle)
//! ```
//!
//! A handle is single-owner and not meant to be shared between threads.
//! [`CaptureFile::shutdown`] takes the handle by value, so nothing can be called on it
//! afterwards:
//!
//! ```rust,compile_fail
//! use capbridge::data_capture::CaptureFile;
//!
//! let file = CaptureFile::open("/tmp/frame.cap");
//! file.shutdown();
//! file.open_status();
//! ```

use super::container::CaptureContainer;
use super::replay::{DriverRegistry, ProgressTracker, ReplayController};
use super::thumbnail;
use super::types::{local_machine_ident, CaptureLocator, FileType, ReplayStatus, ReplaySupport};
use crate::configuration::types::MIN_CONNECT_TIMEOUT_SECS;
use crate::error_handling::types::CaptureError;
use crate::network::probe::{ConnectProbe, TcpProbe};
use log::{debug, info, warn};
use std::path::Path;
use std::time::Duration;

/// Connect timeout used when opening a remote locator through [`CaptureFile::open`].
pub const REMOTE_OPEN_TIMEOUT: Duration = Duration::from_secs(MIN_CONNECT_TIMEOUT_SECS);

/// An open capture, local or remote. See the module docs for the lifecycle.
pub struct CaptureFile {
    locator: CaptureLocator,
    status: ReplayStatus,
    container: Option<CaptureContainer>,
    registry: DriverRegistry,
}

impl CaptureFile {
    /// Opens `locator`, a capture path or `remote://host:port`.
    pub fn open(locator: &str) -> Self {
        Self::open_with(locator, DriverRegistry::default(), &TcpProbe, REMOTE_OPEN_TIMEOUT)
    }

    /// Opens `locator` with a custom driver set. Remote targets are checked with `probe`.
    pub fn open_with(
        locator: &str,
        registry: DriverRegistry,
        probe: &dyn ConnectProbe,
        connect_timeout: Duration,
    ) -> Self {
        let locator = CaptureLocator::parse(locator);

        let (status, container) = match &locator {
            CaptureLocator::Local(path) => match CaptureContainer::open(path) {
                Ok(container) => (ReplayStatus::Succeeded, Some(container)),
                Err(status) => (status, None),
            },
            CaptureLocator::Remote(address) => {
                if probe.probe(&address.host, address.port, connect_timeout) {
                    (ReplayStatus::Succeeded, None)
                } else {
                    (ReplayStatus::NetworkTimeout, None)
                }
            }
        };

        if status.is_success() {
            info!("Opened capture {}", locator);
        } else {
            warn!("Opening capture {} failed: {}", locator, status);
        }

        Self {
            locator,
            status,
            container,
            registry,
        }
    }

    pub fn locator(&self) -> &CaptureLocator {
        &self.locator
    }

    pub fn open_status(&self) -> ReplayStatus {
        self.status
    }

    /// Driver recorded in the capture, empty when the capture is not open locally.
    pub fn driver_name(&self) -> &str {
        self.container
            .as_ref()
            .map(|c| c.header.driver.as_str())
            .unwrap_or("")
    }

    /// Kind of machine the capture was recorded on, empty when unknown.
    pub fn recorded_machine_ident(&self) -> &str {
        self.container
            .as_ref()
            .map(|c| c.header.machine_ident.as_str())
            .unwrap_or("")
    }

    /// Whether replaying here is worth trying.
    ///
    /// A capture from another kind of machine suggests replaying remotely, as does a remote
    /// locator. A capture whose driver is unknown and that came from this kind of machine
    /// cannot be replayed anywhere this crate knows of.
    pub fn local_replay_support(&self) -> ReplaySupport {
        if !self.status.is_success() {
            return ReplaySupport::Unsupported;
        }
        let Some(container) = &self.container else {
            return ReplaySupport::SuggestRemote;
        };

        let recorded = container.header.machine_ident.as_str();
        if !recorded.is_empty() && !same_platform(recorded, &local_machine_ident()) {
            ReplaySupport::SuggestRemote
        } else if self.registry.supports(&container.header.driver) {
            ReplaySupport::Supported
        } else {
            ReplaySupport::Unsupported
        }
    }

    /// Loads the capture for replay. Blocks until loading is done.
    ///
    /// `progress` is called on this thread with fractions that never decrease and stay within
    /// `[0, 1]`, ending with `1.0` on success.
    pub fn open_capture(
        &self,
        progress: &mut dyn FnMut(f32),
    ) -> Result<Box<dyn ReplayController>, ReplayStatus> {
        if !self.status.is_success() {
            return Err(self.status);
        }
        let Some(container) = &self.container else {
            return Err(ReplayStatus::ApiUnsupported);
        };
        let driver = self
            .registry
            .get(&container.header.driver)
            .ok_or_else(|| {
                warn!("No replay driver named {:?}", container.header.driver);
                ReplayStatus::UnsupportedFormat
            })?;

        let mut tracker = ProgressTracker::new(progress);
        tracker.report(0.0);

        let payload = container.read_payload()?;
        let controller = driver.open(&payload, &mut |p: f32| tracker.report(p))?;

        tracker.report(1.0);
        debug!(
            "Capture {} ready with {} events",
            self.locator,
            controller.event_count()
        );
        Ok(controller)
    }

    /// The stored thumbnail encoded as `file_type`, its longer edge at most `max_edge` pixels
    /// (`0` keeps the stored size).
    ///
    /// # Errors
    ///
    /// - `CaptureError::NotOpen` if the capture did not open
    /// - `CaptureError::RemoteUnsupported` for remote locators
    /// - `CaptureError::NoThumbnail` if the capture was recorded without one
    /// - `CaptureError::ImageError` if the stored image cannot be converted
    pub fn get_thumbnail(&self, file_type: FileType, max_edge: u32) -> Result<Vec<u8>, CaptureError> {
        if !self.status.is_success() {
            return Err(CaptureError::NotOpen(self.status));
        }
        let container = self
            .container
            .as_ref()
            .ok_or(CaptureError::RemoteUnsupported)?;
        let stored = container.thumbnail().ok_or(CaptureError::NoThumbnail)?;

        // The descriptor's size is not trusted; the stored image's own header decides.
        if let Some(descriptor) = &container.header.thumbnail {
            if descriptor.format == file_type {
                let (width, height) = thumbnail::dimensions(stored)?;
                if max_edge == 0 || width.max(height) <= max_edge {
                    return Ok(stored.to_vec());
                }
            }
        }
        thumbnail::transcode(stored, file_type, max_edge)
    }

    /// Releases the handle.
    pub fn shutdown(self) {
        debug!("Shutting down capture {}", self.locator);
    }
}

fn same_platform(recorded: &str, local: &str) -> bool {
    let os = |ident: &str| ident.split('-').next().unwrap_or("").to_ascii_lowercase();
    os(recorded) == os(local)
}

/// Support, driver and recorded machine of the capture at `path`.
pub fn support_local_replay(path: &Path) -> (ReplaySupport, String, String) {
    let file = CaptureFile::open(&path.to_string_lossy());
    let result = (
        file.local_replay_support(),
        file.driver_name().to_string(),
        file.recorded_machine_ident().to_string(),
    );
    file.shutdown();
    result
}

/// Opens the capture at `path` and loads it for replay in one step.
pub fn create_replay_controller(
    path: &Path,
    progress: &mut dyn FnMut(f32),
) -> Result<Box<dyn ReplayController>, ReplayStatus> {
    let file = CaptureFile::open(&path.to_string_lossy());
    let controller = file.open_capture(progress);
    file.shutdown();
    controller
}

/// The thumbnail of the capture at `path`, or `None` if there is none to be had.
pub fn thumbnail_for(path: &Path, file_type: FileType, max_edge: u32) -> Option<Vec<u8>> {
    let file = CaptureFile::open(&path.to_string_lossy());
    let thumbnail = file.get_thumbnail(file_type, max_edge);
    file.shutdown();
    match thumbnail {
        Ok(bytes) => Some(bytes),
        Err(e) => {
            debug!("No thumbnail for {}: {}", path.display(), e);
            None
        }
    }
}
