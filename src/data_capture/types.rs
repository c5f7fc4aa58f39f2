//! Common data types used across the data_capture subsystem.

use crate::network::types::{
    is_bridged_host, TargetAddress, BRIDGE_PORT_OFFSET, REMOTE_SERVER_PORT,
};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Scheme prefix of remote capture locators, `remote://host:port`.
pub const REMOTE_LOCATOR_PREFIX: &str = "remote://";

/// Result of opening a capture or a replay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReplayStatus {
    Succeeded,
    FileNotFound,
    FileIoFailed,
    FileCorrupted,
    UnsupportedFormat,
    VersionMismatch,
    NetworkTimeout,
    NetworkIoFailed,
    ApiUnsupported,
    InternalError,
}

impl ReplayStatus {
    pub fn is_success(self) -> bool {
        self == ReplayStatus::Succeeded
    }
}

impl fmt::Display for ReplayStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            ReplayStatus::Succeeded => "succeeded",
            ReplayStatus::FileNotFound => "file not found",
            ReplayStatus::FileIoFailed => "file I/O failed",
            ReplayStatus::FileCorrupted => "file corrupted",
            ReplayStatus::UnsupportedFormat => "unsupported file format",
            ReplayStatus::VersionMismatch => "file format version mismatch",
            ReplayStatus::NetworkTimeout => "network timeout",
            ReplayStatus::NetworkIoFailed => "network I/O failed",
            ReplayStatus::ApiUnsupported => "operation unsupported",
            ReplayStatus::InternalError => "internal error",
        };
        f.write_str(text)
    }
}

/// Whether a capture can be replayed on this machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReplaySupport {
    Supported,
    Unsupported,
    /// The capture is replayable, but on a machine like the one that recorded it.
    SuggestRemote,
}

/// Image container for thumbnails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileType {
    Png,
    Jpg,
    Bmp,
    Tga,
}

impl FileType {
    pub fn image_format(self) -> image::ImageFormat {
        match self {
            FileType::Png => image::ImageFormat::Png,
            FileType::Jpg => image::ImageFormat::Jpeg,
            FileType::Bmp => image::ImageFormat::Bmp,
            FileType::Tga => image::ImageFormat::Tga,
        }
    }

    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_ascii_lowercase().as_str() {
            "png" => Some(FileType::Png),
            "jpg" | "jpeg" => Some(FileType::Jpg),
            "bmp" => Some(FileType::Bmp),
            "tga" => Some(FileType::Tga),
            _ => None,
        }
    }
}

/// Where the thumbnail stored in a capture sits and what it is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThumbnailDescriptor {
    pub format: FileType,
    pub width: u32,
    pub height: u32,
    pub length: u64,
}

/// JSON header at the start of every capture container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaptureHeader {
    pub driver: String,
    #[serde(default)]
    pub machine_ident: String,
    #[serde(default)]
    pub thumbnail: Option<ThumbnailDescriptor>,
}

/// What a capture handle was opened on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptureLocator {
    Local(PathBuf),
    Remote(TargetAddress),
}

impl CaptureLocator {
    /// `remote://host:port` is a remote target, anything else a local path. A remote locator
    /// without a port uses the remote server port, shifted for bridged devices.
    pub fn parse(locator: &str) -> Self {
        let Some(rest) = locator.strip_prefix(REMOTE_LOCATOR_PREFIX) else {
            return CaptureLocator::Local(PathBuf::from(locator));
        };
        let rest = rest.trim_end_matches('/');
        let (host, port) = match rest.rsplit_once(':') {
            Some((host, port)) => match port.parse::<u16>() {
                Ok(port) => (host, port),
                Err(_) => (rest, 0),
            },
            None => (rest, 0),
        };
        let port = match port {
            0 if is_bridged_host(host) => REMOTE_SERVER_PORT + BRIDGE_PORT_OFFSET,
            0 => REMOTE_SERVER_PORT,
            port => port,
        };
        CaptureLocator::Remote(TargetAddress::resolve(host, port))
    }
}

impl fmt::Display for CaptureLocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CaptureLocator::Local(path) => write!(f, "{}", path.display()),
            CaptureLocator::Remote(address) => write!(f, "{}{}", REMOTE_LOCATOR_PREFIX, address),
        }
    }
}

/// Identifies the kind of machine a capture was recorded on, `<os>-<arch>`.
pub fn local_machine_ident() -> String {
    format!("{}-{}", std::env::consts::OS, std::env::consts::ARCH)
}
