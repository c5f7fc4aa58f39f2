use std::fmt;

#[derive(Debug)]
pub enum ConfigError {
    IoError(std::io::Error),
    TomlError(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::IoError(e) => write!(f, "IO error: {}", e),
            ConfigError::TomlError(e) => write!(f, "TOML parsing error: {}", e),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<std::io::Error> for ConfigError {
    fn from(err: std::io::Error) -> Self {
        ConfigError::IoError(err)
    }
}

#[derive(Debug)]
pub enum NetworkError {
    BindError(std::io::Error),
    SockError(std::io::Error),
    AddressResolution(String),
}

impl fmt::Display for NetworkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NetworkError::BindError(e) => write!(f, "Network bind error: {}", e),
            NetworkError::SockError(e) => write!(f, "Socket error: {}", e),
            NetworkError::AddressResolution(e) => write!(f, "Unable to resolve address: {}", e),
        }
    }
}

impl std::error::Error for NetworkError {}

#[derive(Debug)]
pub enum BridgeError {
    SpawnFailed(std::io::Error),
}

impl fmt::Display for BridgeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BridgeError::SpawnFailed(e) => write!(f, "Relay command could not be started: {}", e),
        }
    }
}

impl std::error::Error for BridgeError {}

impl From<std::io::Error> for BridgeError {
    fn from(err: std::io::Error) -> Self {
        BridgeError::SpawnFailed(err)
    }
}

#[derive(Debug)]
pub enum InjectionError {
    LaunchFailed(std::io::Error),
    ProcessNotFound(u32),
    ComponentMissing(String),
    InvalidCommandLine(String),
    RendezvousFailed(std::io::Error),
    Serialization(String),
    Unsupported(String),
}

impl fmt::Display for InjectionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InjectionError::LaunchFailed(e) => write!(f, "Process launch failed: {}", e),
            InjectionError::ProcessNotFound(pid) => write!(f, "No process with pid {}", pid),
            InjectionError::ComponentMissing(e) => write!(f, "Capture component missing: {}", e),
            InjectionError::InvalidCommandLine(e) => write!(f, "Invalid command line: {}", e),
            InjectionError::RendezvousFailed(e) => {
                write!(f, "Unable to hand off injection data: {}", e)
            }
            InjectionError::Serialization(e) => write!(f, "Unable to encode capture options: {}", e),
            InjectionError::Unsupported(e) => write!(f, "Injection unsupported: {}", e),
        }
    }
}

impl std::error::Error for InjectionError {}

#[derive(Debug)]
pub enum HookError {
    AlreadyEnabled,
    NotEnabled,
    EmptyPathMatch,
    ManifestFailed(std::io::Error),
    Serialization(String),
}

impl fmt::Display for HookError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HookError::AlreadyEnabled => write!(f, "Global hook is already enabled"),
            HookError::NotEnabled => write!(f, "Global hook is not enabled"),
            HookError::EmptyPathMatch => write!(f, "Global hook needs a non-empty path match"),
            HookError::ManifestFailed(e) => write!(f, "Global hook manifest error: {}", e),
            HookError::Serialization(e) => write!(f, "Global hook encoding error: {}", e),
        }
    }
}

impl std::error::Error for HookError {}

#[derive(Debug)]
pub enum CaptureError {
    /// The handle did not open successfully; carries the open status.
    NotOpen(crate::data_capture::types::ReplayStatus),
    /// The operation needs the capture locally but the handle refers to a remote target.
    RemoteUnsupported,
    NoThumbnail,
    ImageError(String),
}

impl fmt::Display for CaptureError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CaptureError::NotOpen(status) => write!(f, "Capture is not open: {}", status),
            CaptureError::RemoteUnsupported => {
                write!(f, "Operation unsupported on a remote capture")
            }
            CaptureError::NoThumbnail => write!(f, "Capture carries no thumbnail"),
            CaptureError::ImageError(e) => write!(f, "Thumbnail conversion failed: {}", e),
        }
    }
}

impl std::error::Error for CaptureError {}

impl From<image::ImageError> for CaptureError {
    fn from(err: image::ImageError) -> Self {
        CaptureError::ImageError(err.to_string())
    }
}

#[derive(Debug)]
pub enum ComponentError {
    ModuleNotFound(String),
    EntryPointNotFound(String),
    ApiUnavailable(u32),
}

impl fmt::Display for ComponentError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ComponentError::ModuleNotFound(e) => write!(f, "Capture component not found: {}", e),
            ComponentError::EntryPointNotFound(e) => write!(f, "Entry point not found: {}", e),
            ComponentError::ApiUnavailable(v) => write!(f, "Capture API version {} unavailable", v),
        }
    }
}

impl std::error::Error for ComponentError {}
