use std::fmt;

/// Default port of the remote replay server.
pub const REMOTE_SERVER_PORT: u16 = 39920;

/// First port of the target control window.
pub const FIRST_TARGET_CONTROL_PORT: u16 = 38920;

/// Last port of the target control window (inclusive).
pub const LAST_TARGET_CONTROL_PORT: u16 = FIRST_TARGET_CONTROL_PORT + 7;

/// Added to every well-known port when addressing a bridged device through local forwards.
pub const BRIDGE_PORT_OFFSET: u16 = 50;

/// Host prefix marking a device reachable only through the relay tool, e.g. `adb:emulator-5554`.
pub const BRIDGE_HOST_PREFIX: &str = "adb:";

/// Address bridged hosts resolve to; their ports are forwarded onto it.
pub const LOOPBACK_HOST: &str = "127.0.0.1";

/// Host scanned when none is given.
pub const DEFAULT_HOST: &str = "localhost";

/// Returns `true` when `host` names a bridged device.
pub fn is_bridged_host(host: &str) -> bool {
    host.starts_with(BRIDGE_HOST_PREFIX)
}

/// Contiguous, inclusive port range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortWindow {
    pub first: u16,
    pub last: u16,
}

impl PortWindow {
    pub const CONTROL: PortWindow = PortWindow {
        first: FIRST_TARGET_CONTROL_PORT,
        last: LAST_TARGET_CONTROL_PORT,
    };

    pub fn new(first: u16, last: u16) -> Self {
        Self { first, last }
    }

    /// The same window moved up by `offset`, saturating at the top of the port space.
    pub fn shifted(self, offset: u16) -> Self {
        Self {
            first: self.first.saturating_add(offset),
            last: self.last.saturating_add(offset),
        }
    }

    pub fn contains(&self, port: u16) -> bool {
        (self.first..=self.last).contains(&port)
    }

    pub fn len(&self) -> usize {
        if self.last < self.first {
            0
        } else {
            (self.last - self.first) as usize + 1
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Host and port of a target, with bridged devices already translated.
///
/// A bridged host (`adb:<serial>`) is rewritten to loopback: the device is reached through
/// local port forwards, so the caller talks to `127.0.0.1` and keeps the serial for the relay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetAddress {
    pub host: String,
    pub port: u16,
    device: Option<String>,
}

impl TargetAddress {
    /// Resolves a user supplied host. Empty hosts mean `localhost`.
    pub fn resolve(host: &str, port: u16) -> Self {
        if let Some(serial) = host.strip_prefix(BRIDGE_HOST_PREFIX) {
            return Self {
                host: LOOPBACK_HOST.to_string(),
                port,
                device: Some(serial.to_string()),
            };
        }

        let host = if host.trim().is_empty() {
            DEFAULT_HOST
        } else {
            host.trim()
        };

        Self {
            host: host.to_string(),
            port,
            device: None,
        }
    }

    pub fn is_bridged(&self) -> bool {
        self.device.is_some()
    }

    /// Serial of the bridged device, empty when the host was just `adb:`.
    pub fn device_serial(&self) -> Option<&str> {
        self.device.as_deref()
    }
}

impl fmt::Display for TargetAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}
