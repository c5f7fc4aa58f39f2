use crate::device_bridge::{CommandRunner, DeviceBridge, ProcessRunner};
use crate::network::port_scanner::PROBE_TIMEOUT;
use crate::network::probe::{ConnectProbe, TcpProbe};
use crate::network::types::{TargetAddress, BRIDGE_PORT_OFFSET, FIRST_TARGET_CONTROL_PORT};
use log::{debug, info, warn};
use std::time::Duration;

/// Delay between two readiness checks.
pub const LAUNCH_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Outcome of [`PackageLauncher::start_package_for_capture`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PackageLaunch {
    /// Local port that reaches the package's control endpoint through the forwards.
    pub control_port: u16,
    /// Whether a control connection succeeded before the timeout ran out.
    pub ready: bool,
}

/// Starts an application on a bridged device with the capture layer primed.
///
/// The launch blocks for up to the configured connect timeout (never less than five seconds)
/// and cannot be cancelled early; run it off any thread that must stay responsive.
pub struct PackageLauncher<'a, R: CommandRunner = ProcessRunner, P: ConnectProbe = TcpProbe> {
    bridge: &'a DeviceBridge<R>,
    probe: P,
    poll_interval: Duration,
}

impl<'a, R: CommandRunner> PackageLauncher<'a, R, TcpProbe> {
    pub fn new(bridge: &'a DeviceBridge<R>) -> Self {
        Self::with_probe(bridge, TcpProbe)
    }
}

impl<'a, R: CommandRunner, P: ConnectProbe> PackageLauncher<'a, R, P> {
    pub fn with_probe(bridge: &'a DeviceBridge<R>, probe: P) -> Self {
        Self {
            bridge,
            probe,
            poll_interval: LAUNCH_POLL_INTERVAL,
        }
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Force-stops `package`, primes the capture layer, grants storage access, launches the
    /// default activity and waits for its control endpoint.
    ///
    /// The capture layer property is cleared again once waiting ends, ready or not: the
    /// package only needs it while starting, and leaving it set would hook the replay side.
    pub fn start_package_for_capture(&self, host: &str, package: &str) -> PackageLaunch {
        let package = normalize_package(package);
        info!("Starting {} on {} for capture", package, host);

        self.bridge
            .exec(&format!("shell am force-stop {}", package));
        self.bridge.forward_ports();
        self.bridge.enable_capture_layer();
        // Writing the capture file.
        self.bridge.exec(&format!(
            "shell pm grant {} android.permission.WRITE_EXTERNAL_STORAGE",
            package
        ));
        // Reading the capture thumbnail.
        self.bridge.exec(&format!(
            "shell pm grant {} android.permission.READ_EXTERNAL_STORAGE",
            package
        ));
        self.bridge.exec(&format!(
            "shell monkey -p {} -c android.intent.category.LAUNCHER 1",
            package
        ));

        let control_port = FIRST_TARGET_CONTROL_PORT + BRIDGE_PORT_OFFSET;
        let address = TargetAddress::resolve(host, control_port);
        let ready = self.wait_until_controllable(&address);

        self.bridge.disable_capture_layer();

        if !ready {
            warn!(
                "{} did not accept a control connection on {}",
                package, address
            );
        }
        PackageLaunch {
            control_port,
            ready,
        }
    }

    fn wait_until_controllable(&self, address: &TargetAddress) -> bool {
        let timeout = self.bridge.config().max_connect_timeout();
        let mut elapsed = Duration::ZERO;

        while elapsed < timeout {
            if self.probe.probe(&address.host, address.port, PROBE_TIMEOUT) {
                debug!("Control endpoint up at {} after {:?}", address, elapsed);
                return true;
            }
            std::thread::sleep(self.poll_interval);
            elapsed += self.poll_interval;
        }
        false
    }
}

/// Strips any leading path from a package id: `/com.example.app` becomes `com.example.app`.
pub fn normalize_package(package: &str) -> &str {
    let trimmed = package.trim().trim_end_matches('/');
    trimmed.rsplit('/').next().unwrap_or(trimmed)
}
