use super::command_runner::{CommandRunner, ProcessRunner};
use crate::configuration::ConfigStore;
use crate::network::types::{
    is_bridged_host, BRIDGE_PORT_OFFSET, FIRST_TARGET_CONTROL_PORT, REMOTE_SERVER_PORT,
};
use log::{debug, error, info};
use std::collections::BTreeSet;
use std::sync::Mutex;

/// Token `adb devices` prints for a device that is online and authorised.
pub const DEVICE_READY_MARKER: &str = "device";

/// Package of the on-device replay server.
pub const REMOTE_SERVER_PACKAGE: &str = "org.renderdoc.renderdoccmd";

/// Property that asks the graphics loader to activate the capture layer.
pub const CAPTURE_LAYER_PROPERTY: &str = "debug.vulkan.layers";

/// Value of [`CAPTURE_LAYER_PROPERTY`] that enables the capture layer.
pub const CAPTURE_LAYER_NAME: &str = "VK_LAYER_RENDERDOC_Capture";

/// Relay front-end for bridged devices.
///
/// Every operation is one or more synchronous relay invocations. Nothing here fails loudly:
/// relay errors are logged and show up as empty or unexpected output, which the caller
/// interprets.
///
/// ```rust,no_run
/// use capbridge::configuration::ConfigStore;
/// use capbridge::device_bridge::DeviceBridge;
///
/// let bridge = DeviceBridge::new(ConfigStore::new());
/// for serial in bridge.enumerate_devices() {
///     println!("ready: {}", serial);
/// }
/// ```
pub struct DeviceBridge<R: CommandRunner = ProcessRunner> {
    config: ConfigStore,
    runner: R,
    device: Option<String>,
    forwards: Mutex<BTreeSet<(u16, u16)>>,
}

impl DeviceBridge<ProcessRunner> {
    pub fn new(config: ConfigStore) -> Self {
        Self::with_runner(config, ProcessRunner)
    }
}

impl<R: CommandRunner> DeviceBridge<R> {
    pub fn with_runner(config: ConfigStore, runner: R) -> Self {
        Self {
            config,
            runner,
            device: None,
            forwards: Mutex::new(BTreeSet::new()),
        }
    }

    /// Addresses one device (`adb -s <serial>`) instead of the relay's default device.
    ///
    /// An empty serial keeps the default.
    pub fn for_device(mut self, serial: &str) -> Self {
        let serial = serial.trim();
        self.device = if serial.is_empty() {
            None
        } else {
            Some(serial.to_string())
        };
        self
    }

    pub fn is_bridged(host: &str) -> bool {
        is_bridged_host(host)
    }

    pub fn config(&self) -> &ConfigStore {
        &self.config
    }

    /// Runs `adb <args>` and returns its stdout, empty if the relay could not be run.
    ///
    /// `args` is split on whitespace, so no argument may contain spaces.
    pub fn exec(&self, args: &str) -> String {
        let exe = self.config.bridge_executable();

        let mut argv: Vec<String> = Vec::new();
        if let Some(serial) = &self.device {
            argv.push("-s".to_string());
            argv.push(serial.clone());
        }
        argv.extend(args.split_whitespace().map(str::to_string));

        info!("COMMAND: adb {}", argv.join(" "));
        match self.runner.run(&exe, &argv) {
            Ok(stdout) => {
                if !stdout.is_empty() {
                    // Could be an error (no such package) or regular output, the caller decides.
                    info!("STDOUT:\n{}", stdout);
                }
                stdout
            }
            Err(e) => {
                error!("Relay command {} failed: {}", exe.display(), e);
                String::new()
            }
        }
    }

    /// Forwards the remote server port and the first control port from the device to the
    /// offset local ports. Safe to repeat.
    pub fn forward_ports(&self) {
        let pairs = [
            (
                REMOTE_SERVER_PORT + BRIDGE_PORT_OFFSET,
                REMOTE_SERVER_PORT,
            ),
            (
                FIRST_TARGET_CONTROL_PORT + BRIDGE_PORT_OFFSET,
                FIRST_TARGET_CONTROL_PORT,
            ),
        ];

        for (local, remote) in pairs {
            self.exec(&format!("forward tcp:{} tcp:{}", local, remote));
            if let Ok(mut forwards) = self.forwards.lock() {
                forwards.insert((local, remote));
            }
        }
    }

    /// `(local, remote)` forwards requested so far.
    pub fn forwarded_ports(&self) -> Vec<(u16, u16)> {
        self.forwards
            .lock()
            .map(|forwards| forwards.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Lists ready devices in relay order. Forwards ports when at least one device is found,
    /// so an already running server or capture target becomes visible right away.
    pub fn enumerate_devices(&self) -> Vec<String> {
        let stdout = self.exec("devices");
        let devices = parse_device_list(&stdout);

        debug!("Found {} ready device(s)", devices.len());
        if !devices.is_empty() {
            self.forward_ports();
        }
        devices
    }

    /// Restarts the on-device replay server and makes it reachable through the forwards.
    pub fn start_remote_server(&self) {
        self.exec(&format!("shell am force-stop {}", REMOTE_SERVER_PACKAGE));
        self.forward_ports();
        self.disable_capture_layer();
        self.exec(&format!(
            "shell am start -n {}/.Loader -e renderdoccmd remoteserver",
            REMOTE_SERVER_PACKAGE
        ));
    }

    pub fn enable_capture_layer(&self) {
        self.exec(&format!(
            "shell setprop {} {}",
            CAPTURE_LAYER_PROPERTY, CAPTURE_LAYER_NAME
        ));
    }

    pub fn disable_capture_layer(&self) {
        self.exec(&format!("shell setprop {} :", CAPTURE_LAYER_PROPERTY));
    }
}

/// Serials from `adb devices` output whose state is [`DEVICE_READY_MARKER`].
pub fn parse_device_list(stdout: &str) -> Vec<String> {
    let mut seen = BTreeSet::new();
    stdout
        .lines()
        .filter_map(|line| {
            let tokens: Vec<&str> = line.split('\t').collect();
            match tokens.as_slice() {
                [serial, state] if state.trim() == DEVICE_READY_MARKER => {
                    Some(serial.trim().to_string())
                }
                _ => None,
            }
        })
        .filter(|serial| !serial.is_empty() && seen.insert(serial.clone()))
        .collect()
}
