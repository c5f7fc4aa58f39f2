//! # Target discovery
//!
//! Targets that can be captured expose a control endpoint on one port of a small, fixed
//! window. Discovery walks that window with a short connect timeout instead of asking a
//! directory service. The scan is resumable: feeding the previous hit back in as the cursor
//! continues after it, so repeated calls enumerate every live target in ascending order.
//!
//! ```rust,no_run
//! use capbridge::network::port_scanner::PortScanner;
//!
//! let scanner = PortScanner::new();
//! let mut cursor = 0;
//! while let Some(port) = scanner.next_target("localhost", cursor) {
//!     println!("target control endpoint on {}", port);
//!     cursor = port;
//! }
//! ```
//!
//! Worst case a full scan costs `window length x 250 ms`. A port counts as a target as soon as
//! it accepts a connection; see [`ConnectProbe`] for what that does not prove.

use super::probe::{ConnectProbe, TcpProbe};
use super::types::{PortWindow, TargetAddress, BRIDGE_PORT_OFFSET};
use log::debug;
use std::time::Duration;

/// Connect timeout for each probed port.
pub const PROBE_TIMEOUT: Duration = Duration::from_millis(250);

/// Walks the control-port window of a host. Generic over the probe so tests can fake it.
pub struct PortScanner<P: ConnectProbe = TcpProbe> {
    probe: P,
    window: PortWindow,
    bridge_offset: u16,
    timeout: Duration,
}

impl PortScanner<TcpProbe> {
    pub fn new() -> Self {
        Self::with_probe(TcpProbe)
    }
}

impl Default for PortScanner<TcpProbe> {
    fn default() -> Self {
        Self::new()
    }
}

impl<P: ConnectProbe> PortScanner<P> {
    pub fn with_probe(probe: P) -> Self {
        Self {
            probe,
            window: PortWindow::CONTROL,
            bridge_offset: BRIDGE_PORT_OFFSET,
            timeout: PROBE_TIMEOUT,
        }
    }

    /// Scans a different window. The bridged offset still applies on top of it.
    pub fn with_window(mut self, window: PortWindow) -> Self {
        self.window = window;
        self
    }

    /// The window searched for `host`, shifted when the host is a bridged device.
    pub fn window_for(&self, host: &str) -> PortWindow {
        if TargetAddress::resolve(host, 0).is_bridged() {
            self.window.shifted(self.bridge_offset)
        } else {
            self.window
        }
    }

    /// Returns the first live port after `last_found`, or `None` once the window is exhausted.
    ///
    /// `last_found == 0` starts from the beginning of the window. A cursor below the window
    /// (for instance an unshifted port handed in for a bridged host) also starts at the
    /// beginning.
    pub fn next_target(&self, host: &str, last_found: u16) -> Option<u16> {
        let address = TargetAddress::resolve(host, 0);
        let window = self.window_for(host);

        let start = if last_found == 0 {
            window.first
        } else {
            last_found.checked_add(1)?.max(window.first)
        };

        if start > window.last {
            return None;
        }

        for port in start..=window.last {
            if self.probe.probe(&address.host, port, self.timeout) {
                debug!("Found live target at {}:{}", address.host, port);
                return Some(port);
            }
        }

        debug!(
            "No further targets on {} in {}..={}",
            address.host, start, window.last
        );
        None
    }

    /// Every live port in the window, in ascending order.
    pub fn enumerate(&self, host: &str) -> Vec<u16> {
        let mut found = Vec::new();
        let mut cursor = 0;
        while let Some(port) = self.next_target(host, cursor) {
            found.push(port);
            cursor = port;
        }
        found
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;
    use std::net::{Ipv4Addr, TcpListener};
    use std::sync::Mutex;

    /// Answers from a fixed set of live ports and records every probe.
    struct FakeProbe {
        live: BTreeSet<u16>,
        probed: Mutex<Vec<(String, u16)>>,
    }

    impl FakeProbe {
        fn new(live: &[u16]) -> Self {
            Self {
                live: live.iter().copied().collect(),
                probed: Mutex::new(Vec::new()),
            }
        }
    }

    impl ConnectProbe for FakeProbe {
        fn probe(&self, host: &str, port: u16, timeout: Duration) -> bool {
            assert_eq!(timeout, PROBE_TIMEOUT);
            self.probed.lock().unwrap().push((host.to_string(), port));
            self.live.contains(&port)
        }
    }

    #[test]
    fn test_each_port_found_iff_listening() {
        let window = PortWindow::CONTROL;
        for port in window.first..=window.last {
            let cursor = if port == window.first { 0 } else { port - 1 };

            let live = PortScanner::with_probe(FakeProbe::new(&[port]));
            assert_eq!(live.next_target("localhost", cursor), Some(port));

            let dead = PortScanner::with_probe(FakeProbe::new(&[]));
            assert_eq!(dead.next_target("localhost", cursor), None);
        }
    }

    #[test]
    fn test_repeated_scans_strictly_increase_then_stop() {
        let scanner = PortScanner::with_probe(FakeProbe::new(&[38920, 38923, 38927]));

        let mut seen = Vec::new();
        let mut cursor = 0;
        while let Some(port) = scanner.next_target("", cursor) {
            assert!(port > cursor);
            seen.push(port);
            cursor = port;
        }

        assert_eq!(seen, vec![38920, 38923, 38927]);
        assert_eq!(scanner.enumerate(""), seen);
    }

    #[test]
    fn test_bridged_host_shifts_window_and_uses_loopback() {
        let scanner = PortScanner::with_probe(FakeProbe::new(&[38922, 38972]));

        assert_eq!(scanner.next_target("adb:emulator-5554", 0), Some(38972));
        assert_eq!(scanner.next_target("adb:emulator-5554", 38972), None);

        let probed = scanner.probe.probed.lock().unwrap();
        assert!(probed.iter().all(|(host, _)| host == "127.0.0.1"));
        assert!(probed.iter().all(|(_, port)| (38970..=38977).contains(port)));
        assert_eq!(probed.len(), 3 + 5);
    }

    #[test]
    fn test_unshifted_cursor_for_bridged_host_starts_at_window() {
        let scanner = PortScanner::with_probe(FakeProbe::new(&[38921, 38970]));
        assert_eq!(scanner.next_target("adb:", 38920), Some(38970));
    }

    #[test]
    fn test_cursor_past_window_returns_none_without_probing() {
        let scanner = PortScanner::with_probe(FakeProbe::new(&[38920]));
        assert_eq!(scanner.next_target("localhost", 38927), None);
        assert_eq!(scanner.next_target("localhost", u16::MAX), None);
        assert!(scanner.probe.probed.lock().unwrap().is_empty());
    }

    #[test]
    fn test_real_listener_in_custom_window() {
        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).unwrap();
        let port = listener.local_addr().unwrap().port();

        let scanner = PortScanner::new().with_window(PortWindow::new(port, port));
        assert_eq!(scanner.next_target("127.0.0.1", 0), Some(port));
        assert_eq!(scanner.next_target("127.0.0.1", port), None);
    }
}
