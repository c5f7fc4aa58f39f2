use log::trace;
use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;

/// Answers "is something accepting connections at `host:port`?".
///
/// A positive answer only means a socket accepted the connection. No handshake confirms what
/// is listening, so an unrelated service that happens to own the port is reported as live.
pub trait ConnectProbe: Send + Sync {
    fn probe(&self, host: &str, port: u16, timeout: Duration) -> bool;
}

/// Plain TCP connect with a timeout. The connection is dropped immediately.
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpProbe;

impl ConnectProbe for TcpProbe {
    fn probe(&self, host: &str, port: u16, timeout: Duration) -> bool {
        let addrs = match (host, port).to_socket_addrs() {
            Ok(addrs) => addrs,
            Err(e) => {
                trace!("Unable to resolve {}:{}: {}", host, port, e);
                return false;
            }
        };

        for addr in addrs {
            match TcpStream::connect_timeout(&addr, timeout) {
                Ok(_) => return true,
                Err(e) => trace!("No listener at {}: {}", addr, e),
            }
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{Ipv4Addr, TcpListener};

    #[test]
    fn test_probe_sees_bound_listener() {
        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).unwrap();
        let port = listener.local_addr().unwrap().port();

        assert!(TcpProbe.probe("127.0.0.1", port, Duration::from_millis(250)));
    }

    #[test]
    fn test_probe_misses_closed_port() {
        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        assert!(!TcpProbe.probe("127.0.0.1", port, Duration::from_millis(250)));
    }
}
