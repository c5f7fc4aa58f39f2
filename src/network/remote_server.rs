//! # Remote replay server
//!
//! [`RemoteServer::serve`] hosts a replay endpoint for clients on other machines. It binds the
//! listen address, then runs a tokio accept loop until the [`CancelToken`] it was given is
//! cancelled. The loop races each accept against an [`ACCEPT_POLL_INTERVAL`] tick that checks
//! the token, so it returns within one interval of the token being set.
//!
//! ```text
//! ┌─────────────┐   accept    ┌──────────────┐ spawn_blocking ┌───────────────────┐
//! │ Remote      │────────────▶│ RemoteServer │───────────────▶│ ConnectionHandler │
//! │ clients     │             │ (select loop)│ per connection │ (HandshakeHandler)│
//! └─────────────┘             └──────────────┘                └───────────────────┘
//! ```
//!
//! `serve` and `serve_on` block the caller on a runtime of their own. Code that already runs
//! inside tokio uses [`RemoteServer::serve_async`] instead.
//!
//! Passing `None` as the token serves until the process exits. That mode exists for
//! command-line hosts that are stopped by killing them; library callers should always pass a
//! token they control.

use super::cancellation::CancelToken;
use super::types::REMOTE_SERVER_PORT;
use crate::error_handling::types::NetworkError;
use log::{debug, error, info, warn};
use std::io::{self, BufRead, BufReader, ErrorKind, Write};
use std::net::{SocketAddr, TcpListener as StdTcpListener, TcpStream as StdTcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::time::MissedTickBehavior;
use uuid::Uuid;

/// How often the accept loop checks for cancellation while idle.
pub const ACCEPT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Address bound when no listen host is given.
pub const BIND_ALL_HOST: &str = "0.0.0.0";

/// Version spoken by [`HandshakeHandler`].
pub const PROTOCOL_VERSION: u32 = 1;

/// An accepted client connection.
pub struct Connection {
    pub id: Uuid,
    pub peer: SocketAddr,
    pub stream: StdTcpStream,
    /// The server's token; handlers should stop once it is cancelled.
    pub cancel: CancelToken,
}

/// Serves one accepted client. Runs on a blocking thread, so plain socket I/O is fine.
pub trait ConnectionHandler: Send + Sync + 'static {
    fn handle(&self, connection: Connection);
}

/// Accept loop in front of a [`ConnectionHandler`].
///
/// # Examples
///
/// ```rust,no_run
/// use capbridge::network::{CancelToken, RemoteServer};
///
/// let token = CancelToken::new();
/// let stopper = token.clone();
/// std::thread::spawn(move || {
///     std::thread::sleep(std::time::Duration::from_secs(60));
///     stopper.cancel();
/// });
///
/// RemoteServer::new().serve("", 0, Some(&token))?;
/// # Ok::<(), capbridge::error_handling::types::NetworkError>(())
/// ```
pub struct RemoteServer<H: ConnectionHandler = HandshakeHandler> {
    handler: Arc<H>,
    poll_interval: Duration,
}

impl RemoteServer<HandshakeHandler> {
    pub fn new() -> Self {
        Self::with_handler(HandshakeHandler::new())
    }
}

impl Default for RemoteServer<HandshakeHandler> {
    fn default() -> Self {
        Self::new()
    }
}

impl<H: ConnectionHandler> RemoteServer<H> {
    pub fn with_handler(handler: H) -> Self {
        Self {
            handler: Arc::new(handler),
            poll_interval: ACCEPT_POLL_INTERVAL,
        }
    }

    /// Binds `listen_host:port` and serves until `cancel` is set.
    ///
    /// An empty host binds every interface, port `0` means [`REMOTE_SERVER_PORT`].
    ///
    /// # Errors
    ///
    /// - `NetworkError::AddressResolution` if the listen host cannot be resolved
    /// - `NetworkError::BindError` if the address cannot be bound
    /// - `NetworkError::SockError` if the listener cannot be handed to the runtime
    pub fn serve(
        &self,
        listen_host: &str,
        port: u16,
        cancel: Option<&CancelToken>,
    ) -> Result<(), NetworkError> {
        let listener = Self::bind(listen_host, port)?;
        self.serve_on(listener, cancel)
    }

    pub fn bind(listen_host: &str, port: u16) -> Result<StdTcpListener, NetworkError> {
        let host = if listen_host.trim().is_empty() {
            BIND_ALL_HOST
        } else {
            listen_host.trim()
        };
        let port = if port == 0 { REMOTE_SERVER_PORT } else { port };

        let addr = (host, port)
            .to_socket_addrs()
            .map_err(|e| NetworkError::AddressResolution(format!("{}:{}: {}", host, port, e)))?
            .next()
            .ok_or_else(|| NetworkError::AddressResolution(format!("{}:{}", host, port)))?;

        StdTcpListener::bind(addr).map_err(|e| {
            error!("Unable to bind remote server on {}: {}", addr, e);
            NetworkError::BindError(e)
        })
    }

    /// Runs the accept loop on an already bound listener, blocking on a runtime built for it.
    ///
    /// Handlers still running when the loop ends are left to finish on their own; they see
    /// the same token through [`Connection::cancel`].
    pub fn serve_on(
        &self,
        listener: StdTcpListener,
        cancel: Option<&CancelToken>,
    ) -> Result<(), NetworkError> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(NetworkError::SockError)?;

        let result = runtime.block_on(self.serve_on_async(listener, cancel));
        runtime.shutdown_background();
        result
    }

    /// [`serve`](Self::serve) for callers already inside a tokio runtime.
    pub async fn serve_async(
        &self,
        listen_host: &str,
        port: u16,
        cancel: Option<&CancelToken>,
    ) -> Result<(), NetworkError> {
        let listener = Self::bind(listen_host, port)?;
        self.serve_on_async(listener, cancel).await
    }

    pub async fn serve_on_async(
        &self,
        listener: StdTcpListener,
        cancel: Option<&CancelToken>,
    ) -> Result<(), NetworkError> {
        // Never set by anyone: without a caller token the loop runs until the process exits.
        let forever = CancelToken::new();
        let cancel = cancel.unwrap_or(&forever);

        listener.set_nonblocking(true).map_err(NetworkError::SockError)?;
        let listener = TcpListener::from_std(listener).map_err(NetworkError::SockError)?;
        let local = listener.local_addr().map_err(NetworkError::SockError)?;
        info!("Remote server listening on {}", local);

        let mut tick = tokio::time::interval(self.poll_interval);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        while !cancel.is_cancelled() {
            tokio::select! {
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => self.dispatch(stream, peer, cancel),
                    Err(e) => {
                        warn!("Accept failed on {}: {}", local, e);
                        tokio::time::sleep(self.poll_interval).await;
                    }
                },
                _ = tick.tick() => {}
            }
        }

        info!("Remote server on {} shutting down", local);
        Ok(())
    }

    fn dispatch(&self, stream: TcpStream, peer: SocketAddr, cancel: &CancelToken) {
        let id = Uuid::new_v4();
        info!("[{}] Accepted remote client {}", id, peer);

        // Handlers speak a blocking line protocol.
        let stream = match stream.into_std() {
            Ok(stream) => stream,
            Err(e) => {
                warn!("[{}] Unable to detach client socket: {}", id, e);
                return;
            }
        };
        if let Err(e) = stream.set_nonblocking(false) {
            warn!("[{}] Unable to switch client socket to blocking: {}", id, e);
            return;
        }

        let connection = Connection {
            id,
            peer,
            stream,
            cancel: cancel.clone(),
        };
        let handler = Arc::clone(&self.handler);
        tokio::task::spawn_blocking(move || handler.handle(connection));
    }
}

/// Line based greeting protocol guarding the replay endpoint.
///
/// ```text
/// client: HELLO <version>
/// server: OK <version> | BUSY | VERSION_MISMATCH <version>
/// client: PING           server: PONG
/// client: BYE            (connection closed)
/// ```
///
/// Only one client is served at a time; everyone else gets `BUSY`.
pub struct HandshakeHandler {
    busy: Arc<AtomicBool>,
}

impl HandshakeHandler {
    pub fn new() -> Self {
        Self {
            busy: Arc::new(AtomicBool::new(false)),
        }
    }
}

impl Default for HandshakeHandler {
    fn default() -> Self {
        Self::new()
    }
}

/// Releases the single client slot when the session ends, however it ends.
struct BusyGuard(Arc<AtomicBool>);

impl Drop for BusyGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl ConnectionHandler for HandshakeHandler {
    fn handle(&self, connection: Connection) {
        let id = connection.id;
        if let Err(e) = self.run_session(connection) {
            debug!("[{}] Client session ended: {}", id, e);
        }
    }
}

impl HandshakeHandler {
    fn run_session(&self, connection: Connection) -> io::Result<()> {
        let Connection {
            id, stream, cancel, ..
        } = connection;

        stream.set_read_timeout(Some(ACCEPT_POLL_INTERVAL))?;
        let mut writer = stream.try_clone()?;
        let mut reader = BufReader::new(stream);

        let Some(hello) = read_line(&mut reader, &cancel)? else {
            return Ok(());
        };

        let version = hello
            .strip_prefix("HELLO ")
            .and_then(|v| v.trim().parse::<u32>().ok());
        match version {
            Some(PROTOCOL_VERSION) => {}
            _ => {
                warn!("[{}] Rejecting client greeting {:?}", id, hello);
                writeln!(writer, "VERSION_MISMATCH {}", PROTOCOL_VERSION)?;
                return Ok(());
            }
        }

        if self.busy.swap(true, Ordering::SeqCst) {
            info!("[{}] Server busy, turning client away", id);
            writeln!(writer, "BUSY")?;
            return Ok(());
        }
        let _slot = BusyGuard(Arc::clone(&self.busy));

        writeln!(writer, "OK {}", PROTOCOL_VERSION)?;
        info!("[{}] Client session established", id);

        while let Some(line) = read_line(&mut reader, &cancel)? {
            match line.as_str() {
                "PING" => writeln!(writer, "PONG")?,
                "BYE" => break,
                other => debug!("[{}] Ignoring unknown command {:?}", id, other),
            }
        }

        info!("[{}] Client session closed", id);
        Ok(())
    }
}

/// Reads one trimmed line, polling `cancel` across read timeouts. `None` on EOF or cancel.
fn read_line(reader: &mut BufReader<StdTcpStream>, cancel: &CancelToken) -> io::Result<Option<String>> {
    let mut line = String::new();
    loop {
        if cancel.is_cancelled() {
            return Ok(None);
        }
        match reader.read_line(&mut line) {
            Ok(0) => return Ok(None),
            Ok(_) => return Ok(Some(line.trim().to_string())),
            Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => continue,
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{Ipv4Addr, TcpListener, TcpStream};
    use std::time::Instant;

    fn local_listener() -> (TcpListener, SocketAddr) {
        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).unwrap();
        let addr = listener.local_addr().unwrap();
        (listener, addr)
    }

    fn start(listener: TcpListener, token: CancelToken) -> std::thread::JoinHandle<()> {
        std::thread::spawn(move || {
            RemoteServer::new().serve_on(listener, Some(&token)).unwrap();
        })
    }

    fn greet(addr: SocketAddr, hello: &str) -> (TcpStream, BufReader<TcpStream>, String) {
        let mut stream = TcpStream::connect(addr).unwrap();
        stream
            .set_read_timeout(Some(Duration::from_secs(5)))
            .unwrap();
        writeln!(stream, "{}", hello).unwrap();
        let mut reader = BufReader::new(stream.try_clone().unwrap());
        let mut reply = String::new();
        reader.read_line(&mut reply).unwrap();
        (stream, reader, reply.trim().to_string())
    }

    #[test]
    fn test_serve_returns_after_cancel_from_other_thread() {
        let (listener, _) = local_listener();
        let token = CancelToken::new();
        let server = start(listener, token.clone());

        std::thread::sleep(Duration::from_millis(50));
        let cancelled_at = Instant::now();
        token.cancel();
        server.join().unwrap();

        assert!(cancelled_at.elapsed() < ACCEPT_POLL_INTERVAL * 3);
    }

    #[test]
    fn test_handshake_ping_and_busy() {
        let (listener, addr) = local_listener();
        let token = CancelToken::new();
        let server = start(listener, token.clone());

        let (mut first, mut reader, reply) = greet(addr, "HELLO 1");
        assert_eq!(reply, "OK 1");

        writeln!(first, "PING").unwrap();
        let mut pong = String::new();
        reader.read_line(&mut pong).unwrap();
        assert_eq!(pong.trim(), "PONG");

        let (_second, _, reply) = greet(addr, "HELLO 1");
        assert_eq!(reply, "BUSY");

        writeln!(first, "BYE").unwrap();
        drop(first);

        token.cancel();
        server.join().unwrap();
    }

    #[test]
    fn test_version_mismatch_rejected() {
        let (listener, addr) = local_listener();
        let token = CancelToken::new();
        let server = start(listener, token.clone());

        let (_stream, _, reply) = greet(addr, "HELLO 99");
        assert_eq!(reply, format!("VERSION_MISMATCH {}", PROTOCOL_VERSION));

        token.cancel();
        server.join().unwrap();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_async_serve_handshakes_and_stops_on_cancel() {
        let (listener, addr) = local_listener();
        let token = CancelToken::new();
        let server_token = token.clone();
        let server = tokio::spawn(async move {
            RemoteServer::new()
                .serve_on_async(listener, Some(&server_token))
                .await
        });

        let reply = tokio::task::spawn_blocking(move || greet(addr, "HELLO 1").2)
            .await
            .unwrap();
        assert_eq!(reply, "OK 1");

        token.cancel();
        let stopped = tokio::time::timeout(ACCEPT_POLL_INTERVAL * 3, server).await;
        assert!(matches!(stopped, Ok(Ok(Ok(())))));
    }

    #[test]
    fn test_bind_defaults() {
        let listener = RemoteServer::<HandshakeHandler>::bind("127.0.0.1", 0);
        // The default port may legitimately be taken on a developer machine.
        if let Ok(listener) = listener {
            assert_eq!(listener.local_addr().unwrap().port(), REMOTE_SERVER_PORT);
        }
    }
}
