//! Discovery of capture targets and hosting of the remote replay endpoint.

pub mod cancellation;
pub mod port_scanner;
pub mod probe;
pub mod remote_server;
pub mod types;

pub use cancellation::CancelToken;
pub use port_scanner::PortScanner;
pub use probe::{ConnectProbe, TcpProbe};
pub use remote_server::{Connection, ConnectionHandler, HandshakeHandler, RemoteServer};
pub use types::{PortWindow, TargetAddress};
