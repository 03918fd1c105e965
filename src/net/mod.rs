//! TCP/UDP sockets, the acceptor/connector state machines, connection
//! objects, and the server/client façades that compose them (§4.6-§4.11).
//! Gated behind the `net` feature (on by default).

pub mod acceptor;
pub mod address;
pub mod callbacks;
pub mod connector;
pub mod socket;
pub mod tcp_client;
pub mod tcp_connection;
pub mod tcp_server;
pub mod udp;

pub use acceptor::Acceptor;
pub use address::Address;
pub use connector::Connector;
pub use socket::Socket;
pub use tcp_client::TcpClient;
pub use tcp_connection::TcpConnection;
pub use tcp_server::TcpServer;
pub use udp::{UdpClient, UdpServer};

#[cfg(feature = "tls")]
pub use tcp_connection::TlsRole;
