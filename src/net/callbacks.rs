//! Type aliases for the "callback soup" (§9): the five-member handler
//! capability set a `TcpConnection` carries, plus the narrower callbacks
//! `Acceptor`/`Connector` use to hand off a freshly-accepted or
//! freshly-connected socket.
//!
//! Represented as `Arc<dyn Fn(...) + Send + Sync>` rather than per-instance
//! closures: the same handler set is installed on every connection a
//! `TcpServer`/`TcpClient` creates, and connections on different sub-loop
//! threads may invoke it concurrently, so it must be both shareable and
//! safe to call from any of them.

use std::sync::Arc;
use std::time::Instant;

use crate::buffer::Buffer;
use crate::net::address::Address;
use crate::net::socket::Socket;
use crate::net::tcp_connection::TcpConnection;

pub type ConnectionCallback = Arc<dyn Fn(&Arc<TcpConnection>) + Send + Sync>;
pub type MessageCallback = Arc<dyn Fn(&Arc<TcpConnection>, &mut Buffer, Instant) + Send + Sync>;
pub type WriteCompleteCallback = Arc<dyn Fn(&Arc<TcpConnection>) + Send + Sync>;
pub type HighWaterMarkCallback = Arc<dyn Fn(&Arc<TcpConnection>, usize) + Send + Sync>;
pub type CloseCallback = Arc<dyn Fn(&Arc<TcpConnection>) + Send + Sync>;

/// Handed a freshly-`accept`ed or freshly-`connect`ed socket and its peer
/// address; used by both `Acceptor` and `Connector` (§4.6, §4.7).
pub type NewConnectionCallback = Arc<dyn Fn(Socket, Address) + Send + Sync>;

pub fn noop_connection_callback() -> ConnectionCallback {
    Arc::new(|_conn| {})
}

pub fn noop_message_callback() -> MessageCallback {
    Arc::new(|_conn, _buf, _time| {})
}

pub fn noop_write_complete_callback() -> WriteCompleteCallback {
    Arc::new(|_conn| {})
}

pub fn noop_close_callback() -> CloseCallback {
    Arc::new(|_conn| {})
}
