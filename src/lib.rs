//! A single-process, multi-reactor network runtime: an event loop owning
//! one I/O demultiplexer per OS thread, a channel layer binding file
//! descriptors to user callbacks, a timer queue sharing one kernel timer,
//! and TCP/UDP connection objects built on top — the "main reactor plus
//! sub-reactors" model, one loop per thread.
//!
//! The crate is organized the way [`mio`](https://docs.rs/mio) organizes
//! itself: a small `os-poll`-gated core ([`EventLoop`], [`Channel`], the
//! timer queue) that works with bare file descriptors, and a [`net`]
//! module layered on top providing `TcpServer`/`TcpClient`/`UdpServer`/
//! `UdpClient` plus the `Acceptor`/`Connector` state machines that drive
//! them. See [`features`] for what each Cargo feature gates.
//!
//! ```no_run
//! use std::sync::Arc;
//! use reactor_net::config::{TcpConnectionConfig, TcpServerConfig};
//! use reactor_net::EventLoop;
//! use reactor_net::net::TcpServer;
//!
//! let event_loop = EventLoop::new()?;
//! let server = TcpServer::new(
//!     event_loop.clone(),
//!     TcpServerConfig {
//!         listen_addr: "127.0.0.1:0".parse().unwrap(),
//!         name: "echo".to_string(),
//!         reuse_port: false,
//!         thread_num: 0,
//!         tls: None,
//!     },
//!     TcpConnectionConfig::default(),
//! )?;
//! server.set_message_callback(Arc::new(|conn, buf, _t| {
//!     let bytes = buf.retrieve_all_as_vec();
//!     conn.send(bytes);
//! }));
//! server.start()?;
//! # Ok::<(), reactor_net::error::Error>(())
//! ```

#![cfg_attr(docsrs, feature(doc_cfg))]
#![warn(rust_2018_idioms)]

#[macro_use]
mod macros;

mod buffer;
mod channel;
pub mod config;
pub mod error;
mod event;
mod event_loop;
mod event_loop_thread;
mod event_loop_thread_pool;
mod interest;
pub mod logging;
#[cfg(feature = "net")]
pub mod net;
mod poller;
#[cfg(all(unix, feature = "os-poll"))]
mod sys;
mod timer;
#[cfg(feature = "tls")]
pub mod tls;
mod token;

pub use buffer::Buffer;
pub use channel::Channel;
pub use event::{Event, Events};
pub use event_loop::EventLoop;
pub use event_loop_thread::EventLoopThread;
pub use event_loop_thread_pool::EventLoopThreadPool;
pub use interest::Interest;
pub use timer::TimerId;
pub use token::Token;

/// Documents what each Cargo feature of this crate enables.
///
/// This module carries no items of its own; it exists purely so
/// `cargo doc` has a page to link feature-gated items against, the same
/// convention mio uses for its own `features` module.
///
/// - **`os-poll`** (default): builds the [`EventLoop`]/`Poller`
///   machinery backed by a real Linux epoll instance, an eventfd wakeup,
///   and a timerfd-backed timer queue. Without it, only the
///   OS-independent pieces ([`Buffer`], [`Interest`], configuration
///   types) are available.
/// - **`net`** (default, implies `os-poll`): builds the [`net`] module —
///   `Socket`/`Address`, `Acceptor`/`Connector`, `TcpConnection`,
///   `TcpServer`/`TcpClient`, `UdpServer`/`UdpClient`.
/// - **`tls`** (default, implies `net`): builds the OpenSSL-backed TLS
///   integration on `TcpConnection`/`TcpServer`/`TcpClient` (see
///   [`tls`](crate::tls), when built).
pub mod features {}
