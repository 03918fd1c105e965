//! Façade composing an [`Acceptor`], an [`EventLoopThreadPool`], and a
//! name->connection map (§4.9), grounded on zmuduo's
//! `net/tcp_server.h`/`.cc`.

use std::collections::HashMap;
use std::io;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use crate::config::{EventLoopThreadPoolConfig, TcpConnectionConfig, TcpServerConfig};
use crate::event_loop::EventLoop;
use crate::event_loop_thread_pool::EventLoopThreadPool;
use crate::net::acceptor::Acceptor;
use crate::net::address::Address;
use crate::net::callbacks::{
    noop_connection_callback, noop_message_callback, noop_write_complete_callback, ConnectionCallback,
    HighWaterMarkCallback, MessageCallback, WriteCompleteCallback,
};
use crate::net::socket::Socket;
use crate::net::tcp_connection::TcpConnection;
#[cfg(feature = "tls")]
use crate::net::tcp_connection::TlsRole;

pub struct TcpServer {
    event_loop: Arc<EventLoop>,
    self_weak: Weak<TcpServer>,
    config: TcpServerConfig,
    acceptor: Arc<Acceptor>,
    thread_pool: Mutex<Option<Arc<EventLoopThreadPool>>>,
    connections: Mutex<HashMap<String, Arc<TcpConnection>>>,
    next_conn_id: AtomicU64,
    started: AtomicBool,
    connection_callback: Mutex<ConnectionCallback>,
    message_callback: Mutex<MessageCallback>,
    write_complete_callback: Mutex<WriteCompleteCallback>,
    high_water_mark_callback: Mutex<HighWaterMarkCallback>,
    connection_config: TcpConnectionConfig,
    #[cfg(feature = "tls")]
    tls_context: Option<openssl::ssl::SslContext>,
}

impl TcpServer {
    pub fn new(
        event_loop: Arc<EventLoop>,
        config: TcpServerConfig,
        connection_config: TcpConnectionConfig,
    ) -> crate::error::Result<Arc<TcpServer>> {
        let listen_addr = Address::from_socket_addr(config.listen_addr);
        let acceptor = Acceptor::new(event_loop.clone(), &listen_addr, config.reuse_port)?;

        #[cfg(feature = "tls")]
        let tls_context = config
            .tls
            .as_ref()
            .map(crate::tls::server_context)
            .transpose()?;

        let server = Arc::new_cyclic(|weak| TcpServer {
            event_loop,
            self_weak: weak.clone(),
            config,
            acceptor,
            thread_pool: Mutex::new(None),
            connections: Mutex::new(HashMap::new()),
            next_conn_id: AtomicU64::new(1),
            started: AtomicBool::new(false),
            connection_callback: Mutex::new(noop_connection_callback()),
            message_callback: Mutex::new(noop_message_callback()),
            write_complete_callback: Mutex::new(noop_write_complete_callback()),
            high_water_mark_callback: Mutex::new(Arc::new(|_conn, _len| {})),
            connection_config,
            #[cfg(feature = "tls")]
            tls_context,
        });

        let weak = server.self_weak.clone();
        server
            .acceptor
            .set_new_connection_callback(Arc::new(move |socket, peer| {
                if let Some(server) = weak.upgrade() {
                    server.new_connection(socket, peer);
                }
            }));

        Ok(server)
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn local_addr(&self) -> io::Result<std::net::SocketAddr> {
        self.acceptor.local_addr()
    }

    pub fn set_connection_callback(&self, cb: ConnectionCallback) {
        *self.connection_callback.lock() = cb;
    }

    pub fn set_message_callback(&self, cb: MessageCallback) {
        *self.message_callback.lock() = cb;
    }

    pub fn set_write_complete_callback(&self, cb: WriteCompleteCallback) {
        *self.write_complete_callback.lock() = cb;
    }

    pub fn set_high_water_mark_callback(&self, cb: HighWaterMarkCallback) {
        *self.high_water_mark_callback.lock() = cb;
    }

    /// Starts the thread pool and, on the main loop, `Acceptor::listen`
    /// (§4.9). Idempotent.
    pub fn start(self: &Arc<Self>) -> io::Result<()> {
        if self.started.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        let pool = EventLoopThreadPool::new(
            self.event_loop.clone(),
            EventLoopThreadPoolConfig {
                thread_num: self.config.thread_num,
            },
        )?;
        *self.thread_pool.lock() = Some(Arc::new(pool));

        let acceptor = self.acceptor.clone();
        let name = self.config.name.clone();
        self.event_loop.run_in_loop(move || {
            if let Err(e) = acceptor.listen() {
                log::error!("tcp_server[{name}]: listen failed: {e}");
            }
        });
        Ok(())
    }

    /// Runs on the main loop (`Acceptor::handle_read` invokes this
    /// synchronously): picks the next sub-loop round-robin, builds a
    /// `TcpConnection` on it, installs the user callbacks plus an internal
    /// close handler that bounces back here to erase the map entry and
    /// schedule `connect_destroyed` (§4.9).
    fn new_connection(self: &Arc<Self>, socket: Socket, peer: Address) {
        self.event_loop.assert_in_loop_thread();

        let sub_loop = self
            .thread_pool
            .lock()
            .as_ref()
            .map(|pool| pool.get_next_loop())
            .unwrap_or_else(|| self.event_loop.clone());

        let id = self.next_conn_id.fetch_add(1, Ordering::Relaxed);
        let name = format!("{}-conn#{}", self.config.name, id);
        let local_addr = match socket.local_addr() {
            Ok(addr) => Address::from_socket_addr(addr),
            Err(e) => {
                log::error!("tcp_server[{}]: failed to read local addr of new connection: {e}", self.config.name);
                return;
            }
        };

        #[cfg(feature = "tls")]
        let conn = match &self.tls_context {
            Some(ctx) => match crate::tls::server_ssl(ctx) {
                Ok(ssl) => TcpConnection::new_with_tls(
                    sub_loop.clone(),
                    name,
                    socket,
                    local_addr,
                    peer,
                    self.connection_config,
                    ssl,
                    TlsRole::Server,
                ),
                Err(e) => {
                    log::error!("tcp_server[{}]: failed to build server Ssl: {e}", self.config.name);
                    return;
                }
            },
            None => TcpConnection::new(sub_loop.clone(), name, socket, local_addr, peer, self.connection_config),
        };
        #[cfg(not(feature = "tls"))]
        let conn = TcpConnection::new(sub_loop.clone(), name, socket, local_addr, peer, self.connection_config);

        conn.set_connection_callback(self.connection_callback.lock().clone());
        conn.set_message_callback(self.message_callback.lock().clone());
        conn.set_write_complete_callback(self.write_complete_callback.lock().clone());
        conn.set_high_water_mark_callback(self.high_water_mark_callback.lock().clone());

        let server = self.clone();
        conn.set_internal_close_callback(Arc::new(move |conn_ref| {
            let server = server.clone();
            let conn = conn_ref.clone();
            server.event_loop.queue_in_loop(move || server.remove_connection_in_loop(conn));
        }));

        self.connections.lock().insert(conn.name().to_string(), conn.clone());

        sub_loop.run_in_loop(move || conn.connect_established());
    }

    fn remove_connection_in_loop(self: Arc<Self>, conn: Arc<TcpConnection>) {
        self.event_loop.assert_in_loop_thread();
        self.connections.lock().remove(conn.name());
        let sub_loop = conn.event_loop().clone();
        sub_loop.queue_in_loop(move || conn.connect_destroyed());
    }
}
