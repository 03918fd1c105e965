//! Wraps a [`Connector`] and one current [`TcpConnection`] (§4.10),
//! grounded on zmuduo's `net/tcp_client.h`/`.cc`.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use crate::config::{ConnectorConfig, TcpClientConfig, TcpConnectionConfig};
use crate::event_loop::EventLoop;
use crate::net::address::Address;
use crate::net::callbacks::{
    noop_connection_callback, noop_message_callback, noop_write_complete_callback, ConnectionCallback,
    HighWaterMarkCallback, MessageCallback, WriteCompleteCallback,
};
use crate::net::connector::Connector;
use crate::net::socket::Socket;
use crate::net::tcp_connection::TcpConnection;
#[cfg(feature = "tls")]
use crate::net::tcp_connection::TlsRole;

pub struct TcpClient {
    event_loop: Arc<EventLoop>,
    self_weak: Weak<TcpClient>,
    config: TcpClientConfig,
    connector: Arc<Connector>,
    connection: Mutex<Option<Arc<TcpConnection>>>,
    retry: AtomicBool,
    next_conn_id: AtomicU64,
    connection_callback: Mutex<ConnectionCallback>,
    message_callback: Mutex<MessageCallback>,
    write_complete_callback: Mutex<WriteCompleteCallback>,
    high_water_mark_callback: Mutex<HighWaterMarkCallback>,
    connection_config: TcpConnectionConfig,
    #[cfg(feature = "tls")]
    tls_context: Option<openssl::ssl::SslContext>,
}

impl TcpClient {
    pub fn new(
        event_loop: Arc<EventLoop>,
        config: TcpClientConfig,
        connection_config: TcpConnectionConfig,
    ) -> crate::error::Result<Arc<TcpClient>> {
        let server_addr = Address::from_socket_addr(config.server_addr);
        let connector = Connector::new(event_loop.clone(), server_addr, ConnectorConfig::default());

        #[cfg(feature = "tls")]
        let tls_context = config
            .tls
            .as_ref()
            .filter(|t| t.enabled)
            .map(crate::tls::client_context)
            .transpose()?;

        let retry = config.retry;
        let client = Arc::new_cyclic(|weak| TcpClient {
            event_loop,
            self_weak: weak.clone(),
            config,
            connector: connector.clone(),
            connection: Mutex::new(None),
            retry: AtomicBool::new(retry),
            next_conn_id: AtomicU64::new(1),
            connection_callback: Mutex::new(noop_connection_callback()),
            message_callback: Mutex::new(noop_message_callback()),
            write_complete_callback: Mutex::new(noop_write_complete_callback()),
            high_water_mark_callback: Mutex::new(Arc::new(|_conn, _len| {})),
            connection_config,
            #[cfg(feature = "tls")]
            tls_context,
        });

        let weak = client.self_weak.clone();
        connector.set_new_connection_callback(Arc::new(move |socket, peer| {
            if let Some(client) = weak.upgrade() {
                client.new_connection(socket, peer);
            }
        }));

        Ok(client)
    }

    pub fn name(&self) -> &str {
        &self.config.name
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

    /// A disconnect will trigger a reconnect through the connector's
    /// backoff from then on (§4.10).
    pub fn enable_retry(&self) {
        self.retry.store(true, Ordering::Release);
    }

    pub fn connection(&self) -> Option<Arc<TcpConnection>> {
        self.connection.lock().clone()
    }

    pub fn is_connected(&self) -> bool {
        self.connection.lock().as_ref().map(|c| c.connected()).unwrap_or(false)
    }

    pub fn connect(self: &Arc<Self>) {
        self.connector.start();
    }

    /// Shuts down the current connection but preserves the client object
    /// (§4.10); does not by itself disable retry.
    pub fn disconnect(self: &Arc<Self>) {
        if let Some(conn) = self.connection() {
            conn.shutdown();
        }
    }

    pub fn stop(self: &Arc<Self>) {
        self.connector.stop();
    }

    fn new_connection(self: &Arc<Self>, socket: Socket, peer: Address) {
        self.event_loop.assert_in_loop_thread();

        let id = self.next_conn_id.fetch_add(1, Ordering::Relaxed);
        let name = format!("{}-conn#{}", self.config.name, id);
        let local_addr = match socket.local_addr() {
            Ok(addr) => Address::from_socket_addr(addr),
            Err(e) => {
                log::error!("tcp_client[{}]: failed to read local addr: {e}", self.config.name);
                return;
            }
        };

        #[cfg(feature = "tls")]
        let conn = match &self.tls_context {
            Some(ctx) => {
                let tls_config = self.config.tls.clone().unwrap_or_default();
                match crate::tls::client_ssl(ctx, &tls_config) {
                    Ok(ssl) => TcpConnection::new_with_tls(
                        self.event_loop.clone(),
                        name,
                        socket,
                        local_addr,
                        peer,
                        self.connection_config,
                        ssl,
                        TlsRole::Client,
                    ),
                    Err(e) => {
                        log::error!("tcp_client[{}]: failed to build client Ssl: {e}", self.config.name);
                        return;
                    }
                }
            }
            None => TcpConnection::new(self.event_loop.clone(), name, socket, local_addr, peer, self.connection_config),
        };
        #[cfg(not(feature = "tls"))]
        let conn = TcpConnection::new(self.event_loop.clone(), name, socket, local_addr, peer, self.connection_config);

        conn.set_connection_callback(self.connection_callback.lock().clone());
        conn.set_message_callback(self.message_callback.lock().clone());
        conn.set_write_complete_callback(self.write_complete_callback.lock().clone());
        conn.set_high_water_mark_callback(self.high_water_mark_callback.lock().clone());

        let client = self.clone();
        conn.set_internal_close_callback(Arc::new(move |conn_ref| {
            let client = client.clone();
            let conn = conn_ref.clone();
            client.event_loop.queue_in_loop(move || client.remove_connection_in_loop(conn));
        }));

        *self.connection.lock() = Some(conn.clone());
        self.event_loop.run_in_loop(move || conn.connect_established());
    }

    fn remove_connection_in_loop(self: Arc<Self>, conn: Arc<TcpConnection>) {
        self.event_loop.assert_in_loop_thread();
        {
            let mut current = self.connection.lock();
            if matches!(&*current, Some(c) if Arc::ptr_eq(c, &conn)) {
                *current = None;
            }
        }
        let sub_loop = conn.event_loop().clone();
        sub_loop.queue_in_loop(move || conn.connect_destroyed());

        if self.retry.load(Ordering::Acquire) {
            self.connector.restart();
        }
    }
}
