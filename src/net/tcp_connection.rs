//! The central per-connection entity (§4.8), grounded on zmuduo's
//! `net/tcp_connection.h`/`.cc`. Owns its socket and channel exclusively;
//! shared (via `Arc`) with whatever scheduled the work that references it —
//! the server/client's connection map, and any in-flight `run_in_loop`
//! functor capturing a clone.

use std::any::Any;
use std::io::{self, Write};
use std::os::fd::AsRawFd;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Instant;

use parking_lot::Mutex;

use crate::buffer::Buffer;
use crate::channel::Channel;
use crate::config::TcpConnectionConfig;
use crate::event_loop::EventLoop;
use crate::net::address::Address;
use crate::net::callbacks::{
    noop_close_callback, noop_connection_callback, noop_message_callback, noop_write_complete_callback,
    CloseCallback, ConnectionCallback, HighWaterMarkCallback, MessageCallback, WriteCompleteCallback,
};
use crate::net::socket::Socket;
#[cfg(feature = "tls")]
use crate::net::socket::RawFdStream;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConnState {
    Connecting,
    Connected,
    Disconnecting,
    Disconnected,
}

/// Which side of the handshake this connection performs — decided by
/// whoever accepted/dialed the underlying socket (§4.8 "TLS integration").
#[cfg(feature = "tls")]
#[derive(Debug, Clone, Copy)]
pub enum TlsRole {
    Server,
    Client,
}

#[cfg(feature = "tls")]
enum TlsState {
    Handshaking(openssl::ssl::MidHandshakeSslStream<RawFdStream>),
    Established(openssl::ssl::SslStream<RawFdStream>),
    Failed,
}

pub struct TcpConnection {
    event_loop: Arc<EventLoop>,
    name: String,
    self_weak: Weak<TcpConnection>,
    socket: Socket,
    channel: Arc<Channel>,
    local_addr: Address,
    peer_addr: Address,
    state: Mutex<ConnState>,
    input_buffer: Mutex<Buffer>,
    output_buffer: Mutex<Buffer>,
    high_water_mark: usize,
    context: Mutex<Option<Box<dyn Any + Send>>>,
    connection_callback: Mutex<ConnectionCallback>,
    message_callback: Mutex<MessageCallback>,
    write_complete_callback: Mutex<WriteCompleteCallback>,
    high_water_mark_callback: Mutex<HighWaterMarkCallback>,
    close_callback: Mutex<CloseCallback>,
    /// Installed by `TcpServer`/`TcpClient`, not the application: erases
    /// this connection from the owner's name->connection map and schedules
    /// `connect_destroyed` (§4.9). Distinct from the user-facing
    /// `close_callback` above, which both still fire, in that order, from
    /// `handle_close`.
    internal_close_callback: Mutex<Option<CloseCallback>>,
    reading: AtomicBool,
    #[cfg(feature = "tls")]
    tls: Option<Mutex<TlsState>>,
}

impl TcpConnection {
    pub fn new(
        event_loop: Arc<EventLoop>,
        name: String,
        socket: Socket,
        local_addr: Address,
        peer_addr: Address,
        config: TcpConnectionConfig,
    ) -> Arc<TcpConnection> {
        #[cfg(feature = "tls")]
        {
            Self::build(event_loop, name, socket, local_addr, peer_addr, config, None)
        }
        #[cfg(not(feature = "tls"))]
        {
            Self::build(event_loop, name, socket, local_addr, peer_addr, config)
        }
    }

    /// Runs the first handshake step inline (`SSL_accept`/`SSL_connect`),
    /// then hands the resulting `Handshaking`/`Established`/`Failed` state
    /// to the connection; subsequent steps are driven by `continue_handshake`
    /// from ordinary read/write events once the channel is registered.
    #[cfg(feature = "tls")]
    pub fn new_with_tls(
        event_loop: Arc<EventLoop>,
        name: String,
        socket: Socket,
        local_addr: Address,
        peer_addr: Address,
        config: TcpConnectionConfig,
        ssl: openssl::ssl::Ssl,
        role: TlsRole,
    ) -> Arc<TcpConnection> {
        let fd = socket.as_raw_fd();
        let stream = RawFdStream::new(fd);
        let initial = match role {
            TlsRole::Server => ssl.accept(stream),
            TlsRole::Client => ssl.connect(stream),
        };
        let state = match initial {
            Ok(established) => TlsState::Established(established),
            Err(openssl::ssl::HandshakeError::WouldBlock(mid)) => TlsState::Handshaking(mid),
            Err(e) => {
                log::error!("tcp_connection[{name}]: initial TLS step failed: {e}");
                TlsState::Failed
            }
        };
        Self::build(event_loop, name, socket, local_addr, peer_addr, config, Some(Mutex::new(state)))
    }

    #[cfg(feature = "tls")]
    fn build(
        event_loop: Arc<EventLoop>,
        name: String,
        socket: Socket,
        local_addr: Address,
        peer_addr: Address,
        config: TcpConnectionConfig,
        tls: Option<Mutex<TlsState>>,
    ) -> Arc<TcpConnection> {
        let fd = socket.as_raw_fd();
        let channel = Arc::new(Channel::new(fd));
        let conn = Arc::new_cyclic(|weak| TcpConnection {
            event_loop,
            name,
            self_weak: weak.clone(),
            socket,
            channel: channel.clone(),
            local_addr,
            peer_addr,
            state: Mutex::new(ConnState::Connecting),
            input_buffer: Mutex::new(Buffer::new()),
            output_buffer: Mutex::new(Buffer::new()),
            high_water_mark: config.high_water_mark,
            context: Mutex::new(None),
            connection_callback: Mutex::new(noop_connection_callback()),
            message_callback: Mutex::new(noop_message_callback()),
            write_complete_callback: Mutex::new(noop_write_complete_callback()),
            high_water_mark_callback: Mutex::new(Arc::new(|_conn, _len| {})),
            close_callback: Mutex::new(noop_close_callback()),
            internal_close_callback: Mutex::new(None),
            reading: AtomicBool::new(false),
            tls,
        });
        conn.wire_channel_callbacks();
        conn
    }

    #[cfg(not(feature = "tls"))]
    fn build(
        event_loop: Arc<EventLoop>,
        name: String,
        socket: Socket,
        local_addr: Address,
        peer_addr: Address,
        config: TcpConnectionConfig,
    ) -> Arc<TcpConnection> {
        let fd = socket.as_raw_fd();
        let channel = Arc::new(Channel::new(fd));
        let conn = Arc::new_cyclic(|weak| TcpConnection {
            event_loop,
            name,
            self_weak: weak.clone(),
            socket,
            channel: channel.clone(),
            local_addr,
            peer_addr,
            state: Mutex::new(ConnState::Connecting),
            input_buffer: Mutex::new(Buffer::new()),
            output_buffer: Mutex::new(Buffer::new()),
            high_water_mark: config.high_water_mark,
            context: Mutex::new(None),
            connection_callback: Mutex::new(noop_connection_callback()),
            message_callback: Mutex::new(noop_message_callback()),
            write_complete_callback: Mutex::new(noop_write_complete_callback()),
            high_water_mark_callback: Mutex::new(Arc::new(|_conn, _len| {})),
            close_callback: Mutex::new(noop_close_callback()),
            internal_close_callback: Mutex::new(None),
            reading: AtomicBool::new(false),
        });
        conn.wire_channel_callbacks();
        conn
    }

    fn wire_channel_callbacks(self: &Arc<Self>) {
        {
            let weak = self.self_weak.clone();
            self.channel.set_read_callback(Box::new(move |t| {
                if let Some(conn) = weak.upgrade() {
                    conn.handle_read(t);
                }
            }));
        }
        {
            let weak = self.self_weak.clone();
            self.channel.set_write_callback(Box::new(move || {
                if let Some(conn) = weak.upgrade() {
                    conn.handle_write();
                }
            }));
        }
        {
            let weak = self.self_weak.clone();
            self.channel.set_close_callback(Box::new(move || {
                if let Some(conn) = weak.upgrade() {
                    conn.handle_close();
                }
            }));
        }
        {
            let weak = self.self_weak.clone();
            self.channel.set_error_callback(Box::new(move || {
                if let Some(conn) = weak.upgrade() {
                    conn.handle_error();
                }
            }));
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn event_loop(&self) -> &Arc<EventLoop> {
        &self.event_loop
    }

    pub fn local_addr(&self) -> &Address {
        &self.local_addr
    }

    pub fn peer_addr(&self) -> &Address {
        &self.peer_addr
    }

    pub fn connected(&self) -> bool {
        matches!(*self.state.lock(), ConnState::Connected)
    }

    pub fn disconnected(&self) -> bool {
        matches!(*self.state.lock(), ConnState::Disconnected)
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

    pub fn set_close_callback(&self, cb: CloseCallback) {
        *self.close_callback.lock() = cb;
    }

    pub(crate) fn set_internal_close_callback(&self, cb: CloseCallback) {
        *self.internal_close_callback.lock() = Some(cb);
    }

    pub fn set_context(&self, ctx: Box<dyn Any + Send>) {
        *self.context.lock() = Some(ctx);
    }

    /// Reads back the opaque per-connection value the application attached
    /// via `set_context` (§9 "Context blob on connection").
    pub fn with_context<T: 'static, R>(&self, f: impl FnOnce(Option<&T>) -> R) -> R {
        let guard = self.context.lock();
        f(guard.as_ref().and_then(|b| b.downcast_ref::<T>()))
    }

    pub fn set_tcp_no_delay(&self, value: bool) -> io::Result<()> {
        self.socket.set_tcp_nodelay(value)
    }

    #[cfg(target_os = "linux")]
    pub fn tcp_info(&self) -> io::Result<libc::tcp_info> {
        self.socket.tcp_info()
    }

    pub fn is_reading(&self) -> bool {
        self.reading.load(Ordering::Acquire)
    }

    pub fn start_read(self: &Arc<Self>) {
        let this = self.clone();
        self.event_loop.run_in_loop(move || this.start_read_in_loop());
    }

    fn start_read_in_loop(self: Arc<Self>) {
        self.event_loop.assert_in_loop_thread();
        if !self.reading.swap(true, Ordering::AcqRel) || !self.channel.is_reading() {
            let channel = self.channel.clone();
            channel.enable_reading(|| {
                let _ = self.event_loop.update_channel(&channel);
            });
        }
    }

    pub fn stop_read(self: &Arc<Self>) {
        let this = self.clone();
        self.event_loop.run_in_loop(move || this.stop_read_in_loop());
    }

    fn stop_read_in_loop(self: Arc<Self>) {
        self.event_loop.assert_in_loop_thread();
        if self.reading.swap(false, Ordering::AcqRel) && self.channel.is_reading() {
            let channel = self.channel.clone();
            channel.disable_reading(|| {
                let _ = self.event_loop.update_channel(&channel);
            });
        }
    }

    /// Ties the channel, transitions to `Connected`, enables reading, and
    /// invokes `onConnection` — or, with TLS, kicks off the handshake
    /// sub-state-machine first and defers `onConnection` until it completes
    /// (§4.8).
    pub fn connect_established(self: &Arc<Self>) {
        self.event_loop.assert_in_loop_thread();
        {
            let mut state = self.state.lock();
            assert!(matches!(*state, ConnState::Connecting));
            *state = ConnState::Connected;
        }
        self.channel.tie(self.self_weak.clone() as Weak<dyn Any + Send + Sync>);

        #[cfg(feature = "tls")]
        if self.tls.is_some() {
            self.clone().continue_handshake();
            return;
        }

        self.reading.store(true, Ordering::Release);
        let channel = self.channel.clone();
        channel.enable_reading(|| {
            let _ = self.event_loop.update_channel(&channel);
        });
        self.fire_on_connection();
    }

    /// Called by the owning server/client once the connection has been
    /// removed from its bookkeeping map: disables the channel, drops it
    /// from the poller, and fires `onConnection` one last time in the
    /// disconnected state (§4.8).
    pub fn connect_destroyed(self: &Arc<Self>) {
        self.event_loop.assert_in_loop_thread();
        if matches!(*self.state.lock(), ConnState::Connected) {
            *self.state.lock() = ConnState::Disconnected;
            self.channel.disable_all(|| {
                let _ = self.event_loop.update_channel(&self.channel);
            });
        }
        let _ = self.event_loop.remove_channel(&self.channel);
        self.fire_on_connection();
    }

    fn fire_on_connection(self: &Arc<Self>) {
        let cb = self.connection_callback.lock().clone();
        cb(self);
    }

    pub fn send(self: &Arc<Self>, data: impl Into<Vec<u8>>) {
        let data = data.into();
        let this = self.clone();
        self.event_loop.run_in_loop(move || this.send_in_loop(data));
    }

    fn send_in_loop(self: Arc<Self>, data: Vec<u8>) {
        self.event_loop.assert_in_loop_thread();
        if matches!(*self.state.lock(), ConnState::Disconnected) {
            log::warn!("tcp_connection[{}]: send after disconnect, dropping {} bytes", self.name, data.len());
            return;
        }

        let mut offset = 0;
        let mut fatal = false;

        if !self.channel.is_writing() && self.output_buffer.lock().readable_len() == 0 {
            let (n, err) = self.write_chunk(&data);
            offset = n;
            if let Some(e) = &err {
                if e.kind() != io::ErrorKind::WouldBlock {
                    log::error!("tcp_connection[{}]: send write error: {e}", self.name);
                    fatal = is_fatal_write_error(e);
                }
            } else if offset == data.len() && !data.is_empty() {
                let cb = self.write_complete_callback.lock().clone();
                let this = self.clone();
                self.event_loop.queue_in_loop(move || cb(&this));
            }
        }

        if fatal {
            self.handle_close();
            return;
        }

        let remaining = &data[offset..];
        if !remaining.is_empty() {
            let new_len = {
                let mut output = self.output_buffer.lock();
                output.write(remaining);
                output.readable_len()
            };
            let old_len = new_len - remaining.len();
            if old_len < self.high_water_mark && new_len >= self.high_water_mark {
                let cb = self.high_water_mark_callback.lock().clone();
                let this = self.clone();
                self.event_loop.queue_in_loop(move || cb(&this, new_len));
            }
            if !self.channel.is_writing() {
                let channel = self.channel.clone();
                channel.enable_writing(|| {
                    let _ = self.event_loop.update_channel(&channel);
                });
            }
        }
    }

    /// Sets `Disconnecting`; the write side is half-closed immediately if
    /// nothing is queued, else deferred until `handle_write` drains the
    /// output buffer (§4.8).
    pub fn shutdown(self: &Arc<Self>) {
        let this = self.clone();
        self.event_loop.run_in_loop(move || this.shutdown_in_loop());
    }

    fn shutdown_in_loop(self: Arc<Self>) {
        self.event_loop.assert_in_loop_thread();
        if matches!(*self.state.lock(), ConnState::Connected) {
            *self.state.lock() = ConnState::Disconnecting;
            if !self.channel.is_writing() {
                self.shutdown_write_side();
            }
        }
    }

    fn shutdown_write_side(&self) {
        #[cfg(feature = "tls")]
        self.send_tls_close_notify();
        if let Err(e) = self.socket.shutdown_write() {
            log::debug!("tcp_connection[{}]: shutdown(write) failed: {e}", self.name);
        }
    }

    #[cfg(feature = "tls")]
    fn send_tls_close_notify(&self) {
        if let Some(tls) = &self.tls {
            if let TlsState::Established(stream) = &mut *tls.lock() {
                let _ = stream.shutdown();
            }
        }
    }

    /// Synchronous teardown via `handle_close`, callable from any thread
    /// (§4.8).
    pub fn force_close(self: &Arc<Self>) {
        if !matches!(*self.state.lock(), ConnState::Disconnected) {
            *self.state.lock() = ConnState::Disconnecting;
            let this = self.clone();
            self.event_loop.queue_in_loop(move || this.force_close_in_loop());
        }
    }

    fn force_close_in_loop(self: Arc<Self>) {
        self.event_loop.assert_in_loop_thread();
        if !matches!(*self.state.lock(), ConnState::Disconnected) {
            self.handle_close();
        }
    }

    fn handle_read(self: Arc<Self>, receive_time: Instant) {
        self.event_loop.assert_in_loop_thread();

        #[cfg(feature = "tls")]
        if self.tls_is_handshaking() {
            self.continue_handshake();
            return;
        }

        if !self.reading.load(Ordering::Acquire) {
            return;
        }

        let (n, err) = self.read_into_input();
        if n > 0 {
            let cb = self.message_callback.lock().clone();
            let mut input = self.input_buffer.lock();
            cb(&self, &mut input, receive_time);
        } else if let Some(e) = &err {
            if e.kind() != io::ErrorKind::WouldBlock {
                log::error!("tcp_connection[{}]: read error: {e}", self.name);
                self.handle_error();
            }
        } else {
            self.handle_close();
        }
    }

    fn handle_write(self: Arc<Self>) {
        self.event_loop.assert_in_loop_thread();

        #[cfg(feature = "tls")]
        if self.tls_is_handshaking() {
            self.continue_handshake();
            return;
        }

        if !self.channel.is_writing() {
            log::trace!("tcp_connection[{}]: spurious write event while idle", self.name);
            return;
        }

        let chunk = self.output_buffer.lock().peek().to_vec();
        let (n, err) = self.write_chunk(&chunk);
        if let Some(e) = err {
            log::error!("tcp_connection[{}]: write error: {e}", self.name);
            if is_fatal_write_error(&e) {
                self.handle_close();
            }
            return;
        }

        self.output_buffer.lock().retrieve(n);
        if self.output_buffer.lock().readable_len() == 0 {
            let channel = self.channel.clone();
            channel.disable_writing(|| {
                let _ = self.event_loop.update_channel(&channel);
            });
            let cb = self.write_complete_callback.lock().clone();
            let this = self.clone();
            self.event_loop.queue_in_loop(move || cb(&this));
            if matches!(*self.state.lock(), ConnState::Disconnecting) {
                self.shutdown_write_side();
            }
        }
    }

    fn handle_error(self: Arc<Self>) {
        match self.socket.take_error() {
            Ok(Some(e)) => log::error!("tcp_connection[{}]: SO_ERROR: {e}", self.name),
            Err(e) => log::error!("tcp_connection[{}]: failed to read SO_ERROR: {e}", self.name),
            Ok(None) => {}
        }
        self.handle_close();
    }

    fn handle_close(self: Arc<Self>) {
        self.event_loop.assert_in_loop_thread();
        if matches!(*self.state.lock(), ConnState::Disconnected) {
            return;
        }
        *self.state.lock() = ConnState::Disconnected;
        self.channel.disable_all(|| {
            let _ = self.event_loop.update_channel(&self.channel);
        });

        let on_close = self.close_callback.lock().clone();
        on_close(&self);

        if let Some(internal) = self.internal_close_callback.lock().clone() {
            internal(&self);
        }
    }

    #[cfg(feature = "tls")]
    fn tls_is_handshaking(&self) -> bool {
        match &self.tls {
            Some(tls) => matches!(&*tls.lock(), TlsState::Handshaking(_)),
            None => false,
        }
    }

    /// Drives one more step of `SSL_do_handshake`: on success, enables
    /// reading and fires `onConnection` as if the handshake had never
    /// happened; on `WANT_READ`/`WANT_WRITE`, swaps in the right interest
    /// and waits for the next event (§4.8).
    #[cfg(feature = "tls")]
    fn continue_handshake(self: Arc<Self>) {
        self.event_loop.assert_in_loop_thread();
        let tls = match &self.tls {
            Some(tls) => tls,
            None => return,
        };
        let current = std::mem::replace(&mut *tls.lock(), TlsState::Failed);
        match current {
            TlsState::Handshaking(mid) => match mid.handshake() {
                Ok(established) => {
                    *tls.lock() = TlsState::Established(established);
                    self.reading.store(true, Ordering::Release);
                    let channel = self.channel.clone();
                    // A `WANT_WRITE` step along the way may have left
                    // write-interest enabled; clear it here so a completed
                    // handshake with nothing queued doesn't spuriously wake
                    // `handle_write` (it would schedule an unearned
                    // `onWriteComplete`).
                    channel.disable_writing(|| {});
                    channel.enable_reading(|| {
                        let _ = self.event_loop.update_channel(&channel);
                    });
                    self.fire_on_connection();
                }
                Err(openssl::ssl::HandshakeError::WouldBlock(mid)) => {
                    let wants_write = mid.error().code() == openssl::ssl::ErrorCode::WANT_WRITE;
                    *tls.lock() = TlsState::Handshaking(mid);
                    let channel = self.channel.clone();
                    if wants_write {
                        channel.enable_writing(|| {
                            let _ = self.event_loop.update_channel(&channel);
                        });
                    } else {
                        channel.enable_reading(|| {
                            let _ = self.event_loop.update_channel(&channel);
                        });
                    }
                }
                Err(e) => {
                    log::error!("tcp_connection[{}]: TLS handshake failed: {e}", self.name);
                    *tls.lock() = TlsState::Failed;
                    self.handle_close();
                }
            },
            other => *tls.lock() = other,
        }
    }

    fn read_into_input(&self) -> (usize, Option<io::Error>) {
        #[cfg(feature = "tls")]
        if let Some(result) = self.with_tls_established(|stream| self.input_buffer.lock().read_from_tls(stream)) {
            return result;
        }
        self.input_buffer.lock().read_from_fd(self.channel.fd())
    }

    fn write_chunk(&self, data: &[u8]) -> (usize, Option<io::Error>) {
        #[cfg(feature = "tls")]
        if let Some(result) = self.with_tls_established(|stream| match stream.write(data) {
            Ok(n) => (n, None),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => (0, None),
            Err(e) => (0, Some(e)),
        }) {
            return result;
        }

        let mut stream = crate::net::socket::RawFdStream::new(self.channel.fd());
        match stream.write(data) {
            Ok(n) => (n, None),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => (0, None),
            Err(e) => (0, Some(e)),
        }
    }

    #[cfg(feature = "tls")]
    fn with_tls_established<R>(&self, f: impl FnOnce(&mut openssl::ssl::SslStream<RawFdStream>) -> R) -> Option<R> {
        let tls = self.tls.as_ref()?;
        match &mut *tls.lock() {
            TlsState::Established(stream) => Some(f(stream)),
            _ => None,
        }
    }
}

fn is_fatal_write_error(e: &io::Error) -> bool {
    matches!(e.raw_os_error(), Some(code) if code == libc::EPIPE || code == libc::ECONNRESET)
}
