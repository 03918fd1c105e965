//! Outbound non-blocking `connect` with state machine and capped
//! exponential backoff (§4.7), grounded on zmuduo's `net/connector.h`/`.cc`.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use socket2::Domain;

use parking_lot::Mutex;

use crate::channel::Channel;
use crate::config::ConnectorConfig;
use crate::event_loop::EventLoop;
use crate::net::address::Address;
use crate::net::callbacks::NewConnectionCallback;
use crate::net::socket::Socket;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Disconnected,
    Connecting,
    Connected,
}

pub struct Connector {
    event_loop: Arc<EventLoop>,
    server_addr: Address,
    config: ConnectorConfig,
    state: Mutex<State>,
    channel: Mutex<Option<Arc<Channel>>>,
    /// The socket underlying `channel` while a non-blocking connect is in
    /// flight; moved out (and dropped, or handed to the caller) once
    /// `handle_write`/`handle_error` resolve the attempt.
    pending_socket: Mutex<Option<Socket>>,
    /// Cleared by `disconnect()`; checked before every retry/connect
    /// attempt so a disconnect suppresses further retries until the next
    /// explicit `start()` (§4.7, resolved Open Question in SPEC_FULL.md §5).
    connect: AtomicBool,
    retry_delay_ms: AtomicU64,
    new_connection_callback: Mutex<Option<NewConnectionCallback>>,
}

impl Connector {
    pub fn new(event_loop: Arc<EventLoop>, server_addr: Address, config: ConnectorConfig) -> Arc<Connector> {
        Arc::new(Connector {
            event_loop,
            server_addr,
            retry_delay_ms: AtomicU64::new(config.initial_retry_ms),
            config,
            state: Mutex::new(State::Disconnected),
            channel: Mutex::new(None),
            pending_socket: Mutex::new(None),
            connect: AtomicBool::new(false),
            new_connection_callback: Mutex::new(None),
        })
    }

    pub fn set_new_connection_callback(&self, cb: NewConnectionCallback) {
        *self.new_connection_callback.lock() = Some(cb);
    }

    pub fn start(self: &Arc<Self>) {
        self.connect.store(true, Ordering::Release);
        let this = self.clone();
        self.event_loop.run_in_loop(move || this.start_in_loop());
    }

    fn start_in_loop(self: Arc<Self>) {
        self.event_loop.assert_in_loop_thread();
        if self.connect.load(Ordering::Acquire) {
            self.connect_attempt();
        }
    }

    /// Suppresses further retries until the next `start()`, but does not
    /// forcibly tear down an in-flight connect attempt.
    pub fn disconnect(&self) {
        self.connect.store(false, Ordering::Release);
    }

    pub fn stop(self: &Arc<Self>) {
        self.connect.store(false, Ordering::Release);
        let this = self.clone();
        self.event_loop.run_in_loop(move || this.remove_and_reset_channel());
    }

    pub fn restart(self: &Arc<Self>) {
        self.event_loop.assert_in_loop_thread();
        *self.state.lock() = State::Disconnected;
        self.retry_delay_ms.store(self.config.initial_retry_ms, Ordering::Relaxed);
        self.connect.store(true, Ordering::Release);
        self.clone().start_in_loop();
    }

    fn connect_attempt(self: Arc<Self>) {
        let domain = match self.server_addr {
            Address::V4(_) => Domain::IPV4,
            Address::V6(_) => Domain::IPV6,
            _ => {
                log::error!("connector: cannot connect to a non-IP address");
                return;
            }
        };

        let socket = match Socket::new_tcp(domain) {
            Ok(s) => s,
            Err(e) => {
                log::error!("connector: socket creation failed: {e}");
                return;
            }
        };

        *self.state.lock() = State::Connecting;

        match socket.connect(&self.server_addr) {
            Ok(()) => self.connecting(socket),
            Err(e) => match e.raw_os_error() {
                Some(code) if code == libc::EINPROGRESS || code == libc::EINTR || code == libc::EISCONN => {
                    self.connecting(socket)
                }
                Some(code)
                    if code == libc::EAGAIN
                        || code == libc::EADDRINUSE
                        || code == libc::EADDRNOTAVAIL
                        || code == libc::ECONNREFUSED
                        || code == libc::ENETUNREACH =>
                {
                    log::debug!("connector: transient connect error, will retry: {e}");
                    self.retry();
                }
                _ => {
                    log::error!("connector: fatal connect error: {e}");
                }
            },
        }
    }

    fn connecting(self: Arc<Self>, socket: Socket) {
        use std::os::fd::AsRawFd;
        let channel = Arc::new(Channel::new(socket.as_raw_fd()));
        *self.pending_socket.lock() = Some(socket);

        {
            let this = self.clone();
            channel.set_write_callback(Box::new(move || this.clone().handle_write()));
        }
        {
            let this = self.clone();
            channel.set_error_callback(Box::new(move || this.clone().handle_error()));
        }
        *self.channel.lock() = Some(channel.clone());
        channel.enable_writing(|| {
            let _ = self.event_loop.update_channel(&channel);
        });
    }

    fn handle_write(self: Arc<Self>) {
        if *self.state.lock() != State::Connecting {
            return;
        }
        self.remove_and_reset_channel();

        let socket = match self.pending_socket.lock().take() {
            Some(s) => s,
            None => return,
        };

        match socket.take_error() {
            Ok(None) if socket.is_self_connect() => {
                log::warn!("connector: detected self-connect, retrying");
                self.retry();
            }
            Ok(None) => {
                *self.state.lock() = State::Connected;
                self.retry_delay_ms.store(self.config.initial_retry_ms, Ordering::Relaxed);
                if self.connect.load(Ordering::Acquire) {
                    if let Some(peer) = socket.peer_addr().ok().map(Address::from_socket_addr) {
                        if let Some(cb) = self.new_connection_callback.lock().clone() {
                            cb(socket, peer);
                        }
                    }
                }
            }
            Ok(Some(e)) => {
                log::debug!("connector: SO_ERROR after writable: {e}");
                self.retry();
            }
            Err(e) => {
                log::debug!("connector: failed to read SO_ERROR: {e}");
                self.retry();
            }
        }
    }

    fn handle_error(self: Arc<Self>) {
        log::debug!("connector: error event while connecting");
        if *self.state.lock() == State::Connecting {
            self.remove_and_reset_channel();
            self.pending_socket.lock().take();
            self.retry();
        }
    }

    fn retry(self: Arc<Self>) {
        *self.state.lock() = State::Disconnected;
        if !self.connect.load(Ordering::Acquire) {
            return;
        }
        let delay_ms = self.retry_delay_ms.load(Ordering::Relaxed);
        log::info!("connector: retrying {:?} in {delay_ms} ms", self.server_addr);
        let this = self.clone();
        self.event_loop.run_after(
            std::time::Duration::from_millis(delay_ms),
            Box::new(move || {
                this.clone().start_in_loop();
            }),
        );
        let next = (delay_ms * 2).min(self.config.max_retry_ms);
        self.retry_delay_ms.store(next, Ordering::Relaxed);
    }

    fn remove_and_reset_channel(&self) {
        if let Some(channel) = self.channel.lock().take() {
            channel.disable_all(|| {
                let _ = self.event_loop.remove_channel(&channel);
            });
        }
    }
}
