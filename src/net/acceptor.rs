//! Owns the listen FD; accepts new connections (§4.6), grounded on
//! zmuduo's `net/acceptor.h`/`.cc`.

use std::fs::File;
use std::io;
use std::os::fd::{AsRawFd, IntoRawFd, RawFd};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use socket2::Domain;

use crate::channel::Channel;
use crate::event_loop::EventLoop;
use crate::net::address::Address;
use crate::net::callbacks::NewConnectionCallback;
use crate::net::socket::Socket;

/// Held open to `/dev/null` so that, on `EMFILE`, the acceptor can close
/// it, accept-and-drop the pending connection to clear it from the
/// backlog, and reopen it — rather than leaving the listen socket's
/// readiness spinning (§4.6, GLOSSARY "Idle-FD rescue").
pub struct Acceptor {
    event_loop: Arc<EventLoop>,
    socket: Socket,
    channel: Arc<Channel>,
    idle_fd: std::sync::Mutex<Option<File>>,
    listening: AtomicBool,
    new_connection_callback: std::sync::Mutex<Option<NewConnectionCallback>>,
}

impl Acceptor {
    pub fn new(event_loop: Arc<EventLoop>, listen_addr: &Address, reuse_port: bool) -> io::Result<Arc<Acceptor>> {
        let domain = match listen_addr {
            Address::V4(_) => Domain::IPV4,
            Address::V6(_) => Domain::IPV6,
            Address::Unix(_) | Address::Unknown(_) => {
                return Err(io::Error::new(io::ErrorKind::InvalidInput, "acceptor requires an IP address"))
            }
        };

        let socket = Socket::new_tcp(domain)?;
        socket.set_reuse_addr(true)?;
        if reuse_port {
            socket.set_reuse_port(true)?;
        }
        socket.bind(listen_addr)?;

        let idle_fd = File::open("/dev/null")?;
        let channel = Arc::new(Channel::new(socket.as_raw_fd()));

        let acceptor = Arc::new(Acceptor {
            event_loop,
            socket,
            channel,
            idle_fd: std::sync::Mutex::new(Some(idle_fd)),
            listening: AtomicBool::new(false),
            new_connection_callback: std::sync::Mutex::new(None),
        });

        {
            let weak = Arc::downgrade(&acceptor);
            acceptor.channel.set_read_callback(Box::new(move |_t| {
                if let Some(acceptor) = weak.upgrade() {
                    acceptor.handle_read();
                }
            }));
        }

        Ok(acceptor)
    }

    pub fn set_new_connection_callback(&self, cb: NewConnectionCallback) {
        *self.new_connection_callback.lock().unwrap() = Some(cb);
    }

    pub fn is_listening(&self) -> bool {
        self.listening.load(Ordering::Acquire)
    }

    pub fn local_addr(&self) -> io::Result<std::net::SocketAddr> {
        self.socket.local_addr()
    }

    /// Backlog of 1024, matching the conventional "large enough to absorb
    /// a burst without the kernel dropping SYNs" default.
    pub fn listen(&self) -> io::Result<()> {
        self.event_loop.assert_in_loop_thread();
        self.socket.listen(1024)?;
        self.listening.store(true, Ordering::Release);
        self.channel.enable_reading(|| {
            let _ = self.event_loop.update_channel(&self.channel);
        });
        Ok(())
    }

    fn handle_read(&self) {
        self.event_loop.assert_in_loop_thread();
        match self.socket.accept() {
            Ok((socket, peer)) => {
                if let Some(cb) = self.new_connection_callback.lock().unwrap().as_ref() {
                    cb(socket, Address::from_socket_addr(peer));
                }
            }
            Err(e) if e.raw_os_error() == Some(libc::EMFILE) => {
                self.rescue_from_emfile();
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {}
            Err(e) => {
                log::error!("acceptor: accept failed: {e}");
            }
        }
    }

    fn rescue_from_emfile(&self) {
        let mut idle_fd_guard = self.idle_fd.lock().unwrap();
        drop(idle_fd_guard.take());
        // One fd now free: accept the pending connection purely to
        // remove it from the kernel's backlog, then drop it immediately.
        if let Ok((socket, _peer)) = self.socket.accept() {
            let raw: RawFd = socket.into_raw_fd();
            drop(crate::net::socket::owned_fd(raw));
        }
        match File::open("/dev/null") {
            Ok(f) => *idle_fd_guard = Some(f),
            Err(e) => log::error!("acceptor: failed to reopen idle fd after EMFILE rescue: {e}"),
        }
    }
}
