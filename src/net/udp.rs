//! Connectionless peer endpoints re-using `Channel`/`EventLoop` (§4.11),
//! grounded on zmuduo's `net/udp_server.h`/`.cc` and `net/udp_client.h`/
//! `.cc`. No connection state machine, no per-peer buffer compaction, no
//! TLS — a bound `SOCK_DGRAM` socket and a single channel is all either
//! side needs.

use std::io;
use std::os::fd::AsRawFd;
use std::sync::Arc;

use socket2::Domain;

use parking_lot::Mutex;

use crate::channel::Channel;
use crate::event_loop::EventLoop;
use crate::net::address::Address;
use crate::net::socket::Socket;

pub type UdpMessageCallback = Arc<dyn Fn(&mut [u8], usize, Address) + Send + Sync>;

/// A bound UDP endpoint that answers whoever sends to it; `send` targets
/// an explicit peer address each time since there is no persistent
/// connection to remember one (§4.11).
pub struct UdpServer {
    event_loop: Arc<EventLoop>,
    name: String,
    socket: Socket,
    channel: Arc<Channel>,
    message_callback: Mutex<Option<UdpMessageCallback>>,
}

impl UdpServer {
    pub fn new(event_loop: Arc<EventLoop>, listen_addr: &Address, name: String) -> io::Result<Arc<UdpServer>> {
        let domain = match listen_addr {
            Address::V4(_) => Domain::IPV4,
            Address::V6(_) => Domain::IPV6,
            Address::Unix(_) | Address::Unknown(_) => {
                return Err(io::Error::new(io::ErrorKind::InvalidInput, "udp server requires an IP address"))
            }
        };
        let socket = Socket::new_udp(domain)?;
        socket.set_reuse_addr(true)?;
        socket.bind(listen_addr)?;
        let channel = Arc::new(Channel::new(socket.as_raw_fd()));

        let server = Arc::new(UdpServer {
            event_loop,
            name,
            socket,
            channel,
            message_callback: Mutex::new(None),
        });

        let weak = Arc::downgrade(&server);
        server.channel.set_read_callback(Box::new(move |_t| {
            if let Some(server) = weak.upgrade() {
                server.handle_read();
            }
        }));

        Ok(server)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn local_addr(&self) -> io::Result<std::net::SocketAddr> {
        self.socket.local_addr()
    }

    pub fn set_message_callback(&self, cb: UdpMessageCallback) {
        *self.message_callback.lock() = Some(cb);
    }

    /// Enables read interest and starts dispatching `recvfrom`s to the
    /// message callback. Idempotent.
    pub fn start(self: &Arc<Self>) {
        let this = self.clone();
        self.event_loop.run_in_loop(move || {
            this.event_loop.assert_in_loop_thread();
            let channel = this.channel.clone();
            channel.enable_reading(|| {
                let _ = this.event_loop.update_channel(&channel);
            });
        });
    }

    fn handle_read(&self) {
        self.event_loop.assert_in_loop_thread();
        let mut buf = [0u8; 65536];
        match self.socket.recv_from(&mut buf) {
            Ok((n, peer)) => {
                if let Some(cb) = self.message_callback.lock().as_ref() {
                    cb(&mut buf, n, Address::from_socket_addr(peer));
                }
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {}
            Err(e) => log::error!("udp_server[{}]: recvfrom failed: {e}", self.name),
        }
    }

    /// Marshals onto the owning loop and issues a `sendto` (§4.11).
    pub fn send(self: &Arc<Self>, data: impl Into<Vec<u8>>, peer: Address) {
        let data = data.into();
        let this = self.clone();
        self.event_loop.run_in_loop(move || {
            if let Err(e) = this.socket.send_to(&data, &peer) {
                log::error!("udp_server[{}]: sendto failed: {e}", this.name);
            }
        });
    }
}

/// The client side of the same model: a connectionless socket that
/// `send`s to a fixed server address and delivers whatever comes back to
/// a single message callback (§4.11).
pub struct UdpClient {
    event_loop: Arc<EventLoop>,
    name: String,
    server_addr: Address,
    socket: Socket,
    channel: Arc<Channel>,
    message_callback: Mutex<Option<UdpMessageCallback>>,
}

impl UdpClient {
    pub fn new(event_loop: Arc<EventLoop>, server_addr: Address, name: String) -> io::Result<Arc<UdpClient>> {
        let domain = match server_addr {
            Address::V4(_) => Domain::IPV4,
            Address::V6(_) => Domain::IPV6,
            Address::Unix(_) | Address::Unknown(_) => {
                return Err(io::Error::new(io::ErrorKind::InvalidInput, "udp client requires an IP address"))
            }
        };
        let socket = Socket::new_udp(domain)?;
        let channel = Arc::new(Channel::new(socket.as_raw_fd()));

        let client = Arc::new(UdpClient {
            event_loop,
            name,
            server_addr,
            socket,
            channel,
            message_callback: Mutex::new(None),
        });

        let weak = Arc::downgrade(&client);
        client.channel.set_read_callback(Box::new(move |_t| {
            if let Some(client) = weak.upgrade() {
                client.handle_read();
            }
        }));

        Ok(client)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn set_message_callback(&self, cb: UdpMessageCallback) {
        *self.message_callback.lock() = Some(cb);
    }

    pub fn start(self: &Arc<Self>) {
        let this = self.clone();
        self.event_loop.run_in_loop(move || {
            this.event_loop.assert_in_loop_thread();
            let channel = this.channel.clone();
            channel.enable_reading(|| {
                let _ = this.event_loop.update_channel(&channel);
            });
        });
    }

    fn handle_read(&self) {
        self.event_loop.assert_in_loop_thread();
        let mut buf = [0u8; 65536];
        match self.socket.recv_from(&mut buf) {
            Ok((n, peer)) => {
                if let Some(cb) = self.message_callback.lock().as_ref() {
                    cb(&mut buf, n, Address::from_socket_addr(peer));
                }
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {}
            Err(e) => log::error!("udp_client[{}]: recvfrom failed: {e}", self.name),
        }
    }

    /// Always `sendto`s the server address this client was constructed
    /// with (§4.11: "connectionless peer endpoints").
    pub fn send(self: &Arc<Self>, data: impl Into<Vec<u8>>) {
        let data = data.into();
        let this = self.clone();
        self.event_loop.run_in_loop(move || {
            if let Err(e) = this.socket.send_to(&data, &this.server_addr) {
                log::error!("udp_client[{}]: sendto failed: {e}", this.name);
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[test]
    fn server_echoes_one_datagram_to_client() {
        let server_loop = EventLoop::new().unwrap();
        let client_loop = EventLoop::new().unwrap();

        let server = UdpServer::new(
            server_loop.clone(),
            &Address::parse("127.0.0.1:0").unwrap(),
            "udp-test-server".to_string(),
        )
        .unwrap();
        server.set_message_callback(Arc::new(|buf, n, peer| {
            let _ = (buf, n, peer);
        }));
        let server_addr = server.local_addr().unwrap();
        server.start();

        let received = Arc::new(AtomicUsize::new(0));
        let r = received.clone();
        server.set_message_callback(Arc::new(move |buf, n, peer| {
            r.store(n, Ordering::SeqCst);
            let _ = peer;
            let _ = buf;
        }));

        let client = UdpClient::new(
            client_loop.clone(),
            Address::from_socket_addr(server_addr),
            "udp-test-client".to_string(),
        )
        .unwrap();
        client.start();
        client.send(b"hi".to_vec());

        let server_loop2 = server_loop.clone();
        std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(50));
            server_loop2.quit();
        });
        server_loop.run().unwrap();

        assert_eq!(received.load(Ordering::SeqCst), 2);
    }
}
