//! Typed FD wrappers over `socket2`, grounded on zmuduo's
//! `net/socket_options.h`/`.cc` (`sockets::createNonblockingOrDie`,
//! `getSocketError`, `getLocalAddress`, `getPeerAddress`, `isSelfConnect`).

use std::io;
use std::net::SocketAddr;
use std::os::fd::{AsRawFd, FromRawFd, IntoRawFd, OwnedFd, RawFd};

use socket2::{Domain, Protocol, SockAddr, Socket as Socket2, Type};

use crate::net::address::Address;

/// A non-blocking socket FD, `CLOEXEC` set, wrapped for the lifetime
/// discipline `OwnedFd` gives (closes on drop).
#[derive(Debug)]
pub struct Socket {
    inner: Socket2,
}

impl Socket {
    /// `socket2::Socket::new` already requests `SOCK_CLOEXEC` at creation
    /// on Linux; this only adds non-blocking mode.
    fn from_socket2(inner: Socket2) -> io::Result<Socket> {
        inner.set_nonblocking(true)?;
        Ok(Socket { inner })
    }

    /// `sockets::createNonblockingOrDie` — construction failure here is a
    /// resource-exhaustion condition the caller should treat as fatal to
    /// the operation attempting it (not to the process).
    pub fn new_tcp(domain: Domain) -> io::Result<Socket> {
        Socket::from_socket2(Socket2::new(domain, Type::STREAM, Some(Protocol::TCP))?)
    }

    pub fn new_udp(domain: Domain) -> io::Result<Socket> {
        Socket::from_socket2(Socket2::new(domain, Type::DGRAM, Some(Protocol::UDP))?)
    }

    pub fn new_unix_stream() -> io::Result<Socket> {
        Socket::from_socket2(Socket2::new(Domain::UNIX, Type::STREAM, None)?)
    }

    pub fn set_reuse_addr(&self, value: bool) -> io::Result<()> {
        self.inner.set_reuse_address(value)
    }

    #[cfg(target_os = "linux")]
    pub fn set_reuse_port(&self, value: bool) -> io::Result<()> {
        self.inner.set_reuse_port(value)
    }

    pub fn set_keep_alive(&self, value: bool) -> io::Result<()> {
        self.inner.set_keepalive(value)
    }

    pub fn set_tcp_nodelay(&self, value: bool) -> io::Result<()> {
        self.inner.set_nodelay(value)
    }

    pub fn bind(&self, addr: &Address) -> io::Result<()> {
        match addr.as_socket_addr() {
            Some(sa) => self.inner.bind(&SockAddr::from(sa)),
            None => Err(io::Error::new(io::ErrorKind::InvalidInput, "unix binding not supported here")),
        }
    }

    pub fn listen(&self, backlog: i32) -> io::Result<()> {
        self.inner.listen(backlog)
    }

    /// Initiates a non-blocking connect. The caller inspects the error
    /// kind: `WouldBlock`/`EINPROGRESS` means "in progress, await
    /// writability" (§4.7).
    pub fn connect(&self, addr: &Address) -> io::Result<()> {
        let sa = addr
            .as_socket_addr()
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "no socket address"))?;
        self.inner.connect(&SockAddr::from(sa))
    }

    pub fn accept(&self) -> io::Result<(Socket, SocketAddr)> {
        let (inner, peer) = self.inner.accept()?;
        let socket = Socket::from_socket2(inner)?;
        let peer = peer
            .as_socket()
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "peer has no socket address"))?;
        Ok((socket, peer))
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.inner
            .local_addr()?
            .as_socket()
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "local addr is not IP"))
    }

    pub fn peer_addr(&self) -> io::Result<SocketAddr> {
        self.inner
            .peer_addr()?
            .as_socket()
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "peer addr is not IP"))
    }

    /// `getsockopt(SO_ERROR)` — used after a connect's writability
    /// notification to tell success from a failed handshake (§4.7).
    pub fn take_error(&self) -> io::Result<Option<io::Error>> {
        self.inner.take_error()
    }

    /// `local == peer`: the kernel assigned an ephemeral port identical to
    /// the target, so the socket "connected to itself" (§4.7, GLOSSARY).
    pub fn is_self_connect(&self) -> bool {
        match (self.local_addr(), self.peer_addr()) {
            (Ok(local), Ok(peer)) => local == peer,
            _ => false,
        }
    }

    pub fn shutdown_write(&self) -> io::Result<()> {
        self.inner.shutdown(std::net::Shutdown::Write)
    }

    /// `recvfrom` for a `SOCK_DGRAM` socket (§4.11).
    pub fn recv_from(&self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)> {
        // Safety: `recv_from` only ever writes into `buf`, never reads
        // uninitialized bytes back out, so reinterpreting as
        // `[MaybeUninit<u8>]` is sound.
        let uninit = unsafe { &mut *(buf as *mut [u8] as *mut [std::mem::MaybeUninit<u8>]) };
        let (n, addr) = self.inner.recv_from(uninit)?;
        let peer = addr
            .as_socket()
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "peer has no socket address"))?;
        Ok((n, peer))
    }

    /// `sendto` for a `SOCK_DGRAM` socket (§4.11).
    pub fn send_to(&self, buf: &[u8], addr: &Address) -> io::Result<usize> {
        let sa = addr
            .as_socket_addr()
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "no socket address"))?;
        self.inner.send_to(buf, &SockAddr::from(sa))
    }

    #[cfg(target_os = "linux")]
    pub fn tcp_info(&self) -> io::Result<libc::tcp_info> {
        use std::mem;
        let mut info: libc::tcp_info = unsafe { mem::zeroed() };
        let mut len = mem::size_of::<libc::tcp_info>() as libc::socklen_t;
        syscall!(getsockopt(
            self.as_raw_fd(),
            libc::IPPROTO_TCP,
            libc::TCP_INFO,
            &mut info as *mut _ as *mut libc::c_void,
            &mut len,
        ))?;
        Ok(info)
    }
}

impl AsRawFd for Socket {
    fn as_raw_fd(&self) -> RawFd {
        self.inner.as_raw_fd()
    }
}

impl IntoRawFd for Socket {
    fn into_raw_fd(self) -> RawFd {
        self.inner.into_raw_fd()
    }
}

/// Wraps a bare, already-connected fd as a `Read`/`Write` stream so
/// `openssl::ssl::SslStream<S>` has something to layer on. Ownership of
/// the fd stays with the `Socket`/`TcpConnection` that created it; this
/// type never closes it.
#[derive(Debug)]
pub struct RawFdStream {
    fd: RawFd,
}

impl RawFdStream {
    pub fn new(fd: RawFd) -> RawFdStream {
        RawFdStream { fd }
    }
}

impl AsRawFd for RawFdStream {
    fn as_raw_fd(&self) -> RawFd {
        self.fd
    }
}

impl io::Read for RawFdStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        syscall!(read(self.fd, buf.as_mut_ptr() as *mut libc::c_void, buf.len())).map(|n| n as usize)
    }
}

impl io::Write for RawFdStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        syscall!(write(self.fd, buf.as_ptr() as *const libc::c_void, buf.len())).map(|n| n as usize)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Consumes `fd`'s ownership into an `OwnedFd` purely for Rust's drop
/// discipline; used when a `Socket` hands its fd to a `TcpConnection`.
pub(crate) fn owned_fd(fd: RawFd) -> OwnedFd {
    unsafe { OwnedFd::from_raw_fd(fd) }
}
