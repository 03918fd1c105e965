//! epoll-backed `Selector`, grounded on mio's `src/sys/unix/selector/epoll.rs`.

use std::io;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::ptr;
use std::time::Duration;

use libc::{EPOLLERR, EPOLLHUP, EPOLLIN, EPOLLOUT, EPOLLPRI, EPOLLRDHUP};

use crate::event::{Event, Events};
use crate::interest::Interest;
use crate::token::Token;

/// One epoll instance per `Poller`, i.e. one per `EventLoop`/OS thread (§2,
/// "one I/O demultiplexer per OS thread").
#[derive(Debug)]
pub(crate) struct Selector {
    ep: OwnedFd,
}

impl Selector {
    pub(crate) fn new() -> io::Result<Selector> {
        // SAFETY: epoll_create1 either returns a valid fd or -1.
        let ep = unsafe { OwnedFd::from_raw_fd(syscall!(epoll_create1(libc::EPOLL_CLOEXEC))?) };
        Ok(Selector { ep })
    }

    pub(crate) fn select(&self, raw: &mut Vec<libc::epoll_event>, timeout: Option<Duration>) -> io::Result<usize> {
        let timeout_ms = timeout
            .map(|to| {
                to.checked_add(Duration::from_nanos(999_999))
                    .unwrap_or(to)
                    .as_millis() as libc::c_int
            })
            .unwrap_or(-1);

        // `EINTR` is transient (§7: "retried implicitly by the next
        // event"), the same treatment mio's `Poll::poll_interruptible`
        // and muduo's `EPollPoller::poll` give it — report zero events
        // rather than bubbling a fatal error up through `EventLoop::run`.
        let n = match syscall!(epoll_wait(
            self.ep.as_raw_fd(),
            raw.as_mut_ptr(),
            raw.capacity() as i32,
            timeout_ms,
        )) {
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {
                unsafe { raw.set_len(0) };
                return Ok(0);
            }
            Err(e) => return Err(e),
        };
        // SAFETY: epoll_wait guarantees `n` slots were initialized.
        unsafe { raw.set_len(n as usize) };
        Ok(n as usize)
    }

    pub(crate) fn register(&self, fd: RawFd, token: Token, interests: Interest) -> io::Result<()> {
        let mut event = raw_event(token, interests);
        syscall!(epoll_ctl(self.ep.as_raw_fd(), libc::EPOLL_CTL_ADD, fd, &mut event)).map(|_| ())
    }

    pub(crate) fn reregister(&self, fd: RawFd, token: Token, interests: Interest) -> io::Result<()> {
        let mut event = raw_event(token, interests);
        syscall!(epoll_ctl(self.ep.as_raw_fd(), libc::EPOLL_CTL_MOD, fd, &mut event)).map(|_| ())
    }

    pub(crate) fn deregister(&self, fd: RawFd) -> io::Result<()> {
        syscall!(epoll_ctl(
            self.ep.as_raw_fd(),
            libc::EPOLL_CTL_DEL,
            fd,
            ptr::null_mut()
        ))
        .map(|_| ())
    }
}

impl AsRawFd for Selector {
    fn as_raw_fd(&self) -> RawFd {
        self.ep.as_raw_fd()
    }
}

fn raw_event(token: Token, interests: Interest) -> libc::epoll_event {
    let mut kind = 0u32;
    if interests.is_readable() {
        kind |= (EPOLLIN | EPOLLRDHUP) as u32;
    }
    if interests.is_writable() {
        kind |= EPOLLOUT as u32;
    }
    if interests.is_priority() {
        kind |= EPOLLPRI as u32;
    }
    libc::epoll_event {
        events: kind,
        u64: token.0 as u64,
    }
}

/// Translates a raw `epoll_event` list into the public [`Events`] type,
/// in `error -> close/peer-close -> read -> write` precedence (§4.3).
pub(crate) fn fill_events(raw: &[libc::epoll_event], out: &mut Events) {
    out.clear();
    for ev in raw {
        let mask = ev.events as i32;
        out.push(Event {
            token: Token(ev.u64 as usize),
            readable: mask & (EPOLLIN | EPOLLPRI) != 0,
            writable: mask & EPOLLOUT != 0,
            error: mask & EPOLLERR != 0,
            read_closed: mask & (EPOLLRDHUP | EPOLLHUP) != 0,
            priority: mask & EPOLLPRI != 0,
        });
    }
}
