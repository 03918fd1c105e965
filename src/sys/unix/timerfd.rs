//! Linux timerfd wrapper bound to `CLOCK_MONOTONIC` (§4.4/§6). Built in
//! the same `syscall!`-wrapped-libc idiom as [`super::epoll::Selector`]
//! and [`super::waker::Waker`]; the original has no Rust precedent in the
//! retrieval pack, so this follows the nearest sibling syscalls already
//! grounded there.

use std::fs::File;
use std::io::{self, Read};
use std::mem;
use std::os::fd::{AsRawFd, FromRawFd, RawFd};
use std::time::Duration;

#[derive(Debug)]
pub(crate) struct TimerFd {
    fd: File,
}

impl TimerFd {
    pub(crate) fn new() -> io::Result<TimerFd> {
        let flags = libc::TFD_CLOEXEC | libc::TFD_NONBLOCK;
        // Timer creation failure is fatal at construction (§4.4).
        let fd = syscall!(timerfd_create(libc::CLOCK_MONOTONIC, flags))?;
        Ok(TimerFd {
            fd: unsafe { File::from_raw_fd(fd) },
        })
    }

    /// Arms the timer to fire once after `delay` (or disarms it if `delay`
    /// is `None`). Rearming on every frontier change is how `TimerQueue`
    /// tracks only the earliest deadline (§4.4).
    pub(crate) fn set(&self, delay: Option<Duration>) -> io::Result<()> {
        let spec = match delay {
            Some(d) => libc::itimerspec {
                it_interval: zero_timespec(),
                it_value: duration_to_timespec(d.max(Duration::from_nanos(1))),
            },
            None => libc::itimerspec {
                it_interval: zero_timespec(),
                it_value: zero_timespec(),
            },
        };
        syscall!(timerfd_settime(self.fd.as_raw_fd(), 0, &spec, std::ptr::null_mut())).map(|_| ())
    }

    /// Reads and discards the accumulated expiry count, coalescing missed
    /// ticks into one handling pass (§4.4 "Missed ticks are coalesced").
    pub(crate) fn drain(&self) -> io::Result<u64> {
        let mut buf = [0u8; 8];
        match (&self.fd).read(&mut buf) {
            Ok(8) => Ok(u64::from_ne_bytes(buf)),
            Ok(_) => Ok(0),
            Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => Ok(0),
            Err(e) => Err(e),
        }
    }
}

impl AsRawFd for TimerFd {
    fn as_raw_fd(&self) -> RawFd {
        self.fd.as_raw_fd()
    }
}

fn zero_timespec() -> libc::timespec {
    unsafe { mem::zeroed() }
}

fn duration_to_timespec(d: Duration) -> libc::timespec {
    libc::timespec {
        tv_sec: d.as_secs() as libc::time_t,
        tv_nsec: d.subsec_nanos() as libc::c_long,
    }
}
