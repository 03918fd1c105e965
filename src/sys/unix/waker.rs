//! eventfd-backed cross-thread wakeup, grounded on mio's
//! `src/sys/unix/waker/eventfd.rs`. Used both by `EventLoop`'s own wakeup
//! channel (§4.5) and has the same shape `TimerFd` reuses for arming.

use std::fs::File;
use std::io::{self, Read, Write};
use std::os::fd::{AsRawFd, FromRawFd, RawFd};

/// Any 8-byte write unblocks the poller; reads drain the accumulated count
/// unconditionally, exactly as §6 describes for the wakeup fd.
#[derive(Debug)]
pub(crate) struct Waker {
    fd: File,
}

impl Waker {
    pub(crate) fn new() -> io::Result<Waker> {
        let flags = libc::EFD_CLOEXEC | libc::EFD_NONBLOCK;
        let fd = syscall!(eventfd(0, flags))?;
        Ok(Waker {
            fd: unsafe { File::from_raw_fd(fd) },
        })
    }

    pub(crate) fn wake(&self) -> io::Result<()> {
        let buf: [u8; 8] = 1u64.to_ne_bytes();
        match (&self.fd).write(&buf) {
            Ok(_) => Ok(()),
            Err(ref err) if err.kind() == io::ErrorKind::WouldBlock => {
                // Counter close to overflow: drain then retry once.
                self.drain()?;
                self.wake()
            }
            Err(err) => Err(err),
        }
    }

    /// Unconditionally drains the counter. Called from the loop's own
    /// wakeup-channel read handler.
    pub(crate) fn drain(&self) -> io::Result<()> {
        let mut buf: [u8; 8] = 0u64.to_ne_bytes();
        match (&self.fd).read(&mut buf) {
            Ok(_) => Ok(()),
            Err(ref err) if err.kind() == io::ErrorKind::WouldBlock => Ok(()),
            Err(err) => Err(err),
        }
    }
}

impl AsRawFd for Waker {
    fn as_raw_fd(&self) -> RawFd {
        self.fd.as_raw_fd()
    }
}
