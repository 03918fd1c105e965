//! Append-and-consume byte buffer with cheap prepend, grounded on zmuduo's
//! `net/buffer.h`/`buffer.cc` (itself inspired by Netty's `ChannelBuffer`).
//!
//! ```text
//! +-------------------+------------------+------------------+
//! | prependable bytes |  readable bytes  |  writable bytes  |
//! |                   |     (CONTENT)    |                  |
//! +-------------------+------------------+------------------+
//! 0      <=      reader_index   <=   writer_index    <=    len
//! ```

use std::io::{self, IoSlice, IoSliceMut};
use std::os::fd::RawFd;

/// Reserved space at the front of the buffer so headers can be prepended
/// without reallocating (§4.1's "prepend capacity is preserved across
/// compaction").
pub const CHEAP_PREPEND: usize = 8;
pub const INITIAL_SIZE: usize = 1024;

/// The stack-local overflow region used by the scatter read (§4.1's
/// "Algorithm — scatter read"). Bounds per-connection heap growth when a
/// peer bursts more than fits in the currently writable region.
const EXTRA_BUF_SIZE: usize = 65536;

/// Not `Sync`/`Send`-constrained beyond what `Vec<u8>` already gives; per
/// §3 a `Buffer` is owned by exactly one connection and touched only from
/// its owning loop.
#[derive(Debug, Clone)]
pub struct Buffer {
    buf: Vec<u8>,
    reader_index: usize,
    writer_index: usize,
    prepend_reserve: usize,
}

impl Default for Buffer {
    fn default() -> Self {
        Buffer::new()
    }
}

impl Buffer {
    pub fn new() -> Buffer {
        Buffer::with_capacity(CHEAP_PREPEND, INITIAL_SIZE)
    }

    pub fn with_capacity(prepend: usize, initial: usize) -> Buffer {
        Buffer {
            buf: vec![0u8; prepend + initial],
            reader_index: prepend,
            writer_index: prepend,
            prepend_reserve: prepend,
        }
    }

    pub fn readable_len(&self) -> usize {
        self.writer_index - self.reader_index
    }

    pub fn writable_len(&self) -> usize {
        self.buf.len() - self.writer_index
    }

    pub fn prependable_len(&self) -> usize {
        self.reader_index
    }

    /// Pointer to the first readable byte.
    pub fn peek(&self) -> &[u8] {
        &self.buf[self.reader_index..self.writer_index]
    }

    fn peek_mut(&mut self) -> &mut [u8] {
        &mut self.buf[self.reader_index..self.writer_index]
    }

    /// Drops `len` bytes from the front of the readable region.
    pub fn retrieve(&mut self, len: usize) {
        assert!(len <= self.readable_len());
        if len < self.readable_len() {
            self.reader_index += len;
        } else {
            self.retrieve_all();
        }
    }

    pub fn retrieve_all(&mut self) {
        self.reader_index = self.prepend_reserve;
        self.writer_index = self.prepend_reserve;
    }

    pub fn retrieve_as_vec(&mut self, len: usize) -> Vec<u8> {
        assert!(len <= self.readable_len());
        let out = self.peek()[..len].to_vec();
        self.retrieve(len);
        out
    }

    pub fn retrieve_all_as_vec(&mut self) -> Vec<u8> {
        let n = self.readable_len();
        self.retrieve_as_vec(n)
    }

    /// Appends `data` to the writable region, growing if necessary.
    pub fn write(&mut self, data: &[u8]) {
        self.ensure_writable(data.len());
        let start = self.writer_index;
        self.buf[start..start + data.len()].copy_from_slice(data);
        self.writer_index += data.len();
    }

    pub fn write_u8(&mut self, x: u8) {
        self.write(&[x]);
    }

    pub fn write_u16(&mut self, x: u16) {
        self.write(&x.to_be_bytes());
    }

    pub fn write_u32(&mut self, x: u32) {
        self.write(&x.to_be_bytes());
    }

    pub fn write_u64(&mut self, x: u64) {
        self.write(&x.to_be_bytes());
    }

    /// Reads a big-endian `u8` without consuming it.
    pub fn peek_u8(&self) -> u8 {
        assert!(self.readable_len() >= 1);
        self.peek()[0]
    }

    pub fn peek_u16(&self) -> u16 {
        assert!(self.readable_len() >= 2);
        u16::from_be_bytes(self.peek()[..2].try_into().unwrap())
    }

    pub fn peek_u32(&self) -> u32 {
        assert!(self.readable_len() >= 4);
        u32::from_be_bytes(self.peek()[..4].try_into().unwrap())
    }

    pub fn peek_u64(&self) -> u64 {
        assert!(self.readable_len() >= 8);
        u64::from_be_bytes(self.peek()[..8].try_into().unwrap())
    }

    pub fn read_u8(&mut self) -> u8 {
        let v = self.peek_u8();
        self.retrieve(1);
        v
    }

    pub fn read_u16(&mut self) -> u16 {
        let v = self.peek_u16();
        self.retrieve(2);
        v
    }

    pub fn read_u32(&mut self) -> u32 {
        let v = self.peek_u32();
        self.retrieve(4);
        v
    }

    pub fn read_u64(&mut self) -> u64 {
        let v = self.peek_u64();
        self.retrieve(8);
        v
    }

    /// Writes `data` just before the readable region, e.g. a length prefix
    /// discovered only after the payload was already buffered.
    pub fn prepend(&mut self, data: &[u8]) {
        assert!(data.len() <= self.prependable_len());
        self.reader_index -= data.len();
        self.buf[self.reader_index..self.reader_index + data.len()].copy_from_slice(data);
    }

    pub fn prepend_u32(&mut self, x: u32) {
        self.prepend(&x.to_be_bytes());
    }

    pub fn prepend_u16(&mut self, x: u16) {
        self.prepend(&x.to_be_bytes());
    }

    /// `writable + prepend - prepend_reserve >= len`? If not, grow; else
    /// slide the readable bytes down toward the prepend boundary (§4.1
    /// "Compaction").
    pub fn ensure_writable(&mut self, len: usize) {
        if self.writable_len() < len {
            self.make_space(len);
        }
        debug_assert!(self.writable_len() >= len);
    }

    fn make_space(&mut self, len: usize) {
        if self.writable_len() + self.prependable_len() < len + self.prepend_reserve {
            self.buf.resize(self.writer_index + len, 0);
        } else {
            let readable = self.readable_len();
            self.buf
                .copy_within(self.reader_index..self.writer_index, self.prepend_reserve);
            self.reader_index = self.prepend_reserve;
            self.writer_index = self.reader_index + readable;
        }
    }

    pub fn find(&self, needle: &[u8]) -> Option<usize> {
        self.peek()
            .windows(needle.len().max(1))
            .position(|w| w == needle)
    }

    pub fn find_crlf(&self) -> Option<usize> {
        self.find(b"\r\n")
    }

    /// Fills the writable region directly, spilling overflow into a
    /// stack-local tail buffer via a two-iovec vectored read, then
    /// appending whatever landed there. Returns the total bytes read (0
    /// means the peer closed its write half) or the OS error.
    pub fn read_from_fd(&mut self, fd: RawFd) -> (usize, Option<io::Error>) {
        let mut extra_buf = [0u8; EXTRA_BUF_SIZE];
        let writable = self.writable_len();

        let n = {
            let mut slices = [
                IoSliceMut::new(&mut self.buf[self.writer_index..]),
                IoSliceMut::new(&mut extra_buf),
            ];
            read_vectored(fd, &mut slices)
        };

        match n {
            Ok(0) => (0, None),
            Ok(n) if n as usize <= writable => {
                self.writer_index += n as usize;
                (n as usize, None)
            }
            Ok(n) => {
                self.writer_index = self.buf.len();
                let spilled = n as usize - writable;
                self.write(&extra_buf[..spilled]);
                (n as usize, None)
            }
            Err(e) => (0, Some(e)),
        }
    }

    /// Drains as much of the readable region as a single non-blocking
    /// write will take; `TcpConnection` loops this until `EAGAIN`.
    pub fn write_to_fd(&mut self, fd: RawFd) -> (usize, Option<io::Error>) {
        let slice = [IoSlice::new(self.peek())];
        match write_vectored(fd, &slice) {
            Ok(n) => {
                self.retrieve(n as usize);
                (n as usize, None)
            }
            Err(e) => (0, Some(e)),
        }
    }

    #[cfg(feature = "tls")]
    pub fn read_from_tls(&mut self, ssl: &mut openssl::ssl::SslStream<crate::net::socket::RawFdStream>) -> (usize, Option<io::Error>) {
        use std::io::Read;
        self.ensure_writable(EXTRA_BUF_SIZE);
        let start = self.writer_index;
        let end = self.buf.len();
        match ssl.read(&mut self.buf[start..end]) {
            Ok(n) => {
                self.writer_index += n;
                (n, None)
            }
            Err(e) => match e.io_error() {
                // Mirrors `read_from_fd`: a not-yet-ready read is `EAGAIN`,
                // not EOF, and must surface as `Some(e)` so the caller's
                // `e.kind() != WouldBlock` guard swallows it instead of
                // treating it as a peer close.
                Some(io_err) if io_err.kind() == io::ErrorKind::WouldBlock => {
                    (0, Some(io::Error::from(io::ErrorKind::WouldBlock)))
                }
                _ => (0, Some(io::Error::new(io::ErrorKind::Other, e))),
            },
        }
    }

    #[cfg(feature = "tls")]
    pub fn write_to_tls(&mut self, ssl: &mut openssl::ssl::SslStream<crate::net::socket::RawFdStream>) -> (usize, Option<io::Error>) {
        use std::io::Write;
        match ssl.write(self.peek()) {
            Ok(n) => {
                self.retrieve(n);
                (n, None)
            }
            Err(e) => match e.io_error() {
                Some(io_err) if io_err.kind() == io::ErrorKind::WouldBlock => {
                    (0, Some(io::Error::from(io::ErrorKind::WouldBlock)))
                }
                _ => (0, Some(io::Error::new(io::ErrorKind::Other, e))),
            },
        }
    }
}

fn read_vectored(fd: RawFd, bufs: &mut [IoSliceMut<'_>]) -> io::Result<isize> {
    syscall!(readv(
        fd,
        bufs.as_mut_ptr() as *mut libc::iovec,
        bufs.len() as i32
    ))
    .map(|n| n as isize)
}

fn write_vectored(fd: RawFd, bufs: &[IoSlice<'_>]) -> io::Result<isize> {
    syscall!(writev(fd, bufs.as_ptr() as *const libc::iovec, bufs.len() as i32)).map(|n| n as isize)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_bytes() {
        let mut buf = Buffer::new();
        buf.write(b"hello world");
        assert_eq!(buf.readable_len(), 11);
        assert_eq!(buf.retrieve_all_as_vec(), b"hello world");
        assert_eq!(buf.readable_len(), 0);
    }

    #[test]
    fn round_trip_integers_big_endian_on_wire() {
        let mut buf = Buffer::new();
        buf.write_u32(0x1234_5678);
        assert_eq!(buf.peek(), &[0x12, 0x34, 0x56, 0x78]);
        assert_eq!(buf.read_u32(), 0x1234_5678);
    }

    #[test]
    fn prepend_then_peek() {
        let mut buf = Buffer::new();
        buf.write(b"payload");
        buf.prepend_u32(7);
        assert_eq!(buf.readable_len(), 11);
        assert_eq!(buf.read_u32(), 7);
        assert_eq!(buf.retrieve_all_as_vec(), b"payload");
    }

    #[test]
    fn grows_when_prepend_slide_is_not_enough() {
        let mut buf = Buffer::with_capacity(4, 4);
        buf.write(b"abcd");
        buf.retrieve(2); // reader_index now at 6, 2 bytes readable ("cd")
        buf.ensure_writable(100);
        assert!(buf.writable_len() >= 100);
        assert_eq!(buf.peek(), b"cd");
    }

    #[test]
    fn compaction_slides_instead_of_growing_when_space_suffices() {
        let mut buf = Buffer::with_capacity(8, 8);
        buf.write(b"abcdefgh");
        buf.retrieve(8);
        let cap_before = buf.buf.len();
        buf.write(b"xy");
        buf.ensure_writable(6);
        assert_eq!(buf.buf.len(), cap_before, "should slide, not grow");
    }

    #[test]
    fn find_crlf() {
        let mut buf = Buffer::new();
        buf.write(b"GET / HTTP/1.1\r\nHost: x\r\n\r\n");
        let pos = buf.find_crlf().unwrap();
        assert_eq!(&buf.peek()[..pos], b"GET / HTTP/1.1");
    }
}
