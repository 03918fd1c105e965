//! Readiness event types, mirroring mio's `event::{Event, Events}` split.

use std::fmt;

use crate::Token;

/// A single readiness notification returned by [`Poller::poll`](crate::Poller::poll).
///
/// Wraps the OS-reported revents mask (an epoll `events` field on Linux)
/// behind boolean accessors, the way mio's `Event` wraps `libc::epoll_event`.
#[derive(Clone)]
pub struct Event {
    pub(crate) token: Token,
    pub(crate) readable: bool,
    pub(crate) writable: bool,
    pub(crate) error: bool,
    pub(crate) read_closed: bool,
    pub(crate) priority: bool,
}

impl Event {
    pub fn token(&self) -> Token {
        self.token
    }

    pub fn is_readable(&self) -> bool {
        self.readable
    }

    pub fn is_writable(&self) -> bool {
        self.writable
    }

    pub fn is_error(&self) -> bool {
        self.error
    }

    /// `EPOLLRDHUP`/`EPOLLHUP`: the peer closed its write half, or hung up
    /// entirely. `Channel::handle_event` treats this as close-like.
    pub fn is_read_closed(&self) -> bool {
        self.read_closed
    }

    pub fn is_priority(&self) -> bool {
        self.priority
    }
}

impl fmt::Debug for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Event")
            .field("token", &self.token)
            .field("readable", &self.readable)
            .field("writable", &self.writable)
            .field("error", &self.error)
            .field("read_closed", &self.read_closed)
            .field("priority", &self.priority)
            .finish()
    }
}

/// The list of active channels a single [`Poller::poll`](crate::Poller::poll)
/// call returns. Sized for the expected concurrency and grown on demand
/// (see `Poller`'s algorithm note in §4.2).
#[derive(Debug, Default)]
pub struct Events {
    inner: Vec<Event>,
}

impl Events {
    pub fn with_capacity(capacity: usize) -> Events {
        Events {
            inner: Vec::with_capacity(capacity),
        }
    }

    pub fn capacity(&self) -> usize {
        self.inner.capacity()
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    pub(crate) fn clear(&mut self) {
        self.inner.clear();
    }

    pub(crate) fn push(&mut self, event: Event) {
        self.inner.push(event);
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Event> {
        self.inner.iter()
    }
}

impl<'a> IntoIterator for &'a Events {
    type Item = &'a Event;
    type IntoIter = std::slice::Iter<'a, Event>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}
