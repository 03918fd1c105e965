//! One-to-one binding between an fd and the loop that polls it (§4.3).
//!
//! A `Channel` is shared between its owner (a `TcpConnection`, `Acceptor`,
//! `Connector`, or `TimerQueue`) and the `EventLoop`'s registry — the
//! registry's copy is what lets `EventLoop::poll` turn a raw epoll token
//! back into something it can dispatch to, and is dropped in `remove()`.
//! To avoid a reference cycle back to the owner, the owner's closures
//! never capture a strong handle to themselves; instead `tie()` installs a
//! weak, type-erased observation that is upgraded before every dispatch —
//! on failed upgrade the event is silently dropped, matching "this defends
//! against dispatch-after-destruction during teardown" (§4.3).

use std::any::Any;
use std::fmt;
use std::os::fd::RawFd;
use std::sync::Weak;
use std::time::Instant;

use parking_lot::Mutex;

use crate::interest::Interest;

pub(crate) type ReadCallback = Box<dyn FnMut(Instant) + Send>;
pub(crate) type EventCallback = Box<dyn FnMut() + Send>;

/// Where a channel sits relative to the poller: never registered, added,
/// or registered-but-currently-deleted (used by the poller to update in
/// place without scanning, §4.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PollerIndex {
    New,
    Added,
    Deleted,
}

struct Callbacks {
    read: Option<ReadCallback>,
    write: Option<EventCallback>,
    close: Option<EventCallback>,
    error: Option<EventCallback>,
}

struct MutState {
    interest: Option<Interest>,
    index: PollerIndex,
    tied: Option<Weak<dyn Any + Send + Sync>>,
    event_handling: bool,
    added_to_loop: bool,
}

pub struct Channel {
    fd: RawFd,
    callbacks: Mutex<Callbacks>,
    state: Mutex<MutState>,
}

impl fmt::Debug for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Channel").field("fd", &self.fd).finish()
    }
}

impl Channel {
    pub fn new(fd: RawFd) -> Channel {
        Channel {
            fd,
            callbacks: Mutex::new(Callbacks {
                read: None,
                write: None,
                close: None,
                error: None,
            }),
            state: Mutex::new(MutState {
                interest: None,
                index: PollerIndex::New,
                tied: None,
                event_handling: false,
                added_to_loop: false,
            }),
        }
    }

    pub fn fd(&self) -> RawFd {
        self.fd
    }

    pub fn set_read_callback(&self, cb: ReadCallback) {
        self.callbacks.lock().read = Some(cb);
    }

    pub fn set_write_callback(&self, cb: EventCallback) {
        self.callbacks.lock().write = Some(cb);
    }

    pub fn set_close_callback(&self, cb: EventCallback) {
        self.callbacks.lock().close = Some(cb);
    }

    pub fn set_error_callback(&self, cb: EventCallback) {
        self.callbacks.lock().error = Some(cb);
    }

    /// Installs a weak, type-erased liveness check consulted before every
    /// dispatch (§9 "Channel<->connection back-reference").
    pub fn tie(&self, observer: Weak<dyn Any + Send + Sync>) {
        self.state.lock().tied = Some(observer);
    }

    pub fn interest(&self) -> Option<Interest> {
        self.state.lock().interest
    }

    pub(crate) fn poller_index(&self) -> PollerIndex {
        self.state.lock().index
    }

    pub(crate) fn set_poller_index(&self, idx: PollerIndex) {
        self.state.lock().index = idx;
    }

    pub(crate) fn added_to_loop(&self) -> bool {
        self.state.lock().added_to_loop
    }

    pub(crate) fn set_added_to_loop(&self, v: bool) {
        self.state.lock().added_to_loop = v;
    }

    pub fn is_none_interested(&self) -> bool {
        self.state.lock().interest.is_none()
    }

    pub fn is_writing(&self) -> bool {
        self.state
            .lock()
            .interest
            .map(|i| i.is_writable())
            .unwrap_or(false)
    }

    pub fn is_reading(&self) -> bool {
        self.state
            .lock()
            .interest
            .map(|i| i.is_readable())
            .unwrap_or(false)
    }

    pub(crate) fn set_interest(&self, interest: Option<Interest>) {
        self.state.lock().interest = interest;
    }

    /// Each of these mutates the interest mask and then runs `apply`,
    /// which the caller (the only party holding both this channel's `Arc`
    /// and its owning loop) uses to push the change to the poller — e.g.
    /// `|| event_loop.update_channel(&channel)`.
    pub fn enable_reading(&self, apply: impl FnOnce()) {
        self.set_interest(Some(
            self.interest().unwrap_or(Interest::READABLE) | Interest::READABLE,
        ));
        apply();
    }

    pub fn disable_reading(&self, apply: impl FnOnce()) {
        let remaining = self.interest().and_then(|i| i.remove(Interest::READABLE));
        self.set_interest(remaining);
        apply();
    }

    pub fn enable_writing(&self, apply: impl FnOnce()) {
        self.set_interest(Some(
            self.interest().unwrap_or(Interest::READABLE) | Interest::WRITABLE,
        ));
        apply();
    }

    pub fn disable_writing(&self, apply: impl FnOnce()) {
        let remaining = self.interest().and_then(|i| i.remove(Interest::WRITABLE));
        self.set_interest(remaining);
        apply();
    }

    pub fn disable_all(&self, apply: impl FnOnce()) {
        self.set_interest(None);
        apply();
    }

    /// Dispatches one readiness notification, in `error -> close/peer-close
    /// -> read -> write` precedence (§4.3).
    pub(crate) fn handle_event(&self, receive_time: Instant, event: &crate::event::Event) {
        {
            let mut st = self.state.lock();
            if let Some(tied) = &st.tied {
                if tied.upgrade().is_none() {
                    return;
                }
            }
            st.event_handling = true;
        }

        if event.is_error() {
            if let Some(cb) = &mut self.callbacks.lock().error {
                cb();
            }
        }
        if event.is_read_closed() {
            if let Some(cb) = &mut self.callbacks.lock().close {
                cb();
            }
        }
        if event.is_readable() {
            if let Some(cb) = &mut self.callbacks.lock().read {
                cb(receive_time);
            }
        }
        if event.is_writable() {
            if let Some(cb) = &mut self.callbacks.lock().write {
                cb();
            }
        }

        self.state.lock().event_handling = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn dispatch_order_is_error_close_read_write() {
        let ch = Channel::new(0);
        let order = Arc::new(Mutex::new(Vec::new()));
        let o1 = order.clone();
        ch.set_error_callback(Box::new(move || o1.lock().push("error")));
        let o2 = order.clone();
        ch.set_close_callback(Box::new(move || o2.lock().push("close")));
        let o3 = order.clone();
        ch.set_read_callback(Box::new(move |_| o3.lock().push("read")));
        let o4 = order.clone();
        ch.set_write_callback(Box::new(move || o4.lock().push("write")));

        let event = crate::event::Event {
            token: crate::token::Token(0),
            readable: true,
            writable: true,
            error: true,
            read_closed: true,
            priority: false,
        };
        ch.handle_event(Instant::now(), &event);
        assert_eq!(*order.lock(), vec!["error", "close", "read", "write"]);
    }

    #[test]
    fn dropped_upgrade_suppresses_dispatch() {
        let ch = Channel::new(0);
        let fired = Arc::new(AtomicUsize::new(0));
        let f = fired.clone();
        ch.set_read_callback(Box::new(move |_| {
            f.fetch_add(1, Ordering::SeqCst);
        }));
        let owner = Arc::new(());
        ch.tie(Arc::downgrade(&owner) as Weak<dyn Any + Send + Sync>);
        drop(owner);

        let event = crate::event::Event {
            token: crate::token::Token(0),
            readable: true,
            writable: false,
            error: false,
            read_closed: false,
            priority: false,
        };
        ch.handle_event(Instant::now(), &event);
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }
}
