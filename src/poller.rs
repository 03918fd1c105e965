//! Readiness polling over the set of watched FDs (§4.2). Exactly one
//! `Poller` per `EventLoop`; wraps [`crate::sys::Selector`] (epoll on
//! Linux) and keeps the fd -> `Channel` map a raw epoll token can't carry
//! on its own.

use std::collections::HashMap;
use std::io;
use std::os::fd::RawFd;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::channel::{Channel, PollerIndex};
use crate::event::{Event, Events};
use crate::sys;
use crate::token::Token;

/// One channel paired with the event the poller reported for it, handed
/// back to `EventLoop::run` for dispatch.
pub(crate) struct ActiveEvent {
    pub channel: Arc<Channel>,
    pub event: Event,
}

pub(crate) struct Poller {
    selector: sys::Selector,
    raw: Mutex<Vec<libc::epoll_event>>,
    channels: Mutex<HashMap<RawFd, Arc<Channel>>>,
}

const INITIAL_EVENTS_CAPACITY: usize = 16;

impl Poller {
    pub fn new() -> io::Result<Poller> {
        Ok(Poller {
            selector: sys::Selector::new()?,
            raw: Mutex::new(Vec::with_capacity(INITIAL_EVENTS_CAPACITY)),
            channels: Mutex::new(HashMap::new()),
        })
    }

    /// Blocks up to `timeout` (or indefinitely if `None`) and returns the
    /// wall-clock time polling unblocked alongside the channels that have
    /// work, so read handlers can timestamp received bytes without an
    /// extra syscall.
    pub fn poll(&self, timeout: Option<Duration>) -> io::Result<(Instant, Vec<ActiveEvent>)> {
        let mut raw = self.raw.lock();
        let capacity = raw.capacity();
        let n = self.selector.select(&mut raw, timeout)?;
        let now = Instant::now();

        let mut events = Events::with_capacity(n);
        sys::fill_events(&raw, &mut events);

        // Fully consumed this batch: grow for next time (§4.2 "grows when
        // fully consumed in one poll").
        if n == capacity {
            raw.reserve(capacity);
        }
        drop(raw);

        let channels = self.channels.lock();
        let mut active = Vec::with_capacity(events.len());
        for event in events.iter() {
            let fd = event.token().0 as RawFd;
            if let Some(channel) = channels.get(&fd) {
                active.push(ActiveEvent {
                    channel: channel.clone(),
                    event: event.clone(),
                });
            }
        }
        Ok((now, active))
    }

    /// Adds or modifies the interest registered for `channel`. The
    /// channel's fd is used directly as its epoll token (§3: "the poller's
    /// channel map is a partial function").
    pub fn update_channel(&self, channel: &Arc<Channel>) -> io::Result<()> {
        let fd = channel.fd();
        let interest = channel.interest();
        let index = channel.poller_index();

        match index {
            PollerIndex::New | PollerIndex::Deleted => {
                if let Some(interest) = interest {
                    // `Deleted` means a prior `EPOLL_CTL_DEL`, so re-adding
                    // needs `ADD`, not `MOD`, same as a first-time add.
                    self.selector.register(fd, Token(fd as usize), interest)?;
                    if index == PollerIndex::New {
                        self.channels.lock().insert(fd, channel.clone());
                    }
                    channel.set_poller_index(PollerIndex::Added);
                }
                // Still none: never touched epoll (or already deregistered
                // from it); nothing to do either way.
            }
            PollerIndex::Added => match interest {
                Some(interest) => {
                    self.selector.reregister(fd, Token(fd as usize), interest)?;
                }
                None => {
                    self.selector.deregister(fd)?;
                    channel.set_poller_index(PollerIndex::Deleted);
                }
            },
        }
        Ok(())
    }

    /// Detaches `channel` for good: erases its map entry. Only meaningful
    /// after `disableAll()` has already dropped its epoll registration
    /// (§3: "last `remove()` happens after `disableAll()`").
    pub fn remove_channel(&self, channel: &Arc<Channel>) -> io::Result<()> {
        let fd = channel.fd();
        if channel.poller_index() == PollerIndex::Added {
            self.selector.deregister(fd)?;
        }
        self.channels.lock().remove(&fd);
        channel.set_poller_index(PollerIndex::New);
        Ok(())
    }

    pub fn has_channel(&self, channel: &Arc<Channel>) -> bool {
        self.channels.lock().contains_key(&channel.fd())
    }
}
