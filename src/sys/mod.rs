//! OS-specific backends. Only Linux is supported (epoll-class poller,
//! eventfd wakeup, timerfd timers) — see SPEC_FULL.md §0 for why this
//! crate does not attempt mio's cross-platform breadth.

#[cfg(all(unix, feature = "os-poll"))]
mod unix;

#[cfg(all(unix, feature = "os-poll"))]
pub(crate) use unix::{fill_events, Selector, TimerFd, Waker};
