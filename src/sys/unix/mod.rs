mod epoll;
mod timerfd;
mod waker;

pub(crate) use epoll::{fill_events, Selector};
pub(crate) use timerfd::TimerFd;
pub(crate) use waker::Waker;
