//! Single-thread demultiplex/dispatch driver (§4.5): one per OS thread,
//! owning a [`Poller`], a [`TimerQueue`], a cross-thread wakeup fd, and the
//! mutex-protected pending-functor queue that is the library's only
//! cross-thread scheduling primitive.

use std::collections::VecDeque;
use std::io;
use std::os::fd::AsRawFd;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Once, Weak};
use std::thread::{self, ThreadId};
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::channel::Channel;
use crate::interest::Interest;
use crate::poller::Poller;
use crate::sys;
use crate::timer::{TimerCallback, TimerId, TimerQueue};

type Functor = Box<dyn FnOnce() + Send>;

static IGNORE_SIGPIPE: Once = Once::new();

fn ignore_sigpipe_once() {
    IGNORE_SIGPIPE.call_once(|| unsafe {
        libc::signal(libc::SIGPIPE, libc::SIG_IGN);
    });
}

pub struct EventLoop {
    self_weak: Weak<EventLoop>,
    thread_id: ThreadId,
    poller: Poller,
    waker: sys::Waker,
    waker_channel: Arc<Channel>,
    timer_queue: TimerQueue,
    pending: Mutex<VecDeque<Functor>>,
    calling_pending_functors: AtomicBool,
    quit: AtomicBool,
}

impl EventLoop {
    /// Constructs a loop bound to the calling thread. Per §5's "one loop
    /// per thread" invariant this should be called at most once per
    /// thread; nothing here enforces it beyond the natural fact that a
    /// second loop on the same thread would fight the first over `run()`.
    pub fn new() -> io::Result<Arc<EventLoop>> {
        ignore_sigpipe_once();

        let poller = Poller::new()?;
        let waker = sys::Waker::new()?;
        let waker_channel = Arc::new(Channel::new(waker.as_raw_fd()));
        let timer_queue = TimerQueue::new();

        let event_loop = Arc::new_cyclic(|weak| EventLoop {
            self_weak: weak.clone(),
            thread_id: thread::current().id(),
            poller,
            waker,
            waker_channel: waker_channel.clone(),
            timer_queue,
            pending: Mutex::new(VecDeque::new()),
            calling_pending_functors: AtomicBool::new(false),
            quit: AtomicBool::new(false),
        });

        {
            let weak = event_loop.self_weak.clone();
            waker_channel.set_read_callback(Box::new(move |_t| {
                if let Some(loop_) = weak.upgrade() {
                    let _ = loop_.waker.drain();
                }
            }));
        }
        waker_channel.set_interest(Some(Interest::READABLE));
        event_loop.poller.update_channel(&waker_channel)?;

        {
            let weak = event_loop.self_weak.clone();
            event_loop.timer_queue.channel().set_read_callback(Box::new(move |_t| {
                if let Some(loop_) = weak.upgrade() {
                    loop_.timer_queue.handle_read();
                }
            }));
        }
        event_loop.timer_queue.channel().set_interest(Some(Interest::READABLE));
        event_loop.poller.update_channel(event_loop.timer_queue.channel())?;

        Ok(event_loop)
    }

    pub fn is_in_loop_thread(&self) -> bool {
        thread::current().id() == self.thread_id
    }

    /// Mandatory precondition on every channel or poller mutation (§4.5).
    pub fn assert_in_loop_thread(&self) {
        assert!(
            self.is_in_loop_thread(),
            "EventLoop method called from a thread other than its own"
        );
    }

    /// Immediate-if-same-thread, else enqueue-and-wake.
    pub fn run_in_loop(&self, f: impl FnOnce() + Send + 'static) {
        if self.is_in_loop_thread() {
            f();
        } else {
            self.queue_in_loop(f);
        }
    }

    /// Always enqueues; wakes the loop if the caller is off-thread or a
    /// functor batch is already executing, so re-entrant enqueues from
    /// inside a running functor still get serviced without starving the
    /// poll.
    pub fn queue_in_loop(&self, f: impl FnOnce() + Send + 'static) {
        self.pending.lock().push_back(Box::new(f));
        if !self.is_in_loop_thread() || self.calling_pending_functors.load(Ordering::Acquire) {
            let _ = self.waker.wake();
        }
    }

    pub(crate) fn update_channel(&self, channel: &Arc<Channel>) -> io::Result<()> {
        self.assert_in_loop_thread();
        self.poller.update_channel(channel)
    }

    pub(crate) fn remove_channel(&self, channel: &Arc<Channel>) -> io::Result<()> {
        self.assert_in_loop_thread();
        self.poller.remove_channel(channel)
    }

    pub(crate) fn has_channel(&self, channel: &Arc<Channel>) -> bool {
        self.poller.has_channel(channel)
    }

    pub fn run_at(self: &Arc<Self>, when: Instant, callback: TimerCallback) -> TimerId {
        let (timer, id) = self.timer_queue.make_timer(when, None, callback);
        let loop_ = self.clone();
        self.run_in_loop(move || loop_.timer_queue.add_timer_in_loop(timer));
        id
    }

    pub fn run_after(self: &Arc<Self>, delay: Duration, callback: TimerCallback) -> TimerId {
        self.run_at(Instant::now() + delay, callback)
    }

    pub fn run_every(self: &Arc<Self>, interval: Duration, callback: TimerCallback) -> TimerId {
        let (timer, id) = self.timer_queue.make_timer(Instant::now() + interval, Some(interval), callback);
        let loop_ = self.clone();
        self.run_in_loop(move || loop_.timer_queue.add_timer_in_loop(timer));
        id
    }

    pub fn cancel(self: &Arc<Self>, id: TimerId) {
        let loop_ = self.clone();
        self.run_in_loop(move || loop_.timer_queue.cancel_in_loop(id));
    }

    pub fn quit(&self) {
        self.quit.store(true, Ordering::Release);
        // Wake a poll that might be blocked indefinitely; harmless if
        // called from the loop's own thread mid-iteration.
        if !self.is_in_loop_thread() {
            let _ = self.waker.wake();
        }
    }

    /// Iterates until `quit()` is observed: poll, dispatch each active
    /// channel in the order the poller returned them, then drain and
    /// execute every queued cross-thread functor (§4.5).
    pub fn run(&self) -> io::Result<()> {
        self.assert_in_loop_thread();
        while !self.quit.load(Ordering::Acquire) {
            let (receive_time, active) = self.poller.poll(Some(Duration::from_secs(10)))?;
            for entry in active {
                entry.channel.handle_event(receive_time, &entry.event);
            }
            self.run_pending_functors();
        }
        Ok(())
    }

    fn run_pending_functors(&self) {
        let mut functors: VecDeque<Functor> = {
            let mut pending = self.pending.lock();
            std::mem::take(&mut *pending)
        };
        self.calling_pending_functors.store(true, Ordering::Release);
        while let Some(f) = functors.pop_front() {
            f();
        }
        self.calling_pending_functors.store(false, Ordering::Release);
    }
}
