//! Ordered set of deadlines sharing one kernel timer FD (§4.4), grounded on
//! zmuduo's `net/timer_queue.h` (`Entry = (Timestamp, shared_ptr<Timer>,
//! sequence)`, `TimerSet = std::set<Entry>`).

use std::collections::{BTreeMap, HashSet};
use std::os::fd::AsRawFd;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::channel::Channel;
use crate::sys;

pub type TimerCallback = Box<dyn FnMut() + Send>;

pub(crate) struct Timer {
    callback: Mutex<TimerCallback>,
    deadline: Mutex<Instant>,
    /// `None`/zero means one-shot (§3 "Intervals of zero mean one-shot").
    interval: Option<Duration>,
    sequence: u64,
}

impl Timer {
    fn new(deadline: Instant, interval: Option<Duration>, callback: TimerCallback, sequence: u64) -> Timer {
        Timer {
            callback: Mutex::new(callback),
            deadline: Mutex::new(deadline),
            interval,
            sequence,
        }
    }

    fn deadline(&self) -> Instant {
        *self.deadline.lock()
    }

    fn restart(&self, now: Instant) -> bool {
        match self.interval {
            Some(interval) if !interval.is_zero() => {
                *self.deadline.lock() = now + interval;
                true
            }
            _ => false,
        }
    }

    fn fire(&self) {
        (self.callback.lock())();
    }
}

/// A stable handle returned by `addTimer`, valid for `cancel` across the
/// timer's lifetime even after it has fired and been dropped from the
/// queue (in which case `cancel` is simply a no-op).
#[derive(Clone)]
pub struct TimerId {
    pub(crate) sequence: u64,
    pub(crate) timer: Weak<Timer>,
}

pub(crate) struct TimerQueue {
    channel: Arc<Channel>,
    timerfd: sys::TimerFd,
    timers: Mutex<BTreeMap<(Instant, u64), Arc<Timer>>>,
    /// Sequence numbers cancelled while their own callback is running
    /// (§4.4's "currently-firing set"), consulted by `handle_read` before
    /// requeueing a repeating timer.
    canceling_current: Mutex<HashSet<u64>>,
    calling_expired: std::sync::atomic::AtomicBool,
    next_sequence: AtomicU64,
}

impl TimerQueue {
    /// Timer creation failures are fatal at construction (§4.4).
    pub fn new() -> TimerQueue {
        let timerfd = sys::TimerFd::new().expect("failed to create timerfd");
        let channel = Arc::new(Channel::new(timerfd.as_raw_fd()));
        TimerQueue {
            channel,
            timerfd,
            timers: Mutex::new(BTreeMap::new()),
            canceling_current: Mutex::new(HashSet::new()),
            calling_expired: std::sync::atomic::AtomicBool::new(false),
            next_sequence: AtomicU64::new(1),
        }
    }

    pub(crate) fn channel(&self) -> &Arc<Channel> {
        &self.channel
    }

    fn next_sequence(&self) -> u64 {
        self.next_sequence.fetch_add(1, Ordering::Relaxed)
    }

    /// Builds the `Arc<Timer>`/`TimerId` pair. Does not touch the queue;
    /// call `add_timer_in_loop` (on the owning loop's thread) to insert.
    pub(crate) fn make_timer(&self, when: Instant, interval: Option<Duration>, callback: TimerCallback) -> (Arc<Timer>, TimerId) {
        let sequence = self.next_sequence();
        let timer = Arc::new(Timer::new(when, interval, callback, sequence));
        let id = TimerId {
            sequence,
            timer: Arc::downgrade(&timer),
        };
        (timer, id)
    }

    /// Inserts `timer`, rearming the kernel timer if it becomes the new
    /// earliest deadline.
    pub(crate) fn add_timer_in_loop(&self, timer: Arc<Timer>) {
        let mut timers = self.timers.lock();
        let earliest_changed = timers
            .keys()
            .next()
            .map(|&(deadline, _)| timer.deadline() < deadline)
            .unwrap_or(true);
        timers.insert((timer.deadline(), timer.sequence), timer);
        if earliest_changed {
            self.rearm(&timers);
        }
    }

    pub(crate) fn cancel_in_loop(&self, id: TimerId) {
        if self.calling_expired.load(Ordering::Acquire) {
            self.canceling_current.lock().insert(id.sequence);
        }
        if let Some(timer) = id.timer.upgrade() {
            let mut timers = self.timers.lock();
            timers.remove(&(timer.deadline(), timer.sequence));
        }
    }

    /// Drains the timerfd (coalescing missed ticks into one handling
    /// pass), fires every timer whose deadline has passed, and requeues
    /// repeating ones unless they were cancelled from inside their own
    /// callback.
    pub(crate) fn handle_read(&self) {
        let _ = self.timerfd.drain();
        let now = Instant::now();

        let expired = {
            let mut timers = self.timers.lock();
            let not_yet_expired = timers.split_off(&(now + Duration::from_nanos(1), 0));
            std::mem::replace(&mut *timers, not_yet_expired)
        };

        self.calling_expired.store(true, Ordering::Release);
        self.canceling_current.lock().clear();
        for (_, timer) in expired.iter() {
            timer.fire();
        }
        self.calling_expired.store(false, Ordering::Release);

        let canceled = std::mem::take(&mut *self.canceling_current.lock());
        let mut timers = self.timers.lock();
        for (_, timer) in expired {
            if canceled.contains(&timer.sequence) {
                continue;
            }
            if timer.restart(now) {
                timers.insert((timer.deadline(), timer.sequence), timer);
            }
        }
        self.rearm(&timers);
    }

    fn rearm(&self, timers: &BTreeMap<(Instant, u64), Arc<Timer>>) {
        let delay = timers.keys().next().map(|&(deadline, _)| {
            deadline.saturating_duration_since(Instant::now())
        });
        let _ = self.timerfd.set(delay);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn expired_timers_fire_in_deadline_order() {
        let queue = TimerQueue::new();
        let order = Arc::new(Mutex::new(Vec::new()));
        let now = Instant::now() - Duration::from_millis(10);

        for (label, offset_ms) in [("b", 5), ("a", 1), ("c", 9)] {
            let o = order.clone();
            let (timer, _id) = queue.make_timer(
                now + Duration::from_millis(offset_ms),
                None,
                Box::new(move || o.lock().push(label)),
            );
            queue.add_timer_in_loop(timer);
        }

        queue.handle_read();
        assert_eq!(*order.lock(), vec!["a", "b", "c"]);
    }

    #[test]
    fn cancel_before_firing_prevents_callback() {
        let queue = TimerQueue::new();
        let fired = Arc::new(AtomicUsize::new(0));
        let f = fired.clone();
        let (timer, id) = queue.make_timer(
            Instant::now() - Duration::from_millis(1),
            None,
            Box::new(move || {
                f.fetch_add(1, Ordering::SeqCst);
            }),
        );
        queue.add_timer_in_loop(timer);
        queue.cancel_in_loop(id);
        queue.handle_read();
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn one_shot_is_not_requeued() {
        let queue = TimerQueue::new();
        let (timer, _id) = queue.make_timer(Instant::now() - Duration::from_millis(1), None, Box::new(|| {}));
        queue.add_timer_in_loop(timer);
        queue.handle_read();
        assert!(queue.timers.lock().is_empty());
    }

    #[test]
    fn repeating_timer_is_requeued_after_firing() {
        let queue = TimerQueue::new();
        let (timer, _id) = queue.make_timer(
            Instant::now() - Duration::from_millis(1),
            Some(Duration::from_millis(50)),
            Box::new(|| {}),
        );
        queue.add_timer_in_loop(timer);
        queue.handle_read();
        assert_eq!(queue.timers.lock().len(), 1);
    }
}
