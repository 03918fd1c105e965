//! Round-robin pool of worker threads, each running one `EventLoop`
//! (§2 "EventLoopThread(Pool)"), grounded on zmuduo's
//! `net/event_loop_thread_pool.h`/`.cc`.

use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::config::EventLoopThreadPoolConfig;
use crate::event_loop::EventLoop;
use crate::event_loop_thread::EventLoopThread;

pub struct EventLoopThreadPool {
    base_loop: Arc<EventLoop>,
    threads: Vec<EventLoopThread>,
    next: AtomicUsize,
}

impl EventLoopThreadPool {
    /// `thread_num == 0` keeps every connection on `base_loop` itself
    /// (§6 "0 means run everything on the main loop").
    pub fn new(base_loop: Arc<EventLoop>, config: EventLoopThreadPoolConfig) -> io::Result<EventLoopThreadPool> {
        let mut threads = Vec::with_capacity(config.thread_num);
        for _ in 0..config.thread_num {
            threads.push(EventLoopThread::start()?);
        }
        Ok(EventLoopThreadPool {
            base_loop,
            threads,
            next: AtomicUsize::new(0),
        })
    }

    pub fn thread_num(&self) -> usize {
        self.threads.len()
    }

    /// Round-robin over worker loops; falls back to `base_loop` when no
    /// worker threads were configured.
    pub fn get_next_loop(&self) -> Arc<EventLoop> {
        if self.threads.is_empty() {
            return self.base_loop.clone();
        }
        let i = self.next.fetch_add(1, Ordering::Relaxed) % self.threads.len();
        self.threads[i].event_loop().unwrap_or_else(|| self.base_loop.clone())
    }

    pub fn all_loops(&self) -> Vec<Arc<EventLoop>> {
        if self.threads.is_empty() {
            return vec![self.base_loop.clone()];
        }
        self.threads.iter().filter_map(|t| t.event_loop()).collect()
    }
}
