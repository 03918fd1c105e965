//! Spawns a single worker thread that owns exactly one [`EventLoop`] for
//! its lifetime (§2 "EventLoopThread(Pool)"), grounded on zmuduo's
//! `net/event_loop_thread.h`/`.cc`.

use std::io;
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;

use crate::event_loop::EventLoop;

/// Distinguishes "still constructing" from "construction failed" so the
/// spawning thread's wait loop has a condition it can actually terminate
/// on in either case.
enum LoopState {
    Pending,
    Ready(Arc<EventLoop>),
    Failed,
}

pub struct EventLoopThread {
    event_loop: Arc<Mutex<LoopState>>,
    ready: Arc<Condvar>,
    handle: Option<JoinHandle<()>>,
}

impl EventLoopThread {
    /// Spawns the thread and blocks until its `EventLoop` is constructed,
    /// mirroring the original's condition-variable handoff so the caller
    /// never sees a pending loop.
    pub fn start() -> io::Result<EventLoopThread> {
        let event_loop = Arc::new(Mutex::new(LoopState::Pending));
        let ready = Arc::new(Condvar::new());

        let thread_loop = event_loop.clone();
        let thread_ready = ready.clone();
        let handle = std::thread::Builder::new()
            .name("event-loop-thread".to_string())
            .spawn(move || {
                let result = EventLoop::new();
                match result {
                    Ok(loop_) => {
                        {
                            let mut guard = thread_loop.lock().unwrap();
                            *guard = LoopState::Ready(loop_.clone());
                        }
                        thread_ready.notify_one();
                        if let Err(e) = loop_.run() {
                            log::error!("event-loop-thread: run() failed: {e}");
                        }
                    }
                    Err(e) => {
                        log::error!("event-loop-thread: failed to construct EventLoop: {e}");
                        *thread_loop.lock().unwrap() = LoopState::Failed;
                        thread_ready.notify_one();
                    }
                }
            })?;

        let mut guard = event_loop.lock().unwrap();
        while matches!(&*guard, LoopState::Pending) {
            guard = ready.wait(guard).unwrap();
        }
        drop(guard);

        Ok(EventLoopThread {
            event_loop,
            ready,
            handle: Some(handle),
        })
    }

    /// `None` if the spawned thread failed to construct its loop (or
    /// hasn't yet, though `start()` never returns until it has one way or
    /// the other).
    pub fn event_loop(&self) -> Option<Arc<EventLoop>> {
        match &*self.event_loop.lock().unwrap() {
            LoopState::Ready(loop_) => Some(loop_.clone()),
            LoopState::Pending | LoopState::Failed => None,
        }
    }
}

impl Drop for EventLoopThread {
    fn drop(&mut self) {
        if let Some(loop_) = self.event_loop() {
            loop_.quit();
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
        let _ = &self.ready;
    }
}
