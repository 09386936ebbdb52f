//! Event loop thread and round-robin group.
//!
//! An [`EventLoopThread`] owns one OS thread that constructs an
//! [`EventLoop`] and blocks in `start()`. Construction synchronizes until
//! the loop's handle exists, so `handle()` is safe immediately after
//! `new()` returns. [`run`](EventLoopThread::run) is idempotent and blocks
//! until the loop has begun its first iteration, guaranteeing no task is
//! lost between thread spawn and the first poll.
//!
//! An [`EventLoopGroup`] is a pool of such threads handing out loops
//! round-robin.

use crate::event_loop::{EventLoop, EventLoopHandle};
use evio_core::evdebug;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Mutex, Once};
use std::thread::JoinHandle;

pub struct EventLoopThread {
    handle: Arc<EventLoopHandle>,
    run_tx: mpsc::Sender<()>,
    started_rx: Mutex<mpsc::Receiver<()>>,
    run_once: Once,
    thread: Option<JoinHandle<()>>,
}

impl EventLoopThread {
    /// Spawn the thread and block until its loop object exists.
    pub fn new(name: &str, poll_timeout_ms: i32) -> EventLoopThread {
        let (handle_tx, handle_rx) = mpsc::channel();
        let (run_tx, run_rx) = mpsc::channel::<()>();
        let (started_tx, started_rx) = mpsc::channel::<()>();

        let thread_name = name.to_string();
        let thread = std::thread::Builder::new()
            .name(thread_name.clone())
            .spawn(move || {
                let mut lp = EventLoop::new();
                lp.set_poll_timeout(poll_timeout_ms);

                // Queued before start: runs in the loop's first drain, which
                // is how run() learns polling has actually begun.
                lp.handle().queue_in_loop(Box::new(move || {
                    let _ = started_tx.send(());
                }));

                handle_tx
                    .send(lp.handle())
                    .expect("event loop thread creator vanished");

                // Parked until run() releases us.
                if run_rx.recv().is_err() {
                    return;
                }
                lp.start();
            })
            .expect("failed to spawn event loop thread");

        let handle = handle_rx
            .recv()
            .expect("event loop thread died during construction");

        evdebug!("event loop thread {:?} constructed", thread_name);

        EventLoopThread {
            handle,
            run_tx,
            started_rx: Mutex::new(started_rx),
            run_once: Once::new(),
            thread: Some(thread),
        }
    }

    /// Release the thread into its poll loop. Idempotent; the first call
    /// blocks until the loop has begun polling, later calls no-op.
    pub fn run(&self) {
        self.run_once.call_once(|| {
            let _ = self.run_tx.send(());
            let _ = self.started_rx.lock().unwrap().recv();
        });
    }

    /// Handle to the thread's loop.
    pub fn handle(&self) -> Arc<EventLoopHandle> {
        Arc::clone(&self.handle)
    }

    /// Join the thread without stopping the loop (blocks until someone
    /// stops it).
    pub fn wait(&mut self) {
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl Drop for EventLoopThread {
    fn drop(&mut self) {
        // Release a never-run thread first so the join below cannot park
        // forever, then stop and join exactly once.
        self.run();
        self.handle.stop();
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

/// Round-robin pool of event loop threads.
pub struct EventLoopGroup {
    threads: Vec<EventLoopThread>,
    next: AtomicUsize,
}

impl EventLoopGroup {
    pub fn new(num_loops: usize, poll_timeout_ms: i32) -> EventLoopGroup {
        let threads = (0..num_loops)
            .map(|i| EventLoopThread::new(&format!("evio-io-{}", i), poll_timeout_ms))
            .collect();
        EventLoopGroup {
            threads,
            next: AtomicUsize::new(0),
        }
    }

    pub fn size(&self) -> usize {
        self.threads.len()
    }

    /// Release every thread into its poll loop.
    pub fn start_all(&self) {
        for thread in &self.threads {
            thread.run();
        }
    }

    /// Next loop, round-robin. `None` for an empty group.
    pub fn next_loop(&self) -> Option<Arc<EventLoopHandle>> {
        if self.threads.is_empty() {
            return None;
        }
        let idx = self.next.fetch_add(1, Ordering::Relaxed) % self.threads.len();
        Some(self.threads[idx].handle())
    }

    /// Direct indexed access.
    pub fn loop_at(&self, index: usize) -> Option<Arc<EventLoopHandle>> {
        self.threads.get(index).map(EventLoopThread::handle)
    }

    /// Stop every loop, then join every thread.
    pub fn stop_all(&mut self) {
        for thread in &self.threads {
            thread.handle().stop();
        }
        for thread in &mut self.threads {
            thread.wait();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;
    use std::time::Duration;

    #[test]
    fn test_handle_available_immediately() {
        let thread = EventLoopThread::new("evio-test-loop", 100);
        let handle = thread.handle();
        assert!(!handle.is_running()); // constructed but not yet released
        thread.run();
        assert!(handle.is_running());
    }

    #[test]
    fn test_run_is_idempotent_and_tasks_flow() {
        let thread = EventLoopThread::new("evio-test-loop2", 100);
        thread.run();
        thread.run();
        thread.run();

        let (tx, rx) = mpsc::channel();
        thread.handle().run_in_loop(move || {
            tx.send(std::thread::current().name().map(String::from))
                .unwrap();
        });
        let name = rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert_eq!(name.as_deref(), Some("evio-test-loop2"));
    }

    #[test]
    fn test_drop_without_run_does_not_hang() {
        let thread = EventLoopThread::new("evio-test-loop3", 100);
        drop(thread); // must release, stop and join cleanly
    }

    #[test]
    fn test_group_round_robin_cycles() {
        let mut group = EventLoopGroup::new(3, 100);
        group.start_all();

        let first = group.next_loop().unwrap();
        let second = group.next_loop().unwrap();
        let third = group.next_loop().unwrap();
        let wrapped = group.next_loop().unwrap();

        assert!(!Arc::ptr_eq(&first, &second));
        assert!(!Arc::ptr_eq(&second, &third));
        assert!(Arc::ptr_eq(&first, &wrapped));
        assert!(Arc::ptr_eq(&group.loop_at(0).unwrap(), &first));
        assert!(group.loop_at(3).is_none());

        group.stop_all();
    }

    #[test]
    fn test_empty_group_has_no_loops() {
        let group = EventLoopGroup::new(0, 100);
        assert_eq!(group.size(), 0);
        assert!(group.next_loop().is_none());
    }
}
