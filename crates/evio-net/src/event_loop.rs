//! Single-threaded event loop: poll the epoller, dispatch ready channels,
//! then drain the cross-thread task queue.
//!
//! One loop per OS thread. The loop splits into two halves:
//!
//! - [`EventLoop`] — the loop-affine half (epoller, channels, the run
//!   loop itself). Lives on its thread's stack and never crosses threads.
//! - [`EventLoopHandle`] — the `Send + Sync` half (quit/running flags, the
//!   task queue, the wakeup eventfd). Shared via `Arc` with anything that
//!   needs to marshal work onto the loop.
//!
//! Cross-thread mutation of loop-affine objects is expressed by queueing a
//! closure on the handle; writing a sentinel to the eventfd forces the
//! blocking `epoll_wait` to return so the closure runs promptly.

use crate::channel::Channel;
use crate::epoller::Epoller;
use crate::error::last_errno;
use crossbeam_queue::SegQueue;
use evio_core::{evdebug, evtrace};
use std::cell::Cell;
use std::os::unix::io::RawFd;
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::ThreadId;

/// A deferred closure marshaled onto an event loop.
pub type Task = Box<dyn FnOnce() + Send>;

/// Default bounded poll timeout; queued tasks are observed at least this
/// often even without I/O activity.
pub const DEFAULT_POLL_TIMEOUT_MS: i32 = 10_000;

thread_local! {
    /// The loop currently driving this thread, while inside `start()`.
    static CURRENT_LOOP: Cell<*const EventLoop> = const { Cell::new(std::ptr::null()) };
}

/// The shareable half of an event loop.
pub struct EventLoopHandle {
    thread_id: ThreadId,
    running: AtomicBool,
    quit: AtomicBool,
    wakeup_fd: RawFd,
    pending: SegQueue<Task>,
}

impl EventLoopHandle {
    /// Whether the calling thread is the loop's owning thread.
    #[inline]
    pub fn is_in_loop_thread(&self) -> bool {
        std::thread::current().id() == self.thread_id
    }

    #[inline]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Run `f` immediately when called from the owning thread, otherwise
    /// queue it and wake the loop.
    pub fn run_in_loop(&self, f: impl FnOnce() + Send + 'static) {
        if self.is_in_loop_thread() {
            f();
        } else {
            self.queue_in_loop(Box::new(f));
        }
    }

    /// Queue a task for the loop's next drain phase.
    pub fn queue_in_loop(&self, task: Task) {
        self.pending.push(task);
        // A foreign producer (or a not-yet-polling loop) must interrupt the
        // blocking poll or the task would wait out the full timeout.
        if !self.is_in_loop_thread() || !self.is_running() {
            self.wakeup();
        }
    }

    /// Stop the loop. Idempotent, callable from any thread; a foreign
    /// caller also wakes the loop so the blocking poll returns promptly.
    pub fn stop(&self) {
        self.quit.store(true, Ordering::Release);
        if !self.is_in_loop_thread() {
            self.wakeup();
        }
    }

    /// Write the sentinel to the wakeup eventfd. Multiple writes before the
    /// loop drains are coalesced by eventfd counter semantics.
    pub fn wakeup(&self) {
        let one: u64 = 1;
        let ret = unsafe {
            libc::write(
                self.wakeup_fd,
                &one as *const u64 as *const libc::c_void,
                std::mem::size_of::<u64>(),
            )
        };
        if ret < 0 {
            let errno = last_errno();
            // EAGAIN means the counter is saturated: a wakeup is already
            // pending, which is all we need.
            if errno != libc::EAGAIN {
                evtrace!("event loop wakeup write failed: errno {}", errno);
            }
        }
    }
}

/// The loop-affine half: constructed and driven on a single thread.
pub struct EventLoop {
    handle: Arc<EventLoopHandle>,
    epoller: Rc<Epoller>,
    wakeup_channel: Rc<Channel>,
    poll_timeout_ms: i32,
}

impl EventLoop {
    /// Construct an event loop owned by the calling thread.
    ///
    /// The wakeup eventfd is created here; failure to get one means the
    /// loop could never be interrupted, so it panics.
    pub fn new() -> EventLoop {
        let wakeup_fd =
            unsafe { libc::eventfd(0, libc::EFD_NONBLOCK | libc::EFD_CLOEXEC) };
        if wakeup_fd < 0 {
            panic!("eventfd failed: errno {}", last_errno());
        }

        let epoller = Epoller::new();
        let handle = Arc::new(EventLoopHandle {
            thread_id: std::thread::current().id(),
            running: AtomicBool::new(false),
            quit: AtomicBool::new(false),
            wakeup_fd,
            pending: SegQueue::new(),
        });

        let wakeup_channel = Channel::new(wakeup_fd, Rc::downgrade(&epoller));
        // The override handler's sole job is draining the sentinel so the
        // fd goes quiet again; the real work happens in the drain phase.
        wakeup_channel.set_event_handler(move || {
            let mut count: u64 = 0;
            let ret = unsafe {
                libc::read(
                    wakeup_fd,
                    &mut count as *mut u64 as *mut libc::c_void,
                    std::mem::size_of::<u64>(),
                )
            };
            if ret < 0 {
                evtrace!("wakeup drain failed: errno {}", last_errno());
            }
        });
        wakeup_channel.enable_reading();

        EventLoop {
            handle,
            epoller,
            wakeup_channel,
            poll_timeout_ms: DEFAULT_POLL_TIMEOUT_MS,
        }
    }

    pub fn set_poll_timeout(&mut self, timeout_ms: i32) {
        self.poll_timeout_ms = timeout_ms;
    }

    /// Shareable handle for cross-thread task dispatch.
    pub fn handle(&self) -> Arc<EventLoopHandle> {
        Arc::clone(&self.handle)
    }

    /// Run `f` with the loop driving the current thread, if any.
    ///
    /// Valid only while that loop is inside [`start`](Self::start), which is
    /// exactly when marshaled tasks run.
    pub fn with_current<R>(f: impl FnOnce(&EventLoop) -> R) -> Option<R> {
        CURRENT_LOOP.with(|cell| {
            let ptr = cell.get();
            if ptr.is_null() {
                None
            } else {
                // Safety: the pointer is set on entry to start() and cleared
                // before it returns; the loop outlives every task it runs.
                Some(f(unsafe { &*ptr }))
            }
        })
    }

    /// Create a channel registered against this loop's epoller.
    pub fn new_channel(&self, fd: RawFd) -> Rc<Channel> {
        Channel::new(fd, Rc::downgrade(&self.epoller))
    }

    /// Run until [`EventLoopHandle::stop`] is observed.
    ///
    /// Only one thread may ever call this, exactly once; a second start is
    /// a usage error. Each iteration polls with a bounded timeout,
    /// dispatches ready channels, then drains the task queue completely —
    /// tasks queued while draining run in the same drain, so loop-affine
    /// mutations see bounded latency.
    pub fn start(&mut self) {
        assert!(
            self.handle.is_in_loop_thread(),
            "event loop started from a foreign thread"
        );
        if self.handle.running.swap(true, Ordering::AcqRel) {
            panic!("event loop started twice");
        }
        CURRENT_LOOP.with(|cell| {
            assert!(
                cell.get().is_null(),
                "thread already claimed by another event loop"
            );
            cell.set(self as *const EventLoop);
        });

        evdebug!("event loop started (wakeup fd {})", self.handle.wakeup_fd);

        while !self.handle.quit.load(Ordering::Acquire) {
            let ready = self.epoller.poll(self.poll_timeout_ms);
            for (channel, occurred) in ready {
                channel.set_occurred_events(occurred);
                channel.handle_event();
            }
            self.drain_pending();
        }

        CURRENT_LOOP.with(|cell| cell.set(std::ptr::null()));
        self.handle.running.store(false, Ordering::Release);
        evdebug!("event loop stopped");
    }

    fn drain_pending(&self) {
        while let Some(task) = self.handle.pending.pop() {
            task();
        }
    }
}

impl Drop for EventLoop {
    fn drop(&mut self) {
        self.wakeup_channel.disable_all();
        self.wakeup_channel.remove();
        unsafe {
            libc::close(self.handle.wakeup_fd);
        }
    }
}

impl Default for EventLoop {
    fn default() -> Self {
        Self::new()
    }
}
