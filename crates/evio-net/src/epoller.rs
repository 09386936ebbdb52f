//! Epoller: wraps the epoll readiness facility for one event loop.
//!
//! Keeps the fd -> channel mapping so raw readiness entries can be resolved
//! back to their channel, and an auto-growing event buffer that doubles
//! whenever a poll fills it completely.
//!
//! Registration failures are fatal: once epoll_ctl disagrees with our
//! bookkeeping the loop cannot recover without a restart.

use crate::channel::{Channel, ChannelState};
use crate::error::last_errno;
use evio_core::evtrace;
use std::cell::RefCell;
use std::collections::HashMap;
use std::os::unix::io::RawFd;
use std::rc::{Rc, Weak};

const INIT_EVENT_CAPACITY: usize = 32;

pub struct Epoller {
    epoll_fd: RawFd,
    channels: RefCell<HashMap<RawFd, Weak<Channel>>>,
    events: RefCell<Vec<libc::epoll_event>>,
}

impl Epoller {
    /// Create the epoll instance. Failure here means the process cannot
    /// multiplex at all, so it panics.
    pub fn new() -> Rc<Epoller> {
        let epoll_fd = unsafe { libc::epoll_create1(libc::EPOLL_CLOEXEC) };
        if epoll_fd < 0 {
            panic!("epoll_create1 failed: errno {}", last_errno());
        }
        Rc::new(Epoller {
            epoll_fd,
            channels: RefCell::new(HashMap::new()),
            events: RefCell::new(vec![
                libc::epoll_event { events: 0, u64: 0 };
                INIT_EVENT_CAPACITY
            ]),
        })
    }

    #[inline]
    pub fn fd(&self) -> RawFd {
        self.epoll_fd
    }

    /// Wait for readiness and resolve each entry back to its channel.
    ///
    /// Doubles the internal event buffer after any poll that filled it, so
    /// repeated truncation is amortized away.
    pub fn poll(&self, timeout_ms: i32) -> Vec<(Rc<Channel>, u32)> {
        let mut events = self.events.borrow_mut();
        let num = unsafe {
            libc::epoll_wait(
                self.epoll_fd,
                events.as_mut_ptr(),
                events.len() as i32,
                timeout_ms,
            )
        };
        if num < 0 {
            let errno = last_errno();
            if errno != libc::EINTR {
                panic!("epoll_wait failed: errno {}", errno);
            }
            return Vec::new();
        }

        let num = num as usize;
        let mut ready = Vec::with_capacity(num);
        let channels = self.channels.borrow();
        for ev in events.iter().take(num) {
            let fd = ev.u64 as RawFd;
            let occurred = ev.events;
            if let Some(channel) = channels.get(&fd).and_then(Weak::upgrade) {
                ready.push((channel, occurred));
            } else {
                evtrace!("epoller: dropping stale readiness for fd {}", fd);
            }
        }
        drop(channels);

        if num == events.len() {
            let doubled = events.len() * 2;
            events.resize(doubled, libc::epoll_event { events: 0, u64: 0 });
        }

        ready
    }

    /// Apply the channel's current interest to the kernel table.
    ///
    /// `New -> Added` registers, `Added` with no remaining interest
    /// `-> Deleted` unregisters but keeps the bookkeeping entry, and
    /// `Deleted -> Added` re-registers.
    pub fn update_channel(&self, channel: &Rc<Channel>) {
        let fd = channel.fd();
        match channel.state() {
            ChannelState::Added => {
                if channel.is_none_event() {
                    self.ctl(libc::EPOLL_CTL_DEL, fd, 0);
                    channel.set_state(ChannelState::Deleted);
                } else {
                    self.ctl(libc::EPOLL_CTL_MOD, fd, channel.enabled_events());
                }
            }
            ChannelState::New => {
                self.channels.borrow_mut().insert(fd, Rc::downgrade(channel));
                channel.set_state(ChannelState::Added);
                self.ctl(libc::EPOLL_CTL_ADD, fd, channel.enabled_events());
            }
            ChannelState::Deleted => {
                channel.set_state(ChannelState::Added);
                self.ctl(libc::EPOLL_CTL_ADD, fd, channel.enabled_events());
            }
        }
    }

    /// Drop the channel from the kernel table and the fd map, resetting it
    /// to `New`.
    pub fn remove_channel(&self, channel: &Channel) {
        let fd = channel.fd();
        self.channels.borrow_mut().remove(&fd);
        if channel.state() == ChannelState::Added {
            self.ctl(libc::EPOLL_CTL_DEL, fd, 0);
        }
        channel.set_state(ChannelState::New);
    }

    fn ctl(&self, op: libc::c_int, fd: RawFd, events: u32) {
        // The engine always requests edge-triggered semantics.
        let mut ev = libc::epoll_event {
            events: if op != libc::EPOLL_CTL_DEL {
                events | libc::EPOLLET as u32
            } else {
                0
            },
            u64: fd as u64,
        };
        if unsafe { libc::epoll_ctl(self.epoll_fd, op, fd, &mut ev) } < 0 {
            // Registration desync is unrecoverable without a restart.
            panic!(
                "epoll_ctl op {} on fd {} failed: errno {}",
                op,
                fd,
                last_errno()
            );
        }
    }
}

impl Drop for Epoller {
    fn drop(&mut self) {
        unsafe {
            libc::close(self.epoll_fd);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pipe_fds() -> (RawFd, RawFd) {
        let mut fds = [0i32; 2];
        assert_eq!(unsafe { libc::pipe2(fds.as_mut_ptr(), libc::O_NONBLOCK) }, 0);
        (fds[0], fds[1])
    }

    fn close_fd(fd: RawFd) {
        unsafe {
            libc::close(fd);
        }
    }

    #[test]
    fn test_state_transitions() {
        let epoller = Epoller::new();
        let (r, w) = pipe_fds();
        let ch = Channel::new(r, Rc::downgrade(&epoller));

        assert_eq!(ch.state(), ChannelState::New);
        ch.enable_reading();
        assert_eq!(ch.state(), ChannelState::Added);
        ch.disable_all();
        assert_eq!(ch.state(), ChannelState::Deleted);
        ch.enable_reading();
        assert_eq!(ch.state(), ChannelState::Added);

        epoller.remove_channel(&ch);
        assert_eq!(ch.state(), ChannelState::New);

        close_fd(r);
        close_fd(w);
    }

    #[test]
    fn test_poll_resolves_ready_channel() {
        let epoller = Epoller::new();
        let (r, w) = pipe_fds();
        let ch = Channel::new(r, Rc::downgrade(&epoller));
        ch.enable_reading();

        assert!(epoller.poll(0).is_empty());

        let n = unsafe { libc::write(w, b"x".as_ptr() as *const libc::c_void, 1) };
        assert_eq!(n, 1);

        let ready = epoller.poll(100);
        assert_eq!(ready.len(), 1);
        assert_eq!(ready[0].0.fd(), r);
        assert_ne!(ready[0].1 & libc::EPOLLIN as u32, 0);

        epoller.remove_channel(&ch);
        close_fd(r);
        close_fd(w);
    }

    #[test]
    fn test_removed_channel_is_not_reported() {
        let epoller = Epoller::new();
        let (r, w) = pipe_fds();
        {
            let ch = Channel::new(r, Rc::downgrade(&epoller));
            ch.enable_reading();
            epoller.remove_channel(&ch);
        }
        let n = unsafe { libc::write(w, b"x".as_ptr() as *const libc::c_void, 1) };
        assert_eq!(n, 1);
        assert!(epoller.poll(0).is_empty());
        close_fd(r);
        close_fd(w);
    }
}
