//! Per-socket connection state machine.
//!
//! Layers buffered non-blocking read/write on top of a channel. A
//! connection is shared as `Arc<TcpConnection>` between the I/O loop that
//! owns its channel and any thread calling `send`/`shutdown`; those calls
//! marshal closures onto the owning loop, so the channel, the buffers and
//! the context slot are single-writer without locks.
//!
//! State machine:
//!
//! ```text
//! Connecting --inform_connected--> Connected --shutdown/peer close-->
//! Disconnecting --output flushed--> Disconnected
//! ```
//!
//! `connection_destroyed` is the single full-teardown site: it disables all
//! channel interest, fires the connection callback exactly once, then
//! unregisters the channel — user code never observes a destroyed but
//! still-registered channel.

use crate::channel::Channel;
use crate::error::last_errno;
use crate::event_loop::{EventLoop, EventLoopHandle};
use crate::inet_addr::InetAddr;
use crate::socket::{self, Socket};
use evio_core::{evdebug, evtrace, evwarn, MsgBuffer};
use std::any::Any;
use std::cell::RefCell;
use std::collections::VecDeque;
use std::os::unix::io::RawFd;
use std::rc::Rc;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, Weak};

pub type ReceiveMessageHandler = Arc<dyn Fn(&Arc<TcpConnection>, &mut MsgBuffer) + Send + Sync>;
pub type ConnectionHandler = Arc<dyn Fn(&Arc<TcpConnection>) + Send + Sync>;
pub type WriteCompleteHandler = Arc<dyn Fn(&Arc<TcpConnection>) + Send + Sync>;
pub type CloseHandler = Arc<dyn Fn(&Arc<TcpConnection>) + Send + Sync>;

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting = 0,
    Connected = 1,
    Disconnecting = 2,
    Disconnected = 3,
}

impl ConnectionState {
    fn from_u8(v: u8) -> ConnectionState {
        match v {
            0 => ConnectionState::Connecting,
            1 => ConnectionState::Connected,
            2 => ConnectionState::Disconnecting,
            _ => ConnectionState::Disconnected,
        }
    }
}

/// Callbacks wired by the server before the connection goes live.
#[derive(Default)]
pub struct ConnectionCallbacks {
    pub on_receive: Option<ReceiveMessageHandler>,
    pub on_connection: Option<ConnectionHandler>,
    pub on_write_complete: Option<WriteCompleteHandler>,
    pub on_close: Option<CloseHandler>,
}

/// Loop-affine half of a connection.
struct ConnInner {
    socket: Socket,
    channel: Option<Rc<Channel>>,
    read_buffer: MsgBuffer,
    write_queue: VecDeque<MsgBuffer>,
    context: Option<Box<dyn Any + Send>>,
}

pub struct TcpConnection {
    loop_handle: Arc<EventLoopHandle>,
    self_weak: Weak<TcpConnection>,
    fd: RawFd,
    local_addr: InetAddr,
    peer_addr: InetAddr,
    state: AtomicU8,

    /// Count of sends queued on the loop; while non-zero, later sends must
    /// queue too so payload ordering is preserved.
    pending_sends: Mutex<u32>,

    on_receive: Option<ReceiveMessageHandler>,
    on_connection: Option<ConnectionHandler>,
    on_write_complete: Option<WriteCompleteHandler>,
    on_close: Option<CloseHandler>,

    inner: RefCell<ConnInner>,
}

// Safety: `inner` is single-writer loop-affine state. Between construction
// and `inform_connected` the constructing thread is the sole owner; the
// queue handoff to the owning loop establishes happens-before, and from
// then on `inner` is only touched from that loop's thread. Everything else
// is atomics, immutable fields, or internally synchronized.
unsafe impl Send for TcpConnection {}
unsafe impl Sync for TcpConnection {}

impl TcpConnection {
    /// Build a connection around an accepted descriptor, bound to the loop
    /// behind `loop_handle`. SO_KEEPALIVE is enabled on the socket.
    pub fn new(
        loop_handle: Arc<EventLoopHandle>,
        fd: RawFd,
        local_addr: InetAddr,
        peer_addr: InetAddr,
        callbacks: ConnectionCallbacks,
    ) -> Arc<TcpConnection> {
        let socket = Socket::from_fd(fd);
        socket.set_keep_alive(true);

        Arc::new_cyclic(|self_weak| TcpConnection {
            loop_handle,
            self_weak: self_weak.clone(),
            fd,
            local_addr,
            peer_addr,
            state: AtomicU8::new(ConnectionState::Connecting as u8),
            pending_sends: Mutex::new(0),
            on_receive: callbacks.on_receive,
            on_connection: callbacks.on_connection,
            on_write_complete: callbacks.on_write_complete,
            on_close: callbacks.on_close,
            inner: RefCell::new(ConnInner {
                socket,
                channel: None,
                read_buffer: MsgBuffer::new(),
                write_queue: VecDeque::new(),
                context: None,
            }),
        })
    }

    #[inline]
    pub fn fd(&self) -> RawFd {
        self.fd
    }

    pub fn local_addr(&self) -> &InetAddr {
        &self.local_addr
    }

    pub fn peer_addr(&self) -> &InetAddr {
        &self.peer_addr
    }

    pub fn loop_handle(&self) -> Arc<EventLoopHandle> {
        Arc::clone(&self.loop_handle)
    }

    #[inline]
    pub fn state(&self) -> ConnectionState {
        ConnectionState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn set_state(&self, state: ConnectionState) {
        self.state.store(state as u8, Ordering::Release);
    }

    #[inline]
    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    #[inline]
    pub fn is_disconnected(&self) -> bool {
        self.state() == ConnectionState::Disconnected
    }

    pub fn set_tcp_no_delay(&self, on: bool) {
        socket::set_tcp_no_delay_fd(self.fd, on);
    }

    /// Strong handle to self, for handing to callbacks and deferred tasks.
    /// Valid whenever a method is executing (the caller holds a strong ref).
    fn me(&self) -> Arc<TcpConnection> {
        self.self_weak
            .upgrade()
            .expect("connection method called during teardown")
    }

    // ── Context slot (opaque per-connection state for protocol layers) ──

    /// Install opaque context. Loop-affine.
    pub fn set_context(&self, context: Box<dyn Any + Send>) {
        debug_assert!(self.loop_handle.is_in_loop_thread());
        self.inner.borrow_mut().context = Some(context);
    }

    /// Take the context out (put it back with [`set_context`]). Taking
    /// instead of borrowing lets the caller invoke `send`/`shutdown` while
    /// holding it. Loop-affine.
    pub fn take_context(&self) -> Option<Box<dyn Any + Send>> {
        debug_assert!(self.loop_handle.is_in_loop_thread());
        self.inner.borrow_mut().context.take()
    }

    pub fn has_context(&self) -> bool {
        debug_assert!(self.loop_handle.is_in_loop_thread());
        self.inner.borrow().context.is_some()
    }

    // ── Lifecycle ──

    /// Enable read interest and fire the connection callback, on the owning
    /// loop. Called by the server after wiring callbacks.
    pub fn inform_connected(&self) {
        let conn = self.me();
        self.loop_handle.run_in_loop(move || {
            conn.connect_established();
        });
    }

    /// Loop-thread half of `inform_connected`.
    fn connect_established(&self) {
        let channel = EventLoop::with_current(|lp| lp.new_channel(self.fd))
            .expect("connection established outside its loop thread");

        let weak = self.self_weak.clone();
        channel.set_read_handler(move || {
            if let Some(conn) = weak.upgrade() {
                conn.handle_read();
            }
        });
        let weak = self.self_weak.clone();
        channel.set_write_handler(move || {
            if let Some(conn) = weak.upgrade() {
                conn.handle_write();
            }
        });
        let weak = self.self_weak.clone();
        channel.set_close_handler(move || {
            if let Some(conn) = weak.upgrade() {
                conn.handle_close();
            }
        });
        let weak = self.self_weak.clone();
        channel.set_error_handler(move || {
            if let Some(conn) = weak.upgrade() {
                conn.handle_error();
            }
        });

        self.inner.borrow_mut().channel = Some(Rc::clone(&channel));
        channel.enable_reading();
        self.set_state(ConnectionState::Connected);

        evdebug!("connection up: {}", self.peer_addr);

        if let Some(handler) = &self.on_connection {
            handler(&self.me());
        }
    }

    /// Full teardown. Runs on the owning loop; the close/connection
    /// callback fires at most once across `handle_close` and here, and the
    /// channel is unregistered only after that callback returns.
    pub fn connection_destroyed(&self) {
        if self.state() == ConnectionState::Connected {
            // Close path never ran (e.g. server stop): finish it here.
            self.set_state(ConnectionState::Disconnected);
            {
                let inner = self.inner.borrow();
                if let Some(channel) = &inner.channel {
                    channel.disable_all();
                }
            }
            if let Some(handler) = &self.on_connection {
                handler(&self.me());
            }
        }
        let channel = self.inner.borrow_mut().channel.take();
        if let Some(channel) = channel {
            channel.remove();
        }
        evdebug!("connection destroyed: {}", self.peer_addr);
    }

    /// Half-close the write side once pending output is flushed.
    /// Callable from any thread.
    pub fn shutdown(&self) {
        let conn = self.me();
        self.loop_handle.run_in_loop(move || {
            if conn.state() == ConnectionState::Connected {
                conn.set_state(ConnectionState::Disconnecting);
                let inner = conn.inner.borrow();
                let writing = inner
                    .channel
                    .as_ref()
                    .map(|c| c.is_writing())
                    .unwrap_or(false);
                if !writing {
                    // Nothing left to flush; half-close now. Otherwise the
                    // write-drain path completes the shutdown.
                    if let Err(errno) = inner.socket.shutdown_write() {
                        evwarn!("shutdown({}) failed: errno {}", conn.fd, errno);
                    }
                }
            }
        });
    }

    /// Close now, without waiting for output to flush. Callable from any
    /// thread.
    pub fn force_close(&self) {
        let conn = self.me();
        self.loop_handle.run_in_loop(move || {
            match conn.state() {
                ConnectionState::Connected | ConnectionState::Disconnecting => {
                    conn.set_state(ConnectionState::Disconnecting);
                    conn.handle_close();
                }
                _ => {}
            }
        });
    }

    // ── Sending ──

    /// Send bytes, preserving ordering across threads.
    ///
    /// On the owning loop with no queued sends pending, writes immediately;
    /// otherwise the payload is queued through the loop's task mechanism so
    /// it cannot interleave with earlier sends.
    pub fn send(&self, data: &[u8]) {
        if self.loop_handle.is_in_loop_thread() {
            let mut pending = self.pending_sends.lock().unwrap();
            if *pending == 0 {
                drop(pending);
                self.send_in_loop(data);
                return;
            }
            *pending += 1;
            drop(pending);
            self.queue_send(data.to_vec());
        } else {
            *self.pending_sends.lock().unwrap() += 1;
            self.queue_send(data.to_vec());
        }
    }

    fn queue_send(&self, data: Vec<u8>) {
        let conn = self.me();
        self.loop_handle.queue_in_loop(Box::new(move || {
            conn.send_in_loop(&data);
            *conn.pending_sends.lock().unwrap() -= 1;
        }));
    }

    /// Loop-thread write path: try an immediate non-blocking write when no
    /// backlog exists, buffer any remainder and enable write interest.
    fn send_in_loop(&self, data: &[u8]) {
        if self.state() != ConnectionState::Connected {
            evtrace!("send on non-connected {}, dropped", self.peer_addr);
            return;
        }

        let mut sent = 0usize;
        let mut fault = false;
        let mut fully_written_inline = false;
        {
            let mut inner = self.inner.borrow_mut();
            let writing = inner
                .channel
                .as_ref()
                .map(|c| c.is_writing())
                .unwrap_or(false);

            if !writing && inner.write_queue.is_empty() {
                let n = unsafe {
                    libc::write(self.fd, data.as_ptr() as *const libc::c_void, data.len())
                };
                if n >= 0 {
                    sent = n as usize;
                    if sent == data.len() {
                        fully_written_inline = true;
                    }
                } else {
                    let errno = last_errno();
                    if errno != libc::EWOULDBLOCK && errno != libc::EAGAIN {
                        if errno == libc::EPIPE || errno == libc::ECONNRESET {
                            evwarn!("send fault on {}: errno {}", self.peer_addr, errno);
                            fault = true;
                        }
                    }
                }
            }

            if !fault && sent < data.len() {
                if inner.write_queue.is_empty() {
                    inner.write_queue.push_back(MsgBuffer::new());
                }
                inner
                    .write_queue
                    .back_mut()
                    .expect("write queue non-empty")
                    .write(&data[sent..]);
                let channel = inner.channel.clone();
                if let Some(channel) = channel {
                    if !channel.is_writing() {
                        channel.enable_writing();
                    }
                }
            }
        }

        if fully_written_inline {
            if let Some(handler) = self.on_write_complete.clone() {
                let conn = self.me();
                self.loop_handle
                    .queue_in_loop(Box::new(move || handler(&conn)));
            }
        }
    }

    // ── Channel event handlers (owning loop only) ──

    /// Drain the descriptor into the inbound buffer (edge-triggered: read
    /// until the kernel is empty), then deliver to the receive callback.
    fn handle_read(&self) {
        let mut total = 0usize;
        let mut closed = false;

        // The buffer is moved out so the receive callback can call
        // send/shutdown without re-entering the inner cell.
        let mut buffer = {
            let mut inner = self.inner.borrow_mut();
            std::mem::replace(&mut inner.read_buffer, MsgBuffer::empty())
        };

        loop {
            let (n, errno) = buffer.read_fd(self.fd);
            if n > 0 {
                total += n as usize;
                continue;
            }
            if n == 0 {
                closed = true;
                break;
            }
            match errno {
                e if e == libc::EAGAIN || e == libc::EWOULDBLOCK => {}
                libc::EINTR => continue,
                libc::EPIPE | libc::ECONNRESET => {
                    // Reset surfaces again through the error/close events;
                    // nothing to deliver from here.
                    evtrace!("read fault on {}: errno {}", self.peer_addr, errno);
                }
                e => {
                    evwarn!("read error on {}: errno {}", self.peer_addr, e);
                    closed = true;
                }
            }
            break;
        }

        if total > 0 {
            if let Some(handler) = &self.on_receive {
                handler(&self.me(), &mut buffer);
            }
        }

        self.inner.borrow_mut().read_buffer = buffer;

        if closed {
            self.handle_close();
        }
    }

    /// Drain the output queue on write readiness. When it empties, disable
    /// write interest, fire the write-complete callback, and complete a
    /// pending shutdown.
    fn handle_write(&self) {
        let mut drained = false;
        let mut finish_shutdown = false;
        {
            let mut inner = self.inner.borrow_mut();
            let channel = match inner.channel.clone() {
                Some(channel) => channel,
                None => return,
            };
            if !channel.is_writing() {
                evtrace!("spurious write readiness on {}", self.peer_addr);
                return;
            }

            'drain: loop {
                let front = match inner.write_queue.front_mut() {
                    Some(front) => front,
                    None => break,
                };
                if front.readable_size() == 0 {
                    inner.write_queue.pop_front();
                    continue;
                }
                let readable = front.peek();
                let n = unsafe {
                    libc::write(
                        self.fd,
                        readable.as_ptr() as *const libc::c_void,
                        readable.len(),
                    )
                };
                if n >= 0 {
                    let n = n as usize;
                    let partial = n < front.readable_size();
                    front.retrieve(n);
                    if partial {
                        // Kernel buffer full; wait for the next readiness.
                        break 'drain;
                    }
                } else {
                    let errno = last_errno();
                    if errno != libc::EWOULDBLOCK && errno != libc::EAGAIN {
                        evwarn!("write error on {}: errno {}", self.peer_addr, errno);
                    }
                    break 'drain;
                }
            }

            while matches!(inner.write_queue.front(), Some(front) if front.readable_size() == 0) {
                inner.write_queue.pop_front();
            }

            if inner.write_queue.is_empty() {
                channel.disable_writing();
                drained = true;
                if self.state() == ConnectionState::Disconnecting {
                    finish_shutdown = true;
                }
            }
        }

        if drained {
            if let Some(handler) = &self.on_write_complete {
                handler(&self.me());
            }
        }
        if finish_shutdown {
            let inner = self.inner.borrow();
            if let Err(errno) = inner.socket.shutdown_write() {
                evtrace!("deferred shutdown({}) failed: errno {}", self.fd, errno);
            }
        }
    }

    /// Peer closed or the connection was force-closed. Fires the user
    /// connection callback (now observably disconnected) and the internal
    /// close handler; guarded so repeats are no-ops.
    fn handle_close(&self) {
        let prev = self
            .state
            .swap(ConnectionState::Disconnected as u8, Ordering::AcqRel);
        if prev == ConnectionState::Disconnected as u8 {
            return;
        }

        {
            let inner = self.inner.borrow();
            if let Some(channel) = &inner.channel {
                channel.disable_all();
            }
        }

        evdebug!("connection closed: {}", self.peer_addr);

        let me = self.me();
        if let Some(handler) = &self.on_connection {
            handler(&me);
        }
        if let Some(handler) = &self.on_close {
            handler(&me);
        }
    }

    fn handle_error(&self) {
        let errno = Socket::socket_error(self.fd);
        if errno == 0 {
            return;
        }
        evwarn!("connection error on {}: errno {}", self.peer_addr, errno);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_round_trip() {
        assert_eq!(
            ConnectionState::from_u8(ConnectionState::Connecting as u8),
            ConnectionState::Connecting
        );
        assert_eq!(
            ConnectionState::from_u8(ConnectionState::Disconnecting as u8),
            ConnectionState::Disconnecting
        );
        assert_eq!(ConnectionState::from_u8(200), ConnectionState::Disconnected);
    }
}
