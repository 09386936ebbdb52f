//! Acceptor: a channel specialization bound to a listening socket.
//!
//! Must be created on the loop thread that will own the listening channel.
//! On readiness it accepts in a loop until the kernel has no more pending
//! connections (edge-triggered registration requires draining), invoking
//! the new-connection callback for each accepted descriptor. Without a
//! callback the descriptor is closed immediately so an unconfigured
//! acceptor cannot leak fds.

use crate::channel::Channel;
use crate::config::ServerConfig;
use crate::error::NetResult;
use crate::event_loop::EventLoop;
use crate::inet_addr::InetAddr;
use crate::socket::Socket;
use evio_core::{everror, evwarn};
use std::cell::RefCell;
use std::os::unix::io::RawFd;
use std::rc::Rc;

pub type NewConnectionHandler = Box<dyn FnMut(RawFd, InetAddr)>;

struct AcceptorInner {
    socket: Socket,
    handler: RefCell<Option<NewConnectionHandler>>,
}

pub struct Acceptor {
    inner: Rc<AcceptorInner>,
    channel: Rc<Channel>,
    addr: InetAddr,
    backlog: i32,
}

impl Acceptor {
    /// Bind a listening socket on `addr`. Must run on a loop thread; the
    /// channel registers with that loop's epoller.
    ///
    /// Binding port 0 picks an ephemeral port; the resolved address is
    /// available through [`addr`](Self::addr).
    pub fn new(addr: &InetAddr, config: &ServerConfig) -> NetResult<Acceptor> {
        let socket = Socket::new_nonblocking()?;
        socket.set_reuse_addr(config.reuse_addr);
        socket.set_reuse_port(config.reuse_port);
        socket.bind(addr)?;

        let bound_addr = if addr.port() == 0 {
            Socket::local_addr(socket.fd()).unwrap_or(*addr)
        } else {
            *addr
        };

        let channel = EventLoop::with_current(|lp| lp.new_channel(socket.fd()))
            .expect("acceptor must be created on an event loop thread");

        let inner = Rc::new(AcceptorInner {
            socket,
            handler: RefCell::new(None),
        });

        let accept_source = Rc::clone(&inner);
        channel.set_read_handler(move || {
            Self::accept_pending(&accept_source);
        });

        Ok(Acceptor {
            inner,
            channel,
            addr: bound_addr,
            backlog: config.listen_backlog,
        })
    }

    /// The bound address (with the kernel-chosen port when bound to 0).
    pub fn addr(&self) -> &InetAddr {
        &self.addr
    }

    /// Install the new-connection callback.
    pub fn on_new_connection(&self, handler: NewConnectionHandler) {
        *self.inner.handler.borrow_mut() = Some(handler);
    }

    /// Start listening and enable read interest on the listening channel.
    pub fn listen(&self) -> NetResult<()> {
        self.inner.socket.listen(self.backlog)?;
        self.channel.enable_reading();
        Ok(())
    }

    /// Drain the kernel's pending-connection queue.
    fn accept_pending(inner: &Rc<AcceptorInner>) {
        loop {
            match inner.socket.accept() {
                Ok((fd, peer)) => {
                    let mut handler = inner.handler.borrow_mut();
                    match handler.as_mut() {
                        Some(handler) => handler(fd, peer),
                        None => {
                            // Unconfigured acceptor: do not leak the fd.
                            evwarn!("acceptor has no callback, closing fd {}", fd);
                            unsafe {
                                libc::close(fd);
                            }
                        }
                    }
                }
                Err(errno) if errno == libc::EAGAIN || errno == libc::EWOULDBLOCK => break,
                Err(errno) if errno == libc::EINTR => continue,
                Err(errno) if errno == libc::EMFILE || errno == libc::ENFILE => {
                    everror!("accept failed, fd table exhausted: errno {}", errno);
                    break;
                }
                Err(errno) => {
                    everror!("accept failed: errno {}", errno);
                    break;
                }
            }
        }
    }
}

impl Drop for Acceptor {
    fn drop(&mut self) {
        self.channel.disable_all();
        self.channel.remove();
    }
}
