//! TCP server: one acceptor on the accept loop, connections assigned
//! round-robin to an I/O loop group.
//!
//! The server owns the canonical reference to every live connection; a
//! connection is destroyed only through the two-phase close path (erase
//! from the live set, then run `connection_destroyed` on the owning loop),
//! never by a transient reference count reaching zero.

use crate::acceptor::Acceptor;
use crate::config::ServerConfig;
use crate::error::{NetError, NetResult};
use crate::event_loop::EventLoopHandle;
use crate::event_loop_thread::EventLoopGroup;
use crate::inet_addr::InetAddr;
use crate::socket::Socket;
use crate::tcp_connection::{
    ConnectionCallbacks, ConnectionHandler, ReceiveMessageHandler, TcpConnection,
    WriteCompleteHandler,
};
use evio_core::{evdebug, evinfo, evwarn, MsgBuffer};
use std::cell::RefCell;
use std::collections::HashMap;
use std::os::unix::io::RawFd;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc, Mutex};

struct ServerShared {
    accept_loop: Arc<EventLoopHandle>,
    addr: Mutex<InetAddr>,
    config: ServerConfig,
    running: AtomicBool,

    /// Accept-loop-affine: created and dropped on the accept loop only.
    acceptor: RefCell<Option<Acceptor>>,

    group: Mutex<Option<EventLoopGroup>>,
    connections: Mutex<HashMap<RawFd, Arc<TcpConnection>>>,

    on_receive: Mutex<Option<ReceiveMessageHandler>>,
    on_connection: Mutex<Option<ConnectionHandler>>,
    on_write_complete: Mutex<Option<WriteCompleteHandler>>,
}

// Safety: `acceptor` is only touched from the accept loop's thread (start
// and stop both marshal onto it); everything else is behind locks or
// atomic.
unsafe impl Send for ServerShared {}
unsafe impl Sync for ServerShared {}

pub struct TcpServer {
    shared: Arc<ServerShared>,
}

impl TcpServer {
    /// Create a server that will accept on the loop behind `accept_loop`.
    /// The loop must be running (or be started) for `start` to complete.
    pub fn new(
        accept_loop: Arc<EventLoopHandle>,
        addr: InetAddr,
        config: ServerConfig,
    ) -> TcpServer {
        TcpServer {
            shared: Arc::new(ServerShared {
                accept_loop,
                addr: Mutex::new(addr),
                config,
                running: AtomicBool::new(false),
                acceptor: RefCell::new(None),
                group: Mutex::new(None),
                connections: Mutex::new(HashMap::new()),
                on_receive: Mutex::new(None),
                on_connection: Mutex::new(None),
                on_write_complete: Mutex::new(None),
            }),
        }
    }

    /// Register the receive callback. Register callbacks before `start`.
    pub fn on_receive_message(
        &self,
        handler: impl Fn(&Arc<TcpConnection>, &mut MsgBuffer) + Send + Sync + 'static,
    ) {
        *self.shared.on_receive.lock().unwrap() = Some(Arc::new(handler));
    }

    /// Register the connection up/down callback.
    pub fn on_connection(&self, handler: impl Fn(&Arc<TcpConnection>) + Send + Sync + 'static) {
        *self.shared.on_connection.lock().unwrap() = Some(Arc::new(handler));
    }

    /// Register the write-complete callback.
    pub fn on_write_complete(
        &self,
        handler: impl Fn(&Arc<TcpConnection>) + Send + Sync + 'static,
    ) {
        *self.shared.on_write_complete.lock().unwrap() = Some(Arc::new(handler));
    }

    /// The bound address (resolves the kernel-chosen port after `start`
    /// when constructed with port 0).
    pub fn addr(&self) -> InetAddr {
        *self.shared.addr.lock().unwrap()
    }

    /// Number of live connections.
    pub fn connection_count(&self) -> usize {
        self.shared.connections.lock().unwrap().len()
    }

    /// Bind, listen, and start accepting. Spins up the I/O loop group when
    /// configured. Blocks until the acceptor is live on the accept loop.
    pub fn start(&self) -> NetResult<()> {
        let shared = &self.shared;
        shared.config.validate()?;
        if shared.running.swap(true, Ordering::AcqRel) {
            return Err(NetError::AlreadyRunning);
        }

        if shared.config.num_io_loops > 0 {
            let group = EventLoopGroup::new(
                shared.config.num_io_loops,
                shared.config.poll_timeout_ms,
            );
            group.start_all();
            *shared.group.lock().unwrap() = Some(group);
        }

        // Acceptor setup is accept-loop-affine; round-trip for the result.
        let (tx, rx) = mpsc::channel();
        let setup_target = Arc::clone(shared);
        shared.accept_loop.run_in_loop(move || {
            let _ = tx.send(ServerShared::setup_acceptor(&setup_target));
        });
        let result = rx
            .recv()
            .expect("accept loop unavailable during server start");
        if result.is_err() {
            shared.running.store(false, Ordering::Release);
            if let Some(mut group) = shared.group.lock().unwrap().take() {
                group.stop_all();
            }
        }
        result
    }

    /// Force-close every live connection, release the acceptor and the I/O
    /// loop group. Runs on the accept loop; a foreign caller blocks until
    /// the teardown (including I/O thread joins) completes.
    pub fn stop(&self) {
        let shared = &self.shared;
        if !shared.running.swap(false, Ordering::AcqRel) {
            return;
        }
        if shared.accept_loop.is_in_loop_thread() {
            ServerShared::stop_on_accept_loop(shared);
        } else {
            let (tx, rx) = mpsc::channel();
            let target = Arc::clone(shared);
            shared.accept_loop.run_in_loop(move || {
                ServerShared::stop_on_accept_loop(&target);
                let _ = tx.send(());
            });
            let _ = rx.recv();
        }
    }
}

impl ServerShared {
    /// Accept-loop half of `start`.
    fn setup_acceptor(shared: &Arc<ServerShared>) -> NetResult<()> {
        let addr = *shared.addr.lock().unwrap();
        let acceptor = Acceptor::new(&addr, &shared.config)?;
        *shared.addr.lock().unwrap() = *acceptor.addr();

        let weak = Arc::downgrade(shared);
        acceptor.on_new_connection(Box::new(move |fd, peer| {
            if let Some(shared) = weak.upgrade() {
                ServerShared::new_connection(&shared, fd, peer);
            } else {
                unsafe {
                    libc::close(fd);
                }
            }
        }));
        acceptor.listen()?;

        evinfo!("server listening on {}", shared.addr.lock().unwrap());

        shared.acceptor.replace(Some(acceptor));
        Ok(())
    }

    /// Wire up one accepted descriptor: pick the next I/O loop, build the
    /// connection, register it, and inform it.
    fn new_connection(shared: &Arc<ServerShared>, fd: RawFd, peer: InetAddr) {
        let io_loop = shared
            .group
            .lock()
            .unwrap()
            .as_ref()
            .and_then(EventLoopGroup::next_loop)
            .unwrap_or_else(|| Arc::clone(&shared.accept_loop));

        let local = Socket::local_addr(fd).unwrap_or_default();

        let weak = Arc::downgrade(shared);
        let callbacks = ConnectionCallbacks {
            on_receive: shared.on_receive.lock().unwrap().clone(),
            on_connection: shared.on_connection.lock().unwrap().clone(),
            on_write_complete: shared.on_write_complete.lock().unwrap().clone(),
            on_close: Some(Arc::new(move |conn: &Arc<TcpConnection>| {
                if let Some(shared) = weak.upgrade() {
                    ServerShared::remove_connection(&shared, conn);
                }
            })),
        };

        let conn = TcpConnection::new(io_loop, fd, local, peer, callbacks);
        if shared.config.tcp_nodelay {
            conn.set_tcp_no_delay(true);
        }

        evdebug!("accepted {} (fd {})", peer, fd);

        shared
            .connections
            .lock()
            .unwrap()
            .insert(fd, Arc::clone(&conn));
        conn.inform_connected();
    }

    /// Two-phase close, both phases on the connection's owning loop: erase
    /// from the live set, then run the teardown.
    fn remove_connection(shared: &Arc<ServerShared>, conn: &Arc<TcpConnection>) {
        shared.connections.lock().unwrap().remove(&conn.fd());
        let doomed = Arc::clone(conn);
        conn.loop_handle().queue_in_loop(Box::new(move || {
            doomed.connection_destroyed();
        }));
    }

    /// Accept-loop half of `stop`.
    fn stop_on_accept_loop(shared: &Arc<ServerShared>) {
        let live: Vec<Arc<TcpConnection>> = shared
            .connections
            .lock()
            .unwrap()
            .drain()
            .map(|(_, conn)| conn)
            .collect();
        if !live.is_empty() {
            evwarn!("server stop: force-closing {} connections", live.len());
        }
        for conn in &live {
            conn.force_close();
        }

        // Accept-loop-affine drop of the listening channel.
        shared.acceptor.replace(None);

        // Joining the group drains every queued force-close before the
        // loops exit, which is what makes stop synchronous.
        if let Some(mut group) = shared.group.lock().unwrap().take() {
            group.stop_all();
        }

        evinfo!("server stopped");
    }
}
