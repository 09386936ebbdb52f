//! # evio-net
//!
//! Event-driven TCP engine built on the classic "one loop per thread"
//! reactor pattern: epoll readiness multiplexing, channels binding
//! descriptors to callbacks, eventfd-based cross-thread wakeup, and a
//! buffered non-blocking connection state machine.
//!
//! ## Modules
//!
//! - `error` - Error types
//! - `config` - Server configuration builder
//! - `inet_addr` - IPv4 socket address wrapper
//! - `socket` - Owned non-blocking TCP socket
//! - `channel` - Descriptor + interest mask + callback dispatch
//! - `epoller` - epoll wrapper with channel bookkeeping
//! - `event_loop` - Thread-affine poll/dispatch/task loop
//! - `event_loop_thread` - Loop-per-thread lifecycle and round-robin group
//! - `acceptor` - Listening-socket channel
//! - `tcp_connection` - Per-socket connection state machine
//! - `tcp_server` - Acceptor + I/O loop group wiring

#![allow(dead_code)]

cfg_if::cfg_if! {
    if #[cfg(target_os = "linux")] {
        // epoll + eventfd backend
    } else {
        compile_error!("evio-net requires Linux (epoll readiness backend)");
    }
}

pub mod acceptor;
pub mod channel;
pub mod config;
pub mod epoller;
pub mod error;
pub mod event_loop;
pub mod event_loop_thread;
pub mod inet_addr;
pub mod socket;
pub mod tcp_connection;
pub mod tcp_server;

// Re-exports for convenience
pub use config::ServerConfig;
pub use error::{NetError, NetResult};
pub use event_loop::{EventLoop, EventLoopHandle};
pub use event_loop_thread::{EventLoopGroup, EventLoopThread};
pub use inet_addr::InetAddr;
pub use tcp_connection::{ConnectionState, TcpConnection};
pub use tcp_server::TcpServer;
