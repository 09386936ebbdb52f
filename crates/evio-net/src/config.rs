//! Server configuration.

use crate::error::{NetError, NetResult};

/// Configuration for a [`TcpServer`](crate::TcpServer).
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Number of dedicated I/O loops. 0 runs all connections on the
    /// accept loop.
    pub num_io_loops: usize,

    /// Bounded epoll timeout so queued cross-thread tasks are never
    /// starved (default: 10s).
    pub poll_timeout_ms: i32,

    /// Set SO_REUSEADDR on the listening socket.
    pub reuse_addr: bool,

    /// Set SO_REUSEPORT on the listening socket.
    pub reuse_port: bool,

    /// Set TCP_NODELAY on accepted connections.
    pub tcp_nodelay: bool,

    /// listen(2) backlog.
    pub listen_backlog: i32,
}

impl Default for ServerConfig {
    fn default() -> Self {
        let num_cpus = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(4);

        Self {
            num_io_loops: num_cpus,
            poll_timeout_ms: 10_000,
            reuse_addr: true,
            reuse_port: true,
            tcp_nodelay: false,
            listen_backlog: libc::SOMAXCONN,
        }
    }
}

impl ServerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the number of dedicated I/O loops (0 = accept loop only).
    pub fn num_io_loops(mut self, n: usize) -> Self {
        self.num_io_loops = n;
        self
    }

    /// Set the epoll poll timeout in milliseconds.
    pub fn poll_timeout_ms(mut self, ms: i32) -> Self {
        self.poll_timeout_ms = ms;
        self
    }

    pub fn reuse_addr(mut self, on: bool) -> Self {
        self.reuse_addr = on;
        self
    }

    pub fn reuse_port(mut self, on: bool) -> Self {
        self.reuse_port = on;
        self
    }

    pub fn tcp_nodelay(mut self, on: bool) -> Self {
        self.tcp_nodelay = on;
        self
    }

    pub fn listen_backlog(mut self, backlog: i32) -> Self {
        self.listen_backlog = backlog;
        self
    }

    /// Validate configuration.
    pub fn validate(&self) -> NetResult<()> {
        if self.poll_timeout_ms <= 0 {
            return Err(NetError::Config("poll_timeout_ms must be positive"));
        }
        if self.listen_backlog <= 0 {
            return Err(NetError::Config("listen_backlog must be positive"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_validates() {
        assert!(ServerConfig::default().validate().is_ok());
    }

    #[test]
    fn test_rejects_bad_timeout() {
        let cfg = ServerConfig::default().poll_timeout_ms(0);
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_builder_chain() {
        let cfg = ServerConfig::new()
            .num_io_loops(2)
            .tcp_nodelay(true)
            .listen_backlog(128);
        assert_eq!(cfg.num_io_loops, 2);
        assert!(cfg.tcp_nodelay);
        assert_eq!(cfg.listen_backlog, 128);
    }
}
