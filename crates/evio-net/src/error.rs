//! Error types for the evio reactor.

use core::fmt;

/// Result type for reactor operations.
pub type NetResult<T> = Result<T, NetError>;

/// Errors that can occur in reactor operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NetError {
    /// Raw OS error (errno).
    Os(i32),

    /// A socket setup step failed (create/bind/listen/getsockname).
    SocketSetup { op: &'static str, errno: i32 },

    /// The address string could not be parsed.
    InvalidAddr,

    /// Start was called on an already running server/loop.
    AlreadyRunning,

    /// Stop/operation on something that is not running.
    NotRunning,

    /// Invalid configuration value.
    Config(&'static str),
}

impl fmt::Display for NetError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NetError::Os(errno) => write!(f, "os error: errno {}", errno),
            NetError::SocketSetup { op, errno } => {
                write!(f, "socket {} failed: errno {}", op, errno)
            }
            NetError::InvalidAddr => write!(f, "invalid address"),
            NetError::AlreadyRunning => write!(f, "already running"),
            NetError::NotRunning => write!(f, "not running"),
            NetError::Config(msg) => write!(f, "invalid configuration: {}", msg),
        }
    }
}

impl std::error::Error for NetError {}

/// Current thread's errno.
#[inline]
pub(crate) fn last_errno() -> i32 {
    unsafe { *libc::__errno_location() }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let e = NetError::SocketSetup {
            op: "bind",
            errno: libc::EADDRINUSE,
        };
        assert_eq!(
            format!("{}", e),
            format!("socket bind failed: errno {}", libc::EADDRINUSE)
        );
        assert_eq!(format!("{}", NetError::AlreadyRunning), "already running");
    }
}
