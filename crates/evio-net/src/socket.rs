//! Owned non-blocking TCP socket.
//!
//! Thin wrapper over raw libc socket calls. Sockets are created
//! non-blocking + close-on-exec and the fd is closed on drop.

use crate::error::{last_errno, NetError, NetResult};
use crate::inet_addr::InetAddr;
use std::os::unix::io::RawFd;

pub struct Socket {
    fd: RawFd,
}

impl Socket {
    /// Create a non-blocking, close-on-exec TCP socket.
    pub fn new_nonblocking() -> NetResult<Socket> {
        let fd = unsafe {
            libc::socket(
                libc::AF_INET,
                libc::SOCK_STREAM | libc::SOCK_NONBLOCK | libc::SOCK_CLOEXEC,
                libc::IPPROTO_TCP,
            )
        };
        if fd < 0 {
            return Err(NetError::SocketSetup {
                op: "create",
                errno: last_errno(),
            });
        }
        Ok(Socket { fd })
    }

    /// Take ownership of an existing fd (e.g. one returned by accept).
    pub fn from_fd(fd: RawFd) -> Socket {
        Socket { fd }
    }

    #[inline]
    pub fn fd(&self) -> RawFd {
        self.fd
    }

    pub fn bind(&self, addr: &InetAddr) -> NetResult<()> {
        let ret = unsafe { libc::bind(self.fd, addr.as_sockaddr(), InetAddr::sockaddr_len()) };
        if ret != 0 {
            return Err(NetError::SocketSetup {
                op: "bind",
                errno: last_errno(),
            });
        }
        Ok(())
    }

    pub fn listen(&self, backlog: i32) -> NetResult<()> {
        if unsafe { libc::listen(self.fd, backlog) } < 0 {
            return Err(NetError::SocketSetup {
                op: "listen",
                errno: last_errno(),
            });
        }
        Ok(())
    }

    /// Accept one pending connection (non-blocking, close-on-exec).
    ///
    /// Returns the connected fd and the peer address, or the errno.
    pub fn accept(&self) -> Result<(RawFd, InetAddr), i32> {
        let mut peer: libc::sockaddr_in = unsafe { std::mem::zeroed() };
        let mut len = InetAddr::sockaddr_len();
        let fd = unsafe {
            libc::accept4(
                self.fd,
                &mut peer as *mut libc::sockaddr_in as *mut libc::sockaddr,
                &mut len,
                libc::SOCK_NONBLOCK | libc::SOCK_CLOEXEC,
            )
        };
        if fd < 0 {
            return Err(last_errno());
        }
        Ok((fd, InetAddr::from_raw(peer)))
    }

    /// Half-close the write side.
    pub fn shutdown_write(&self) -> Result<(), i32> {
        if unsafe { libc::shutdown(self.fd, libc::SHUT_WR) } < 0 {
            return Err(last_errno());
        }
        Ok(())
    }

    pub fn set_reuse_addr(&self, on: bool) {
        set_sock_flag(self.fd, libc::SOL_SOCKET, libc::SO_REUSEADDR, on);
    }

    pub fn set_reuse_port(&self, on: bool) {
        set_sock_flag(self.fd, libc::SOL_SOCKET, libc::SO_REUSEPORT, on);
    }

    pub fn set_keep_alive(&self, on: bool) {
        set_sock_flag(self.fd, libc::SOL_SOCKET, libc::SO_KEEPALIVE, on);
    }

    pub fn set_tcp_no_delay(&self, on: bool) {
        set_sock_flag(self.fd, libc::IPPROTO_TCP, libc::TCP_NODELAY, on);
    }

    /// Local address of a bound/connected fd.
    pub fn local_addr(fd: RawFd) -> Result<InetAddr, i32> {
        let mut addr: libc::sockaddr_in = unsafe { std::mem::zeroed() };
        let mut len = InetAddr::sockaddr_len();
        let ret = unsafe {
            libc::getsockname(
                fd,
                &mut addr as *mut libc::sockaddr_in as *mut libc::sockaddr,
                &mut len,
            )
        };
        if ret < 0 {
            return Err(last_errno());
        }
        Ok(InetAddr::from_raw(addr))
    }

    /// Peer address of a connected fd.
    pub fn peer_addr(fd: RawFd) -> Result<InetAddr, i32> {
        let mut addr: libc::sockaddr_in = unsafe { std::mem::zeroed() };
        let mut len = InetAddr::sockaddr_len();
        let ret = unsafe {
            libc::getpeername(
                fd,
                &mut addr as *mut libc::sockaddr_in as *mut libc::sockaddr,
                &mut len,
            )
        };
        if ret < 0 {
            return Err(last_errno());
        }
        Ok(InetAddr::from_raw(addr))
    }

    /// Pending SO_ERROR on the fd (0 when none).
    pub fn socket_error(fd: RawFd) -> i32 {
        let mut err: i32 = 0;
        let mut len = std::mem::size_of::<i32>() as libc::socklen_t;
        let ret = unsafe {
            libc::getsockopt(
                fd,
                libc::SOL_SOCKET,
                libc::SO_ERROR,
                &mut err as *mut i32 as *mut libc::c_void,
                &mut len,
            )
        };
        if ret < 0 {
            return last_errno();
        }
        err
    }
}

fn set_sock_flag(fd: RawFd, level: i32, opt: i32, on: bool) {
    let val: i32 = if on { 1 } else { 0 };
    unsafe {
        libc::setsockopt(
            fd,
            level,
            opt,
            &val as *const i32 as *const libc::c_void,
            std::mem::size_of::<i32>() as libc::socklen_t,
        );
    }
}

/// Set TCP_NODELAY on a raw fd (for connections that do not hold a Socket).
pub(crate) fn set_tcp_no_delay_fd(fd: RawFd, on: bool) {
    set_sock_flag(fd, libc::IPPROTO_TCP, libc::TCP_NODELAY, on);
}

impl Drop for Socket {
    fn drop(&mut self) {
        if self.fd >= 0 {
            unsafe {
                libc::close(self.fd);
            }
            self.fd = -1;
        }
    }
}
