//! The listening socket shared by every worker
//!
//! The supervisor binds once and hands the descriptor to each worker at a
//! fixed fd number. Workers never bind on their own.

use crate::error::{SlipwayError, SlipwayResult};
use std::net::{SocketAddr, TcpListener};
use std::os::unix::io::{AsRawFd, RawFd};
use tracing::info;

/// Descriptor number the listener occupies in every worker
pub const LISTEN_FD: RawFd = 3;

/// A bound, listening TCP socket owned by the supervisor
#[derive(Debug)]
pub struct SharedListener {
    listener: TcpListener,
    local_addr: SocketAddr,
}

impl SharedListener {
    /// Bind and listen on `addr`
    pub fn bind(addr: SocketAddr) -> SlipwayResult<Self> {
        let listener = TcpListener::bind(addr).map_err(|e| SlipwayError::Bind {
            address: addr.to_string(),
            source: e,
        })?;
        let local_addr = listener
            .local_addr()
            .map_err(|e| SlipwayError::io("reading bound address", e))?;
        info!("Listening on {}", local_addr);
        Ok(Self {
            listener,
            local_addr,
        })
    }

    /// Actual bound address (resolves port 0)
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn raw_fd(&self) -> RawFd {
        self.listener.as_raw_fd()
    }
}

/// Place `fd` at [`LISTEN_FD`] with close-on-exec cleared.
///
/// Runs in the forked child before exec, so it only makes raw syscalls.
pub(crate) fn install_listen_fd(fd: RawFd) -> std::io::Result<()> {
    // SAFETY: plain fd syscalls on descriptors owned by this process
    unsafe {
        if fd == LISTEN_FD {
            let flags = libc::fcntl(fd, libc::F_GETFD);
            if flags < 0 || libc::fcntl(fd, libc::F_SETFD, flags & !libc::FD_CLOEXEC) < 0 {
                return Err(std::io::Error::last_os_error());
            }
        } else if libc::dup2(fd, LISTEN_FD) < 0 {
            return Err(std::io::Error::last_os_error());
        }
    }
    Ok(())
}
