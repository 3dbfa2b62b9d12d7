use std::io::{Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::time::Duration;

#[cfg(not(any(
    target_os = "linux",
    target_os = "android",
    target_os = "macos",
    target_os = "ios"
)))]
use tracing::debug;

use crate::error::Result;

/// TCP keepalive probing parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeepaliveConfig {
    /// Idle time before the first probe.
    pub idle: Duration,
    /// Interval between probes.
    pub interval: Duration,
    /// Unanswered probes before the connection is dropped.
    pub retries: u32,
}

impl Default for KeepaliveConfig {
    fn default() -> Self {
        Self {
            idle: Duration::from_secs(60),
            interval: Duration::from_secs(10),
            retries: 3,
        }
    }
}

/// A connected TCP stream implementing `Read` and `Write`.
///
/// This is the fundamental I/O type returned by transport operations. Clones
/// made with [`TcpConnection::try_clone`] share the same socket, so a reader
/// and a writer can live on different threads, and `shutdown` on any clone
/// unblocks the others.
pub struct TcpConnection {
    inner: TcpStream,
}

impl Read for TcpConnection {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.inner.read(buf)
    }
}

impl Write for TcpConnection {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.inner.write(buf)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.inner.flush()
    }
}

impl From<TcpStream> for TcpConnection {
    fn from(inner: TcpStream) -> Self {
        Self { inner }
    }
}

impl TcpConnection {
    /// Set read timeout on the underlying stream.
    pub fn set_read_timeout(&self, timeout: Option<Duration>) -> Result<()> {
        self.inner.set_read_timeout(timeout).map_err(Into::into)
    }

    /// Set write timeout on the underlying stream.
    pub fn set_write_timeout(&self, timeout: Option<Duration>) -> Result<()> {
        self.inner.set_write_timeout(timeout).map_err(Into::into)
    }

    /// Disable Nagle's algorithm so small length prefixes and acks are not delayed.
    pub fn set_nodelay(&self, nodelay: bool) -> Result<()> {
        self.inner.set_nodelay(nodelay).map_err(Into::into)
    }

    /// Try to clone this stream (creates a new file descriptor).
    pub fn try_clone(&self) -> Result<Self> {
        let cloned = self.inner.try_clone()?;
        Ok(Self::from(cloned))
    }

    /// Address of the connected peer.
    pub fn peer_addr(&self) -> Result<SocketAddr> {
        self.inner.peer_addr().map_err(Into::into)
    }

    /// Local address of this end of the connection.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.inner.local_addr().map_err(Into::into)
    }

    /// Shut down both directions. Blocked reads and writes on every clone fail.
    ///
    /// Shutting down an already-closed socket is not an error.
    pub fn shutdown(&self) {
        let _ = self.inner.shutdown(Shutdown::Both);
    }

    /// Consume the wrapper and return the standard library stream.
    pub fn into_std(self) -> TcpStream {
        self.inner
    }

    /// Convert into a tokio stream for async codecs.
    #[cfg(feature = "async")]
    pub fn into_tokio(self) -> Result<tokio::net::TcpStream> {
        self.inner.set_nonblocking(true)?;
        tokio::net::TcpStream::from_std(self.inner).map_err(Into::into)
    }

    /// Enable TCP keepalive probing.
    ///
    /// Probe idle time, interval and count are applied where the platform
    /// exposes them; elsewhere they stay at the system defaults.
    #[cfg(unix)]
    pub fn set_keepalive(&self, config: &KeepaliveConfig) -> Result<()> {
        use std::os::fd::AsRawFd;

        let fd = self.inner.as_raw_fd();
        setsockopt_int(fd, libc::SOL_SOCKET, libc::SO_KEEPALIVE, 1)?;
        set_probe_timing(fd, config)
    }

    /// Keepalive is left to the platform on non-unix targets.
    #[cfg(not(unix))]
    pub fn set_keepalive(&self, _config: &KeepaliveConfig) -> Result<()> {
        debug!("keepalive socket options unavailable on this platform; not configured");
        Ok(())
    }

    /// Whether `SO_KEEPALIVE` is set on the socket (Linux only).
    #[cfg(target_os = "linux")]
    pub fn keepalive_enabled(&self) -> Option<bool> {
        use std::os::fd::AsRawFd;

        let fd = self.inner.as_raw_fd();
        let mut value: libc::c_int = 0;
        let mut len = std::mem::size_of::<libc::c_int>() as libc::socklen_t;

        // SAFETY: `value` and `len` are valid writable pointers for the provided sizes,
        // and `fd` is an open TCP socket descriptor owned by this process.
        let rc = unsafe {
            libc::getsockopt(
                fd,
                libc::SOL_SOCKET,
                libc::SO_KEEPALIVE,
                (&mut value as *mut libc::c_int).cast::<libc::c_void>(),
                &mut len,
            )
        };

        if rc == 0 {
            Some(value != 0)
        } else {
            None
        }
    }

    /// Whether `SO_KEEPALIVE` is set on the socket.
    ///
    /// Returns `None` on platforms where it is not queried.
    #[cfg(not(target_os = "linux"))]
    pub fn keepalive_enabled(&self) -> Option<bool> {
        None
    }
}

#[cfg(any(
    target_os = "linux",
    target_os = "android",
    target_os = "macos",
    target_os = "ios"
))]
fn set_probe_timing(fd: std::os::fd::RawFd, config: &KeepaliveConfig) -> Result<()> {
    #[cfg(any(target_os = "linux", target_os = "android"))]
    let idle_option = libc::TCP_KEEPIDLE;
    #[cfg(any(target_os = "macos", target_os = "ios"))]
    let idle_option = libc::TCP_KEEPALIVE;

    setsockopt_int(fd, libc::IPPROTO_TCP, idle_option, clamp_secs(config.idle))?;
    setsockopt_int(
        fd,
        libc::IPPROTO_TCP,
        libc::TCP_KEEPINTVL,
        clamp_secs(config.interval),
    )?;
    let retries = libc::c_int::try_from(config.retries).unwrap_or(libc::c_int::MAX);
    setsockopt_int(fd, libc::IPPROTO_TCP, libc::TCP_KEEPCNT, retries)?;
    Ok(())
}

#[cfg(all(
    unix,
    not(any(
        target_os = "linux",
        target_os = "android",
        target_os = "macos",
        target_os = "ios"
    ))
))]
fn set_probe_timing(_fd: std::os::fd::RawFd, _config: &KeepaliveConfig) -> Result<()> {
    debug!("keepalive probe timing left at system defaults");
    Ok(())
}

#[cfg(any(
    target_os = "linux",
    target_os = "android",
    target_os = "macos",
    target_os = "ios"
))]
fn clamp_secs(duration: Duration) -> libc::c_int {
    libc::c_int::try_from(duration.as_secs().max(1)).unwrap_or(libc::c_int::MAX)
}

#[cfg(unix)]
fn setsockopt_int(
    fd: std::os::fd::RawFd,
    level: libc::c_int,
    name: libc::c_int,
    value: libc::c_int,
) -> std::io::Result<()> {
    // SAFETY: `value` lives for the duration of the call and its size is passed
    // alongside; `fd` is an open socket descriptor owned by this process.
    let rc = unsafe {
        libc::setsockopt(
            fd,
            level,
            name,
            (&value as *const libc::c_int).cast::<libc::c_void>(),
            std::mem::size_of::<libc::c_int>() as libc::socklen_t,
        )
    };
    if rc == 0 {
        Ok(())
    } else {
        Err(std::io::Error::last_os_error())
    }
}

impl std::fmt::Debug for TcpConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TcpConnection")
            .field("peer", &self.inner.peer_addr().ok())
            .finish()
    }
}
