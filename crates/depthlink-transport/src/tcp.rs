use std::net::{SocketAddr, TcpListener, TcpStream};
use std::time::Duration;

use tracing::{debug, info};

use crate::endpoint::Endpoint;
use crate::error::{Result, TransportError};
use crate::stream::TcpConnection;

/// TCP transport.
///
/// Provides bind/accept for receivers and connect-with-timeout for senders.
pub struct TcpTransport {
    listener: TcpListener,
    local_addr: SocketAddr,
}

impl TcpTransport {
    /// Bind and listen on `addr` (e.g. `0.0.0.0:9999`, or port 0 for an ephemeral port).
    pub fn bind(addr: &str) -> Result<Self> {
        let listener = TcpListener::bind(addr).map_err(|source| TransportError::Bind {
            addr: addr.to_string(),
            source,
        })?;
        let local_addr = listener
            .local_addr()
            .map_err(|source| TransportError::Bind {
                addr: addr.to_string(),
                source,
            })?;

        info!(%local_addr, "listening on tcp socket");

        Ok(Self {
            listener,
            local_addr,
        })
    }

    /// Accept an incoming connection (blocking).
    pub fn accept(&self) -> Result<(TcpConnection, SocketAddr)> {
        let (stream, addr) = self.listener.accept().map_err(TransportError::Accept)?;
        debug!(%addr, "accepted connection");
        Ok((TcpConnection::from(stream), addr))
    }

    /// Connect to `endpoint`, trying every resolved address in turn (blocking).
    ///
    /// Each address gets the full `timeout`. The error from the last address
    /// is reported when none accepts.
    pub fn connect(endpoint: &Endpoint, timeout: Duration) -> Result<TcpConnection> {
        let addrs = endpoint.resolve()?;
        let mut last_err = None;

        for addr in addrs {
            match TcpStream::connect_timeout(&addr, timeout) {
                Ok(stream) => {
                    debug!(%endpoint, %addr, "connected to tcp endpoint");
                    return Ok(TcpConnection::from(stream));
                }
                Err(err) => {
                    debug!(%endpoint, %addr, error = %err, "connect attempt failed");
                    last_err = Some(err);
                }
            }
        }

        Err(TransportError::Connect {
            endpoint: endpoint.to_string(),
            source: last_err.unwrap_or_else(|| {
                std::io::Error::new(std::io::ErrorKind::NotFound, "no addresses to try")
            }),
        })
    }

    /// The address this transport is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Transport name for diagnostics.
    pub fn transport_name(&self) -> &'static str {
        "tcp"
    }
}
