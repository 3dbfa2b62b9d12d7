use std::io::{ErrorKind, Read};

use bytes::{Buf, Bytes, BytesMut};
use depthlink_transport::TcpConnection;

use crate::codec::{decode_ack, decode_payload, Ack, FrameConfig, ACK_SIZE};
use crate::error::{FrameError, Result};
use crate::writer::transport_to_frame_error;

const INITIAL_BUFFER_CAPACITY: usize = 8 * 1024;
const READ_CHUNK_SIZE: usize = 8 * 1024;

/// Read exactly `len` bytes without over-reading (blocking).
///
/// Returns [`FrameError::ConnectionClosed`] if the stream ends first.
pub fn read_exact_bytes<R: Read + ?Sized>(inner: &mut R, len: usize) -> Result<Bytes> {
    let mut buf = vec![0u8; len];
    let mut filled = 0usize;
    while filled < len {
        match inner.read(&mut buf[filled..]) {
            Ok(0) => return Err(FrameError::ConnectionClosed),
            Ok(n) => filled += n,
            Err(err) if err.kind() == ErrorKind::Interrupted => continue,
            Err(err) => return Err(FrameError::Io(err)),
        }
    }
    Ok(Bytes::from(buf))
}

/// Reads length-prefixed payloads and acknowledgments from any `Read` stream.
///
/// Handles partial reads internally; callers always get complete payloads.
pub struct PayloadReader<T> {
    inner: T,
    buf: BytesMut,
    config: FrameConfig,
}

impl<T: Read> PayloadReader<T> {
    /// Create a new payload reader with default configuration.
    pub fn new(inner: T) -> Self {
        Self::with_config(inner, FrameConfig::default())
    }

    /// Create a new payload reader with explicit configuration.
    pub fn with_config(inner: T, config: FrameConfig) -> Self {
        Self {
            inner,
            buf: BytesMut::with_capacity(INITIAL_BUFFER_CAPACITY),
            config,
        }
    }

    /// Read the next complete payload (blocking).
    ///
    /// Returns `Err(FrameError::ConnectionClosed)` when EOF is reached.
    pub fn read_payload(&mut self) -> Result<Bytes> {
        loop {
            if let Some(payload) = decode_payload(&mut self.buf, self.config.max_payload_size)? {
                return Ok(payload);
            }
            self.fill()?;
        }
    }

    /// Read the next acknowledgment (blocking).
    pub fn read_ack(&mut self) -> Result<Ack> {
        while self.buf.len() < ACK_SIZE {
            self.fill()?;
        }
        let ack = decode_ack(&self.buf[..ACK_SIZE])?;
        self.buf.advance(ACK_SIZE);
        Ok(ack)
    }

    /// Bytes received but not yet consumed.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Borrow the underlying stream.
    pub fn get_ref(&self) -> &T {
        &self.inner
    }

    /// Mutably borrow the underlying stream.
    pub fn get_mut(&mut self) -> &mut T {
        &mut self.inner
    }

    /// Consume the reader and return the inner stream.
    pub fn into_inner(self) -> T {
        self.inner
    }

    /// Update maximum payload size for subsequent decoding.
    pub fn set_max_payload_size(&mut self, max_payload_size: usize) {
        self.config.max_payload_size = max_payload_size;
    }

    /// Current payload reader configuration.
    pub fn config(&self) -> &FrameConfig {
        &self.config
    }

    fn fill(&mut self) -> Result<()> {
        let mut chunk = [0u8; READ_CHUNK_SIZE];
        loop {
            match self.inner.read(&mut chunk) {
                Ok(0) => return Err(FrameError::ConnectionClosed),
                Ok(n) => {
                    self.buf.extend_from_slice(&chunk[..n]);
                    return Ok(());
                }
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(FrameError::Io(err)),
            }
        }
    }
}

impl PayloadReader<TcpConnection> {
    /// Create a payload reader for a `TcpConnection` and apply read timeout from config.
    pub fn with_config_tcp(inner: TcpConnection, config: FrameConfig) -> Result<Self> {
        inner
            .set_read_timeout(config.read_timeout)
            .map_err(transport_to_frame_error)?;
        Ok(Self::with_config(inner, config))
    }
}
