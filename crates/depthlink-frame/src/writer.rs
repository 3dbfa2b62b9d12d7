use std::io::{ErrorKind, Write};

use bytes::BytesMut;
use depthlink_transport::TcpConnection;

use crate::codec::{encode_ack, encode_length_prefix, Ack, FrameConfig};
use crate::error::{FrameError, Result};

/// Write every byte of `bytes`, retrying interrupted writes.
///
/// A write returning zero means the peer is gone. Timeouts surface as
/// [`FrameError::Io`].
pub fn write_all_bytes<W: Write + ?Sized>(inner: &mut W, bytes: &[u8]) -> Result<()> {
    let mut offset = 0usize;
    while offset < bytes.len() {
        match inner.write(&bytes[offset..]) {
            Ok(0) => return Err(FrameError::ConnectionClosed),
            Ok(n) => offset += n,
            Err(err) if err.kind() == ErrorKind::Interrupted => continue,
            Err(err) => return Err(FrameError::Io(err)),
        }
    }
    Ok(())
}

/// Writes length-prefixed payloads and acknowledgments to any `Write` stream.
pub struct PayloadWriter<T> {
    inner: T,
    buf: BytesMut,
    config: FrameConfig,
}

impl<T: Write> PayloadWriter<T> {
    /// Create a new payload writer with default configuration.
    pub fn new(inner: T) -> Self {
        Self::with_config(inner, FrameConfig::default())
    }

    /// Create a new payload writer with explicit configuration.
    pub fn with_config(inner: T, config: FrameConfig) -> Self {
        Self {
            inner,
            buf: BytesMut::with_capacity(crate::codec::ACK_SIZE),
            config,
        }
    }

    /// Send the length prefix announcing `len` payload bytes.
    pub fn write_length_prefix(&mut self, len: usize) -> Result<()> {
        self.check_size(len)?;
        let prefix = encode_length_prefix(len)?;
        write_all_bytes(&mut self.inner, &prefix)
    }

    /// Send raw payload bytes. Must follow [`write_length_prefix`](Self::write_length_prefix).
    pub fn write_payload_bytes(&mut self, payload: &[u8]) -> Result<()> {
        write_all_bytes(&mut self.inner, payload)?;
        self.flush()
    }

    /// Send a complete length-prefixed payload (blocking).
    pub fn send_payload(&mut self, payload: &[u8]) -> Result<()> {
        self.write_length_prefix(payload.len())?;
        self.write_payload_bytes(payload)
    }

    /// Send an acknowledgment (blocking).
    pub fn send_ack(&mut self, ack: Ack) -> Result<()> {
        self.buf.clear();
        encode_ack(ack, &mut self.buf);
        write_all_bytes(&mut self.inner, &self.buf)?;
        self.flush()
    }

    /// Flush the underlying stream.
    pub fn flush(&mut self) -> Result<()> {
        loop {
            match self.inner.flush() {
                Ok(()) => return Ok(()),
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(FrameError::Io(err)),
            }
        }
    }

    /// Borrow the underlying stream.
    pub fn get_ref(&self) -> &T {
        &self.inner
    }

    /// Mutably borrow the underlying stream.
    pub fn get_mut(&mut self) -> &mut T {
        &mut self.inner
    }

    /// Consume the writer and return the inner stream.
    pub fn into_inner(self) -> T {
        self.inner
    }

    /// Current payload writer configuration.
    pub fn config(&self) -> &FrameConfig {
        &self.config
    }

    fn check_size(&self, len: usize) -> Result<()> {
        if len > self.config.max_payload_size {
            return Err(FrameError::PayloadTooLarge {
                size: len,
                max: self.config.max_payload_size,
            });
        }
        Ok(())
    }
}

impl PayloadWriter<TcpConnection> {
    /// Create a payload writer for a `TcpConnection` and apply write timeout from config.
    pub fn with_config_tcp(inner: TcpConnection, config: FrameConfig) -> Result<Self> {
        inner
            .set_write_timeout(config.write_timeout)
            .map_err(transport_to_frame_error)?;
        Ok(Self::with_config(inner, config))
    }
}

pub(crate) fn transport_to_frame_error(err: depthlink_transport::TransportError) -> FrameError {
    match err {
        depthlink_transport::TransportError::Io(io)
        | depthlink_transport::TransportError::Accept(io) => FrameError::Io(io),
        depthlink_transport::TransportError::Bind { source, .. }
        | depthlink_transport::TransportError::Connect { source, .. }
        | depthlink_transport::TransportError::Resolve { source, .. } => FrameError::Io(source),
        other => FrameError::Io(std::io::Error::other(other.to_string())),
    }
}
