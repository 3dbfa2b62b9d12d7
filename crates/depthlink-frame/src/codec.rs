use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{FrameError, Result};

/// Length prefix: one little-endian u32.
pub const LENGTH_PREFIX_SIZE: usize = 4;

/// Acknowledgment: one little-endian u32.
pub const ACK_SIZE: usize = 4;

/// Acknowledgment value meaning "payload received".
pub const ACK_SUCCESS: u32 = 1;

/// Acknowledgment value a receiver sends to refuse a payload.
pub const ACK_FAILURE: u32 = 0;

/// Default maximum payload size accepted by readers: 10 MiB.
pub const DEFAULT_MAX_PAYLOAD: usize = 10 * 1024 * 1024;

/// A decoded acknowledgment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ack {
    /// The peer received the payload (`1` on the wire).
    Success,
    /// Any other value.
    Rejected(u32),
}

impl Ack {
    /// Interpret a wire value.
    pub fn from_wire(value: u32) -> Self {
        if value == ACK_SUCCESS {
            Ack::Success
        } else {
            Ack::Rejected(value)
        }
    }

    /// The ack a receiver sends for a given outcome.
    pub fn from_outcome(success: bool) -> Self {
        if success {
            Ack::Success
        } else {
            Ack::Rejected(ACK_FAILURE)
        }
    }

    /// Wire value of this ack.
    pub fn to_wire(self) -> u32 {
        match self {
            Ack::Success => ACK_SUCCESS,
            Ack::Rejected(value) => value,
        }
    }

    pub fn is_success(self) -> bool {
        matches!(self, Ack::Success)
    }
}

/// Encode the length prefix announcing a payload of `len` bytes.
pub fn encode_length_prefix(len: usize) -> Result<[u8; LENGTH_PREFIX_SIZE]> {
    let len = u32::try_from(len).map_err(|_| FrameError::PayloadTooLarge {
        size: len,
        max: u32::MAX as usize,
    })?;
    Ok(len.to_le_bytes())
}

/// Encode a payload into the wire format.
///
/// Wire format:
/// ```text
/// ┌──────────────┬─────────────────┐
/// │ Length       │ Payload         │
/// │ (4B LE u32)  │ (Length bytes)  │
/// └──────────────┴─────────────────┘
/// ```
pub fn encode_payload(payload: &[u8], dst: &mut BytesMut) -> Result<()> {
    let prefix = encode_length_prefix(payload.len())?;
    dst.reserve(LENGTH_PREFIX_SIZE + payload.len());
    dst.put_slice(&prefix);
    dst.put_slice(payload);
    Ok(())
}

/// Decode a payload from a buffer.
///
/// Returns `Ok(None)` if the buffer doesn't contain a complete payload yet.
/// An announced length above `max_payload` is rejected as soon as the prefix
/// is available, before any payload bytes are buffered.
/// On success, consumes the prefix and payload bytes from the buffer.
pub fn decode_payload(src: &mut BytesMut, max_payload: usize) -> Result<Option<Bytes>> {
    if src.len() < LENGTH_PREFIX_SIZE {
        return Ok(None);
    }

    let mut prefix = [0u8; LENGTH_PREFIX_SIZE];
    prefix.copy_from_slice(&src[..LENGTH_PREFIX_SIZE]);
    let payload_len = u32::from_le_bytes(prefix) as usize;

    if payload_len > max_payload {
        return Err(FrameError::PayloadTooLarge {
            size: payload_len,
            max: max_payload,
        });
    }

    let total = LENGTH_PREFIX_SIZE + payload_len;
    if src.len() < total {
        src.reserve(total - src.len());
        return Ok(None);
    }

    src.advance(LENGTH_PREFIX_SIZE);
    Ok(Some(src.split_to(payload_len).freeze()))
}

/// Encode an acknowledgment.
pub fn encode_ack(ack: Ack, dst: &mut BytesMut) {
    dst.reserve(ACK_SIZE);
    dst.put_u32_le(ack.to_wire());
}

/// Decode an acknowledgment from exactly [`ACK_SIZE`] bytes.
pub fn decode_ack(bytes: &[u8]) -> Result<Ack> {
    let raw: [u8; ACK_SIZE] = bytes.try_into().map_err(|_| FrameError::ShortAck {
        received: bytes.len(),
    })?;
    Ok(Ack::from_wire(u32::from_le_bytes(raw)))
}

/// Configuration for payload readers and writers.
#[derive(Debug, Clone)]
pub struct FrameConfig {
    /// Maximum payload size in bytes. Default: 10 MiB.
    pub max_payload_size: usize,
    /// Read timeout for blocking operations.
    pub read_timeout: Option<std::time::Duration>,
    /// Write timeout for blocking operations.
    pub write_timeout: Option<std::time::Duration>,
}

impl Default for FrameConfig {
    fn default() -> Self {
        Self {
            max_payload_size: DEFAULT_MAX_PAYLOAD,
            read_timeout: None,
            write_timeout: None,
        }
    }
}
