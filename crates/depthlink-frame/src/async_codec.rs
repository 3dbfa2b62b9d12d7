//! `tokio_util::codec` adapter for the payload wire format.

use bytes::{Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::codec::{decode_payload, encode_ack, encode_payload, Ack, DEFAULT_MAX_PAYLOAD};
use crate::error::FrameError;

/// Receiver-side codec: decodes length-prefixed payloads, encodes payloads
/// and acknowledgments.
#[derive(Debug, Clone)]
pub struct PayloadCodec {
    max_payload_size: usize,
}

impl PayloadCodec {
    pub fn new() -> Self {
        Self::with_max_payload(DEFAULT_MAX_PAYLOAD)
    }

    pub fn with_max_payload(max_payload_size: usize) -> Self {
        Self { max_payload_size }
    }
}

impl Default for PayloadCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for PayloadCodec {
    type Item = Bytes;
    type Error = FrameError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Bytes>, FrameError> {
        decode_payload(src, self.max_payload_size)
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Bytes>, FrameError> {
        match self.decode(src)? {
            Some(payload) => Ok(Some(payload)),
            None if src.is_empty() => Ok(None),
            None => Err(FrameError::ConnectionClosed),
        }
    }
}

impl Encoder<Ack> for PayloadCodec {
    type Error = FrameError;

    fn encode(&mut self, ack: Ack, dst: &mut BytesMut) -> Result<(), FrameError> {
        encode_ack(ack, dst);
        Ok(())
    }
}

impl Encoder<Bytes> for PayloadCodec {
    type Error = FrameError;

    fn encode(&mut self, payload: Bytes, dst: &mut BytesMut) -> Result<(), FrameError> {
        if payload.len() > self.max_payload_size {
            return Err(FrameError::PayloadTooLarge {
                size: payload.len(),
                max: self.max_payload_size,
            });
        }
        encode_payload(&payload, dst)
    }
}

#[cfg(test)]
mod tests {
    use futures_util::{SinkExt, StreamExt};
    use tokio_util::codec::{FramedRead, FramedWrite};

    use super::*;

    #[test]
    fn decode_waits_for_full_payload() {
        let mut codec = PayloadCodec::new();
        let mut buf = BytesMut::from(&[5u8, 0, 0, 0, b'd', b'e'][..]);
        assert!(codec.decode(&mut buf).unwrap().is_none());

        buf.extend_from_slice(b"pth");
        assert_eq!(codec.decode(&mut buf).unwrap().unwrap().as_ref(), b"depth");
    }

    #[test]
    fn decode_eof_with_partial_payload_fails() {
        let mut codec = PayloadCodec::new();
        let mut buf = BytesMut::from(&[5u8, 0, 0, 0, b'd'][..]);
        let err = codec.decode_eof(&mut buf).unwrap_err();
        assert!(matches!(err, FrameError::ConnectionClosed));
    }

    #[test]
    fn oversized_payload_not_encoded() {
        let mut codec = PayloadCodec::with_max_payload(2);
        let mut dst = BytesMut::new();
        let err = codec
            .encode(Bytes::from_static(b"big"), &mut dst)
            .unwrap_err();
        assert!(matches!(err, FrameError::PayloadTooLarge { .. }));
        assert!(dst.is_empty());
    }

    #[tokio::test]
    async fn framed_write_then_read() {
        let mut sink = FramedWrite::new(Vec::new(), PayloadCodec::new());
        sink.send(Bytes::from_static(b"color")).await.unwrap();
        sink.send(Bytes::from_static(b"depth")).await.unwrap();
        let wire = sink.into_inner();

        let mut stream = FramedRead::new(wire.as_slice(), PayloadCodec::new());
        assert_eq!(stream.next().await.unwrap().unwrap().as_ref(), b"color");
        assert_eq!(stream.next().await.unwrap().unwrap().as_ref(), b"depth");
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn acks_encode_to_le_words() {
        let mut sink = FramedWrite::new(Vec::new(), PayloadCodec::new());
        sink.send(Ack::Success).await.unwrap();
        assert_eq!(sink.into_inner(), vec![1, 0, 0, 0]);
    }
}
