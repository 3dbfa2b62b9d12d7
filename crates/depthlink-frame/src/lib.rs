//! Length-prefixed payload framing and acknowledgments for depthlink streams.
//!
//! Every payload is framed as a 4-byte little-endian length followed by the
//! payload bytes. After a payload has been read completely the receiver
//! answers with a 4-byte little-endian acknowledgment: `1` for success,
//! anything else for failure. There is no magic, no handshake and no version
//! negotiation.
//!
//! A captured frame is two payloads, color then depth, each acknowledged
//! before the next one starts.

#[cfg(feature = "async")]
pub mod async_codec;
pub mod codec;
pub mod error;
pub mod layout;
pub mod reader;
pub mod writer;

#[cfg(feature = "async")]
pub use async_codec::PayloadCodec;
pub use codec::{
    decode_ack, decode_payload, encode_ack, encode_length_prefix, encode_payload, Ack,
    FrameConfig, ACK_FAILURE, ACK_SIZE, ACK_SUCCESS, DEFAULT_MAX_PAYLOAD, LENGTH_PREFIX_SIZE,
};
pub use error::{FrameError, Result};
pub use layout::{
    color_payload_len, depth_payload_len, PayloadKind, COLOR_BYTES_PER_PIXEL, COLOR_HEIGHT,
    COLOR_WIDTH, DEPTH_BYTES_PER_SAMPLE, DEPTH_HEIGHT, DEPTH_WIDTH,
};
pub use reader::{read_exact_bytes, PayloadReader};
pub use writer::{write_all_bytes, PayloadWriter};
