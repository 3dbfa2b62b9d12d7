//! Connection management, frame transmission and reception for depthlink.
//!
//! The sender side is a [`StreamingSession`]: it gates captured frames with a
//! rate governor, normalizes their buffers and hands them to a
//! [`FrameTransmitter`], which runs the six-step color/depth exchange over the
//! connection owned by a [`ConnectionManager`]. The receiving side is a
//! [`FrameReceiver`].

#[cfg(feature = "async")]
pub mod async_receiver;
pub mod config;
pub mod connection;
pub mod error;
pub mod receiver;
pub mod session;
pub mod transmitter;

#[cfg(feature = "async")]
pub use async_receiver::{AsyncFrameReceiver, AsyncReceiverSession};
pub use config::{format_duration, parse_duration, SessionConfig};
pub use connection::{
    ConnectionConfig, ConnectionEvent, ConnectionManager, ConnectionState, RetryPolicy,
};
pub use error::{PeerError, Result};
pub use receiver::{FrameReceiver, ReceivedFrame, ReceiverConfig, ReceiverSession};
pub use session::{FrameDisposition, SessionStats, StreamingSession};
pub use transmitter::{
    transmit_frame, FailureReason, FrameFailure, FrameLink, FrameOutcome, FrameReport,
    FrameStage, FrameTransmitter, Submission, TransmitStats,
};
