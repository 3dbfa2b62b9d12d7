use std::time::Duration;

/// Errors that can occur in peer operations.
#[derive(Debug, thiserror::Error)]
pub enum PeerError {
    /// Transport-level error.
    #[error("transport error: {0}")]
    Transport(#[from] depthlink_transport::TransportError),

    /// Framing-level error.
    #[error("frame error: {0}")]
    Frame(#[from] depthlink_frame::FrameError),

    /// A captured buffer could not be turned into a payload.
    #[error("capture error: {0}")]
    Capture(#[from] depthlink_capture::CaptureError),

    /// No connection is ready.
    #[error("connection not ready")]
    NotReady,

    /// A frame is already being transmitted.
    #[error("a frame is already in flight")]
    Busy,

    /// The session or connection manager was closed.
    #[error("connection closed")]
    Closed,

    /// The peer answered a payload with a failure acknowledgment.
    #[error("peer rejected payload (ack {0})")]
    Rejected(u32),

    /// The capture device cannot deliver scene depth.
    #[error("scene depth is not supported on this device")]
    DepthUnsupported,

    /// Too many consecutive receive failures on one connection.
    #[error("giving up after {0} consecutive errors")]
    TooManyErrors(u32),

    /// A blocking operation ran past its deadline.
    #[error("timed out after {0:?}")]
    Timeout(Duration),

    /// Invalid configuration value.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// JSON serialization/deserialization error.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl PeerError {
    /// Whether the error leaves the byte stream in an unknown position.
    ///
    /// A rejection is a complete exchange; everything else on the link is not.
    pub fn desyncs_stream(&self) -> bool {
        matches!(
            self,
            PeerError::Transport(_) | PeerError::Frame(_) | PeerError::Timeout(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, PeerError>;
