/// Errors that can occur during payload encoding/decoding.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// The payload exceeds the configured maximum size.
    #[error("payload too large ({size} bytes, max {max})")]
    PayloadTooLarge { size: usize, max: usize },

    /// An acknowledgment was not exactly four bytes.
    #[error("short acknowledgment ({received} of 4 bytes)")]
    ShortAck { received: usize },

    /// An I/O error occurred while reading or writing payloads.
    #[error("frame I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The connection was closed before a complete payload or ack was received.
    #[error("connection closed (incomplete read)")]
    ConnectionClosed,
}

impl FrameError {
    /// Whether the error came from a read or write timing out.
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            FrameError::Io(err)
                if matches!(
                    err.kind(),
                    std::io::ErrorKind::TimedOut | std::io::ErrorKind::WouldBlock
                )
        )
    }
}

pub type Result<T> = std::result::Result<T, FrameError>;
