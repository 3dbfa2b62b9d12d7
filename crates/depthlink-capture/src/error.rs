/// Errors raised while accessing or converting captured buffers.
///
/// Any of these means the affected frame is skipped; nothing is sent for it.
#[derive(Debug, thiserror::Error)]
pub enum CaptureError {
    /// A buffer reported zero width or height.
    #[error("empty buffer ({width}x{height})")]
    EmptyBuffer { width: usize, height: usize },

    /// Row stride is smaller than one packed row.
    #[error("row stride {bytes_per_row} is smaller than packed row of {min} bytes")]
    InvalidStride { bytes_per_row: usize, min: usize },

    /// The backing memory is shorter than the geometry requires.
    #[error("buffer too small ({actual} bytes, need {expected})")]
    BufferTooSmall { expected: usize, actual: usize },

    /// Width, height or stride overflow when multiplied out.
    #[error("buffer dimensions overflow ({width}x{height}, stride {bytes_per_row})")]
    DimensionOverflow {
        width: usize,
        height: usize,
        bytes_per_row: usize,
    },

    /// Resizing to the canonical resolution failed.
    #[error("resize failed: {0}")]
    Resize(String),

    /// A depth payload does not match the announced grid.
    #[error("depth payload is {actual} bytes, expected {expected} for {width}x{height}")]
    DepthSizeMismatch {
        width: usize,
        height: usize,
        expected: usize,
        actual: usize,
    },
}

pub type Result<T> = std::result::Result<T, CaptureError>;
