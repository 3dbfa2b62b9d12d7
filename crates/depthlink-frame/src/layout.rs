//! Canonical payload geometry.
//!
//! The color payload is always a tightly packed 640×480 BGRA image. The depth
//! payload is the sensor's float32 grid at its native resolution.

use std::fmt;

/// Width of the canonical color payload.
pub const COLOR_WIDTH: usize = 640;

/// Height of the canonical color payload.
pub const COLOR_HEIGHT: usize = 480;

/// Bytes per BGRA pixel.
pub const COLOR_BYTES_PER_PIXEL: usize = 4;

/// Bytes per float32 depth sample.
pub const DEPTH_BYTES_PER_SAMPLE: usize = 4;

/// Typical LiDAR scene-depth width.
pub const DEPTH_WIDTH: usize = 256;

/// Typical LiDAR scene-depth height.
pub const DEPTH_HEIGHT: usize = 192;

/// Byte length of a canonical color payload.
pub const fn color_payload_len() -> usize {
    COLOR_WIDTH * COLOR_HEIGHT * COLOR_BYTES_PER_PIXEL
}

/// Byte length of a depth payload for a `width`×`height` grid.
pub const fn depth_payload_len(width: usize, height: usize) -> usize {
    width * height * DEPTH_BYTES_PER_SAMPLE
}

/// Which half of a frame a payload carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PayloadKind {
    Color,
    Depth,
}

impl PayloadKind {
    /// Payloads of one frame, in wire order.
    pub const WIRE_ORDER: [PayloadKind; 2] = [PayloadKind::Color, PayloadKind::Depth];

    /// Returns a human-readable name.
    pub fn name(self) -> &'static str {
        match self {
            PayloadKind::Color => "color",
            PayloadKind::Depth => "depth",
        }
    }
}

impl fmt::Display for PayloadKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
