//! Stream LiDAR depth and color frames from a capture device to a desktop.
//!
//! The sender pushes each frame as two acknowledged, length-prefixed payloads
//! over one TCP connection: a 640×480 BGRA color image, then a float32 depth
//! grid in meters.
//!
//! # Crate Structure
//!
//! - [`transport`]: TCP endpoints, connect with timeout, keepalive
//! - [`frame`]: Payload framing and acknowledgments
//! - [`capture`]: Host buffer normalization, rate governing, depth lookup
//! - [`peer`]: Connection management, streaming sessions, receivers (behind `peer` feature)

/// Re-export transport types.
pub mod transport {
    pub use depthlink_transport::*;
}

/// Re-export frame types.
pub mod frame {
    pub use depthlink_frame::*;
}

/// Re-export capture types.
pub mod capture {
    pub use depthlink_capture::*;
}

/// Re-export peer types (requires `peer` feature).
#[cfg(feature = "peer")]
pub mod peer {
    pub use depthlink_peer::*;
}
