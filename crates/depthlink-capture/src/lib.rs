//! Capture-side processing for depthlink.
//!
//! Turns host-owned color and depth buffers into canonical wire payloads,
//! gates how often captured frames enter the pipeline, and renders previews.
//! The receiver side uses [`DepthMap`] to look up distances in a received
//! depth payload.
//!
//! # Modules
//!
//! - [`buffer`]: borrowed buffer descriptors handed over by the host
//! - [`normalize`]: canonical BGRA color and raw float32 depth payloads
//! - [`governor`]: minimum-interval admission gate
//! - [`preview`]: displayable color and grayscale depth images
//! - [`depth`]: depth sampling on the receiving end

pub mod buffer;
pub mod depth;
pub mod error;
pub mod governor;
pub mod normalize;
pub mod preview;

pub use buffer::{ColorBuffer, DepthBuffer, PixelFormat, SensorCapabilities};
pub use depth::{DepthMap, DEFAULT_NEIGHBOR_RADIUS};
pub use error::{CaptureError, Result};
pub use governor::{RateGovernor, DEFAULT_MIN_INTERVAL};
pub use normalize::{pack_rows, NormalizedFrame, Normalizer};
pub use preview::{color_preview, depth_buffer_preview, depth_preview, depth_range};
