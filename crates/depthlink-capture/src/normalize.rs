//! Conversion of captured buffers into canonical wire payloads.
//!
//! Color becomes a tightly packed BGRA image at 640×480. Depth stays at the
//! sensor's resolution with any row padding removed. Both are copied out of
//! host memory exactly once.

use bytes::Bytes;
use depthlink_frame::{
    COLOR_BYTES_PER_PIXEL, COLOR_HEIGHT, COLOR_WIDTH, DEPTH_BYTES_PER_SAMPLE,
};
use image::imageops::{self, FilterType};
use image::{ImageBuffer, Rgba};
use tracing::{debug, warn};

use crate::buffer::{validate_geometry, ColorBuffer, DepthBuffer, PixelFormat};
use crate::error::{CaptureError, Result};

/// Copy `height` rows of `width` 4-byte elements out of a buffer whose rows
/// are `bytes_per_row` apart, dropping any row padding.
///
/// The result is exactly `width * height * 4` bytes and row `y` of the result
/// equals the first `width * 4` bytes of source row `y`.
pub fn pack_rows(data: &[u8], width: usize, height: usize, bytes_per_row: usize) -> Result<Vec<u8>> {
    validate_geometry(data.len(), width, height, bytes_per_row, COLOR_BYTES_PER_PIXEL)?;

    let row_len = width * COLOR_BYTES_PER_PIXEL;
    if bytes_per_row == row_len {
        return Ok(data[..row_len * height].to_vec());
    }

    let mut packed = Vec::with_capacity(row_len * height);
    for y in 0..height {
        let start = y * bytes_per_row;
        packed.extend_from_slice(&data[start..start + row_len]);
    }
    Ok(packed)
}

/// Reorder 4-byte pixels in place so they read as BGRA.
fn swizzle_to_bgra(pixels: &mut [u8], format: PixelFormat) {
    match format {
        PixelFormat::Bgra8 | PixelFormat::Other(_) => {}
        PixelFormat::Rgba8 => {
            for px in pixels.chunks_exact_mut(COLOR_BYTES_PER_PIXEL) {
                px.swap(0, 2);
            }
        }
        PixelFormat::Argb8 => {
            for px in pixels.chunks_exact_mut(COLOR_BYTES_PER_PIXEL) {
                px.reverse();
            }
        }
    }
}

/// Both payloads of one frame, ready for transmission.
#[derive(Debug, Clone)]
pub struct NormalizedFrame {
    pub color: Bytes,
    pub depth: Bytes,
    pub depth_width: usize,
    pub depth_height: usize,
}

/// Produces canonical color and depth payloads.
#[derive(Debug, Clone)]
pub struct Normalizer {
    target_width: usize,
    target_height: usize,
    filter: FilterType,
}

impl Default for Normalizer {
    fn default() -> Self {
        Self::new(COLOR_WIDTH, COLOR_HEIGHT)
    }
}

impl Normalizer {
    /// A normalizer resizing color to `width`×`height` with bilinear filtering.
    pub fn new(width: usize, height: usize) -> Self {
        Self {
            target_width: width,
            target_height: height,
            filter: FilterType::Triangle,
        }
    }

    /// Use a different resampling filter.
    pub fn with_filter(mut self, filter: FilterType) -> Self {
        self.filter = filter;
        self
    }

    pub fn target_size(&self) -> (usize, usize) {
        (self.target_width, self.target_height)
    }

    /// Build the canonical BGRA color payload.
    ///
    /// Non-BGRA formats with a known layout are swizzled. Unknown formats are
    /// passed through unchanged with a warning.
    pub fn normalize_color(&self, src: &ColorBuffer<'_>) -> Result<Bytes> {
        match src.format() {
            PixelFormat::Bgra8 => {}
            PixelFormat::Other(code) => {
                warn!(
                    fourcc = format_args!("{code:#010x}"),
                    "unexpected color pixel format, treating as BGRA"
                );
            }
            format => {
                debug!(?format, "converting color buffer to BGRA");
            }
        }

        let mut packed = pack_rows(src.data(), src.width(), src.height(), src.bytes_per_row())?;
        swizzle_to_bgra(&mut packed, src.format());

        if (src.width(), src.height()) == (self.target_width, self.target_height) {
            return Ok(Bytes::from(packed));
        }

        debug!(
            from_width = src.width(),
            from_height = src.height(),
            to_width = self.target_width,
            to_height = self.target_height,
            "resizing color frame"
        );
        let resized = self.resize(packed, src.width(), src.height())?;
        Ok(Bytes::from(resized))
    }

    /// Build the little-endian float32 depth payload at native resolution.
    pub fn normalize_depth(&self, src: &DepthBuffer<'_>) -> Result<Bytes> {
        let mut packed = pack_rows(src.data(), src.width(), src.height(), src.bytes_per_row())?;
        debug_assert_eq!(packed.len(), src.width() * src.height() * DEPTH_BYTES_PER_SAMPLE);
        samples_to_le(&mut packed);
        Ok(Bytes::from(packed))
    }

    /// Normalize both halves of a frame. Any failure skips the whole frame.
    pub fn normalize_frame(
        &self,
        color: &ColorBuffer<'_>,
        depth: &DepthBuffer<'_>,
    ) -> Result<NormalizedFrame> {
        let color_payload = self.normalize_color(color)?;
        let depth_payload = self.normalize_depth(depth)?;
        Ok(NormalizedFrame {
            color: color_payload,
            depth: depth_payload,
            depth_width: depth.width(),
            depth_height: depth.height(),
        })
    }

    fn resize(&self, packed: Vec<u8>, width: usize, height: usize) -> Result<Vec<u8>> {
        let dim = |v: usize| {
            u32::try_from(v).map_err(|_| CaptureError::Resize(format!("dimension {v} exceeds u32")))
        };
        let (w, h) = (dim(width)?, dim(height)?);
        let (tw, th) = (dim(self.target_width)?, dim(self.target_height)?);

        // Channel order is irrelevant to the filter, so BGRA rides in an Rgba buffer.
        let img = ImageBuffer::<Rgba<u8>, Vec<u8>>::from_raw(w, h, packed)
            .ok_or_else(|| CaptureError::Resize("pixel buffer does not match dimensions".into()))?;
        Ok(imageops::resize(&img, tw, th, self.filter).into_raw())
    }
}

/// Rewrite host-order float32 samples as little-endian, in place.
fn samples_to_le(bytes: &mut [u8]) {
    if cfg!(target_endian = "little") {
        return;
    }
    for sample in bytes.chunks_exact_mut(DEPTH_BYTES_PER_SAMPLE) {
        sample.reverse();
    }
}
