//! Displayable images built from frame payloads.

use depthlink_frame::COLOR_BYTES_PER_PIXEL;
use image::{GrayImage, RgbaImage};

use crate::buffer::{validate_geometry, DepthBuffer};
use crate::error::{CaptureError, Result};
use crate::normalize::pack_rows;

/// Smallest and largest finite sample, or `None` if there are none.
pub fn depth_range(samples: &[f32]) -> Option<(f32, f32)> {
    samples
        .iter()
        .copied()
        .filter(|v| v.is_finite())
        .fold(None, |acc, v| match acc {
            None => Some((v, v)),
            Some((lo, hi)) => Some((lo.min(v), hi.max(v))),
        })
}

/// Render a depth grid as 8-bit grayscale, scaled between its own min and max.
///
/// Non-finite samples render black, as does everything when the grid is flat.
pub fn depth_preview(samples: &[f32], width: usize, height: usize) -> Result<GrayImage> {
    let expected = width.checked_mul(height).ok_or(CaptureError::DimensionOverflow {
        width,
        height,
        bytes_per_row: 0,
    })?;
    if samples.len() != expected {
        return Err(CaptureError::DepthSizeMismatch {
            width,
            height,
            expected: expected * 4,
            actual: samples.len() * 4,
        });
    }
    let (w, h) = image_dims(width, height)?;

    let pixels = match depth_range(samples) {
        Some((lo, hi)) if hi > lo => {
            let span = hi - lo;
            samples
                .iter()
                .map(|&v| {
                    if v.is_finite() {
                        ((v - lo) / span * 255.0) as u8
                    } else {
                        0
                    }
                })
                .collect()
        }
        _ => vec![0u8; expected],
    };

    GrayImage::from_raw(w, h, pixels)
        .ok_or_else(|| CaptureError::Resize("preview buffer does not match dimensions".into()))
}

/// Render a host depth buffer of native-endian float32 samples.
pub fn depth_buffer_preview(src: &DepthBuffer<'_>) -> Result<GrayImage> {
    let packed = pack_rows(src.data(), src.width(), src.height(), src.bytes_per_row())?;
    let samples: Vec<f32> = bytemuck::pod_collect_to_vec(&packed);
    depth_preview(&samples, src.width(), src.height())
}

/// Convert a BGRA payload into an RGBA image.
pub fn color_preview(bgra: &[u8], width: usize, height: usize) -> Result<RgbaImage> {
    validate_geometry(
        bgra.len(),
        width,
        height,
        width.saturating_mul(COLOR_BYTES_PER_PIXEL),
        COLOR_BYTES_PER_PIXEL,
    )?;
    let (w, h) = image_dims(width, height)?;

    let mut rgba = bgra[..width * height * COLOR_BYTES_PER_PIXEL].to_vec();
    for px in rgba.chunks_exact_mut(COLOR_BYTES_PER_PIXEL) {
        px.swap(0, 2);
    }
    RgbaImage::from_raw(w, h, rgba)
        .ok_or_else(|| CaptureError::Resize("preview buffer does not match dimensions".into()))
}

fn image_dims(width: usize, height: usize) -> Result<(u32, u32)> {
    match (u32::try_from(width), u32::try_from(height)) {
        (Ok(w), Ok(h)) => Ok((w, h)),
        _ => Err(CaptureError::DimensionOverflow {
            width,
            height,
            bytes_per_row: 0,
        }),
    }
}
