//! Borrowed descriptors for host-owned pixel memory.
//!
//! The host locks its buffer, builds a descriptor over the locked bytes, hands
//! it to the pipeline and unlocks once the call returns. Payloads are copied
//! out exactly once, so nothing borrows host memory past that call.

use depthlink_frame::{COLOR_BYTES_PER_PIXEL, DEPTH_BYTES_PER_SAMPLE};

use crate::error::{CaptureError, Result};

/// FourCC of 32-bit BGRA pixels.
const FOURCC_BGRA: u32 = u32::from_be_bytes(*b"BGRA");
/// FourCC of 32-bit RGBA pixels.
const FOURCC_RGBA: u32 = u32::from_be_bytes(*b"RGBA");
/// Numeric code the platform uses for 32-bit ARGB.
const FOURCC_ARGB: u32 = 0x0000_0020;

/// Channel layout of a 4-byte-per-pixel color buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PixelFormat {
    /// Canonical wire layout.
    Bgra8,
    Rgba8,
    Argb8,
    /// A format code the normalizer does not know. Bytes are passed through
    /// as if they were BGRA.
    Other(u32),
}

impl PixelFormat {
    /// Map a platform pixel-format code.
    pub fn from_fourcc(code: u32) -> Self {
        match code {
            FOURCC_BGRA => PixelFormat::Bgra8,
            FOURCC_RGBA => PixelFormat::Rgba8,
            FOURCC_ARGB => PixelFormat::Argb8,
            other => PixelFormat::Other(other),
        }
    }

    /// Platform pixel-format code.
    pub fn fourcc(self) -> u32 {
        match self {
            PixelFormat::Bgra8 => FOURCC_BGRA,
            PixelFormat::Rgba8 => FOURCC_RGBA,
            PixelFormat::Argb8 => FOURCC_ARGB,
            PixelFormat::Other(code) => code,
        }
    }

    pub fn is_canonical(self) -> bool {
        self == PixelFormat::Bgra8
    }
}

/// What the capture device can deliver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SensorCapabilities {
    /// Per-frame scene depth from the LiDAR sensor.
    pub scene_depth: bool,
}

impl SensorCapabilities {
    pub fn with_depth() -> Self {
        Self { scene_depth: true }
    }

    pub fn without_depth() -> Self {
        Self { scene_depth: false }
    }
}

/// A color image in host memory: `height` rows of `bytes_per_row` bytes, of
/// which the first `width * 4` carry pixels.
#[derive(Debug, Clone, Copy)]
pub struct ColorBuffer<'a> {
    data: &'a [u8],
    width: usize,
    height: usize,
    bytes_per_row: usize,
    format: PixelFormat,
}

impl<'a> ColorBuffer<'a> {
    /// Describe a possibly row-padded buffer.
    pub fn new(
        data: &'a [u8],
        width: usize,
        height: usize,
        bytes_per_row: usize,
        format: PixelFormat,
    ) -> Result<Self> {
        validate_geometry(
            data.len(),
            width,
            height,
            bytes_per_row,
            COLOR_BYTES_PER_PIXEL,
        )?;
        Ok(Self {
            data,
            width,
            height,
            bytes_per_row,
            format,
        })
    }

    /// Describe a tightly packed buffer.
    pub fn packed(data: &'a [u8], width: usize, height: usize, format: PixelFormat) -> Result<Self> {
        let bytes_per_row = width
            .checked_mul(COLOR_BYTES_PER_PIXEL)
            .ok_or(CaptureError::DimensionOverflow {
                width,
                height,
                bytes_per_row: 0,
            })?;
        Self::new(data, width, height, bytes_per_row, format)
    }

    pub fn data(&self) -> &'a [u8] {
        self.data
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn bytes_per_row(&self) -> usize {
        self.bytes_per_row
    }

    pub fn format(&self) -> PixelFormat {
        self.format
    }

    /// Whether rows carry trailing bytes beyond the pixels.
    pub fn has_padding(&self) -> bool {
        self.bytes_per_row > self.width * COLOR_BYTES_PER_PIXEL
    }
}

/// A float32 depth grid in host memory.
#[derive(Debug, Clone, Copy)]
pub struct DepthBuffer<'a> {
    data: &'a [u8],
    width: usize,
    height: usize,
    bytes_per_row: usize,
}

impl<'a> DepthBuffer<'a> {
    /// Describe a possibly row-padded depth grid.
    pub fn new(data: &'a [u8], width: usize, height: usize, bytes_per_row: usize) -> Result<Self> {
        validate_geometry(
            data.len(),
            width,
            height,
            bytes_per_row,
            DEPTH_BYTES_PER_SAMPLE,
        )?;
        Ok(Self {
            data,
            width,
            height,
            bytes_per_row,
        })
    }

    /// Describe a tightly packed depth grid.
    pub fn packed(data: &'a [u8], width: usize, height: usize) -> Result<Self> {
        let bytes_per_row =
            width
                .checked_mul(DEPTH_BYTES_PER_SAMPLE)
                .ok_or(CaptureError::DimensionOverflow {
                    width,
                    height,
                    bytes_per_row: 0,
                })?;
        Self::new(data, width, height, bytes_per_row)
    }

    /// Describe a slice of samples in native byte order.
    pub fn from_samples(samples: &'a [f32], width: usize, height: usize) -> Result<Self> {
        Self::packed(bytemuck::cast_slice(samples), width, height)
    }

    pub fn data(&self) -> &'a [u8] {
        self.data
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn bytes_per_row(&self) -> usize {
        self.bytes_per_row
    }
}

/// Check that `len` bytes can hold `height` rows of `width` elements of
/// `element_size` bytes, `bytes_per_row` apart. The last row may omit padding.
pub(crate) fn validate_geometry(
    len: usize,
    width: usize,
    height: usize,
    bytes_per_row: usize,
    element_size: usize,
) -> Result<()> {
    if width == 0 || height == 0 {
        return Err(CaptureError::EmptyBuffer { width, height });
    }

    let overflow = CaptureError::DimensionOverflow {
        width,
        height,
        bytes_per_row,
    };
    let row_len = width.checked_mul(element_size).ok_or(overflow)?;
    if bytes_per_row < row_len {
        return Err(CaptureError::InvalidStride {
            bytes_per_row,
            min: row_len,
        });
    }

    let expected = bytes_per_row
        .checked_mul(height - 1)
        .and_then(|n| n.checked_add(row_len))
        .ok_or(CaptureError::DimensionOverflow {
            width,
            height,
            bytes_per_row,
        })?;
    if len < expected {
        return Err(CaptureError::BufferTooSmall {
            expected,
            actual: len,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fourcc_mapping() {
        assert_eq!(PixelFormat::from_fourcc(0x4247_5241), PixelFormat::Bgra8);
        assert_eq!(PixelFormat::from_fourcc(0x20), PixelFormat::Argb8);
        let yuv = u32::from_be_bytes(*b"420f");
        assert_eq!(PixelFormat::from_fourcc(yuv), PixelFormat::Other(yuv));
        assert_eq!(PixelFormat::Rgba8.fourcc(), u32::from_be_bytes(*b"RGBA"));
    }

    #[test]
    fn padded_color_buffer_accepted() {
        let data = vec![0u8; (8 * 4 + 16) * 3];
        let buf = ColorBuffer::new(&data, 8, 3, 8 * 4 + 16, PixelFormat::Bgra8).unwrap();
        assert!(buf.has_padding());
    }

    #[test]
    fn last_row_may_omit_padding() {
        let data = vec![0u8; (8 * 4 + 16) * 2 + 8 * 4];
        assert!(ColorBuffer::new(&data, 8, 3, 8 * 4 + 16, PixelFormat::Bgra8).is_ok());
    }

    #[test]
    fn rejects_bad_geometry() {
        let data = vec![0u8; 64];
        assert!(matches!(
            ColorBuffer::packed(&data, 0, 4, PixelFormat::Bgra8),
            Err(CaptureError::EmptyBuffer { .. })
        ));
        assert!(matches!(
            ColorBuffer::new(&data, 4, 4, 8, PixelFormat::Bgra8),
            Err(CaptureError::InvalidStride { min: 16, .. })
        ));
        assert!(matches!(
            ColorBuffer::packed(&data, 4, 5, PixelFormat::Bgra8),
            Err(CaptureError::BufferTooSmall {
                expected: 80,
                actual: 64
            })
        ));
        assert!(matches!(
            DepthBuffer::new(&data, usize::MAX, 2, usize::MAX),
            Err(CaptureError::DimensionOverflow { .. })
        ));
    }

    #[test]
    fn depth_from_samples() {
        let samples = [0.5f32, 1.0, 1.5, 2.0];
        let buf = DepthBuffer::from_samples(&samples, 2, 2).unwrap();
        assert_eq!(buf.data().len(), 16);
        assert_eq!(buf.bytes_per_row(), 8);
    }
}
