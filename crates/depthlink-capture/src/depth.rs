use depthlink_frame::DEPTH_BYTES_PER_SAMPLE;
use image::GrayImage;

use crate::error::{CaptureError, Result};
use crate::preview::depth_preview;

/// Window radius used when a sample has no valid reading.
pub const DEFAULT_NEIGHBOR_RADIUS: usize = 3;

/// A received depth grid of float32 distances in meters.
///
/// A sample is valid when it is finite and strictly positive.
#[derive(Debug, Clone, PartialEq)]
pub struct DepthMap {
    width: usize,
    height: usize,
    samples: Vec<f32>,
}

impl DepthMap {
    /// Decode a depth payload of `width * height` little-endian float32 samples.
    pub fn from_payload(payload: &[u8], width: usize, height: usize) -> Result<Self> {
        let expected = width
            .checked_mul(height)
            .and_then(|n| n.checked_mul(DEPTH_BYTES_PER_SAMPLE))
            .ok_or(CaptureError::DimensionOverflow {
                width,
                height,
                bytes_per_row: 0,
            })?;
        if width == 0 || height == 0 {
            return Err(CaptureError::EmptyBuffer { width, height });
        }
        if payload.len() != expected {
            return Err(CaptureError::DepthSizeMismatch {
                width,
                height,
                expected,
                actual: payload.len(),
            });
        }

        let samples = payload
            .chunks_exact(DEPTH_BYTES_PER_SAMPLE)
            .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .collect();
        Ok(Self {
            width,
            height,
            samples,
        })
    }

    /// Wrap samples already in memory.
    pub fn from_samples(samples: Vec<f32>, width: usize, height: usize) -> Result<Self> {
        if width == 0 || height == 0 {
            return Err(CaptureError::EmptyBuffer { width, height });
        }
        if samples.len() != width * height {
            return Err(CaptureError::DepthSizeMismatch {
                width,
                height,
                expected: width * height * DEPTH_BYTES_PER_SAMPLE,
                actual: samples.len() * DEPTH_BYTES_PER_SAMPLE,
            });
        }
        Ok(Self {
            width,
            height,
            samples,
        })
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    /// Encode the samples as a little-endian payload, the inverse of
    /// [`from_payload`](Self::from_payload).
    pub fn to_payload(&self) -> Vec<u8> {
        self.samples.iter().flat_map(|v| v.to_le_bytes()).collect()
    }

    /// The valid distance at `(x, y)`, if any.
    pub fn sample(&self, x: usize, y: usize) -> Option<f32> {
        if x >= self.width || y >= self.height {
            return None;
        }
        Some(self.samples[y * self.width + x]).filter(|v| is_valid(*v))
    }

    /// The distance at `(x, y)`, or the mean of valid samples within `radius`
    /// when that sample is invalid.
    pub fn sample_or_neighbors(&self, x: usize, y: usize, radius: usize) -> Option<f32> {
        if x >= self.width || y >= self.height {
            return None;
        }
        if let Some(v) = self.sample(x, y) {
            return Some(v);
        }

        let (x0, x1) = (x.saturating_sub(radius), (x + radius).min(self.width - 1));
        let (y0, y1) = (y.saturating_sub(radius), (y + radius).min(self.height - 1));
        let (sum, count) = (y0..=y1)
            .flat_map(|ny| (x0..=x1).map(move |nx| (nx, ny)))
            .filter_map(|(nx, ny)| self.sample(nx, ny))
            .fold((0.0f64, 0usize), |(s, c), v| (s + f64::from(v), c + 1));

        (count > 0).then(|| (sum / count as f64) as f32)
    }

    /// Map a pixel of a `color_width`×`color_height` image onto this grid.
    pub fn map_from_color(
        &self,
        x: usize,
        y: usize,
        color_width: usize,
        color_height: usize,
    ) -> Option<(usize, usize)> {
        if x >= color_width || y >= color_height {
            return None;
        }
        let dx = x * self.width / color_width;
        let dy = y * self.height / color_height;
        Some((dx.min(self.width - 1), dy.min(self.height - 1)))
    }

    /// Distance under a color pixel, falling back to its neighborhood.
    pub fn distance_at_color(
        &self,
        x: usize,
        y: usize,
        color_width: usize,
        color_height: usize,
    ) -> Option<f32> {
        let (dx, dy) = self.map_from_color(x, y, color_width, color_height)?;
        self.sample_or_neighbors(dx, dy, DEFAULT_NEIGHBOR_RADIUS)
    }

    pub fn valid_count(&self) -> usize {
        self.samples.iter().filter(|v| is_valid(**v)).count()
    }

    /// Fraction of samples holding a valid reading.
    pub fn valid_ratio(&self) -> f64 {
        self.valid_count() as f64 / self.samples.len() as f64
    }

    pub fn preview(&self) -> Result<GrayImage> {
        depth_preview(&self.samples, self.width, self.height)
    }
}

fn is_valid(v: f32) -> bool {
    v.is_finite() && v > 0.0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grid() -> DepthMap {
        #[rustfmt::skip]
        let samples = vec![
            1.0, 2.0, 0.0,
            f32::NAN, f32::NAN, 4.0,
            -1.0, 3.0, f32::INFINITY,
        ];
        DepthMap::from_samples(samples, 3, 3).unwrap()
    }

    #[test]
    fn decodes_le_payload() {
        let mut payload = Vec::new();
        for v in [0.5f32, 1.25, 2.0, 8.0] {
            payload.extend_from_slice(&v.to_le_bytes());
        }
        let map = DepthMap::from_payload(&payload, 2, 2).unwrap();
        assert_eq!(map.samples(), &[0.5, 1.25, 2.0, 8.0]);
        assert_eq!(map.to_payload(), payload);
    }

    #[test]
    fn payload_size_must_match() {
        assert!(matches!(
            DepthMap::from_payload(&[0u8; 12], 2, 2),
            Err(CaptureError::DepthSizeMismatch {
                expected: 16,
                actual: 12,
                ..
            })
        ));
    }

    #[test]
    fn invalid_samples_are_none() {
        let map = grid();
        assert_eq!(map.sample(0, 0), Some(1.0));
        assert_eq!(map.sample(2, 0), None);
        assert_eq!(map.sample(0, 1), None);
        assert_eq!(map.sample(0, 2), None);
        assert_eq!(map.sample(2, 2), None);
        assert_eq!(map.sample(3, 0), None);
    }

    #[test]
    fn neighbors_fill_invalid_sample() {
        let map = grid();
        assert_eq!(map.sample_or_neighbors(0, 0, 1), Some(1.0));
        // (1,1) sees 1, 2, 4, 3
        assert_eq!(map.sample_or_neighbors(1, 1, 1), Some(2.5));
        // (0,1) sees 1, 2, 3
        assert_eq!(map.sample_or_neighbors(0, 1, 1), Some(2.0));
    }

    #[test]
    fn no_valid_neighbors() {
        let map = DepthMap::from_samples(vec![f32::NAN; 4], 2, 2).unwrap();
        assert_eq!(map.sample_or_neighbors(0, 0, DEFAULT_NEIGHBOR_RADIUS), None);
    }

    #[test]
    fn color_pixels_map_proportionally() {
        let map = DepthMap::from_samples(vec![1.0; 256 * 192], 256, 192).unwrap();
        assert_eq!(map.map_from_color(0, 0, 640, 480), Some((0, 0)));
        assert_eq!(map.map_from_color(320, 240, 640, 480), Some((128, 96)));
        assert_eq!(map.map_from_color(639, 479, 640, 480), Some((255, 191)));
        assert_eq!(map.map_from_color(640, 0, 640, 480), None);
        assert_eq!(map.distance_at_color(100, 100, 640, 480), Some(1.0));
    }

    #[test]
    fn valid_ratio_counts_positive_finite() {
        let map = grid();
        assert_eq!(map.valid_count(), 4);
        assert!((map.valid_ratio() - 4.0 / 9.0).abs() < 1e-9);
    }
}
