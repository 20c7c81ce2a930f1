//! Captured camera frames.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::clock::TimestampUs;

/// Bytes per pixel of every supported frame layout.
pub const BYTES_PER_PIXEL: usize = 3;

/// Byte order of the three colour channels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelOrder {
    #[default]
    Rgb,
    Bgr,
}

/// Frame validation failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FrameError {
    #[error("frame is empty ({width}x{height})")]
    Empty { width: u32, height: u32 },

    #[error("frame buffer is {actual} bytes, expected {expected} for {width}x{height}")]
    SizeMismatch {
        width: u32,
        height: u32,
        expected: usize,
        actual: usize,
    },
}

/// One captured frame: an interleaved 8-bit pixel buffer plus metadata.
///
/// The pixel buffer is shared, so cloning a frame is cheap.
#[derive(Debug, Clone)]
pub struct Frame {
    /// Capture counter assigned by the frame source.
    pub sequence: u64,
    /// Capture instant on the monotonic clock.
    pub captured_at_us: TimestampUs,
    pub width: u32,
    pub height: u32,
    pub channel_order: ChannelOrder,
    pub data: Arc<[u8]>,
}

impl Frame {
    /// Build and validate a frame.
    pub fn new(
        sequence: u64,
        captured_at_us: TimestampUs,
        width: u32,
        height: u32,
        channel_order: ChannelOrder,
        data: impl Into<Arc<[u8]>>,
    ) -> Result<Self, FrameError> {
        let frame = Self {
            sequence,
            captured_at_us,
            width,
            height,
            channel_order,
            data: data.into(),
        };
        frame.validate()?;
        Ok(frame)
    }

    /// Check dimensions against the buffer length.
    pub fn validate(&self) -> Result<(), FrameError> {
        if self.width == 0 || self.height == 0 {
            return Err(FrameError::Empty {
                width: self.width,
                height: self.height,
            });
        }
        let expected = self.expected_len();
        if self.data.len() != expected {
            return Err(FrameError::SizeMismatch {
                width: self.width,
                height: self.height,
                expected,
                actual: self.data.len(),
            });
        }
        Ok(())
    }

    /// Buffer length implied by the dimensions.
    #[inline]
    pub fn expected_len(&self) -> usize {
        self.width as usize * self.height as usize * BYTES_PER_PIXEL
    }

    /// Pixel count.
    #[inline]
    pub fn pixel_count(&self) -> u64 {
        u64::from(self.width) * u64::from(self.height)
    }

    /// Pixel at (x, y) as stored, in the frame's channel order.
    #[inline]
    pub fn pixel(&self, x: u32, y: u32) -> [u8; 3] {
        let i = (y as usize * self.width as usize + x as usize) * BYTES_PER_PIXEL;
        [self.data[i], self.data[i + 1], self.data[i + 2]]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_frame() {
        let f = Frame::new(1, 10, 2, 2, ChannelOrder::Rgb, vec![0u8; 12]).unwrap();
        assert_eq!(f.pixel_count(), 4);
        assert_eq!(f.pixel(1, 1), [0, 0, 0]);
    }

    #[test]
    fn empty_frame_rejected() {
        let err = Frame::new(1, 10, 0, 2, ChannelOrder::Rgb, Vec::<u8>::new()).unwrap_err();
        assert!(matches!(err, FrameError::Empty { .. }));
    }

    #[test]
    fn short_buffer_rejected() {
        let err = Frame::new(1, 10, 2, 2, ChannelOrder::Bgr, vec![0u8; 11]).unwrap_err();
        assert_eq!(
            err,
            FrameError::SizeMismatch {
                width: 2,
                height: 2,
                expected: 12,
                actual: 11
            }
        );
    }

    #[test]
    fn pixel_indexing_is_row_major() {
        let mut data = vec![0u8; 2 * 2 * 3];
        data[9] = 7; // (1, 1) first channel
        let f = Frame::new(0, 0, 2, 2, ChannelOrder::Rgb, data).unwrap();
        assert_eq!(f.pixel(1, 1)[0], 7);
    }
}
