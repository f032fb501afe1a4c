//! # Decoded Frames
//!
//! A [`Frame`] is an immutable RGB image behind an `Arc`. Cloning a frame clones
//! the pointer, so a reader that takes a frame out of a slot holds a complete
//! image that no writer can touch; the next write replaces the `Arc` instead of
//! mutating pixels in place.

use std::{io::Cursor, sync::Arc};

use image::{GrayImage, ImageFormat, RgbImage, codecs::jpeg::JpegEncoder};

use crate::error::{MonitorError, MonitorResult};

/// Immutable decoded image shared by reference counting.
#[derive(Debug, Clone)]
pub struct Frame {
    image: Arc<RgbImage>,
}

impl Frame {
    pub fn new(image: RgbImage) -> Self {
        Self {
            image: Arc::new(image),
        }
    }

    /// Decode an encoded JPEG frame.
    pub fn from_jpeg(bytes: &[u8]) -> MonitorResult<Self> {
        if bytes.is_empty() {
            return Err(MonitorError::decode("empty JPEG payload"));
        }
        let image = image::load_from_memory_with_format(bytes, ImageFormat::Jpeg)?;
        Ok(Self::new(image.to_rgb8()))
    }

    /// Re-encode as JPEG at the given quality (1-100).
    pub fn to_jpeg(&self, quality: u8) -> MonitorResult<Vec<u8>> {
        let mut out = Cursor::new(Vec::new());
        JpegEncoder::new_with_quality(&mut out, quality.clamp(1, 100))
            .encode_image(self.image.as_ref())?;
        Ok(out.into_inner())
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn image(&self) -> &RgbImage {
        &self.image
    }

    /// Grayscale copy used for frame differencing.
    pub fn to_luma(&self) -> GrayImage {
        image::imageops::grayscale(self.image.as_ref())
    }

    /// Whether two handles point at the same decoded image.
    pub fn ptr_eq(&self, other: &Frame) -> bool {
        Arc::ptr_eq(&self.image, &other.image)
    }
}

/// A frame paired with the wall-clock time it was written to its slot.
#[derive(Debug, Clone)]
pub struct CapturedFrame {
    pub frame: Frame,
    pub captured_at_ms: u64,
}

impl CapturedFrame {
    /// Age relative to `now_ms`; zero if the clock stepped backwards.
    pub fn age_ms(&self, now_ms: u64) -> u64 {
        now_ms.saturating_sub(self.captured_at_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    #[test]
    fn jpeg_round_trip_keeps_dimensions() {
        let frame = Frame::new(RgbImage::from_pixel(32, 24, Rgb([200, 40, 40])));
        let jpeg = frame.to_jpeg(80).unwrap();
        assert_eq!(&jpeg[..2], &[0xFF, 0xD8]);

        let decoded = Frame::from_jpeg(&jpeg).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (32, 24));
    }

    #[test]
    fn rejects_garbage() {
        assert!(matches!(
            Frame::from_jpeg(&[]),
            Err(MonitorError::Decode { .. })
        ));
        assert!(matches!(
            Frame::from_jpeg(&[0xFF, 0xD8, 0x00, 0x01, 0x02]),
            Err(MonitorError::Decode { .. })
        ));
    }

    #[test]
    fn age_saturates() {
        let captured = CapturedFrame {
            frame: Frame::new(RgbImage::new(1, 1)),
            captured_at_ms: 5_000,
        };
        assert_eq!(captured.age_ms(6_200), 1_200);
        assert_eq!(captured.age_ms(4_000), 0);
    }
}
