//! Captured frames.
//!
//! - `Frame`: owned pixel buffer plus dimensions, pixel format, sequence and capture time.
//! - `PixelFormat`: packed 8-bit layouts produced by capture devices.
//!
//! Frames handed out by `FrameSource::read` are independent copies; the acquisition
//! thread never shares a buffer with a consumer.

use anyhow::{anyhow, Context, Result};
use std::path::Path;
use std::time::SystemTime;

/// Packed 8-bit pixel layout.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum PixelFormat {
    #[default]
    Rgb24,
    Bgr24,
    Gray8,
}

impl PixelFormat {
    pub fn channels(self) -> u32 {
        match self {
            PixelFormat::Rgb24 | PixelFormat::Bgr24 => 3,
            PixelFormat::Gray8 => 1,
        }
    }
}

/// One captured frame.
#[derive(Clone, Debug, PartialEq)]
pub struct Frame {
    data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    /// Per-device capture counter, starting at 1.
    pub sequence: u64,
    pub captured_at: SystemTime,
}

impl Frame {
    /// Wrap a pixel buffer. The buffer is not validated here; the pipeline rejects
    /// malformed frames in its preprocess stage.
    pub fn new(data: Vec<u8>, width: u32, height: u32, format: PixelFormat, sequence: u64) -> Self {
        Self {
            data,
            width,
            height,
            format,
            sequence,
            captured_at: SystemTime::now(),
        }
    }

    /// Decode an image file into an RGB frame (single-image mode).
    pub fn from_image_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let image = image::open(path)
            .with_context(|| format!("failed to decode image {}", path.display()))?
            .into_rgb8();
        let (width, height) = image.dimensions();
        Ok(Self::new(image.into_raw(), width, height, PixelFormat::Rgb24, 1))
    }

    pub fn pixels(&self) -> &[u8] {
        &self.data
    }

    pub fn into_pixels(self) -> Vec<u8> {
        self.data
    }

    pub fn channels(&self) -> u32 {
        self.format.channels()
    }

    /// Expected buffer length for the declared dimensions and format.
    pub fn expected_len(&self) -> Option<usize> {
        (self.width as usize)
            .checked_mul(self.height as usize)
            .and_then(|v| v.checked_mul(self.channels() as usize))
    }

    /// Check that the buffer matches the declared geometry.
    pub fn validate(&self) -> Result<()> {
        if self.width == 0 || self.height == 0 {
            return Err(anyhow!(
                "frame has zero dimension ({}x{})",
                self.width,
                self.height
            ));
        }
        let expected = self
            .expected_len()
            .ok_or_else(|| anyhow!("frame dimensions overflow"))?;
        if self.data.len() != expected {
            return Err(anyhow!(
                "expected {} bytes for {}x{} {:?}, received {}",
                expected,
                self.width,
                self.height,
                self.format,
                self.data.len()
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_accepts_matching_buffer() {
        let frame = Frame::new(vec![0u8; 4 * 2 * 3], 4, 2, PixelFormat::Rgb24, 1);
        assert!(frame.validate().is_ok());
        assert_eq!(frame.channels(), 3);
    }

    #[test]
    fn validate_rejects_zero_dimension_and_short_buffer() {
        let empty = Frame::new(Vec::new(), 0, 10, PixelFormat::Rgb24, 1);
        assert!(empty.validate().is_err());

        let short = Frame::new(vec![0u8; 5], 2, 2, PixelFormat::Gray8, 1);
        assert!(short.validate().is_err());
    }

    #[test]
    fn clones_do_not_alias() {
        let frame = Frame::new(vec![7u8; 3], 1, 1, PixelFormat::Rgb24, 1);
        let copy = frame.clone();
        let mut pixels = copy.into_pixels();
        pixels[0] = 0;
        assert_eq!(frame.pixels(), &[7, 7, 7]);
    }

    #[test]
    fn decodes_png_into_rgb_frame() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("still.png");
        image::RgbImage::from_pixel(3, 2, image::Rgb([10, 20, 30])).save(&path)?;

        let frame = Frame::from_image_path(&path)?;
        assert_eq!((frame.width, frame.height), (3, 2));
        assert_eq!(frame.format, PixelFormat::Rgb24);
        assert_eq!(&frame.pixels()[..3], &[10, 20, 30]);
        Ok(())
    }
}
