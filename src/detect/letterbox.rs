//! Aspect-preserving resize into a fixed model input.

use image::imageops::{self, FilterType};
use image::RgbImage;

use crate::detect::result::BoundingBox;
use crate::error::{Error, Result};
use crate::frame::{Frame, PixelFormat};

/// Geometry of one letterbox transform, needed to map model-space coordinates
/// back onto the source frame.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Letterbox {
    pub scale: f32,
    pub pad_x: u32,
    pub pad_y: u32,
    pub source_width: u32,
    pub source_height: u32,
    pub target_width: u32,
    pub target_height: u32,
}

impl Letterbox {
    /// `scale = min(tw / w, th / h)`; the resized content is centered and the odd
    /// leftover pixel goes to the bottom/right.
    pub fn new(source_width: u32, source_height: u32, target_width: u32, target_height: u32) -> Self {
        let (new_w, new_h) = resized_dims(source_width, source_height, target_width, target_height);
        let scale = if new_w == target_width {
            target_width as f32 / source_width.max(1) as f32
        } else {
            target_height as f32 / source_height.max(1) as f32
        };
        Self {
            scale,
            pad_x: target_width.saturating_sub(new_w) / 2,
            pad_y: target_height.saturating_sub(new_h) / 2,
            source_width,
            source_height,
            target_width,
            target_height,
        }
    }

    /// Size of the resized content inside the padded canvas.
    pub fn content_size(&self) -> (u32, u32) {
        resized_dims(
            self.source_width,
            self.source_height,
            self.target_width,
            self.target_height,
        )
    }

    /// Model-space point to source pixels.
    pub fn restore_point(&self, x: f32, y: f32) -> (f32, f32) {
        (
            (x - self.pad_x as f32) / self.scale,
            (y - self.pad_y as f32) / self.scale,
        )
    }

    pub fn restore_box(&self, bbox: BoundingBox) -> BoundingBox {
        let (x1, y1) = self.restore_point(bbox.x1, bbox.y1);
        let (x2, y2) = self.restore_point(bbox.x2, bbox.y2);
        BoundingBox::new(x1, y1, x2, y2)
    }
}

// Integer cross-multiplication keeps the limiting side exactly at the target.
fn resized_dims(source_width: u32, source_height: u32, target_width: u32, target_height: u32) -> (u32, u32) {
    let (sw, sh) = (source_width.max(1) as u64, source_height.max(1) as u64);
    let (tw, th) = (target_width as u64, target_height as u64);
    let (w, h) = if tw * sh <= th * sw {
        (tw, sh * tw / sw)
    } else {
        (sw * th / sh, th)
    };
    (w.max(1) as u32, h.max(1) as u32)
}

/// Validate `frame`, convert it to RGB and letterbox it into a
/// `target_width` x `target_height` canvas padded with black.
///
/// Returns packed RGB bytes (HWC) and the transform used.
pub fn letterbox(frame: &Frame, target_width: u32, target_height: u32) -> Result<(Vec<u8>, Letterbox)> {
    if target_width == 0 || target_height == 0 {
        return Err(Error::Preprocess(format!(
            "model input size {}x{} is empty",
            target_width, target_height
        )));
    }
    if frame.channels() != 3 {
        return Err(Error::Preprocess(format!(
            "expected a 3-channel frame, got {:?}",
            frame.format
        )));
    }
    frame
        .validate()
        .map_err(|e| Error::Preprocess(format!("{:#}", e)))?;

    let mut rgb = frame.pixels().to_vec();
    if frame.format == PixelFormat::Bgr24 {
        for px in rgb.chunks_exact_mut(3) {
            px.swap(0, 2);
        }
    }
    let source = RgbImage::from_raw(frame.width, frame.height, rgb)
        .ok_or_else(|| Error::Preprocess("frame buffer does not fit its dimensions".into()))?;

    let geometry = Letterbox::new(frame.width, frame.height, target_width, target_height);
    let (new_w, new_h) = geometry.content_size();
    let resized = if (new_w, new_h) == (frame.width, frame.height) {
        source
    } else {
        imageops::resize(&source, new_w, new_h, FilterType::Triangle)
    };

    let mut canvas = RgbImage::new(target_width, target_height);
    imageops::replace(
        &mut canvas,
        &resized,
        geometry.pad_x as i64,
        geometry.pad_y as i64,
    );
    Ok((canvas.into_raw(), geometry))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wide_frame_pads_vertically() {
        let lb = Letterbox::new(1920, 1080, 640, 640);
        assert!((lb.scale - 1.0 / 3.0).abs() < 1e-6);
        assert_eq!((lb.pad_x, lb.pad_y), (0, 140));
        assert_eq!(lb.content_size(), (640, 360));
    }

    #[test]
    fn square_frame_is_unpadded() {
        let lb = Letterbox::new(640, 640, 640, 640);
        assert_eq!(lb.scale, 1.0);
        assert_eq!((lb.pad_x, lb.pad_y), (0, 0));
    }

    #[test]
    fn small_frame_is_upscaled() {
        let lb = Letterbox::new(320, 160, 640, 640);
        assert_eq!(lb.scale, 2.0);
        assert_eq!((lb.pad_x, lb.pad_y), (0, 160));
    }

    #[test]
    fn restore_inverts_the_transform() {
        let lb = Letterbox::new(1920, 1080, 640, 640);
        let (x, y) = lb.restore_point(320.0, 140.0 + 180.0);
        assert!((x - 960.0).abs() < 1e-3);
        assert!((y - 540.0).abs() < 1e-3);
        let b = lb.restore_box(BoundingBox::new(0.0, 140.0, 640.0, 500.0));
        assert!((b.x2 - 1920.0).abs() < 1e-2);
        assert!((b.y2 - 1080.0).abs() < 1e-2);
    }

    #[test]
    fn padding_is_black_and_bgr_is_swapped() -> Result<()> {
        // 2x1 BGR frame of pure blue, letterboxed into 2x2.
        let frame = Frame::new(vec![255, 0, 0, 255, 0, 0], 2, 1, PixelFormat::Bgr24, 1);
        let (pixels, lb) = letterbox(&frame, 2, 2)?;
        assert_eq!(lb.scale, 1.0);
        assert_eq!((lb.pad_x, lb.pad_y), (0, 0));
        // Row 0 holds the content, row 1 is padding.
        assert_eq!(&pixels[..6], &[0, 0, 255, 0, 0, 255]);
        assert_eq!(&pixels[6..], &[0; 6]);
        Ok(())
    }

    #[test]
    fn rejects_gray_and_malformed_frames() {
        let gray = Frame::new(vec![0; 4], 2, 2, PixelFormat::Gray8, 1);
        assert!(matches!(letterbox(&gray, 4, 4), Err(Error::Preprocess(_))));
        let short = Frame::new(vec![0; 5], 2, 2, PixelFormat::Rgb24, 1);
        assert!(matches!(letterbox(&short, 4, 4), Err(Error::Preprocess(_))));
        let empty = Frame::new(Vec::new(), 0, 0, PixelFormat::Rgb24, 1);
        assert!(matches!(letterbox(&empty, 4, 4), Err(Error::Preprocess(_))));
    }
}
