//! Local image frame source.
//!
//! `ImageFileDevice` replays a still image, or every image in a directory in name
//! order, as a paced frame stream. It is responsible for:
//! - Reading local files only (no URL schemes)
//! - Decoding images in-memory into RGB frames
//! - Pacing frames at the requested rate
//!
//! Video containers are not decoded here.

use anyhow::{anyhow, Context, Result};
use std::path::{Path, PathBuf};
use std::time::Duration;

use super::{CaptureDevice, CaptureFormat};
use crate::frame::Frame;

const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png"];

pub struct ImageFileDevice {
    path: PathBuf,
    playlist: Vec<PathBuf>,
    /// Decoded still when the playlist has a single entry.
    cached: Option<Frame>,
    cursor: usize,
    fps: u32,
    frame_count: u64,
    width: u32,
    height: u32,
}

impl ImageFileDevice {
    pub fn open(path: impl AsRef<Path>, fps: u32) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let playlist = build_playlist(&path)?;
        let first = Frame::from_image_path(&playlist[0])?;
        let (width, height) = (first.width, first.height);
        let cached = (playlist.len() == 1).then_some(first);

        log::info!(
            "ImageFileDevice: opened {} ({} image(s), {}x{})",
            path.display(),
            playlist.len(),
            width,
            height
        );
        Ok(Self {
            path,
            playlist,
            cached,
            cursor: 0,
            fps,
            frame_count: 0,
            width,
            height,
        })
    }

    fn next_image(&mut self) -> Result<Frame> {
        if let Some(frame) = &self.cached {
            return Ok(frame.clone());
        }
        let path = &self.playlist[self.cursor];
        self.cursor = (self.cursor + 1) % self.playlist.len();
        Frame::from_image_path(path)
    }
}

impl CaptureDevice for ImageFileDevice {
    fn describe(&self) -> String {
        self.path.display().to_string()
    }

    fn format(&self) -> CaptureFormat {
        CaptureFormat {
            width: self.width,
            height: self.height,
            fps: self.fps,
        }
    }

    fn read_frame(&mut self) -> Result<Frame> {
        if self.playlist.is_empty() {
            return Err(anyhow!("image source released"));
        }
        if self.fps > 0 {
            std::thread::sleep(Duration::from_micros(1_000_000 / self.fps as u64));
        }
        let mut frame = self.next_image()?;
        self.frame_count += 1;
        frame.sequence = self.frame_count;
        frame.captured_at = std::time::SystemTime::now();
        Ok(frame)
    }

    fn release(&mut self) {
        self.playlist.clear();
        self.cached = None;
    }
}

fn build_playlist(path: &Path) -> Result<Vec<PathBuf>> {
    if path.is_dir() {
        let mut entries: Vec<PathBuf> = std::fs::read_dir(path)
            .with_context(|| format!("failed to list {}", path.display()))?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| is_image_file(p))
            .collect();
        entries.sort();
        if entries.is_empty() {
            return Err(anyhow!("no images found in {}", path.display()));
        }
        Ok(entries)
    } else if path.is_file() {
        Ok(vec![path.to_path_buf()])
    } else {
        Err(anyhow!("{} does not exist", path.display()))
    }
}

fn is_image_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| IMAGE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn replays_directory_in_name_order() -> Result<()> {
        let dir = tempfile::tempdir()?;
        image::RgbImage::from_pixel(2, 2, image::Rgb([1, 1, 1])).save(dir.path().join("a.png"))?;
        image::RgbImage::from_pixel(2, 2, image::Rgb([2, 2, 2])).save(dir.path().join("b.png"))?;
        std::fs::write(dir.path().join("notes.txt"), b"ignored")?;

        let mut device = ImageFileDevice::open(dir.path(), 0)?;
        assert_eq!(device.format().width, 2);

        let first = device.read_frame()?;
        let second = device.read_frame()?;
        let third = device.read_frame()?;
        assert_eq!(first.pixels()[0], 1);
        assert_eq!(second.pixels()[0], 2);
        assert_eq!(third.pixels()[0], 1);
        assert_eq!(third.sequence, 3);
        Ok(())
    }

    #[test]
    fn empty_directory_is_rejected() -> Result<()> {
        let dir = tempfile::tempdir()?;
        assert!(ImageFileDevice::open(dir.path(), 0).is_err());
        Ok(())
    }
}
