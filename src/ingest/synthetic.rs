//! Synthetic capture device for `stub://` addresses.
//!
//! Frame `k` is filled entirely with `k mod 256` and carries `sequence = k`, so a
//! reader can detect a torn frame by checking that every byte agrees.

use anyhow::Result;
use std::time::Duration;

use super::{CaptureDevice, CaptureFormat};
use crate::frame::{Frame, PixelFormat};

pub struct SyntheticDevice {
    name: String,
    width: u32,
    height: u32,
    fps: u32,
    frame_count: u64,
    released: bool,
}

impl SyntheticDevice {
    pub fn new(name: impl Into<String>, width: u32, height: u32, fps: u32) -> Self {
        let name = name.into();
        log::info!(
            "SyntheticDevice: connected to stub://{} ({}x{} @ {} fps)",
            name,
            width,
            height,
            fps
        );
        Self {
            name,
            width,
            height,
            fps,
            frame_count: 0,
            released: false,
        }
    }

    fn frame_interval(&self) -> Option<Duration> {
        (self.fps > 0).then(|| Duration::from_micros(1_000_000 / self.fps as u64))
    }
}

impl CaptureDevice for SyntheticDevice {
    fn describe(&self) -> String {
        format!("stub://{}", self.name)
    }

    fn format(&self) -> CaptureFormat {
        CaptureFormat {
            width: self.width,
            height: self.height,
            fps: self.fps,
        }
    }

    fn read_frame(&mut self) -> Result<Frame> {
        if self.released {
            anyhow::bail!("synthetic device released");
        }
        if let Some(interval) = self.frame_interval() {
            std::thread::sleep(interval);
        }
        self.frame_count += 1;
        let len = (self.width as usize) * (self.height as usize) * 3;
        let fill = (self.frame_count % 256) as u8;
        Ok(Frame::new(
            vec![fill; len],
            self.width,
            self.height,
            PixelFormat::Rgb24,
            self.frame_count,
        ))
    }

    fn release(&mut self) {
        self.released = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frames_are_uniform_and_sequenced() -> Result<()> {
        let mut device = SyntheticDevice::new("test", 4, 3, 0);
        let first = device.read_frame()?;
        let second = device.read_frame()?;

        assert_eq!(first.sequence, 1);
        assert_eq!(second.sequence, 2);
        assert!(second.pixels().iter().all(|&p| p == 2));
        assert_eq!(second.pixels().len(), 4 * 3 * 3);
        Ok(())
    }

    #[test]
    fn read_after_release_fails() {
        let mut device = SyntheticDevice::new("test", 2, 2, 0);
        device.release();
        device.release();
        assert!(device.read_frame().is_err());
    }
}
