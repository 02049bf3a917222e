//! Frame ingestion.
//!
//! This module provides the capture devices and the `FrameSource` that drives them:
//! - Synthetic frames (`stub://` addresses, testing)
//! - USB/V4L2 devices (feature: ingest-v4l2)
//! - Still images or directories of images (any other path)
//!
//! A `FrameSource` owns exactly one device and one acquisition thread. The thread
//! overwrites a single "latest frame" slot; readers copy out of it. There is no
//! queue: frames a slow consumer never reads are dropped.

pub mod file;
mod normalize;
pub mod source;
pub mod synthetic;
#[cfg(feature = "ingest-v4l2")]
pub mod v4l2;

use anyhow::Result;

use crate::error::Error;
use crate::frame::Frame;

pub use file::ImageFileDevice;
pub use source::{CaptureStats, FrameSource, STOP_TIMEOUT};
pub use synthetic::SyntheticDevice;
#[cfg(feature = "ingest-v4l2")]
pub use v4l2::V4l2Device;

/// Requested capture parameters. Devices treat these as hints.
#[derive(Clone, Debug, PartialEq)]
pub struct CaptureSettings {
    /// Device index, device path, `stub://name`, or image path.
    pub source: String,
    pub width: u32,
    pub height: u32,
    pub target_fps: u32,
    /// Consecutive read failures before the device is reopened. 0 disables.
    pub reconnect_after: u32,
}

impl Default for CaptureSettings {
    fn default() -> Self {
        Self {
            source: "0".to_string(),
            width: 1280,
            height: 720,
            target_fps: 30,
            reconnect_after: 5,
        }
    }
}

/// Format actually negotiated with the device.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CaptureFormat {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
}

/// A synchronous frame producer driven by the acquisition thread.
pub trait CaptureDevice: Send {
    /// Human-readable device identifier for logs.
    fn describe(&self) -> String;

    /// Negotiated format.
    fn format(&self) -> CaptureFormat;

    /// Block until the next frame is available.
    ///
    /// Errors are treated as transient by the acquisition loop.
    fn read_frame(&mut self) -> Result<Frame>;

    /// Tear down and reopen the underlying device after repeated failures.
    fn reopen(&mut self) -> Result<()> {
        Ok(())
    }

    /// Release the underlying device. Must be safe to call more than once.
    fn release(&mut self) {}
}

/// Parsed video source address.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SourceAddress {
    Synthetic(String),
    DeviceIndex(u32),
    DevicePath(String),
    File(String),
}

impl SourceAddress {
    pub fn parse(raw: &str) -> Result<Self, Error> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(Error::device(raw, "empty source address"));
        }
        if let Some(name) = trimmed.strip_prefix("stub://") {
            return Ok(SourceAddress::Synthetic(name.to_string()));
        }
        if trimmed.chars().all(|c| c.is_ascii_digit()) {
            let index = trimmed
                .parse::<u32>()
                .map_err(|e| Error::device(raw, format!("invalid device index: {}", e)))?;
            return Ok(SourceAddress::DeviceIndex(index));
        }
        if trimmed.starts_with("/dev/video") {
            return Ok(SourceAddress::DevicePath(trimmed.to_string()));
        }
        if trimmed.contains("://") {
            return Err(Error::device(
                raw,
                "network sources are not supported (local devices and files only)",
            ));
        }
        Ok(SourceAddress::File(trimmed.to_string()))
    }
}

/// Open the device named by `settings.source`.
pub fn open_device(settings: &CaptureSettings) -> Result<Box<dyn CaptureDevice>, Error> {
    match SourceAddress::parse(&settings.source)? {
        SourceAddress::Synthetic(name) => Ok(Box::new(SyntheticDevice::new(
            name,
            settings.width,
            settings.height,
            settings.target_fps,
        ))),
        SourceAddress::File(path) => {
            let device = ImageFileDevice::open(&path, settings.target_fps)
                .map_err(|e| Error::device(&settings.source, format!("{:#}", e)))?;
            Ok(Box::new(device))
        }
        SourceAddress::DeviceIndex(index) => open_v4l2(&format!("/dev/video{}", index), settings),
        SourceAddress::DevicePath(path) => open_v4l2(&path, settings),
    }
}

#[cfg(feature = "ingest-v4l2")]
fn open_v4l2(path: &str, settings: &CaptureSettings) -> Result<Box<dyn CaptureDevice>, Error> {
    let device = V4l2Device::open(path, settings.width, settings.height, settings.target_fps)
        .map_err(|e| Error::device(path, format!("{:#}", e)))?;
    Ok(Box::new(device))
}

#[cfg(not(feature = "ingest-v4l2"))]
fn open_v4l2(path: &str, _settings: &CaptureSettings) -> Result<Box<dyn CaptureDevice>, Error> {
    Err(Error::device(
        path,
        "camera capture requires the ingest-v4l2 feature",
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_source_addresses() {
        assert_eq!(
            SourceAddress::parse("stub://front").unwrap(),
            SourceAddress::Synthetic("front".to_string())
        );
        assert_eq!(
            SourceAddress::parse("0").unwrap(),
            SourceAddress::DeviceIndex(0)
        );
        assert_eq!(
            SourceAddress::parse("/dev/video2").unwrap(),
            SourceAddress::DevicePath("/dev/video2".to_string())
        );
        assert_eq!(
            SourceAddress::parse("clips/fall.jpg").unwrap(),
            SourceAddress::File("clips/fall.jpg".to_string())
        );
    }

    #[test]
    fn rejects_empty_and_network_addresses() {
        assert!(matches!(
            SourceAddress::parse("  "),
            Err(Error::DeviceUnavailable { .. })
        ));
        assert!(matches!(
            SourceAddress::parse("rtsp://10.0.0.2/stream"),
            Err(Error::DeviceUnavailable { .. })
        ));
    }

    #[test]
    fn missing_image_file_is_device_unavailable() {
        let settings = CaptureSettings {
            source: "/nonexistent/fallwatch/frame.png".to_string(),
            ..CaptureSettings::default()
        };
        assert!(matches!(
            open_device(&settings),
            Err(Error::DeviceUnavailable { .. })
        ));
    }
}
