//! V4L2 capture device.
//!
//! `V4l2Device` captures from a local device node (e.g. /dev/video0):
//! - Negotiates RGB3, falling back to YUYV when the driver refuses RGB
//! - Applies the requested frame rate as a hint
//! - Converts every buffer to RGB24 in-memory
//!
//! Negotiated width, height and fps are reported through `CaptureDevice::format`.

use anyhow::{anyhow, Context, Result};
use ouroboros::self_referencing;

use super::normalize::{normalize_to_rgb, WireFormat};
use super::{CaptureDevice, CaptureFormat};
use crate::frame::{Frame, PixelFormat};

const MMAP_BUFFERS: u32 = 4;

pub struct V4l2Device {
    path: String,
    requested_width: u32,
    requested_height: u32,
    requested_fps: u32,
    state: Option<V4l2State>,
    wire_format: WireFormat,
    active: CaptureFormat,
    frame_count: u64,
}

#[self_referencing]
struct V4l2State {
    device: v4l::Device,
    #[borrows(mut device)]
    #[covariant]
    stream: v4l::prelude::MmapStream<'this, v4l::Device>,
}

impl V4l2Device {
    pub fn open(path: &str, width: u32, height: u32, fps: u32) -> Result<Self> {
        let mut device = Self {
            path: path.to_string(),
            requested_width: width,
            requested_height: height,
            requested_fps: fps,
            state: None,
            wire_format: WireFormat::Rgb24,
            active: CaptureFormat { width, height, fps },
            frame_count: 0,
        };
        device.connect()?;
        Ok(device)
    }

    fn connect(&mut self) -> Result<()> {
        use v4l::buffer::Type;
        use v4l::video::Capture;

        let mut device = v4l::Device::with_path(&self.path)
            .with_context(|| format!("open v4l2 device {}", self.path))?;
        let mut format = device.format().context("read v4l2 format")?;
        format.width = self.requested_width;
        format.height = self.requested_height;
        format.fourcc = v4l::FourCC::new(b"RGB3");

        let format = match device.set_format(&format) {
            Ok(format) => format,
            Err(err) => {
                log::warn!(
                    "V4l2Device: failed to set RGB3 on {}: {}; trying YUYV",
                    self.path,
                    err
                );
                let mut fallback = format;
                fallback.fourcc = v4l::FourCC::new(b"YUYV");
                device
                    .set_format(&fallback)
                    .or_else(|_| device.format())
                    .context("read v4l2 format after set failure")?
            }
        };

        self.wire_format = match &format.fourcc.repr {
            b"RGB3" => WireFormat::Rgb24,
            b"YUYV" => WireFormat::Yuyv,
            other => {
                return Err(anyhow!(
                    "unsupported pixel format {:?} on {}",
                    String::from_utf8_lossy(other),
                    self.path
                ))
            }
        };

        let mut fps = self.requested_fps;
        if self.requested_fps > 0 {
            let params = v4l::video::capture::Parameters::with_fps(self.requested_fps);
            match device.set_params(&params) {
                Ok(applied) if applied.interval.numerator > 0 => {
                    fps = applied.interval.denominator / applied.interval.numerator;
                }
                Ok(_) => {}
                Err(err) => {
                    log::warn!("V4l2Device: failed to set fps on {}: {}", self.path, err);
                }
            }
        }

        self.active = CaptureFormat {
            width: format.width,
            height: format.height,
            fps,
        };

        let state = V4l2StateTryBuilder {
            device,
            stream_builder: |device| {
                v4l::prelude::MmapStream::with_buffers(device, Type::VideoCapture, MMAP_BUFFERS)
                    .map_err(|err| anyhow::Error::new(err).context("create v4l2 buffer stream"))
            },
        }
        .try_build()?;
        self.state = Some(state);

        log::info!(
            "V4l2Device: connected to {} ({}x{} @ {} fps, {:?})",
            self.path,
            self.active.width,
            self.active.height,
            self.active.fps,
            self.wire_format
        );
        Ok(())
    }
}

impl CaptureDevice for V4l2Device {
    fn describe(&self) -> String {
        self.path.clone()
    }

    fn format(&self) -> CaptureFormat {
        self.active
    }

    fn read_frame(&mut self) -> Result<Frame> {
        use v4l::io::traits::CaptureStream;

        let state = self.state.as_mut().context("v4l2 device not connected")?;
        let wire_format = self.wire_format;
        let CaptureFormat { width, height, .. } = self.active;
        let rgb = state.with_mut(|fields| -> Result<Vec<u8>> {
            let (buf, meta) = fields.stream.next().context("capture v4l2 frame")?;
            let used = (meta.bytesused as usize).min(buf.len());
            let used = if used == 0 { buf.len() } else { used };
            normalize_to_rgb(&buf[..used], width, height, wire_format)
        })?;

        self.frame_count += 1;
        Ok(Frame::new(
            rgb,
            width,
            height,
            PixelFormat::Rgb24,
            self.frame_count,
        ))
    }

    fn reopen(&mut self) -> Result<()> {
        self.state = None;
        self.connect()
    }

    fn release(&mut self) {
        if self.state.take().is_some() {
            log::info!("V4l2Device: released {}", self.path);
        }
    }
}
