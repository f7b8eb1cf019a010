//! V4L2 camera stream.
//!
//! `camera(<index>)` opens `/dev/video<index>`, asks for RGB24 at the requested
//! resolution and falls back to whatever format the driver settles on (RGB24,
//! NV12 and YUYV are converted, anything else is rejected at grab time). Timestamps
//! for this handle are always realtime.

use anyhow::{anyhow, Context, Result};
use image::RgbImage;
use ouroboros::self_referencing;

use super::normalize::{normalize_to_rgb, PixelFormat};
use super::StreamHandle;
use crate::frame::{CANONICAL_HEIGHT, CANONICAL_WIDTH};

pub struct V4l2Stream {
    device_path: String,
    state: Option<V4l2State>,
    width: u32,
    height: u32,
    format: PixelFormat,
    frames_captured: u64,
}

#[self_referencing]
struct V4l2State {
    device: v4l::Device,
    #[borrows(mut device)]
    #[covariant]
    stream: v4l::prelude::MmapStream<'this, v4l::Device>,
}

impl V4l2Stream {
    pub fn open(index: u32) -> Result<Self> {
        let mut stream = Self {
            device_path: format!("/dev/video{}", index),
            state: None,
            width: CANONICAL_WIDTH,
            height: CANONICAL_HEIGHT,
            format: PixelFormat::Rgb24,
            frames_captured: 0,
        };
        stream.start(CANONICAL_WIDTH, CANONICAL_HEIGHT)?;
        Ok(stream)
    }

    fn start(&mut self, width: u32, height: u32) -> Result<()> {
        use v4l::buffer::Type;
        use v4l::video::Capture;

        self.state = None;
        let mut device = v4l::Device::with_path(&self.device_path)
            .with_context(|| format!("open v4l2 device {}", self.device_path))?;
        let mut format = device.format().context("read v4l2 format")?;
        format.width = width;
        format.height = height;
        format.fourcc = v4l::FourCC::new(b"RGB3");

        let format = match device.set_format(&format) {
            Ok(format) => format,
            Err(err) => {
                log::warn!(
                    "V4l2Stream: failed to set format on {}: {}",
                    self.device_path,
                    err
                );
                device
                    .format()
                    .context("read v4l2 format after set failure")?
            }
        };

        self.format = match &format.fourcc.repr {
            b"RGB3" => PixelFormat::Rgb24,
            b"NV12" => PixelFormat::Nv12,
            b"YUYV" => PixelFormat::Yuyv,
            other => {
                return Err(anyhow!(
                    "v4l2 device {} settled on unsupported format {:?}",
                    self.device_path,
                    String::from_utf8_lossy(other)
                ))
            }
        };
        self.width = format.width;
        self.height = format.height;

        let state = V4l2StateBuilder {
            device,
            stream_builder: |device| {
                v4l::prelude::MmapStream::with_buffers(device, Type::VideoCapture, 4)
                    .map_err(|err| anyhow::Error::new(err).context("create v4l2 buffer stream"))
            },
        }
        .try_build()?;
        self.state = Some(state);

        log::info!(
            "V4l2Stream: capturing {} ({}x{} {:?})",
            self.device_path,
            self.width,
            self.height,
            self.format
        );
        Ok(())
    }
}

impl StreamHandle for V4l2Stream {
    fn grab(&mut self) -> Result<Option<RgbImage>> {
        use v4l::io::traits::CaptureStream;

        let Some(state) = self.state.as_mut() else {
            return Ok(None);
        };
        let pixels = state
            .with_mut(|fields| fields.stream.next().map(|(buf, _meta)| buf.to_vec()))
            .context("capture v4l2 frame")?;
        let rgb = normalize_to_rgb(&pixels, self.width, self.height, self.format)?;
        self.frames_captured += 1;
        RgbImage::from_raw(self.width, self.height, rgb)
            .map(Some)
            .ok_or_else(|| anyhow!("v4l2 frame size mismatch"))
    }

    fn position_ms(&self) -> Option<f64> {
        None
    }

    fn set_resolution(&mut self, width: u32, height: u32) {
        if (width, height) == (self.width, self.height) {
            return;
        }
        if let Err(err) = self.start(width, height) {
            log::warn!(
                "V4l2Stream: cannot switch {} to {}x{}: {}",
                self.device_path,
                width,
                height,
                err
            );
        }
    }

    fn is_opened(&self) -> bool {
        self.state.is_some()
    }

    fn release(&mut self) {
        log::debug!(
            "V4l2Stream: released {} after {} frames",
            self.device_path,
            self.frames_captured
        );
        self.state = None;
    }
}
