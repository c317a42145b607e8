//! V4L2 camera capture via the `v4l` crate.

use crate::pixel::{self, PixelError};
use candor_core::frame::Frame;
use candor_core::sampling::{FrameSource, FrameSourceError};
use serde::Serialize;
use std::path::Path;
use std::time::{Duration, Instant};
use thiserror::Error;
use v4l::buffer::Type as BufType;
use v4l::io::traits::CaptureStream;
use v4l::prelude::*;
use v4l::video::Capture;
use v4l::FourCC;

/// Requested capture size; drivers may negotiate something else.
const CAPTURE_WIDTH: u32 = 640;
const CAPTURE_HEIGHT: u32 = 480;

/// Fraction of near-black pixels above which a frame counts as dark.
const DARK_FRACTION: f32 = 0.95;

#[derive(Error, Debug)]
pub enum CameraError {
    #[error("device not found: {0}")]
    DeviceNotFound(String),
    #[error("capture failed: {0}")]
    CaptureFailed(String),
    #[error("device busy")]
    DeviceBusy,
    #[error("format negotiation failed: {0}")]
    FormatNegotiationFailed(String),
    #[error("streaming not supported")]
    StreamingNotSupported,
    #[error(transparent)]
    Pixel(#[from] PixelError),
}

/// Info about a discovered V4L2 device.
#[derive(Debug, Clone, Serialize)]
pub struct DeviceInfo {
    pub path: String,
    pub name: String,
    pub driver: String,
    pub bus: String,
}

/// Negotiated pixel format for the camera.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    /// YUYV 4:2:2 packed (2 bytes/pixel, extract Y channel).
    Yuyv,
    /// 8-bit grayscale.
    Grey,
    /// 16-bit little-endian grayscale.
    Y16,
}

impl PixelFormat {
    fn from_fourcc(fourcc: FourCC) -> Option<Self> {
        if fourcc == FourCC::new(b"YUYV") {
            Some(Self::Yuyv)
        } else if fourcc == FourCC::new(b"GREY") {
            Some(Self::Grey)
        } else if fourcc == FourCC::new(b"Y16 ") || fourcc == FourCC::new(b"Y16\0") {
            Some(Self::Y16)
        } else {
            None
        }
    }
}

/// V4L2 camera device handle.
pub struct Camera {
    device: Device,
    pub width: u32,
    pub height: u32,
    pub device_path: String,
    pixel_format: PixelFormat,
}

impl Camera {
    /// Open a V4L2 camera device by path (e.g., "/dev/video0").
    pub fn open(device_path: &str) -> Result<Self, CameraError> {
        if !Path::new(device_path).exists() {
            return Err(CameraError::DeviceNotFound(device_path.to_string()));
        }

        let device = Device::with_path(device_path).map_err(|e| {
            if e.to_string().contains("busy") || e.to_string().contains("EBUSY") {
                CameraError::DeviceBusy
            } else {
                CameraError::DeviceNotFound(format!("{device_path}: {e}"))
            }
        })?;

        let caps = device.query_caps().map_err(|e| {
            CameraError::CaptureFailed(format!("failed to query capabilities: {e}"))
        })?;

        tracing::info!(
            device = device_path,
            driver = %caps.driver,
            card = %caps.card,
            "opened camera"
        );

        if !caps.capabilities.contains(v4l::capability::Flags::VIDEO_CAPTURE) {
            return Err(CameraError::StreamingNotSupported);
        }

        // Webcams nearly all speak YUYV; some drivers answer GREY or Y16.
        let mut fmt = device.format().map_err(|e| {
            CameraError::FormatNegotiationFailed(format!("failed to get format: {e}"))
        })?;
        fmt.fourcc = FourCC::new(b"YUYV");
        fmt.width = CAPTURE_WIDTH;
        fmt.height = CAPTURE_HEIGHT;

        let negotiated = device.set_format(&fmt).map_err(|e| {
            CameraError::FormatNegotiationFailed(format!("failed to set format: {e}"))
        })?;

        let pixel_format = PixelFormat::from_fourcc(negotiated.fourcc).ok_or_else(|| {
            CameraError::FormatNegotiationFailed(format!(
                "unsupported pixel format: {:?} (need YUYV, GREY, or Y16)",
                negotiated.fourcc
            ))
        })?;

        tracing::info!(
            width = negotiated.width,
            height = negotiated.height,
            fourcc = ?negotiated.fourcc,
            "negotiated format"
        );

        Ok(Self {
            device,
            width: negotiated.width,
            height: negotiated.height,
            device_path: device_path.to_string(),
            pixel_format,
        })
    }

    /// Start streaming; the returned source ends after `duration` or on error.
    ///
    /// The first `warmup` frames, and any dark frame among them, are dropped
    /// while exposure settles. Warm-up frames do not count toward frame
    /// indices, so stride sampling starts at the first usable frame.
    pub fn stream(&self, duration: Duration, warmup: usize) -> Result<CameraStream<'_>, CameraError> {
        let stream = MmapStream::with_buffers(&self.device, BufType::VideoCapture, 4).map_err(|e| {
            CameraError::CaptureFailed(format!("failed to create mmap stream: {e}"))
        })?;

        let mut camera_stream = CameraStream {
            camera: self,
            stream,
            deadline: Instant::now() + duration,
            index: 0,
        };
        camera_stream.discard_warmup(warmup)?;
        Ok(camera_stream)
    }

    /// Convert a raw buffer to grayscale based on the negotiated format.
    fn buf_to_grayscale(&self, buf: &[u8]) -> Result<Vec<u8>, PixelError> {
        match self.pixel_format {
            PixelFormat::Grey => pixel::grey_to_grayscale(buf, self.width, self.height),
            PixelFormat::Y16 => pixel::y16_to_grayscale(buf, self.width, self.height),
            PixelFormat::Yuyv => pixel::yuyv_to_grayscale(buf, self.width, self.height),
        }
    }

    /// List available V4L2 video capture devices.
    pub fn list_devices() -> Vec<DeviceInfo> {
        let mut devices = Vec::new();

        for i in 0..16 {
            let path = format!("/dev/video{i}");
            if !Path::new(&path).exists() {
                continue;
            }
            let Ok(dev) = Device::with_path(&path) else {
                continue;
            };
            let Ok(caps) = dev.query_caps() else {
                continue;
            };
            if !caps.capabilities.contains(v4l::capability::Flags::VIDEO_CAPTURE) {
                continue;
            }
            devices.push(DeviceInfo {
                path,
                name: caps.card.clone(),
                driver: caps.driver.clone(),
                bus: caps.bus.clone(),
            });
        }

        devices
    }
}

/// Live capture bounded by a deadline.
pub struct CameraStream<'a> {
    camera: &'a Camera,
    stream: MmapStream<'a>,
    deadline: Instant,
    index: usize,
}

impl CameraStream<'_> {
    fn grab(&mut self) -> Result<Vec<u8>, CameraError> {
        let (buf, _meta) = self
            .stream
            .next()
            .map_err(|e| CameraError::CaptureFailed(format!("failed to dequeue buffer: {e}")))?;
        Ok(self.camera.buf_to_grayscale(buf)?)
    }

    fn discard_warmup(&mut self, warmup: usize) -> Result<(), CameraError> {
        let mut dark = 0usize;
        // Give a slow sensor up to three times the warm-up budget to brighten.
        for attempt in 0..warmup * 3 {
            let gray = self.grab()?;
            if pixel::is_dark_frame(&gray, DARK_FRACTION) {
                dark += 1;
            } else if attempt + 1 >= warmup {
                break;
            }
        }
        tracing::debug!(warmup, dark, "camera warm-up done");
        Ok(())
    }
}

/// Pull buffers until one is not dark, or `None` once `deadline` passes.
///
/// Dark frames (covered lens, lights off) never reach the stride counter.
fn next_lit(
    mut grab: impl FnMut() -> Result<Vec<u8>, CameraError>,
    deadline: Instant,
) -> Result<Option<Vec<u8>>, CameraError> {
    while Instant::now() < deadline {
        let gray = grab()?;
        if !pixel::is_dark_frame(&gray, DARK_FRACTION) {
            return Ok(Some(gray));
        }
        tracing::trace!("dark frame skipped");
    }
    Ok(None)
}

impl FrameSource for CameraStream<'_> {
    fn next_frame(&mut self) -> Result<Option<Frame>, FrameSourceError> {
        let deadline = self.deadline;
        let Some(gray) = next_lit(|| self.grab(), deadline)
            .map_err(|e| FrameSourceError::Read(e.to_string()))?
        else {
            return Ok(None);
        };
        let frame = Frame::from_gray(gray, self.camera.width, self.camera.height, self.index)?;
        self.index += 1;
        Ok(Some(frame))
    }
}
