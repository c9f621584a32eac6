//! V4L2 camera capture via the `v4l` crate.

use crate::convert::{self, ConvertError};
use image::RgbImage;
use rollcall_core::{Frame, FrameSource, SourceError};
use std::path::Path;
use thiserror::Error;
use v4l::buffer::Type as BufType;
use v4l::io::traits::CaptureStream;
use v4l::prelude::*;
use v4l::video::Capture;
use v4l::FourCC;

const STREAM_BUFFERS: u32 = 4;

#[derive(Error, Debug)]
pub enum CameraError {
    #[error("device not found: {0}")]
    DeviceNotFound(String),
    #[error("device busy")]
    DeviceBusy,
    #[error("video capture not supported by {0}")]
    CaptureNotSupported(String),
    #[error("format negotiation failed: {0}")]
    FormatNegotiationFailed(String),
    #[error("capture failed: {0}")]
    CaptureFailed(String),
    #[error("frame conversion failed: {0}")]
    Convert(#[from] ConvertError),
}

/// Negotiated pixel format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    /// YUYV 4:2:2 packed, converted to RGB.
    Yuyv,
    /// 8-bit greyscale, replicated to RGB.
    Grey,
}

impl PixelFormat {
    fn from_fourcc(fourcc: FourCC) -> Option<Self> {
        if fourcc == FourCC::new(b"YUYV") {
            Some(Self::Yuyv)
        } else if fourcc == FourCC::new(b"GREY") {
            Some(Self::Grey)
        } else {
            None
        }
    }
}

/// A streaming V4L2 capture device.
pub struct Camera {
    stream: MmapStream<'static>,
    pub width: u32,
    pub height: u32,
    pub device_path: String,
    pixel_format: PixelFormat,
}

impl Camera {
    /// Open `device_path`, ask for YUYV at `width`×`height`, and start an
    /// mmap stream. The driver may substitute its nearest supported size.
    pub fn open(device_path: &str, width: u32, height: u32) -> Result<Self, CameraError> {
        if !Path::new(device_path).exists() {
            return Err(CameraError::DeviceNotFound(device_path.to_string()));
        }

        let device = Device::with_path(device_path).map_err(|e| {
            if e.raw_os_error() == Some(16) {
                CameraError::DeviceBusy
            } else {
                CameraError::DeviceNotFound(format!("{device_path}: {e}"))
            }
        })?;

        let caps = device
            .query_caps()
            .map_err(|e| CameraError::CaptureFailed(format!("failed to query capabilities: {e}")))?;
        if !caps.capabilities.contains(v4l::capability::Flags::VIDEO_CAPTURE) {
            return Err(CameraError::CaptureNotSupported(device_path.to_string()));
        }
        tracing::info!(device = device_path, driver = %caps.driver, card = %caps.card, "opened camera");

        let mut fmt = device
            .format()
            .map_err(|e| CameraError::FormatNegotiationFailed(format!("failed to get format: {e}")))?;
        fmt.fourcc = FourCC::new(b"YUYV");
        fmt.width = width;
        fmt.height = height;
        let negotiated = device
            .set_format(&fmt)
            .map_err(|e| CameraError::FormatNegotiationFailed(format!("failed to set format: {e}")))?;

        let pixel_format = PixelFormat::from_fourcc(negotiated.fourcc).ok_or_else(|| {
            CameraError::FormatNegotiationFailed(format!(
                "unsupported pixel format {:?} (need YUYV or GREY)",
                negotiated.fourcc
            ))
        })?;
        tracing::info!(
            width = negotiated.width,
            height = negotiated.height,
            fourcc = ?negotiated.fourcc,
            "negotiated format"
        );

        let stream = MmapStream::with_buffers(&device, BufType::VideoCapture, STREAM_BUFFERS)
            .map_err(|e| CameraError::CaptureFailed(format!("failed to create mmap stream: {e}")))?;

        Ok(Self {
            stream,
            width: negotiated.width,
            height: negotiated.height,
            device_path: device_path.to_string(),
            pixel_format,
        })
    }

    pub fn pixel_format(&self) -> PixelFormat {
        self.pixel_format
    }

    /// Dequeue the next buffer and convert it to an RGB frame.
    pub fn capture(&mut self) -> Result<Frame, CameraError> {
        let (buf, meta) = self
            .stream
            .next()
            .map_err(|e| CameraError::CaptureFailed(format!("failed to dequeue buffer: {e}")))?;
        let sequence = u64::from(meta.sequence);

        let image: RgbImage = match self.pixel_format {
            PixelFormat::Yuyv => convert::yuyv_to_rgb(buf, self.width, self.height)?,
            PixelFormat::Grey => convert::grey_to_rgb(buf, self.width, self.height)?,
        };
        Ok(Frame::new(image, sequence))
    }
}

impl FrameSource for Camera {
    /// A live camera never reaches end of stream; any capture failure makes
    /// the source unavailable.
    fn next_frame(&mut self) -> Result<Option<Frame>, SourceError> {
        self.capture().map(Some).map_err(|e| {
            tracing::warn!(device = %self.device_path, error = %e, "camera capture failed");
            SourceError::Unavailable(e.to_string())
        })
    }
}
