//! Newer protocol generation, driven through the v4l crate.
//!
//! Only what the dispatcher and the demo binary need: capability probing,
//! format get/set and mmap streaming.

use std::path::Path;
use std::time::Duration;

use tracing::{debug, info};
use v4l::buffer::Type;
use v4l::capability::Flags;
use v4l::io::mmap::Stream;
use v4l::io::traits::CaptureStream;
use v4l::video::Capture;
use v4l::Device;

use crate::traits::{CaptureError, FourCC, Result};

/// What a V4L2 driver reports about itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceCapabilities {
    /// Driver name, e.g. `vivid`.
    pub driver: String,
    /// Human-readable card name.
    pub card: String,
    /// Bus location, e.g. `platform:vivid-000`.
    pub bus_info: String,
    /// Supports video capture.
    pub can_capture: bool,
    /// Supports streaming (mmap) I/O.
    pub can_stream: bool,
}

/// Negotiated V4L2 pixel format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Format {
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
    /// Pixel encoding.
    pub fourcc: FourCC,
    /// Bytes per line; zero until the driver fills it in.
    pub stride: u32,
    /// Bytes per frame; zero until the driver fills it in.
    pub size: u32,
}

impl Format {
    /// Request a size and encoding, leaving stride and size to the driver.
    #[must_use]
    pub const fn new(width: u32, height: u32, fourcc: FourCC) -> Self {
        Self {
            width,
            height,
            fourcc,
            stride: 0,
            size: 0,
        }
    }
}

impl From<&v4l::Format> for Format {
    fn from(fmt: &v4l::Format) -> Self {
        Self {
            width: fmt.width,
            height: fmt.height,
            fourcc: FourCC::from(fmt.fourcc),
            stride: fmt.stride,
            size: fmt.size,
        }
    }
}

/// Per-frame data reported by the driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameMetadata {
    /// Driver frame counter.
    pub sequence: u32,
    /// Capture time reported by the driver.
    pub timestamp: Duration,
    /// Bytes of the buffer holding image data.
    pub bytes_used: u32,
}

/// Capture device bound through V4L2.
pub struct StreamingDevice {
    device: Device,
    capabilities: DeviceCapabilities,
}

impl std::fmt::Debug for StreamingDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamingDevice")
            .field("capabilities", &self.capabilities)
            .finish_non_exhaustive()
    }
}

impl StreamingDevice {
    /// Open `path` and bind it as a V4L2 capture device.
    ///
    /// A node that rejects the capability query, or one without capture
    /// support, is reported as [`CaptureError::Unsupported`].
    pub fn probe(path: &Path) -> Result<Self> {
        let device = Device::with_path(path)
            .map_err(|err| CaptureError::system("opening video device", err))?;

        let caps = device.query_caps().map_err(|err| {
            debug!(device = %path.display(), error = %err, "V4L2 capability query rejected");
            CaptureError::Unsupported(format!("{} does not speak V4L2: {err}", path.display()))
        })?;

        let capabilities = DeviceCapabilities {
            driver: caps.driver,
            card: caps.card,
            bus_info: caps.bus,
            can_capture: caps.capabilities.contains(Flags::VIDEO_CAPTURE),
            can_stream: caps.capabilities.contains(Flags::STREAMING),
        };
        if !capabilities.can_capture {
            return Err(CaptureError::Unsupported(format!(
                "{} ({}) cannot capture video",
                path.display(),
                capabilities.card
            )));
        }

        info!(
            driver = %capabilities.driver,
            card = %capabilities.card,
            streaming = capabilities.can_stream,
            "bound V4L2 device"
        );
        Ok(Self {
            device,
            capabilities,
        })
    }

    /// Capabilities reported at probe time.
    pub const fn capabilities(&self) -> &DeviceCapabilities {
        &self.capabilities
    }

    /// Current capture format.
    pub fn format(&self) -> Result<Format> {
        let fmt = self
            .device
            .format()
            .map_err(|err| CaptureError::system("querying format (VIDIOC_G_FMT)", err))?;
        Ok(Format::from(&fmt))
    }

    /// Request `format`; returns what the driver actually applied.
    pub fn set_format(&mut self, format: &Format) -> Result<Format> {
        let mut fmt = self
            .device
            .format()
            .map_err(|err| CaptureError::system("querying format (VIDIOC_G_FMT)", err))?;

        fmt.width = format.width;
        fmt.height = format.height;
        fmt.fourcc = format.fourcc.into();

        let fmt = self
            .device
            .set_format(&fmt)
            .map_err(|err| CaptureError::system("setting format (VIDIOC_S_FMT)", err))?;
        Ok(Format::from(&fmt))
    }

    /// Stream `frames` frames through `buffer_count` mmap buffers.
    ///
    /// `on_frame` sees each frame's bytes while the buffer is dequeued.
    pub fn capture<F>(&mut self, buffer_count: u32, frames: usize, mut on_frame: F) -> Result<()>
    where
        F: FnMut(&[u8], FrameMetadata),
    {
        if !self.capabilities.can_stream {
            return Err(CaptureError::Unsupported(format!(
                "{} does not support streaming I/O",
                self.capabilities.card
            )));
        }

        let mut stream = Stream::with_buffers(&self.device, Type::VideoCapture, buffer_count)
            .map_err(|err| CaptureError::system("requesting buffers (VIDIOC_REQBUFS)", err))?;

        for _ in 0..frames {
            let (buf, meta) = stream
                .next()
                .map_err(|err| CaptureError::system("dequeuing buffer (VIDIOC_DQBUF)", err))?;

            // V4L2 timestamps are non-negative in practice
            #[allow(clippy::cast_sign_loss)]
            let secs = meta.timestamp.sec.max(0) as u64;
            #[allow(clippy::cast_sign_loss, clippy::cast_possible_truncation)]
            let nanos = (meta.timestamp.usec.max(0) as u32).saturating_mul(1000);

            on_frame(
                buf,
                FrameMetadata {
                    sequence: meta.sequence,
                    timestamp: Duration::new(secs, nanos),
                    bytes_used: meta.bytesused,
                },
            );
        }
        Ok(())
    }
}
