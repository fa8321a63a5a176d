//! Capture configuration.

use std::path::{Path, PathBuf};

use crate::buffers::MAX_FRAMES;
use crate::traits::FourCC;

/// Device opened when no path is given.
pub const DEFAULT_DEVICE: &str = "/dev/video0";

/// Frame buffers requested when not configured.
pub const DEFAULT_FRAME_COUNT: usize = 4;

/// What to open and how many frames to keep in flight.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureConfig {
    device: PathBuf,
    frame_count: usize,
    encoding: Option<FourCC>,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            device: PathBuf::from(DEFAULT_DEVICE),
            frame_count: DEFAULT_FRAME_COUNT,
            encoding: None,
        }
    }
}

impl CaptureConfig {
    /// Default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Device path. An empty path selects [`DEFAULT_DEVICE`].
    #[must_use]
    pub fn with_device<P: Into<PathBuf>>(mut self, device: P) -> Self {
        let device = device.into();
        self.device = if device.as_os_str().is_empty() {
            PathBuf::from(DEFAULT_DEVICE)
        } else {
            device
        };
        self
    }

    /// Requested number of frame buffers, clamped to `1..=32`.
    #[must_use]
    pub fn with_frame_count(mut self, frame_count: usize) -> Self {
        self.frame_count = frame_count.clamp(1, MAX_FRAMES);
        self
    }

    /// Encoding to select; `None` keeps the device's current one.
    #[must_use]
    pub const fn with_encoding(mut self, encoding: Option<FourCC>) -> Self {
        self.encoding = encoding;
        self
    }

    /// Device path.
    pub fn device(&self) -> &Path {
        &self.device
    }

    /// Requested number of frame buffers.
    pub const fn frame_count(&self) -> usize {
        self.frame_count
    }

    /// Requested encoding.
    pub const fn encoding(&self) -> Option<FourCC> {
        self.encoding
    }
}
