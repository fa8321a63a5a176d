//! Selection between protocol generations.
//!
//! V4L2 is tried first; only a device that rejects it is bound through the
//! legacy V4L1 session.

use std::fmt;

use tracing::{debug, info};

use crate::config::CaptureConfig;
use crate::session::Session;
use crate::sys::V4l1Device;
use crate::traits::{ErrorKind, Result};
use crate::v4l2::StreamingDevice;

/// Protocol generation a device was bound with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProtocolGeneration {
    /// Video4Linux 2.
    V4l2,
    /// Legacy Video4Linux 1.
    V4l1,
}

impl fmt::Display for ProtocolGeneration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::V4l2 => write!(f, "V4L2"),
            Self::V4l1 => write!(f, "V4L1"),
        }
    }
}

/// A bound capture device.
#[derive(Debug)]
pub enum VideoBackend {
    /// Bound through V4L2.
    Streaming(StreamingDevice),
    /// Bound through V4L1; the session is already probed.
    Legacy(Session<V4l1Device>),
}

impl VideoBackend {
    /// Bind the configured device, preferring V4L2.
    ///
    /// Errors other than [`ErrorKind::Unsupported`] from the V4L2 attempt
    /// are returned without trying V4L1.
    pub fn open(config: &CaptureConfig) -> Result<Self> {
        match StreamingDevice::probe(config.device()) {
            Ok(device) => return Ok(Self::Streaming(device)),
            Err(err) if err.kind() == ErrorKind::Unsupported => {
                debug!(error = %err, "falling back to V4L1");
            }
            Err(err) => return Err(err),
        }

        let mut session = Session::new(config.clone());
        session.open_path()?;
        session.probe()?;
        info!(
            device = %config.device().display(),
            io_mode = %session.io_mode(),
            "bound V4L1 device"
        );
        Ok(Self::Legacy(session))
    }

    /// Which protocol generation the device was bound with.
    pub const fn generation(&self) -> ProtocolGeneration {
        match self {
            Self::Streaming(_) => ProtocolGeneration::V4l2,
            Self::Legacy(_) => ProtocolGeneration::V4l1,
        }
    }
}
