//! v4l1-capture: a Video4Linux v1 capture backend
//!
//! The legacy backend is built over the [`ControlDevice`] trait, so it runs
//! against real V4L1 hardware ([`V4l1Device`]) and against an in-crate mock in
//! tests. [`VideoBackend`] picks V4L2 when the device speaks it and falls
//! back to a V4L1 [`Session`] otherwise.

pub mod buffers;
pub mod capability;
pub mod config;
pub mod formats;
pub mod negotiate;
pub mod queue;
pub mod session;
pub mod sys;
pub mod traits;
pub mod v4l2;
pub mod video;

#[cfg(test)]
pub mod mock;

pub use buffers::{IoMode, Slot};
pub use config::CaptureConfig;
pub use session::{FrameBuffer, Session, SessionState};
pub use sys::{MappedRegion, V4l1Device};
pub use traits::{CaptureError, ControlDevice, ErrorKind, FourCC, Severity, SharedRegion, Window};
pub use v4l2::StreamingDevice;
pub use video::{ProtocolGeneration, VideoBackend};
