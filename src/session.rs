//! Capture session lifecycle.
//!
//! A [`Session`] walks `Closed -> Opened -> Probed -> Configured -> Streaming`
//! and back. Every operation checks the current state first.
//!
//! Once streaming, one feeder thread may [`Session::submit`] while one
//! drainer thread calls [`Session::retrieve`]. The session lock only guards
//! bookkeeping; it is always released before a control request or a blocking
//! read, so a drainer waiting on the device never stalls the feeder. Two
//! concurrent submits or two concurrent retrieves are not supported, and a
//! retrieve blocked inside the driver cannot be cancelled.

use std::fmt;
use std::io;

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::buffers::{self, BufferPool, IoMode, Slot};
use crate::capability;
use crate::config::CaptureConfig;
use crate::negotiate;
use crate::queue::FrameQueue;
use crate::traits::{
    CaptureError, CaptureRequest, ControlDevice, FourCC, Result, SharedRegion, Window,
};

/// Lifecycle state of a [`Session`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No device bound.
    Closed,
    /// Device bound, not yet probed.
    Opened,
    /// Capabilities, window, encodings and I/O mode known.
    Probed,
    /// Encoding selected and buffers provisioned.
    Configured,
    /// Buffers cycling through the device.
    Streaming,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Closed => "closed",
            Self::Opened => "opened",
            Self::Probed => "probed",
            Self::Configured => "configured",
            Self::Streaming => "streaming",
        })
    }
}

/// A captured frame slot on loan to the consumer.
///
/// Hand it back with [`Session::submit`] so the slot can be reused. Tokens
/// are tied to one provisioning; after `cleanup` they are rejected.
#[derive(Debug, PartialEq, Eq)]
pub struct FrameBuffer {
    slot: u32,
    len: usize,
    sequence: u64,
    generation: u64,
}

impl FrameBuffer {
    /// Slot index.
    pub const fn slot(&self) -> u32 {
        self.slot
    }

    /// Slot length in bytes.
    pub const fn len(&self) -> usize {
        self.len
    }

    /// Whether the slot holds no bytes.
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Retrieval order within the session, starting at 0.
    pub const fn sequence(&self) -> u64 {
        self.sequence
    }
}

#[derive(Debug)]
struct Inner<R> {
    state: SessionState,
    window: Window,
    encoding: Option<FourCC>,
    palette: u16,
    supported: Vec<FourCC>,
    io_mode: IoMode,
    frame_count: usize,
    frame_len: usize,
    pool: BufferPool<R>,
    queue: FrameQueue,
    generation: u64,
    sequence: u64,
}

impl<R: SharedRegion> Inner<R> {
    fn new() -> Self {
        Self {
            state: SessionState::Closed,
            window: Window::default(),
            encoding: None,
            palette: 0,
            supported: Vec::new(),
            io_mode: IoMode::PrivateRead,
            frame_count: 0,
            frame_len: 0,
            pool: BufferPool::empty(),
            queue: FrameQueue::default(),
            generation: 0,
            sequence: 0,
        }
    }

    fn require(&self, operation: &'static str, expected: SessionState) -> Result<()> {
        if self.state == expected {
            Ok(())
        } else {
            Err(invalid_state(operation, self.state))
        }
    }
}

fn invalid_state(operation: &'static str, state: SessionState) -> CaptureError {
    CaptureError::Invalid {
        operation,
        reason: format!("session is {state}"),
    }
}

/// One capture device binding.
pub struct Session<D: ControlDevice> {
    config: CaptureConfig,
    device: Option<D>,
    inner: Mutex<Inner<D::Region>>,
}

impl<D: ControlDevice> fmt::Debug for Session<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("Session")
            .field("device", &self.config.device())
            .field("state", &inner.state)
            .field("window", &inner.window)
            .field("encoding", &inner.encoding)
            .field("io_mode", &inner.io_mode)
            .field("queued", &inner.queue.len())
            .finish_non_exhaustive()
    }
}

impl<D: ControlDevice> Session<D> {
    /// A closed session.
    #[must_use]
    pub fn new(config: CaptureConfig) -> Self {
        Self {
            config,
            device: None,
            inner: Mutex::new(Inner::new()),
        }
    }

    /// Bind an opened device handle. An already bound device is closed first.
    pub fn open(&mut self, device: D) -> Result<()> {
        if self.state() != SessionState::Closed {
            if let Err(err) = self.close() {
                warn!(error = %err, "closing previous device failed");
            }
        }
        self.device = Some(device);
        self.inner.get_mut().state = SessionState::Opened;
        info!(device = %self.config.device().display(), "opened camera device");
        Ok(())
    }

    /// Probe capability, window, encodings and I/O mode.
    ///
    /// Any failure releases the device and leaves the session closed.
    pub fn probe(&mut self) -> Result<()> {
        self.inner.get_mut().require("probe", SessionState::Opened)?;
        let result = self.run_probe();
        if result.is_err() {
            self.release_device();
        }
        result
    }

    fn run_probe(&mut self) -> Result<()> {
        let Self {
            config,
            device,
            inner,
        } = self;
        let device = device
            .as_ref()
            .ok_or_else(|| invalid_state("probe", SessionState::Closed))?;

        let caps = capability::probe_capability(device)?;
        let max = Window::with_size(caps.max_width, caps.max_height);
        let window = capability::negotiate_window(device, max)?;

        let initial = negotiate::current_encoding(device)?;
        let supported = negotiate::probe_supported_encodings(device)?;
        let restored = match initial {
            Some(fourcc) => Some(negotiate::set_encoding(device, Some(fourcc), &window)?),
            None => None,
        };

        let (io_mode, frame_count) = buffers::probe_io_mode(device, config.frame_count())?;

        let inner = inner.get_mut();
        inner.window = window;
        inner.encoding = initial;
        inner.palette = restored.map_or(0, |negotiated| negotiated.palette);
        inner.frame_len = restored.map_or(0, |negotiated| negotiated.frame_len);
        inner.supported = supported;
        inner.io_mode = io_mode;
        inner.frame_count = frame_count;
        inner.state = SessionState::Probed;
        info!(
            card = %caps.name,
            window = %window,
            encoding = ?initial,
            formats = inner.supported.len(),
            io_mode = %io_mode,
            frames = frame_count,
            "probed v4l1 device"
        );
        Ok(())
    }

    /// Select an encoding (`None` keeps the probed one) and provision buffers.
    ///
    /// On failure the session stays `Probed` with nothing provisioned.
    pub fn configure(&mut self, requested: Option<FourCC>) -> Result<()> {
        let Self { device, inner, .. } = self;
        let inner = inner.get_mut();
        inner.require("configure", SessionState::Probed)?;
        let device = device
            .as_ref()
            .ok_or_else(|| invalid_state("configure", SessionState::Closed))?;

        let negotiated = negotiate::set_encoding(device, requested.or(inner.encoding), &inner.window)?;
        inner.encoding = Some(negotiated.fourcc);
        inner.palette = negotiated.palette;
        inner.frame_len = negotiated.frame_len;

        let pool = match inner.io_mode {
            IoMode::SharedMemory => buffers::provision_shared(device, inner.frame_count)?,
            IoMode::PrivateRead => {
                buffers::provision_private(negotiated.frame_len, inner.frame_count)?
            }
        };
        inner.frame_count = pool.slots().len();
        inner.queue = FrameQueue::with_capacity(inner.frame_count);
        inner.pool = pool;
        inner.generation += 1;
        inner.sequence = 0;
        inner.state = SessionState::Configured;
        Ok(())
    }

    /// Submit every slot in index order and begin streaming.
    ///
    /// If a submission fails the queue is emptied and the session returns to
    /// `Configured`.
    pub fn start(&self) -> Result<()> {
        let (count, generation) = {
            let mut inner = self.inner.lock();
            inner.require("start", SessionState::Configured)?;
            inner.state = SessionState::Streaming;
            (inner.frame_count, inner.generation)
        };

        for slot in (0u32..).take(count) {
            if let Err(err) = self.enqueue(slot, generation) {
                let mut inner = self.inner.lock();
                inner.queue.clear();
                inner.state = SessionState::Configured;
                return Err(err);
            }
        }
        debug!(frames = count, "capture started");
        Ok(())
    }

    /// Stop streaming. Queued captures are abandoned without waiting.
    pub fn stop(&self) -> Result<()> {
        let mut inner = self.inner.lock();
        match inner.state {
            SessionState::Streaming => {
                inner.queue.clear();
                inner.state = SessionState::Configured;
                debug!("capture stopped");
                Ok(())
            }
            SessionState::Configured => Ok(()),
            state => Err(invalid_state("stop", state)),
        }
    }

    /// Release provisioned buffers. Must follow [`Session::stop`].
    pub fn cleanup(&mut self) -> Result<()> {
        let Self { device, inner, .. } = self;
        let inner = inner.get_mut();
        match inner.state {
            SessionState::Streaming => return Err(invalid_state("cleanup", inner.state)),
            SessionState::Configured => {}
            SessionState::Closed | SessionState::Opened | SessionState::Probed => return Ok(()),
        }

        inner.state = SessionState::Probed;
        inner.queue = FrameQueue::default();
        inner.generation += 1;
        match device {
            Some(device) => inner.pool.release(device),
            None => Ok(()),
        }
    }

    /// Stop, clean up and release the device. Closing a closed session is a
    /// no-op.
    pub fn close(&mut self) -> Result<()> {
        if self.state() == SessionState::Closed {
            return Ok(());
        }
        self.stop().ok();
        let result = self.cleanup();
        self.release_device();
        info!(device = %self.config.device().display(), "closed camera device");
        result
    }

    fn release_device(&mut self) {
        self.device = None;
        *self.inner.get_mut() = Inner::new();
    }

    /// Hand a retrieved buffer back to the device.
    pub fn submit(&self, buffer: FrameBuffer) -> Result<()> {
        self.enqueue(buffer.slot, buffer.generation)
    }

    fn enqueue(&self, slot: u32, generation: u64) -> Result<()> {
        let request = {
            let mut inner = self.inner.lock();
            inner.require("submit", SessionState::Streaming)?;
            if generation != inner.generation {
                return Err(CaptureError::Invalid {
                    operation: "submit",
                    reason: format!("slot {slot} belongs to a released buffer pool"),
                });
            }
            inner
                .queue
                .push(slot)
                .map_err(|err| CaptureError::Invalid {
                    operation: "submit",
                    reason: err.to_string(),
                })?;
            match inner.io_mode {
                IoMode::PrivateRead => return Ok(()),
                IoMode::SharedMemory => CaptureRequest {
                    slot,
                    width: inner.window.width,
                    height: inner.window.height,
                    palette: inner.palette,
                },
            }
        };

        self.device("submit")?
            .begin_capture(&request)
            .map_err(|err| CaptureError::system("initiating video capture (VIDIOCMCAPTURE)", err))
    }

    /// Take the oldest submitted buffer, waiting for its capture to finish.
    ///
    /// Fails with [`CaptureError::Busy`] instead of waiting when nothing is
    /// queued. If the wait or read fails the slot is still dequeued.
    pub fn retrieve(&self) -> Result<FrameBuffer> {
        let (buffer, io_mode, private) = {
            let mut inner = self.inner.lock();
            inner.require("retrieve", SessionState::Streaming)?;
            let slot = inner.queue.pop().ok_or(CaptureError::Busy)?;
            let len = inner.pool.slot(slot).map_or(0, |slot| slot.len);
            let buffer = FrameBuffer {
                slot,
                len,
                sequence: inner.sequence,
                generation: inner.generation,
            };
            inner.sequence += 1;
            let private = match inner.io_mode {
                IoMode::PrivateRead => inner.pool.take_private(slot),
                IoMode::SharedMemory => None,
            };
            (buffer, inner.io_mode, private)
        };

        let device = self.device("retrieve")?;
        match (io_mode, private) {
            (IoMode::SharedMemory, _) => device
                .sync_capture(buffer.slot)
                .map_err(|err| CaptureError::system("capturing video image (VIDIOCSYNC)", err))?,
            (IoMode::PrivateRead, Some(mut storage)) => {
                let read = device.read_frame(&mut storage);
                {
                    let mut inner = self.inner.lock();
                    if inner.generation == buffer.generation {
                        inner.pool.restore_private(buffer.slot, storage);
                    }
                }
                match read {
                    Ok(n) if n == buffer.len => {}
                    Ok(n) => {
                        return Err(CaptureError::system(
                            "reading video image",
                            io::Error::new(
                                io::ErrorKind::UnexpectedEof,
                                format!("short read: {n} of {} bytes", buffer.len),
                            ),
                        ))
                    }
                    Err(err) => return Err(CaptureError::system("reading video image", err)),
                }
            }
            (IoMode::PrivateRead, None) => {
                return Err(CaptureError::Invalid {
                    operation: "retrieve",
                    reason: format!("slot {} has no read buffer", buffer.slot),
                })
            }
        }
        Ok(buffer)
    }

    /// Run `f` over the bytes of a retrieved buffer.
    ///
    /// The session lock is held while `f` runs, so the mapping cannot be
    /// released underneath it.
    pub fn with_frame<F, T>(&self, buffer: &FrameBuffer, f: F) -> Result<T>
    where
        F: FnOnce(&[u8]) -> T,
    {
        let inner = self.inner.lock();
        if inner.generation != buffer.generation {
            return Err(CaptureError::Invalid {
                operation: "read frame",
                reason: format!("slot {} belongs to a released buffer pool", buffer.slot),
            });
        }
        let bytes = inner.pool.bytes(buffer.slot).ok_or_else(|| CaptureError::Invalid {
            operation: "read frame",
            reason: format!("slot {} is not provisioned", buffer.slot),
        })?;
        Ok(f(bytes))
    }

    fn device(&self, operation: &'static str) -> Result<&D> {
        self.device
            .as_ref()
            .ok_or_else(|| invalid_state(operation, SessionState::Closed))
    }

    /// Configuration the session was created with.
    pub const fn config(&self) -> &CaptureConfig {
        &self.config
    }

    /// Bound device, if any.
    pub const fn control_device(&self) -> Option<&D> {
        self.device.as_ref()
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SessionState {
        self.inner.lock().state
    }

    /// Negotiated capture window.
    pub fn window(&self) -> Window {
        self.inner.lock().window
    }

    /// Active encoding.
    pub fn encoding(&self) -> Option<FourCC> {
        self.inner.lock().encoding
    }

    /// Encodings that passed round-trip verification during probe.
    pub fn supported_encodings(&self) -> Vec<FourCC> {
        self.inner.lock().supported.clone()
    }

    /// Selected I/O strategy.
    pub fn io_mode(&self) -> IoMode {
        self.inner.lock().io_mode
    }

    /// Bytes in one frame for the active encoding and window.
    pub fn frame_len(&self) -> usize {
        self.inner.lock().frame_len
    }

    /// Number of frame slots.
    pub fn frame_count(&self) -> usize {
        self.inner.lock().frame_count
    }

    /// Provisioned slot layout.
    pub fn slots(&self) -> Vec<Slot> {
        self.inner.lock().pool.slots().to_vec()
    }

    /// Number of slots currently submitted to the device.
    pub fn queued(&self) -> usize {
        self.inner.lock().queue.len()
    }
}

impl<D: ControlDevice> Drop for Session<D> {
    fn drop(&mut self) {
        if let Err(err) = self.close() {
            warn!(error = %err, "closing session on drop failed");
        }
    }
}
