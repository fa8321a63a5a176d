//! Core traits and types for the V4L1 control-request protocol.

use std::fmt;
use std::io;
use std::str::FromStr;

use thiserror::Error;

/// Pixel encoding code (e.g., YUYV, GREY, BGR3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FourCC(pub [u8; 4]);

impl FourCC {
    /// Create a new `FourCC` from a 4-byte array.
    #[must_use]
    pub const fn new(code: &[u8; 4]) -> Self {
        Self(*code)
    }

    /// 8-bit greyscale.
    pub const GREY: Self = Self::new(b"GREY");
    /// BT848 8-bit color cube.
    pub const HI240: Self = Self::new(b"HI24");
    /// RGB 5:6:5 packed.
    pub const RGBP: Self = Self::new(b"RGBP");
    /// 24-bit BGR packed.
    pub const BGR3: Self = Self::new(b"BGR3");
    /// 32-bit BGR packed.
    pub const BGR4: Self = Self::new(b"BGR4");
    /// RGB 5:5:5 packed.
    pub const RGBO: Self = Self::new(b"RGBO");
    /// YUV 4:2:2 packed (YUY2 ordering).
    pub const YUY2: Self = Self::new(b"YUY2");
    /// YUYV pixel format (4:2:2 packed).
    pub const YUYV: Self = Self::new(b"YUYV");
    /// UYVY pixel format (4:2:2 packed).
    pub const UYVY: Self = Self::new(b"UYVY");
    /// YUV 4:1:1 packed.
    pub const Y41P: Self = Self::new(b"Y41P");
    /// YUV 4:2:2 planar.
    pub const YUV422P: Self = Self::new(b"422P");
    /// YUV 4:1:1 planar.
    pub const YUV411P: Self = Self::new(b"411P");
    /// YUV 4:2:0 planar.
    pub const YU12: Self = Self::new(b"YU12");
    /// YUV 4:1:0 planar.
    pub const YUV9: Self = Self::new(b"YUV9");

    /// Numeric code with the first character in the least significant byte.
    #[must_use]
    pub const fn as_u32(self) -> u32 {
        u32::from_le_bytes(self.0)
    }
}

impl fmt::Display for FourCC {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in self.0 {
            let ch = if byte.is_ascii_graphic() || byte == b' ' {
                char::from(byte)
            } else {
                '.'
            };
            write!(f, "{ch}")?;
        }
        write!(f, "({:08x})", self.as_u32())
    }
}

/// Error returned when a string is not a four-character code.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("expected exactly four ASCII characters, got {0:?}")]
pub struct ParseFourCCError(pub String);

impl FromStr for FourCC {
    type Err = ParseFourCCError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let bytes: [u8; 4] = s
            .as_bytes()
            .try_into()
            .map_err(|_| ParseFourCCError(s.to_owned()))?;
        if !s.is_ascii() {
            return Err(ParseFourCCError(s.to_owned()));
        }
        Ok(Self(bytes))
    }
}

impl From<v4l::FourCC> for FourCC {
    fn from(fourcc: v4l::FourCC) -> Self {
        Self(fourcc.repr)
    }
}

impl From<FourCC> for v4l::FourCC {
    fn from(fourcc: FourCC) -> Self {
        Self::new(&fourcc.0)
    }
}

/// Device capability report (`VIDIOCGCAP`).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Capability {
    /// Card/device name.
    pub name: String,
    /// Whether the device can capture to memory.
    pub can_capture: bool,
    /// Number of input channels.
    pub channels: i32,
    /// Number of audio devices.
    pub audios: i32,
    /// Largest supported capture width.
    pub max_width: u32,
    /// Largest supported capture height.
    pub max_height: u32,
    /// Smallest supported capture width.
    pub min_width: u32,
    /// Smallest supported capture height.
    pub min_height: u32,
}

/// Capture window geometry (`VIDIOCGWIN` / `VIDIOCSWIN`).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Window {
    /// Horizontal position.
    pub x: u32,
    /// Vertical position.
    pub y: u32,
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
    /// Overlay chroma key.
    pub chromakey: u32,
    /// Window flags.
    pub flags: u32,
}

impl Window {
    /// Interlaced capture flag.
    pub const INTERLACE: u32 = 1;

    /// Create a window of the given size at the origin.
    #[must_use]
    pub const fn with_size(width: u32, height: u32) -> Self {
        Self {
            x: 0,
            y: 0,
            width,
            height,
            chromakey: 0,
            flags: 0,
        }
    }

    /// Whether the window is captured interlaced.
    #[must_use]
    pub const fn interlaced(&self) -> bool {
        self.flags & Self::INTERLACE != 0
    }

    /// Whether both dimensions are at least those of `other`.
    #[must_use]
    pub const fn covers(&self, other: &Self) -> bool {
        self.width >= other.width && self.height >= other.height
    }
}

impl fmt::Display for Window {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} x {} @({}, {}){}",
            self.width,
            self.height,
            self.x,
            self.y,
            if self.interlaced() { " INTERLACE" } else { "" }
        )
    }
}

/// Picture properties (`VIDIOCGPICT` / `VIDIOCSPICT`).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Picture {
    /// Brightness.
    pub brightness: u16,
    /// Hue.
    pub hue: u16,
    /// Colour saturation.
    pub colour: u16,
    /// Contrast.
    pub contrast: u16,
    /// Whiteness (greyscale devices only).
    pub whiteness: u16,
    /// Capture bit depth.
    pub depth: u16,
    /// Active palette index.
    pub palette: u16,
}

/// Memory-mapped buffer layout (`VIDIOCGMBUF`).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BufferGeometry {
    /// Total bytes to map.
    pub size: usize,
    /// Number of frames the driver provides.
    pub frames: usize,
    /// Byte offset of each frame inside the mapping.
    pub offsets: Vec<usize>,
}

/// Per-slot capture request (`VIDIOCMCAPTURE`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureRequest {
    /// Slot index to capture into.
    pub slot: u32,
    /// Capture width.
    pub width: u32,
    /// Capture height.
    pub height: u32,
    /// Palette to capture with.
    pub palette: u16,
}

/// A contiguous region shared with the device.
pub trait SharedRegion: Send {
    /// Total mapped length in bytes.
    fn len(&self) -> usize;

    /// Whether the region is empty.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// View of the whole region.
    fn as_bytes(&self) -> &[u8];
}

/// Abstraction over the V4L1 control-request protocol.
///
/// Every method maps onto one driver request. Implementations take `&self`
/// so a feeder and a drainer may issue requests concurrently.
pub trait ControlDevice: Send + Sync {
    /// Region type returned by [`ControlDevice::map_region`].
    type Region: SharedRegion;

    /// Query capture capability.
    fn capability(&self) -> io::Result<Capability>;

    /// Query the current capture window.
    fn window(&self) -> io::Result<Window>;

    /// Request a capture window. The driver may clamp or ignore it.
    fn set_window(&self, window: &Window) -> io::Result<()>;

    /// Query picture properties.
    fn picture(&self) -> io::Result<Picture>;

    /// Request picture properties. The driver may clamp or ignore them.
    fn set_picture(&self, picture: &Picture) -> io::Result<()>;

    /// Query shared-memory buffer geometry.
    fn buffer_geometry(&self) -> io::Result<BufferGeometry>;

    /// Map `len` bytes of device memory.
    fn map_region(&self, len: usize) -> io::Result<Self::Region>;

    /// Unmap a region previously returned by [`ControlDevice::map_region`].
    fn unmap_region(&self, region: Self::Region) -> io::Result<()>;

    /// Begin capturing into a slot.
    fn begin_capture(&self, request: &CaptureRequest) -> io::Result<()>;

    /// Block until capture into `slot` completes.
    fn sync_capture(&self, slot: u32) -> io::Result<()>;

    /// Blocking read of one frame. Returns the number of bytes read.
    fn read_frame(&self, buf: &mut [u8]) -> io::Result<usize>;
}

/// Broad category of a capture failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Device or driver lacks a required capability.
    Unsupported,
    /// Requested or verified encoding mismatch.
    InvalidFormat,
    /// A control request or I/O primitive failed.
    System,
    /// No buffer available to retrieve.
    Busy,
    /// Allocation failure during provisioning.
    OutOfMemory,
    /// Operation not valid in the current state, or a stale buffer.
    Invalid,
}

/// How badly a failure degrades the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    /// Recoverable, informational.
    Warning,
    /// The operation failed.
    Error,
    /// The process cannot reasonably continue.
    Fatal,
}

/// Error type for capture operations.
#[derive(Debug, Error)]
pub enum CaptureError {
    /// Device or driver lacks a required capability.
    #[error("unsupported: {0}")]
    Unsupported(String),

    /// Requested encoding is unknown or the driver did not accept it.
    #[error("invalid format {fourcc:?}: {reason}")]
    InvalidFormat {
        /// Encoding that was requested, if any.
        fourcc: Option<FourCC>,
        /// What went wrong.
        reason: &'static str,
    },

    /// Control request or I/O failure.
    #[error("{context}: {source}")]
    System {
        /// Request that failed.
        context: &'static str,
        /// Underlying OS error.
        #[source]
        source: io::Error,
    },

    /// No buffer is queued for retrieval.
    #[error("all allocated video buffers busy")]
    Busy,

    /// Allocation failure.
    #[error("out of memory: {0}")]
    OutOfMemory(&'static str),

    /// Operation rejected by the session state machine.
    #[error("cannot {operation}: {reason}")]
    Invalid {
        /// Operation that was attempted.
        operation: &'static str,
        /// Why it was rejected.
        reason: String,
    },
}

impl CaptureError {
    /// Wrap an I/O error with the request that produced it.
    pub const fn system(context: &'static str, source: io::Error) -> Self {
        Self::System { context, source }
    }

    /// Failure category.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::Unsupported(_) => ErrorKind::Unsupported,
            Self::InvalidFormat { .. } => ErrorKind::InvalidFormat,
            Self::System { .. } => ErrorKind::System,
            Self::Busy => ErrorKind::Busy,
            Self::OutOfMemory(_) => ErrorKind::OutOfMemory,
            Self::Invalid { .. } => ErrorKind::Invalid,
        }
    }

    /// Failure severity.
    #[must_use]
    pub const fn severity(&self) -> Severity {
        match self {
            Self::OutOfMemory(_) => Severity::Fatal,
            _ => Severity::Error,
        }
    }
}

/// Result type for capture operations.
pub type Result<T> = std::result::Result<T, CaptureError>;
