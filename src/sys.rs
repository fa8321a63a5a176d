//! Video4Linux v1 driver ABI.
//!
//! Request layouts mirror `linux/videodev.h` and must stay bit-exact. Request
//! numbers use the generic Linux `_IOC` encoding.

#![allow(unsafe_code)]

use std::fs::{File, OpenOptions};
use std::io::{self, Read};
use std::mem::{self, ManuallyDrop};
use std::os::fd::AsRawFd;
use std::path::Path;
use std::ptr::{self, NonNull};
use std::slice;

use libc::{c_char, c_int, c_uint, c_ulong, c_void};

use crate::session::Session;
use crate::traits::{
    BufferGeometry, Capability, CaptureError, CaptureRequest, ControlDevice, Picture, Result,
    SharedRegion, Window,
};

const VIDEO_MAX_FRAME: usize = 32;
const VID_TYPE_CAPTURE: c_int = 1;

#[repr(C)]
#[derive(Debug, Default)]
struct VideoCapability {
    name: [c_char; 32],
    kind: c_int,
    channels: c_int,
    audios: c_int,
    maxwidth: c_int,
    maxheight: c_int,
    minwidth: c_int,
    minheight: c_int,
}

#[repr(C)]
#[derive(Debug)]
struct VideoWindow {
    x: u32,
    y: u32,
    width: u32,
    height: u32,
    chromakey: u32,
    flags: u32,
    clips: *mut c_void,
    clipcount: c_int,
}

impl Default for VideoWindow {
    fn default() -> Self {
        Self::from(&Window::default())
    }
}

impl From<&Window> for VideoWindow {
    fn from(window: &Window) -> Self {
        Self {
            x: window.x,
            y: window.y,
            width: window.width,
            height: window.height,
            chromakey: window.chromakey,
            flags: window.flags,
            clips: ptr::null_mut(),
            clipcount: 0,
        }
    }
}

#[repr(C)]
#[derive(Debug, Default, Clone, Copy)]
struct VideoPicture {
    brightness: u16,
    hue: u16,
    colour: u16,
    contrast: u16,
    whiteness: u16,
    depth: u16,
    palette: u16,
}

#[repr(C)]
#[derive(Debug, Default)]
struct VideoMbuf {
    size: c_int,
    frames: c_int,
    offsets: [c_int; VIDEO_MAX_FRAME],
}

#[repr(C)]
#[derive(Debug, Default)]
struct VideoMmap {
    frame: c_uint,
    height: c_int,
    width: c_int,
    format: c_uint,
}

const IOC_WRITE: c_ulong = 1;
const IOC_READ: c_ulong = 2;

#[allow(clippy::cast_possible_truncation)]
const fn ioc(dir: c_ulong, nr: c_ulong, size: usize) -> c_ulong {
    (dir << 30) | ((size as c_ulong) << 16) | ((b'v' as c_ulong) << 8) | nr
}

const VIDIOCGCAP: c_ulong = ioc(IOC_READ, 1, mem::size_of::<VideoCapability>());
const VIDIOCGPICT: c_ulong = ioc(IOC_READ, 6, mem::size_of::<VideoPicture>());
const VIDIOCSPICT: c_ulong = ioc(IOC_WRITE, 7, mem::size_of::<VideoPicture>());
const VIDIOCGWIN: c_ulong = ioc(IOC_READ, 9, mem::size_of::<VideoWindow>());
const VIDIOCSWIN: c_ulong = ioc(IOC_WRITE, 10, mem::size_of::<VideoWindow>());
const VIDIOCSYNC: c_ulong = ioc(IOC_WRITE, 18, mem::size_of::<c_int>());
const VIDIOCMCAPTURE: c_ulong = ioc(IOC_WRITE, 19, mem::size_of::<VideoMmap>());
const VIDIOCGMBUF: c_ulong = ioc(IOC_READ, 20, mem::size_of::<VideoMbuf>());

fn ioctl<T>(fd: c_int, request: c_ulong, arg: &mut T) -> io::Result<()> {
    // SAFETY: `arg` is an exclusively borrowed #[repr(C)] value whose layout
    // is the one encoded in `request`.
    #[allow(clippy::cast_possible_truncation, clippy::useless_conversion)]
    let rc = unsafe { libc::ioctl(fd, request as _, ptr::from_mut(arg).cast::<c_void>()) };
    if rc < 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(())
    }
}

fn to_u32(value: c_int) -> u32 {
    u32::try_from(value).unwrap_or(0)
}

fn to_c_int(value: u32) -> io::Result<c_int> {
    c_int::try_from(value).map_err(|_| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("{value} does not fit the request"),
        )
    })
}

/// Character device speaking V4L1.
#[derive(Debug)]
pub struct V4l1Device {
    file: File,
}

impl V4l1Device {
    /// Open a device node read/write.
    pub fn open(path: &Path) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .map_err(|err| CaptureError::system("opening video device", err))?;
        Ok(Self { file })
    }

    /// Wrap an already opened device node.
    #[must_use]
    pub const fn from_file(file: File) -> Self {
        Self { file }
    }

    fn fd(&self) -> c_int {
        self.file.as_raw_fd()
    }
}

impl ControlDevice for V4l1Device {
    type Region = MappedRegion;

    fn capability(&self) -> io::Result<Capability> {
        let mut raw = VideoCapability::default();
        ioctl(self.fd(), VIDIOCGCAP, &mut raw)?;

        #[allow(clippy::cast_sign_loss)]
        let name: Vec<u8> = raw
            .name
            .iter()
            .map(|&ch| ch as u8)
            .take_while(|&byte| byte != 0)
            .collect();

        Ok(Capability {
            name: String::from_utf8_lossy(&name).into_owned(),
            can_capture: raw.kind & VID_TYPE_CAPTURE != 0,
            channels: raw.channels,
            audios: raw.audios,
            max_width: to_u32(raw.maxwidth),
            max_height: to_u32(raw.maxheight),
            min_width: to_u32(raw.minwidth),
            min_height: to_u32(raw.minheight),
        })
    }

    fn window(&self) -> io::Result<Window> {
        let mut raw = VideoWindow::default();
        ioctl(self.fd(), VIDIOCGWIN, &mut raw)?;
        Ok(Window {
            x: raw.x,
            y: raw.y,
            width: raw.width,
            height: raw.height,
            chromakey: raw.chromakey,
            flags: raw.flags,
        })
    }

    fn set_window(&self, window: &Window) -> io::Result<()> {
        let mut raw = VideoWindow::from(window);
        ioctl(self.fd(), VIDIOCSWIN, &mut raw)
    }

    fn picture(&self) -> io::Result<Picture> {
        let mut raw = VideoPicture::default();
        ioctl(self.fd(), VIDIOCGPICT, &mut raw)?;
        Ok(Picture {
            brightness: raw.brightness,
            hue: raw.hue,
            colour: raw.colour,
            contrast: raw.contrast,
            whiteness: raw.whiteness,
            depth: raw.depth,
            palette: raw.palette,
        })
    }

    fn set_picture(&self, picture: &Picture) -> io::Result<()> {
        let mut raw = VideoPicture {
            brightness: picture.brightness,
            hue: picture.hue,
            colour: picture.colour,
            contrast: picture.contrast,
            whiteness: picture.whiteness,
            depth: picture.depth,
            palette: picture.palette,
        };
        ioctl(self.fd(), VIDIOCSPICT, &mut raw)
    }

    fn buffer_geometry(&self) -> io::Result<BufferGeometry> {
        let mut raw = VideoMbuf::default();
        ioctl(self.fd(), VIDIOCGMBUF, &mut raw)?;
        let frames = usize::try_from(raw.frames)
            .unwrap_or(0)
            .min(VIDEO_MAX_FRAME);
        Ok(BufferGeometry {
            size: usize::try_from(raw.size).unwrap_or(0),
            frames,
            offsets: raw
                .offsets
                .iter()
                .take(frames)
                .map(|&offset| usize::try_from(offset).unwrap_or(0))
                .collect(),
        })
    }

    fn map_region(&self, len: usize) -> io::Result<MappedRegion> {
        MappedRegion::map(self.fd(), len)
    }

    fn unmap_region(&self, region: MappedRegion) -> io::Result<()> {
        region.unmap()
    }

    fn begin_capture(&self, request: &CaptureRequest) -> io::Result<()> {
        let mut raw = VideoMmap {
            frame: request.slot,
            height: to_c_int(request.height)?,
            width: to_c_int(request.width)?,
            format: c_uint::from(request.palette),
        };
        ioctl(self.fd(), VIDIOCMCAPTURE, &mut raw)
    }

    fn sync_capture(&self, slot: u32) -> io::Result<()> {
        let mut frame = to_c_int(slot)?;
        ioctl(self.fd(), VIDIOCSYNC, &mut frame)
    }

    fn read_frame(&self, buf: &mut [u8]) -> io::Result<usize> {
        (&self.file).read(buf)
    }
}

/// Device memory mapped shared into this process.
#[derive(Debug)]
pub struct MappedRegion {
    ptr: NonNull<u8>,
    len: usize,
}

// SAFETY: the mapping is plain memory exclusively owned by this value; the
// device writing into it concurrently is the documented capture contract.
unsafe impl Send for MappedRegion {}
// SAFETY: only shared reads are handed out.
unsafe impl Sync for MappedRegion {}

impl MappedRegion {
    fn map(fd: c_int, len: usize) -> io::Result<Self> {
        if len == 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "cannot map an empty region",
            ));
        }
        // SAFETY: a fresh shared mapping; no existing memory is aliased.
        let addr = unsafe {
            libc::mmap(
                ptr::null_mut(),
                len,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED,
                fd,
                0,
            )
        };
        if addr == libc::MAP_FAILED {
            return Err(io::Error::last_os_error());
        }
        let ptr = NonNull::new(addr.cast::<u8>())
            .ok_or_else(|| io::Error::other("mmap returned a null mapping"))?;
        Ok(Self { ptr, len })
    }

    fn unmap(self) -> io::Result<()> {
        let region = ManuallyDrop::new(self);
        // SAFETY: `region` owns this mapping and is never used again.
        let rc = unsafe { libc::munmap(region.ptr.as_ptr().cast::<c_void>(), region.len) };
        if rc < 0 {
            Err(io::Error::last_os_error())
        } else {
            Ok(())
        }
    }
}

impl SharedRegion for MappedRegion {
    fn len(&self) -> usize {
        self.len
    }

    fn as_bytes(&self) -> &[u8] {
        // SAFETY: the mapping stays valid for `len` bytes until unmapped,
        // which consumes `self`.
        unsafe { slice::from_raw_parts(self.ptr.as_ptr(), self.len) }
    }
}

impl Drop for MappedRegion {
    fn drop(&mut self) {
        // SAFETY: reached only when the region was never explicitly unmapped.
        unsafe {
            libc::munmap(self.ptr.as_ptr().cast::<c_void>(), self.len);
        }
    }
}

impl Session<V4l1Device> {
    /// Open the configured device node and bind it.
    ///
    /// On failure the session is left closed.
    pub fn open_path(&mut self) -> Result<()> {
        let device = V4l1Device::open(self.config().device())?;
        self.open(device)
    }
}
