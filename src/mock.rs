//! Mock device implementation for testing without hardware.

use std::io;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::traits::{
    BufferGeometry, Capability, CaptureRequest, ControlDevice, Picture, SharedRegion, Window,
};

/// A control request observed by the mock, in issue order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    /// `VIDIOCSWIN`.
    SetWindow(Window),
    /// `VIDIOCSPICT`.
    SetPicture(Picture),
    /// `VIDIOCGMBUF`.
    BufferGeometry,
    /// `mmap` of the given length.
    Map(usize),
    /// `munmap` of the given length.
    Unmap(usize),
    /// `VIDIOCMCAPTURE`.
    BeginCapture(CaptureRequest),
    /// `VIDIOCSYNC` for a slot.
    Sync(u32),
    /// `read` into a buffer of the given length.
    Read(usize),
}

/// Byte patterns written by mock reads.
#[derive(Debug, Clone, Copy)]
pub enum TestPattern {
    /// Every byte has the same value.
    Solid(u8),
    /// Every byte holds the 1-based read count, so frames are distinguishable.
    Counter,
}

#[derive(Debug)]
struct MockState {
    capability: Option<Capability>,
    window: Window,
    window_limit: Option<(u32, u32)>,
    reject_set_window: bool,
    lose_window_on_reject: bool,
    fail_window_query: bool,
    picture: Picture,
    palettes: Vec<(u16, u16)>,
    reject_unknown_palette: bool,
    geometry: Option<BufferGeometry>,
    geometry_errno: i32,
    fail_map: bool,
    fail_unmap: bool,
    fail_begin: bool,
    fail_sync: bool,
    short_read: bool,
    pattern: TestPattern,
    reads: u8,
    calls: Vec<Call>,
}

/// Mock V4L1 device.
///
/// Clones share state, so a test can keep a handle for inspection after
/// handing the device to a session.
#[derive(Debug, Clone)]
pub struct MockDevice {
    state: Arc<Mutex<MockState>>,
}

impl Default for MockDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl MockDevice {
    /// Create a capture-capable device with a 640x480 maximum window, a
    /// 320x240 current window, YUYV selected, and four mappable frames.
    #[must_use]
    pub fn new() -> Self {
        let state = MockState {
            capability: Some(Capability {
                name: "Mock Camera".to_owned(),
                can_capture: true,
                channels: 1,
                audios: 0,
                max_width: 640,
                max_height: 480,
                min_width: 32,
                min_height: 32,
            }),
            window: Window::with_size(320, 240),
            window_limit: None,
            reject_set_window: false,
            lose_window_on_reject: false,
            fail_window_query: false,
            picture: Picture {
                brightness: 0x8000,
                contrast: 0x8000,
                depth: 16,
                palette: 8,
                ..Picture::default()
            },
            palettes: vec![(1, 8), (8, 16), (9, 16), (15, 12)],
            reject_unknown_palette: true,
            geometry: Some(BufferGeometry {
                size: 0x10_0000,
                frames: 4,
                offsets: vec![0, 0x4_0000, 0x8_0000, 0xC_0000],
            }),
            geometry_errno: libc::EINVAL,
            fail_map: false,
            fail_unmap: false,
            fail_begin: false,
            fail_sync: false,
            short_read: false,
            pattern: TestPattern::Counter,
            reads: 0,
            calls: Vec::new(),
        };
        Self {
            state: Arc::new(Mutex::new(state)),
        }
    }

    /// Replace the capability report; `None` makes the query fail.
    #[must_use]
    pub fn with_capability(self, capability: Option<Capability>) -> Self {
        self.state.lock().capability = capability;
        self
    }

    /// Set the current window.
    #[must_use]
    pub fn with_window(self, window: Window) -> Self {
        self.state.lock().window = window;
        self
    }

    /// Clamp window requests to at most `width` x `height`.
    #[must_use]
    pub fn with_window_limit(self, width: u32, height: u32) -> Self {
        self.state.lock().window_limit = Some((width, height));
        self
    }

    /// Fail every window set request.
    #[must_use]
    pub fn rejecting_window_set(self) -> Self {
        self.state.lock().reject_set_window = true;
        self
    }

    /// After a rejected window set, fail every later window query.
    #[must_use]
    pub fn losing_window_on_rejected_set(self) -> Self {
        let mut state = self.state.lock();
        state.reject_set_window = true;
        state.lose_window_on_reject = true;
        drop(state);
        self
    }

    /// Set the current picture properties.
    #[must_use]
    pub fn with_picture(self, picture: Picture) -> Self {
        self.state.lock().picture = picture;
        self
    }

    /// Palettes the driver honours, each with the depth it reports back.
    #[must_use]
    pub fn with_palettes(self, palettes: &[(u16, u16)]) -> Self {
        self.state.lock().palettes = palettes.to_vec();
        self
    }

    /// Silently keep the old palette instead of failing on unknown ones.
    #[must_use]
    pub fn ignoring_unknown_palettes(self) -> Self {
        self.state.lock().reject_unknown_palette = false;
        self
    }

    /// Set the mappable buffer layout.
    #[must_use]
    pub fn with_geometry(self, geometry: BufferGeometry) -> Self {
        self.state.lock().geometry = Some(geometry);
        self
    }

    /// Fail the buffer geometry query with `EINVAL`.
    #[must_use]
    pub fn without_geometry(self) -> Self {
        self.state.lock().geometry = None;
        self
    }

    /// Fail the buffer geometry query with `errno`.
    #[must_use]
    pub fn with_geometry_error(self, errno: i32) -> Self {
        let mut state = self.state.lock();
        state.geometry = None;
        state.geometry_errno = errno;
        drop(state);
        self
    }

    /// Fail every mapping request.
    #[must_use]
    pub fn failing_map(self) -> Self {
        self.state.lock().fail_map = true;
        self
    }

    /// Fail every unmapping request.
    #[must_use]
    pub fn failing_unmap(self) -> Self {
        self.state.lock().fail_unmap = true;
        self
    }

    /// Fail capture begin requests.
    #[must_use]
    pub fn failing_begin(self) -> Self {
        self.set_failing_begin(true);
        self
    }

    /// Return half a frame from every read.
    #[must_use]
    pub fn short_reads(self) -> Self {
        self.state.lock().short_read = true;
        self
    }

    /// Set the pattern written by reads.
    #[must_use]
    pub fn with_pattern(self, pattern: TestPattern) -> Self {
        self.state.lock().pattern = pattern;
        self
    }

    /// Toggle capture begin failures on a live device.
    pub fn set_failing_begin(&self, fail: bool) {
        self.state.lock().fail_begin = fail;
    }

    /// Toggle capture sync failures on a live device.
    pub fn set_failing_sync(&self, fail: bool) {
        self.state.lock().fail_sync = fail;
    }

    /// Current device-side window.
    pub fn current_window(&self) -> Window {
        self.state.lock().window
    }

    /// Current device-side picture.
    pub fn current_picture(&self) -> Picture {
        self.state.lock().picture
    }

    /// All requests issued so far.
    pub fn calls(&self) -> Vec<Call> {
        self.state.lock().calls.clone()
    }

    /// Number of issued requests matching `pred`.
    pub fn count<F: Fn(&Call) -> bool>(&self, pred: F) -> usize {
        self.state.lock().calls.iter().filter(|call| pred(call)).count()
    }

    /// Forget recorded requests.
    pub fn clear_calls(&self) {
        self.state.lock().calls.clear();
    }
}

fn einval() -> io::Error {
    io::Error::from_raw_os_error(libc::EINVAL)
}

fn eio() -> io::Error {
    io::Error::from_raw_os_error(libc::EIO)
}

/// Region handed out by [`MockDevice::map_region`].
#[derive(Debug)]
pub struct MockRegion {
    bytes: Vec<u8>,
}

impl SharedRegion for MockRegion {
    fn len(&self) -> usize {
        self.bytes.len()
    }

    fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }
}

impl ControlDevice for MockDevice {
    type Region = MockRegion;

    fn capability(&self) -> io::Result<Capability> {
        self.state.lock().capability.clone().ok_or_else(einval)
    }

    fn window(&self) -> io::Result<Window> {
        let state = self.state.lock();
        if state.fail_window_query {
            return Err(eio());
        }
        Ok(state.window)
    }

    fn set_window(&self, window: &Window) -> io::Result<()> {
        let mut state = self.state.lock();
        state.calls.push(Call::SetWindow(*window));
        if state.reject_set_window {
            state.fail_window_query = state.lose_window_on_reject;
            return Err(einval());
        }
        let mut applied = *window;
        if let Some((width, height)) = state.window_limit {
            applied.width = applied.width.min(width);
            applied.height = applied.height.min(height);
        }
        state.window = applied;
        Ok(())
    }

    fn picture(&self) -> io::Result<Picture> {
        Ok(self.state.lock().picture)
    }

    fn set_picture(&self, picture: &Picture) -> io::Result<()> {
        let mut state = self.state.lock();
        state.calls.push(Call::SetPicture(*picture));
        let accepted = state
            .palettes
            .iter()
            .find(|(palette, _)| *palette == picture.palette)
            .copied();
        match accepted {
            Some((palette, depth)) => {
                state.picture = Picture {
                    depth,
                    palette,
                    ..*picture
                };
                Ok(())
            }
            None if state.reject_unknown_palette => Err(einval()),
            None => Ok(()),
        }
    }

    fn buffer_geometry(&self) -> io::Result<BufferGeometry> {
        let mut state = self.state.lock();
        state.calls.push(Call::BufferGeometry);
        let errno = state.geometry_errno;
        state
            .geometry
            .clone()
            .ok_or_else(|| io::Error::from_raw_os_error(errno))
    }

    fn map_region(&self, len: usize) -> io::Result<MockRegion> {
        let mut state = self.state.lock();
        state.calls.push(Call::Map(len));
        if state.fail_map {
            return Err(io::Error::from_raw_os_error(libc::ENOMEM));
        }
        Ok(MockRegion {
            bytes: vec![0; len],
        })
    }

    fn unmap_region(&self, region: MockRegion) -> io::Result<()> {
        let mut state = self.state.lock();
        state.calls.push(Call::Unmap(region.len()));
        if state.fail_unmap {
            return Err(einval());
        }
        Ok(())
    }

    fn begin_capture(&self, request: &CaptureRequest) -> io::Result<()> {
        let mut state = self.state.lock();
        state.calls.push(Call::BeginCapture(*request));
        if state.fail_begin {
            return Err(eio());
        }
        Ok(())
    }

    fn sync_capture(&self, slot: u32) -> io::Result<()> {
        let mut state = self.state.lock();
        state.calls.push(Call::Sync(slot));
        if state.fail_sync {
            return Err(eio());
        }
        Ok(())
    }

    fn read_frame(&self, buf: &mut [u8]) -> io::Result<usize> {
        let mut state = self.state.lock();
        state.calls.push(Call::Read(buf.len()));
        state.reads = state.reads.wrapping_add(1);
        let fill = match state.pattern {
            TestPattern::Solid(value) => value,
            TestPattern::Counter => state.reads,
        };
        let len = if state.short_read {
            buf.len() / 2
        } else {
            buf.len()
        };
        if let Some(dst) = buf.get_mut(..len) {
            dst.fill(fill);
        }
        Ok(len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mock_device_creation() {
        let device = MockDevice::new();
        let caps = device.capability().expect("capability should succeed");
        assert_eq!(caps.name, "Mock Camera");
        assert!(caps.can_capture);
        assert_eq!((caps.max_width, caps.max_height), (640, 480));
    }

    #[test]
    fn test_mock_window_limit() {
        let device = MockDevice::new().with_window_limit(352, 288);
        device
            .set_window(&Window::with_size(640, 480))
            .expect("set_window should succeed");
        let window = device.window().expect("window should succeed");
        assert_eq!((window.width, window.height), (352, 288));
    }

    #[test]
    fn test_mock_palette_clamp() {
        let device = MockDevice::new().with_palettes(&[(4, 32)]);
        let request = Picture {
            palette: 4,
            depth: 24,
            ..Picture::default()
        };
        device.set_picture(&request).expect("set_picture should succeed");
        let picture = device.picture().expect("picture should succeed");
        assert_eq!(picture.palette, 4);
        assert_eq!(picture.depth, 32);
    }

    #[test]
    fn test_mock_read_counter() {
        let device = MockDevice::new();
        let mut buf = [0u8; 8];
        assert_eq!(device.read_frame(&mut buf).expect("read"), 8);
        assert_eq!(buf, [1; 8]);
        assert_eq!(device.read_frame(&mut buf).expect("read"), 8);
        assert_eq!(buf, [2; 8]);
    }

    #[test]
    fn test_mock_read_solid_pattern() {
        let device = MockDevice::new().with_pattern(TestPattern::Solid(0x80));
        let mut buf = [0u8; 4];
        device.read_frame(&mut buf).expect("read");
        device.read_frame(&mut buf).expect("read");
        assert_eq!(buf, [0x80; 4]);
    }

    #[test]
    fn test_mock_window_lost_after_rejected_set() {
        let device = MockDevice::new().losing_window_on_rejected_set();
        device.window().expect("window readable before any set");
        device
            .set_window(&Window::with_size(640, 480))
            .expect_err("set is rejected");
        assert!(device.window().is_err());
    }

    #[test]
    fn test_mock_shared_state() {
        let device = MockDevice::new();
        let observer = device.clone();
        device.sync_capture(3).expect("sync should succeed");
        assert_eq!(observer.calls(), vec![Call::Sync(3)]);
    }
}
