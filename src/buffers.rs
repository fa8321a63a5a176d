//! Frame buffer provisioning.
//!
//! Drivers either expose one mappable region that is carved into per-frame
//! slots, or nothing at all, in which case every frame is pulled with a
//! blocking read into a privately owned buffer.

use std::io;

use tracing::{debug, trace};

use crate::traits::{BufferGeometry, CaptureError, ControlDevice, Result, SharedRegion};

/// Upper bound on frame slots (`VIDEO_MAX_FRAME`).
pub const MAX_FRAMES: usize = 32;

/// How frames move from the device to the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoMode {
    /// Device writes into a region mapped into this process.
    SharedMemory,
    /// Each frame is read into caller-owned memory.
    PrivateRead,
}

impl std::fmt::Display for IoMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::SharedMemory => "MMAP",
            Self::PrivateRead => "READ",
        })
    }
}

/// One frame slot: a byte range of the shared region, or a private buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Slot {
    /// Stable slot index, also the driver frame number.
    pub index: u32,
    /// Offset into the shared region (0 for private buffers).
    pub offset: usize,
    /// Length in bytes.
    pub len: usize,
}

fn geometry_error(err: io::Error) -> CaptureError {
    CaptureError::system("querying video frame buffers (VIDIOCGMBUF)", err)
}

/// Pick the I/O strategy and clamp the requested frame count to what the
/// device offers.
pub fn probe_io_mode<D: ControlDevice>(device: &D, requested: usize) -> Result<(IoMode, usize)> {
    let (mode, count) = match device.buffer_geometry() {
        Err(err) if err.raw_os_error() == Some(libc::EINVAL) => (IoMode::PrivateRead, requested),
        Err(err) => return Err(geometry_error(err)),
        Ok(geometry) if geometry.frames == 0 || geometry.size == 0 => {
            (IoMode::PrivateRead, requested)
        }
        Ok(geometry) => (IoMode::SharedMemory, requested.min(geometry.frames)),
    };
    debug!("using {count} images in {mode} mode");
    Ok((mode, count))
}

/// Carve the first `count` frames of `geometry` into slots.
///
/// Each slot runs up to the next slot's offset; the last one runs to the end
/// of the region, so the lengths always sum to `geometry.size`.
pub fn partition(geometry: &BufferGeometry, count: usize) -> Result<Vec<Slot>> {
    let invalid = |msg: String| {
        CaptureError::system(
            "partitioning video frame buffers",
            io::Error::new(io::ErrorKind::InvalidData, msg),
        )
    };

    let offsets = geometry
        .offsets
        .get(..count)
        .filter(|offsets| !offsets.is_empty())
        .ok_or_else(|| {
            invalid(format!(
                "{count} frames requested, driver reports {}",
                geometry.offsets.len()
            ))
        })?;

    let ends = offsets
        .iter()
        .skip(1)
        .copied()
        .chain(std::iter::once(geometry.size));

    (0u32..)
        .zip(offsets.iter().copied().zip(ends))
        .map(|(index, (offset, end))| {
            if end <= offset {
                return Err(invalid(format!(
                    "frame {index} at {offset:#x} does not precede {end:#x}"
                )));
            }
            Ok(Slot {
                index,
                offset,
                len: end - offset,
            })
        })
        .collect()
}

#[derive(Debug)]
enum Storage<R> {
    Empty,
    Shared(R),
    Private(Vec<Vec<u8>>),
}

/// Provisioned frame storage plus its slot layout.
#[derive(Debug)]
pub struct BufferPool<R> {
    slots: Vec<Slot>,
    storage: Storage<R>,
}

impl<R: SharedRegion> Default for BufferPool<R> {
    fn default() -> Self {
        Self::empty()
    }
}

impl<R: SharedRegion> BufferPool<R> {
    /// A pool with no storage.
    #[must_use]
    pub const fn empty() -> Self {
        Self {
            slots: Vec::new(),
            storage: Storage::Empty,
        }
    }

    /// Slot layout, in index order.
    pub fn slots(&self) -> &[Slot] {
        &self.slots
    }

    /// Look up one slot.
    pub fn slot(&self, index: u32) -> Option<&Slot> {
        self.slots.get(usize::try_from(index).ok()?)
    }

    /// Whether storage is held.
    pub const fn is_provisioned(&self) -> bool {
        !matches!(self.storage, Storage::Empty)
    }

    /// Length of the shared region, if one is mapped.
    pub fn mapped_len(&self) -> Option<usize> {
        match &self.storage {
            Storage::Shared(region) => Some(region.len()),
            _ => None,
        }
    }

    /// Bytes of one slot.
    pub fn bytes(&self, index: u32) -> Option<&[u8]> {
        let slot = self.slot(index)?;
        match &self.storage {
            Storage::Empty => None,
            Storage::Shared(region) => region.as_bytes().get(slot.offset..slot.offset + slot.len),
            Storage::Private(buffers) => buffers.get(usize::try_from(index).ok()?).map(Vec::as_slice),
        }
    }

    /// Move a private buffer out so it can be filled without holding the
    /// session lock.
    pub(crate) fn take_private(&mut self, index: u32) -> Option<Vec<u8>> {
        match &mut self.storage {
            Storage::Private(buffers) => buffers
                .get_mut(usize::try_from(index).ok()?)
                .map(std::mem::take),
            _ => None,
        }
    }

    /// Put back a buffer obtained from [`BufferPool::take_private`].
    pub(crate) fn restore_private(&mut self, index: u32, buffer: Vec<u8>) {
        if let Storage::Private(buffers) = &mut self.storage {
            if let Some(slot) = usize::try_from(index)
                .ok()
                .and_then(|index| buffers.get_mut(index))
            {
                *slot = buffer;
            }
        }
    }

    /// Drop all storage, unmapping the shared region if there is one.
    ///
    /// The pool is empty afterwards even when unmapping fails, so a second
    /// call is always a no-op.
    pub fn release<D>(&mut self, device: &D) -> Result<()>
    where
        D: ControlDevice<Region = R>,
    {
        self.slots.clear();
        match std::mem::replace(&mut self.storage, Storage::Empty) {
            Storage::Shared(region) => device
                .unmap_region(region)
                .map_err(|err| CaptureError::system("unmapping video frame buffers", err)),
            Storage::Private(_) | Storage::Empty => Ok(()),
        }
    }
}

/// Map the device region and split it into `count` slots.
///
/// The layout is validated before mapping, so a failure never leaves a
/// mapping behind.
pub fn provision_shared<D: ControlDevice>(
    device: &D,
    count: usize,
) -> Result<BufferPool<D::Region>> {
    let geometry = device.buffer_geometry().map_err(geometry_error)?;
    let count = count.min(geometry.frames).min(MAX_FRAMES);
    let slots = partition(&geometry, count)?;

    debug!("mapping {} buffers size={:#x}", slots.len(), geometry.size);
    let region = device
        .map_region(geometry.size)
        .map_err(|err| CaptureError::system("mapping video frame buffers", err))?;
    for slot in &slots {
        trace!("    [{:02}] @{:08x} len={:#x}", slot.index, slot.offset, slot.len);
    }

    Ok(BufferPool {
        slots,
        storage: Storage::Shared(region),
    })
}

/// Allocate `count` independent buffers of `frame_len` bytes.
pub fn provision_private<R: SharedRegion>(frame_len: usize, count: usize) -> Result<BufferPool<R>> {
    let mut buffers = Vec::new();
    buffers
        .try_reserve_exact(count)
        .map_err(|_| CaptureError::OutOfMemory("allocating video frame buffer list"))?;
    for _ in 0..count {
        let mut buffer = Vec::new();
        buffer
            .try_reserve_exact(frame_len)
            .map_err(|_| CaptureError::OutOfMemory("allocating video frame buffers"))?;
        buffer.resize(frame_len, 0);
        buffers.push(buffer);
    }

    let slots = (0u32..)
        .take(count)
        .map(|index| Slot {
            index,
            offset: 0,
            len: frame_len,
        })
        .collect();
    debug!("allocated {count} read buffers of {frame_len:#x} bytes");

    Ok(BufferPool {
        slots,
        storage: Storage::Private(buffers),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{Call, MockDevice, MockRegion};
    use crate::traits::ErrorKind;

    fn geometry(size: usize, offsets: &[usize]) -> BufferGeometry {
        BufferGeometry {
            size,
            frames: offsets.len(),
            offsets: offsets.to_vec(),
        }
    }

    fn lens(slots: &[Slot]) -> Vec<usize> {
        slots.iter().map(|slot| slot.len).collect()
    }

    #[test]
    fn test_partition_even() {
        let geometry = geometry(0x10_0000, &[0, 0x4_0000, 0x8_0000, 0xC_0000]);
        let slots = partition(&geometry, 4).expect("partition");
        assert_eq!(lens(&slots), vec![0x4_0000; 4]);
        assert_eq!(slots.iter().map(|slot| slot.len).sum::<usize>(), 0x10_0000);
        assert_eq!(slots[2].offset, 0x8_0000);
        assert_eq!(slots[3].index, 3);
    }

    #[test]
    fn test_partition_last_absorbs_remainder() {
        let geometry = geometry(0x1_0001, &[0, 0x5555, 0xAAAA]);
        let slots = partition(&geometry, 3).expect("partition");
        assert_eq!(lens(&slots), vec![0x5555, 0x5555, 0x5557]);
        assert_eq!(slots.iter().map(|slot| slot.len).sum::<usize>(), 0x1_0001);
    }

    #[test]
    fn test_partition_fewer_slots_than_frames() {
        let geometry = geometry(0x10_0000, &[0, 0x4_0000, 0x8_0000, 0xC_0000]);
        let slots = partition(&geometry, 2).expect("partition");
        assert_eq!(lens(&slots), vec![0x4_0000, 0xC_0000]);
    }

    #[test]
    fn test_partition_rejects_unordered_offsets() {
        let geometry = geometry(0x10_0000, &[0, 0x8_0000, 0x4_0000]);
        let err = partition(&geometry, 3).expect_err("unordered");
        assert_eq!(err.kind(), ErrorKind::System);
    }

    #[test]
    fn test_partition_rejects_offset_past_end() {
        let geometry = geometry(0x1000, &[0, 0x1000]);
        let err = partition(&geometry, 2).expect_err("past end");
        assert_eq!(err.kind(), ErrorKind::System);
    }

    #[test]
    fn test_probe_io_mode_shared() {
        let device = MockDevice::new();
        assert_eq!(
            probe_io_mode(&device, 8).expect("probe"),
            (IoMode::SharedMemory, 4)
        );
        assert_eq!(
            probe_io_mode(&device, 2).expect("probe"),
            (IoMode::SharedMemory, 2)
        );
    }

    #[test]
    fn test_probe_io_mode_unsupported_query() {
        let device = MockDevice::new().without_geometry();
        assert_eq!(
            probe_io_mode(&device, 6).expect("probe"),
            (IoMode::PrivateRead, 6)
        );
    }

    #[test]
    fn test_probe_io_mode_empty_geometry() {
        let device = MockDevice::new().with_geometry(BufferGeometry::default());
        assert_eq!(
            probe_io_mode(&device, 4).expect("probe"),
            (IoMode::PrivateRead, 4)
        );
    }

    #[test]
    fn test_probe_io_mode_query_error() {
        let device = MockDevice::new().with_geometry_error(libc::EIO);
        let err = probe_io_mode(&device, 4).expect_err("query error");
        assert_eq!(err.kind(), ErrorKind::System);
    }

    #[test]
    fn test_provision_shared() {
        let device = MockDevice::new();
        let pool = provision_shared(&device, 4).expect("provision");
        assert_eq!(pool.mapped_len(), Some(0x10_0000));
        assert_eq!(pool.slots().len(), 4);
        assert_eq!(pool.bytes(1).map(<[u8]>::len), Some(0x4_0000));
        assert!(pool.bytes(4).is_none());
        assert_eq!(device.count(|call| matches!(call, Call::Map(0x10_0000))), 1);
    }

    #[test]
    fn test_provision_shared_map_fails() {
        let device = MockDevice::new().failing_map();
        let err = provision_shared(&device, 4).expect_err("map fails");
        assert_eq!(err.kind(), ErrorKind::System);
        assert_eq!(device.count(|call| matches!(call, Call::Unmap(_))), 0);
    }

    #[test]
    fn test_provision_shared_bad_layout_maps_nothing() {
        let device = MockDevice::new().with_geometry(geometry(0x1000, &[0x800, 0x400]));
        let err = provision_shared(&device, 2).expect_err("bad layout");
        assert_eq!(err.kind(), ErrorKind::System);
        assert_eq!(device.count(|call| matches!(call, Call::Map(_))), 0);
    }

    #[test]
    fn test_provision_private() {
        let pool: BufferPool<MockRegion> = provision_private(153_600, 3).expect("provision");
        assert_eq!(lens(pool.slots()), vec![153_600; 3]);
        assert_eq!(pool.mapped_len(), None);
        assert_eq!(pool.bytes(2).map(<[u8]>::len), Some(153_600));
    }

    #[test]
    fn test_take_and_restore_private() {
        let mut pool: BufferPool<MockRegion> = provision_private(16, 2).expect("provision");
        let mut buffer = pool.take_private(1).expect("slot 1 exists");
        assert_eq!(pool.bytes(1).map(<[u8]>::len), Some(0));
        buffer.fill(7);
        pool.restore_private(1, buffer);
        assert_eq!(pool.bytes(1), Some(&[7u8; 16][..]));
    }

    #[test]
    fn test_release_unmaps_once() {
        let device = MockDevice::new();
        let mut pool = provision_shared(&device, 4).expect("provision");
        pool.release(&device).expect("release");
        pool.release(&device).expect("second release");
        assert!(!pool.is_provisioned());
        assert_eq!(device.count(|call| matches!(call, Call::Unmap(_))), 1);
    }

    #[test]
    fn test_release_unmap_failure() {
        let device = MockDevice::new().failing_unmap();
        let mut pool = provision_shared(&device, 4).expect("provision");
        let err = pool.release(&device).expect_err("unmap fails");
        assert_eq!(err.kind(), ErrorKind::System);
        pool.release(&device).expect("nothing left to release");
        assert_eq!(device.count(|call| matches!(call, Call::Unmap(_))), 1);
    }

    #[test]
    fn test_release_private_is_noop() {
        let device = MockDevice::new();
        let mut pool: BufferPool<MockRegion> = provision_private(16, 2).expect("provision");
        pool.release(&device).expect("release");
        assert!(device.calls().is_empty());
    }
}
