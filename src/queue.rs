//! FIFO of slots handed to the device.
//!
//! Retrieval order is submission order, not slot order: drivers may fill
//! slots out of numeric order, but consumers see frames in the order they
//! were asked for. Slots are tracked by index in a fixed ring, separate from
//! the buffer storage itself.

use thiserror::Error;

/// Rejected queue operation.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum QueueError {
    /// Slot index beyond the pool.
    #[error("slot {0} is not part of this buffer pool")]
    UnknownSlot(u32),
    /// Slot already waiting in the queue.
    #[error("slot {0} is already queued")]
    AlreadyQueued(u32),
}

/// Fixed-capacity ring of slot indices.
#[derive(Debug, Clone, Default)]
pub struct FrameQueue {
    ring: Vec<u32>,
    queued: Vec<bool>,
    head: usize,
    len: usize,
}

impl FrameQueue {
    /// Queue for slots `0..capacity`.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            ring: vec![0; capacity],
            queued: vec![false; capacity],
            head: 0,
            len: 0,
        }
    }

    /// Number of slots the queue can hold.
    pub fn capacity(&self) -> usize {
        self.ring.len()
    }

    /// Number of queued slots.
    pub const fn len(&self) -> usize {
        self.len
    }

    /// Whether nothing is queued.
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Whether `slot` is currently queued.
    pub fn contains(&self, slot: u32) -> bool {
        usize::try_from(slot)
            .ok()
            .and_then(|index| self.queued.get(index))
            .copied()
            .unwrap_or(false)
    }

    /// Append `slot` at the tail.
    pub fn push(&mut self, slot: u32) -> Result<(), QueueError> {
        let capacity = self.capacity();
        let flag = usize::try_from(slot)
            .ok()
            .and_then(|index| self.queued.get_mut(index))
            .ok_or(QueueError::UnknownSlot(slot))?;
        if *flag {
            return Err(QueueError::AlreadyQueued(slot));
        }

        // every slot appears at most once, so the ring cannot overflow
        let tail = (self.head + self.len) % capacity;
        if let Some(entry) = self.ring.get_mut(tail) {
            *entry = slot;
            *flag = true;
            self.len += 1;
        }
        Ok(())
    }

    /// Remove and return the slot at the head.
    pub fn pop(&mut self) -> Option<u32> {
        if self.len == 0 {
            return None;
        }
        let slot = *self.ring.get(self.head)?;
        if let Some(flag) = usize::try_from(slot)
            .ok()
            .and_then(|index| self.queued.get_mut(index))
        {
            *flag = false;
        }
        self.head = (self.head + 1) % self.capacity();
        self.len -= 1;
        Some(slot)
    }

    /// Forget every queued slot.
    pub fn clear(&mut self) {
        self.queued.fill(false);
        self.head = 0;
        self.len = 0;
    }
}
