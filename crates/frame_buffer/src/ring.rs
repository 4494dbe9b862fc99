//! Slot bookkeeping for the ring.
//!
//! Pure cursor/accounting logic, no pixel memory. Live slots tile the
//! cyclic interval `[tail, head)` contiguously: each slot's span covers its
//! leading alignment padding and, for the last slot before a wrap, the
//! unusable gap up to the end of the pool.

use std::collections::VecDeque;

use contracts::{DType, Metadata};

use crate::error::BufferError;

/// Alignment of every slot's data offset (cache line)
pub const SLOT_ALIGNMENT: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SlotState {
    /// Reserved, writer still filling it
    Pending,
    /// Finalized and visible to readers
    Published,
    /// Writer dropped without finalizing
    Abandoned,
}

#[derive(Debug)]
pub(crate) struct SlotRecord {
    pub id: u64,
    pub start: usize,
    pub span: usize,
    pub data_offset: usize,
    pub data_len: usize,
    pub shape: Vec<usize>,
    pub dtype: DType,
    pub metadata: Metadata,
    pub state: SlotState,
}

/// Result of a successful reservation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Reservation {
    pub id: u64,
    pub data_offset: usize,
    pub data_len: usize,
    /// Published slots evicted to make room
    pub evicted: u64,
}

#[inline]
fn align_padding(offset: usize) -> usize {
    (SLOT_ALIGNMENT - offset % SLOT_ALIGNMENT) % SLOT_ALIGNMENT
}

/// Whether `len` bytes fit at the cursor or, after a wrap, at offset 0,
/// given the oldest live slot starts at `tail`
fn fits(capacity: usize, head: usize, used: usize, tail: usize, len: usize) -> bool {
    let padding = align_padding(head);
    if head < tail || (head == tail && used > 0) {
        padding + len <= tail - head
    } else {
        padding + len <= capacity - head || len <= tail
    }
}

#[derive(Debug)]
pub(crate) struct RingState {
    capacity: usize,
    /// Write cursor
    head: usize,
    /// Sum of live spans
    used: usize,
    /// Live slots in reservation order
    slots: VecDeque<SlotRecord>,
    next_id: u64,
    published: usize,
    pending: usize,
    overwrite: bool,
    overflow_occurred: bool,
    evicted: u64,
}

impl RingState {
    pub fn new(capacity: usize, overwrite: bool) -> Self {
        Self {
            capacity,
            head: 0,
            used: 0,
            slots: VecDeque::new(),
            next_id: 0,
            published: 0,
            pending: 0,
            overwrite,
            overflow_occurred: false,
            evicted: 0,
        }
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    #[inline]
    pub fn used(&self) -> usize {
        self.used
    }

    #[inline]
    pub fn published(&self) -> usize {
        self.published
    }

    #[inline]
    pub fn pending(&self) -> usize {
        self.pending
    }

    #[inline]
    pub fn evicted(&self) -> u64 {
        self.evicted
    }

    #[inline]
    pub fn overflow_occurred(&self) -> bool {
        self.overflow_occurred
    }

    #[inline]
    pub fn overwrite(&self) -> bool {
        self.overwrite
    }

    pub fn set_overwrite(&mut self, overwrite: bool) -> Result<(), BufferError> {
        if !self.slots.is_empty() {
            return Err(BufferError::BufferInUse { used: self.used });
        }
        self.overwrite = overwrite;
        Ok(())
    }

    fn tail(&self) -> Option<usize> {
        self.slots.front().map(|s| s.start)
    }

    /// Live data wraps around the end of the pool
    fn is_wrapped(&self) -> bool {
        match self.tail() {
            Some(tail) => self.head < tail || (self.head == tail && self.used > 0),
            None => false,
        }
    }

    /// Contiguous free bytes starting at the write cursor
    fn forward_free(&self) -> usize {
        match self.tail() {
            Some(tail) if self.is_wrapped() => tail - self.head,
            _ => self.capacity - self.head,
        }
    }

    /// Whether `len` bytes fit at offset 0 ahead of the oldest live byte
    fn fits_after_wrap(&self, len: usize) -> bool {
        match self.tail() {
            Some(tail) => !self.is_wrapped() && len <= tail,
            None => false,
        }
    }

    /// Largest contiguous free region, ignoring alignment
    fn largest_free_run(&self) -> usize {
        match self.tail() {
            None => self.capacity,
            Some(tail) if self.is_wrapped() => tail - self.head,
            Some(tail) => (self.capacity - self.head).max(tail),
        }
    }

    /// Number of published slots that must be evicted before `len` bytes
    /// fit, or `None` if no amount of eviction makes room.
    ///
    /// Walks the live slots from the oldest without touching them.
    fn evictions_needed(&self, len: usize) -> Option<u64> {
        let mut used = self.used;
        let mut evicted = 0;
        let mut live = self.slots.iter().peekable();
        loop {
            while let Some(slot) = live.next_if(|s| s.state == SlotState::Abandoned) {
                used -= slot.span;
            }
            let Some(front) = live.peek() else {
                // an empty ring restarts at offset 0
                return (len <= self.capacity).then_some(evicted);
            };
            if fits(self.capacity, self.head, used, front.start, len) {
                return Some(evicted);
            }
            if !self.overwrite || front.state != SlotState::Published {
                return None;
            }
            used -= front.span;
            evicted += 1;
            live.next();
        }
    }

    /// Reserve room for one frame, evicting published slots if allowed.
    ///
    /// A failed reservation leaves every live slot in place.
    pub fn reserve(&mut self, shape: &[usize], dtype: DType) -> Result<Reservation, BufferError> {
        let data_len = dtype
            .frame_bytes(shape)
            .ok_or(BufferError::CapacityExceeded {
                requested: usize::MAX,
                capacity: self.capacity,
            })?;
        if data_len > self.capacity {
            return Err(BufferError::CapacityExceeded {
                requested: data_len,
                capacity: self.capacity,
            });
        }

        self.trim_abandoned();
        let Some(evicted) = self.evictions_needed(data_len) else {
            self.overflow_occurred = true;
            return Err(BufferError::BufferOverflow {
                requested: data_len,
                free: self.largest_free_run(),
            });
        };

        if evicted > 0 {
            self.overflow_occurred = true;
            for _ in 0..evicted {
                self.trim_abandoned();
                self.release_front();
            }
            self.evicted += evicted;
            self.trim_abandoned();
        }
        if self.slots.is_empty() {
            self.head = 0;
        }

        let padding = align_padding(self.head);
        if padding + data_len <= self.forward_free() {
            let start = self.head;
            return Ok(self.push_slot(start, padding, data_len, shape, dtype, evicted));
        }

        debug_assert!(self.fits_after_wrap(data_len));
        let gap = self.capacity - self.head;
        if let Some(last) = self.slots.back_mut() {
            last.span += gap;
        }
        self.used += gap;
        self.head = 0;
        Ok(self.push_slot(0, 0, data_len, shape, dtype, evicted))
    }

    fn push_slot(
        &mut self,
        start: usize,
        padding: usize,
        data_len: usize,
        shape: &[usize],
        dtype: DType,
        evicted: u64,
    ) -> Reservation {
        let id = self.next_id;
        self.next_id += 1;

        let span = padding + data_len;
        let data_offset = start + padding;
        self.slots.push_back(SlotRecord {
            id,
            start,
            span,
            data_offset,
            data_len,
            shape: shape.to_vec(),
            dtype,
            metadata: Metadata::new(),
            state: SlotState::Pending,
        });
        self.head = start + span;
        self.used += span;
        self.pending += 1;

        Reservation {
            id,
            data_offset,
            data_len,
            evicted,
        }
    }

    /// Publish the oldest pending slot, which must be `id`
    pub fn publish(&mut self, id: u64, metadata: Metadata) -> Result<(), BufferError> {
        let Some(oldest) = self
            .slots
            .iter_mut()
            .find(|s| s.state == SlotState::Pending)
        else {
            return Err(BufferError::NoPendingSlot);
        };

        if oldest.id != id {
            let expected = oldest.id;
            let is_pending = self
                .slots
                .iter()
                .any(|s| s.id == id && s.state == SlotState::Pending);
            return Err(if is_pending {
                BufferError::OutOfOrderFinalize { expected, got: id }
            } else {
                BufferError::NoPendingSlot
            });
        }

        oldest.metadata = metadata;
        oldest.state = SlotState::Published;
        self.pending -= 1;
        self.published += 1;
        Ok(())
    }

    /// Give up on a pending slot; its span is reclaimed in FIFO order
    pub fn abandon(&mut self, id: u64) {
        if let Some(slot) = self
            .slots
            .iter_mut()
            .find(|s| s.id == id && s.state == SlotState::Pending)
        {
            slot.state = SlotState::Abandoned;
            self.pending -= 1;
        }
        self.trim_abandoned();
    }

    fn trim_abandoned(&mut self) {
        while self
            .slots
            .front()
            .is_some_and(|s| s.state == SlotState::Abandoned)
        {
            self.release_front();
        }
    }

    fn release_front(&mut self) -> Option<SlotRecord> {
        let slot = self.slots.pop_front()?;
        self.used -= slot.span;
        if slot.state == SlotState::Published {
            self.published -= 1;
        }
        if self.slots.is_empty() {
            debug_assert_eq!(self.used, 0);
            self.head = 0;
        }
        Some(slot)
    }

    /// Oldest published slot, if it is next in FIFO order
    pub fn front_published(&mut self) -> Option<&SlotRecord> {
        self.trim_abandoned();
        self.slots
            .front()
            .filter(|s| s.state == SlotState::Published)
    }

    /// Remove and return the oldest published slot
    pub fn pop_front_published(&mut self) -> Option<SlotRecord> {
        self.front_published()?;
        let slot = self.release_front();
        self.trim_abandoned();
        slot
    }

    /// n-th newest published slot (`n = 0` is the newest)
    pub fn nth_from_last_published(&self, n: usize) -> Option<&SlotRecord> {
        self.slots
            .iter()
            .rev()
            .filter(|s| s.state == SlotState::Published)
            .nth(n)
    }

    pub fn clear(&mut self) {
        self.slots.clear();
        self.head = 0;
        self.used = 0;
        self.published = 0;
        self.pending = 0;
        self.evicted = 0;
        self.overflow_occurred = false;
    }
}
