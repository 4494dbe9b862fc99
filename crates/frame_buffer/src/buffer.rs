//! FrameBuffer - fixed-capacity zero-copy frame ring

use std::fmt;

use bytes::Bytes;
use contracts::{BufferConfig, DType, Image, Metadata};
use parking_lot::Mutex;
use tracing::{debug, trace, warn};

use crate::error::BufferError;
use crate::pool::AlignedPool;
use crate::ring::{RingState, SlotRecord};

/// A published frame copied out of the ring
#[derive(Debug, Clone, PartialEq)]
pub struct BufferedFrame {
    pub image: Image,
    pub metadata: Metadata,
}

/// Description of a frame read into a caller-provided buffer
#[derive(Debug, Clone, PartialEq)]
pub struct FrameInfo {
    pub shape: Vec<usize>,
    pub dtype: DType,
    /// Bytes written to the front of the output buffer
    pub nbytes: usize,
    pub metadata: Metadata,
}

/// Fixed-size ring buffer of frames.
///
/// One producer reserves slots with [`acquire_slot`](Self::acquire_slot),
/// fills them in place and publishes them with
/// [`finalize_slot`](Self::finalize_slot). Readers take published frames in
/// FIFO order or peek at the newest ones. All bookkeeping happens under one
/// lock; pixel writes into a slot do not take it.
pub struct FrameBuffer {
    pool: AlignedPool,
    ring: Mutex<RingState>,
}

impl FrameBuffer {
    /// Allocate a buffer of `size_bytes`
    pub fn new(size_bytes: usize, overwrite_on_overflow: bool) -> Result<Self, BufferError> {
        let pool = AlignedPool::new(size_bytes)?;
        debug!(size_bytes, overwrite_on_overflow, "frame buffer allocated");
        Ok(Self {
            pool,
            ring: Mutex::new(RingState::new(size_bytes, overwrite_on_overflow)),
        })
    }

    /// Allocate a buffer of `size_mb` MiB
    pub fn with_size_mb(size_mb: usize, overwrite_on_overflow: bool) -> Result<Self, BufferError> {
        let size_bytes = size_mb
            .checked_mul(1024 * 1024)
            .ok_or_else(|| BufferError::invalid_size(format!("{size_mb} MiB overflows usize")))?;
        Self::new(size_bytes, overwrite_on_overflow)
    }

    pub fn from_config(config: &BufferConfig) -> Result<Self, BufferError> {
        Self::with_size_mb(config.size_mb, config.overwrite_on_overflow)
    }

    /// Reserve a slot for one `shape` x `dtype` frame.
    ///
    /// Evicts the oldest published frames when the ring is full and
    /// overwrite is enabled. The slot must be published with
    /// [`finalize_slot`](Self::finalize_slot) in acquisition order; a writer
    /// dropped without finalizing abandons its slot.
    pub fn acquire_slot(&self, shape: &[usize], dtype: DType) -> Result<SlotWriter<'_>, BufferError> {
        let reservation = {
            let mut ring = self.ring.lock();
            let result = ring.reserve(shape, dtype);
            observability::record_buffer_usage(ring.used(), ring.capacity());
            result
        };

        let reservation = match reservation {
            Ok(r) => r,
            Err(e) => {
                if matches!(e, BufferError::BufferOverflow { .. }) {
                    warn!(error = %e, "frame buffer overflow");
                }
                return Err(e);
            }
        };

        if reservation.evicted > 0 {
            warn!(
                evicted = reservation.evicted,
                "frame buffer full, evicted oldest unread frames"
            );
            observability::record_buffer_evictions(reservation.evicted);
        }
        trace!(
            slot = reservation.id,
            offset = reservation.data_offset,
            len = reservation.data_len,
            "slot acquired"
        );

        // SAFETY: the ring hands each live range to exactly one reservation,
        // and the range stays reserved until the writer is finalized or
        // dropped, both of which end the borrow.
        let data = unsafe {
            self.pool
                .slice_mut(reservation.data_offset, reservation.data_len)
        };

        Ok(SlotWriter {
            buffer: self,
            id: reservation.id,
            data,
            shape: shape.to_vec(),
            dtype,
            done: false,
        })
    }

    /// Publish a filled slot with its metadata.
    ///
    /// Slots must be finalized in the order they were acquired. On error the
    /// writer is dropped and its slot abandoned.
    pub fn finalize_slot(&self, mut slot: SlotWriter<'_>, metadata: Metadata) -> Result<(), BufferError> {
        if !std::ptr::eq(slot.buffer, self) {
            return Err(BufferError::NoPendingSlot);
        }
        self.ring.lock().publish(slot.id, metadata)?;
        slot.done = true;
        trace!(slot = slot.id, "slot published");
        Ok(())
    }

    /// Remove and return the oldest published frame
    pub fn pop_next(&self) -> Option<BufferedFrame> {
        let mut ring = self.ring.lock();
        let slot = ring.pop_front_published()?;
        // released bytes cannot be reserved again until the lock is dropped
        let frame = self.copy_out(&slot);
        observability::record_buffer_usage(ring.used(), ring.capacity());
        Some(frame)
    }

    /// Remove the oldest published frame, copying its bytes into `out`.
    ///
    /// Leaves the frame in place if `out` is too small.
    pub fn pop_next_into(&self, out: &mut [u8]) -> Result<Option<FrameInfo>, BufferError> {
        let mut ring = self.ring.lock();
        let Some(front) = ring.front_published() else {
            return Ok(None);
        };
        check_output(front, out)?;
        let Some(slot) = ring.pop_front_published() else {
            return Ok(None);
        };
        let info = self.read_into(&slot, out);
        observability::record_buffer_usage(ring.used(), ring.capacity());
        Ok(Some(info))
    }

    /// Copy of the newest published frame
    pub fn peek_last(&self) -> Option<BufferedFrame> {
        self.peek_nth_from_last(0)
    }

    /// Copy of the n-th newest published frame (`n = 0` is the newest)
    pub fn peek_nth_from_last(&self, n: usize) -> Option<BufferedFrame> {
        let ring = self.ring.lock();
        ring.nth_from_last_published(n)
            .map(|slot| self.copy_out(slot))
    }

    pub fn peek_last_into(&self, out: &mut [u8]) -> Result<Option<FrameInfo>, BufferError> {
        self.peek_nth_from_last_into(0, out)
    }

    pub fn peek_nth_from_last_into(
        &self,
        n: usize,
        out: &mut [u8],
    ) -> Result<Option<FrameInfo>, BufferError> {
        let ring = self.ring.lock();
        let Some(slot) = ring.nth_from_last_published(n) else {
            return Ok(None);
        };
        check_output(slot, out)?;
        Ok(Some(self.read_into(slot, out)))
    }

    /// Discard every slot and reset the cursors and overflow flag
    pub fn clear(&mut self) {
        self.ring.get_mut().clear();
        observability::record_buffer_usage(0, self.pool.len());
        debug!("frame buffer cleared");
    }

    #[inline]
    pub fn size_bytes(&self) -> usize {
        self.pool.len()
    }

    /// Bytes held by live slots, including alignment padding
    pub fn used_bytes(&self) -> usize {
        self.ring.lock().used()
    }

    pub fn free_bytes(&self) -> usize {
        self.size_bytes() - self.used_bytes()
    }

    /// Number of published frames
    pub fn len(&self) -> usize {
        self.ring.lock().published()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of acquired but not yet finalized slots
    pub fn pending(&self) -> usize {
        self.ring.lock().pending()
    }

    /// Frames evicted since creation or the last `clear`
    pub fn evicted_count(&self) -> u64 {
        self.ring.lock().evicted()
    }

    /// Sticky flag: an eviction or overflow happened since the last `clear`
    pub fn overflow_occurred(&self) -> bool {
        self.ring.lock().overflow_occurred()
    }

    pub fn overwrite_on_overflow(&self) -> bool {
        self.ring.lock().overwrite()
    }

    /// Change eviction behavior. Fails while any bytes are in use.
    pub fn set_overwrite_on_overflow(&self, overwrite: bool) -> Result<(), BufferError> {
        self.ring.lock().set_overwrite(overwrite)
    }

    fn copy_out(&self, slot: &SlotRecord) -> BufferedFrame {
        let mut data = vec![0u8; slot.data_len];
        // SAFETY: published slots are no longer written and the caller holds
        // the ring lock, so the range cannot be reserved concurrently.
        unsafe { self.pool.read_into(slot.data_offset, &mut data) };
        BufferedFrame {
            image: Image {
                data: Bytes::from(data),
                shape: slot.shape.clone(),
                dtype: slot.dtype,
            },
            metadata: slot.metadata.clone(),
        }
    }

    fn read_into(&self, slot: &SlotRecord, out: &mut [u8]) -> FrameInfo {
        // SAFETY: as in `copy_out`; `check_output` verified the length.
        unsafe { self.pool.read_into(slot.data_offset, &mut out[..slot.data_len]) };
        FrameInfo {
            shape: slot.shape.clone(),
            dtype: slot.dtype,
            nbytes: slot.data_len,
            metadata: slot.metadata.clone(),
        }
    }
}

fn check_output(slot: &SlotRecord, out: &[u8]) -> Result<(), BufferError> {
    if out.len() < slot.data_len {
        return Err(BufferError::OutputTooSmall {
            needed: slot.data_len,
            got: out.len(),
        });
    }
    Ok(())
}

impl fmt::Debug for FrameBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let ring = self.ring.lock();
        f.debug_struct("FrameBuffer")
            .field("size_bytes", &ring.capacity())
            .field("used_bytes", &ring.used())
            .field("published", &ring.published())
            .field("pending", &ring.pending())
            .field("overwrite_on_overflow", &ring.overwrite())
            .field("overflow_occurred", &ring.overflow_occurred())
            .finish()
    }
}

/// Exclusive write access to one reserved slot
pub struct SlotWriter<'a> {
    buffer: &'a FrameBuffer,
    id: u64,
    data: &'a mut [u8],
    shape: Vec<usize>,
    dtype: DType,
    done: bool,
}

impl<'a> SlotWriter<'a> {
    /// Slot bytes, to be filled in place
    #[inline]
    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut *self.data
    }

    /// Fill the slot from `src`, which must match the slot size
    pub fn copy_from_slice(&mut self, src: &[u8]) -> Result<(), BufferError> {
        if src.len() != self.data.len() {
            return Err(BufferError::SizeMismatch {
                expected: self.data.len(),
                got: src.len(),
            });
        }
        self.data.copy_from_slice(src);
        Ok(())
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn dtype(&self) -> DType {
        self.dtype
    }

    /// Publish this slot; same as [`FrameBuffer::finalize_slot`]
    pub fn finalize(self, metadata: Metadata) -> Result<(), BufferError> {
        let buffer = self.buffer;
        buffer.finalize_slot(self, metadata)
    }
}

impl Drop for SlotWriter<'_> {
    fn drop(&mut self) {
        if !self.done {
            debug!(slot = self.id, "slot dropped without finalize, abandoning");
            self.buffer.ring.lock().abandon(self.id);
        }
    }
}

impl fmt::Debug for SlotWriter<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SlotWriter")
            .field("id", &self.id)
            .field("len", &self.data.len())
            .field("shape", &self.shape)
            .field("dtype", &self.dtype)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Arc;
    use std::thread;

    fn meta(i: u64) -> Metadata {
        let mut m = Metadata::new();
        m.insert("i".to_string(), json!(i));
        m
    }

    fn write(buffer: &FrameBuffer, len: usize, fill: u8, i: u64) -> Result<(), BufferError> {
        let mut slot = buffer.acquire_slot(&[len], DType::U8)?;
        slot.data_mut().fill(fill);
        slot.finalize(meta(i))
    }

    #[test]
    fn test_zero_size_rejected() {
        assert!(matches!(
            FrameBuffer::new(0, true),
            Err(BufferError::InvalidSize { .. })
        ));
    }

    #[test]
    fn test_oversized_slot_always_fails() {
        let buffer = FrameBuffer::new(1024, true).unwrap();
        let err = buffer.acquire_slot(&[32, 32], DType::U16).unwrap_err();
        assert!(matches!(err, BufferError::CapacityExceeded { requested: 2048, capacity: 1024 }));
        assert_eq!(buffer.used_bytes(), 0);
        assert_eq!(buffer.pending(), 0);
    }

    #[test]
    fn test_write_and_pop_roundtrip() {
        let buffer = FrameBuffer::new(4096, true).unwrap();
        let mut slot = buffer.acquire_slot(&[2, 3], DType::U16).unwrap();
        assert_eq!(slot.len(), 12);
        slot.copy_from_slice(&[1, 0, 2, 0, 3, 0, 4, 0, 5, 0, 6, 0]).unwrap();
        buffer.finalize_slot(slot, meta(7)).unwrap();

        assert_eq!(buffer.len(), 1);
        let frame = buffer.pop_next().unwrap();
        assert_eq!(frame.image.shape, vec![2, 3]);
        assert_eq!(frame.image.dtype, DType::U16);
        assert_eq!(&frame.image.data[..4], &[1, 0, 2, 0]);
        assert_eq!(frame.metadata["i"], json!(7));
        assert!(buffer.pop_next().is_none());
        assert_eq!(buffer.used_bytes(), 0);
    }

    #[test]
    fn test_overflow_evicts_oldest_and_sets_flag() {
        let buffer = FrameBuffer::new(1024, true).unwrap();
        for i in 0..24u64 {
            write(&buffer, 100, i as u8, i).unwrap();
            assert!(buffer.used_bytes() <= buffer.size_bytes());
        }
        assert!(buffer.overflow_occurred());
        assert!(buffer.evicted_count() > 0);

        // survivors are the newest frames, still in FIFO order
        let first = buffer.pop_next().unwrap();
        let i = first.metadata["i"].as_u64().unwrap();
        assert!(i > 0);
        let second = buffer.pop_next().unwrap();
        assert_eq!(second.metadata["i"], json!(i + 1));
    }

    #[test]
    fn test_overflow_without_overwrite_fails() {
        let buffer = FrameBuffer::new(256, false).unwrap();
        for i in 0..4 {
            write(&buffer, 64, 0, i).unwrap();
        }
        let err = write(&buffer, 64, 0, 4).unwrap_err();
        assert!(matches!(err, BufferError::BufferOverflow { .. }));
        assert!(buffer.overflow_occurred());
        assert_eq!(buffer.len(), 4);
        assert_eq!(buffer.pending(), 0);
    }

    #[test]
    fn test_failed_acquire_keeps_unread_frames() {
        let buffer = FrameBuffer::new(256, true).unwrap();
        write(&buffer, 64, 1, 0).unwrap();
        let pending = buffer.acquire_slot(&[64], DType::U8).unwrap();

        let err = buffer.acquire_slot(&[192], DType::U8).unwrap_err();
        assert!(matches!(err, BufferError::BufferOverflow { requested: 192, free: 128 }));
        assert_eq!(buffer.len(), 1);
        assert_eq!(buffer.evicted_count(), 0);

        drop(pending);
        let frame = buffer.pop_next().unwrap();
        assert_eq!(frame.metadata["i"], json!(0));
        assert_eq!(frame.image.data[0], 1);
    }

    #[test]
    fn test_peek_does_not_change_pop_order() {
        let buffer = FrameBuffer::new(4096, true).unwrap();
        for i in 0..3 {
            write(&buffer, 16, i as u8, i).unwrap();
        }

        assert_eq!(buffer.peek_last().unwrap().metadata["i"], json!(2));
        assert_eq!(buffer.peek_nth_from_last(1).unwrap().metadata["i"], json!(1));
        assert!(buffer.peek_nth_from_last(3).is_none());
        assert_eq!(buffer.len(), 3);

        assert_eq!(buffer.pop_next().unwrap().metadata["i"], json!(0));
        assert_eq!(buffer.peek_last().unwrap().metadata["i"], json!(2));
        assert_eq!(buffer.pop_next().unwrap().metadata["i"], json!(1));
    }

    #[test]
    fn test_into_variants() {
        let buffer = FrameBuffer::new(4096, true).unwrap();
        write(&buffer, 8, 9, 0).unwrap();

        let mut small = [0u8; 4];
        assert_eq!(
            buffer.pop_next_into(&mut small),
            Err(BufferError::OutputTooSmall { needed: 8, got: 4 })
        );
        assert_eq!(buffer.len(), 1);

        let mut out = [0u8; 16];
        let info = buffer.peek_last_into(&mut out).unwrap().unwrap();
        assert_eq!(info.nbytes, 8);
        assert_eq!(&out[..8], &[9u8; 8]);

        let info = buffer.pop_next_into(&mut out).unwrap().unwrap();
        assert_eq!(info.shape, vec![8]);
        assert!(buffer.is_empty());
        assert_eq!(buffer.pop_next_into(&mut out), Ok(None));
    }

    #[test]
    fn test_finalize_out_of_order() {
        let buffer = FrameBuffer::new(4096, true).unwrap();
        let first = buffer.acquire_slot(&[8], DType::U8).unwrap();
        let second = buffer.acquire_slot(&[8], DType::U8).unwrap();

        let err = buffer.finalize_slot(second, Metadata::new()).unwrap_err();
        assert!(matches!(err, BufferError::OutOfOrderFinalize { .. }));

        // the rejected writer was abandoned, the first is still pending
        assert_eq!(buffer.pending(), 1);
        first.finalize(Metadata::new()).unwrap();
        assert_eq!(buffer.len(), 1);
    }

    #[test]
    fn test_finalize_on_other_buffer_rejected() {
        let a = FrameBuffer::new(1024, true).unwrap();
        let b = FrameBuffer::new(1024, true).unwrap();
        let slot = a.acquire_slot(&[8], DType::U8).unwrap();
        assert_eq!(
            b.finalize_slot(slot, Metadata::new()),
            Err(BufferError::NoPendingSlot)
        );
        assert_eq!(a.pending(), 0);
        assert_eq!(a.used_bytes(), 0);
    }

    #[test]
    fn test_dropped_writer_is_abandoned() {
        let buffer = FrameBuffer::new(1024, true).unwrap();
        {
            let _slot = buffer.acquire_slot(&[100], DType::U8).unwrap();
            assert_eq!(buffer.pending(), 1);
        }
        assert_eq!(buffer.pending(), 0);
        assert_eq!(buffer.used_bytes(), 0);
    }

    #[test]
    fn test_set_overwrite_and_clear() {
        let mut buffer = FrameBuffer::new(256, true).unwrap();
        for i in 0..6 {
            write(&buffer, 64, 0, i).unwrap();
        }
        assert!(matches!(
            buffer.set_overwrite_on_overflow(false),
            Err(BufferError::BufferInUse { .. })
        ));

        buffer.clear();
        assert_eq!(buffer.used_bytes(), 0);
        assert_eq!(buffer.free_bytes(), 256);
        assert!(!buffer.overflow_occurred());
        buffer.set_overwrite_on_overflow(false).unwrap();
        assert!(!buffer.overwrite_on_overflow());
    }

    #[test]
    fn test_concurrent_writer_and_reader() {
        let buffer = Arc::new(FrameBuffer::new(64 * 1024, false).unwrap());
        const FRAMES: u64 = 200;

        let writer = {
            let buffer = Arc::clone(&buffer);
            thread::spawn(move || {
                let mut i = 0;
                while i < FRAMES {
                    match write(&buffer, 1000, (i % 251) as u8, i) {
                        Ok(()) => i += 1,
                        Err(BufferError::BufferOverflow { .. }) => thread::yield_now(),
                        Err(e) => panic!("unexpected error: {e}"),
                    }
                }
            })
        };

        let mut seen = 0u64;
        while seen < FRAMES {
            match buffer.pop_next() {
                Some(frame) => {
                    assert_eq!(frame.metadata["i"], json!(seen));
                    assert!(frame.image.data.iter().all(|&b| b == (seen % 251) as u8));
                    seen += 1;
                }
                None => thread::yield_now(),
            }
        }
        writer.join().unwrap();
        assert!(buffer.is_empty());
    }
}
