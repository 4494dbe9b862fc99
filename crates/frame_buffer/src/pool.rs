//! Fixed byte pool backing the ring.

use std::alloc::{alloc_zeroed, dealloc, handle_alloc_error, Layout};
use std::ptr::NonNull;

use crate::error::BufferError;
use crate::ring::SLOT_ALIGNMENT;

/// One zeroed, cache-line aligned allocation, never resized
pub(crate) struct AlignedPool {
    ptr: NonNull<u8>,
    layout: Layout,
}

// SAFETY: the pool is plain bytes. Disjoint ranges are handed to one writer
// each by the ring bookkeeping, and reads of published ranges happen under
// the buffer lock.
unsafe impl Send for AlignedPool {}
unsafe impl Sync for AlignedPool {}

impl AlignedPool {
    pub fn new(size: usize) -> Result<Self, BufferError> {
        if size == 0 {
            return Err(BufferError::invalid_size("buffer size must be > 0"));
        }
        let layout = Layout::from_size_align(size, SLOT_ALIGNMENT)
            .map_err(|e| BufferError::invalid_size(format!("{size} bytes: {e}")))?;

        // SAFETY: layout has non-zero size
        let raw = unsafe { alloc_zeroed(layout) };
        let Some(ptr) = NonNull::new(raw) else {
            handle_alloc_error(layout);
        };
        Ok(Self { ptr, layout })
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.layout.size()
    }

    /// Copy `out.len()` bytes starting at `offset` into `out`
    ///
    /// # Safety
    /// The range must be in bounds and not concurrently written.
    pub unsafe fn read_into(&self, offset: usize, out: &mut [u8]) {
        debug_assert!(offset + out.len() <= self.len());
        std::ptr::copy_nonoverlapping(self.ptr.as_ptr().add(offset), out.as_mut_ptr(), out.len());
    }

    /// Mutable view of `[offset, offset + len)`
    ///
    /// # Safety
    /// The range must be in bounds and exclusively owned by the caller for
    /// the lifetime of the returned slice.
    #[allow(clippy::mut_from_ref)]
    pub unsafe fn slice_mut(&self, offset: usize, len: usize) -> &mut [u8] {
        debug_assert!(offset + len <= self.len());
        std::slice::from_raw_parts_mut(self.ptr.as_ptr().add(offset), len)
    }
}

impl Drop for AlignedPool {
    fn drop(&mut self) {
        // SAFETY: allocated in `new` with this exact layout
        unsafe { dealloc(self.ptr.as_ptr(), self.layout) };
    }
}
