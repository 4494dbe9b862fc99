//! FrameBuffer error types

use thiserror::Error;

/// FrameBuffer errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BufferError {
    /// A single frame is larger than the whole pool
    #[error("frame of {requested} bytes exceeds buffer capacity of {capacity} bytes")]
    CapacityExceeded { requested: usize, capacity: usize },

    /// Eviction was needed but is disabled or blocked by pending slots.
    ///
    /// `free` is the largest contiguous free run, not the total.
    #[error("buffer overflow: {requested} bytes requested, {free} contiguous bytes free")]
    BufferOverflow { requested: usize, free: usize },

    /// Slot is not pending in this buffer
    #[error("no pending slot to finalize")]
    NoPendingSlot,

    /// Slots must be finalized in acquisition order
    #[error("slot {got} finalized before older slot {expected}")]
    OutOfOrderFinalize { expected: u64, got: u64 },

    /// Overwrite mode cannot change while bytes are in use
    #[error("cannot change overwrite mode while {used} bytes are in use")]
    BufferInUse { used: usize },

    /// Pool size is zero or not allocatable
    #[error("invalid buffer size: {message}")]
    InvalidSize { message: String },

    /// Caller-provided output buffer is too small
    #[error("output buffer too small: need {needed} bytes, got {got}")]
    OutputTooSmall { needed: usize, got: usize },

    /// Source data does not match the slot size
    #[error("slot holds {expected} bytes, source has {got}")]
    SizeMismatch { expected: usize, got: usize },
}

impl BufferError {
    /// Create an invalid size error
    pub fn invalid_size(message: impl Into<String>) -> Self {
        Self::InvalidSize {
            message: message.into(),
        }
    }
}
