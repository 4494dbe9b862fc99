//! # Frame Buffer
//!
//! Fixed-capacity ring of frames between one producer and its readers.
//!
//! Responsibilities:
//! - Lend zero-copy write slots out of one preallocated byte pool
//! - Publish finalized slots in acquisition order
//! - Evict the oldest unread frames under memory pressure (optional)
//! - FIFO reads and non-destructive peeks at the newest frames

mod buffer;
mod error;
mod pool;
mod ring;

pub use buffer::{BufferedFrame, FrameBuffer, FrameInfo, SlotWriter};
pub use error::BufferError;
pub use ring::SLOT_ALIGNMENT;
