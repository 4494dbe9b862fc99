//! # Contracts
//!
//! Frozen interface contracts shared by the buffer, the dispatcher and the
//! CLI. Business crates depend only on this crate, never on each other's
//! internals.
//!
//! ## Frame model
//! - A frame is an `(image, event, metadata)` triple produced once per
//!   acquisition step.
//! - Images are raw bytes interpreted through a shape and an element type.
//! - Metadata is an arbitrary string -> JSON value mapping.

mod config;
mod consumer;
mod error;
mod frame;
mod policy;
mod report;

pub use config::*;
pub use consumer::*;
pub use error::*;
pub use frame::*;
pub use policy::*;
pub use report::*;
