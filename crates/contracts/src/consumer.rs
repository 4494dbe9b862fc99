//! FrameConsumer trait - Dispatcher output interface
//!
//! Every downstream receiver of frames (writers, viewers, analyzers)
//! implements this trait.

use std::fmt;

use crate::{ContractError, FrameEvent, Image, Metadata, RunStatus, Sequence};

/// Frame consumer
///
/// `setup` and `finish` are called on the control thread; `frame` is called
/// from the consumer's dedicated worker, never concurrently with itself.
pub trait FrameConsumer: Send {
    /// Called once before the first frame
    fn setup(&mut self, _sequence: &Sequence, _meta: &Metadata) -> Result<(), ContractError> {
        Ok(())
    }

    /// Called once per delivered frame, in submission order
    ///
    /// # Errors
    /// Returns a consumer error; how it is handled depends on the run policy
    fn frame(
        &mut self,
        image: &Image,
        event: &FrameEvent,
        meta: &Metadata,
    ) -> Result<(), ContractError>;

    /// Called once after the last frame was delivered
    fn finish(&mut self, _sequence: &Sequence, _status: RunStatus) -> Result<(), ContractError> {
        Ok(())
    }
}

impl<C: FrameConsumer + ?Sized> FrameConsumer for Box<C> {
    fn setup(&mut self, sequence: &Sequence, meta: &Metadata) -> Result<(), ContractError> {
        (**self).setup(sequence, meta)
    }

    fn frame(
        &mut self,
        image: &Image,
        event: &FrameEvent,
        meta: &Metadata,
    ) -> Result<(), ContractError> {
        (**self).frame(image, event, meta)
    }

    fn finish(&mut self, sequence: &Sequence, status: RunStatus) -> Result<(), ContractError> {
        (**self).finish(sequence, status)
    }
}

/// Consumer registration record
pub struct ConsumerSpec {
    /// Unique name (identity within a dispatcher)
    pub name: String,
    /// The consumer itself
    pub consumer: Box<dyn FrameConsumer>,
    /// Critical consumers may cancel or fail the run
    pub critical: bool,
}

impl ConsumerSpec {
    /// Create a registration record
    pub fn new(
        name: impl Into<String>,
        consumer: impl FrameConsumer + 'static,
        critical: bool,
    ) -> Self {
        Self {
            name: name.into(),
            consumer: Box::new(consumer),
            critical,
        }
    }

    /// Critical consumer (e.g. a file writer)
    pub fn critical(name: impl Into<String>, consumer: impl FrameConsumer + 'static) -> Self {
        Self::new(name, consumer, true)
    }

    /// Non-critical observer (e.g. a live viewer)
    pub fn observer(name: impl Into<String>, consumer: impl FrameConsumer + 'static) -> Self {
        Self::new(name, consumer, false)
    }
}

impl fmt::Debug for ConsumerSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConsumerSpec")
            .field("name", &self.name)
            .field("critical", &self.critical)
            .finish_non_exhaustive()
    }
}
