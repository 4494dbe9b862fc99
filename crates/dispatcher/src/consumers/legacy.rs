//! LegacyAdapter - consumers written against the older callback names
//!
//! Older consumers expose `on_sequence_started`, `on_frame_ready` and
//! `on_sequence_finished`, with `on_frame_ready` taking one, two or three
//! arguments. The arity is fixed once, when the callback is registered.

use std::fmt;

use contracts::{ContractError, FrameConsumer, FrameEvent, Image, Metadata, RunStatus, Sequence};

type StartedFn = Box<dyn FnMut(&Sequence, &Metadata) -> Result<(), ContractError> + Send>;
type FinishedFn = Box<dyn FnMut(&Sequence, RunStatus) -> Result<(), ContractError> + Send>;

/// `on_frame_ready` in its supported arities
pub enum FrameCallback {
    /// `on_frame_ready(image)`
    Image(Box<dyn FnMut(&Image) -> Result<(), ContractError> + Send>),
    /// `on_frame_ready(image, event)`
    ImageEvent(Box<dyn FnMut(&Image, &FrameEvent) -> Result<(), ContractError> + Send>),
    /// `on_frame_ready(image, event, meta)`
    Full(Box<dyn FnMut(&Image, &FrameEvent, &Metadata) -> Result<(), ContractError> + Send>),
}

impl FrameCallback {
    pub fn arity(&self) -> usize {
        match self {
            FrameCallback::Image(_) => 1,
            FrameCallback::ImageEvent(_) => 2,
            FrameCallback::Full(_) => 3,
        }
    }

    fn call(
        &mut self,
        image: &Image,
        event: &FrameEvent,
        meta: &Metadata,
    ) -> Result<(), ContractError> {
        match self {
            FrameCallback::Image(f) => f(image),
            FrameCallback::ImageEvent(f) => f(image, event),
            FrameCallback::Full(f) => f(image, event, meta),
        }
    }
}

impl fmt::Debug for FrameCallback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FrameCallback(arity={})", self.arity())
    }
}

/// Adapts legacy callbacks to [`FrameConsumer`]. Missing callbacks are no-ops.
#[derive(Default)]
pub struct LegacyAdapter {
    on_sequence_started: Option<StartedFn>,
    on_frame_ready: Option<FrameCallback>,
    on_sequence_finished: Option<FinishedFn>,
}

impl LegacyAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_sequence_started(
        mut self,
        f: impl FnMut(&Sequence, &Metadata) -> Result<(), ContractError> + Send + 'static,
    ) -> Self {
        self.on_sequence_started = Some(Box::new(f));
        self
    }

    pub fn on_frame_ready(mut self, callback: FrameCallback) -> Self {
        self.on_frame_ready = Some(callback);
        self
    }

    /// `on_frame_ready(image)`
    pub fn on_frame_image(
        self,
        f: impl FnMut(&Image) -> Result<(), ContractError> + Send + 'static,
    ) -> Self {
        self.on_frame_ready(FrameCallback::Image(Box::new(f)))
    }

    /// `on_frame_ready(image, event)`
    pub fn on_frame_event(
        self,
        f: impl FnMut(&Image, &FrameEvent) -> Result<(), ContractError> + Send + 'static,
    ) -> Self {
        self.on_frame_ready(FrameCallback::ImageEvent(Box::new(f)))
    }

    /// `on_frame_ready(image, event, meta)`
    pub fn on_frame_full(
        self,
        f: impl FnMut(&Image, &FrameEvent, &Metadata) -> Result<(), ContractError> + Send + 'static,
    ) -> Self {
        self.on_frame_ready(FrameCallback::Full(Box::new(f)))
    }

    pub fn on_sequence_finished(
        mut self,
        f: impl FnMut(&Sequence, RunStatus) -> Result<(), ContractError> + Send + 'static,
    ) -> Self {
        self.on_sequence_finished = Some(Box::new(f));
        self
    }

    /// Arity of the registered frame callback, if any
    pub fn frame_arity(&self) -> Option<usize> {
        self.on_frame_ready.as_ref().map(FrameCallback::arity)
    }
}

impl FrameConsumer for LegacyAdapter {
    fn setup(&mut self, sequence: &Sequence, meta: &Metadata) -> Result<(), ContractError> {
        match &mut self.on_sequence_started {
            Some(f) => f(sequence, meta),
            None => Ok(()),
        }
    }

    fn frame(
        &mut self,
        image: &Image,
        event: &FrameEvent,
        meta: &Metadata,
    ) -> Result<(), ContractError> {
        match &mut self.on_frame_ready {
            Some(callback) => callback.call(image, event, meta),
            None => Ok(()),
        }
    }

    fn finish(&mut self, sequence: &Sequence, status: RunStatus) -> Result<(), ContractError> {
        match &mut self.on_sequence_finished {
            Some(f) => f(sequence, status),
            None => Ok(()),
        }
    }
}

impl fmt::Debug for LegacyAdapter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LegacyAdapter")
            .field("on_sequence_started", &self.on_sequence_started.is_some())
            .field("on_frame_ready", &self.on_frame_ready)
            .field("on_sequence_finished", &self.on_sequence_finished.is_some())
            .finish()
    }
}
