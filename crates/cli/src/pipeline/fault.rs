//! Simulated slowness and failures for configured consumers.

use std::thread;
use std::time::Duration;

use contracts::{ContractError, FrameConsumer, FrameEvent, Image, Metadata, RunStatus, Sequence};

/// Wraps a consumer, delaying every frame and failing every n-th one
pub struct FaultInjector {
    name: String,
    inner: Box<dyn FrameConsumer>,
    delay: Duration,
    fail_every: Option<u64>,
    seen: u64,
}

impl FaultInjector {
    pub fn new(
        name: impl Into<String>,
        inner: Box<dyn FrameConsumer>,
        delay_ms: u64,
        fail_every: Option<u64>,
    ) -> Self {
        Self {
            name: name.into(),
            inner,
            delay: Duration::from_millis(delay_ms),
            fail_every: fail_every.filter(|&n| n > 0),
            seen: 0,
        }
    }
}

impl FrameConsumer for FaultInjector {
    fn setup(&mut self, sequence: &Sequence, meta: &Metadata) -> Result<(), ContractError> {
        self.seen = 0;
        self.inner.setup(sequence, meta)
    }

    fn frame(
        &mut self,
        image: &Image,
        event: &FrameEvent,
        meta: &Metadata,
    ) -> Result<(), ContractError> {
        self.seen += 1;
        if !self.delay.is_zero() {
            thread::sleep(self.delay);
        }
        if let Some(n) = self.fail_every {
            if self.seen % n == 0 {
                return Err(ContractError::consumer(
                    &self.name,
                    format!("injected failure at frame {}", self.seen),
                ));
            }
        }
        self.inner.frame(image, event, meta)
    }

    fn finish(&mut self, sequence: &Sequence, status: RunStatus) -> Result<(), ContractError> {
        self.inner.finish(sequence, status)
    }
}
