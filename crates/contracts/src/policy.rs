//! RunPolicy - failure isolation and backpressure configuration

use serde::{Deserialize, Serialize};

/// Default queue capacity for critical consumers
pub const DEFAULT_CRITICAL_QUEUE: usize = 256;

/// Default queue capacity for non-critical observers
pub const DEFAULT_OBSERVER_QUEUE: usize = 16;

/// What happens when a critical consumer fails
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CriticalErrorPolicy {
    /// Defer the error and fail `close()` with it
    #[default]
    Raise,
    /// Record the error and ask the producer to stop (`should_cancel`)
    Cancel,
    /// Record the error and keep going
    Continue,
}

/// What happens when a non-critical consumer fails
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NoncriticalErrorPolicy {
    /// Record the error and keep delivering
    #[default]
    Log,
    /// Record the error and stop delivering to that consumer
    Disconnect,
}

/// What happens when a consumer queue is full
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackpressurePolicy {
    /// Return a queue-full error to the producer
    Fail,
    /// Discard the incoming frame
    DropNewest,
    /// Discard the oldest queued frame, then enqueue
    #[default]
    DropOldest,
}

/// Immutable policy for one run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunPolicy {
    pub critical_error: CriticalErrorPolicy,
    pub noncritical_error: NoncriticalErrorPolicy,
    pub backpressure: BackpressurePolicy,
    /// Queue capacity for critical consumers
    pub critical_queue: usize,
    /// Queue capacity for non-critical observers
    pub observer_queue: usize,
}

impl Default for RunPolicy {
    fn default() -> Self {
        Self {
            critical_error: CriticalErrorPolicy::default(),
            noncritical_error: NoncriticalErrorPolicy::default(),
            backpressure: BackpressurePolicy::default(),
            critical_queue: DEFAULT_CRITICAL_QUEUE,
            observer_queue: DEFAULT_OBSERVER_QUEUE,
        }
    }
}

impl RunPolicy {
    /// Queue capacity for a consumer of the given criticality
    #[inline]
    pub fn queue_capacity(&self, critical: bool) -> usize {
        if critical {
            self.critical_queue
        } else {
            self.observer_queue
        }
    }

    pub fn with_critical_error(mut self, policy: CriticalErrorPolicy) -> Self {
        self.critical_error = policy;
        self
    }

    pub fn with_noncritical_error(mut self, policy: NoncriticalErrorPolicy) -> Self {
        self.noncritical_error = policy;
        self
    }

    pub fn with_backpressure(mut self, policy: BackpressurePolicy) -> Self {
        self.backpressure = policy;
        self
    }

    pub fn with_queues(mut self, critical_queue: usize, observer_queue: usize) -> Self {
        self.critical_queue = critical_queue;
        self.observer_queue = observer_queue;
        self
    }
}
