//! Per-consumer counters shared between the dispatcher and a worker

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use contracts::{CapturedError, ConsumerReport, ContractError};
use parking_lot::Mutex;

/// Counters and captured errors for a single consumer
#[derive(Debug, Default)]
pub struct ConsumerMetrics {
    /// Frames offered to the consumer
    submitted: AtomicU64,
    /// Frames delivered to `frame()`, successful or not
    processed: AtomicU64,
    /// Frames discarded by backpressure
    dropped: AtomicU64,
    disconnected: AtomicBool,
    errors: Mutex<Vec<CapturedError>>,
    /// First failure to surface at close (critical + raise)
    deferred: Mutex<Option<ContractError>>,
}

impl ConsumerMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn submitted(&self) -> u64 {
        self.submitted.load(Ordering::Relaxed)
    }

    pub fn inc_submitted(&self) {
        self.submitted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn processed(&self) -> u64 {
        self.processed.load(Ordering::Relaxed)
    }

    pub fn inc_processed(&self) {
        self.processed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn inc_dropped(&self) {
        self.dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn is_disconnected(&self) -> bool {
        self.disconnected.load(Ordering::Acquire)
    }

    pub fn mark_disconnected(&self) {
        self.disconnected.store(true, Ordering::Release);
    }

    pub fn error_count(&self) -> usize {
        self.errors.lock().len()
    }

    pub fn record_error(&self, error: CapturedError) {
        self.errors.lock().push(error);
    }

    /// Keep `error` for close, unless an earlier one is already kept
    pub fn defer(&self, error: ContractError) {
        let mut deferred = self.deferred.lock();
        if deferred.is_none() {
            *deferred = Some(error);
        }
    }

    pub fn take_deferred(&self) -> Option<ContractError> {
        self.deferred.lock().take()
    }

    /// Get snapshot of the counters
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            submitted: self.submitted(),
            processed: self.processed(),
            dropped: self.dropped(),
            errors: self.error_count(),
            disconnected: self.is_disconnected(),
        }
    }

    /// Freeze into a report entry
    pub fn to_report(&self, name: &str, critical: bool) -> ConsumerReport {
        ConsumerReport {
            name: name.to_string(),
            critical,
            submitted: self.submitted(),
            processed: self.processed(),
            dropped: self.dropped(),
            disconnected: self.is_disconnected(),
            errors: self.errors.lock().clone(),
        }
    }
}

/// Snapshot of consumer counters (for progress reporting)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub submitted: u64,
    pub processed: u64,
    pub dropped: u64,
    pub errors: usize,
    pub disconnected: bool,
}
