//! RunReport - Dispatcher output
//!
//! Per-consumer counters and captured errors, frozen at `close`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Terminal status of a run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    #[default]
    Completed,
    Canceled,
    Failed,
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RunStatus::Completed => "completed",
            RunStatus::Canceled => "canceled",
            RunStatus::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Consumer callback in which an error was captured
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorPhase {
    Setup,
    Frame,
    Finish,
}

/// One captured consumer error
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapturedError {
    pub phase: ErrorPhase,
    pub message: String,
    /// Submission sequence number of the frame, for `Frame` errors
    #[serde(skip_serializing_if = "Option::is_none")]
    pub frame: Option<u64>,
    pub at: DateTime<Utc>,
}

impl CapturedError {
    pub fn new(phase: ErrorPhase, message: impl Into<String>, frame: Option<u64>) -> Self {
        Self {
            phase,
            message: message.into(),
            frame,
            at: Utc::now(),
        }
    }
}

/// Counters for one consumer
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConsumerReport {
    pub name: String,
    pub critical: bool,
    /// Frames offered to this consumer
    pub submitted: u64,
    /// Frames delivered to `frame()` (including ones that errored)
    pub processed: u64,
    /// Frames discarded by backpressure
    pub dropped: u64,
    /// Whether the consumer was disconnected during the run
    pub disconnected: bool,
    /// Captured errors, in order
    pub errors: Vec<CapturedError>,
}

impl ConsumerReport {
    /// Frames neither processed nor dropped (e.g. discarded on disconnect)
    pub fn undelivered(&self) -> u64 {
        self.submitted
            .saturating_sub(self.processed)
            .saturating_sub(self.dropped)
    }
}

/// Report of one completed run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    pub status: RunStatus,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// One entry per registered consumer, in registration order
    pub consumers: Vec<ConsumerReport>,
}

impl RunReport {
    /// Look up a consumer's report by name
    pub fn consumer(&self, name: &str) -> Option<&ConsumerReport> {
        self.consumers.iter().find(|c| c.name == name)
    }

    /// Wall-clock duration of the run
    pub fn duration(&self) -> chrono::Duration {
        self.finished_at - self.started_at
    }

    pub fn total_submitted(&self) -> u64 {
        self.consumers.iter().map(|c| c.submitted).sum()
    }

    pub fn total_processed(&self) -> u64 {
        self.consumers.iter().map(|c| c.processed).sum()
    }

    pub fn total_dropped(&self) -> u64 {
        self.consumers.iter().map(|c| c.dropped).sum()
    }

    pub fn total_errors(&self) -> usize {
        self.consumers.iter().map(|c| c.errors.len()).sum()
    }
}
