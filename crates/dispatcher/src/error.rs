//! Dispatcher error types

use contracts::{ContractError, RunReport};
use thiserror::Error;

use crate::dispatcher::DispatcherState;

/// Dispatcher-specific errors
#[derive(Debug, Error)]
pub enum DispatcherError {
    /// Consumer queue full under the `fail` backpressure policy
    #[error("queue full for consumer '{consumer}' (capacity {capacity})")]
    QueueFull { consumer: String, capacity: usize },

    /// A critical consumer's `setup` failed under the `raise` policy
    #[error("setup failed for consumer '{consumer}': {source}")]
    ConsumerSetup {
        consumer: String,
        #[source]
        source: ContractError,
    },

    /// A critical consumer failed during the run under the `raise` policy.
    ///
    /// Surfaced by `close` after every consumer was finished; carries the
    /// final report.
    #[error("consumer '{consumer}' failed: {source}")]
    ConsumerFailed {
        consumer: String,
        #[source]
        source: ContractError,
        report: Box<RunReport>,
    },

    /// Two consumers registered under the same name
    #[error("consumer '{name}' is already registered")]
    DuplicateConsumer { name: String },

    /// Operation not valid in the current lifecycle state
    #[error("cannot {operation} while dispatcher is {state}")]
    InvalidState {
        operation: &'static str,
        state: DispatcherState,
    },

    /// Worker thread could not be spawned
    #[error("failed to spawn worker for consumer '{consumer}': {source}")]
    WorkerSpawn {
        consumer: String,
        #[source]
        source: std::io::Error,
    },
}

impl DispatcherError {
    /// Create a queue full error
    pub fn queue_full(consumer: impl Into<String>, capacity: usize) -> Self {
        Self::QueueFull {
            consumer: consumer.into(),
            capacity,
        }
    }

    /// Create an invalid state error
    pub fn invalid_state(operation: &'static str, state: DispatcherState) -> Self {
        Self::InvalidState { operation, state }
    }

    /// Name of the consumer involved, if any
    pub fn consumer(&self) -> Option<&str> {
        match self {
            Self::QueueFull { consumer, .. }
            | Self::ConsumerSetup { consumer, .. }
            | Self::ConsumerFailed { consumer, .. }
            | Self::WorkerSpawn { consumer, .. } => Some(consumer),
            Self::DuplicateConsumer { name } => Some(name),
            Self::InvalidState { .. } => None,
        }
    }

    /// Final report, for failures surfaced at close
    pub fn report(&self) -> Option<&RunReport> {
        match self {
            Self::ConsumerFailed { report, .. } => Some(report),
            _ => None,
        }
    }
}
