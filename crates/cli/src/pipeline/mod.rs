//! Pipeline orchestration module.

mod fault;
mod orchestrator;
mod stats;

pub use fault::FaultInjector;
pub use orchestrator::{Pipeline, PipelineConfig};
pub use stats::PipelineStats;
