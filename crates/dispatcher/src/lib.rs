//! # Dispatcher
//!
//! 帧分发模块。
//!
//! 负责：
//! - 将同一帧流 fan-out 到多个 consumer
//! - 每个 consumer 独立队列与 worker 线程，隔离慢 consumer
//! - 按 RunPolicy 处理背压与 consumer 故障
//! - 运行结束时生成 RunReport

pub mod consumers;
pub mod dispatcher;
pub mod error;
mod handle;
pub mod metrics;

pub use consumers::{FrameCallback, LegacyAdapter, LogConsumer, NullConsumer, RelayEvent, SignalRelay};
pub use contracts::{ConsumerSpec, FrameConsumer, RunPolicy, RunReport};
pub use dispatcher::{DispatcherState, FrameDispatcher, QueueStatus};
pub use error::DispatcherError;
pub use metrics::{ConsumerMetrics, MetricsSnapshot};
