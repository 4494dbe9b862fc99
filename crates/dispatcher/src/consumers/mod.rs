//! Bundled consumers
//!
//! Contains LogConsumer, NullConsumer, SignalRelay and LegacyAdapter.

mod legacy;
mod log;
mod null;
mod relay;

pub use self::legacy::{FrameCallback, LegacyAdapter};
pub use self::log::LogConsumer;
pub use self::null::NullConsumer;
pub use self::relay::{RelayEvent, SignalRelay};
