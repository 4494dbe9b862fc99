//! RelayConfig - Config Loader output
//!
//! Describes one relay run: ring buffer sizing, dispatch policy, the
//! synthetic acquisition to drive, and the consumers to attach.

use serde::{Deserialize, Serialize};

use crate::{DType, RunPolicy};

/// Configuration version
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ConfigVersion {
    #[default]
    V1,
}

/// Complete relay configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayConfig {
    /// Configuration version
    #[serde(default)]
    pub version: ConfigVersion,

    /// Ring buffer sizing
    #[serde(default)]
    pub buffer: BufferConfig,

    /// Dispatch policy
    #[serde(default)]
    pub policy: RunPolicy,

    /// Frames to produce
    pub acquisition: AcquisitionConfig,

    /// Consumers, in registration order
    #[serde(default)]
    pub consumers: Vec<ConsumerConfig>,
}

/// Ring buffer configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BufferConfig {
    /// Pool size in MiB
    #[serde(default = "default_size_mb")]
    pub size_mb: usize,

    /// Evict the oldest unread frames when full
    #[serde(default = "default_overwrite")]
    pub overwrite_on_overflow: bool,
}

fn default_size_mb() -> usize {
    256
}

fn default_overwrite() -> bool {
    true
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            size_mb: default_size_mb(),
            overwrite_on_overflow: default_overwrite(),
        }
    }
}

impl BufferConfig {
    /// Pool size in bytes
    pub fn size_bytes(&self) -> usize {
        self.size_mb.saturating_mul(1024 * 1024)
    }
}

/// Synthetic acquisition parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AcquisitionConfig {
    /// Number of frames to produce
    pub frames: u64,

    /// Frame width in pixels
    pub width: usize,

    /// Frame height in pixels
    pub height: usize,

    /// Pixel type
    #[serde(default)]
    pub dtype: DType,

    /// Delay between frames in milliseconds (0 = as fast as possible)
    #[serde(default)]
    pub interval_ms: u64,
}

impl AcquisitionConfig {
    /// Bytes per frame, `None` on overflow
    pub fn frame_bytes(&self) -> Option<usize> {
        self.dtype.frame_bytes(&[self.height, self.width])
    }
}

/// Built-in consumer kinds the CLI can attach
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsumerKind {
    /// Logs a summary of every frame
    #[default]
    Log,
    /// Re-broadcasts frames to passive subscribers
    Relay,
    /// Accepts and discards frames
    Null,
}

/// Consumer registration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsumerConfig {
    /// Unique consumer name
    pub name: String,

    /// Consumer kind
    #[serde(default)]
    pub kind: ConsumerKind,

    /// Critical consumers may cancel or fail the run
    #[serde(default)]
    pub critical: bool,

    /// Simulated per-frame processing time in milliseconds
    #[serde(default)]
    pub delay_ms: u64,

    /// Simulate a failure on every n-th frame
    #[serde(default)]
    pub fail_every: Option<u64>,
}
