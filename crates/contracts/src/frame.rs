//! Frame data model
//!
//! Images, acquisition events, sequences and the packet shared between
//! consumer queues.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::ContractError;

/// Arbitrary per-frame / per-run metadata
pub type Metadata = serde_json::Map<String, serde_json::Value>;

/// Pixel element type
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DType {
    U8,
    #[default]
    U16,
    U32,
    I8,
    I16,
    I32,
    F32,
    F64,
}

impl DType {
    /// Size of one element in bytes
    pub fn itemsize(self) -> usize {
        match self {
            DType::U8 | DType::I8 => 1,
            DType::U16 | DType::I16 => 2,
            DType::U32 | DType::I32 | DType::F32 => 4,
            DType::F64 => 8,
        }
    }

    /// Short lowercase name (`"u16"`, `"f32"`, ...)
    pub fn name(self) -> &'static str {
        match self {
            DType::U8 => "u8",
            DType::U16 => "u16",
            DType::U32 => "u32",
            DType::I8 => "i8",
            DType::I16 => "i16",
            DType::I32 => "i32",
            DType::F32 => "f32",
            DType::F64 => "f64",
        }
    }

    /// Number of bytes needed for `shape` elements of this type.
    ///
    /// Returns `None` on arithmetic overflow.
    pub fn frame_bytes(self, shape: &[usize]) -> Option<usize> {
        shape
            .iter()
            .try_fold(self.itemsize(), |acc, &dim| acc.checked_mul(dim))
    }
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Raw image bytes interpreted through a shape and an element type
#[derive(Debug, Clone, PartialEq)]
pub struct Image {
    /// Pixel bytes (row-major, native endian)
    pub data: Bytes,
    /// Dimensions, slowest-varying first
    pub shape: Vec<usize>,
    /// Element type
    pub dtype: DType,
}

impl Image {
    /// Create an image, checking that `data` matches `shape` x `dtype`
    pub fn new(data: Bytes, shape: Vec<usize>, dtype: DType) -> Result<Self, ContractError> {
        let expected = dtype.frame_bytes(&shape).ok_or_else(|| {
            ContractError::invalid_frame(format!("shape {shape:?} overflows usize"))
        })?;
        if data.len() != expected {
            return Err(ContractError::invalid_frame(format!(
                "expected {expected} bytes for {shape:?} {dtype}, got {}",
                data.len()
            )));
        }
        Ok(Self { data, shape, dtype })
    }

    /// Zero-filled image
    pub fn zeros(shape: Vec<usize>, dtype: DType) -> Self {
        let len = dtype.frame_bytes(&shape).unwrap_or(0);
        Self {
            data: Bytes::from(vec![0u8; len]),
            shape,
            dtype,
        }
    }

    /// Size of the pixel data in bytes
    #[inline]
    pub fn nbytes(&self) -> usize {
        self.data.len()
    }
}

/// One acquisition step as described by the acquisition engine
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FrameEvent {
    /// Position along each sequence axis (e.g. `t`, `p`, `c`, `z`)
    #[serde(default)]
    pub index: BTreeMap<String, usize>,

    /// Channel config name
    #[serde(default)]
    pub channel: Option<String>,

    /// Exposure in milliseconds
    #[serde(default)]
    pub exposure_ms: Option<f64>,

    /// Stage position (micrometres)
    #[serde(default)]
    pub x_pos: Option<f64>,
    #[serde(default)]
    pub y_pos: Option<f64>,
    #[serde(default)]
    pub z_pos: Option<f64>,

    /// Earliest start time relative to sequence start (seconds)
    #[serde(default)]
    pub min_start_time: Option<f64>,
}

impl FrameEvent {
    /// Event at the given axis index
    pub fn at<K, I>(index: I) -> Self
    where
        K: Into<String>,
        I: IntoIterator<Item = (K, usize)>,
    {
        Self {
            index: index.into_iter().map(|(k, v)| (k.into(), v)).collect(),
            ..Default::default()
        }
    }
}

/// Description of the acquisition being run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Sequence {
    /// Unique id of this run
    pub uid: String,

    /// Axis iteration order, outermost first
    #[serde(default)]
    pub axis_order: Vec<String>,

    /// Number of positions along each axis
    #[serde(default)]
    pub sizes: BTreeMap<String, usize>,

    /// Free-form sequence metadata
    #[serde(default)]
    pub metadata: Metadata,
}

impl Sequence {
    /// Empty sequence with the given uid
    pub fn new(uid: impl Into<String>) -> Self {
        Self {
            uid: uid.into(),
            ..Default::default()
        }
    }

    /// Append an axis with its size
    pub fn with_axis(mut self, axis: impl Into<String>, size: usize) -> Self {
        let axis = axis.into();
        self.sizes.insert(axis.clone(), size);
        self.axis_order.push(axis);
        self
    }

    /// Total number of events implied by `sizes`
    pub fn num_events(&self) -> usize {
        self.sizes.values().product()
    }
}

/// Frame as queued for consumers.
///
/// Shared by reference (`Arc<FramePacket>`) between all consumer queues.
#[derive(Debug, Clone)]
pub struct FramePacket {
    /// Submission sequence number (0-based, per run)
    pub seq: u64,
    pub image: Image,
    pub event: FrameEvent,
    pub meta: Metadata,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dtype_itemsize() {
        assert_eq!(DType::U8.itemsize(), 1);
        assert_eq!(DType::U16.itemsize(), 2);
        assert_eq!(DType::F32.itemsize(), 4);
        assert_eq!(DType::F64.itemsize(), 8);
    }

    #[test]
    fn test_frame_bytes() {
        assert_eq!(DType::U16.frame_bytes(&[512, 512]), Some(512 * 512 * 2));
        assert_eq!(DType::U8.frame_bytes(&[]), Some(1));
        assert_eq!(DType::U8.frame_bytes(&[usize::MAX, 2]), None);
    }

    #[test]
    fn test_image_size_check() {
        let ok = Image::new(Bytes::from(vec![0u8; 8]), vec![2, 2], DType::U16);
        assert!(ok.is_ok());

        let bad = Image::new(Bytes::from(vec![0u8; 7]), vec![2, 2], DType::U16);
        assert!(matches!(bad, Err(ContractError::InvalidFrame { .. })));
    }

    #[test]
    fn test_dtype_serde_lowercase() {
        let json = serde_json::to_string(&DType::F32).unwrap();
        assert_eq!(json, "\"f32\"");
        let parsed: DType = serde_json::from_str("\"u8\"").unwrap();
        assert_eq!(parsed, DType::U8);
    }

    #[test]
    fn test_sequence_builder() {
        let seq = Sequence::new("run-1").with_axis("t", 3).with_axis("c", 2);
        assert_eq!(seq.axis_order, vec!["t", "c"]);
        assert_eq!(seq.num_events(), 6);
    }
}
