//! Serialization utilities: bincode for records, JSON for the manifest.

use crate::distance::DistanceMetric;
use crate::error::{EngineError, Result};
use crate::record::VectorRecord;
use serde::{Deserialize, Serialize};

/// Bumped whenever the on-disk layout changes incompatibly.
pub const FORMAT_VERSION: u32 = 1;

/// Full point-in-time image of the record store.
///
/// Self-describing: carries the dimensionality and metric so a reload needs
/// nothing but the file itself.
#[derive(Debug, Serialize, Deserialize)]
pub struct StoreImage {
    pub format_version: u32,
    pub dimension: Option<usize>,
    pub metric: DistanceMetric,
    /// Highest sequence number folded into this image.
    pub last_seq: u64,
    pub records: Vec<VectorRecord>,
}

/// Human-readable summary written next to the image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    pub format_version: u32,
    pub dimension: Option<usize>,
    pub metric: DistanceMetric,
    pub record_count: usize,
    pub last_seq: u64,
}

/// Encode data to bincode bytes.
pub fn to_bincode<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    bincode::serialize(value).map_err(|e| EngineError::Serialization(e.to_string()))
}

/// Decode data from bincode bytes.
pub fn from_bincode<'a, T: Deserialize<'a>>(bytes: &'a [u8]) -> Result<T> {
    bincode::deserialize(bytes).map_err(|e| EngineError::Serialization(e.to_string()))
}

/// Encode data to pretty-printed JSON bytes.
pub fn to_json<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    serde_json::to_vec_pretty(value).map_err(|e| EngineError::Serialization(e.to_string()))
}

/// Decode data from JSON bytes.
pub fn from_json<'a, T: Deserialize<'a>>(bytes: &'a [u8]) -> Result<T> {
    serde_json::from_slice(bytes).map_err(|e| EngineError::Serialization(e.to_string()))
}
