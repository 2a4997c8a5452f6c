//! The unit of storage: an identified vector with its metadata and version.

use crate::error::{EngineError, Result};
use crate::metadata::Metadata;
use crate::vector::Vector;
use serde::{Deserialize, Serialize};

/// Maximum length in bytes of a record id.
pub const MAX_ID_LEN: usize = 512;

/// A stored embedding.
///
/// `version` is the store-wide sequence number assigned by the write that
/// produced this record, so it strictly increases across successive writes
/// to the same id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorRecord {
    pub id: String,
    pub vector: Vector,
    pub metadata: Metadata,
    pub version: u64,
}

impl VectorRecord {
    pub fn new(id: impl Into<String>, vector: Vector, metadata: Metadata, version: u64) -> Self {
        Self {
            id: id.into(),
            vector,
            metadata,
            version,
        }
    }

    pub fn dimension(&self) -> usize {
        self.vector.dimension()
    }

    /// Whether `other` carries the same payload, ignoring versions.
    pub fn same_payload(&self, vector: &Vector, metadata: &Metadata) -> bool {
        &self.vector == vector && &self.metadata == metadata
    }
}

/// Check that an id is usable as a stable record key.
pub fn validate_id(id: &str) -> Result<()> {
    if id.is_empty() {
        return Err(EngineError::InvalidId {
            reason: "id must be non-empty".to_string(),
        });
    }
    if id.len() > MAX_ID_LEN {
        return Err(EngineError::InvalidId {
            reason: format!("id exceeds {} bytes", MAX_ID_LEN),
        });
    }
    if id.chars().any(char::is_control) {
        return Err(EngineError::InvalidId {
            reason: "id contains control characters".to_string(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_id() {
        assert!(validate_id("doc-1").is_ok());
        assert!(validate_id("").is_err());
        assert!(validate_id("bad\nid").is_err());
        assert!(validate_id(&"x".repeat(MAX_ID_LEN + 1)).is_err());
    }

    #[test]
    fn test_same_payload_ignores_version() {
        let v = Vector::new(vec![1.0, 2.0]);
        let m = Metadata::new().with("k", "v");
        let record = VectorRecord::new("a", v.clone(), m.clone(), 7);
        assert!(record.same_payload(&v, &m));
        assert!(!record.same_payload(&Vector::new(vec![1.0, 2.5]), &m));
        assert!(!record.same_payload(&v, &Metadata::new()));
    }
}
