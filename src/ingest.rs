//! Ingestion pipeline: validate, write through the store, enqueue a delta.

use std::sync::Arc;

use tracing::debug;

use crate::distance::DistanceMetric;
use crate::error::{EngineError, Result};
use crate::manager::{DeltaOp, IndexManager};
use crate::metadata::Metadata;
use crate::record::validate_id;
use crate::stats::EngineStats;
use crate::storage::RecordStore;
use crate::vector::Vector;

/// One item of a batch ingest.
#[derive(Debug, Clone)]
pub struct IngestItem {
    pub id: String,
    pub vector: Vector,
    pub metadata: Metadata,
}

impl IngestItem {
    pub fn new(id: impl Into<String>, vector: impl Into<Vector>, metadata: Metadata) -> Self {
        Self {
            id: id.into(),
            vector: vector.into(),
            metadata,
        }
    }
}

pub struct IngestPipeline {
    store: Arc<RecordStore>,
    manager: Arc<IndexManager>,
    stats: Arc<EngineStats>,
    normalize: bool,
}

impl IngestPipeline {
    pub fn new(
        store: Arc<RecordStore>,
        manager: Arc<IndexManager>,
        stats: Arc<EngineStats>,
        normalize: bool,
    ) -> Self {
        Self {
            store,
            manager,
            stats,
            normalize,
        }
    }

    /// Validate one item against `expected` dimensionality and return the
    /// vector as it will be stored.
    fn prepare(&self, id: &str, vector: Vector, metadata: &Metadata, expected: Option<usize>) -> Result<Vector> {
        validate_id(id)?;
        if let Some(expected) = expected {
            if vector.dimension() != expected {
                return Err(EngineError::DimensionMismatch {
                    expected,
                    actual: vector.dimension(),
                });
            }
        }
        vector.validate()?;
        metadata.validate()?;

        let metric = self.store.metric();
        if metric.rejects_zero_vectors() && vector.is_zero() {
            return Err(EngineError::InvalidVector {
                reason: format!("zero vector has no direction under {} distance", metric),
            });
        }
        if self.normalize && !vector.is_zero() {
            return vector.normalized();
        }
        Ok(vector)
    }

    /// Validate and store one record. Returns its new version.
    ///
    /// Re-ingesting an identical vector and metadata still bumps the version
    /// but enqueues no delta, so search results do not change.
    pub fn ingest(&self, id: &str, vector: Vector, metadata: Metadata) -> Result<u64> {
        let vector = self.prepare(id, vector, &metadata, self.store.dimension())?;
        self.commit(id, vector, metadata)
    }

    /// Validate every item, then store them in order.
    ///
    /// A validation failure rejects the whole batch before anything is
    /// written. A storage failure midway leaves the earlier items stored.
    pub fn ingest_batch(&self, items: Vec<IngestItem>) -> Result<Vec<u64>> {
        let mut expected = self.store.dimension();
        let mut prepared = Vec::with_capacity(items.len());
        for item in items {
            let dimension = item.vector.dimension();
            let vector = self.prepare(&item.id, item.vector, &item.metadata, expected)?;
            expected.get_or_insert(dimension);
            prepared.push((item.id, vector, item.metadata));
        }

        let versions = prepared
            .into_iter()
            .map(|(id, vector, metadata)| self.commit(&id, vector, metadata))
            .collect::<Result<Vec<_>>>()?;
        debug!(count = versions.len(), "ingested batch");
        Ok(versions)
    }

    fn commit(&self, id: &str, vector: Vector, metadata: Metadata) -> Result<u64> {
        let outcome = self.store.put(id, vector, metadata)?;
        self.stats.record_ingest();
        if outcome.changed {
            self.manager.notify(DeltaOp::Upsert(outcome.record));
        } else {
            debug!(id, version = outcome.version, "unchanged re-ingest");
        }
        Ok(outcome.version)
    }

    /// Remove `id`. Returns false when it was not present.
    pub fn remove(&self, id: &str) -> Result<bool> {
        match self.store.delete(id) {
            Ok(seq) => {
                self.stats.record_remove();
                self.manager.notify(DeltaOp::Delete {
                    id: id.to_string(),
                    seq,
                });
                Ok(true)
            }
            Err(EngineError::NotFound { .. }) => Ok(false),
            Err(err) => Err(err),
        }
    }

    pub fn metric(&self) -> DistanceMetric {
        self.store.metric()
    }
}
