//! Query engine: k-NN over the pinned snapshot, merged with the overlay,
//! post-filtered and joined with current store metadata.
//!
//! Vectors come from the pinned snapshot (or overlay) while metadata comes
//! from the store at join time, so a result may carry metadata newer than
//! the vector it was ranked by. Ids deleted since the snapshot was built
//! are dropped during the join.

use std::sync::Arc;
use std::time::Instant;

use tracing::debug;

use crate::error::{EngineError, Result};
use crate::index::Candidate;
use crate::manager::{IndexManager, IndexState};
use crate::metadata::{Filter, Metadata};
use crate::stats::EngineStats;
use crate::storage::RecordStore;
use crate::vector::Vector;

/// A k-NN request.
///
/// The filter runs after ranking, over `k + overfetch` candidates. A
/// selective filter can therefore return fewer than `k` hits; raise
/// `overfetch` when a full page matters more than latency.
#[derive(Debug, Clone)]
pub struct QueryRequest {
    pub vector: Vector,
    pub k: usize,
    pub filter: Option<Filter>,
    pub overfetch: usize,
}

impl QueryRequest {
    pub fn new(vector: impl Into<Vector>, k: usize) -> Self {
        Self {
            vector: vector.into(),
            k,
            filter: None,
            overfetch: 0,
        }
    }

    pub fn with_filter(mut self, filter: Filter) -> Self {
        self.filter = Some(filter);
        self
    }

    pub fn with_overfetch(mut self, overfetch: usize) -> Self {
        self.overfetch = overfetch;
        self
    }
}

/// One result row. Smaller `distance` is closer under every metric
/// (dot product is reported negated).
#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit {
    pub id: String,
    pub distance: f32,
    pub metadata: Metadata,
    pub version: u64,
}

#[derive(Debug, Clone)]
pub struct QueryResponse {
    pub hits: Vec<SearchHit>,
    pub state: IndexState,
    /// False when no snapshot was published yet; `hits` is then empty.
    pub ready: bool,
    /// Generation of the snapshot that served the query.
    pub generation: Option<u64>,
}

impl QueryResponse {
    pub fn ids(&self) -> Vec<&str> {
        self.hits.iter().map(|h| h.id.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.hits.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hits.is_empty()
    }
}

pub struct QueryEngine {
    store: Arc<RecordStore>,
    manager: Arc<IndexManager>,
    stats: Arc<EngineStats>,
}

impl QueryEngine {
    pub fn new(store: Arc<RecordStore>, manager: Arc<IndexManager>, stats: Arc<EngineStats>) -> Self {
        Self {
            store,
            manager,
            stats,
        }
    }

    fn validate(&self, request: &QueryRequest) -> Result<()> {
        if request.k == 0 {
            return Err(EngineError::InvalidK { k: request.k });
        }
        if let Some(expected) = self.store.dimension() {
            if request.vector.dimension() != expected {
                return Err(EngineError::DimensionMismatch {
                    expected,
                    actual: request.vector.dimension(),
                });
            }
        }
        request.vector.validate()?;
        if self.store.metric().rejects_zero_vectors() && request.vector.is_zero() {
            return Err(EngineError::InvalidVector {
                reason: format!("zero vector has no direction under {} distance", self.store.metric()),
            });
        }
        Ok(())
    }

    pub fn search(&self, request: &QueryRequest) -> Result<QueryResponse> {
        let started = Instant::now();
        self.validate(request)?;

        self.manager.wait_for_initial();
        let view = self.manager.view();
        let Some(snapshot) = view.snapshot.as_ref() else {
            self.stats.record_query(started.elapsed());
            return Ok(QueryResponse {
                hits: Vec::new(),
                state: self.manager.state(),
                ready: false,
                generation: None,
            });
        };

        let overlay = &view.overlay;
        // nothing beyond the snapshot plus the overlay can ever be ranked
        let budget = request
            .k
            .saturating_add(request.overfetch)
            .min(snapshot.len().saturating_add(overlay.len()));
        let mut candidates: Vec<Candidate> = snapshot
            .search(&request.vector, budget.saturating_add(overlay.len()))?
            .into_iter()
            .filter(|c| !overlay.shadows(&c.id))
            .collect();
        for record in overlay.upserts() {
            candidates.push(Candidate {
                id: record.id.clone(),
                distance: snapshot.metric().distance(&request.vector, &record.vector)?,
            });
        }
        candidates.sort_by(|a, b| a.distance.total_cmp(&b.distance).then_with(|| a.id.cmp(&b.id)));
        candidates.truncate(budget);

        let mut hits = Vec::with_capacity(request.k.min(candidates.len()));
        for candidate in candidates {
            let Some(record) = self.store.lookup(&candidate.id) else {
                continue;
            };
            if let Some(filter) = &request.filter {
                if !filter.matches(&record.metadata) {
                    continue;
                }
            }
            hits.push(SearchHit {
                id: candidate.id,
                distance: candidate.distance,
                metadata: record.metadata.clone(),
                version: record.version,
            });
            if hits.len() == request.k {
                break;
            }
        }

        let elapsed = started.elapsed();
        self.stats.record_query(elapsed);
        debug!(
            k = request.k,
            hits = hits.len(),
            generation = snapshot.generation(),
            overlay = overlay.len(),
            elapsed_us = elapsed.as_micros() as u64,
            "search"
        );

        Ok(QueryResponse {
            hits,
            state: self.manager.state(),
            ready: true,
            generation: Some(snapshot.generation()),
        })
    }
}
