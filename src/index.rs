//! Index strategies and the immutable snapshots they build.

use std::collections::HashSet;
use std::time::{Duration, Instant};

use crate::distance::DistanceMetric;
use crate::error::{EngineError, Result};
use crate::flat_index::FlatIndex;
use crate::hnsw::{HnswIndex, HnswParams};
use crate::record::VectorRecord;
use crate::vector::Vector;

/// A search index keyed by dense `usize` internal IDs.
///
/// Implementations use `usize` internal IDs for cache efficiency;
/// [`IndexSnapshot`] handles the mapping back to record ids.
pub trait Index {
    /// Add a vector with the given internal ID.
    fn add(&mut self, id: usize, vector: Vector) -> Result<()>;

    /// Search for the `k` nearest neighbors of `query`.
    /// Returns `(id, distance)` pairs sorted by distance ascending, ties by id.
    fn search(&self, query: &Vector, k: usize) -> Result<Vec<(usize, f32)>>;

    /// The distance metric used by this index.
    fn metric(&self) -> DistanceMetric;

    /// The number of vectors in this index.
    fn len(&self) -> usize;

    /// Whether the index is empty.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Which index strategy snapshot builds use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexKind {
    /// Brute-force scan; always returns the true top-k.
    Exact,
    /// HNSW graph; recall is governed by `HnswParams::ef_search`.
    Hnsw(HnswParams),
}

impl Default for IndexKind {
    fn default() -> Self {
        IndexKind::Exact
    }
}

impl IndexKind {
    pub fn name(&self) -> &'static str {
        match self {
            IndexKind::Exact => "exact",
            IndexKind::Hnsw(_) => "hnsw",
        }
    }

    /// Build a snapshot over `records`. Never mutates the inputs.
    ///
    /// Records are laid out in id order, so internal ids order the same way
    /// as record ids and index-level tie-breaks match id tie-breaks.
    pub fn build<'a, I>(&self, records: I, metric: DistanceMetric) -> Result<IndexSnapshot>
    where
        I: IntoIterator<Item = &'a VectorRecord>,
    {
        let mut records: Vec<&VectorRecord> = records.into_iter().collect();
        records.sort_by(|a, b| a.id.cmp(&b.id));

        let dimension = records.first().map(|r| r.dimension());
        let mut seen = HashSet::with_capacity(records.len());
        for record in &records {
            if !seen.insert(record.id.as_str()) {
                return Err(EngineError::Index(format!("duplicate record id '{}'", record.id)));
            }
            if let Some(expected) = dimension {
                if record.dimension() != expected {
                    return Err(EngineError::DimensionMismatch {
                        expected,
                        actual: record.dimension(),
                    });
                }
            }
        }

        let watermark = records.iter().map(|r| r.version).max().unwrap_or(0);
        let ids: Vec<String> = records.iter().map(|r| r.id.clone()).collect();
        let vectors = records.into_iter().map(|r| r.vector.clone());

        let index = match self {
            IndexKind::Exact => {
                let mut index = FlatIndex::with_capacity(metric, ids.len());
                fill(&mut index, vectors)?;
                BuiltIndex::Exact(index)
            }
            IndexKind::Hnsw(params) => {
                let mut index = HnswIndex::with_params(metric, *params);
                fill(&mut index, vectors)?;
                BuiltIndex::Hnsw(index)
            }
        };

        Ok(IndexSnapshot {
            index,
            ids,
            metric,
            dimension,
            watermark,
            built_at: Instant::now(),
            generation: 0,
        })
    }
}

fn fill(index: &mut impl Index, vectors: impl Iterator<Item = Vector>) -> Result<()> {
    for (internal_id, vector) in vectors.enumerate() {
        index.add(internal_id, vector)?;
    }
    Ok(())
}

#[derive(Debug)]
enum BuiltIndex {
    Exact(FlatIndex),
    Hnsw(HnswIndex),
}

impl BuiltIndex {
    fn as_index(&self) -> &dyn Index {
        match self {
            BuiltIndex::Exact(index) => index,
            BuiltIndex::Hnsw(index) => index,
        }
    }
}

/// One scored result from a snapshot search.
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub id: String,
    pub distance: f32,
}

/// An immutable, queryable index over a point-in-time set of records.
#[derive(Debug)]
pub struct IndexSnapshot {
    index: BuiltIndex,
    ids: Vec<String>,
    metric: DistanceMetric,
    dimension: Option<usize>,
    watermark: u64,
    built_at: Instant,
    generation: u64,
}

impl IndexSnapshot {
    /// The `k` nearest records to `query`, ordered by distance then id.
    pub fn search(&self, query: &Vector, k: usize) -> Result<Vec<Candidate>> {
        if k == 0 || self.ids.is_empty() {
            return Ok(Vec::new());
        }
        if let Some(expected) = self.dimension {
            if query.dimension() != expected {
                return Err(EngineError::DimensionMismatch {
                    expected,
                    actual: query.dimension(),
                });
            }
        }

        let hits = self.index.as_index().search(query, k.min(self.ids.len()))?;
        Ok(hits
            .into_iter()
            .filter_map(|(internal_id, distance)| {
                self.ids.get(internal_id).map(|id| Candidate {
                    id: id.clone(),
                    distance,
                })
            })
            .collect())
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.ids.binary_search_by(|probe| probe.as_str().cmp(id)).is_ok()
    }

    pub fn metric(&self) -> DistanceMetric {
        self.metric
    }

    pub fn dimension(&self) -> Option<usize> {
        self.dimension
    }

    /// Highest store sequence number this snapshot reflects.
    pub fn watermark(&self) -> u64 {
        self.watermark
    }

    pub fn age(&self) -> Duration {
        self.built_at.elapsed()
    }

    /// Publish counter assigned by the index manager.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub(crate) fn with_watermark(mut self, watermark: u64) -> Self {
        self.watermark = self.watermark.max(watermark);
        self
    }

    pub(crate) fn with_generation(mut self, generation: u64) -> Self {
        self.generation = generation;
        self
    }
}
