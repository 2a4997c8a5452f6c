//! HNSW (Hierarchical Navigable Small World) index module.

pub mod graph;
pub mod neighbor_queue;

pub use graph::{HnswGraph, HnswParams};

use crate::distance::DistanceMetric;
use crate::error::Result;
use crate::index::Index;
use crate::vector::Vector;

/// An HNSW-based approximate nearest neighbor index.
#[derive(Debug)]
pub struct HnswIndex {
    graph: HnswGraph,
}

impl HnswIndex {
    /// Create a new HNSW index with the given metric and default parameters.
    pub fn new(metric: DistanceMetric) -> Self {
        Self::with_params(metric, HnswParams::default())
    }

    /// Create a new HNSW index with custom parameters.
    pub fn with_params(metric: DistanceMetric, params: HnswParams) -> Self {
        Self {
            graph: HnswGraph::new(metric, params),
        }
    }

    /// Search with a specific ef value for runtime tuning.
    pub fn search_with_ef(&self, query: &Vector, k: usize, ef: usize) -> Result<Vec<(usize, f32)>> {
        let results = self.graph.search_knn(query, k, ef)?;
        Ok(results.into_iter().map(|n| (n.id, n.distance)).collect())
    }

    pub fn params(&self) -> &HnswParams {
        self.graph.params()
    }
}

impl Index for HnswIndex {
    fn add(&mut self, id: usize, vector: Vector) -> Result<()> {
        self.graph.insert(id, vector)
    }

    fn search(&self, query: &Vector, k: usize) -> Result<Vec<(usize, f32)>> {
        self.search_with_ef(query, k, self.graph.params().ef_search)
    }

    fn metric(&self) -> DistanceMetric {
        self.graph.metric()
    }

    fn len(&self) -> usize {
        self.graph.len()
    }
}
