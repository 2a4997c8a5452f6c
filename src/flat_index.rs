//! Brute-force flat index: O(n) k-NN search, parallelized with rayon.

use std::cmp::Ordering;

use rayon::prelude::*;

use crate::distance::DistanceMetric;
use crate::error::{EngineError, Result};
use crate::index::Index;
use crate::vector::Vector;

/// Below this many vectors a sequential scan beats rayon's fork overhead.
const PARALLEL_SCAN_MIN: usize = 2048;

/// A flat (brute-force) index that computes distance to every stored vector.
#[derive(Debug)]
pub struct FlatIndex {
    vectors: Vec<(usize, Vector)>,
    metric: DistanceMetric,
}

fn by_distance_then_id(a: &(usize, f32), b: &(usize, f32)) -> Ordering {
    a.1.total_cmp(&b.1).then_with(|| a.0.cmp(&b.0))
}

impl FlatIndex {
    /// Create a new empty flat index with the given distance metric.
    pub fn new(metric: DistanceMetric) -> Self {
        Self::with_capacity(metric, 0)
    }

    pub fn with_capacity(metric: DistanceMetric, capacity: usize) -> Self {
        Self {
            vectors: Vec::with_capacity(capacity),
            metric,
        }
    }

    /// Iterate over all (id, vector) pairs in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (usize, &Vector)> {
        self.vectors.iter().map(|(id, v)| (*id, v))
    }

    fn score(&self, query: &Vector) -> Result<Vec<(usize, f32)>> {
        let distance = |(id, vector): &(usize, Vector)| -> Result<(usize, f32)> {
            Ok((*id, self.metric.distance(query, vector)?))
        };
        if self.vectors.len() >= PARALLEL_SCAN_MIN {
            self.vectors.par_iter().map(distance).collect()
        } else {
            self.vectors.iter().map(distance).collect()
        }
    }
}

impl Index for FlatIndex {
    fn add(&mut self, id: usize, vector: Vector) -> Result<()> {
        if let Some((_, first)) = self.vectors.first() {
            if !first.has_same_dimension(&vector) {
                return Err(EngineError::DimensionMismatch {
                    expected: first.dimension(),
                    actual: vector.dimension(),
                });
            }
        }
        self.vectors.push((id, vector));
        Ok(())
    }

    fn search(&self, query: &Vector, k: usize) -> Result<Vec<(usize, f32)>> {
        if k == 0 {
            return Ok(Vec::new());
        }
        let mut results = self.score(query)?;

        if k < results.len() {
            results.select_nth_unstable_by(k - 1, by_distance_then_id);
            results.truncate(k);
        }
        results.sort_unstable_by(by_distance_then_id);
        Ok(results)
    }

    fn metric(&self) -> DistanceMetric {
        self.metric
    }

    fn len(&self) -> usize {
        self.vectors.len()
    }
}
