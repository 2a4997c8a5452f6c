//! HNSW graph: core data structures and algorithms.
//!
//! Implements the Hierarchical Navigable Small World graph from:
//! "Efficient and robust approximate nearest neighbor search using
//!  Hierarchical Navigable Small World graphs" (Malkov & Yashunin, 2016/2018).
//!
//! Graphs here are built once per snapshot and never mutated afterwards,
//! so node ids are dense and there is no deletion path.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashSet};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::distance::DistanceMetric;
use crate::error::{EngineError, Result};
use crate::vector::Vector;

use super::neighbor_queue::{Neighbor, ResultSet};

/// Configuration parameters for the HNSW index.
///
/// `ef_search` trades recall for latency: larger values visit more of the
/// graph per query, raising recall toward the exact result at higher cost.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HnswParams {
    /// Links selected per node on layers above 0.
    pub m: usize,
    /// Max connections at layer 0 (typically 2 * m).
    pub m_max0: usize,
    /// Number of candidates during construction.
    pub ef_construction: usize,
    /// Number of candidates during search.
    pub ef_search: usize,
    /// Maximum number of layers.
    pub max_layers: usize,
    /// Seed for level generation, so equal inputs build equal graphs.
    pub seed: u64,
}

impl Default for HnswParams {
    fn default() -> Self {
        Self::new(16, 200, 50)
    }
}

impl HnswParams {
    pub fn new(m: usize, ef_construction: usize, ef_search: usize) -> Self {
        Self {
            m,
            m_max0: 2 * m,
            ef_construction,
            ef_search,
            max_layers: 16,
            seed: 0x5eed,
        }
    }

    /// Level generation factor: 1 / ln(m).
    pub fn level_factor(&self) -> f64 {
        1.0 / (self.m as f64).ln()
    }

    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.m < 2 {
            return Err("hnsw m must be at least 2".to_string());
        }
        if self.m_max0 < self.m {
            return Err("hnsw m_max0 must be at least m".to_string());
        }
        if self.ef_construction < self.m {
            return Err("hnsw ef_construction must be at least m".to_string());
        }
        if self.ef_search == 0 || self.max_layers == 0 {
            return Err("hnsw ef_search and max_layers must be positive".to_string());
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
struct HnswNode {
    vector: Vector,
    /// links[l] holds neighbor ids on layer l; len() is the node's level + 1.
    links: Vec<Vec<usize>>,
}

/// The HNSW graph structure.
#[derive(Debug)]
pub struct HnswGraph {
    nodes: Vec<HnswNode>,
    entry_point: Option<usize>,
    max_level: usize,
    params: HnswParams,
    metric: DistanceMetric,
    rng: StdRng,
}

impl HnswGraph {
    pub fn new(metric: DistanceMetric, params: HnswParams) -> Self {
        Self {
            nodes: Vec::new(),
            entry_point: None,
            max_level: 0,
            rng: StdRng::seed_from_u64(params.seed),
            params,
            metric,
        }
    }

    pub fn metric(&self) -> DistanceMetric {
        self.metric
    }

    pub fn params(&self) -> &HnswParams {
        &self.params
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn get_vector(&self, id: usize) -> Option<&Vector> {
        self.nodes.get(id).map(|n| &n.vector)
    }

    fn random_level(&mut self) -> usize {
        // (0, 1] so ln never sees zero
        let r = 1.0 - self.rng.gen::<f64>();
        let level = (-r.ln() * self.params.level_factor()).floor() as usize;
        level.min(self.params.max_layers - 1)
    }

    fn distance(&self, query: &Vector, node_id: usize) -> Result<f32> {
        self.metric.distance(query, &self.nodes[node_id].vector)
    }

    /// SEARCH-LAYER (Algorithm 2): the `ef` closest nodes to `query` on one
    /// layer, reachable from `entry`.
    fn search_layer(
        &self,
        query: &Vector,
        entry: Neighbor,
        ef: usize,
        layer: usize,
    ) -> Result<Vec<Neighbor>> {
        let mut visited = HashSet::from([entry.id]);
        let mut candidates = BinaryHeap::from([Reverse(entry)]);
        let mut results = ResultSet::new(ef);
        results.push(entry);

        while let Some(Reverse(current)) = candidates.pop() {
            if current.distance > results.furthest() {
                break;
            }

            let Some(links) = self.nodes[current.id].links.get(layer) else {
                continue;
            };
            for &neighbor_id in links {
                if !visited.insert(neighbor_id) {
                    continue;
                }
                let dist = self.distance(query, neighbor_id)?;
                if !results.is_full() || dist < results.furthest() {
                    let n = Neighbor::new(neighbor_id, dist);
                    candidates.push(Reverse(n));
                    results.push(n);
                }
            }
        }

        Ok(results.into_sorted_vec())
    }

    /// Greedy ef=1 descent through layers `(to, from]`.
    fn descend(&self, query: &Vector, mut nearest: Neighbor, from: usize, to: usize) -> Result<Neighbor> {
        for layer in (to + 1..=from).rev() {
            if let Some(&closer) = self.search_layer(query, nearest, 1, layer)?.first() {
                nearest = closer;
            }
        }
        Ok(nearest)
    }

    /// Trim a node's links on `layer` to its `cap` closest neighbors.
    fn prune(&mut self, node_id: usize, layer: usize, cap: usize) -> Result<()> {
        let node = &self.nodes[node_id];
        let mut scored = node.links[layer]
            .iter()
            .map(|&nid| {
                let dist = self.metric.distance(&node.vector, &self.nodes[nid].vector)?;
                Ok(Neighbor::new(nid, dist))
            })
            .collect::<Result<Vec<_>>>()?;
        scored.sort();
        scored.truncate(cap);
        self.nodes[node_id].links[layer] = scored.into_iter().map(|n| n.id).collect();
        Ok(())
    }

    /// INSERT (Algorithm 1). Ids must be assigned densely from zero.
    pub fn insert(&mut self, id: usize, vector: Vector) -> Result<()> {
        if id != self.nodes.len() {
            return Err(EngineError::Index(format!(
                "hnsw node ids must be dense: expected {}, got {}",
                self.nodes.len(),
                id
            )));
        }
        if let Some(first) = self.nodes.first() {
            if !first.vector.has_same_dimension(&vector) {
                return Err(EngineError::DimensionMismatch {
                    expected: first.vector.dimension(),
                    actual: vector.dimension(),
                });
            }
        }

        let level = self.random_level();
        self.nodes.push(HnswNode {
            vector,
            links: vec![Vec::new(); level + 1],
        });

        let Some(entry_point) = self.entry_point else {
            self.entry_point = Some(id);
            self.max_level = level;
            return Ok(());
        };

        let query = self.nodes[id].vector.clone();
        let start = Neighbor::new(entry_point, self.distance(&query, entry_point)?);
        let mut entry = self.descend(&query, start, self.max_level, level)?;

        for layer in (0..=level.min(self.max_level)).rev() {
            let found = self.search_layer(&query, entry, self.params.ef_construction, layer)?;
            let cap = if layer == 0 {
                self.params.m_max0
            } else {
                self.params.m
            };

            let selected: Vec<usize> = found
                .iter()
                .filter(|n| n.id != id)
                .take(self.params.m)
                .map(|n| n.id)
                .collect();

            for &neighbor_id in &selected {
                let over_capacity = match self.nodes[neighbor_id].links.get_mut(layer) {
                    Some(links) => {
                        links.push(id);
                        links.len() > cap
                    }
                    None => false,
                };
                if over_capacity {
                    self.prune(neighbor_id, layer, cap)?;
                }
            }
            self.nodes[id].links[layer] = selected;

            if let Some(&closest) = found.first() {
                entry = closest;
            }
        }

        if level > self.max_level {
            self.entry_point = Some(id);
            self.max_level = level;
        }
        Ok(())
    }

    /// K-NN-SEARCH (Algorithm 5) with `ef` candidates on layer 0.
    pub fn search_knn(&self, query: &Vector, k: usize, ef: usize) -> Result<Vec<Neighbor>> {
        let Some(entry_point) = self.entry_point else {
            return Ok(Vec::new());
        };
        if k == 0 {
            return Ok(Vec::new());
        }

        let start = Neighbor::new(entry_point, self.distance(query, entry_point)?);
        let nearest = self.descend(query, start, self.max_level, 0)?;

        // the beam can never hold more than every node
        let ef = ef.max(k).min(self.len());
        let mut results = self.search_layer(query, nearest, ef, 0)?;
        results.truncate(k);
        Ok(results)
    }
}
