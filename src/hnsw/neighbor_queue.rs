//! Totally ordered neighbor entries and the bounded result set used by
//! HNSW layer search.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

/// A node id paired with its distance to the current query.
#[derive(Debug, Clone, Copy)]
pub struct Neighbor {
    pub id: usize,
    pub distance: f32,
}

impl Neighbor {
    pub fn new(id: usize, distance: f32) -> Self {
        Self { id, distance }
    }
}

impl PartialEq for Neighbor {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Neighbor {}

impl PartialOrd for Neighbor {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

// Ascending distance, ties broken by id.
impl Ord for Neighbor {
    fn cmp(&self, other: &Self) -> Ordering {
        self.distance
            .total_cmp(&other.distance)
            .then_with(|| self.id.cmp(&other.id))
    }
}

const PREALLOC_LIMIT: usize = 1024;

/// The `ef` closest neighbors seen so far, furthest on top.
pub struct ResultSet {
    heap: BinaryHeap<Neighbor>,
    limit: usize,
}

impl ResultSet {
    pub fn new(limit: usize) -> Self {
        Self {
            heap: BinaryHeap::with_capacity(limit.min(PREALLOC_LIMIT) + 1),
            limit: limit.max(1),
        }
    }

    /// Insert, evicting the furthest entry when over the limit.
    pub fn push(&mut self, n: Neighbor) {
        self.heap.push(n);
        if self.heap.len() > self.limit {
            self.heap.pop();
        }
    }

    /// Distance of the furthest kept entry, or infinity when empty.
    pub fn furthest(&self) -> f32 {
        self.heap.peek().map_or(f32::INFINITY, |n| n.distance)
    }

    pub fn is_full(&self) -> bool {
        self.heap.len() >= self.limit
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    /// Drain into a Vec sorted by ascending distance.
    pub fn into_sorted_vec(self) -> Vec<Neighbor> {
        self.heap.into_sorted_vec()
    }
}
