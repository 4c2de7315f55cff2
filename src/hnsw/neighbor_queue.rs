//! Priority queues for HNSW search, with a total order over f32 distances.

use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;

/// A graph label paired with its distance to the current query.
#[derive(Debug, Clone, Copy)]
pub struct Neighbor {
    pub distance: f32,
    pub label: usize,
}

impl Neighbor {
    pub fn new(label: usize, distance: f32) -> Self {
        Self { distance, label }
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

// Larger distance sorts greater; label breaks ties so ordering is total.
impl Ord for Neighbor {
    fn cmp(&self, other: &Self) -> Ordering {
        self.distance
            .total_cmp(&other.distance)
            .then_with(|| self.label.cmp(&other.label))
    }
}

/// Bounded result set: furthest neighbor on top so it can be evicted first.
#[derive(Debug, Default)]
pub struct MaxHeap {
    heap: BinaryHeap<Neighbor>,
}

impl MaxHeap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, n: Neighbor) {
        self.heap.push(n);
    }

    /// Push and pop the max if size exceeds limit, keeping only the closest `limit` neighbors.
    pub fn push_bounded(&mut self, n: Neighbor, limit: usize) {
        self.heap.push(n);
        if self.heap.len() > limit {
            self.heap.pop();
        }
    }

    /// Distance of the furthest kept neighbor, or `f32::MAX` when empty.
    pub fn furthest_distance(&self) -> f32 {
        self.heap.peek().map(|n| n.distance).unwrap_or(f32::MAX)
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    /// Drain into a Vec sorted ascending by distance.
    pub fn into_sorted_vec(self) -> Vec<Neighbor> {
        self.heap.into_sorted_vec()
    }
}

/// Candidate queue: closest neighbor on top.
#[derive(Debug, Default)]
pub struct MinHeap {
    heap: BinaryHeap<Reverse<Neighbor>>,
}

impl MinHeap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, n: Neighbor) {
        self.heap.push(Reverse(n));
    }

    pub fn pop(&mut self) -> Option<Neighbor> {
        self.heap.pop().map(|Reverse(n)| n)
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }
}
