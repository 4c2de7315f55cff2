//! HNSW graph: core data structures and algorithms.
//!
//! Implements the Hierarchical Navigable Small World graph from:
//! "Efficient and robust approximate nearest neighbor search using
//!  Hierarchical Navigable Small World graphs" (Malkov & Yashunin, 2016/2018).
//!
//! Nodes are addressed by dense integer labels below a fixed capacity that
//! can only grow. Deletion is a tombstone: the node keeps its links so the
//! graph stays navigable, but it is never returned from a query.

use std::collections::HashSet;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::distance::DistanceMetric;
use crate::error::{Result, VectorDbError};
use crate::vector::Vector;

use super::neighbor_queue::{MaxHeap, MinHeap, Neighbor};

/// Configuration parameters for the HNSW index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HnswParams {
    /// Max number of connections per node (layers > 0).
    pub m: usize,
    /// Max connections at layer 0 (typically 2 * m).
    pub m_max0: usize,
    /// Number of candidates during construction.
    pub ef_construction: usize,
    /// Number of candidates during search.
    pub ef_search: usize,
    /// Level generation factor: 1 / ln(m).
    pub ml: f64,
    /// Maximum number of layers.
    pub max_layers: usize,
}

impl Default for HnswParams {
    fn default() -> Self {
        Self::new(16, 100, 10)
    }
}

impl HnswParams {
    pub fn new(m: usize, ef_construction: usize, ef_search: usize) -> Self {
        let m = m.max(2);
        Self {
            m,
            m_max0: 2 * m,
            ef_construction,
            ef_search,
            ml: 1.0 / (m as f64).ln(),
            max_layers: 16,
        }
    }
}

/// A node in the HNSW graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct HnswNode {
    vector: Vector,
    /// Neighbors per layer. neighbors[l] is the list of neighbor labels at layer l.
    neighbors: Vec<Vec<usize>>,
    /// The maximum layer this node was inserted into.
    level: usize,
    deleted: bool,
}

fn fresh_rng() -> StdRng {
    StdRng::from_entropy()
}

/// The HNSW graph structure.
#[derive(Debug, Serialize, Deserialize)]
pub struct HnswGraph {
    /// Nodes indexed by label. A slot is None only while a node is being relinked.
    nodes: Vec<Option<HnswNode>>,
    /// Labels must stay below this bound; grown with `resize`.
    capacity: usize,
    /// Entry point node label (highest-level node).
    entry_point: Option<usize>,
    /// Current maximum level in the graph.
    max_level: usize,
    params: HnswParams,
    metric: DistanceMetric,
    #[serde(skip, default = "fresh_rng")]
    rng: StdRng,
    /// Count of nodes that are not tombstoned.
    live: usize,
}

impl HnswGraph {
    pub fn new(metric: DistanceMetric, params: HnswParams, capacity: usize) -> Self {
        Self {
            nodes: Vec::with_capacity(capacity),
            capacity,
            entry_point: None,
            max_level: 0,
            params,
            metric,
            rng: fresh_rng(),
            live: 0,
        }
    }

    pub fn metric(&self) -> DistanceMetric {
        self.metric
    }

    pub fn params(&self) -> &HnswParams {
        &self.params
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of live (non-tombstoned) nodes.
    pub fn len(&self) -> usize {
        self.live
    }

    pub fn is_empty(&self) -> bool {
        self.live == 0
    }

    /// Number of occupied label slots, tombstones included.
    pub fn element_count(&self) -> usize {
        self.nodes.iter().filter(|n| n.is_some()).count()
    }

    /// Grow the label capacity. Shrinking below the highest used label is rejected.
    pub fn resize(&mut self, new_capacity: usize) -> Result<()> {
        if new_capacity < self.nodes.len() {
            return Err(VectorDbError::IndexError(format!(
                "Cannot resize to {} below {} stored elements",
                new_capacity,
                self.nodes.len()
            )));
        }
        self.nodes.reserve(new_capacity - self.nodes.len());
        self.capacity = new_capacity;
        Ok(())
    }

    /// Generate a random level for a new node.
    fn random_level(&mut self) -> usize {
        let r: f64 = self.rng.gen();
        let level = (-r.ln() * self.params.ml).floor() as usize;
        level.min(self.params.max_layers - 1)
    }

    fn node(&self, label: usize) -> Option<&HnswNode> {
        self.nodes.get(label).and_then(|n| n.as_ref())
    }

    /// Compute distance between a query vector and a node.
    fn distance(&self, query: &[f32], label: usize) -> Result<f32> {
        let node = self
            .node(label)
            .ok_or_else(|| VectorDbError::IndexError(format!("Label {} not found", label)))?;
        Ok(self.metric.distance(query, node.vector.as_slice()))
    }

    /// Whether `label` holds a live (non-tombstoned) node.
    pub fn contains(&self, label: usize) -> bool {
        self.node(label).is_some_and(|n| !n.deleted)
    }

    pub fn is_deleted(&self, label: usize) -> bool {
        self.node(label).is_some_and(|n| n.deleted)
    }

    /// The stored vector for a live label.
    pub fn get_vector(&self, label: usize) -> Option<&Vector> {
        self.node(label).filter(|n| !n.deleted).map(|n| &n.vector)
    }

    /// SEARCH-LAYER: Algorithm 2 from the HNSW paper.
    ///
    /// Every reachable node is traversed, but only labels passing `accept`
    /// enter the result set. Returns up to `ef` accepted neighbors, closest first.
    fn search_layer(
        &self,
        query: &[f32],
        entry_points: &[usize],
        ef: usize,
        layer: usize,
        accept: &dyn Fn(usize) -> bool,
    ) -> Result<Vec<Neighbor>> {
        let mut visited = HashSet::new();
        let mut candidates = MinHeap::new(); // closest candidate on top
        let mut results = MaxHeap::new(); // furthest result on top

        for &ep in entry_points {
            let dist = self.distance(query, ep)?;
            visited.insert(ep);
            candidates.push(Neighbor::new(ep, dist));
            if accept(ep) {
                results.push_bounded(Neighbor::new(ep, dist), ef);
            }
        }

        while let Some(c) = candidates.pop() {
            if results.len() >= ef && c.distance > results.furthest_distance() {
                break;
            }

            let Some(neighbors) = self.node(c.label).and_then(|n| n.neighbors.get(layer)) else {
                continue;
            };

            for &neighbor in neighbors {
                if !visited.insert(neighbor) {
                    continue;
                }
                let Some(other) = self.node(neighbor) else {
                    continue;
                };

                let dist = self.metric.distance(query, other.vector.as_slice());
                if results.len() < ef || dist < results.furthest_distance() {
                    candidates.push(Neighbor::new(neighbor, dist));
                    if accept(neighbor) {
                        results.push_bounded(Neighbor::new(neighbor, dist), ef);
                    }
                }
            }
        }

        Ok(results.into_sorted_vec())
    }

    /// Select the M closest neighbors from candidates (simple selection, Algorithm 3).
    fn select_neighbors_simple(candidates: &[Neighbor], m: usize) -> Vec<usize> {
        candidates.iter().take(m).map(|n| n.label).collect()
    }

    /// Prune a node's neighbor list at a given layer to at most `m` neighbors.
    fn prune_neighbors(&mut self, label: usize, layer: usize, m: usize) {
        let (neighbor_labels, node_vec) = match self.node(label) {
            Some(node) if layer < node.neighbors.len() => {
                (node.neighbors[layer].clone(), node.vector.clone())
            }
            _ => return,
        };

        let mut scored: Vec<Neighbor> = neighbor_labels
            .into_iter()
            .filter_map(|nid| {
                self.node(nid).map(|n| {
                    Neighbor::new(
                        nid,
                        self.metric.distance(node_vec.as_slice(), n.vector.as_slice()),
                    )
                })
            })
            .collect();

        scored.sort();
        scored.truncate(m);

        if let Some(Some(node)) = self.nodes.get_mut(label) {
            if layer < node.neighbors.len() {
                node.neighbors[layer] = scored.into_iter().map(|n| n.label).collect();
            }
        }
    }

    /// INSERT: Algorithm 1 from the HNSW paper.
    pub fn insert(&mut self, label: usize, vector: Vector) -> Result<()> {
        if label >= self.capacity {
            return Err(VectorDbError::IndexError(format!(
                "Label {} exceeds index capacity {}",
                label, self.capacity
            )));
        }
        if self.node(label).is_some() {
            return Err(VectorDbError::IndexError(format!(
                "Label {} is already occupied",
                label
            )));
        }

        let level = self.random_level();
        self.link(label, vector, level)?;
        self.live += 1;
        Ok(())
    }

    /// Overwrite the vector stored at a live label, rebuilding its links.
    pub fn replace(&mut self, label: usize, vector: Vector) -> Result<()> {
        let level = match self.node(label) {
            Some(node) if !node.deleted => node.level,
            _ => {
                return Err(VectorDbError::IndexError(format!(
                    "Label {} is not a live element",
                    label
                )))
            }
        };

        self.unlink(label);
        self.link(label, vector, level)
    }

    /// Tombstone a label. Its storage and links are kept.
    pub fn mark_deleted(&mut self, label: usize) -> Result<()> {
        match self.nodes.get_mut(label).and_then(|n| n.as_mut()) {
            Some(node) if !node.deleted => {
                node.deleted = true;
                self.live -= 1;
                Ok(())
            }
            Some(_) => Err(VectorDbError::IndexError(format!(
                "Label {} is already deleted",
                label
            ))),
            None => Err(VectorDbError::IndexError(format!(
                "Label {} not found",
                label
            ))),
        }
    }

    fn link(&mut self, label: usize, vector: Vector, level: usize) -> Result<()> {
        if label >= self.nodes.len() {
            self.nodes.resize_with(label + 1, || None);
        }

        let query = vector.as_slice().to_vec();
        self.nodes[label] = Some(HnswNode {
            vector,
            neighbors: vec![Vec::new(); level + 1],
            level,
            deleted: false,
        });

        let entry_point = match self.entry_point {
            None => {
                self.entry_point = Some(label);
                self.max_level = level;
                return Ok(());
            }
            Some(ep) => ep,
        };

        let mut ep = entry_point;
        let current_max_level = self.max_level;

        // Phase 1: Greedy descent from top layer down to level+1 (ef=1)
        if current_max_level > level {
            for l in (level + 1..=current_max_level).rev() {
                let nearest = self.search_layer(&query, &[ep], 1, l, &|_: usize| true)?;
                if let Some(n) = nearest.first() {
                    ep = n.label;
                }
            }
        }

        // Phase 2: Connect at layers min(level, current_max_level) down to 0
        let insert_from = level.min(current_max_level);
        for l in (0..=insert_from).rev() {
            let m = if l == 0 {
                self.params.m_max0
            } else {
                self.params.m
            };

            let nearest = self.search_layer(
                &query,
                &[ep],
                self.params.ef_construction,
                l,
                &|candidate: usize| candidate != label,
            )?;
            let neighbors = Self::select_neighbors_simple(&nearest, m);

            if let Some(Some(node)) = self.nodes.get_mut(label) {
                if l < node.neighbors.len() {
                    node.neighbors[l] = neighbors.clone();
                }
            }

            for &neighbor in &neighbors {
                let needs_pruning = match self.nodes.get_mut(neighbor) {
                    Some(Some(other)) if l < other.neighbors.len() => {
                        let list = &mut other.neighbors[l];
                        if !list.contains(&label) {
                            list.push(label);
                        }
                        list.len() > m
                    }
                    _ => false,
                };

                // Pruning needs &self for distances, so it runs as a separate step
                if needs_pruning {
                    self.prune_neighbors(neighbor, l, m);
                }
            }

            if let Some(n) = nearest.first() {
                ep = n.label;
            }
        }

        if level > self.max_level {
            self.entry_point = Some(label);
            self.max_level = level;
        }

        Ok(())
    }

    /// Detach a node from its neighbors and clear its slot.
    fn unlink(&mut self, label: usize) -> Option<HnswNode> {
        let node = self.nodes.get_mut(label)?.take()?;

        for (layer, neighbors) in node.neighbors.iter().enumerate() {
            for &neighbor in neighbors {
                if let Some(Some(other)) = self.nodes.get_mut(neighbor) {
                    if let Some(list) = other.neighbors.get_mut(layer) {
                        list.retain(|&n| n != label);
                    }
                }
            }
        }

        if self.entry_point == Some(label) {
            self.entry_point = self
                .nodes
                .iter()
                .enumerate()
                .filter_map(|(i, n)| n.as_ref().map(|n| (i, n.level)))
                .max_by_key(|&(_, level)| level)
                .map(|(i, _)| i);

            self.max_level = self
                .entry_point
                .and_then(|ep| self.node(ep).map(|n| n.level))
                .unwrap_or(0);
        }

        Some(node)
    }

    /// SEARCH: Algorithm 5 from the HNSW paper, restricted to accepted labels.
    fn search_knn(
        &self,
        query: &[f32],
        k: usize,
        ef: usize,
        accept: &dyn Fn(usize) -> bool,
    ) -> Result<Vec<Neighbor>> {
        let Some(entry_point) = self.entry_point else {
            return Ok(vec![]);
        };

        let mut ep = entry_point;

        for l in (1..=self.max_level).rev() {
            let nearest = self.search_layer(query, &[ep], 1, l, &|_: usize| true)?;
            if let Some(n) = nearest.first() {
                ep = n.label;
            }
        }

        let mut results = self.search_layer(query, &[ep], ef.max(k), 0, accept)?;
        results.truncate(k);
        Ok(results)
    }

    /// Exhaustive scan over accepted live labels.
    pub fn search_exact(
        &self,
        query: &[f32],
        k: usize,
        accept: &(dyn Fn(usize) -> bool + Sync),
    ) -> Vec<Neighbor> {
        let mut scored: Vec<Neighbor> = self
            .nodes
            .par_iter()
            .enumerate()
            .filter_map(|(label, node)| match node {
                Some(n) if !n.deleted && accept(label) => Some(Neighbor::new(
                    label,
                    self.metric.distance(query, n.vector.as_slice()),
                )),
                _ => None,
            })
            .collect();

        scored.sort();
        scored.truncate(k);
        scored
    }

    /// k-NN over live labels using the configured `ef_search`.
    pub fn search(
        &self,
        query: &[f32],
        k: usize,
        filter: Option<&HashSet<usize>>,
    ) -> Result<Vec<Neighbor>> {
        self.search_with_ef(query, k, self.params.ef_search, filter)
    }

    /// k-NN over live labels, optionally restricted to `filter`.
    ///
    /// A graph walk that cannot fill `k` slots from the allowed labels (a
    /// very selective filter, or tombstones cutting off regions) is retried
    /// as an exact scan.
    pub fn search_with_ef(
        &self,
        query: &[f32],
        k: usize,
        ef: usize,
        filter: Option<&HashSet<usize>>,
    ) -> Result<Vec<Neighbor>> {
        if k == 0 || self.live == 0 {
            return Ok(vec![]);
        }

        let accept = |label: usize| filter.map_or(true, |f| f.contains(&label));
        let live_accept = |label: usize| self.contains(label) && accept(label);
        let ef = ef.max(k);

        if let Some(f) = filter {
            if f.len() <= ef {
                return Ok(self.search_exact(query, k, &accept));
            }
        }

        let results = self.search_knn(query, k, ef, &live_accept)?;
        let available = match filter {
            Some(f) => f.iter().filter(|&&label| self.contains(label)).count(),
            None => self.live,
        };

        if results.len() < k.min(available) {
            return Ok(self.search_exact(query, k, &accept));
        }
        Ok(results)
    }
}
