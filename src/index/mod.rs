//! Per-collection vector index.
//!
//! A [`VectorIndex`] owns one HNSW graph and maps externally supplied string
//! ids onto the graph's dense integer labels. Labels come from a counter that
//! only moves forward: deleting an id tombstones its label and the label is
//! never handed out again, so the counter (`IndexMetadata::elements`) is the
//! cumulative number of assignments, not the number of live vectors.
//!
//! Every mutation ends with a full snapshot of the graph and both maps.

pub mod cache;

pub use cache::{IndexCache, SharedIndex};

use crate::distance::DistanceMetric;
use crate::error::{Result, VectorDbError};
use crate::hnsw::{HnswGraph, HnswParams};
use crate::model::{Collection, CollectionId, CollectionMetadata};
use crate::persistence::snapshot::SnapshotManager;
use crate::vector::Vector;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use tracing::{debug, info};

pub const DEFAULT_MAX_ELEMENTS: usize = 1000;
pub const DEFAULT_M: usize = 16;
pub const DEFAULT_EF_CONSTRUCTION: usize = 100;
pub const DEFAULT_EF_SEARCH: usize = 10;
pub const DEFAULT_RESIZE_FACTOR: f64 = 1.0;

/// Index parameters with collection overrides applied over the defaults.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexParams {
    pub max_elements: usize,
    pub m: usize,
    pub ef_construction: usize,
    pub ef_search: usize,
    pub resize_factor: f64,
}

impl Default for IndexParams {
    fn default() -> Self {
        Self {
            max_elements: DEFAULT_MAX_ELEMENTS,
            m: DEFAULT_M,
            ef_construction: DEFAULT_EF_CONSTRUCTION,
            ef_search: DEFAULT_EF_SEARCH,
            resize_factor: DEFAULT_RESIZE_FACTOR,
        }
    }
}

impl IndexParams {
    pub fn from_metadata(metadata: &CollectionMetadata) -> Self {
        let defaults = Self::default();
        Self {
            max_elements: metadata.max_elements.unwrap_or(defaults.max_elements),
            m: metadata.m.unwrap_or(defaults.m),
            resize_factor: metadata.resize_factor.unwrap_or(defaults.resize_factor),
            ..defaults
        }
    }

    fn hnsw(&self) -> HnswParams {
        HnswParams::new(self.m, self.ef_construction, self.ef_search)
    }
}

/// Bookkeeping persisted with every snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexMetadata {
    /// Labels assigned so far. The next label handed out equals this value.
    pub elements: usize,
    pub metric: DistanceMetric,
    pub created_at: DateTime<Utc>,
}

/// A nearest-neighbor hit before it is joined with its relational row.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexHit {
    pub id: String,
    pub distance: f32,
    pub embedding: Vector,
}

/// Everything that exists only once the index is initialized.
#[derive(Debug, Serialize, Deserialize)]
struct IndexState {
    graph: HnswGraph,
    id_to_label: HashMap<String, usize>,
    /// Inverse of `id_to_label`, rebuilt on load.
    #[serde(skip)]
    label_to_id: HashMap<usize, String>,
    metadata: IndexMetadata,
}

impl IndexState {
    fn rebuild_reverse_map(&mut self) {
        self.label_to_id = self
            .id_to_label
            .iter()
            .map(|(id, &label)| (label, id.clone()))
            .collect();
    }
}

/// The ANN index of one collection.
#[derive(Debug)]
pub struct VectorIndex {
    collection_id: CollectionId,
    dimensionality: usize,
    params: IndexParams,
    snapshots: SnapshotManager,
    state: Option<IndexState>,
}

impl VectorIndex {
    /// Open the index of `collection` under `dir`, loading its snapshot if one exists.
    pub fn open(dir: impl AsRef<Path>, collection: &Collection) -> Result<Self> {
        let snapshots = SnapshotManager::new(
            dir.as_ref().join(&collection.id),
            format!("index_{}.bin", collection.id),
            format!("index_metadata_{}.json", collection.id),
        )?;

        let state = match snapshots.load::<IndexState>()? {
            Some(mut state) => {
                state.rebuild_reverse_map();
                info!(
                    collection = %collection.name,
                    live = state.graph.len(),
                    elements = state.metadata.elements,
                    "index loaded from snapshot"
                );
                Some(state)
            }
            None => None,
        };

        Ok(Self {
            collection_id: collection.id.clone(),
            dimensionality: collection.metadata.dimensionality,
            params: IndexParams::from_metadata(&collection.metadata),
            snapshots,
            state,
        })
    }

    /// Build an empty graph at the configured capacity and persist it.
    pub fn initialize(&mut self) -> Result<()> {
        let graph = HnswGraph::new(
            DistanceMetric::Cosine,
            self.params.hnsw(),
            self.params.max_elements,
        );
        self.state = Some(IndexState {
            graph,
            id_to_label: HashMap::new(),
            label_to_id: HashMap::new(),
            metadata: IndexMetadata {
                elements: 0,
                metric: DistanceMetric::Cosine,
                created_at: Utc::now(),
            },
        });
        info!(
            collection = %self.collection_id,
            capacity = self.params.max_elements,
            m = self.params.m,
            "index initialized"
        );
        self.persist()
    }

    pub fn collection_id(&self) -> &str {
        &self.collection_id
    }

    pub fn dimensionality(&self) -> usize {
        self.dimensionality
    }

    pub fn params(&self) -> &IndexParams {
        &self.params
    }

    pub fn is_initialized(&self) -> bool {
        self.state.is_some()
    }

    pub fn metadata(&self) -> Option<&IndexMetadata> {
        self.state.as_ref().map(|s| &s.metadata)
    }

    /// Number of live ids.
    pub fn len(&self) -> usize {
        self.state.as_ref().map_or(0, |s| s.graph.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Cumulative label assignments, tombstones included.
    pub fn elements(&self) -> usize {
        self.state.as_ref().map_or(0, |s| s.metadata.elements)
    }

    pub fn capacity(&self) -> usize {
        self.state.as_ref().map_or(0, |s| s.graph.capacity())
    }

    pub fn contains(&self, id: &str) -> bool {
        self.label(id).is_some()
    }

    /// Label currently bound to a live id.
    pub fn label(&self, id: &str) -> Option<usize> {
        self.state.as_ref()?.id_to_label.get(id).copied()
    }

    pub fn get_vector(&self, id: &str) -> Option<&Vector> {
        let state = self.state.as_ref()?;
        let label = *state.id_to_label.get(id)?;
        state.graph.get_vector(label)
    }

    fn check_dimension(&self, vector: &Vector) -> Result<()> {
        if vector.dimension() != self.dimensionality {
            return Err(VectorDbError::DimensionMismatch {
                expected: self.dimensionality,
                actual: vector.dimension(),
            });
        }
        Ok(())
    }

    /// Add a batch of vectors.
    ///
    /// Every vector is validated before anything is touched. An id that is
    /// already present is overwritten in place when `update_mode` is set and
    /// rejected with `DuplicateId` otherwise; records before the duplicate
    /// stay added. The snapshot is written in both cases.
    pub fn add_vectors(&mut self, items: Vec<(String, Vector)>, update_mode: bool) -> Result<()> {
        for (_, vector) in &items {
            self.check_dimension(vector)?;
            vector.check_finite()?;
        }
        if items.is_empty() {
            return Ok(());
        }
        if self.state.is_none() {
            self.initialize()?;
        }

        let result = self.apply_batch(items, update_mode);
        self.persist()?;
        result
    }

    fn apply_batch(&mut self, items: Vec<(String, Vector)>, update_mode: bool) -> Result<()> {
        let params = &self.params;
        let state = self
            .state
            .as_mut()
            .ok_or_else(|| VectorDbError::InvalidIndexState("index is not initialized".into()))?;

        let mut unseen = HashSet::new();
        for (id, _) in &items {
            if !state.id_to_label.contains_key(id) {
                unseen.insert(id.as_str());
            }
        }

        let projected = state.metadata.elements + unseen.len();
        if projected > state.graph.capacity() {
            let scaled = (projected as f64 * params.resize_factor).ceil() as usize;
            let target = scaled.max(params.max_elements).max(projected);
            state.graph.resize(target)?;
            info!(
                collection = %self.collection_id,
                capacity = target,
                "index resized"
            );
        }

        let mut added = 0;
        let mut updated = 0;
        for (id, vector) in items {
            match state.id_to_label.get(&id) {
                Some(&label) if update_mode => {
                    state.graph.replace(label, vector)?;
                    updated += 1;
                }
                Some(_) => return Err(VectorDbError::DuplicateId { id }),
                None => {
                    let label = state.metadata.elements;
                    state.graph.insert(label, vector)?;
                    state.metadata.elements += 1;
                    state.id_to_label.insert(id.clone(), label);
                    state.label_to_id.insert(label, id);
                    added += 1;
                }
            }
        }

        debug!(
            collection = %self.collection_id,
            added,
            updated,
            live = state.graph.len(),
            "vectors added"
        );
        Ok(())
    }

    /// Tombstone the labels of the given ids. Unknown ids are ignored.
    pub fn delete_vectors(&mut self, ids: &[String]) -> Result<()> {
        let Some(state) = self.state.as_mut() else {
            return Ok(());
        };

        let mut deleted = 0;
        for id in ids {
            if let Some(label) = state.id_to_label.remove(id) {
                state.label_to_id.remove(&label);
                state.graph.mark_deleted(label)?;
                deleted += 1;
            }
        }

        debug!(
            collection = %self.collection_id,
            deleted,
            live = state.graph.len(),
            "vectors deleted"
        );
        self.persist()
    }

    /// The `k` nearest live vectors to `query`, closest first.
    ///
    /// A non-empty `id_filter` restricts the candidates to the live ids it
    /// names and caps `k` at their number.
    pub fn search(
        &self,
        query: &Vector,
        k: usize,
        id_filter: Option<&[String]>,
    ) -> Result<Vec<IndexHit>> {
        self.check_dimension(query)?;
        let state = self.state.as_ref().ok_or_else(|| {
            VectorDbError::InvalidIndexState(format!(
                "index for collection {} is not initialized",
                self.collection_id
            ))
        })?;

        let allowed: Option<HashSet<usize>> = match id_filter {
            Some(ids) if !ids.is_empty() => Some(
                ids.iter()
                    .filter_map(|id| state.id_to_label.get(id).copied())
                    .collect(),
            ),
            _ => None,
        };

        let k = allowed.as_ref().map_or(k, |a| k.min(a.len()));
        let available = state.graph.len();
        if k > available {
            return Err(VectorDbError::RequestedCountExceedsAvailable {
                requested: k,
                available,
            });
        }
        if k == 0 {
            return Ok(vec![]);
        }

        let neighbors = state
            .graph
            .search(query.as_slice(), k, allowed.as_ref())?;

        Ok(neighbors
            .into_iter()
            .filter_map(|n| {
                let id = state.label_to_id.get(&n.label)?;
                let embedding = state.graph.get_vector(n.label)?;
                Some(IndexHit {
                    id: id.clone(),
                    distance: n.distance,
                    embedding: embedding.clone(),
                })
            })
            .collect())
    }

    /// Delete the persisted snapshot and forget all in-memory state.
    pub fn drop_index(&mut self) -> Result<()> {
        self.snapshots.remove()?;
        // Left in place when something else lives in it
        if let Err(e) = std::fs::remove_dir(self.snapshots.dir()) {
            debug!(
                dir = %self.snapshots.dir().display(),
                error = %e,
                "index directory kept"
            );
        }
        self.state = None;
        info!(collection = %self.collection_id, "index dropped");
        Ok(())
    }

    /// The human-readable manifest of the last persisted snapshot.
    pub fn manifest(&self) -> Result<Option<serde_json::Value>> {
        self.snapshots.load_manifest()
    }

    /// Write the full index state to disk. A no-op while uninitialized.
    pub fn persist(&self) -> Result<()> {
        let Some(state) = self.state.as_ref() else {
            return Ok(());
        };

        let manifest = serde_json::json!({
            "collection_id": self.collection_id,
            "dimensionality": self.dimensionality,
            "metric": state.metadata.metric.to_string(),
            "elements": state.metadata.elements,
            "live": state.graph.len(),
            "capacity": state.graph.capacity(),
            "m": self.params.m,
            "created_at": state.metadata.created_at.to_rfc3339(),
        });
        self.snapshots.save(state, &manifest)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use proptest::prelude::*;
    use tempfile::TempDir;

    fn collection(dim: usize, metadata: CollectionMetadata) -> Collection {
        Collection {
            id: "c1".to_string(),
            name: "docs".to_string(),
            metadata: CollectionMetadata {
                dimensionality: dim,
                ..metadata
            },
        }
    }

    fn open(dir: &TempDir, metadata: CollectionMetadata) -> VectorIndex {
        let dim = metadata.dimensionality;
        VectorIndex::open(dir.path(), &collection(dim, metadata)).unwrap()
    }

    fn item(id: &str, data: &[f32]) -> (String, Vector) {
        (id.to_string(), Vector::new(data.to_vec()))
    }

    fn basis(dim: usize, axis: usize) -> Vec<f32> {
        let mut v = vec![0.0; dim];
        v[axis] = 1.0;
        v
    }

    #[test]
    fn test_open_without_snapshot_is_uninitialized() {
        let dir = TempDir::new().unwrap();
        let index = open(&dir, CollectionMetadata::new(3));
        assert!(!index.is_initialized());
        assert_eq!(index.len(), 0);
        assert_eq!(index.capacity(), 0);
    }

    #[test]
    fn test_params_defaults_and_overrides() {
        let params = IndexParams::from_metadata(&CollectionMetadata::new(3));
        assert_eq!(params, IndexParams::default());

        let params = IndexParams::from_metadata(
            &CollectionMetadata::new(3)
                .with_max_elements(5)
                .with_m(8)
                .with_resize_factor(2.0),
        );
        assert_eq!(params.max_elements, 5);
        assert_eq!(params.m, 8);
        assert_eq!(params.ef_search, DEFAULT_EF_SEARCH);
        assert_relative_eq!(params.resize_factor, 2.0);
    }

    #[test]
    fn test_initialize_persists() {
        let dir = TempDir::new().unwrap();
        let mut index = open(&dir, CollectionMetadata::new(3).with_max_elements(7));
        index.initialize().unwrap();
        assert_eq!(index.capacity(), 7);
        assert_eq!(index.elements(), 0);
        assert!(dir.path().join("c1").join("index_c1.bin").exists());
        assert!(dir.path().join("c1").join("index_metadata_c1.json").exists());

        let manifest = index.manifest().unwrap().unwrap();
        assert_eq!(manifest["capacity"], 7);
        assert_eq!(manifest["metric"], "cosine");
    }

    #[test]
    fn test_add_and_search() {
        let dir = TempDir::new().unwrap();
        let mut index = open(&dir, CollectionMetadata::new(3));
        index
            .add_vectors(
                vec![
                    item("a", &[1.0, 0.0, 0.0]),
                    item("b", &[0.0, 1.0, 0.0]),
                    item("c", &[0.0, 0.0, 1.0]),
                ],
                false,
            )
            .unwrap();

        assert!(index.is_initialized());
        assert_eq!(index.len(), 3);

        let hits = index
            .search(&Vector::new(vec![0.9, 0.1, 0.0]), 1, None)
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, "a");
        assert_eq!(hits[0].embedding, Vector::new(vec![1.0, 0.0, 0.0]));

        let all = index
            .search(&Vector::new(vec![0.9, 0.1, 0.0]), 3, None)
            .unwrap();
        let ids: Vec<&str> = all.iter().map(|h| h.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
        assert!(all.windows(2).all(|w| w[0].distance <= w[1].distance));
    }

    #[test]
    fn test_dimension_mismatch_mutates_nothing() {
        let dir = TempDir::new().unwrap();
        let mut index = open(&dir, CollectionMetadata::new(3));
        let result = index.add_vectors(
            vec![item("a", &[1.0, 0.0, 0.0]), item("b", &[1.0, 0.0])],
            false,
        );
        assert!(matches!(
            result,
            Err(VectorDbError::DimensionMismatch {
                expected: 3,
                actual: 2
            })
        ));
        assert!(!index.is_initialized());
        assert!(!index.contains("a"));
    }

    #[test]
    fn test_non_finite_vector_rejected() {
        let dir = TempDir::new().unwrap();
        let mut index = open(&dir, CollectionMetadata::new(2));
        let result = index.add_vectors(vec![item("a", &[f32::NAN, 0.0])], false);
        assert!(matches!(result, Err(VectorDbError::InvalidVector { .. })));
    }

    #[test]
    fn test_duplicate_keeps_earlier_records() {
        let dir = TempDir::new().unwrap();
        let mut index = open(&dir, CollectionMetadata::new(2));
        index.add_vectors(vec![item("a", &[1.0, 0.0])], false).unwrap();

        let result = index.add_vectors(
            vec![item("b", &[0.0, 1.0]), item("a", &[0.5, 0.5])],
            false,
        );
        assert!(matches!(result, Err(VectorDbError::DuplicateId { id }) if id == "a"));
        assert!(index.contains("b"));
        assert_eq!(index.get_vector("a").unwrap().as_slice(), &[1.0, 0.0]);

        // The partial batch was persisted
        let reopened = open(&dir, CollectionMetadata::new(2));
        assert!(reopened.contains("b"));
    }

    #[test]
    fn test_update_mode_keeps_label() {
        let dir = TempDir::new().unwrap();
        let mut index = open(&dir, CollectionMetadata::new(2));
        index
            .add_vectors(vec![item("a", &[1.0, 0.0]), item("b", &[0.0, 1.0])], false)
            .unwrap();
        let label = index.label("a").unwrap();

        index.add_vectors(vec![item("a", &[0.0, 1.0])], true).unwrap();
        assert_eq!(index.label("a"), Some(label));
        assert_eq!(index.elements(), 2);
        assert_eq!(index.get_vector("a").unwrap().as_slice(), &[0.0, 1.0]);
    }

    #[test]
    fn test_labels_never_reused() {
        let dir = TempDir::new().unwrap();
        let mut index = open(&dir, CollectionMetadata::new(2));
        index.add_vectors(vec![item("a", &[1.0, 0.0])], false).unwrap();
        assert_eq!(index.label("a"), Some(0));

        index.delete_vectors(&["a".to_string()]).unwrap();
        assert!(!index.contains("a"));
        assert_eq!(index.len(), 0);

        index.add_vectors(vec![item("a", &[1.0, 0.0])], false).unwrap();
        assert_eq!(index.label("a"), Some(1));
        assert_eq!(index.elements(), 2);
    }

    #[test]
    fn test_delete_unknown_id_is_ignored() {
        let dir = TempDir::new().unwrap();
        let mut index = open(&dir, CollectionMetadata::new(2));
        index.delete_vectors(&["ghost".to_string()]).unwrap();

        index.add_vectors(vec![item("a", &[1.0, 0.0])], false).unwrap();
        index
            .delete_vectors(&["ghost".to_string(), "a".to_string()])
            .unwrap();
        assert_eq!(index.len(), 0);
    }

    #[test]
    fn test_deleted_ids_never_returned() {
        let dir = TempDir::new().unwrap();
        let mut index = open(&dir, CollectionMetadata::new(3));
        index
            .add_vectors(
                vec![
                    item("a", &[1.0, 0.0, 0.0]),
                    item("b", &[0.0, 1.0, 0.0]),
                    item("c", &[0.0, 0.0, 1.0]),
                ],
                false,
            )
            .unwrap();
        index.delete_vectors(&["a".to_string()]).unwrap();

        let hits = index
            .search(&Vector::new(vec![0.9, 0.1, 0.0]), 1, None)
            .unwrap();
        assert_eq!(hits[0].id, "b");

        let result = index.search(&Vector::new(vec![1.0, 0.0, 0.0]), 3, None);
        assert!(matches!(
            result,
            Err(VectorDbError::RequestedCountExceedsAvailable {
                requested: 3,
                available: 2
            })
        ));
    }

    #[test]
    fn test_resize_grows_capacity() {
        let dir = TempDir::new().unwrap();
        let mut index = open(&dir, CollectionMetadata::new(4).with_max_elements(2));
        let items: Vec<_> = (0..5)
            .map(|i| (format!("v{}", i), Vector::new(basis(4, i % 4))))
            .collect();
        index.add_vectors(items, false).unwrap();
        assert_eq!(index.len(), 5);
        assert_eq!(index.capacity(), 5);
    }

    #[test]
    fn test_resize_applies_factor() {
        let dir = TempDir::new().unwrap();
        let mut index = open(
            &dir,
            CollectionMetadata::new(2)
                .with_max_elements(2)
                .with_resize_factor(2.0),
        );
        index
            .add_vectors(
                vec![
                    item("a", &[1.0, 0.0]),
                    item("b", &[0.0, 1.0]),
                    item("c", &[1.0, 1.0]),
                ],
                false,
            )
            .unwrap();
        assert_eq!(index.capacity(), 6);
    }

    #[test]
    fn test_resize_counts_tombstones() {
        let dir = TempDir::new().unwrap();
        let mut index = open(&dir, CollectionMetadata::new(2).with_max_elements(2));
        index
            .add_vectors(vec![item("a", &[1.0, 0.0]), item("b", &[0.0, 1.0])], false)
            .unwrap();
        index
            .delete_vectors(&["a".to_string(), "b".to_string()])
            .unwrap();

        // Two live slots are free, but labels 0 and 1 are spent
        index.add_vectors(vec![item("c", &[1.0, 1.0])], false).unwrap();
        assert_eq!(index.label("c"), Some(2));
        assert_eq!(index.capacity(), 3);
    }

    #[test]
    fn test_search_uninitialized() {
        let dir = TempDir::new().unwrap();
        let index = open(&dir, CollectionMetadata::new(2));
        let result = index.search(&Vector::new(vec![1.0, 0.0]), 1, None);
        assert!(matches!(result, Err(VectorDbError::InvalidIndexState(_))));
    }

    #[test]
    fn test_search_dimension_checked_first() {
        let dir = TempDir::new().unwrap();
        let index = open(&dir, CollectionMetadata::new(2));
        let result = index.search(&Vector::new(vec![1.0, 0.0, 0.0]), 1, None);
        assert!(matches!(result, Err(VectorDbError::DimensionMismatch { .. })));
    }

    #[test]
    fn test_search_k_zero() {
        let dir = TempDir::new().unwrap();
        let mut index = open(&dir, CollectionMetadata::new(2));
        index.add_vectors(vec![item("a", &[1.0, 0.0])], false).unwrap();
        let hits = index.search(&Vector::new(vec![1.0, 0.0]), 0, None).unwrap();
        assert!(hits.is_empty());
    }

    #[test]
    fn test_filter_clamps_k() {
        let dir = TempDir::new().unwrap();
        let mut index = open(&dir, CollectionMetadata::new(2));
        let items: Vec<_> = (0..20)
            .map(|i| {
                let angle = i as f32 * 0.1;
                (format!("v{}", i), Vector::new(vec![angle.cos(), angle.sin()]))
            })
            .collect();
        index.add_vectors(items, false).unwrap();

        let filter = vec!["v3".to_string(), "v15".to_string(), "missing".to_string()];
        let hits = index
            .search(&Vector::new(vec![1.0, 0.0]), 10, Some(filter.as_slice()))
            .unwrap();
        let ids: Vec<&str> = hits.iter().map(|h| h.id.as_str()).collect();
        assert_eq!(ids, vec!["v3", "v15"]);
    }

    #[test]
    fn test_empty_filter_means_unrestricted() {
        let dir = TempDir::new().unwrap();
        let mut index = open(&dir, CollectionMetadata::new(2));
        index
            .add_vectors(vec![item("a", &[1.0, 0.0]), item("b", &[0.0, 1.0])], false)
            .unwrap();
        let hits = index
            .search(&Vector::new(vec![1.0, 0.0]), 2, Some(&[][..]))
            .unwrap();
        assert_eq!(hits.len(), 2);
    }

    #[test]
    fn test_persist_and_reload() {
        let dir = TempDir::new().unwrap();
        {
            let mut index = open(&dir, CollectionMetadata::new(3));
            index
                .add_vectors(
                    vec![
                        item("a", &[1.0, 0.0, 0.0]),
                        item("b", &[0.0, 1.0, 0.0]),
                        item("c", &[0.0, 0.0, 1.0]),
                    ],
                    false,
                )
                .unwrap();
            index.delete_vectors(&["b".to_string()]).unwrap();
        }

        let mut index = open(&dir, CollectionMetadata::new(3));
        assert!(index.is_initialized());
        assert_eq!(index.len(), 2);
        assert_eq!(index.elements(), 3);
        assert!(!index.contains("b"));

        let hits = index
            .search(&Vector::new(vec![0.0, 0.1, 0.9]), 1, None)
            .unwrap();
        assert_eq!(hits[0].id, "c");

        // Counter survives the reload
        index.add_vectors(vec![item("d", &[1.0, 1.0, 0.0])], false).unwrap();
        assert_eq!(index.label("d"), Some(3));
    }

    #[test]
    fn test_reload_returns_identical_hits() {
        let dir = TempDir::new().unwrap();
        let items: Vec<(String, Vector)> = (0..60)
            .map(|i| {
                let t = i as f32 * 0.37;
                item(&format!("v{:02}", i), &[t.cos(), t.sin(), (t * 0.5).sin()])
            })
            .collect();
        let queries = [
            Vector::new(vec![1.0, 0.0, 0.0]),
            Vector::new(vec![-0.3, 0.8, 0.2]),
            Vector::new(vec![0.1, -0.9, -0.4]),
        ];
        let filter: Vec<String> = (0..60).step_by(7).map(|i| format!("v{:02}", i)).collect();

        let run = |index: &VectorIndex| -> Vec<Vec<IndexHit>> {
            let k = index.len();
            queries
                .iter()
                .flat_map(|q| {
                    [
                        index.search(q, k, None).unwrap(),
                        index.search(q, 5, None).unwrap(),
                        index.search(q, k, Some(filter.as_slice())).unwrap(),
                    ]
                })
                .collect()
        };

        let before = {
            let mut index = open(&dir, CollectionMetadata::new(3));
            index.add_vectors(items, false).unwrap();
            index
                .delete_vectors(&["v03".to_string(), "v14".to_string()])
                .unwrap();
            run(&index)
        };

        let index = open(&dir, CollectionMetadata::new(3));
        assert_eq!(index.len(), 58);
        let after = run(&index);
        assert!(!after[0].is_empty());
        assert_eq!(after, before);
    }

    #[test]
    fn test_drop_index_keeps_shared_directory() {
        let dir = TempDir::new().unwrap();
        let mut index = open(&dir, CollectionMetadata::new(2));
        index.add_vectors(vec![item("a", &[1.0, 0.0])], false).unwrap();
        let stray = dir.path().join("c1").join("notes.txt");
        std::fs::write(&stray, b"keep").unwrap();

        index.drop_index().unwrap();
        assert!(!index.is_initialized());
        assert!(stray.exists());
        assert!(!dir.path().join("c1").join("index_c1.bin").exists());
    }

    #[test]
    fn test_drop_index() {
        let dir = TempDir::new().unwrap();
        let mut index = open(&dir, CollectionMetadata::new(2));
        index.add_vectors(vec![item("a", &[1.0, 0.0])], false).unwrap();
        index.drop_index().unwrap();

        assert!(!index.is_initialized());
        assert!(!dir.path().join("c1").join("index_c1.bin").exists());

        let reopened = open(&dir, CollectionMetadata::new(2));
        assert!(!reopened.is_initialized());
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(24))]

        #[test]
        fn prop_live_ids_map_to_distinct_labels(
            ops in prop::collection::vec((0usize..12, any::<bool>()), 1..40)
        ) {
            let dir = TempDir::new().unwrap();
            let mut index = open(&dir, CollectionMetadata::new(2).with_max_elements(4));
            let mut live = HashSet::new();
            let mut assigned = 0;

            for (n, delete) in ops {
                let id = format!("id{}", n);
                if delete {
                    index.delete_vectors(&[id.clone()]).unwrap();
                    live.remove(&id);
                } else if !live.contains(&id) {
                    let angle = n as f32;
                    index
                        .add_vectors(vec![(id.clone(), Vector::new(vec![angle.cos(), angle.sin()]))], false)
                        .unwrap();
                    prop_assert_eq!(index.label(&id), Some(assigned));
                    assigned += 1;
                    live.insert(id);
                }
            }

            prop_assert_eq!(index.len(), live.len());
            prop_assert_eq!(index.elements(), assigned);
            let labels: HashSet<usize> = live.iter().filter_map(|id| index.label(id)).collect();
            prop_assert_eq!(labels.len(), live.len());
            prop_assert!(labels.iter().all(|&l| l < assigned));
        }
    }
}
