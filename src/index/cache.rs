//! Registry of open collection indexes.

use crate::error::{Result, VectorDbError};
use crate::index::VectorIndex;
use crate::model::{Collection, CollectionId};
use crate::records::RecordStore;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

/// One collection's index behind its own lock. Writers to the index hold the
/// write half for the whole mutation, including the snapshot.
pub type SharedIndex = Arc<RwLock<VectorIndex>>;

/// Maps collection ids to their open index.
///
/// Entries are created lazily, the first time a collection is created or
/// looked up, and leave the cache only through [`IndexCache::remove`].
#[derive(Debug)]
pub struct IndexCache {
    dir: PathBuf,
    indexes: RwLock<HashMap<CollectionId, SharedIndex>>,
}

impl IndexCache {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
            indexes: RwLock::new(HashMap::new()),
        }
    }

    /// Root directory holding one snapshot directory per collection.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Open the index for `collection` unless it is already cached.
    pub fn register(&self, collection: &Collection) -> Result<SharedIndex> {
        if let Some(index) = self.get(&collection.id) {
            return Ok(index);
        }

        let mut indexes = self.indexes.write();
        // Another caller may have registered it between the two locks
        if let Some(index) = indexes.get(&collection.id) {
            return Ok(Arc::clone(index));
        }

        let index = Arc::new(RwLock::new(VectorIndex::open(&self.dir, collection)?));
        indexes.insert(collection.id.clone(), Arc::clone(&index));
        debug!(collection = %collection.name, id = %collection.id, "index registered");
        Ok(index)
    }

    pub fn get(&self, collection_id: &str) -> Option<SharedIndex> {
        self.indexes.read().get(collection_id).cloned()
    }

    /// Cached index, or load the collection row and register it.
    pub fn get_or_load<R>(&self, collection_id: &str, records: &R) -> Result<SharedIndex>
    where
        R: RecordStore + ?Sized,
    {
        if let Some(index) = self.get(collection_id) {
            return Ok(index);
        }
        let collection = records
            .collection_by_id(collection_id)?
            .ok_or_else(|| VectorDbError::collection_not_found(collection_id))?;
        self.register(&collection)
    }

    pub fn remove(&self, collection_id: &str) -> Option<SharedIndex> {
        self.indexes.write().remove(collection_id)
    }

    pub fn len(&self) -> usize {
        self.indexes.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.indexes.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::CollectionMetadata;
    use crate::records::MemoryRecordStore;
    use crate::vector::Vector;
    use tempfile::TempDir;

    fn collection(id: &str) -> Collection {
        Collection {
            id: id.to_string(),
            name: format!("name-{}", id),
            metadata: CollectionMetadata::new(2),
        }
    }

    #[test]
    fn test_register_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let cache = IndexCache::new(dir.path());

        let first = cache.register(&collection("c1")).unwrap();
        let second = cache.register(&collection("c1")).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_get_missing() {
        let dir = TempDir::new().unwrap();
        let cache = IndexCache::new(dir.path());
        assert!(cache.get("c1").is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn test_get_or_load_reads_snapshot() {
        let dir = TempDir::new().unwrap();
        let records = MemoryRecordStore::new();
        records.insert_collection(collection("c1")).unwrap();

        {
            let cache = IndexCache::new(dir.path());
            let index = cache.register(&collection("c1")).unwrap();
            index
                .write()
                .add_vectors(vec![("a".to_string(), Vector::new(vec![1.0, 0.0]))], false)
                .unwrap();
        }

        // A fresh cache, as after a restart
        let cache = IndexCache::new(dir.path());
        let index = cache.get_or_load("c1", &records).unwrap();
        assert!(index.read().contains("a"));
        assert!(cache.get("c1").is_some());
    }

    #[test]
    fn test_get_or_load_unknown_collection() {
        let dir = TempDir::new().unwrap();
        let cache = IndexCache::new(dir.path());
        let records = MemoryRecordStore::new();
        let result = cache.get_or_load("nope", &records);
        assert!(matches!(result, Err(VectorDbError::NotFound { .. })));
    }

    #[test]
    fn test_remove() {
        let dir = TempDir::new().unwrap();
        let cache = IndexCache::new(dir.path());
        cache.register(&collection("c1")).unwrap();
        assert!(cache.remove("c1").is_some());
        assert!(cache.get("c1").is_none());
        assert!(cache.remove("c1").is_none());
    }
}
