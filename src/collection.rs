//! Collection store: coordinates the record store and the per-collection indexes.
//!
//! Writes go to the index first and to the record store second. When the
//! relational step fails, the index change is undone (added ids deleted,
//! deleted ids re-added, overwritten vectors restored) so that an embedding row
//! exists exactly when its id is live in the collection's index. A failed undo
//! is logged and the original error is returned.

use crate::config::Settings;
use crate::error::{Result, VectorDbError};
use crate::index::{IndexCache, SharedIndex};
use crate::metrics::{MetricsCollector, MetricsSnapshot};
use crate::model::{
    Collection, CollectionMetadata, CollectionMetadataPatch, EmbeddingPatch, EmbeddingRecord,
    GetQuery, NewEmbedding, QueryHit, SearchQuery, Where,
};
use crate::persistence::engine::{DurableRecordStore, EngineConfig};
use crate::records::RecordStore;
use crate::vector::Vector;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Store-wide counters returned by [`CollectionStore::stats`].
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct StoreStats {
    pub collections: usize,
    pub loaded_indexes: usize,
    pub metrics: MetricsSnapshot,
}

/// Entry point for collection and embedding operations.
pub struct CollectionStore<R: RecordStore> {
    records: R,
    cache: Arc<IndexCache>,
    metrics: Mutex<MetricsCollector>,
}

impl CollectionStore<DurableRecordStore> {
    /// Open a persistent store rooted at `settings.persist_directory`.
    pub fn open(settings: &Settings) -> Result<Self> {
        settings.validate()?;
        let records = DurableRecordStore::open(
            settings.records_dir(),
            EngineConfig {
                checkpoint_interval: settings.checkpoint_interval,
            },
        )?;
        let cache = Arc::new(IndexCache::new(settings.index_dir()));
        info!(dir = %settings.persist_directory.display(), "collection store opened");
        Ok(Self::new(records, cache))
    }
}

impl<R: RecordStore> CollectionStore<R> {
    pub fn new(records: R, cache: Arc<IndexCache>) -> Self {
        Self {
            records,
            cache,
            metrics: Mutex::new(MetricsCollector::new()),
        }
    }

    pub fn records(&self) -> &R {
        &self.records
    }

    pub fn cache(&self) -> &Arc<IndexCache> {
        &self.cache
    }

    fn resolve(&self, name: &str) -> Result<Collection> {
        self.records
            .collection_by_name(name)?
            .ok_or_else(|| VectorDbError::collection_not_found(name))
    }

    fn index_for(&self, collection: &Collection) -> Result<SharedIndex> {
        self.cache.get_or_load(&collection.id, &self.records)
    }

    /// Create a collection, or return the existing one when `get_or_create` is set.
    ///
    /// The index is registered but not initialized; its graph is built on the
    /// first insert.
    pub fn create_collection(
        &self,
        name: &str,
        metadata: CollectionMetadata,
        get_or_create: bool,
    ) -> Result<Collection> {
        if name.trim().is_empty() {
            return Err(VectorDbError::InvalidArgument(
                "collection name must not be empty".to_string(),
            ));
        }
        if let Some(existing) = self.records.collection_by_name(name)? {
            if get_or_create {
                self.cache.register(&existing)?;
                return Ok(existing);
            }
            return Err(VectorDbError::AlreadyExists {
                name: name.to_string(),
            });
        }
        metadata.validate()?;

        let collection = Collection {
            id: Uuid::new_v4().to_string(),
            name: name.to_string(),
            metadata,
        };
        self.records.insert_collection(collection.clone())?;
        self.cache.register(&collection)?;

        info!(
            collection = %collection.name,
            id = %collection.id,
            dimensionality = collection.metadata.dimensionality,
            "collection created"
        );
        Ok(collection)
    }

    /// Look up a collection by name and make sure its index is loaded.
    pub fn get_collection(&self, name: &str) -> Result<Collection> {
        let collection = self.resolve(name)?;
        self.cache.register(&collection)?;
        Ok(collection)
    }

    pub fn list_collections(&self) -> Result<Vec<Collection>> {
        self.records.list_collections()
    }

    /// Rename a collection and/or merge new metadata into it.
    ///
    /// The index keeps the parameters it was opened with.
    pub fn update_collection(
        &self,
        current_name: &str,
        new_name: Option<&str>,
        patch: &CollectionMetadataPatch,
    ) -> Result<Collection> {
        let current = self.resolve(current_name)?;
        let metadata = current.metadata.merge(patch);
        metadata.validate()?;

        let name = new_name.unwrap_or(&current.name).to_string();
        if name.trim().is_empty() {
            return Err(VectorDbError::InvalidArgument(
                "collection name must not be empty".to_string(),
            ));
        }
        if name != current.name {
            if let Some(other) = self.records.collection_by_name(&name)? {
                if other.id != current.id {
                    return Err(VectorDbError::AlreadyExists { name });
                }
            }
        }

        if metadata.dimensionality != current.metadata.dimensionality {
            warn!(
                collection = %current.name,
                from = current.metadata.dimensionality,
                to = metadata.dimensionality,
                "dimensionality changed; the existing index is not rebuilt"
            );
        }

        let updated = Collection {
            id: current.id,
            name,
            metadata,
        };
        self.records.update_collection(updated.clone())?;
        info!(collection = %updated.name, id = %updated.id, "collection updated");
        Ok(updated)
    }

    /// Insert new embeddings into a collection. Returns their ids.
    ///
    /// Requires the collection's index to be registered (by
    /// [`Self::create_collection`] or [`Self::get_collection`]).
    pub fn add_embeddings(
        &self,
        collection_name: &str,
        embeddings: Vec<NewEmbedding>,
    ) -> Result<Vec<String>> {
        let collection = self.resolve(collection_name)?;
        if embeddings.is_empty() {
            return Ok(vec![]);
        }
        if let Some(bad) = embeddings.iter().find(|e| e.id.is_empty()) {
            return Err(VectorDbError::InvalidArgument(format!(
                "embedding id must not be empty (document {:?})",
                bad.document_id
            )));
        }

        let index = self.cache.get(&collection.id).ok_or_else(|| {
            VectorDbError::InvalidIndexState(format!(
                "index for collection {} is not loaded",
                collection.name
            ))
        })?;

        let rows: Vec<EmbeddingRecord> = embeddings
            .into_iter()
            .map(|e| e.into_record(&collection.id))
            .collect();
        let ids: Vec<String> = rows.iter().map(|r| r.id.clone()).collect();

        let mut index = index.write();
        let fresh: Vec<String> = ids
            .iter()
            .filter(|id| !index.contains(id))
            .cloned()
            .collect();

        let vectors = rows
            .iter()
            .map(|r| (r.id.clone(), r.embedding.clone()))
            .collect();
        if let Err(e) = index.add_vectors(vectors, false) {
            // A duplicate part-way through leaves the earlier records in the index
            let added: Vec<String> = fresh.into_iter().filter(|id| index.contains(id)).collect();
            if !added.is_empty() {
                self.compensate(&collection, "add", index.delete_vectors(&added));
            }
            return Err(e);
        }

        if let Err(e) = self.records.insert_embeddings(rows) {
            warn!(
                collection = %collection.name,
                error = %e,
                "record insert failed, removing vectors from index"
            );
            self.compensate(&collection, "add", index.delete_vectors(&ids));
            return Err(e);
        }

        self.metrics.lock().record_inserts(ids.len());
        debug!(collection = %collection.name, count = ids.len(), "embeddings added");
        Ok(ids)
    }

    /// Apply a partial update to one embedding of the collection.
    pub fn update_embedding(
        &self,
        collection_name: &str,
        id: &str,
        patch: EmbeddingPatch,
    ) -> Result<EmbeddingRecord> {
        let collection = self.resolve(collection_name)?;
        let existing = self.owned_embedding(&collection, id)?;
        let updated = patch.apply_to(&existing);

        match patch.embedding {
            Some(vector) => {
                let index = self.index_for(&collection)?;
                let mut index = index.write();
                let previous = index.get_vector(id).cloned();

                let result = index
                    .add_vectors(vec![(id.to_string(), vector)], true)
                    .and_then(|()| self.records.update_embedding(updated.clone()));
                if let Err(e) = result {
                    // Also reached when only the snapshot write failed
                    if index.get_vector(id) != previous.as_ref() {
                        warn!(
                            collection = %collection.name,
                            id,
                            error = %e,
                            "embedding update failed, restoring previous vector"
                        );
                        let undo = match previous {
                            Some(previous) => {
                                index.add_vectors(vec![(id.to_string(), previous)], true)
                            }
                            None => index.delete_vectors(&[id.to_string()]),
                        };
                        self.compensate(&collection, "update", undo);
                    }
                    return Err(e);
                }
            }
            None => self.records.update_embedding(updated.clone())?,
        }

        self.metrics.lock().record_update();
        debug!(collection = %collection.name, id, "embedding updated");
        Ok(updated)
    }

    fn owned_embedding(&self, collection: &Collection, id: &str) -> Result<EmbeddingRecord> {
        let record = self
            .records
            .embedding(id)?
            .ok_or_else(|| VectorDbError::embedding_not_found(id))?;
        if record.collection_id != collection.id {
            return Err(VectorDbError::OwnershipMismatch {
                id: id.to_string(),
                collection: collection.name.clone(),
            });
        }
        Ok(record)
    }

    /// Rows matching the query, in id order, after `offset` and `limit`.
    pub fn get(&self, query: &GetQuery) -> Result<Vec<EmbeddingRecord>> {
        let collection_id = match &query.collection_name {
            Some(name) => Some(self.resolve(name)?.id),
            None => None,
        };
        let rows = self
            .records
            .embeddings(collection_id.as_deref(), &query.filter)?;

        Ok(rows
            .into_iter()
            .skip(query.offset.unwrap_or(0))
            .take(query.limit.unwrap_or(usize::MAX))
            .collect())
    }

    /// Approximate nearest neighbors of `query.query` among the rows matching `query.filter`.
    pub fn get_nearest_neighbors(&self, query: &SearchQuery) -> Result<Vec<QueryHit>> {
        if query.k == 0 {
            return Err(VectorDbError::InvalidArgument(
                "k must be at least 1".to_string(),
            ));
        }
        let start = Instant::now();
        let collection = self.resolve(&query.collection_name)?;

        let candidates = if query.filter.is_empty() {
            None
        } else {
            let rows = self
                .records
                .embeddings(Some(&collection.id), &query.filter)?;
            if rows.is_empty() {
                return Ok(vec![]);
            }
            Some(rows.into_iter().map(|r| r.id).collect::<Vec<_>>())
        };

        let index = self.index_for(&collection)?;
        let hits = index
            .read()
            .search(&query.query, query.k, candidates.as_deref())?;

        let hit_ids = Where::ids(hits.iter().map(|h| h.id.clone()));
        let mut rows: HashMap<String, EmbeddingRecord> = self
            .records
            .embeddings(Some(&collection.id), &hit_ids)?
            .into_iter()
            .map(|r| (r.id.clone(), r))
            .collect();

        let results: Vec<QueryHit> = hits
            .into_iter()
            .map(|hit| {
                let row = rows.remove(&hit.id);
                if row.is_none() {
                    warn!(collection = %collection.name, id = %hit.id, "index hit has no record");
                }
                QueryHit {
                    document: row.as_ref().and_then(|r| r.document.clone()),
                    document_id: row.and_then(|r| r.document_id),
                    id: hit.id,
                    distance: hit.distance,
                    embedding: hit.embedding,
                }
            })
            .collect();

        let elapsed = start.elapsed();
        self.metrics.lock().record_query(elapsed);
        debug!(
            collection = %collection.name,
            k = query.k,
            hits = results.len(),
            elapsed_us = elapsed.as_micros() as u64,
            "nearest neighbor query"
        );
        Ok(results)
    }

    pub fn count(&self, collection_name: &str) -> Result<usize> {
        let collection = self.resolve(collection_name)?;
        self.records.count_embeddings(&collection.id)
    }

    /// Delete embeddings by id. Every id must exist and belong to the collection.
    pub fn delete_embeddings(&self, collection_name: &str, ids: &[String]) -> Result<()> {
        let collection = self.resolve(collection_name)?;

        let mut seen = HashSet::new();
        let ids: Vec<String> = ids
            .iter()
            .filter(|id| seen.insert(id.as_str()))
            .cloned()
            .collect();
        if ids.is_empty() {
            return Ok(());
        }
        let rows = ids
            .iter()
            .map(|id| self.owned_embedding(&collection, id))
            .collect::<Result<Vec<_>>>()?;

        let index = self.index_for(&collection)?;
        let mut index = index.write();
        let removed: Vec<(String, Vector)> = rows
            .into_iter()
            .filter(|r| index.contains(&r.id))
            .map(|r| (r.id, r.embedding))
            .collect();

        let result = index
            .delete_vectors(&ids)
            .and_then(|()| self.records.delete_embeddings(&ids));
        if let Err(e) = result {
            let removed: Vec<(String, Vector)> = removed
                .into_iter()
                .filter(|(id, _)| !index.contains(id))
                .collect();
            if !removed.is_empty() {
                warn!(
                    collection = %collection.name,
                    error = %e,
                    "embedding delete failed, re-adding vectors to index"
                );
                self.compensate(&collection, "delete", index.add_vectors(removed, false));
            }
            return Err(e);
        }

        self.metrics.lock().record_deletes(ids.len());
        debug!(collection = %collection.name, count = ids.len(), "embeddings deleted");
        Ok(())
    }

    /// Wipe the collection's persisted index and evict it from the cache.
    ///
    /// The collection and its rows are kept; [`Self::get_collection`] registers
    /// a fresh, uninitialized index again.
    pub fn drop_collection_index(&self, collection_name: &str) -> Result<()> {
        let collection = self.resolve(collection_name)?;
        let index = self.cache.register(&collection)?;
        index.write().drop_index()?;
        self.cache.remove(&collection.id);
        info!(collection = %collection.name, "collection index dropped");
        Ok(())
    }

    /// The first `n` rows of a collection, in id order.
    pub fn peek(&self, collection_name: &str, n: usize) -> Result<Vec<EmbeddingRecord>> {
        self.get(&GetQuery {
            limit: Some(n),
            ..GetQuery::collection(collection_name)
        })
    }

    pub fn stats(&self) -> Result<StoreStats> {
        Ok(StoreStats {
            collections: self.records.list_collections()?.len(),
            loaded_indexes: self.cache.len(),
            metrics: self.metrics.lock().snapshot(),
        })
    }

    fn compensate(&self, collection: &Collection, operation: &str, undo: Result<()>) {
        self.metrics.lock().record_compensation();
        if let Err(e) = undo {
            error!(
                collection = %collection.name,
                operation,
                error = %e,
                "failed to undo index change; index and records may disagree"
            );
        }
    }
}
