//! Relational record store: the `collections` and `embeddings` tables.
//!
//! All mutations go through [`RecordStore::execute`], which applies a batch of
//! [`Statement`]s as one transaction. [`Tables`] holds the rows and implements
//! the all-or-nothing semantics with an undo log; [`MemoryRecordStore`] keeps
//! them in memory only, while `persistence::engine::DurableRecordStore` adds a
//! write-ahead log and snapshots.

use crate::error::{Result, VectorDbError};
use crate::model::{Collection, CollectionId, EmbeddingRecord, Where};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One write against the tables.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Statement {
    InsertCollection(Collection),
    UpdateCollection(Collection),
    InsertEmbedding(EmbeddingRecord),
    UpdateEmbedding(EmbeddingRecord),
    DeleteEmbedding(String),
}

/// Inverse of an applied statement.
#[derive(Debug)]
enum Undo {
    RemoveCollection(CollectionId),
    RestoreCollection(Collection),
    RemoveEmbedding(String),
    RestoreEmbedding(EmbeddingRecord),
}

/// Inverses of an applied batch, used to take it back if it cannot be made durable.
#[derive(Debug)]
pub struct UndoLog(Vec<Undo>);

/// Row storage for both tables.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Tables {
    collections: BTreeMap<CollectionId, Collection>,
    embeddings: BTreeMap<String, EmbeddingRecord>,
}

impl Tables {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild tables from snapshot rows.
    pub fn from_rows(collections: Vec<Collection>, embeddings: Vec<EmbeddingRecord>) -> Self {
        Self {
            collections: collections.into_iter().map(|c| (c.id.clone(), c)).collect(),
            embeddings: embeddings.into_iter().map(|e| (e.id.clone(), e)).collect(),
        }
    }

    /// Apply every statement, or none of them if any fails.
    pub fn apply(&mut self, statements: &[Statement]) -> Result<UndoLog> {
        let mut undo = Vec::with_capacity(statements.len());
        for statement in statements {
            match self.apply_one(statement) {
                Ok(u) => undo.push(u),
                Err(e) => {
                    self.rollback(UndoLog(undo));
                    return Err(e);
                }
            }
        }
        Ok(UndoLog(undo))
    }

    fn apply_one(&mut self, statement: &Statement) -> Result<Undo> {
        match statement {
            Statement::InsertCollection(collection) => {
                if self.name_taken(&collection.name, None) {
                    return Err(VectorDbError::AlreadyExists {
                        name: collection.name.clone(),
                    });
                }
                if self.collections.contains_key(&collection.id) {
                    return Err(VectorDbError::StorageError(format!(
                        "Collection id {} already exists",
                        collection.id
                    )));
                }
                self.collections
                    .insert(collection.id.clone(), collection.clone());
                Ok(Undo::RemoveCollection(collection.id.clone()))
            }
            Statement::UpdateCollection(collection) => {
                if self.name_taken(&collection.name, Some(&collection.id)) {
                    return Err(VectorDbError::AlreadyExists {
                        name: collection.name.clone(),
                    });
                }
                let previous = self
                    .collections
                    .insert(collection.id.clone(), collection.clone());
                match previous {
                    Some(prev) => Ok(Undo::RestoreCollection(prev)),
                    None => {
                        self.collections.remove(&collection.id);
                        Err(VectorDbError::collection_not_found(&collection.id))
                    }
                }
            }
            Statement::InsertEmbedding(record) => {
                if !self.collections.contains_key(&record.collection_id) {
                    return Err(VectorDbError::collection_not_found(&record.collection_id));
                }
                if self.embeddings.contains_key(&record.id) {
                    return Err(VectorDbError::DuplicateId {
                        id: record.id.clone(),
                    });
                }
                self.embeddings.insert(record.id.clone(), record.clone());
                Ok(Undo::RemoveEmbedding(record.id.clone()))
            }
            Statement::UpdateEmbedding(record) => {
                let previous = self
                    .embeddings
                    .get(&record.id)
                    .cloned()
                    .ok_or_else(|| VectorDbError::embedding_not_found(&record.id))?;
                self.embeddings.insert(record.id.clone(), record.clone());
                Ok(Undo::RestoreEmbedding(previous))
            }
            Statement::DeleteEmbedding(id) => {
                let previous = self
                    .embeddings
                    .remove(id)
                    .ok_or_else(|| VectorDbError::embedding_not_found(id))?;
                Ok(Undo::RestoreEmbedding(previous))
            }
        }
    }

    /// Revert a previously applied batch.
    pub fn rollback(&mut self, undo: UndoLog) {
        for u in undo.0.into_iter().rev() {
            match u {
                Undo::RemoveCollection(id) => {
                    self.collections.remove(&id);
                }
                Undo::RestoreCollection(c) => {
                    self.collections.insert(c.id.clone(), c);
                }
                Undo::RemoveEmbedding(id) => {
                    self.embeddings.remove(&id);
                }
                Undo::RestoreEmbedding(e) => {
                    self.embeddings.insert(e.id.clone(), e);
                }
            }
        }
    }

    fn name_taken(&self, name: &str, except: Option<&str>) -> bool {
        self.collections
            .values()
            .any(|c| c.name == name && Some(c.id.as_str()) != except)
    }

    pub fn collection_by_name(&self, name: &str) -> Option<&Collection> {
        self.collections.values().find(|c| c.name == name)
    }

    pub fn collection_by_id(&self, id: &str) -> Option<&Collection> {
        self.collections.get(id)
    }

    pub fn collections(&self) -> impl Iterator<Item = &Collection> {
        self.collections.values()
    }

    pub fn embedding(&self, id: &str) -> Option<&EmbeddingRecord> {
        self.embeddings.get(id)
    }

    pub fn all_embeddings(&self) -> impl Iterator<Item = &EmbeddingRecord> {
        self.embeddings.values()
    }

    /// Rows in scope matching `filter`, ordered by id.
    pub fn embeddings(&self, collection_id: Option<&str>, filter: &Where) -> Vec<EmbeddingRecord> {
        let in_scope =
            |r: &EmbeddingRecord| collection_id.map_or(true, |c| r.collection_id == c);

        match &filter.ids {
            // Primary-key lookups instead of a scan
            Some(ids) => {
                let mut rows: Vec<EmbeddingRecord> = ids
                    .iter()
                    .filter_map(|id| self.embeddings.get(id))
                    .filter(|r| in_scope(r) && filter.matches(r))
                    .cloned()
                    .collect();
                rows.sort_by(|a, b| a.id.cmp(&b.id));
                rows.dedup_by(|a, b| a.id == b.id);
                rows
            }
            None => self
                .embeddings
                .values()
                .filter(|r| in_scope(r) && filter.matches(r))
                .cloned()
                .collect(),
        }
    }

    pub fn count_embeddings(&self, collection_id: &str) -> usize {
        self.embeddings
            .values()
            .filter(|r| r.collection_id == collection_id)
            .count()
    }

    pub fn collection_count(&self) -> usize {
        self.collections.len()
    }

    pub fn embedding_count(&self) -> usize {
        self.embeddings.len()
    }
}

/// Transactional relational storage for collections and embedding rows.
pub trait RecordStore: Send + Sync {
    /// Apply all statements atomically.
    fn execute(&self, statements: Vec<Statement>) -> Result<()>;

    fn collection_by_name(&self, name: &str) -> Result<Option<Collection>>;

    fn collection_by_id(&self, id: &str) -> Result<Option<Collection>>;

    fn list_collections(&self) -> Result<Vec<Collection>>;

    fn embedding(&self, id: &str) -> Result<Option<EmbeddingRecord>>;

    /// Rows in `collection_id` (or every collection) matching `filter`, ordered by id.
    fn embeddings(
        &self,
        collection_id: Option<&str>,
        filter: &Where,
    ) -> Result<Vec<EmbeddingRecord>>;

    fn count_embeddings(&self, collection_id: &str) -> Result<usize>;

    fn insert_collection(&self, collection: Collection) -> Result<()> {
        self.execute(vec![Statement::InsertCollection(collection)])
    }

    fn update_collection(&self, collection: Collection) -> Result<()> {
        self.execute(vec![Statement::UpdateCollection(collection)])
    }

    fn insert_embeddings(&self, records: Vec<EmbeddingRecord>) -> Result<()> {
        self.execute(records.into_iter().map(Statement::InsertEmbedding).collect())
    }

    fn update_embedding(&self, record: EmbeddingRecord) -> Result<()> {
        self.execute(vec![Statement::UpdateEmbedding(record)])
    }

    fn delete_embeddings(&self, ids: &[String]) -> Result<()> {
        self.execute(
            ids.iter()
                .cloned()
                .map(Statement::DeleteEmbedding)
                .collect(),
        )
    }
}

/// Non-durable [`RecordStore`]; contents are lost when dropped.
#[derive(Debug, Default)]
pub struct MemoryRecordStore {
    tables: RwLock<Tables>,
}

impl MemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl RecordStore for MemoryRecordStore {
    fn execute(&self, statements: Vec<Statement>) -> Result<()> {
        self.tables.write().apply(&statements).map(|_| ())
    }

    fn collection_by_name(&self, name: &str) -> Result<Option<Collection>> {
        Ok(self.tables.read().collection_by_name(name).cloned())
    }

    fn collection_by_id(&self, id: &str) -> Result<Option<Collection>> {
        Ok(self.tables.read().collection_by_id(id).cloned())
    }

    fn list_collections(&self) -> Result<Vec<Collection>> {
        Ok(self.tables.read().collections().cloned().collect())
    }

    fn embedding(&self, id: &str) -> Result<Option<EmbeddingRecord>> {
        Ok(self.tables.read().embedding(id).cloned())
    }

    fn embeddings(
        &self,
        collection_id: Option<&str>,
        filter: &Where,
    ) -> Result<Vec<EmbeddingRecord>> {
        Ok(self.tables.read().embeddings(collection_id, filter))
    }

    fn count_embeddings(&self, collection_id: &str) -> Result<usize> {
        Ok(self.tables.read().count_embeddings(collection_id))
    }
}
