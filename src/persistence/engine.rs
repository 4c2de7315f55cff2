//! Durable record store: in-memory tables made crash-safe with WAL + snapshots.

use crate::error::Result;
use crate::model::{Collection, EmbeddingRecord, Where};
use crate::persistence::snapshot::SnapshotManager;
use crate::persistence::wal::{WalEntry, WriteAheadLog};
use crate::records::{RecordStore, Statement, Tables};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, error, info, warn};

const SNAPSHOT_FILE: &str = "records.bin";
const MANIFEST_FILE: &str = "manifest.json";
const WAL_FILE: &str = "wal.log";

/// Configuration for the storage engine.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Checkpoint after this many WAL entries.
    pub checkpoint_interval: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            checkpoint_interval: 1000,
        }
    }
}

/// Full image of both tables as written at a checkpoint.
#[derive(Debug, Default, Serialize, Deserialize)]
struct RecordsSnapshot {
    collections: Vec<Collection>,
    embeddings: Vec<EmbeddingRecord>,
}

struct EngineState {
    tables: Tables,
    wal: WriteAheadLog,
    snapshot_mgr: SnapshotManager,
    wal_count: usize,
}

/// Persistent [`RecordStore`].
///
/// A transaction is applied to the in-memory tables first (which validates
/// it) and then appended to the WAL as one entry; if the append fails the
/// tables are rolled back. Every `checkpoint_interval` commits the tables are
/// snapshotted and the WAL truncated.
pub struct DurableRecordStore {
    state: RwLock<EngineState>,
    data_dir: PathBuf,
    config: EngineConfig,
}

impl DurableRecordStore {
    /// Open or create a persistent record store at the given directory.
    pub fn open(data_dir: impl AsRef<Path>, config: EngineConfig) -> Result<Self> {
        let data_dir = data_dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&data_dir)?;

        let snapshot_mgr = SnapshotManager::new(&data_dir, SNAPSHOT_FILE, MANIFEST_FILE)?;
        let mut wal = WriteAheadLog::open(data_dir.join(WAL_FILE))?;

        let mut tables = match snapshot_mgr.load::<RecordsSnapshot>()? {
            Some(snapshot) => Tables::from_rows(snapshot.collections, snapshot.embeddings),
            None => Tables::new(),
        };

        // Replay WAL on top of snapshot
        let replay = wal.replay()?;
        if replay.torn {
            warn!(valid_len = replay.valid_len, "discarding torn WAL tail");
            wal.truncate_to(replay.valid_len)?;
        }
        let mut wal_count = 0;
        for entry in &replay.entries {
            if let WalEntry::Commit { statements } = entry {
                if let Err(e) = tables.apply(statements) {
                    warn!(error = %e, "skipping WAL transaction that no longer applies");
                }
                wal_count += 1;
            }
        }

        info!(
            dir = %data_dir.display(),
            collections = tables.collection_count(),
            embeddings = tables.embedding_count(),
            replayed = wal_count,
            "record store opened"
        );

        Ok(Self {
            state: RwLock::new(EngineState {
                tables,
                wal,
                snapshot_mgr,
                wal_count,
            }),
            data_dir,
            config,
        })
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    /// Force a checkpoint: snapshot + truncate WAL.
    pub fn checkpoint(&self) -> Result<()> {
        let mut state = self.state.write();
        Self::checkpoint_locked(&mut state)
    }

    fn checkpoint_locked(state: &mut EngineState) -> Result<()> {
        let snapshot = RecordsSnapshot {
            collections: state.tables.collections().cloned().collect(),
            embeddings: state.tables.all_embeddings().cloned().collect(),
        };
        let manifest = serde_json::json!({
            "collection_count": snapshot.collections.len(),
            "embedding_count": snapshot.embeddings.len(),
        });
        state.snapshot_mgr.save(&snapshot, &manifest)?;

        state.wal.append(&WalEntry::Checkpoint)?;
        state.wal.truncate()?;
        state.wal_count = 0;

        debug!(
            collections = snapshot.collections.len(),
            embeddings = snapshot.embeddings.len(),
            "record store checkpoint"
        );
        Ok(())
    }
}

impl RecordStore for DurableRecordStore {
    fn execute(&self, statements: Vec<Statement>) -> Result<()> {
        if statements.is_empty() {
            return Ok(());
        }

        let mut state = self.state.write();
        let undo = state.tables.apply(&statements)?;

        if let Err(e) = state.wal.append(&WalEntry::Commit { statements }) {
            error!(error = %e, "WAL append failed, rolling back transaction");
            state.tables.rollback(undo);
            return Err(e);
        }

        state.wal_count += 1;
        if state.wal_count >= self.config.checkpoint_interval {
            // The commit is already durable in the WAL, so a failed
            // checkpoint only delays truncation.
            if let Err(e) = Self::checkpoint_locked(&mut state) {
                warn!(error = %e, "checkpoint failed");
            }
        }
        Ok(())
    }

    fn collection_by_name(&self, name: &str) -> Result<Option<Collection>> {
        Ok(self.state.read().tables.collection_by_name(name).cloned())
    }

    fn collection_by_id(&self, id: &str) -> Result<Option<Collection>> {
        Ok(self.state.read().tables.collection_by_id(id).cloned())
    }

    fn list_collections(&self) -> Result<Vec<Collection>> {
        Ok(self.state.read().tables.collections().cloned().collect())
    }

    fn embedding(&self, id: &str) -> Result<Option<EmbeddingRecord>> {
        Ok(self.state.read().tables.embedding(id).cloned())
    }

    fn embeddings(
        &self,
        collection_id: Option<&str>,
        filter: &Where,
    ) -> Result<Vec<EmbeddingRecord>> {
        Ok(self.state.read().tables.embeddings(collection_id, filter))
    }

    fn count_embeddings(&self, collection_id: &str) -> Result<usize> {
        Ok(self.state.read().tables.count_embeddings(collection_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{CollectionMetadata, NewEmbedding};
    use tempfile::TempDir;

    fn config(checkpoint_interval: usize) -> EngineConfig {
        EngineConfig {
            checkpoint_interval,
        }
    }

    fn collection(id: &str, name: &str) -> Collection {
        Collection {
            id: id.to_string(),
            name: name.to_string(),
            metadata: CollectionMetadata::new(2),
        }
    }

    fn row(id: &str) -> EmbeddingRecord {
        NewEmbedding::new(id, vec![1.0, 0.0])
            .with_document(format!("text {}", id))
            .into_record("c1")
    }

    #[test]
    fn test_engine_wal_recovery() {
        let dir = TempDir::new().unwrap();
        let db_path = dir.path().join("db");

        {
            let store = DurableRecordStore::open(&db_path, config(10_000)).unwrap();
            store.insert_collection(collection("c1", "docs")).unwrap();
            store
                .insert_embeddings(vec![row("a"), row("b"), row("c")])
                .unwrap();
        }

        // Reopen, should recover from WAL
        let store = DurableRecordStore::open(&db_path, config(10_000)).unwrap();
        assert_eq!(store.count_embeddings("c1").unwrap(), 3);
        assert_eq!(
            store.embedding("b").unwrap().unwrap().document.as_deref(),
            Some("text b")
        );
    }

    #[test]
    fn test_engine_checkpoint_and_recovery() {
        let dir = TempDir::new().unwrap();
        let db_path = dir.path().join("db");

        {
            let store = DurableRecordStore::open(&db_path, config(2)).unwrap();
            store.insert_collection(collection("c1", "docs")).unwrap();
            store.insert_embeddings(vec![row("a")]).unwrap();
            // Two commits triggered a checkpoint; this one lands in the fresh WAL
            store.insert_embeddings(vec![row("b")]).unwrap();
            assert!(db_path.join(SNAPSHOT_FILE).exists());
        }

        let store = DurableRecordStore::open(&db_path, config(10_000)).unwrap();
        assert_eq!(store.list_collections().unwrap().len(), 1);
        assert_eq!(store.count_embeddings("c1").unwrap(), 2);
    }

    #[test]
    fn test_engine_delete_and_recovery() {
        let dir = TempDir::new().unwrap();
        let db_path = dir.path().join("db");

        {
            let store = DurableRecordStore::open(&db_path, config(10_000)).unwrap();
            store.insert_collection(collection("c1", "docs")).unwrap();
            store.insert_embeddings(vec![row("a"), row("b")]).unwrap();
            store.delete_embeddings(&["a".to_string()]).unwrap();
        }

        let store = DurableRecordStore::open(&db_path, config(10_000)).unwrap();
        assert!(store.embedding("a").unwrap().is_none());
        assert!(store.embedding("b").unwrap().is_some());
    }

    #[test]
    fn test_failed_transaction_is_not_logged() {
        let dir = TempDir::new().unwrap();
        let db_path = dir.path().join("db");

        {
            let store = DurableRecordStore::open(&db_path, config(10_000)).unwrap();
            store.insert_collection(collection("c1", "docs")).unwrap();
            store.insert_embeddings(vec![row("a")]).unwrap();
            assert!(store.insert_embeddings(vec![row("b"), row("a")]).is_err());
        }

        let store = DurableRecordStore::open(&db_path, config(10_000)).unwrap();
        assert!(store.embedding("b").unwrap().is_none());
        assert_eq!(store.count_embeddings("c1").unwrap(), 1);
    }

    #[test]
    fn test_commits_after_torn_tail_survive_restart() {
        let dir = TempDir::new().unwrap();
        let db_path = dir.path().join("db");

        {
            let store = DurableRecordStore::open(&db_path, config(10_000)).unwrap();
            store.insert_collection(collection("c1", "docs")).unwrap();
        }
        {
            // Crash mid-append
            let mut file = std::fs::OpenOptions::new()
                .append(true)
                .open(db_path.join(WAL_FILE))
                .unwrap();
            std::io::Write::write_all(&mut file, &[9, 0, 0]).unwrap();
        }
        {
            let store = DurableRecordStore::open(&db_path, config(10_000)).unwrap();
            store.insert_embeddings(vec![row("a")]).unwrap();
            assert_eq!(store.count_embeddings("c1").unwrap(), 1);
        }

        let store = DurableRecordStore::open(&db_path, config(10_000)).unwrap();
        assert_eq!(store.list_collections().unwrap().len(), 1);
        assert_eq!(store.count_embeddings("c1").unwrap(), 1);
    }

    #[test]
    fn test_engine_many_rows_recovery() {
        let dir = TempDir::new().unwrap();
        let db_path = dir.path().join("db");

        {
            let store = DurableRecordStore::open(&db_path, config(50)).unwrap();
            store.insert_collection(collection("c1", "docs")).unwrap();
            for i in 0..200 {
                store.insert_embeddings(vec![row(&format!("v{}", i))]).unwrap();
            }
        }

        let store = DurableRecordStore::open(&db_path, config(50)).unwrap();
        assert_eq!(store.count_embeddings("c1").unwrap(), 200);
    }
}
