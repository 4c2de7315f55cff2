//! Snapshot: save/load a full state image to/from disk.

use crate::error::Result;
use crate::persistence::serialization;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Manages one bincode snapshot file plus a human-readable JSON manifest.
#[derive(Debug, Clone)]
pub struct SnapshotManager {
    dir: PathBuf,
    data_file: String,
    manifest_file: String,
}

impl SnapshotManager {
    /// Create a snapshot manager writing `data_file` and `manifest_file` inside `dir`.
    pub fn new(
        dir: impl AsRef<Path>,
        data_file: impl Into<String>,
        manifest_file: impl Into<String>,
    ) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            data_file: data_file.into(),
            manifest_file: manifest_file.into(),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn snapshot_path(&self) -> PathBuf {
        self.dir.join(&self.data_file)
    }

    pub fn manifest_path(&self) -> PathBuf {
        self.dir.join(&self.manifest_file)
    }

    /// Save a snapshot to disk. The data file is replaced atomically.
    pub fn save<T: Serialize>(&self, value: &T, manifest: &serde_json::Value) -> Result<()> {
        let data = serialization::to_bincode(value)?;
        serialization::write_atomic(&self.snapshot_path(), &data)?;

        let manifest_bytes = serialization::to_json(manifest)?;
        serialization::write_atomic(&self.manifest_path(), &manifest_bytes)?;

        debug!(
            path = %self.snapshot_path().display(),
            bytes = data.len(),
            "snapshot written"
        );
        Ok(())
    }

    /// Load a snapshot from disk, or return None if no snapshot exists.
    pub fn load<T: DeserializeOwned>(&self) -> Result<Option<T>> {
        let path = self.snapshot_path();
        if !path.exists() {
            return Ok(None);
        }

        let data = fs::read(&path)?;
        let value = serialization::from_bincode(&data)?;
        Ok(Some(value))
    }

    /// Read back the JSON manifest written by the last save.
    pub fn load_manifest(&self) -> Result<Option<serde_json::Value>> {
        let path = self.manifest_path();
        if !path.exists() {
            return Ok(None);
        }
        serialization::from_json(&fs::read(&path)?).map(Some)
    }

    /// Check if a snapshot exists.
    pub fn exists(&self) -> bool {
        self.snapshot_path().exists()
    }

    /// Delete the snapshot and manifest, if present.
    pub fn remove(&self) -> Result<()> {
        for path in [self.snapshot_path(), self.manifest_path()] {
            match fs::remove_file(&path) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }
}
