//! Runtime settings.

use crate::error::{Result, VectorDbError};
use std::path::PathBuf;

pub const PERSIST_DIR_ENV: &str = "VECTORDB_PERSIST_DIR";
pub const CHECKPOINT_INTERVAL_ENV: &str = "VECTORDB_CHECKPOINT_INTERVAL";

/// Where and how a [`crate::CollectionStore`] keeps its data.
///
/// Records live under `<persist_directory>/records` and index snapshots under
/// `<persist_directory>/index/<collection_id>`.
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub persist_directory: PathBuf,
    /// Record store commits between checkpoints.
    pub checkpoint_interval: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            persist_directory: PathBuf::from("./vectordb_data"),
            checkpoint_interval: 1000,
        }
    }
}

impl Settings {
    pub fn new(persist_directory: impl Into<PathBuf>) -> Self {
        Self {
            persist_directory: persist_directory.into(),
            ..Self::default()
        }
    }

    /// Defaults overridden by `VECTORDB_PERSIST_DIR` and `VECTORDB_CHECKPOINT_INTERVAL`.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut settings = Self::default();
        if let Some(dir) = lookup(PERSIST_DIR_ENV) {
            settings.persist_directory = PathBuf::from(dir);
        }
        if let Some(raw) = lookup(CHECKPOINT_INTERVAL_ENV) {
            settings.checkpoint_interval = raw.trim().parse().map_err(|_| {
                VectorDbError::InvalidArgument(format!(
                    "{} must be a positive integer, got '{}'",
                    CHECKPOINT_INTERVAL_ENV, raw
                ))
            })?;
        }
        settings.validate()?;
        Ok(settings)
    }

    pub fn with_checkpoint_interval(mut self, checkpoint_interval: usize) -> Self {
        self.checkpoint_interval = checkpoint_interval;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.checkpoint_interval == 0 {
            return Err(VectorDbError::InvalidArgument(
                "checkpoint interval must be positive".to_string(),
            ));
        }
        Ok(())
    }

    pub fn records_dir(&self) -> PathBuf {
        self.persist_directory.join("records")
    }

    pub fn index_dir(&self) -> PathBuf {
        self.persist_directory.join("index")
    }
}
