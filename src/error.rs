//! Error types for the vector database

use thiserror::Error;

/// Result type alias for VectorDB operations
pub type Result<T> = std::result::Result<T, VectorDbError>;

/// Error types that can occur in VectorDB operations
#[derive(Error, Debug)]
pub enum VectorDbError {
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    #[error("Collection already exists: {name}")]
    AlreadyExists { name: String },

    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Embedding {id} does not belong to collection {collection}")]
    OwnershipMismatch { id: String, collection: String },

    #[error("Duplicate id: {id}")]
    DuplicateId { id: String },

    #[error("Invalid index state: {0}")]
    InvalidIndexState(String),

    #[error("Requested {requested} nearest neighbors, but only {available} elements are available")]
    RequestedCountExceedsAvailable { requested: usize, available: usize },

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Invalid vector: {reason}")]
    InvalidVector { reason: String },

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Storage error: {0}")]
    StorageError(String),

    #[error("Index error: {0}")]
    IndexError(String),
}

impl VectorDbError {
    pub fn collection_not_found(name: impl Into<String>) -> Self {
        VectorDbError::NotFound {
            kind: "Collection",
            id: name.into(),
        }
    }

    pub fn embedding_not_found(id: impl Into<String>) -> Self {
        VectorDbError::NotFound {
            kind: "Embedding",
            id: id.into(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, VectorDbError::NotFound { .. })
    }
}
