//! # Embedded vector database
//!
//! Named collections of embeddings, each with an optional document and three
//! filterable attributes, searchable by approximate nearest neighbors under
//! cosine distance.
//!
//! This library provides:
//! - A per-collection HNSW index with stable string ids and tombstone deletes
//! - A transactional record store for collections and embedding rows,
//!   made durable with a write-ahead log and snapshots
//! - A [`CollectionStore`] that keeps both in agreement
//!
//! ## Example
//!
//! ```rust
//! use vectordb_embedded::{CollectionMetadata, CollectionStore, NewEmbedding, SearchQuery, Settings};
//!
//! let dir = tempfile::tempdir().unwrap();
//! let store = CollectionStore::open(&Settings::new(dir.path())).unwrap();
//!
//! store
//!     .create_collection("docs", CollectionMetadata::new(3), false)
//!     .unwrap();
//! store
//!     .add_embeddings(
//!         "docs",
//!         vec![
//!             NewEmbedding::new("a", vec![1.0, 0.0, 0.0]),
//!             NewEmbedding::new("b", vec![0.0, 1.0, 0.0]),
//!         ],
//!     )
//!     .unwrap();
//!
//! let hits = store
//!     .get_nearest_neighbors(&SearchQuery::new("docs", vec![0.9, 0.1, 0.0], 1))
//!     .unwrap();
//! assert_eq!(hits[0].id, "a");
//! ```

pub mod collection;
pub mod config;
pub mod distance;
pub mod error;
pub mod hnsw;
pub mod index;
pub mod metrics;
pub mod model;
pub mod persistence;
pub mod records;
pub mod vector;

pub use collection::{CollectionStore, StoreStats};
pub use config::Settings;
pub use distance::DistanceMetric;
pub use error::{Result, VectorDbError};
pub use hnsw::{HnswGraph, HnswParams};
pub use index::{IndexCache, IndexHit, IndexMetadata, IndexParams, VectorIndex};
pub use metrics::{MetricsCollector, MetricsSnapshot};
pub use model::{
    AttrValue, Collection, CollectionMetadata, CollectionMetadataPatch, EmbeddingPatch,
    EmbeddingRecord, GetQuery, NewEmbedding, QueryHit, SearchQuery, Where,
};
pub use persistence::engine::{DurableRecordStore, EngineConfig};
pub use records::{MemoryRecordStore, RecordStore, Statement};
pub use vector::Vector;
