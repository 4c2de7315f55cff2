//! HNSW (Hierarchical Navigable Small World) approximate nearest neighbor graph.

pub mod graph;
pub mod neighbor_queue;

pub use graph::{HnswGraph, HnswParams};
pub use neighbor_queue::Neighbor;
