//! Persistence layer: serialization helpers, snapshots, WAL, and the durable record store.

pub mod engine;
pub mod serialization;
pub mod snapshot;
pub mod wal;
