//! Persistence layer: WAL, checkpoints, and crash recovery.

pub mod checkpoint;
pub mod serialization;
pub mod wal;
