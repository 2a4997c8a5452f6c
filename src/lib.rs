//! # vectordb_engine
//!
//! An embedding-backed vector similarity search engine.
//!
//! This library provides:
//! - A durable record store (WAL + checkpoints) keyed by string id
//! - Distance metrics (Euclidean, Cosine, Dot Product)
//! - Exact and HNSW index strategies built into immutable snapshots
//! - An index manager that publishes snapshots atomically and absorbs
//!   ingestion deltas by full rebuild or an incremental overlay
//! - Filtered k-NN search joined with current record metadata
//!
//! ## Example
//!
//! ```rust
//! use vectordb_engine::{DistanceMetric, EngineConfig, Metadata, VectorEngine};
//!
//! let engine = VectorEngine::open(EngineConfig::in_memory(DistanceMetric::Euclidean)).unwrap();
//!
//! engine.ingest("a", vec![0.0, 0.0, 0.0], Metadata::new()).unwrap();
//! engine.ingest("b", vec![1.0, 0.0, 0.0], Metadata::new()).unwrap();
//! engine.rebuild_now().unwrap();
//!
//! let response = engine.search(vec![0.1, 0.0, 0.0], 1, None).unwrap();
//! assert_eq!(response.ids(), vec!["a"]);
//! ```

pub mod config;
pub mod distance;
pub mod engine;
pub mod error;
pub mod flat_index;
pub mod hnsw;
pub mod index;
pub mod ingest;
pub mod manager;
pub mod metadata;
pub mod persistence;
pub mod query;
pub mod record;
pub mod stats;
pub mod storage;
pub mod telemetry;
pub mod vector;

pub use config::{EngineConfig, RebuildPolicy};
pub use distance::DistanceMetric;
pub use engine::{EngineStatus, VectorEngine};
pub use error::{EngineError, Result};
pub use flat_index::FlatIndex;
pub use hnsw::{HnswIndex, HnswParams};
pub use index::{Index, IndexKind, IndexSnapshot};
pub use ingest::IngestItem;
pub use manager::{IndexState, RebuildReport};
pub use metadata::{Filter, Metadata, MetadataValue};
pub use query::{QueryRequest, QueryResponse, SearchHit};
pub use record::VectorRecord;
pub use storage::{RecordStore, StoreOptions};
pub use vector::Vector;
