//! The engine facade: wires store, index manager, query engine, ingestion
//! pipeline and the background rebuild worker together.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use tracing::{info, warn};

use crate::config::EngineConfig;
use crate::error::Result;
use crate::ingest::{IngestItem, IngestPipeline};
use crate::manager::rebuilder::{spawn_rebuilder, Rebuilder};
use crate::manager::{IndexManager, IndexState, ManagerOptions, RebuildReport};
use crate::metadata::{Filter, Metadata};
use crate::query::{QueryEngine, QueryRequest, QueryResponse};
use crate::record::VectorRecord;
use crate::stats::{EngineStats, StatsSnapshot};
use crate::storage::{RecordStore, StoreOptions};
use crate::vector::Vector;

/// Engine health as reported by [`VectorEngine::status`].
#[derive(Debug, Clone, Serialize)]
pub struct EngineStatus {
    pub state: IndexState,
    pub record_count: usize,
    /// Time since the published snapshot was built; `None` before the first.
    pub snapshot_age: Option<Duration>,
    pub snapshot_records: usize,
    pub snapshot_generation: Option<u64>,
    pub pending_deltas: usize,
    /// Durable storage failed: ingestion is refused, queries keep serving.
    pub degraded: bool,
    pub last_rebuild_error: Option<String>,
    pub stats: StatsSnapshot,
}

pub struct VectorEngine {
    config: EngineConfig,
    store: Arc<RecordStore>,
    manager: Arc<IndexManager>,
    ingest: IngestPipeline,
    query: QueryEngine,
    stats: Arc<EngineStats>,
    rebuilder: Mutex<Option<Rebuilder>>,
}

impl VectorEngine {
    /// Open an engine, recovering persisted records when `data_dir` is set.
    ///
    /// A non-empty store starts its first index build in the background
    /// immediately; queries wait up to `initial_build_wait` for it.
    pub fn open(config: EngineConfig) -> Result<Self> {
        config.validate()?;

        let store_options = StoreOptions {
            metric: config.metric,
            dimension: config.dimension,
            checkpoint_interval: config.checkpoint_interval,
        };
        let store = Arc::new(match &config.data_dir {
            Some(dir) => RecordStore::open(dir, store_options)?,
            None => RecordStore::in_memory(store_options),
        });

        let stats = Arc::new(EngineStats::new());
        let manager = Arc::new(IndexManager::new(
            Arc::clone(&store),
            ManagerOptions {
                index: config.index,
                policy: config.policy,
                rebuild_threshold: config.rebuild_threshold,
                initial_build_wait: config.initial_build_wait,
                max_index_records: config.max_index_records,
            },
            Arc::clone(&stats),
        ));
        let rebuilder = spawn_rebuilder(Arc::clone(&manager), config.rebuild_interval);

        let ingest = IngestPipeline::new(
            Arc::clone(&store),
            Arc::clone(&manager),
            Arc::clone(&stats),
            config.normalize_vectors,
        );
        let query = QueryEngine::new(Arc::clone(&store), Arc::clone(&manager), Arc::clone(&stats));

        if !store.is_empty() {
            manager.begin_initial_build();
        }

        info!(
            records = store.len(),
            metric = %store.metric(),
            index = config.index.name(),
            policy = ?config.policy,
            persistent = config.data_dir.is_some(),
            "vector engine opened"
        );

        Ok(Self {
            config,
            store,
            manager,
            ingest,
            query,
            stats,
            rebuilder: Mutex::new(Some(rebuilder)),
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Insert or update `id`. Returns the record's new version.
    pub fn ingest(&self, id: &str, vector: impl Into<Vector>, metadata: Metadata) -> Result<u64> {
        self.ingest.ingest(id, vector.into(), metadata)
    }

    pub fn ingest_batch(&self, items: Vec<IngestItem>) -> Result<Vec<u64>> {
        self.ingest.ingest_batch(items)
    }

    /// Remove `id`. Returns false when it was not present.
    pub fn remove(&self, id: &str) -> Result<bool> {
        self.ingest.remove(id)
    }

    /// The `k` nearest records to `vector`, optionally post-filtered.
    pub fn search(&self, vector: impl Into<Vector>, k: usize, filter: Option<Filter>) -> Result<QueryResponse> {
        let mut request = QueryRequest::new(vector, k);
        request.filter = filter;
        self.query.search(&request)
    }

    pub fn query(&self, request: &QueryRequest) -> Result<QueryResponse> {
        self.query.search(request)
    }

    pub fn get(&self, id: &str) -> Result<Arc<VectorRecord>> {
        self.store.get(id)
    }

    pub fn status(&self) -> EngineStatus {
        let snapshot = self.manager.snapshot();
        EngineStatus {
            state: self.manager.state(),
            record_count: self.store.len(),
            snapshot_age: snapshot.as_ref().map(|s| s.age()),
            snapshot_records: snapshot.as_ref().map_or(0, |s| s.len()),
            snapshot_generation: snapshot.as_ref().map(|s| s.generation()),
            pending_deltas: self.manager.pending_deltas(),
            degraded: self.store.is_unavailable(),
            last_rebuild_error: self.manager.last_error(),
            stats: self.stats.snapshot(),
        }
    }

    /// Rebuild and publish now, regardless of thresholds.
    pub fn rebuild_now(&self) -> Result<Option<RebuildReport>> {
        self.manager.rebuild_once(true)
    }

    /// Stop the rebuild worker and checkpoint the store.
    pub fn close(&self) -> Result<()> {
        self.stop_worker();
        if self.store.is_unavailable() {
            warn!("skipping checkpoint on close: record store is unavailable");
            return Ok(());
        }
        self.store.checkpoint()?;
        info!(records = self.store.len(), "vector engine closed");
        Ok(())
    }

    fn stop_worker(&self) {
        if let Some(mut rebuilder) = self.rebuilder.lock().take() {
            rebuilder.shutdown(&self.manager);
        }
    }

    pub(crate) fn worker_running(&self) -> bool {
        self.rebuilder
            .lock()
            .as_ref()
            .is_some_and(|r| r.is_running())
    }

    #[cfg(test)]
    pub(crate) fn store(&self) -> &RecordStore {
        &self.store
    }
}

impl Drop for VectorEngine {
    fn drop(&mut self) {
        self.stop_worker();
    }
}
