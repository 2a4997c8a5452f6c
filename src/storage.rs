//! Vector record store: durable id -> record mapping.
//!
//! Every mutation is appended to the WAL and fsynced before it is applied in
//! memory, so an acknowledged write survives a crash. Mutations are
//! serialized through a single writer lock; readers only take the state
//! read lock for the duration of a map lookup or a scan copy.

use crate::distance::DistanceMetric;
use crate::error::{EngineError, Result};
use crate::metadata::Metadata;
use crate::persistence::checkpoint::CheckpointManager;
use crate::persistence::serialization::{Manifest, StoreImage, FORMAT_VERSION};
use crate::persistence::wal::{WalEntry, WriteAheadLog};
use crate::record::VectorRecord;
use crate::vector::Vector;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

const WAL_FILE: &str = "wal.log";

/// Options for opening a [`RecordStore`].
#[derive(Debug, Clone)]
pub struct StoreOptions {
    pub metric: DistanceMetric,
    pub dimension: Option<usize>,
    /// Checkpoint after this many WAL entries.
    pub checkpoint_interval: usize,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            metric: DistanceMetric::Euclidean,
            dimension: None,
            checkpoint_interval: 1000,
        }
    }
}

/// Result of a successful put.
#[derive(Debug, Clone)]
pub struct PutOutcome {
    pub version: u64,
    /// False when the id already held an identical vector and metadata.
    pub changed: bool,
    pub record: Arc<VectorRecord>,
}

/// A consistent point-in-time view of every live record, sorted by id.
///
/// Iterating does not touch the store, so a scan can be walked any number
/// of times while writers continue.
#[derive(Debug, Clone)]
pub struct StoreScan {
    records: Vec<Arc<VectorRecord>>,
    watermark: u64,
    dimension: Option<usize>,
}

impl StoreScan {
    pub fn iter(&self) -> impl Iterator<Item = &Arc<VectorRecord>> {
        self.records.iter()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Highest sequence number reflected in this scan.
    pub fn watermark(&self) -> u64 {
        self.watermark
    }

    pub fn dimension(&self) -> Option<usize> {
        self.dimension
    }
}

impl<'a> IntoIterator for &'a StoreScan {
    type Item = &'a Arc<VectorRecord>;
    type IntoIter = std::slice::Iter<'a, Arc<VectorRecord>>;

    fn into_iter(self) -> Self::IntoIter {
        self.records.iter()
    }
}

#[derive(Debug, Default)]
struct StoreState {
    records: HashMap<String, Arc<VectorRecord>>,
    dimension: Option<usize>,
    last_seq: u64,
}

impl StoreState {
    fn apply(&mut self, entry: WalEntry) {
        match entry {
            WalEntry::Put { record } => {
                self.dimension.get_or_insert(record.dimension());
                self.last_seq = self.last_seq.max(record.version);
                self.records.insert(record.id.clone(), Arc::new(record));
            }
            WalEntry::Delete { id, seq } => {
                self.records.remove(&id);
                self.last_seq = self.last_seq.max(seq);
            }
            WalEntry::Checkpoint { seq } => {
                self.last_seq = self.last_seq.max(seq);
            }
        }
    }
}

struct Durable {
    wal: WriteAheadLog,
    checkpoints: CheckpointManager,
    wal_count: usize,
    checkpoint_interval: usize,
}

/// Thread-safe record store, optionally backed by a data directory.
pub struct RecordStore {
    state: RwLock<StoreState>,
    writer: Mutex<Option<Durable>>,
    metric: DistanceMetric,
    data_dir: Option<PathBuf>,
    unavailable: AtomicBool,
}

impl RecordStore {
    /// Create an ephemeral store that keeps everything in memory.
    pub fn in_memory(options: StoreOptions) -> Self {
        Self {
            state: RwLock::new(StoreState {
                dimension: options.dimension,
                ..Default::default()
            }),
            writer: Mutex::new(None),
            metric: options.metric,
            data_dir: None,
            unavailable: AtomicBool::new(false),
        }
    }

    /// Open or create a persistent store at the given directory, recovering
    /// from the last checkpoint plus the WAL tail.
    pub fn open(data_dir: impl AsRef<Path>, options: StoreOptions) -> Result<Self> {
        let data_dir = data_dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&data_dir)?;

        let checkpoints = CheckpointManager::new(&data_dir)?;
        let manifest = checkpoints.load_manifest()?;

        let mut metric = options.metric;
        let mut state = StoreState {
            dimension: options.dimension,
            ..Default::default()
        };

        if let Some(manifest) = &manifest {
            if manifest.metric != options.metric {
                warn!(
                    stored = %manifest.metric,
                    configured = %options.metric,
                    "configured metric differs from stored metric; using stored"
                );
            }
            metric = manifest.metric;
            state.dimension = resolve_dimension(manifest.dimension, options.dimension);
        }

        if let Some(image) = checkpoints.load()? {
            metric = image.metric;
            state.dimension = resolve_dimension(image.dimension, state.dimension);
            state.last_seq = image.last_seq;
            for record in image.records {
                state.records.insert(record.id.clone(), Arc::new(record));
            }
        }

        let mut wal = WriteAheadLog::open(data_dir.join(WAL_FILE))?;
        let entries = wal.recover()?;
        let checkpoint_seq = state.last_seq;
        let mut replayed = 0usize;
        for entry in entries {
            if entry.seq() <= checkpoint_seq {
                continue;
            }
            state.apply(entry);
            replayed += 1;
        }

        if manifest.is_none() {
            checkpoints.write_manifest(&Manifest {
                format_version: FORMAT_VERSION,
                dimension: state.dimension,
                metric,
                record_count: state.records.len(),
                last_seq: state.last_seq,
            })?;
        }

        info!(
            path = %data_dir.display(),
            records = state.records.len(),
            replayed,
            last_seq = state.last_seq,
            %metric,
            "opened record store"
        );

        Ok(Self {
            state: RwLock::new(state),
            writer: Mutex::new(Some(Durable {
                wal,
                checkpoints,
                wal_count: replayed,
                checkpoint_interval: options.checkpoint_interval.max(1),
            })),
            metric,
            data_dir: Some(data_dir),
            unavailable: AtomicBool::new(false),
        })
    }

    /// Insert or replace the record for `id`. Returns the new version.
    ///
    /// Fails with `DimensionMismatch` without touching any state when the
    /// vector length disagrees with the store's dimensionality.
    pub fn put(&self, id: &str, vector: Vector, metadata: Metadata) -> Result<PutOutcome> {
        self.ensure_available()?;
        let mut writer = self.writer.lock();

        let (seq, changed) = {
            let state = self.state.read();
            if let Some(expected) = state.dimension {
                if vector.dimension() != expected {
                    return Err(EngineError::DimensionMismatch {
                        expected,
                        actual: vector.dimension(),
                    });
                }
            }
            let changed = state
                .records
                .get(id)
                .map_or(true, |existing| !existing.same_payload(&vector, &metadata));
            (state.last_seq + 1, changed)
        };

        let record = VectorRecord::new(id, vector, metadata, seq);
        if let Some(durable) = writer.as_mut() {
            let entry = WalEntry::Put {
                record: record.clone(),
            };
            durable.wal.append(&entry).map_err(|e| self.mark_unavailable(e))?;
            durable.wal_count += 1;
        }

        let record = Arc::new(record);
        {
            let mut state = self.state.write();
            state.dimension.get_or_insert(record.dimension());
            state.last_seq = seq;
            state.records.insert(record.id.clone(), Arc::clone(&record));
        }
        debug!(id, version = seq, changed, "put record");

        self.maybe_checkpoint(&mut writer);
        Ok(PutOutcome {
            version: seq,
            changed,
            record,
        })
    }

    /// Remove the record for `id`. Returns the tombstone's sequence number.
    pub fn delete(&self, id: &str) -> Result<u64> {
        self.ensure_available()?;
        let mut writer = self.writer.lock();

        let seq = {
            let state = self.state.read();
            if !state.records.contains_key(id) {
                return Err(EngineError::NotFound { id: id.to_string() });
            }
            state.last_seq + 1
        };

        if let Some(durable) = writer.as_mut() {
            let entry = WalEntry::Delete {
                id: id.to_string(),
                seq,
            };
            durable.wal.append(&entry).map_err(|e| self.mark_unavailable(e))?;
            durable.wal_count += 1;
        }

        {
            let mut state = self.state.write();
            state.records.remove(id);
            state.last_seq = seq;
        }
        debug!(id, seq, "deleted record");

        self.maybe_checkpoint(&mut writer);
        Ok(seq)
    }

    /// Point lookup.
    pub fn get(&self, id: &str) -> Result<Arc<VectorRecord>> {
        self.lookup(id)
            .ok_or_else(|| EngineError::NotFound { id: id.to_string() })
    }

    /// Point lookup returning `None` for absent ids.
    pub fn lookup(&self, id: &str) -> Option<Arc<VectorRecord>> {
        self.state.read().records.get(id).cloned()
    }

    /// Take a consistent point-in-time scan of every live record.
    pub fn scan(&self) -> StoreScan {
        let state = self.state.read();
        let mut records: Vec<Arc<VectorRecord>> = state.records.values().cloned().collect();
        let watermark = state.last_seq;
        let dimension = state.dimension;
        drop(state);

        records.sort_by(|a, b| a.id.cmp(&b.id));
        StoreScan {
            records,
            watermark,
            dimension,
        }
    }

    /// Write a checkpoint image and truncate the WAL. No-op for in-memory stores.
    pub fn checkpoint(&self) -> Result<()> {
        let mut writer = self.writer.lock();
        match writer.as_mut() {
            Some(durable) => self.checkpoint_locked(durable),
            None => Ok(()),
        }
    }

    fn checkpoint_locked(&self, durable: &mut Durable) -> Result<()> {
        let scan = self.scan();
        let image = StoreImage {
            format_version: FORMAT_VERSION,
            dimension: scan.dimension,
            metric: self.metric,
            last_seq: scan.watermark,
            records: scan.iter().map(|r| (**r).clone()).collect(),
        };
        durable.checkpoints.save(&image)?;
        durable.wal.append(&WalEntry::Checkpoint {
            seq: scan.watermark,
        })?;
        durable.wal.truncate()?;
        durable.wal_count = 0;
        info!(records = image.records.len(), last_seq = image.last_seq, "checkpointed record store");
        Ok(())
    }

    fn maybe_checkpoint(&self, writer: &mut Option<Durable>) {
        let Some(durable) = writer.as_mut() else {
            return;
        };
        if durable.wal_count < durable.checkpoint_interval {
            return;
        }
        // The WAL still holds every entry, so a failed checkpoint loses
        // nothing; it is retried on the next write.
        if let Err(err) = self.checkpoint_locked(durable) {
            warn!(error = %err, "checkpoint failed");
        }
    }

    fn ensure_available(&self) -> Result<()> {
        if self.unavailable.load(Ordering::Acquire) {
            return Err(EngineError::StoreUnavailable(
                "a previous durable write failed; store is read-only".to_string(),
            ));
        }
        Ok(())
    }

    fn mark_unavailable(&self, err: EngineError) -> EngineError {
        self.unavailable.store(true, Ordering::Release);
        error!(error = %err, "durable write failed; record store is now read-only");
        EngineError::StoreUnavailable(err.to_string())
    }

    #[cfg(test)]
    pub(crate) fn fail_writes(&self) {
        self.unavailable.store(true, Ordering::Release);
    }

    /// Whether durable storage has failed and ingestion is disabled.
    pub fn is_unavailable(&self) -> bool {
        self.unavailable.load(Ordering::Acquire)
    }

    pub fn len(&self) -> usize {
        self.state.read().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn dimension(&self) -> Option<usize> {
        self.state.read().dimension
    }

    pub fn metric(&self) -> DistanceMetric {
        self.metric
    }

    /// Sequence number of the most recent mutation.
    pub fn last_seq(&self) -> u64 {
        self.state.read().last_seq
    }

    pub fn data_dir(&self) -> Option<&Path> {
        self.data_dir.as_deref()
    }
}

fn resolve_dimension(stored: Option<usize>, configured: Option<usize>) -> Option<usize> {
    match (stored, configured) {
        (Some(s), Some(c)) if s != c => {
            warn!(stored = s, configured = c, "configured dimension differs from stored; using stored");
            Some(s)
        }
        (Some(s), _) => Some(s),
        (None, c) => c,
    }
}
