//! Index manager: owns the published snapshot and absorbs ingestion deltas.
//!
//! The published view (snapshot plus overlay) lives behind a single
//! [`ArcSwap`]. Queries `load` it once and keep their `Arc` for the whole
//! call, so a retired snapshot is freed when its last reader finishes.
//! Every publish happens while holding the delta lock, so a delta is
//! either folded into the snapshot (seq <= watermark) or still pending.

pub mod delta;
pub(crate) mod rebuilder;

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::{mpsc, Arc};
use std::time::{Duration, Instant};

use arc_swap::ArcSwap;
use parking_lot::{Condvar, Mutex};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::RebuildPolicy;
use crate::error::{EngineError, Result};
use crate::index::{IndexKind, IndexSnapshot};
use crate::stats::EngineStats;
use crate::storage::RecordStore;

pub use delta::{DeltaOp, Overlay, OverlayEntry, PendingDelta};

/// Lifecycle of the published index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IndexState {
    /// No snapshot has been published and none is being built.
    Empty,
    /// The first snapshot is being built.
    Building,
    /// A snapshot is published and no rebuild is running.
    Ready,
    /// A snapshot is published and its replacement is being built.
    Rebuilding,
}

impl IndexState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            1 => IndexState::Building,
            2 => IndexState::Ready,
            3 => IndexState::Rebuilding,
            _ => IndexState::Empty,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            IndexState::Empty => 0,
            IndexState::Building => 1,
            IndexState::Ready => 2,
            IndexState::Rebuilding => 3,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            IndexState::Empty => "EMPTY",
            IndexState::Building => "BUILDING",
            IndexState::Ready => "READY",
            IndexState::Rebuilding => "REBUILDING",
        }
    }
}

impl std::fmt::Display for IndexState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What queries read: the current snapshot and the deltas layered over it.
#[derive(Debug, Default)]
pub struct PublishedView {
    pub snapshot: Option<Arc<IndexSnapshot>>,
    pub overlay: Arc<Overlay>,
}

impl PublishedView {
    fn watermark(&self) -> u64 {
        self.snapshot.as_ref().map_or(0, |s| s.watermark())
    }
}

/// Settings the manager needs from the engine configuration.
#[derive(Debug, Clone)]
pub struct ManagerOptions {
    pub index: IndexKind,
    pub policy: RebuildPolicy,
    pub rebuild_threshold: usize,
    pub initial_build_wait: Duration,
    pub max_index_records: Option<usize>,
}

/// Outcome of one successful publish.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RebuildReport {
    pub generation: u64,
    pub records: usize,
    pub watermark: u64,
    pub elapsed: Duration,
}

pub struct IndexManager {
    store: Arc<RecordStore>,
    options: ManagerOptions,
    stats: Arc<EngineStats>,
    view: ArcSwap<PublishedView>,
    state: AtomicU8,
    deltas: Mutex<PendingDelta>,
    rebuild_lock: Mutex<()>,
    ready_lock: Mutex<()>,
    ready: Condvar,
    generation: AtomicU64,
    last_error: Mutex<Option<String>>,
    /// Set by a failed rebuild; the count trigger stays off until a
    /// publish succeeds, leaving retries to the interval.
    backoff: AtomicBool,
    trigger: Mutex<Option<mpsc::Sender<()>>>,
}

impl IndexManager {
    pub fn new(store: Arc<RecordStore>, options: ManagerOptions, stats: Arc<EngineStats>) -> Self {
        Self {
            store,
            options,
            stats,
            view: ArcSwap::from_pointee(PublishedView::default()),
            state: AtomicU8::new(IndexState::Empty.as_u8()),
            deltas: Mutex::new(PendingDelta::default()),
            rebuild_lock: Mutex::new(()),
            ready_lock: Mutex::new(()),
            ready: Condvar::new(),
            generation: AtomicU64::new(0),
            last_error: Mutex::new(None),
            backoff: AtomicBool::new(false),
            trigger: Mutex::new(None),
        }
    }

    pub fn state(&self) -> IndexState {
        IndexState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn set_state(&self, state: IndexState) {
        self.state.store(state.as_u8(), Ordering::Release);
    }

    pub fn policy(&self) -> RebuildPolicy {
        self.options.policy
    }

    /// Pin the current view. The returned `Arc` keeps it alive for as long
    /// as the caller holds it.
    pub fn view(&self) -> Arc<PublishedView> {
        self.view.load_full()
    }

    pub fn snapshot(&self) -> Option<Arc<IndexSnapshot>> {
        self.view.load().snapshot.clone()
    }

    pub fn pending_deltas(&self) -> usize {
        self.deltas.lock().len()
    }

    pub fn last_error(&self) -> Option<String> {
        self.last_error.lock().clone()
    }

    /// Record a mutation the store has already made durable.
    pub fn notify(&self, op: DeltaOp) {
        let pending = {
            let mut deltas = self.deltas.lock();
            let view = self.view.load();
            if op.seq() <= view.watermark() {
                // A rebuild that scanned after this write already covers it.
                return;
            }
            if self.options.policy == RebuildPolicy::IncrementalOverlay && view.snapshot.is_some() {
                let mut overlay = Overlay::clone(&view.overlay);
                overlay.apply(op.clone());
                self.view.store(Arc::new(PublishedView {
                    snapshot: view.snapshot.clone(),
                    overlay: Arc::new(overlay),
                }));
            }
            deltas.push(op);
            deltas.len()
        };

        if self.backing_off() {
            return;
        }
        if self.view.load().snapshot.is_none() {
            self.begin_initial_build();
        } else if pending >= self.options.rebuild_threshold {
            debug!(pending, "rebuild threshold reached");
            self.signal();
        }
    }

    /// Whether a failed rebuild has paused count-triggered rebuilds.
    pub fn backing_off(&self) -> bool {
        self.backoff.load(Ordering::Acquire)
    }

    /// Move EMPTY to BUILDING and wake the worker. No-op in any other
    /// state, or when no worker is attached to run the build.
    pub fn begin_initial_build(&self) {
        if !self.has_worker() {
            return;
        }
        let moved = self
            .state
            .compare_exchange(
                IndexState::Empty.as_u8(),
                IndexState::Building.as_u8(),
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok();
        if moved {
            debug!("initial index build requested");
            self.signal();
        }
    }

    /// Block up to the configured wait while the first snapshot is being
    /// built. Returns immediately in every other state.
    pub fn wait_for_initial(&self) {
        let building = || self.state() == IndexState::Building && self.view.load().snapshot.is_none();
        if !building() || !self.has_worker() {
            return;
        }
        let mut guard = self.ready_lock.lock();
        self.ready
            .wait_while_for(&mut guard, |_| building(), self.options.initial_build_wait);
    }

    /// Whether the worker should run a rebuild now. `interval_elapsed` makes
    /// any pending delta sufficient.
    pub(crate) fn wants_rebuild(&self, interval_elapsed: bool) -> bool {
        if self.backing_off() && !interval_elapsed {
            return false;
        }
        let pending = self.pending_deltas();
        let has_snapshot = self.view.load().snapshot.is_some();
        if !has_snapshot {
            return pending > 0 || !self.store.is_empty();
        }
        pending >= self.options.rebuild_threshold || (interval_elapsed && pending > 0)
    }

    /// Build a snapshot from a fresh store scan and publish it.
    ///
    /// Without `force`, returns `Ok(None)` when a snapshot exists and no
    /// deltas are pending. On failure the previous snapshot stays published.
    pub fn rebuild_once(&self, force: bool) -> Result<Option<RebuildReport>> {
        let _rebuild_guard = self.rebuild_lock.lock();

        let current = self.view.load_full();
        let pending = self.pending_deltas();
        if current.snapshot.is_some() && pending == 0 && !force {
            return Ok(None);
        }
        if current.snapshot.is_none() && pending == 0 && self.store.is_empty() && !force {
            return Ok(None);
        }

        let had_snapshot = current.snapshot.is_some();
        self.set_state(if had_snapshot {
            IndexState::Rebuilding
        } else {
            IndexState::Building
        });

        let started = Instant::now();
        match self.build_snapshot() {
            Ok(snapshot) => Ok(Some(self.publish(snapshot, started))),
            Err(err) => {
                self.set_state(if had_snapshot {
                    IndexState::Ready
                } else {
                    IndexState::Empty
                });
                *self.last_error.lock() = Some(err.to_string());
                self.backoff.store(true, Ordering::Release);
                self.stats.record_rebuild_failure();
                self.wake_waiters();
                warn!(error = %err, kept_previous = had_snapshot, "index rebuild failed");
                Err(err)
            }
        }
    }

    fn build_snapshot(&self) -> Result<IndexSnapshot> {
        let scan = self.store.scan();
        if let Some(max) = self.options.max_index_records {
            if scan.len() > max {
                return Err(EngineError::RebuildFailed(format!(
                    "{} records exceed the index ceiling of {}",
                    scan.len(),
                    max
                )));
            }
        }

        let snapshot = self
            .options
            .index
            .build(scan.iter().map(|r| r.as_ref()), self.store.metric())
            .map_err(|e| EngineError::RebuildFailed(e.to_string()))?;
        let generation = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
        Ok(snapshot
            .with_watermark(scan.watermark())
            .with_generation(generation))
    }

    fn publish(&self, snapshot: IndexSnapshot, started: Instant) -> RebuildReport {
        let report = RebuildReport {
            generation: snapshot.generation(),
            records: snapshot.len(),
            watermark: snapshot.watermark(),
            elapsed: started.elapsed(),
        };

        {
            let mut deltas = self.deltas.lock();
            deltas.retain_after(report.watermark);
            let overlay = match self.options.policy {
                RebuildPolicy::IncrementalOverlay => deltas.collapse(),
                RebuildPolicy::FullRebuild => Overlay::default(),
            };
            self.view.store(Arc::new(PublishedView {
                snapshot: Some(Arc::new(snapshot)),
                overlay: Arc::new(overlay),
            }));
            self.set_state(IndexState::Ready);
        }

        *self.last_error.lock() = None;
        self.backoff.store(false, Ordering::Release);
        self.stats.record_rebuild_success(report.records);
        self.wake_waiters();
        info!(
            generation = report.generation,
            records = report.records,
            watermark = report.watermark,
            kind = self.options.index.name(),
            elapsed_ms = report.elapsed.as_millis() as u64,
            "published index snapshot"
        );
        report
    }

    fn wake_waiters(&self) {
        let _guard = self.ready_lock.lock();
        self.ready.notify_all();
    }

    fn signal(&self) {
        if let Some(tx) = self.trigger.lock().as_ref() {
            // A closed channel means the worker is shutting down.
            let _ = tx.send(());
        }
    }

    pub(crate) fn attach_trigger(&self, tx: mpsc::Sender<()>) {
        *self.trigger.lock() = Some(tx);
    }

    pub(crate) fn detach_trigger(&self) {
        self.trigger.lock().take();
    }

    fn has_worker(&self) -> bool {
        self.trigger.lock().is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::Metadata;
    use crate::storage::StoreOptions;
    use crate::vector::Vector;

    fn options(policy: RebuildPolicy, threshold: usize) -> ManagerOptions {
        ManagerOptions {
            index: IndexKind::Exact,
            policy,
            rebuild_threshold: threshold,
            initial_build_wait: Duration::from_millis(50),
            max_index_records: None,
        }
    }

    fn setup(policy: RebuildPolicy) -> (Arc<RecordStore>, IndexManager) {
        let store = Arc::new(RecordStore::in_memory(StoreOptions::default()));
        let manager = IndexManager::new(Arc::clone(&store), options(policy, 100), Arc::new(EngineStats::new()));
        // stands in for a running worker; signals go nowhere
        let (tx, _rx) = mpsc::channel();
        manager.attach_trigger(tx);
        (store, manager)
    }

    fn put(store: &RecordStore, manager: &IndexManager, id: &str, x: f32) {
        let outcome = store.put(id, Vector::new(vec![x, 0.0]), Metadata::new()).unwrap();
        manager.notify(DeltaOp::Upsert(outcome.record));
    }

    #[test]
    fn test_starts_empty() {
        let (_store, manager) = setup(RebuildPolicy::FullRebuild);
        assert_eq!(manager.state(), IndexState::Empty);
        assert!(manager.snapshot().is_none());
        assert_eq!(manager.rebuild_once(false).unwrap(), None);
        assert_eq!(manager.state(), IndexState::Empty);
    }

    #[test]
    fn test_first_notify_moves_to_building() {
        let (store, manager) = setup(RebuildPolicy::FullRebuild);
        put(&store, &manager, "a", 1.0);
        assert_eq!(manager.state(), IndexState::Building);
        assert_eq!(manager.pending_deltas(), 1);

        let report = manager.rebuild_once(false).unwrap().unwrap();
        assert_eq!(report.records, 1);
        assert_eq!(report.generation, 1);
        assert_eq!(manager.state(), IndexState::Ready);
        assert_eq!(manager.pending_deltas(), 0);
    }

    #[test]
    fn test_stale_notify_is_ignored() {
        let (store, manager) = setup(RebuildPolicy::FullRebuild);
        let outcome = store.put("a", Vector::new(vec![1.0, 0.0]), Metadata::new()).unwrap();
        manager.rebuild_once(true).unwrap();

        // arrives after a rebuild whose scan already saw the write
        manager.notify(DeltaOp::Upsert(outcome.record));
        assert_eq!(manager.pending_deltas(), 0);
    }

    #[test]
    fn test_overlay_published_on_notify() {
        let (store, manager) = setup(RebuildPolicy::IncrementalOverlay);
        put(&store, &manager, "a", 1.0);
        manager.rebuild_once(false).unwrap();

        put(&store, &manager, "b", 2.0);
        let view = manager.view();
        assert_eq!(view.snapshot.as_ref().unwrap().len(), 1);
        assert!(view.overlay.shadows("b"));

        manager.rebuild_once(false).unwrap();
        let view = manager.view();
        assert_eq!(view.snapshot.as_ref().unwrap().len(), 2);
        assert!(view.overlay.is_empty());
    }

    #[test]
    fn test_pinned_snapshot_survives_publish() {
        let (store, manager) = setup(RebuildPolicy::FullRebuild);
        put(&store, &manager, "a", 1.0);
        manager.rebuild_once(false).unwrap();
        let pinned = manager.snapshot().unwrap();

        put(&store, &manager, "b", 2.0);
        manager.rebuild_once(false).unwrap();

        assert_eq!(pinned.len(), 1);
        assert_eq!(manager.snapshot().unwrap().len(), 2);
        assert!(manager.snapshot().unwrap().generation() > pinned.generation());
    }

    #[test]
    fn test_failed_rebuild_keeps_previous_snapshot() {
        let store = Arc::new(RecordStore::in_memory(StoreOptions::default()));
        let stats = Arc::new(EngineStats::new());
        let mut opts = options(RebuildPolicy::FullRebuild, 100);
        opts.max_index_records = Some(1);
        let manager = IndexManager::new(Arc::clone(&store), opts, Arc::clone(&stats));

        put(&store, &manager, "a", 1.0);
        manager.rebuild_once(false).unwrap();
        put(&store, &manager, "b", 2.0);

        let err = manager.rebuild_once(false).unwrap_err();
        assert!(matches!(err, EngineError::RebuildFailed(_)));
        assert_eq!(manager.state(), IndexState::Ready);
        assert_eq!(manager.snapshot().unwrap().len(), 1);
        assert!(manager.last_error().is_some());
        assert_eq!(manager.pending_deltas(), 1);
        assert_eq!(stats.snapshot().rebuild_failures, 1);
    }

    #[test]
    fn test_wants_rebuild() {
        let store = Arc::new(RecordStore::in_memory(StoreOptions::default()));
        let manager = IndexManager::new(
            Arc::clone(&store),
            options(RebuildPolicy::FullRebuild, 2),
            Arc::new(EngineStats::new()),
        );
        assert!(!manager.wants_rebuild(true));

        put(&store, &manager, "a", 1.0);
        assert!(manager.wants_rebuild(false));
        manager.rebuild_once(false).unwrap();

        put(&store, &manager, "b", 2.0);
        assert!(!manager.wants_rebuild(false));
        assert!(manager.wants_rebuild(true));
        put(&store, &manager, "c", 3.0);
        assert!(manager.wants_rebuild(false));
    }

    #[test]
    fn test_wait_for_initial_times_out() {
        let (store, manager) = setup(RebuildPolicy::FullRebuild);
        put(&store, &manager, "a", 1.0);
        let started = Instant::now();
        manager.wait_for_initial();
        assert!(started.elapsed() >= Duration::from_millis(40));
        assert_eq!(manager.state(), IndexState::Building);
    }

    #[test]
    fn test_failure_pauses_count_trigger_until_publish() {
        let store = Arc::new(RecordStore::in_memory(StoreOptions::default()));
        let mut opts = options(RebuildPolicy::FullRebuild, 1);
        opts.max_index_records = Some(1);
        let manager = IndexManager::new(Arc::clone(&store), opts, Arc::new(EngineStats::new()));

        put(&store, &manager, "a", 1.0);
        manager.rebuild_once(false).unwrap();
        put(&store, &manager, "b", 2.0);
        assert!(manager.wants_rebuild(false));
        assert!(manager.rebuild_once(false).is_err());

        assert!(manager.backing_off());
        put(&store, &manager, "c", 3.0);
        assert!(!manager.wants_rebuild(false));
        assert!(manager.wants_rebuild(true));

        for id in ["b", "c"] {
            let seq = store.delete(id).unwrap();
            manager.notify(DeltaOp::Delete { id: id.to_string(), seq });
        }
        manager.rebuild_once(false).unwrap();
        assert!(!manager.backing_off());
        assert!(manager.last_error().is_none());
    }

    #[test]
    fn test_no_initial_build_without_worker() {
        let store = Arc::new(RecordStore::in_memory(StoreOptions::default()));
        let manager = IndexManager::new(
            Arc::clone(&store),
            options(RebuildPolicy::FullRebuild, 100),
            Arc::new(EngineStats::new()),
        );
        put(&store, &manager, "a", 1.0);
        assert_eq!(manager.state(), IndexState::Empty);

        let started = Instant::now();
        manager.wait_for_initial();
        assert!(started.elapsed() < Duration::from_millis(40));

        // an explicit rebuild still publishes
        manager.rebuild_once(false).unwrap();
        assert_eq!(manager.state(), IndexState::Ready);
    }

    #[test]
    fn test_state_strings() {
        assert_eq!(IndexState::Rebuilding.to_string(), "REBUILDING");
        assert_eq!(
            serde_json::to_string(&IndexState::Empty).unwrap(),
            "\"EMPTY\""
        );
    }
}
