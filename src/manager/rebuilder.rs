//! Background rebuild worker: one thread, woken by signals or the interval.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::thread::JoinHandle;
use std::time::Duration;

use tracing::{debug, warn};

use super::IndexManager;

/// Handle to the running worker. Dropping it does not stop the thread;
/// call [`Rebuilder::shutdown`].
pub(crate) struct Rebuilder {
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

pub(crate) fn spawn_rebuilder(manager: Arc<IndexManager>, interval: Duration) -> Rebuilder {
    let (tx, rx) = mpsc::channel();
    manager.attach_trigger(tx);

    let stop = Arc::new(AtomicBool::new(false));
    let stop_worker = Arc::clone(&stop);
    let worker_manager = Arc::clone(&manager);
    let handle = std::thread::Builder::new()
        .name("vectordb-rebuilder".to_string())
        .spawn(move || {
            let manager = worker_manager;
            while !stop_worker.load(Ordering::Relaxed) {
                let due = match rx.recv_timeout(interval) {
                    Ok(()) => manager.wants_rebuild(false),
                    // interval elapsed: any pending work is due
                    Err(mpsc::RecvTimeoutError::Timeout) => manager.wants_rebuild(true),
                    Err(mpsc::RecvTimeoutError::Disconnected) => break,
                };
                if due && !stop_worker.load(Ordering::Relaxed) {
                    if let Err(err) = manager.rebuild_once(false) {
                        debug!(error = %err, "background rebuild did not publish");
                    }
                }
            }
            debug!("rebuild worker exiting");
        });

    let handle = match handle {
        Ok(handle) => Some(handle),
        Err(err) => {
            warn!(error = %err, "failed to spawn rebuild worker; rebuilds run only on demand");
            manager.detach_trigger();
            None
        }
    };

    Rebuilder { stop, handle }
}

impl Rebuilder {
    /// Stop the worker and wait for any in-flight rebuild to finish.
    pub(crate) fn shutdown(&mut self, manager: &IndexManager) {
        self.stop.store(true, Ordering::Relaxed);
        manager.detach_trigger();
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!("rebuild worker panicked");
            }
        }
    }

    pub(crate) fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }
}
