//! Debounced reruns.
//!
//! Every relevant watcher event re-arms a single timer. When the timer fires
//! the pending changed tests become one run. Runs are serialized by the
//! orchestrator, so events arriving during a run pile up for the next one.

use crate::normalize::path::relative_slash;
use crate::orchestrator::{Orchestrator, RunSummary};
use crate::pool::WorkerPool;
use crate::watch::watcher::WatchEvent;
use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;

type Triggers = Arc<Mutex<BTreeSet<PathBuf>>>;

pub struct WatchScheduler<P: WorkerPool> {
    orchestrator: Arc<Orchestrator<P>>,
    debounce: Duration,
    timer: Mutex<Option<JoinHandle<()>>>,
    triggers: Triggers,
}

impl<P: WorkerPool> WatchScheduler<P> {
    /// Scheduler using the configured debounce window.
    pub fn new(orchestrator: Arc<Orchestrator<P>>) -> Self {
        let debounce = Duration::from_millis(orchestrator.config().watch.debounce_ms);
        Self {
            orchestrator,
            debounce,
            timer: Mutex::new(None),
            triggers: Arc::new(Mutex::new(BTreeSet::new())),
        }
    }

    pub fn debounce(&self) -> Duration {
        self.debounce
    }

    /// Resolves the event and re-arms the timer when something must rerun.
    /// Must be called within a tokio runtime.
    pub fn handle_event(&self, event: &WatchEvent) -> bool {
        if !self.orchestrator.handle_watch_event(event) {
            tracing::trace!(
                target: "watch",
                path = %event.path.display(),
                kind = ?event.kind,
                "nothing to rerun"
            );
            return false;
        }
        self.triggers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(event.path.clone());
        self.schedule_rerun();
        true
    }

    /// Restarts the debounce window.
    pub fn schedule_rerun(&self) {
        let mut timer = self.timer.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(previous) = timer.take() {
            previous.abort();
        }

        let orchestrator = Arc::clone(&self.orchestrator);
        let triggers = Arc::clone(&self.triggers);
        let debounce = self.debounce;
        *timer = Some(tokio::spawn(async move {
            tokio::time::sleep(debounce).await;
            // Detached, so re-arming cannot abort a run in flight.
            tokio::spawn(rerun_changed(orchestrator, triggers));
        }));
    }
}

impl<P: WorkerPool> Drop for WatchScheduler<P> {
    fn drop(&mut self) {
        if let Some(timer) = self
            .timer
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            timer.abort();
        }
    }
}

/// Runs the pending changed tests once the previous run is over.
async fn rerun_changed<P: WorkerPool>(
    orchestrator: Arc<Orchestrator<P>>,
    triggers: Triggers,
) -> Option<RunSummary> {
    let run = orchestrator.lock_run().await;
    let Some(specs) = orchestrator.take_pending_specs() else {
        if orchestrator.discard_idle_invalidates() {
            tracing::debug!(target: "watch", "no changed tests, dropped pending invalidations");
        }
        return None;
    };

    let triggers = std::mem::take(&mut *triggers.lock().unwrap_or_else(PoisonError::into_inner));
    let root = &orchestrator.config().root;
    let label = triggers
        .iter()
        .map(|path| relative_slash(root, path))
        .collect::<Vec<_>>()
        .join(", ");
    tracing::info!(
        target: "watch",
        trigger = %label,
        files = specs.len(),
        "rerunning changed tests"
    );

    Some(orchestrator.run_locked(&run, specs, false).await)
}
