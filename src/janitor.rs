//! Janitor (spec.md §4.6) — periodic sweep that clears tracker entries
//! whose model is no longer resident, defending against a worker crash
//! leaving a `task_id` stuck in `active(m)`/`reserved(m)` forever.

use std::collections::HashSet;

use crate::cs::CoordinationStore;
use crate::runtime::ModelRuntimeClient;
use crate::tracker::ResourceTracker;

/// One sweep pass: read residents, clear stale tracker entries, log the
/// cleaned count. Exposed separately from the loop so tests can drive a
/// single pass deterministically.
pub async fn run_once(store: &dyn CoordinationStore, runtime: &dyn ModelRuntimeClient) {
    let residents: HashSet<String> = match runtime.ps().await {
        Ok(models) => models.into_iter().map(|m| m.name).collect(),
        Err(e) => {
            tracing::warn!("janitor: failed to read resident models, skipping sweep: {e}");
            return;
        }
    };

    let tracker = ResourceTracker::new(store);
    match tracker.cleanup_stale(&residents).await {
        Ok(cleaned) => {
            if cleaned > 0 {
                tracing::info!(cleaned, "janitor: cleared stale tracker entries");
            }
        }
        Err(e) => tracing::warn!("janitor: cleanup_stale failed: {e}"),
    }
}

/// Drive `run_once` on a fixed cadence until cancelled. Spawned once at
/// startup alongside the HTTP server.
pub async fn run_loop(
    store: &dyn CoordinationStore,
    runtime: &dyn ModelRuntimeClient,
    interval: std::time::Duration,
    cancel: &tokio_util::sync::CancellationToken,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::info!("janitor: shutting down");
                return;
            }
            _ = ticker.tick() => {
                run_once(store, runtime).await;
            }
        }
    }
}
