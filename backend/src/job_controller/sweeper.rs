//! Periodic eviction of finished jobs, so the registry and the outputs
//! directory do not grow without bound.

use crate::job_controller::runner::remove_artifact;
use crate::job_controller::state::JobStore;
use log::info;
use std::time::Duration;
use tokio::time::MissedTickBehavior;

/// Evicts every finished job older than `ttl` and deletes its output.
/// Returns how many jobs were evicted.
pub async fn sweep(store: &JobStore, ttl: Duration) -> usize {
    let evicted = store.evict_expired(ttl).await;
    for job in &evicted {
        if let Some(output) = &job.output_location {
            remove_artifact(output).await;
        }
    }
    if !evicted.is_empty() {
        info!(
            "Evicted {} finished job(s), {} still tracked",
            evicted.len(),
            store.len().await
        );
    }
    evicted.len()
}

/// Runs `sweep` every `interval` for as long as the process lives.
///
/// Meant to be spawned once at startup, next to the HTTP server.
pub async fn start_job_sweeper(store: JobStore, ttl: Duration, interval: Duration) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        sweep(&store, ttl).await;
    }
}
