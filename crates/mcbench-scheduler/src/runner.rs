//! Periodic loops for admission and reconciliation.
//!
//! Both loops sleep for their interval, run one pass, and exit as soon as
//! the shutdown watch flips.

use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, error, info};

use crate::admission::AdmissionScheduler;
use crate::reconcile::Reconciler;
use crate::state::SchedulerState;

/// Tick `scheduler` every `interval` until shutdown. Returns the final state
/// so callers can inspect the last report.
pub async fn run_admission_loop(
    scheduler: AdmissionScheduler,
    mut state: SchedulerState,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> SchedulerState {
    info!(interval_secs = interval.as_secs(), order = ?state.order, "admission loop starting");

    loop {
        tokio::select! {
            _ = tokio::time::sleep(interval) => {
                scheduler.tick(&mut state).await;
            }
            _ = shutdown.changed() => {
                debug!(ticks = state.ticks, "admission loop shutting down");
                break;
            }
        }
    }
    state
}

/// Sweep for stale tasks every reconcile interval until shutdown.
pub async fn run_reconcile_loop(reconciler: Reconciler, mut shutdown: watch::Receiver<bool>) {
    let interval = reconciler.config().interval();
    info!(interval_secs = interval.as_secs(), "reconcile loop starting");

    loop {
        tokio::select! {
            _ = tokio::time::sleep(interval) => {
                if let Err(e) = reconciler.sweep().await {
                    error!(error = %e, "reconciliation sweep failed");
                }
            }
            _ = shutdown.changed() => {
                debug!("reconcile loop shutting down");
                break;
            }
        }
    }
}
