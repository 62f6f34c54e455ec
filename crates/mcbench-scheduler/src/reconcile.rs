//! Reconciliation sweep — reclaims tasks stuck in `dispatched` or `running`.
//!
//! A task is stale once its last sign of life (dispatch time for
//! `dispatched`, lease heartbeat for `running`) is older than the staleness
//! threshold.
//!
//! - A stale `dispatched` task whose message is still in the broker is only
//!   waiting for a worker slot and is left alone. If the message is gone it
//!   goes back to `pending` without consuming an attempt; it never ran.
//! - A stale `running` task goes back to `pending` with the attempt count
//!   incremented, or to `failed` once the attempt limit is reached.
//!
//! Every change is status-guarded, so a task that moved on in the meantime
//! is left alone.

use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, warn};

use mcbench_broker::Broker;
use mcbench_core::{
    FailureKind, ReconcileConfig, Task, TaskFailure, TaskId, TaskStatus, epoch_millis,
};
use mcbench_state::{RetryOutcome, TaskStore};

use crate::alert::{AlertKind, AlertSink, OperatorAlert};
use crate::error::SchedulerResult;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ReconcileReport {
    pub requeued: Vec<TaskId>,
    pub failed: Vec<TaskId>,
    /// Stale `dispatched` tasks whose message is still queued.
    pub waiting: Vec<TaskId>,
    /// Stale tasks that changed status before the sweep reached them.
    pub skipped: usize,
    pub errors: usize,
}

pub struct Reconciler {
    store: Arc<dyn TaskStore>,
    broker: Arc<dyn Broker>,
    config: ReconcileConfig,
    alerts: AlertSink,
}

impl Reconciler {
    pub fn new(
        store: Arc<dyn TaskStore>,
        broker: Arc<dyn Broker>,
        config: ReconcileConfig,
        alerts: AlertSink,
    ) -> Self {
        Self {
            store,
            broker,
            config,
            alerts,
        }
    }

    pub fn config(&self) -> &ReconcileConfig {
        &self.config
    }

    /// Sweep using the current wall clock.
    pub async fn sweep(&self) -> SchedulerResult<ReconcileReport> {
        self.sweep_at(epoch_millis()).await
    }

    /// Sweep as if the current time were `now` (epoch millis).
    pub async fn sweep_at(&self, now: u64) -> SchedulerResult<ReconcileReport> {
        let stale_after = self.config.stale_after().as_millis() as u64;
        let cutoff = now.saturating_sub(stale_after);
        let mut report = ReconcileReport::default();

        for task in self.store.list_stale(cutoff)? {
            match task.status {
                TaskStatus::Dispatched => self.reclaim_dispatched(task, &mut report).await,
                _ => self.reclaim_running(task, &mut report),
            }
        }

        debug!(
            requeued = report.requeued.len(),
            failed = report.failed.len(),
            waiting = report.waiting.len(),
            skipped = report.skipped,
            "reconciliation sweep complete"
        );
        Ok(report)
    }

    async fn reclaim_dispatched(&self, task: Task, report: &mut ReconcileReport) {
        match self.broker.holds(&task.queue, &task.id).await {
            Ok(true) => {
                debug!(task_id = %task.id, queue = %task.queue, "dispatched task still queued");
                report.waiting.push(task.id);
                return;
            }
            Ok(false) => {}
            Err(e) => {
                // Broker unreachable; decide on the next sweep.
                warn!(task_id = %task.id, queue = %task.queue, error = %e, "broker lookup failed");
                report.errors += 1;
                return;
            }
        }

        match self
            .store
            .transition(&task.id, TaskStatus::Dispatched, TaskStatus::Pending)
        {
            Ok(true) => {
                warn!(task_id = %task.id, queue = %task.queue, "dispatch message lost, task requeued");
                report.requeued.push(task.id);
            }
            Ok(false) => {
                debug!(task_id = %task.id, "stale task changed before sweep, skipped");
                report.skipped += 1;
            }
            Err(e) => self.store_failed(&task, e.to_string(), report),
        }
    }

    fn reclaim_running(&self, task: Task, report: &mut ReconcileReport) {
        let failure = TaskFailure::new(
            FailureKind::OrchestratorCrash,
            format!(
                "no heartbeat for over {}s while {}",
                self.config.stale_after_secs, task.status
            ),
        );
        match self
            .store
            .retry(&task.id, task.status, self.config.max_attempts, Some(failure))
        {
            Ok(RetryOutcome::Requeued { attempts }) => {
                warn!(task_id = %task.id, queue = %task.queue, from = %task.status, attempts, "stale task requeued");
                report.requeued.push(task.id);
            }
            Ok(RetryOutcome::Exhausted { attempts }) => {
                warn!(task_id = %task.id, queue = %task.queue, from = %task.status, attempts, "stale task failed, attempts exhausted");
                report.failed.push(task.id);
            }
            Ok(RetryOutcome::Stale | RetryOutcome::NotFound) => {
                debug!(task_id = %task.id, "stale task changed before sweep, skipped");
                report.skipped += 1;
            }
            Err(e) => self.store_failed(&task, e.to_string(), report),
        }
    }

    fn store_failed(&self, task: &Task, detail: String, report: &mut ReconcileReport) {
        report.errors += 1;
        self.alerts.raise(OperatorAlert::new(
            AlertKind::ReconcileFailed,
            task.id.clone(),
            task.queue.clone(),
            task.status,
            detail,
        ));
    }
}
