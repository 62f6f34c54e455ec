//! Advisory stage-progress and heartbeat writes.
//!
//! Progress is best-effort: a failed write is retried with capped
//! exponential backoff until `max_elapsed`, then dropped. It never fails
//! the build.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, warn};

use mcbench_core::{StageProgress, TaskId, WorkerId};
use mcbench_state::{StateResult, TaskStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    pub base: Duration,
    pub max_delay: Duration,
    pub max_elapsed: Duration,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            base: Duration::from_millis(100),
            max_delay: Duration::from_secs(2),
            max_elapsed: Duration::from_secs(10),
        }
    }
}

impl Backoff {
    /// Delay before retry number `attempt` (1-based): `base * 2^(attempt-1)`,
    /// capped at `max_delay`.
    pub fn delay(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(16);
        self.base.saturating_mul(1 << exp).min(self.max_delay)
    }
}

/// Writes progress and lease heartbeats for one task on behalf of one worker.
#[derive(Clone)]
pub struct ProgressReporter {
    store: Arc<dyn TaskStore>,
    task_id: TaskId,
    worker_id: WorkerId,
    backoff: Backoff,
}

impl ProgressReporter {
    pub fn new(store: Arc<dyn TaskStore>, task_id: impl Into<TaskId>, worker_id: impl Into<WorkerId>) -> Self {
        Self {
            store,
            task_id: task_id.into(),
            worker_id: worker_id.into(),
            backoff: Backoff::default(),
        }
    }

    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    /// Record `stage` at `fraction` complete. Returns whether it was stored.
    pub async fn report(&self, stage: &str, fraction: f64, note: Option<String>) -> bool {
        let progress = StageProgress::new(stage, fraction, note);
        self.with_retry("progress", || {
            self.store.record_progress(&self.task_id, progress.clone())
        })
        .await
    }

    /// Renew this worker's lease.
    pub async fn heartbeat(&self) -> bool {
        self.with_retry("heartbeat", || {
            self.store.heartbeat(&self.task_id, &self.worker_id)
        })
        .await
    }

    async fn with_retry(&self, what: &str, mut write: impl FnMut() -> StateResult<bool>) -> bool {
        let started = Instant::now();
        let mut attempt = 0u32;
        loop {
            match write() {
                Ok(stored) => return stored,
                Err(e) => {
                    attempt += 1;
                    let delay = self.backoff.delay(attempt);
                    if started.elapsed() + delay > self.backoff.max_elapsed {
                        warn!(task_id = %self.task_id, what, attempts = attempt, error = %e, "giving up on advisory write");
                        return false;
                    }
                    debug!(task_id = %self.task_id, what, attempt, ?delay, error = %e, "advisory write failed, backing off");
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}
