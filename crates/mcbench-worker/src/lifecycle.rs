//! Worker side of the task contract: claim, run, report terminal status.
//!
//! Shared by the build pool and the generic pools. A worker never mutates a
//! task it has not claimed: `claim` is the `dispatched → running` guard, and
//! every write-back afterwards expects `running`.

use std::sync::Arc;

use tracing::{debug, info, warn};

use mcbench_broker::{Broker, DispatchMessage};
use mcbench_core::{Task, TaskFailure, TaskStatus, WorkerId};
use mcbench_state::{Completion, RetryOutcome, TaskStore};

/// How an attempt ended, from the worker's point of view.
#[derive(Debug, Clone, PartialEq)]
pub enum TaskOutcome {
    Succeeded {
        artifacts: Vec<String>,
    },
    Cancelled {
        artifacts: Vec<String>,
    },
    Failed {
        failure: TaskFailure,
        artifacts: Vec<String>,
        /// Requeue (bounded by the attempt limit) instead of failing.
        retryable: bool,
    },
}

/// What the write-back did to the task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Settled {
    Succeeded,
    Cancelled,
    Failed,
    Requeued { attempts: u32 },
    /// The store rejected or missed the write; reconciliation will pick the
    /// task up.
    Unrecorded,
}

#[derive(Clone)]
pub struct Lifecycle {
    store: Arc<dyn TaskStore>,
    broker: Arc<dyn Broker>,
    worker_id: WorkerId,
    max_attempts: u32,
}

impl Lifecycle {
    pub fn new(
        store: Arc<dyn TaskStore>,
        broker: Arc<dyn Broker>,
        worker_id: impl Into<WorkerId>,
        max_attempts: u32,
    ) -> Self {
        Self {
            store,
            broker,
            worker_id: worker_id.into(),
            max_attempts,
        }
    }

    pub fn worker_id(&self) -> &str {
        &self.worker_id
    }

    pub fn store(&self) -> &Arc<dyn TaskStore> {
        &self.store
    }

    /// Claim the task named by `message`. `None` means there is nothing to
    /// run: the dispatch was obsolete (acked) or the store was unreachable
    /// (nacked for redelivery).
    pub async fn begin(&self, message: &DispatchMessage) -> Option<Task> {
        let task_id = &message.task_id;
        match self.store.claim(task_id, &self.worker_id) {
            Ok(true) => {}
            Ok(false) => {
                debug!(%task_id, queue = %message.queue, "dispatch obsolete, dropping");
                self.ack(message).await;
                return None;
            }
            Err(e) => {
                warn!(%task_id, error = %e, "claim failed, returning message");
                if let Err(e) = self.broker.nack(&message.queue, task_id, true).await {
                    warn!(%task_id, error = %e, "nack failed");
                }
                return None;
            }
        }

        match self.store.get_task(task_id) {
            Ok(Some(task)) => {
                info!(%task_id, queue = %task.queue, worker = %self.worker_id, attempt = task.attempts, "task claimed");
                Some(task)
            }
            Ok(None) => {
                warn!(%task_id, "claimed task vanished");
                self.ack(message).await;
                None
            }
            Err(e) => {
                // Claimed but unreadable: hand it to reconciliation rather
                // than run it blind.
                warn!(%task_id, error = %e, "claimed task unreadable");
                self.ack(message).await;
                None
            }
        }
    }

    /// Record the terminal (or retry) status and ack the message.
    pub async fn finish(&self, message: &DispatchMessage, outcome: TaskOutcome) -> Settled {
        let task_id = &message.task_id;
        let written = match outcome {
            TaskOutcome::Succeeded { artifacts } => self
                .store
                .complete(task_id, Completion::succeeded(artifacts))
                .map(|ok| if ok { Settled::Succeeded } else { Settled::Unrecorded }),
            TaskOutcome::Cancelled { artifacts } => self
                .store
                .complete(task_id, Completion::cancelled(artifacts))
                .map(|ok| if ok { Settled::Cancelled } else { Settled::Unrecorded }),
            TaskOutcome::Failed {
                failure,
                retryable: true,
                ..
            } => self
                .store
                .retry(task_id, TaskStatus::Running, self.max_attempts, Some(failure))
                .map(|outcome| match outcome {
                    RetryOutcome::Requeued { attempts } => Settled::Requeued { attempts },
                    RetryOutcome::Exhausted { .. } => Settled::Failed,
                    RetryOutcome::Stale | RetryOutcome::NotFound => Settled::Unrecorded,
                }),
            TaskOutcome::Failed {
                failure, artifacts, ..
            } => self
                .store
                .complete(task_id, Completion::failed(failure, artifacts))
                .map(|ok| if ok { Settled::Failed } else { Settled::Unrecorded }),
        };

        let settled = match written {
            Ok(settled) => settled,
            Err(e) => {
                warn!(%task_id, error = %e, "write-back failed, leaving task to reconciliation");
                Settled::Unrecorded
            }
        };
        info!(%task_id, queue = %message.queue, ?settled, "task settled");
        self.ack(message).await;
        settled
    }

    async fn ack(&self, message: &DispatchMessage) {
        if let Err(e) = self.broker.ack(&message.queue, &message.task_id).await {
            warn!(task_id = %message.task_id, error = %e, "ack failed");
        }
    }
}
