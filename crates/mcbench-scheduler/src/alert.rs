//! Operator-visible error channel.
//!
//! Raised when the scheduler cannot restore a consistent state on its own
//! (a failed publish whose compensating rollback also failed). The task is
//! left as-is for the reconciliation sweep; the alert makes it visible.

use serde::Serialize;
use tokio::sync::mpsc;
use tracing::error;

use mcbench_core::{QueueName, TaskId, TaskStatus, epoch_millis};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    /// Publish failed and the task could not be moved back to `pending`.
    RollbackFailed,
    /// The reconciliation sweep could not requeue a stale task.
    ReconcileFailed,
}

#[derive(Debug, Clone, Serialize)]
pub struct OperatorAlert {
    pub kind: AlertKind,
    pub task_id: TaskId,
    pub queue: QueueName,
    /// Status the task was left in.
    pub status: TaskStatus,
    pub detail: String,
    pub raised_at: u64,
}

impl OperatorAlert {
    pub fn new(
        kind: AlertKind,
        task_id: impl Into<TaskId>,
        queue: impl Into<QueueName>,
        status: TaskStatus,
        detail: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            task_id: task_id.into(),
            queue: queue.into(),
            status,
            detail: detail.into(),
            raised_at: epoch_millis(),
        }
    }
}

/// Sending half of the alert channel. Alerts are always logged at `error`;
/// delivery to the channel is best-effort.
#[derive(Debug, Clone, Default)]
pub struct AlertSink {
    tx: Option<mpsc::UnboundedSender<OperatorAlert>>,
}

impl AlertSink {
    /// A sink that only logs.
    pub fn log_only() -> Self {
        Self { tx: None }
    }

    pub fn raise(&self, alert: OperatorAlert) {
        error!(
            kind = ?alert.kind,
            task_id = %alert.task_id,
            queue = %alert.queue,
            status = %alert.status,
            detail = %alert.detail,
            "operator alert"
        );
        if let Some(tx) = &self.tx {
            if tx.send(alert).is_err() {
                error!("operator alert receiver dropped");
            }
        }
    }
}

/// Create a connected sink / receiver pair.
pub fn alert_channel() -> (AlertSink, mpsc::UnboundedReceiver<OperatorAlert>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (AlertSink { tx: Some(tx) }, rx)
}
