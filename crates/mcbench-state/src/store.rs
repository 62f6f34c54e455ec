//! The `TaskStore` contract shared by the scheduler and the workers.
//!
//! Every mutation is a status-guarded compare-and-set: the caller names the
//! status it expects and the store applies the change only if the record
//! still has it. Competing scheduler replicas or workers therefore
//! serialize on the store, and a lost race shows up as `false` / `Stale`
//! rather than as an error.

use mcbench_core::{
    OrderingPolicy, QueueName, StageProgress, Task, TaskFailure, TaskStatus, WorkerLease,
};

use crate::error::StateResult;

/// Terminal write-back reported by a worker.
#[derive(Debug, Clone, PartialEq)]
pub struct Completion {
    /// One of `Succeeded`, `Failed`, `Cancelled`.
    pub status: TaskStatus,
    pub failure: Option<TaskFailure>,
    pub artifacts: Vec<String>,
}

impl Completion {
    pub fn succeeded(artifacts: Vec<String>) -> Self {
        Self {
            status: TaskStatus::Succeeded,
            failure: None,
            artifacts,
        }
    }

    pub fn failed(failure: TaskFailure, artifacts: Vec<String>) -> Self {
        Self {
            status: TaskStatus::Failed,
            failure: Some(failure),
            artifacts,
        }
    }

    pub fn cancelled(artifacts: Vec<String>) -> Self {
        Self {
            status: TaskStatus::Cancelled,
            failure: None,
            artifacts,
        }
    }
}

/// Result of a retry request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryOutcome {
    /// Back to `pending` with the attempt count incremented.
    Requeued { attempts: u32 },
    /// Attempt limit reached; forced to `failed`.
    Exhausted { attempts: u32 },
    /// The task was no longer in the expected status.
    Stale,
    NotFound,
}

/// Result of an operator cancel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelOutcome {
    /// `pending` or `dispatched` moved straight to `cancelled`.
    Cancelled,
    /// The task is running; its worker will stop at the next command
    /// boundary.
    Requested,
    AlreadyTerminal,
    NotFound,
}

/// Filter for task listings. Empty fields match everything.
#[derive(Debug, Clone, Default)]
pub struct TaskFilter {
    pub queue: Option<String>,
    pub status: Option<TaskStatus>,
}

impl TaskFilter {
    pub fn matches(&self, task: &Task) -> bool {
        self.queue.as_deref().is_none_or(|q| q == task.queue)
            && self.status.is_none_or(|s| s == task.status)
    }
}

/// Durable task records.
pub trait TaskStore: Send + Sync {
    /// Insert a new task. Fails with `AlreadyExists` on a duplicate id.
    fn insert_task(&self, task: &Task) -> StateResult<()>;

    fn get_task(&self, id: &str) -> StateResult<Option<Task>>;

    fn list_tasks(&self, filter: &TaskFilter) -> StateResult<Vec<Task>>;

    /// Queue names that currently hold at least one task.
    fn list_queues(&self) -> StateResult<Vec<QueueName>>;

    /// Up to `limit` pending tasks of `queue`, in `order`.
    fn fetch_pending(
        &self,
        queue: &str,
        limit: usize,
        order: OrderingPolicy,
    ) -> StateResult<Vec<Task>>;

    /// Tasks of `queue` that are `dispatched` or `running`.
    fn count_in_flight(&self, queue: &str) -> StateResult<usize>;

    /// Conditional status change. Returns `false` when the task is missing
    /// or no longer has `expected`. Illegal edges are an error.
    fn transition(&self, id: &str, expected: TaskStatus, next: TaskStatus) -> StateResult<bool>;

    /// `dispatched → running` and lease creation, atomically.
    fn claim(&self, id: &str, worker_id: &str) -> StateResult<bool>;

    /// Renew the lease held by `worker_id`.
    fn heartbeat(&self, id: &str, worker_id: &str) -> StateResult<bool>;

    /// `running → {succeeded, failed, cancelled}`; drops the lease.
    fn complete(&self, id: &str, completion: Completion) -> StateResult<bool>;

    /// Send a `dispatched` or `running` task back to `pending`, or force it
    /// to `failed` once `max_attempts` is reached.
    fn retry(
        &self,
        id: &str,
        expected: TaskStatus,
        max_attempts: u32,
        failure: Option<TaskFailure>,
    ) -> StateResult<RetryOutcome>;

    fn cancel(&self, id: &str) -> StateResult<CancelOutcome>;

    /// Operator re-run of a `failed` or `cancelled` task: back to `pending`
    /// with a fresh attempt count.
    fn rerun(&self, id: &str) -> StateResult<bool>;

    /// Store an advisory progress note. Ignored for terminal tasks.
    fn record_progress(&self, id: &str, progress: StageProgress) -> StateResult<bool>;

    /// In-flight tasks whose last sign of life is at or before `cutoff`
    /// (epoch millis): `dispatched_at` for dispatched tasks, the lease
    /// heartbeat for running ones.
    fn list_stale(&self, cutoff: u64) -> StateResult<Vec<Task>>;

    fn get_lease(&self, id: &str) -> StateResult<Option<WorkerLease>>;

    fn list_leases(&self) -> StateResult<Vec<WorkerLease>>;
}
