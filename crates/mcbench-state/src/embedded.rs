//! StateStore — redb-backed `TaskStore`.
//!
//! All values are JSON-serialized into redb's `&[u8]` value columns. Every
//! conditional update runs inside one write transaction; redb serializes
//! write transactions, which is what makes the compare-and-set atomic.

use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;

use redb::{Database, ReadableDatabase, ReadableTable};
use tracing::debug;

use mcbench_core::{
    FailureKind, OrderingPolicy, QueueName, StageProgress, Task, TaskFailure, TaskStatus,
    WorkerLease, epoch_millis,
};

use crate::error::{StateError, StateResult};
use crate::store::{CancelOutcome, Completion, RetryOutcome, TaskFilter, TaskStore};
use crate::tables::*;

/// Convert any `Display` error into a `StateError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StateError::$variant(e.to_string())
    };
}

/// Thread-safe task store backed by redb.
#[derive(Clone)]
pub struct StateStore {
    db: Arc<Database>,
}

impl std::fmt::Debug for StateStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateStore").finish_non_exhaustive()
    }
}

impl StateStore {
    /// Open (or create) a persistent store at the given path.
    pub fn open(path: &Path) -> StateResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!(?path, "task store opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory store (for testing).
    pub fn open_in_memory() -> StateResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!("in-memory task store opened");
        Ok(store)
    }

    /// Create all tables if they don't exist yet.
    fn ensure_tables(&self) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        txn.open_table(TASKS).map_err(map_err!(Table))?;
        txn.open_table(LEASES).map_err(map_err!(Table))?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    /// Decode every task in the table.
    fn scan_tasks(&self) -> StateResult<Vec<Task>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(TASKS).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (_, value) = entry.map_err(map_err!(Read))?;
            let task: Task =
                serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
            results.push(task);
        }
        Ok(results)
    }

    /// Read-modify-write one task and its lease in a single write
    /// transaction. Returns `None` when the task does not exist. Records
    /// are only rewritten when `apply` changed them.
    fn mutate<R>(
        &self,
        id: &str,
        apply: impl FnOnce(&mut Task, &mut Option<WorkerLease>) -> StateResult<R>,
    ) -> StateResult<Option<R>> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let result = {
            let mut tasks = txn.open_table(TASKS).map_err(map_err!(Table))?;
            let mut leases = txn.open_table(LEASES).map_err(map_err!(Table))?;

            let raw_task = tasks
                .get(id)
                .map_err(map_err!(Read))?
                .map(|guard| guard.value().to_vec());
            let Some(raw_task) = raw_task else {
                return Ok(None);
            };
            let before: Task =
                serde_json::from_slice(&raw_task).map_err(map_err!(Deserialize))?;

            let raw_lease = leases
                .get(id)
                .map_err(map_err!(Read))?
                .map(|guard| guard.value().to_vec());
            let lease_before: Option<WorkerLease> = raw_lease
                .map(|raw| serde_json::from_slice(&raw))
                .transpose()
                .map_err(map_err!(Deserialize))?;

            let mut task = before.clone();
            let mut lease = lease_before.clone();
            let result = apply(&mut task, &mut lease)?;

            if task != before {
                let value = serde_json::to_vec(&task).map_err(map_err!(Serialize))?;
                tasks
                    .insert(id, value.as_slice())
                    .map_err(map_err!(Write))?;
            }
            if lease != lease_before {
                match &lease {
                    Some(lease) => {
                        let value = serde_json::to_vec(lease).map_err(map_err!(Serialize))?;
                        leases
                            .insert(id, value.as_slice())
                            .map_err(map_err!(Write))?;
                    }
                    None => {
                        leases.remove(id).map_err(map_err!(Write))?;
                    }
                }
            }
            result
        };
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(Some(result))
    }
}

/// Stamp the timestamps that go with entering `next`.
fn enter_status(task: &mut Task, next: TaskStatus, now: u64) {
    match next {
        TaskStatus::Pending => {
            task.dispatched_at = None;
            task.started_at = None;
        }
        TaskStatus::Dispatched => task.dispatched_at = Some(now),
        TaskStatus::Running => task.started_at = Some(now),
        TaskStatus::Succeeded | TaskStatus::Failed | TaskStatus::Cancelled => {
            task.completed_at = Some(now)
        }
    }
    task.status = next;
}

impl TaskStore for StateStore {
    fn insert_task(&self, task: &Task) -> StateResult<()> {
        let value = serde_json::to_vec(task).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(TASKS).map_err(map_err!(Table))?;
            if table.get(task.id.as_str()).map_err(map_err!(Read))?.is_some() {
                return Err(StateError::AlreadyExists(task.id.clone()));
            }
            table
                .insert(task.id.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(task_id = %task.id, queue = %task.queue, "task stored");
        Ok(())
    }

    fn get_task(&self, id: &str) -> StateResult<Option<Task>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(TASKS).map_err(map_err!(Table))?;
        match table.get(id).map_err(map_err!(Read))? {
            Some(guard) => {
                let task: Task =
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                Ok(Some(task))
            }
            None => Ok(None),
        }
    }

    fn list_tasks(&self, filter: &TaskFilter) -> StateResult<Vec<Task>> {
        let mut tasks: Vec<Task> = self
            .scan_tasks()?
            .into_iter()
            .filter(|task| filter.matches(task))
            .collect();
        OrderingPolicy::Fifo.sort(&mut tasks);
        Ok(tasks)
    }

    fn list_queues(&self) -> StateResult<Vec<QueueName>> {
        let queues: BTreeSet<QueueName> =
            self.scan_tasks()?.into_iter().map(|task| task.queue).collect();
        Ok(queues.into_iter().collect())
    }

    fn fetch_pending(
        &self,
        queue: &str,
        limit: usize,
        order: OrderingPolicy,
    ) -> StateResult<Vec<Task>> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let mut pending: Vec<Task> = self
            .scan_tasks()?
            .into_iter()
            .filter(|task| task.queue == queue && task.status == TaskStatus::Pending)
            .collect();
        order.sort(&mut pending);
        pending.truncate(limit);
        Ok(pending)
    }

    fn count_in_flight(&self, queue: &str) -> StateResult<usize> {
        Ok(self
            .scan_tasks()?
            .iter()
            .filter(|task| task.queue == queue && task.status.is_in_flight())
            .count())
    }

    fn transition(&self, id: &str, expected: TaskStatus, next: TaskStatus) -> StateResult<bool> {
        if !expected.can_transition_to(next) {
            return Err(StateError::InvalidTransition {
                id: id.to_string(),
                from: expected,
                to: next,
            });
        }
        let applied = self.mutate(id, |task, lease| {
            if task.status != expected {
                return Ok(false);
            }
            enter_status(task, next, epoch_millis());
            if next.is_terminal() || next == TaskStatus::Pending {
                *lease = None;
            }
            Ok(true)
        })?;
        let applied = applied.unwrap_or(false);
        debug!(task_id = %id, %expected, %next, applied, "transition");
        Ok(applied)
    }

    fn claim(&self, id: &str, worker_id: &str) -> StateResult<bool> {
        let applied = self.mutate(id, |task, lease| {
            if task.status != TaskStatus::Dispatched {
                return Ok(false);
            }
            let now = epoch_millis();
            enter_status(task, TaskStatus::Running, now);
            *lease = Some(WorkerLease {
                task_id: task.id.clone(),
                queue: task.queue.clone(),
                worker_id: worker_id.to_string(),
                claimed_at: now,
                heartbeat_at: now,
            });
            Ok(true)
        })?;
        Ok(applied.unwrap_or(false))
    }

    fn heartbeat(&self, id: &str, worker_id: &str) -> StateResult<bool> {
        let applied = self.mutate(id, |task, lease| {
            match lease {
                Some(held) if held.worker_id == worker_id && task.status == TaskStatus::Running => {
                    held.heartbeat_at = epoch_millis();
                    Ok(true)
                }
                _ => Ok(false),
            }
        })?;
        Ok(applied.unwrap_or(false))
    }

    fn complete(&self, id: &str, completion: Completion) -> StateResult<bool> {
        if !completion.status.is_terminal() {
            return Err(StateError::InvalidTransition {
                id: id.to_string(),
                from: TaskStatus::Running,
                to: completion.status,
            });
        }
        let applied = self.mutate(id, |task, lease| {
            if task.status != TaskStatus::Running {
                return Ok(false);
            }
            enter_status(task, completion.status, epoch_millis());
            task.failure = completion.failure;
            task.artifacts.extend(completion.artifacts);
            task.cancel_requested = false;
            *lease = None;
            Ok(true)
        })?;
        Ok(applied.unwrap_or(false))
    }

    fn retry(
        &self,
        id: &str,
        expected: TaskStatus,
        max_attempts: u32,
        failure: Option<TaskFailure>,
    ) -> StateResult<RetryOutcome> {
        if !expected.is_in_flight() {
            return Err(StateError::InvalidTransition {
                id: id.to_string(),
                from: expected,
                to: TaskStatus::Pending,
            });
        }
        let outcome = self.mutate(id, |task, lease| {
            if task.status != expected {
                return Ok(RetryOutcome::Stale);
            }
            let now = epoch_millis();
            task.attempts += 1;
            *lease = None;
            if task.attempts >= max_attempts {
                let detail = failure
                    .as_ref()
                    .map(|f| f.message.clone())
                    .unwrap_or_else(|| "no detail recorded".to_string());
                task.failure = Some(TaskFailure::new(
                    FailureKind::AttemptsExhausted,
                    format!("gave up after {} attempts: {detail}", task.attempts),
                ));
                enter_status(task, TaskStatus::Failed, now);
                Ok(RetryOutcome::Exhausted {
                    attempts: task.attempts,
                })
            } else {
                task.failure = failure;
                enter_status(task, TaskStatus::Pending, now);
                Ok(RetryOutcome::Requeued {
                    attempts: task.attempts,
                })
            }
        })?;
        Ok(outcome.unwrap_or(RetryOutcome::NotFound))
    }

    fn cancel(&self, id: &str) -> StateResult<CancelOutcome> {
        let outcome = self.mutate(id, |task, lease| match task.status {
            TaskStatus::Pending | TaskStatus::Dispatched => {
                enter_status(task, TaskStatus::Cancelled, epoch_millis());
                *lease = None;
                Ok(CancelOutcome::Cancelled)
            }
            TaskStatus::Running => {
                task.cancel_requested = true;
                Ok(CancelOutcome::Requested)
            }
            _ => Ok(CancelOutcome::AlreadyTerminal),
        })?;
        Ok(outcome.unwrap_or(CancelOutcome::NotFound))
    }

    fn rerun(&self, id: &str) -> StateResult<bool> {
        let applied = self.mutate(id, |task, lease| {
            if !matches!(task.status, TaskStatus::Failed | TaskStatus::Cancelled) {
                return Ok(false);
            }
            enter_status(task, TaskStatus::Pending, epoch_millis());
            task.attempts = 0;
            task.completed_at = None;
            task.cancel_requested = false;
            task.failure = None;
            task.progress = None;
            *lease = None;
            Ok(true)
        })?;
        Ok(applied.unwrap_or(false))
    }

    fn record_progress(&self, id: &str, progress: StageProgress) -> StateResult<bool> {
        let applied = self.mutate(id, |task, _| {
            if task.status.is_terminal() {
                return Ok(false);
            }
            task.progress = Some(progress);
            Ok(true)
        })?;
        Ok(applied.unwrap_or(false))
    }

    fn list_stale(&self, cutoff: u64) -> StateResult<Vec<Task>> {
        let leases = self.list_leases()?;
        let stale = self
            .scan_tasks()?
            .into_iter()
            .filter(|task| match task.status {
                TaskStatus::Dispatched => task.dispatched_at.is_some_and(|at| at <= cutoff),
                TaskStatus::Running => {
                    let last_seen = leases
                        .iter()
                        .find(|lease| lease.task_id == task.id)
                        .map(|lease| lease.heartbeat_at)
                        .or(task.started_at)
                        .unwrap_or(0);
                    last_seen <= cutoff
                }
                _ => false,
            })
            .collect();
        Ok(stale)
    }

    fn get_lease(&self, id: &str) -> StateResult<Option<WorkerLease>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(LEASES).map_err(map_err!(Table))?;
        match table.get(id).map_err(map_err!(Read))? {
            Some(guard) => {
                let lease: WorkerLease =
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                Ok(Some(lease))
            }
            None => Ok(None),
        }
    }

    fn list_leases(&self) -> StateResult<Vec<WorkerLease>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(LEASES).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (_, value) = entry.map_err(map_err!(Read))?;
            let lease: WorkerLease =
                serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
            results.push(lease);
        }
        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mcbench_core::TaskPayload;

    fn build_task(id: &str) -> Task {
        Task::new(
            id,
            TaskPayload::Build {
                run_id: "run-1".to_string(),
                structure_name: "tower".to_string(),
                commands: vec!["/fill 0 64 0 3 70 3 stone".to_string()],
            },
        )
    }

    fn dispatched(store: &StateStore, id: &str) {
        store.insert_task(&build_task(id)).unwrap();
        assert!(store
            .transition(id, TaskStatus::Pending, TaskStatus::Dispatched)
            .unwrap());
    }

    fn running(store: &StateStore, id: &str) {
        dispatched(store, id);
        assert!(store.claim(id, "worker-1").unwrap());
    }

    // ── Insert / read ──────────────────────────────────────────────

    #[test]
    fn task_insert_and_get() {
        let store = StateStore::open_in_memory().unwrap();
        let task = build_task("t-1");
        store.insert_task(&task).unwrap();
        assert_eq!(store.get_task("t-1").unwrap(), Some(task));
        assert!(store.get_task("nope").unwrap().is_none());
    }

    #[test]
    fn duplicate_insert_is_rejected() {
        let store = StateStore::open_in_memory().unwrap();
        store.insert_task(&build_task("t-1")).unwrap();
        let err = store.insert_task(&build_task("t-1")).unwrap_err();
        assert!(matches!(err, StateError::AlreadyExists(_)));
    }

    #[test]
    fn list_queues_and_filter() {
        let store = StateStore::open_in_memory().unwrap();
        store.insert_task(&build_task("b-1")).unwrap();
        store
            .insert_task(&build_task("r-1").with_queue("render"))
            .unwrap();
        assert_eq!(store.list_queues().unwrap(), vec!["build", "render"]);

        let filter = TaskFilter {
            queue: Some("render".to_string()),
            status: Some(TaskStatus::Pending),
        };
        let listed = store.list_tasks(&filter).unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, "r-1");
    }

    // ── Admission primitives ───────────────────────────────────────

    #[test]
    fn fetch_pending_respects_order_and_limit() {
        let store = StateStore::open_in_memory().unwrap();
        store
            .insert_task(&build_task("t1").with_priority(5).with_created_at(0))
            .unwrap();
        store
            .insert_task(&build_task("t2").with_priority(1).with_created_at(1))
            .unwrap();
        store
            .insert_task(&build_task("t3").with_priority(1).with_created_at(2))
            .unwrap();

        let fifo = store
            .fetch_pending("build", 2, OrderingPolicy::Fifo)
            .unwrap();
        let ids: Vec<_> = fifo.iter().map(|t| t.id.as_str()).collect();
        assert_eq!(ids, vec!["t1", "t2"]);

        let prio = store
            .fetch_pending("build", 10, OrderingPolicy::PriorityFifo)
            .unwrap();
        let ids: Vec<_> = prio.iter().map(|t| t.id.as_str()).collect();
        assert_eq!(ids, vec!["t2", "t3", "t1"]);

        assert!(store
            .fetch_pending("build", 0, OrderingPolicy::Fifo)
            .unwrap()
            .is_empty());
    }

    #[test]
    fn transition_is_compare_and_set() {
        let store = StateStore::open_in_memory().unwrap();
        store.insert_task(&build_task("t-1")).unwrap();

        assert!(store
            .transition("t-1", TaskStatus::Pending, TaskStatus::Dispatched)
            .unwrap());
        // A second admission of the same task loses the race.
        assert!(!store
            .transition("t-1", TaskStatus::Pending, TaskStatus::Dispatched)
            .unwrap());

        let task = store.get_task("t-1").unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Dispatched);
        assert!(task.dispatched_at.is_some());
        assert_eq!(store.count_in_flight("build").unwrap(), 1);
    }

    #[test]
    fn transition_on_missing_task_is_false() {
        let store = StateStore::open_in_memory().unwrap();
        assert!(!store
            .transition("ghost", TaskStatus::Pending, TaskStatus::Dispatched)
            .unwrap());
    }

    #[test]
    fn illegal_transition_is_an_error() {
        let store = StateStore::open_in_memory().unwrap();
        store.insert_task(&build_task("t-1")).unwrap();
        let err = store
            .transition("t-1", TaskStatus::Pending, TaskStatus::Succeeded)
            .unwrap_err();
        assert!(matches!(err, StateError::InvalidTransition { .. }));
    }

    #[test]
    fn running_task_cannot_be_transitioned_back_to_pending() {
        let store = StateStore::open_in_memory().unwrap();
        running(&store, "t-1");
        let err = store
            .transition("t-1", TaskStatus::Running, TaskStatus::Pending)
            .unwrap_err();
        assert!(matches!(err, StateError::InvalidTransition { .. }));

        let task = store.get_task("t-1").unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Running);
        assert_eq!(task.attempts, 0);
        assert!(store.get_lease("t-1").unwrap().is_some());
    }

    #[test]
    fn rollback_clears_dispatched_at_without_consuming_an_attempt() {
        let store = StateStore::open_in_memory().unwrap();
        dispatched(&store, "t-1");
        assert!(store
            .transition("t-1", TaskStatus::Dispatched, TaskStatus::Pending)
            .unwrap());
        let task = store.get_task("t-1").unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Pending);
        assert!(task.dispatched_at.is_none());
        assert_eq!(task.attempts, 0);
    }

    // ── Worker lifecycle ───────────────────────────────────────────

    #[test]
    fn claim_creates_lease_and_complete_removes_it() {
        let store = StateStore::open_in_memory().unwrap();
        running(&store, "t-1");

        let lease = store.get_lease("t-1").unwrap().unwrap();
        assert_eq!(lease.worker_id, "worker-1");
        assert_eq!(lease.queue, "build");
        // Claim is single-winner too.
        assert!(!store.claim("t-1", "worker-2").unwrap());

        assert!(store
            .complete("t-1", Completion::succeeded(vec!["k".to_string()]))
            .unwrap());
        let task = store.get_task("t-1").unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Succeeded);
        assert!(task.completed_at.is_some());
        assert_eq!(task.artifacts, vec!["k"]);
        assert!(store.get_lease("t-1").unwrap().is_none());
        assert_eq!(store.count_in_flight("build").unwrap(), 0);
    }

    #[test]
    fn heartbeat_only_for_lease_holder() {
        let store = StateStore::open_in_memory().unwrap();
        running(&store, "t-1");
        assert!(store.heartbeat("t-1", "worker-1").unwrap());
        assert!(!store.heartbeat("t-1", "worker-2").unwrap());
    }

    #[test]
    fn complete_requires_running() {
        let store = StateStore::open_in_memory().unwrap();
        dispatched(&store, "t-1");
        assert!(!store.complete("t-1", Completion::succeeded(vec![])).unwrap());
    }

    #[test]
    fn retry_requeues_then_exhausts() {
        let store = StateStore::open_in_memory().unwrap();
        running(&store, "t-1");

        let failure = TaskFailure::new(FailureKind::Provision, "docker run failed");
        let outcome = store
            .retry("t-1", TaskStatus::Running, 2, Some(failure.clone()))
            .unwrap();
        assert_eq!(outcome, RetryOutcome::Requeued { attempts: 1 });
        let task = store.get_task("t-1").unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Pending);
        assert!(task.dispatched_at.is_none());
        assert!(store.get_lease("t-1").unwrap().is_none());

        assert!(store
            .transition("t-1", TaskStatus::Pending, TaskStatus::Dispatched)
            .unwrap());
        let outcome = store
            .retry("t-1", TaskStatus::Dispatched, 2, Some(failure))
            .unwrap();
        assert_eq!(outcome, RetryOutcome::Exhausted { attempts: 2 });
        let task = store.get_task("t-1").unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Failed);
        assert_eq!(
            task.failure.map(|f| f.kind),
            Some(FailureKind::AttemptsExhausted)
        );
    }

    #[test]
    fn retry_with_stale_expectation_is_skipped() {
        let store = StateStore::open_in_memory().unwrap();
        dispatched(&store, "t-1");
        assert_eq!(
            store.retry("t-1", TaskStatus::Running, 3, None).unwrap(),
            RetryOutcome::Stale
        );
        assert_eq!(
            store.retry("ghost", TaskStatus::Running, 3, None).unwrap(),
            RetryOutcome::NotFound
        );
    }

    // ── Operator actions ───────────────────────────────────────────

    #[test]
    fn cancel_paths() {
        let store = StateStore::open_in_memory().unwrap();
        store.insert_task(&build_task("p")).unwrap();
        dispatched(&store, "d");
        running(&store, "r");

        assert_eq!(store.cancel("p").unwrap(), CancelOutcome::Cancelled);
        assert_eq!(store.cancel("d").unwrap(), CancelOutcome::Cancelled);
        assert_eq!(store.cancel("r").unwrap(), CancelOutcome::Requested);
        assert_eq!(store.cancel("p").unwrap(), CancelOutcome::AlreadyTerminal);
        assert_eq!(store.cancel("ghost").unwrap(), CancelOutcome::NotFound);

        let running_task = store.get_task("r").unwrap().unwrap();
        assert_eq!(running_task.status, TaskStatus::Running);
        assert!(running_task.cancel_requested);
    }

    #[test]
    fn rerun_resets_failed_task() {
        let store = StateStore::open_in_memory().unwrap();
        running(&store, "t-1");
        store
            .complete(
                "t-1",
                Completion::failed(TaskFailure::new(FailureKind::Command, "bad"), vec![]),
            )
            .unwrap();

        assert!(store.rerun("t-1").unwrap());
        let task = store.get_task("t-1").unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Pending);
        assert_eq!(task.attempts, 0);
        assert!(task.failure.is_none());
        assert!(task.completed_at.is_none());

        // Pending tasks cannot be re-run.
        assert!(!store.rerun("t-1").unwrap());
    }

    #[test]
    fn progress_is_ignored_once_terminal() {
        let store = StateStore::open_in_memory().unwrap();
        running(&store, "t-1");
        assert!(store
            .record_progress("t-1", StageProgress::new("building", 0.5, None))
            .unwrap());
        store.complete("t-1", Completion::succeeded(vec![])).unwrap();
        assert!(!store
            .record_progress("t-1", StageProgress::new("building", 0.9, None))
            .unwrap());
        let task = store.get_task("t-1").unwrap().unwrap();
        assert_eq!(task.progress.map(|p| p.progress), Some(0.5));
    }

    #[test]
    fn list_stale_uses_dispatch_time_and_heartbeat() {
        let store = StateStore::open_in_memory().unwrap();
        dispatched(&store, "d");
        running(&store, "r");
        store.insert_task(&build_task("p")).unwrap();

        let now = epoch_millis();
        let stale: Vec<_> = store
            .list_stale(now + 1)
            .unwrap()
            .into_iter()
            .map(|t| t.id)
            .collect();
        assert_eq!(stale.len(), 2);
        assert!(stale.contains(&"d".to_string()));
        assert!(stale.contains(&"r".to_string()));

        assert!(store.list_stale(0).unwrap().is_empty());
    }

    // ── Persistence (on-disk) ──────────────────────────────────────

    #[test]
    fn persistence_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("tasks.redb");

        {
            let store = StateStore::open(&db_path).unwrap();
            running(&store, "t-1");
        }

        let store = StateStore::open(&db_path).unwrap();
        let task = store.get_task("t-1").unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Running);
        assert!(store.get_lease("t-1").unwrap().is_some());
    }
}
