//! Shared fixtures: fault-injecting wrappers around the real store and broker.

#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use mcbench_broker::{Broker, BrokerError, BrokerFuture, DispatchMessage, MemoryBroker};
use mcbench_core::{
    OrderingPolicy, QueueName, StageProgress, Task, TaskFailure, TaskPayload, TaskStatus,
    WorkerLease,
};
use mcbench_state::{
    CancelOutcome, Completion, RetryOutcome, StateError, StateResult, StateStore, TaskFilter,
    TaskStore,
};

pub fn task(id: &str, queue: &str, priority: i32, created_at: u64) -> Task {
    Task::new(
        id,
        TaskPayload::Generic {
            name: "score".to_string(),
            args: serde_json::Value::Null,
        },
    )
    .with_queue(queue)
    .with_priority(priority)
    .with_created_at(created_at)
}

/// `StateStore` with switchable failures.
pub struct FaultyStore {
    pub inner: StateStore,
    /// Queues whose in-flight count query fails.
    pub broken_queues: Mutex<HashSet<String>>,
    /// Fail every `dispatched → pending` transition.
    pub fail_rollback: AtomicBool,
}

impl FaultyStore {
    pub fn new(inner: StateStore) -> Self {
        Self {
            inner,
            broken_queues: Mutex::new(HashSet::new()),
            fail_rollback: AtomicBool::new(false),
        }
    }

    pub fn break_queue(&self, queue: &str) {
        self.broken_queues.lock().unwrap().insert(queue.to_string());
    }
}

impl TaskStore for FaultyStore {
    fn insert_task(&self, task: &Task) -> StateResult<()> {
        self.inner.insert_task(task)
    }

    fn get_task(&self, id: &str) -> StateResult<Option<Task>> {
        self.inner.get_task(id)
    }

    fn list_tasks(&self, filter: &TaskFilter) -> StateResult<Vec<Task>> {
        self.inner.list_tasks(filter)
    }

    fn list_queues(&self) -> StateResult<Vec<QueueName>> {
        self.inner.list_queues()
    }

    fn fetch_pending(
        &self,
        queue: &str,
        limit: usize,
        order: OrderingPolicy,
    ) -> StateResult<Vec<Task>> {
        self.inner.fetch_pending(queue, limit, order)
    }

    fn count_in_flight(&self, queue: &str) -> StateResult<usize> {
        if self.broken_queues.lock().unwrap().contains(queue) {
            return Err(StateError::Unavailable(format!("queue {queue} unreachable")));
        }
        self.inner.count_in_flight(queue)
    }

    fn transition(&self, id: &str, expected: TaskStatus, next: TaskStatus) -> StateResult<bool> {
        if expected == TaskStatus::Dispatched
            && next == TaskStatus::Pending
            && self.fail_rollback.load(Ordering::SeqCst)
        {
            return Err(StateError::Unavailable("write rejected".to_string()));
        }
        self.inner.transition(id, expected, next)
    }

    fn claim(&self, id: &str, worker_id: &str) -> StateResult<bool> {
        self.inner.claim(id, worker_id)
    }

    fn heartbeat(&self, id: &str, worker_id: &str) -> StateResult<bool> {
        self.inner.heartbeat(id, worker_id)
    }

    fn complete(&self, id: &str, completion: Completion) -> StateResult<bool> {
        self.inner.complete(id, completion)
    }

    fn retry(
        &self,
        id: &str,
        expected: TaskStatus,
        max_attempts: u32,
        failure: Option<TaskFailure>,
    ) -> StateResult<RetryOutcome> {
        self.inner.retry(id, expected, max_attempts, failure)
    }

    fn cancel(&self, id: &str) -> StateResult<CancelOutcome> {
        self.inner.cancel(id)
    }

    fn rerun(&self, id: &str) -> StateResult<bool> {
        self.inner.rerun(id)
    }

    fn record_progress(&self, id: &str, progress: StageProgress) -> StateResult<bool> {
        self.inner.record_progress(id, progress)
    }

    fn list_stale(&self, cutoff: u64) -> StateResult<Vec<Task>> {
        self.inner.list_stale(cutoff)
    }

    fn get_lease(&self, id: &str) -> StateResult<Option<WorkerLease>> {
        self.inner.get_lease(id)
    }

    fn list_leases(&self) -> StateResult<Vec<WorkerLease>> {
        self.inner.list_leases()
    }
}

/// `MemoryBroker` that rejects publishes while `failing` is set, and counts
/// every publish attempt per task.
#[derive(Default)]
pub struct FlakyBroker {
    pub inner: MemoryBroker,
    pub failing: AtomicBool,
    pub publishes: AtomicUsize,
    pub published_ids: Mutex<Vec<String>>,
}

impl Broker for FlakyBroker {
    fn publish<'a>(&'a self, message: &'a DispatchMessage) -> BrokerFuture<'a, ()> {
        Box::pin(async move {
            self.publishes.fetch_add(1, Ordering::SeqCst);
            if self.failing.load(Ordering::SeqCst) {
                return Err(BrokerError::Publish {
                    queue: message.queue.clone(),
                    reason: "connection refused".to_string(),
                });
            }
            self.published_ids
                .lock()
                .unwrap()
                .push(message.task_id.clone());
            self.inner.publish(message).await
        })
    }

    fn claim<'a>(
        &'a self,
        queue: &'a str,
        wait: Duration,
    ) -> BrokerFuture<'a, Option<DispatchMessage>> {
        self.inner.claim(queue, wait)
    }

    fn ack<'a>(&'a self, queue: &'a str, task_id: &'a str) -> BrokerFuture<'a, ()> {
        self.inner.ack(queue, task_id)
    }

    fn nack<'a>(
        &'a self,
        queue: &'a str,
        task_id: &'a str,
        requeue: bool,
    ) -> BrokerFuture<'a, ()> {
        self.inner.nack(queue, task_id, requeue)
    }

    fn holds<'a>(&'a self, queue: &'a str, task_id: &'a str) -> BrokerFuture<'a, bool> {
        self.inner.holds(queue, task_id)
    }
}
