//! Operator commands against the task store.

use std::path::{Path, PathBuf};

use anyhow::{Context, bail};
use tracing::info;

use mcbench_core::{Task, TaskPayload, TaskStatus};
use mcbench_state::{CancelOutcome, StateStore, TaskFilter, TaskStore};

/// File name of the task store inside the data directory.
pub const DB_FILE: &str = "mcbench.redb";

pub fn db_path(data_dir: &Path) -> PathBuf {
    data_dir.join(DB_FILE)
}

pub fn open_store(data_dir: &Path) -> anyhow::Result<StateStore> {
    std::fs::create_dir_all(data_dir)
        .with_context(|| format!("create data dir {}", data_dir.display()))?;
    let path = db_path(data_dir);
    StateStore::open(&path).with_context(|| format!("open task store {}", path.display()))
}

/// Parse a payload given inline or as `@path`.
pub fn parse_payload(raw: &str) -> anyhow::Result<TaskPayload> {
    let json = match raw.strip_prefix('@') {
        Some(path) => std::fs::read_to_string(path).with_context(|| format!("read payload {path}"))?,
        None => raw.to_string(),
    };
    serde_json::from_str(&json).context("payload is not a valid task payload")
}

pub fn enqueue(
    store: &dyn TaskStore,
    id: &str,
    payload: TaskPayload,
    queue: Option<String>,
    priority: i32,
) -> anyhow::Result<Task> {
    let mut task = Task::new(id, payload).with_priority(priority);
    if let Some(queue) = queue {
        task = task.with_queue(queue);
    }
    store.insert_task(&task)?;
    info!(task_id = %task.id, queue = %task.queue, priority, "task enqueued");
    Ok(task)
}

pub fn status(store: &dyn TaskStore, id: &str) -> anyhow::Result<Task> {
    store
        .get_task(id)?
        .with_context(|| format!("no task {id}"))
}

pub fn cancel(store: &dyn TaskStore, id: &str) -> anyhow::Result<String> {
    let message = match store.cancel(id)? {
        CancelOutcome::Cancelled => format!("{id}: cancelled"),
        CancelOutcome::Requested => format!("{id}: cancellation requested, worker stops at the next command"),
        CancelOutcome::AlreadyTerminal => format!("{id}: already finished, nothing to cancel"),
        CancelOutcome::NotFound => bail!("no task {id}"),
    };
    Ok(message)
}

/// Move a failed or cancelled task back to `pending`.
pub fn rerun(store: &dyn TaskStore, id: &str) -> anyhow::Result<Task> {
    let task = status(store, id)?;
    if !store.rerun(id)? {
        bail!("{id} is {}; only failed or cancelled tasks can be retried", task.status);
    }
    info!(task_id = %id, from = %task.status, "task reset for rerun");
    status(store, id)
}

pub fn list(
    store: &dyn TaskStore,
    queue: Option<String>,
    status: Option<TaskStatus>,
) -> anyhow::Result<Vec<Task>> {
    Ok(store.list_tasks(&TaskFilter { queue, status })?)
}

/// One-line description of a task.
pub fn summary(task: &Task) -> String {
    let mut line = format!(
        "{:<24} {:<8} {:<10} prio={:<4} attempts={}",
        task.id, task.queue, task.status.as_str(), task.priority, task.attempts
    );
    if let Some(progress) = &task.progress {
        line.push_str(&format!(" stage={}({:.0}%)", progress.stage, progress.progress * 100.0));
    }
    if task.cancel_requested {
        line.push_str(" cancel-requested");
    }
    if let Some(failure) = &task.failure {
        line.push_str(&format!(" failure={:?}: {}", failure.kind, failure.message));
    }
    line
}
