//! Domain types for the benchmark work pipeline.
//!
//! These types represent tasks as they are persisted in the task store,
//! published on the broker, and consumed by the worker pools. All types
//! are serializable to/from JSON for storage in redb tables.

use std::fmt;
use std::str::FromStr;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

/// Unique identifier for a task.
pub type TaskId = String;

/// Logical queue name (e.g. `build`, `render`).
pub type QueueName = String;

/// Identifier of a worker instance that claims tasks.
pub type WorkerId = String;

/// Well-known queue names.
pub mod queues {
    pub const PROMPT: &str = "prompt";
    pub const BUILD: &str = "build";
    pub const RENDER: &str = "render";
    pub const ADMIN: &str = "admin";
    pub const GENERIC: &str = "generic";
}

// ── Status ────────────────────────────────────────────────────────

/// Lifecycle status of a task.
///
/// Forward path: `pending → dispatched → running → {succeeded, failed, cancelled}`.
/// Returning to `pending` is only legal through the store's retry and
/// rollback operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Dispatched,
    Running,
    Succeeded,
    Failed,
    Cancelled,
}

impl TaskStatus {
    /// All statuses, in state-machine order.
    pub const ALL: [TaskStatus; 6] = [
        TaskStatus::Pending,
        TaskStatus::Dispatched,
        TaskStatus::Running,
        TaskStatus::Succeeded,
        TaskStatus::Failed,
        TaskStatus::Cancelled,
    ];

    /// Terminal statuses never change again (except by operator re-run).
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskStatus::Succeeded | TaskStatus::Failed | TaskStatus::Cancelled
        )
    }

    /// Statuses that count against a queue's concurrency ceiling.
    pub fn is_in_flight(self) -> bool {
        matches!(self, TaskStatus::Dispatched | TaskStatus::Running)
    }

    /// Whether `self → next` is a legal edge of the task state machine.
    ///
    /// `dispatched → pending` covers publish rollback and reconciliation of
    /// a lost dispatch. `dispatched → failed` is the forced failure once the
    /// attempt limit is reached. A running task only returns to `pending`
    /// through the store's `retry`, which counts the attempt.
    pub fn can_transition_to(self, next: TaskStatus) -> bool {
        use TaskStatus::*;
        matches!(
            (self, next),
            (Pending, Dispatched)
                | (Pending, Cancelled)
                | (Dispatched, Running)
                | (Dispatched, Pending)
                | (Dispatched, Failed)
                | (Dispatched, Cancelled)
                | (Running, Succeeded)
                | (Running, Failed)
                | (Running, Cancelled)
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Dispatched => "dispatched",
            TaskStatus::Running => "running",
            TaskStatus::Succeeded => "succeeded",
            TaskStatus::Failed => "failed",
            TaskStatus::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TaskStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| format!("unknown task status: {s}"))
    }
}

// ── Payload ───────────────────────────────────────────────────────

/// Kind-specific task input.
///
/// The scheduler never looks inside; the consuming worker pool resolves it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TaskPayload {
    /// Ask a model provider to generate a build script.
    Prompt {
        run_id: String,
        model_slug: String,
        prompt_ref: String,
    },
    /// Execute a generated command sequence inside a game server.
    Build {
        run_id: String,
        structure_name: String,
        commands: Vec<String>,
    },
    /// Render an exported structure.
    Render { run_id: String, sample_ref: String },
    /// Anything else (scoring, admin chores).
    Generic {
        name: String,
        #[serde(default)]
        args: serde_json::Value,
    },
}

impl TaskPayload {
    /// The queue this payload kind is routed to unless overridden.
    pub fn default_queue(&self) -> &'static str {
        match self {
            TaskPayload::Prompt { .. } => queues::PROMPT,
            TaskPayload::Build { .. } => queues::BUILD,
            TaskPayload::Render { .. } => queues::RENDER,
            TaskPayload::Generic { .. } => queues::GENERIC,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            TaskPayload::Prompt { .. } => "prompt",
            TaskPayload::Build { .. } => "build",
            TaskPayload::Render { .. } => "render",
            TaskPayload::Generic { .. } => "generic",
        }
    }
}

// ── Outcome detail ────────────────────────────────────────────────

/// Classification of a recorded failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Provision,
    ReadinessTimeout,
    Command,
    /// Container runtime unreachable mid-build.
    Runtime,
    Export,
    Timeout,
    OrchestratorCrash,
    AttemptsExhausted,
    Handler,
    Cancelled,
}

/// Failure detail stored with a task.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TaskFailure {
    pub kind: FailureKind,
    pub message: String,
    /// The generated command that failed, for `Command` failures.
    #[serde(default)]
    pub command: Option<String>,
    /// Zero-based position of the failing command.
    #[serde(default)]
    pub command_index: Option<usize>,
}

impl TaskFailure {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            command: None,
            command_index: None,
        }
    }
}

/// Advisory progress note for the current stage of a task.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StageProgress {
    pub stage: String,
    /// Fraction complete, 0.0–1.0.
    pub progress: f64,
    #[serde(default)]
    pub note: Option<String>,
    pub updated_at: u64,
}

impl StageProgress {
    pub fn new(stage: impl Into<String>, progress: f64, note: Option<String>) -> Self {
        Self {
            stage: stage.into(),
            progress: progress.clamp(0.0, 1.0),
            note,
            updated_at: epoch_millis(),
        }
    }
}

// ── Task ──────────────────────────────────────────────────────────

/// A unit of work tracked by the task store.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Task {
    pub id: TaskId,
    pub queue: QueueName,
    /// Lower values are more urgent.
    pub priority: i32,
    pub status: TaskStatus,
    pub attempts: u32,
    /// Unix epoch milliseconds.
    pub created_at: u64,
    pub dispatched_at: Option<u64>,
    pub started_at: Option<u64>,
    pub completed_at: Option<u64>,
    pub payload: TaskPayload,
    /// Set by an operator cancel while the task is running.
    #[serde(default)]
    pub cancel_requested: bool,
    #[serde(default)]
    pub failure: Option<TaskFailure>,
    #[serde(default)]
    pub progress: Option<StageProgress>,
    /// Object-store keys produced by this task.
    #[serde(default)]
    pub artifacts: Vec<String>,
}

impl Task {
    /// Create a pending task routed to its payload's default queue.
    pub fn new(id: impl Into<TaskId>, payload: TaskPayload) -> Self {
        Self {
            id: id.into(),
            queue: payload.default_queue().to_string(),
            priority: 0,
            status: TaskStatus::Pending,
            attempts: 0,
            created_at: epoch_millis(),
            dispatched_at: None,
            started_at: None,
            completed_at: None,
            payload,
            cancel_requested: false,
            failure: None,
            progress: None,
            artifacts: Vec::new(),
        }
    }

    pub fn with_queue(mut self, queue: impl Into<QueueName>) -> Self {
        self.queue = queue.into();
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_created_at(mut self, created_at: u64) -> Self {
        self.created_at = created_at;
        self
    }
}

/// Accounting record mapping a claimed task to the worker running it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorkerLease {
    pub task_id: TaskId,
    pub queue: QueueName,
    pub worker_id: WorkerId,
    pub claimed_at: u64,
    pub heartbeat_at: u64,
}

/// Current Unix epoch in milliseconds.
pub fn epoch_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
