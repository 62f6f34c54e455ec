//! Dispatch message carried by the broker.

use serde::{Deserialize, Serialize};

use mcbench_core::{QueueName, Task, TaskId, epoch_millis};

/// Published once per admission. Workers look the task up in the store by
/// id; the message itself carries no payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchMessage {
    pub task_id: TaskId,
    pub queue: QueueName,
    /// Attempt number this dispatch belongs to (zero-based).
    pub attempt: u32,
    /// Unix epoch milliseconds.
    pub published_at: u64,
}

impl DispatchMessage {
    pub fn for_task(task: &Task) -> Self {
        Self {
            task_id: task.id.clone(),
            queue: task.queue.clone(),
            attempt: task.attempts,
            published_at: epoch_millis(),
        }
    }
}
