//! Broker error types.

use thiserror::Error;

/// Result type alias for broker operations.
pub type BrokerResult<T> = Result<T, BrokerError>;

#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("broker is closed")]
    Closed,

    #[error("publish to queue {queue} failed: {reason}")]
    Publish { queue: String, reason: String },

    #[error("task {task_id} is not held by a consumer on queue {queue}")]
    NotClaimed { queue: String, task_id: String },
}
