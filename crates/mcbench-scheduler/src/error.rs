//! Scheduler error types.

use thiserror::Error;

/// Errors that abort one queue's admission pass or one reconciliation sweep.
///
/// Both are retried on the next interval; neither is ever recorded as a
/// task failure.
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("task store error: {0}")]
    State(#[from] mcbench_state::StateError),

    #[error("broker error: {0}")]
    Broker(#[from] mcbench_broker::BrokerError),
}

pub type SchedulerResult<T> = Result<T, SchedulerError>;
