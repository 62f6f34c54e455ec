//! Error types for the worker pools.

use std::time::Duration;

use thiserror::Error;

use mcbench_core::{FailureKind, TaskFailure};

pub type RuntimeResult<T> = Result<T, RuntimeError>;

/// Errors reported by a container runtime.
#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("failed to launch runtime client: {0}")]
    Spawn(#[from] std::io::Error),

    #[error("{op} failed for {target}: {detail}")]
    Command {
        op: &'static str,
        target: String,
        detail: String,
    },

    #[error("{op} timed out for {target} after {after:?}")]
    Timeout {
        op: &'static str,
        target: String,
        after: Duration,
    },
}

/// Errors reported by an object store.
#[derive(Debug, Error)]
pub enum ObjectStoreError {
    #[error("invalid object key: {0:?}")]
    InvalidKey(String),

    #[error("object store I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("object store unavailable: {0}")]
    Unavailable(String),
}

/// Why a build attempt ended without success.
#[derive(Debug, Error)]
pub enum BuildError {
    #[error("task payload is not a build: {0}")]
    InvalidPayload(String),

    #[error("provisioning failed: {0}")]
    Provision(String),

    #[error("server not ready after {after:?}")]
    ReadinessTimeout { after: Duration },

    #[error("command {index} failed ({command}): {detail}")]
    Command {
        index: usize,
        command: String,
        detail: String,
    },

    #[error("container runtime error: {0}")]
    Runtime(String),

    #[error("export failed: {0}")]
    Export(String),

    #[error("cancelled by operator")]
    Cancelled,

    #[error("build exceeded {after:?}")]
    Timeout { after: Duration },

    #[error("task store error: {0}")]
    Store(#[from] mcbench_state::StateError),
}

impl BuildError {
    /// Whether the attempt should go back to `pending` (bounded by the
    /// attempt limit) instead of failing the task outright.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            BuildError::Provision(_)
                | BuildError::ReadinessTimeout { .. }
                | BuildError::Runtime(_)
                | BuildError::Export(_)
                | BuildError::Store(_)
        )
    }

    pub fn failure_kind(&self) -> FailureKind {
        match self {
            BuildError::InvalidPayload(_) => FailureKind::Handler,
            BuildError::Provision(_) | BuildError::Store(_) => FailureKind::Provision,
            BuildError::ReadinessTimeout { .. } => FailureKind::ReadinessTimeout,
            BuildError::Command { .. } => FailureKind::Command,
            BuildError::Runtime(_) => FailureKind::Runtime,
            BuildError::Export(_) => FailureKind::Export,
            BuildError::Cancelled => FailureKind::Cancelled,
            BuildError::Timeout { .. } => FailureKind::Timeout,
        }
    }

    /// Failure record persisted with the task.
    pub fn to_failure(&self) -> TaskFailure {
        let mut failure = TaskFailure::new(self.failure_kind(), self.to_string());
        if let BuildError::Command { index, command, .. } = self {
            failure.command = Some(command.clone());
            failure.command_index = Some(*index);
        }
        failure
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryability_follows_failure_taxonomy() {
        assert!(BuildError::Provision("no image".into()).is_retryable());
        assert!(
            BuildError::ReadinessTimeout {
                after: Duration::from_secs(2)
            }
            .is_retryable()
        );
        assert!(
            !BuildError::Command {
                index: 3,
                command: "/fill".into(),
                detail: "bad syntax".into()
            }
            .is_retryable()
        );
        assert!(!BuildError::Cancelled.is_retryable());
        assert!(
            !BuildError::Timeout {
                after: Duration::from_secs(1)
            }
            .is_retryable()
        );
    }

    #[test]
    fn command_failure_carries_command_and_index() {
        let failure = BuildError::Command {
            index: 7,
            command: "/setblock ~ ~ ~ lava".into(),
            detail: "Unknown block".into(),
        }
        .to_failure();
        assert_eq!(failure.kind, FailureKind::Command);
        assert_eq!(failure.command.as_deref(), Some("/setblock ~ ~ ~ lava"));
        assert_eq!(failure.command_index, Some(7));
        assert!(failure.message.contains("Unknown block"));
    }
}
