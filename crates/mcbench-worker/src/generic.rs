//! Generic worker harness for non-build queues (prompt, render, scoring).
//!
//! The task logic lives behind `TaskHandler`; the harness supplies the
//! claim → run → terminal-status contract and the local concurrency gate.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::{Semaphore, watch};
use tracing::info;

use mcbench_broker::{Broker, DispatchMessage};
use mcbench_core::{FailureKind, QueueName, Task, TaskFailure};

use crate::lifecycle::{Lifecycle, Settled, TaskOutcome};
use crate::pool::ClaimLoop;

/// Artifacts (object keys) produced by a handler.
pub type HandlerFuture<'a> = Pin<Box<dyn Future<Output = Result<Vec<String>, HandlerError>> + Send + 'a>>;

#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct HandlerError {
    pub message: String,
    /// Transient failure: requeue under the attempt limit.
    pub retryable: bool,
}

impl HandlerError {
    pub fn retryable(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retryable: true,
        }
    }

    pub fn fatal(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retryable: false,
        }
    }
}

/// Task logic for one queue kind.
pub trait TaskHandler: Send + Sync {
    fn handle<'a>(&'a self, task: &'a Task) -> HandlerFuture<'a>;
}

#[derive(Clone)]
pub struct GenericWorker {
    lifecycle: Lifecycle,
    broker: Arc<dyn Broker>,
    handler: Arc<dyn TaskHandler>,
    queue: QueueName,
    slots: Arc<Semaphore>,
    concurrency: usize,
    claim_wait: Duration,
}

impl GenericWorker {
    pub fn new(
        lifecycle: Lifecycle,
        broker: Arc<dyn Broker>,
        handler: Arc<dyn TaskHandler>,
        queue: impl Into<QueueName>,
        concurrency: usize,
        claim_wait: Duration,
    ) -> Self {
        let concurrency = concurrency.max(1);
        Self {
            lifecycle,
            broker,
            handler,
            queue: queue.into(),
            slots: Arc::new(Semaphore::new(concurrency)),
            concurrency,
            claim_wait,
        }
    }

    pub async fn run(&self, shutdown: watch::Receiver<bool>) {
        let worker = self.clone();
        ClaimLoop {
            worker_id: self.lifecycle.worker_id(),
            broker: self.broker.as_ref(),
            queue: &self.queue,
            slots: self.slots.clone(),
            capacity: self.concurrency,
            claim_wait: self.claim_wait,
        }
        .run(shutdown, move |message| {
            let worker = worker.clone();
            async move {
                worker.process(message).await;
            }
        })
        .await;
    }

    pub async fn process(&self, message: DispatchMessage) -> Option<Settled> {
        let task = self.lifecycle.begin(&message).await?;

        let outcome = if task.cancel_requested {
            TaskOutcome::Cancelled {
                artifacts: Vec::new(),
            }
        } else {
            match self.handler.handle(&task).await {
                Ok(artifacts) => TaskOutcome::Succeeded { artifacts },
                Err(e) => {
                    info!(task_id = %task.id, queue = %task.queue, error = %e, retryable = e.retryable, "handler failed");
                    TaskOutcome::Failed {
                        failure: TaskFailure::new(FailureKind::Handler, e.message),
                        artifacts: Vec::new(),
                        retryable: e.retryable,
                    }
                }
            }
        };
        Some(self.lifecycle.finish(&message, outcome).await)
    }
}
