//! BuildWorker — the server-worker pool member that runs build tasks.
//!
//! Each worker runs at most `max_build_jobs` BuildJobs at once; a
//! container host binds ports and a runtime socket per job, so this local
//! gate holds no matter how generous the queue ceiling is.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, Semaphore, watch};
use tracing::{debug, error, info};

use mcbench_broker::{Broker, DispatchMessage};
use mcbench_core::{QueueName, TaskId, WorkerConfig, queues};

use crate::error::{BuildError, RuntimeError};
use crate::lifecycle::{Lifecycle, Settled, TaskOutcome};
use crate::orchestrator::BuildOrchestrator;
use crate::pool::ClaimLoop;
use crate::sweep::{OrphanSweep, SweepReport};

#[derive(Clone)]
pub struct BuildWorker {
    lifecycle: Lifecycle,
    broker: Arc<dyn Broker>,
    orchestrator: Arc<BuildOrchestrator>,
    queue: QueueName,
    slots: Arc<Semaphore>,
    max_jobs: usize,
    claim_wait: Duration,
    /// Lease age after which another worker's containers count as orphaned.
    stale_after: Duration,
    active: Arc<Mutex<HashSet<TaskId>>>,
}

impl BuildWorker {
    pub fn new(
        lifecycle: Lifecycle,
        broker: Arc<dyn Broker>,
        orchestrator: Arc<BuildOrchestrator>,
        config: &WorkerConfig,
    ) -> Self {
        let max_jobs = config.max_build_jobs.max(1);
        let stale_after = orchestrator.config().build_timeout();
        Self {
            lifecycle,
            broker,
            orchestrator,
            queue: queues::BUILD.to_string(),
            slots: Arc::new(Semaphore::new(max_jobs)),
            max_jobs,
            claim_wait: config.claim_wait(),
            stale_after,
            active: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    pub fn with_stale_after(mut self, stale_after: Duration) -> Self {
        self.stale_after = stale_after;
        self
    }

    /// Consume from a queue other than `build`.
    pub fn with_queue(mut self, queue: impl Into<QueueName>) -> Self {
        self.queue = queue.into();
        self
    }

    pub fn worker_id(&self) -> &str {
        self.lifecycle.worker_id()
    }

    /// Task ids with a live BuildJob on this worker.
    pub async fn active_jobs(&self) -> HashSet<TaskId> {
        self.active.lock().await.clone()
    }

    /// Claim and run build tasks until shutdown. Sweeps orphaned containers
    /// before the first claim.
    pub async fn run(&self, shutdown: watch::Receiver<bool>) {
        if let Err(e) = self.sweep().await {
            error!(worker = %self.worker_id(), error = %e, "startup orphan sweep failed");
        }

        let worker = self.clone();
        ClaimLoop {
            worker_id: self.worker_id(),
            broker: self.broker.as_ref(),
            queue: &self.queue,
            slots: self.slots.clone(),
            capacity: self.max_jobs,
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

    /// Run one dispatched build task end to end and settle it.
    pub async fn process(&self, message: DispatchMessage) -> Option<Settled> {
        let task = self.lifecycle.begin(&message).await?;
        self.active.lock().await.insert(task.id.clone());

        let outcome = self.orchestrator.run(&task).await;

        self.active.lock().await.remove(&task.id);
        debug!(
            task_id = %task.id,
            commands = outcome.commands_run,
            checkpoints = outcome.checkpoints,
            destroyed = outcome.teardown.destroyed.len(),
            "build attempt finished"
        );

        let settled = match outcome.result {
            Ok(_) => TaskOutcome::Succeeded {
                artifacts: outcome.artifacts,
            },
            Err(BuildError::Cancelled) => TaskOutcome::Cancelled {
                artifacts: outcome.artifacts,
            },
            Err(e) => TaskOutcome::Failed {
                failure: e.to_failure(),
                artifacts: outcome.artifacts,
                retryable: e.is_retryable(),
            },
        };
        Some(self.lifecycle.finish(&message, settled).await)
    }

    /// Remove build containers no live job owns. Leases of other workers
    /// count as live until `stale_after` without a heartbeat.
    pub async fn sweep(&self) -> Result<SweepReport, RuntimeError> {
        let active = self.active_jobs().await;
        OrphanSweep {
            runtime: self.orchestrator.runtime().as_ref(),
            store: self.lifecycle.store().as_ref(),
            worker_id: self.worker_id(),
            stale_after: self.stale_after,
        }
        .run(&active)
        .await
    }

    /// Sweep every `interval` until shutdown.
    pub async fn run_sweeps(&self, interval: Duration, mut shutdown: watch::Receiver<bool>) {
        info!(worker = %self.worker_id(), interval_secs = interval.as_secs(), "orphan sweep loop starting");
        loop {
            tokio::select! {
                _ = tokio::time::sleep(interval) => {
                    if let Err(e) = self.sweep().await {
                        error!(worker = %self.worker_id(), error = %e, "orphan sweep failed");
                    }
                }
                _ = shutdown.changed() => {
                    debug!(worker = %self.worker_id(), "orphan sweep loop shutting down");
                    break;
                }
            }
        }
    }
}
