//! Claim loop shared by every worker pool.
//!
//! A slot on the local semaphore is taken *before* claiming from the
//! broker, so a worker never holds a message it has no capacity to run.
//! This is the worker-local gate; the scheduler's queue ceiling is enforced
//! independently upstream.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Semaphore, watch};
use tracing::{debug, info, warn};

use mcbench_broker::{Broker, DispatchMessage};

pub(crate) struct ClaimLoop<'a> {
    pub worker_id: &'a str,
    pub broker: &'a dyn Broker,
    pub queue: &'a str,
    pub slots: Arc<Semaphore>,
    pub capacity: usize,
    pub claim_wait: Duration,
}

impl ClaimLoop<'_> {
    /// Claim and spawn `process` for each message until shutdown, then wait
    /// for every in-flight message to finish.
    pub(crate) async fn run<P, F>(self, mut shutdown: watch::Receiver<bool>, process: P)
    where
        P: Fn(DispatchMessage) -> F,
        F: Future<Output = ()> + Send + 'static,
    {
        info!(worker = %self.worker_id, queue = %self.queue, capacity = self.capacity, "worker pool starting");

        loop {
            let permit = tokio::select! {
                permit = self.slots.clone().acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
                _ = shutdown.changed() => break,
            };

            let claimed = tokio::select! {
                claimed = self.broker.claim(self.queue, self.claim_wait) => claimed,
                _ = shutdown.changed() => break,
            };

            match claimed {
                Ok(Some(message)) => {
                    debug!(worker = %self.worker_id, task_id = %message.task_id, "message claimed");
                    let work = process(message);
                    tokio::spawn(async move {
                        work.await;
                        drop(permit);
                    });
                }
                Ok(None) => {}
                Err(e) => {
                    drop(permit);
                    warn!(worker = %self.worker_id, queue = %self.queue, error = %e, "claim failed");
                    tokio::select! {
                        _ = tokio::time::sleep(self.claim_wait) => {}
                        _ = shutdown.changed() => break,
                    }
                }
            }
        }

        debug!(worker = %self.worker_id, "draining in-flight work");
        let capacity = u32::try_from(self.capacity).unwrap_or(u32::MAX);
        if self.slots.acquire_many(capacity).await.is_err() {
            warn!(worker = %self.worker_id, "slot semaphore closed while draining");
        }
        info!(worker = %self.worker_id, queue = %self.queue, "worker pool stopped");
    }
}
