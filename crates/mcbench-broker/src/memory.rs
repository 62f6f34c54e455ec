//! MemoryBroker — in-process `Broker` for standalone mode and tests.
//!
//! One FIFO per queue plus a map of claimed-but-unacked messages. Waiting
//! consumers park on a per-queue `Notify`; each publish wakes one of them.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::{Mutex, Notify};
use tokio::time::Instant;
use tracing::{debug, trace};

use crate::broker::{Broker, BrokerFuture};
use crate::error::BrokerError;
use crate::message::DispatchMessage;

#[derive(Default)]
struct QueueState {
    ready: VecDeque<DispatchMessage>,
    unacked: HashMap<String, DispatchMessage>,
    notify: Arc<Notify>,
}

/// In-process broker. Cheap to clone; clones share the same queues.
#[derive(Clone, Default)]
pub struct MemoryBroker {
    queues: Arc<Mutex<HashMap<String, QueueState>>>,
    closed: Arc<AtomicBool>,
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Messages waiting to be claimed on `queue`.
    pub async fn depth(&self, queue: &str) -> usize {
        let queues = self.queues.lock().await;
        queues.get(queue).map_or(0, |q| q.ready.len())
    }

    /// Messages claimed but not yet acked on `queue`.
    pub async fn unacked(&self, queue: &str) -> usize {
        let queues = self.queues.lock().await;
        queues.get(queue).map_or(0, |q| q.unacked.len())
    }

    /// Reject further publishes and claims, and wake every waiting consumer.
    pub async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        let queues = self.queues.lock().await;
        for state in queues.values() {
            state.notify.notify_waiters();
        }
        debug!("memory broker closed");
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl Broker for MemoryBroker {
    fn publish<'a>(&'a self, message: &'a DispatchMessage) -> BrokerFuture<'a, ()> {
        Box::pin(async move {
            if self.is_closed() {
                return Err(BrokerError::Closed);
            }
            let mut queues = self.queues.lock().await;
            let state = queues.entry(message.queue.clone()).or_default();
            state.ready.push_back(message.clone());
            state.notify.notify_one();
            trace!(task_id = %message.task_id, queue = %message.queue, "published");
            Ok(())
        })
    }

    fn claim<'a>(
        &'a self,
        queue: &'a str,
        wait: Duration,
    ) -> BrokerFuture<'a, Option<DispatchMessage>> {
        Box::pin(async move {
            let deadline = Instant::now() + wait;
            loop {
                let notify = {
                    if self.is_closed() {
                        return Err(BrokerError::Closed);
                    }
                    let mut queues = self.queues.lock().await;
                    let state = queues.entry(queue.to_string()).or_default();
                    if let Some(message) = state.ready.pop_front() {
                        state
                            .unacked
                            .insert(message.task_id.clone(), message.clone());
                        trace!(task_id = %message.task_id, %queue, "claimed");
                        return Ok(Some(message));
                    }
                    state.notify.clone()
                };
                if tokio::time::timeout_at(deadline, notify.notified())
                    .await
                    .is_err()
                {
                    return Ok(None);
                }
            }
        })
    }

    fn ack<'a>(&'a self, queue: &'a str, task_id: &'a str) -> BrokerFuture<'a, ()> {
        Box::pin(async move {
            let mut queues = self.queues.lock().await;
            queues
                .get_mut(queue)
                .and_then(|state| state.unacked.remove(task_id))
                .map(|_| ())
                .ok_or_else(|| BrokerError::NotClaimed {
                    queue: queue.to_string(),
                    task_id: task_id.to_string(),
                })
        })
    }

    fn nack<'a>(
        &'a self,
        queue: &'a str,
        task_id: &'a str,
        requeue: bool,
    ) -> BrokerFuture<'a, ()> {
        Box::pin(async move {
            let mut queues = self.queues.lock().await;
            let state = queues.get_mut(queue).ok_or_else(|| BrokerError::NotClaimed {
                queue: queue.to_string(),
                task_id: task_id.to_string(),
            })?;
            let message = state
                .unacked
                .remove(task_id)
                .ok_or_else(|| BrokerError::NotClaimed {
                    queue: queue.to_string(),
                    task_id: task_id.to_string(),
                })?;
            if requeue {
                state.ready.push_front(message);
                state.notify.notify_one();
                debug!(%task_id, %queue, "message requeued");
            } else {
                debug!(%task_id, %queue, "message dropped");
            }
            Ok(())
        })
    }

    fn holds<'a>(&'a self, queue: &'a str, task_id: &'a str) -> BrokerFuture<'a, bool> {
        Box::pin(async move {
            if self.is_closed() {
                return Err(BrokerError::Closed);
            }
            let queues = self.queues.lock().await;
            Ok(queues.get(queue).is_some_and(|state| {
                state.unacked.contains_key(task_id)
                    || state.ready.iter().any(|m| m.task_id == task_id)
            }))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn msg(id: &str, queue: &str) -> DispatchMessage {
        DispatchMessage {
            task_id: id.to_string(),
            queue: queue.to_string(),
            attempt: 0,
            published_at: 0,
        }
    }

    #[tokio::test]
    async fn publish_then_claim_is_fifo() {
        let broker = MemoryBroker::new();
        broker.publish(&msg("a", "build")).await.unwrap();
        broker.publish(&msg("b", "build")).await.unwrap();
        assert_eq!(broker.depth("build").await, 2);

        let first = broker.claim("build", Duration::ZERO).await.unwrap().unwrap();
        let second = broker.claim("build", Duration::ZERO).await.unwrap().unwrap();
        assert_eq!(first.task_id, "a");
        assert_eq!(second.task_id, "b");
        assert_eq!(broker.unacked("build").await, 2);
    }

    #[tokio::test]
    async fn queues_are_isolated() {
        let broker = MemoryBroker::new();
        broker.publish(&msg("a", "render")).await.unwrap();
        assert!(broker.claim("build", Duration::ZERO).await.unwrap().is_none());
        assert!(broker.claim("render", Duration::ZERO).await.unwrap().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn claim_times_out_when_empty() {
        let broker = MemoryBroker::new();
        let start = Instant::now();
        let got = broker.claim("build", Duration::from_secs(2)).await.unwrap();
        assert!(got.is_none());
        assert!(start.elapsed() >= Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn waiting_claim_wakes_on_publish() {
        let broker = MemoryBroker::new();
        let consumer = broker.clone();
        let handle =
            tokio::spawn(async move { consumer.claim("build", Duration::from_secs(30)).await });

        tokio::time::sleep(Duration::from_millis(100)).await;
        broker.publish(&msg("late", "build")).await.unwrap();

        let got = handle.await.unwrap().unwrap().unwrap();
        assert_eq!(got.task_id, "late");
    }

    #[tokio::test]
    async fn ack_removes_and_double_ack_fails() {
        let broker = MemoryBroker::new();
        broker.publish(&msg("a", "build")).await.unwrap();
        broker.claim("build", Duration::ZERO).await.unwrap();

        broker.ack("build", "a").await.unwrap();
        assert_eq!(broker.unacked("build").await, 0);
        let err = broker.ack("build", "a").await.unwrap_err();
        assert!(matches!(err, BrokerError::NotClaimed { .. }));
    }

    #[tokio::test]
    async fn nack_with_requeue_redelivers_first() {
        let broker = MemoryBroker::new();
        broker.publish(&msg("a", "build")).await.unwrap();
        broker.publish(&msg("b", "build")).await.unwrap();
        broker.claim("build", Duration::ZERO).await.unwrap();

        broker.nack("build", "a", true).await.unwrap();
        let again = broker.claim("build", Duration::ZERO).await.unwrap().unwrap();
        assert_eq!(again.task_id, "a");
    }

    #[tokio::test]
    async fn nack_without_requeue_drops() {
        let broker = MemoryBroker::new();
        broker.publish(&msg("a", "build")).await.unwrap();
        broker.claim("build", Duration::ZERO).await.unwrap();

        broker.nack("build", "a", false).await.unwrap();
        assert_eq!(broker.depth("build").await, 0);
        assert_eq!(broker.unacked("build").await, 0);
    }

    #[tokio::test]
    async fn holds_covers_ready_and_unacked_messages() {
        let broker = MemoryBroker::new();
        assert!(!broker.holds("build", "a").await.unwrap());

        broker.publish(&msg("a", "build")).await.unwrap();
        assert!(broker.holds("build", "a").await.unwrap());
        assert!(!broker.holds("render", "a").await.unwrap());

        broker.claim("build", Duration::ZERO).await.unwrap();
        assert!(broker.holds("build", "a").await.unwrap());

        broker.ack("build", "a").await.unwrap();
        assert!(!broker.holds("build", "a").await.unwrap());
    }

    #[tokio::test]
    async fn closed_broker_rejects_publish() {
        let broker = MemoryBroker::new();
        broker.close().await;
        let err = broker.publish(&msg("a", "build")).await.unwrap_err();
        assert!(matches!(err, BrokerError::Closed));
        let err = broker.claim("build", Duration::ZERO).await.unwrap_err();
        assert!(matches!(err, BrokerError::Closed));
    }
}
