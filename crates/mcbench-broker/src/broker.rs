//! The `Broker` seam between the scheduler and the worker pools.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use crate::error::BrokerResult;
use crate::message::DispatchMessage;

/// Boxed future alias for broker operations.
pub type BrokerFuture<'a, T> = Pin<Box<dyn Future<Output = BrokerResult<T>> + Send + 'a>>;

/// Work-queue transport.
///
/// Delivery is at-least-once: a claimed message stays held by the consumer
/// until it is acked, or nacked with `requeue` to put it back at the head of
/// its queue.
pub trait Broker: Send + Sync {
    /// Enqueue a dispatch message on `message.queue`.
    fn publish<'a>(&'a self, message: &'a DispatchMessage) -> BrokerFuture<'a, ()>;

    /// Take the next message from `queue`, waiting up to `wait` for one to
    /// arrive. `Ok(None)` means the wait elapsed.
    fn claim<'a>(
        &'a self,
        queue: &'a str,
        wait: Duration,
    ) -> BrokerFuture<'a, Option<DispatchMessage>>;

    /// Acknowledge a claimed message; it will not be delivered again.
    fn ack<'a>(&'a self, queue: &'a str, task_id: &'a str) -> BrokerFuture<'a, ()>;

    /// Release a claimed message. With `requeue` it becomes claimable again,
    /// otherwise it is dropped.
    fn nack<'a>(&'a self, queue: &'a str, task_id: &'a str, requeue: bool)
    -> BrokerFuture<'a, ()>;

    /// Whether a message for `task_id` is still waiting on `queue` or held
    /// by a consumer that has not acked it yet.
    fn holds<'a>(&'a self, queue: &'a str, task_id: &'a str) -> BrokerFuture<'a, bool>;
}
