//! AdmissionScheduler — moves pending tasks to the broker under per-queue
//! concurrency ceilings.
//!
//! One tick visits every known queue:
//!
//! ```text
//!   in_flight = count_in_flight(q)
//!   headroom  = max(q) - in_flight            (floored at 0)
//!   for task in fetch_pending(q, headroom, order):
//!       transition(task, pending → dispatched)   ── false: lost race, skip
//!       publish(task)                            ── error: roll back to pending
//! ```
//!
//! Queues are isolated: a store or broker error ends only that queue's pass
//! for this tick.

use std::collections::BTreeSet;
use std::sync::Arc;

use tracing::{debug, info, warn};

use mcbench_broker::{Broker, DispatchMessage};
use mcbench_core::{QueueName, Task, TaskStatus};
use mcbench_state::TaskStore;

use crate::alert::{AlertKind, AlertSink, OperatorAlert};
use crate::error::SchedulerResult;
use crate::state::{QueueReport, SchedulerState, TickReport};

/// Admission control loop body. Stateless apart from its collaborators;
/// all mutable bookkeeping lives in the `SchedulerState` passed to `tick`.
pub struct AdmissionScheduler {
    store: Arc<dyn TaskStore>,
    broker: Arc<dyn Broker>,
    alerts: AlertSink,
}

impl AdmissionScheduler {
    pub fn new(store: Arc<dyn TaskStore>, broker: Arc<dyn Broker>, alerts: AlertSink) -> Self {
        Self {
            store,
            broker,
            alerts,
        }
    }

    /// Run one admission pass over every known queue.
    pub async fn tick(&self, state: &mut SchedulerState) -> TickReport {
        state.ticks += 1;
        let mut report = TickReport {
            tick: state.ticks,
            ..TickReport::default()
        };

        let queues = self.discover_queues(state, &mut report);
        for queue in queues {
            let mut queue_report = QueueReport::new(queue.clone());
            if let Err(e) = self.admit_queue(&queue, state, &mut queue_report).await {
                warn!(%queue, error = %e, "admission pass aborted");
                queue_report.error = Some(e.to_string());
            }
            report.queues.push(queue_report);
        }

        debug!(
            tick = report.tick,
            queues = report.queues.len(),
            admitted = report.admitted(),
            errors = report.has_errors(),
            "admission tick complete"
        );
        state.last_report = Some(report.clone());
        report
    }

    /// Union of queues holding tasks, configured queues, and queues seen on
    /// earlier ticks.
    fn discover_queues(
        &self,
        state: &mut SchedulerState,
        report: &mut TickReport,
    ) -> BTreeSet<QueueName> {
        match self.store.list_queues() {
            Ok(queues) => state.known_queues.extend(queues),
            Err(e) => {
                warn!(error = %e, "queue discovery failed, using known queues");
                report.discovery_error = Some(e.to_string());
            }
        }
        state
            .known_queues
            .extend(state.limits.configured_queues().map(str::to_string));
        state.known_queues.clone()
    }

    async fn admit_queue(
        &self,
        queue: &str,
        state: &SchedulerState,
        report: &mut QueueReport,
    ) -> SchedulerResult<()> {
        report.max = state.limits.max_for(queue);
        report.in_flight = self.store.count_in_flight(queue)?;
        report.headroom = report.max.saturating_sub(report.in_flight);
        if report.headroom == 0 {
            return Ok(());
        }

        let candidates = self.store.fetch_pending(queue, report.headroom, state.order)?;
        for task in candidates.into_iter().take(report.headroom) {
            if !self
                .store
                .transition(&task.id, TaskStatus::Pending, TaskStatus::Dispatched)?
            {
                debug!(task_id = %task.id, %queue, "task no longer pending, skipped");
                report.skipped += 1;
                continue;
            }

            let message = DispatchMessage::for_task(&task);
            match self.broker.publish(&message).await {
                Ok(()) => {
                    info!(
                        task_id = %task.id,
                        %queue,
                        priority = task.priority,
                        attempt = task.attempts,
                        "task admitted"
                    );
                    report.admitted.push(task.id);
                }
                Err(e) => {
                    warn!(task_id = %task.id, %queue, error = %e, "publish failed, rolling back");
                    self.roll_back(&task, &e.to_string(), report);
                    // The broker is unreachable; leave the rest for the next tick.
                    return Err(e.into());
                }
            }
        }
        Ok(())
    }

    /// Compensate a failed publish by returning the task to `pending`.
    fn roll_back(&self, task: &Task, publish_error: &str, report: &mut QueueReport) {
        match self
            .store
            .transition(&task.id, TaskStatus::Dispatched, TaskStatus::Pending)
        {
            Ok(true) => {
                report.rolled_back += 1;
                debug!(task_id = %task.id, queue = %task.queue, "rolled back to pending");
            }
            Ok(false) => {
                // Moved on concurrently (e.g. cancelled); nothing to undo.
                debug!(task_id = %task.id, queue = %task.queue, "rollback skipped, status changed");
            }
            Err(e) => self.alerts.raise(OperatorAlert::new(
                AlertKind::RollbackFailed,
                task.id.clone(),
                task.queue.clone(),
                TaskStatus::Dispatched,
                format!("publish failed ({publish_error}); rollback failed ({e})"),
            )),
        }
    }
}
