//! Explicit scheduler state threaded through every tick.
//!
//! Nothing here is global: each scheduler replica (and each test) owns its
//! own `SchedulerState`. The in-flight counts themselves always come from
//! the task store; this struct only holds the policy and what the replica
//! has observed so far.

use std::collections::BTreeSet;

use serde::Serialize;

use mcbench_core::{OrderingPolicy, QueueLimits, QueueName, Settings, TaskId};

#[derive(Debug, Clone)]
pub struct SchedulerState {
    pub limits: QueueLimits,
    pub order: OrderingPolicy,
    /// Every queue this replica has seen, so a queue whose tasks all reached
    /// terminal status is still visited while the store is unreachable.
    pub known_queues: BTreeSet<QueueName>,
    pub ticks: u64,
    pub last_report: Option<TickReport>,
}

impl SchedulerState {
    pub fn new(limits: QueueLimits, order: OrderingPolicy) -> Self {
        let known_queues = limits.configured_queues().map(str::to_string).collect();
        Self {
            limits,
            order,
            known_queues,
            ticks: 0,
            last_report: None,
        }
    }

    pub fn from_settings(settings: &Settings) -> Self {
        Self::new(settings.queues.clone(), settings.scheduler.ordering())
    }
}

/// Outcome of one queue's admission pass.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct QueueReport {
    pub queue: QueueName,
    pub max: usize,
    pub in_flight: usize,
    pub headroom: usize,
    /// Tasks moved to `dispatched` and published, in admission order.
    pub admitted: Vec<TaskId>,
    /// Candidates lost to a concurrent transition.
    pub skipped: usize,
    /// Tasks moved back to `pending` after a failed publish.
    pub rolled_back: usize,
    /// Store or broker error that ended this pass early.
    pub error: Option<String>,
}

impl QueueReport {
    pub fn new(queue: impl Into<QueueName>) -> Self {
        Self {
            queue: queue.into(),
            ..Self::default()
        }
    }

    /// In-flight count as of the end of the pass.
    pub fn in_flight_after(&self) -> usize {
        self.in_flight + self.admitted.len()
    }
}

/// Outcome of one admission tick, one entry per visited queue.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TickReport {
    pub tick: u64,
    pub queues: Vec<QueueReport>,
    /// Set when the queue listing itself failed; known queues were used.
    pub discovery_error: Option<String>,
}

impl TickReport {
    pub fn admitted(&self) -> usize {
        self.queues.iter().map(|q| q.admitted.len()).sum()
    }

    pub fn queue(&self, name: &str) -> Option<&QueueReport> {
        self.queues.iter().find(|q| q.queue == name)
    }

    pub fn has_errors(&self) -> bool {
        self.discovery_error.is_some() || self.queues.iter().any(|q| q.error.is_some())
    }
}
