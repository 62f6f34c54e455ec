//! Admission ordering policy and the priority comparator.
//!
//! The policy is process-wide. Under `PriorityFifo` lower priority values
//! are admitted first and equal priorities fall back to creation time, so
//! a task is never starved while priority values stay bounded.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

use crate::types::Task;

/// How pending tasks within one queue are ordered for admission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderingPolicy {
    /// Strict creation-time order.
    #[default]
    Fifo,
    /// Priority value ascending, then creation time ascending.
    PriorityFifo,
}

impl OrderingPolicy {
    /// Map the `USE_PRIORITY_COMPARISON` switch onto a policy.
    pub fn from_priority_flag(enabled: bool) -> Self {
        if enabled {
            OrderingPolicy::PriorityFifo
        } else {
            OrderingPolicy::Fifo
        }
    }

    /// Relative order of two pending tasks.
    ///
    /// A strict weak ordering: `Equal` means the two are interchangeable
    /// for admission (same priority and creation time).
    pub fn compare(self, a: &Task, b: &Task) -> Ordering {
        match self {
            OrderingPolicy::Fifo => a.created_at.cmp(&b.created_at),
            OrderingPolicy::PriorityFifo => a
                .priority
                .cmp(&b.priority)
                .then_with(|| a.created_at.cmp(&b.created_at)),
        }
    }

    /// Sort tasks into admission order. Stable, so equivalent tasks keep
    /// their input order.
    pub fn sort(self, tasks: &mut [Task]) {
        tasks.sort_by(|a, b| self.compare(a, b));
    }
}
