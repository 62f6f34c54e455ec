//! Orphan container sweep.
//!
//! Finds containers named `mcbench-build-<task_id>-{server,builder}` that
//! no live BuildJob owns (left behind by a crashed or killed worker) and
//! removes them. A container is kept when:
//!
//! - its task is an active job of this worker, or
//! - its task is `running` under another worker whose lease heartbeat is
//!   still fresh (several workers may share one container host).
//!
//! When the store cannot be read the container is kept for the next pass.

use std::collections::HashSet;
use std::time::Duration;

use tracing::{debug, info, warn};

use mcbench_core::{TaskId, TaskStatus, epoch_millis};
use mcbench_state::TaskStore;

use crate::error::RuntimeError;
use crate::runtime::{CONTAINER_PREFIX, ContainerHandle, ContainerRuntime, parse_container_name};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub destroyed: Vec<String>,
    pub kept: Vec<String>,
    pub errors: usize,
}

pub struct OrphanSweep<'a> {
    pub runtime: &'a dyn ContainerRuntime,
    pub store: &'a dyn TaskStore,
    pub worker_id: &'a str,
    pub stale_after: Duration,
}

impl OrphanSweep<'_> {
    pub async fn run(&self, active: &HashSet<TaskId>) -> Result<SweepReport, RuntimeError> {
        let mut report = SweepReport::default();
        for name in self.runtime.list(CONTAINER_PREFIX).await? {
            let Some((task_id, role)) = parse_container_name(&name) else {
                continue;
            };
            match self.owned_elsewhere(&task_id, active) {
                Some(true) => {
                    report.kept.push(name);
                    continue;
                }
                Some(false) => {}
                None => {
                    report.errors += 1;
                    report.kept.push(name);
                    continue;
                }
            }

            let handle = ContainerHandle::named(name.clone(), role);
            match self.runtime.destroy(&handle).await {
                Ok(()) => {
                    info!(container = %name, %task_id, "orphan container removed");
                    report.destroyed.push(name);
                }
                Err(e) => {
                    warn!(container = %name, error = %e, "orphan removal failed");
                    report.errors += 1;
                }
            }
        }
        debug!(destroyed = report.destroyed.len(), kept = report.kept.len(), "orphan sweep complete");
        Ok(report)
    }

    /// `Some(true)` if a live job owns the task's containers, `None` if the
    /// store could not say.
    fn owned_elsewhere(&self, task_id: &str, active: &HashSet<TaskId>) -> Option<bool> {
        if active.contains(task_id) {
            return Some(true);
        }
        let task = match self.store.get_task(task_id) {
            Ok(task) => task,
            Err(e) => {
                warn!(%task_id, error = %e, "orphan check could not read task");
                return None;
            }
        };
        if task.is_none_or(|t| t.status != TaskStatus::Running) {
            return Some(false);
        }
        let lease = match self.store.get_lease(task_id) {
            Ok(lease) => lease,
            Err(e) => {
                warn!(%task_id, error = %e, "orphan check could not read lease");
                return None;
            }
        };
        let fresh_after = epoch_millis().saturating_sub(self.stale_after.as_millis() as u64);
        Some(lease.is_some_and(|l| l.worker_id != self.worker_id && l.heartbeat_at > fresh_after))
    }
}
