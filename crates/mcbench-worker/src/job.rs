//! BuildJob — scoped ownership of one build's container pair.
//!
//! A handle is recorded as soon as its container exists and before it is
//! started, so a container whose start failed is still torn down. A failed
//! create records nothing: the name may belong to someone else's container.
//! `teardown` is the normal exit;
//! if a job is dropped without it (panic, aborted future), `Drop` hands the
//! containers to a background task that removes them.

use std::sync::Arc;

use tracing::{error, info, warn};

use mcbench_core::TaskId;

use crate::error::RuntimeError;
use crate::runtime::{ContainerHandle, ContainerRole, ContainerRuntime, ContainerSpec};

/// What teardown did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TeardownReport {
    pub destroyed: Vec<String>,
    pub failed: Vec<String>,
    /// Teardown skipped by the no-cleanup override.
    pub suppressed: bool,
}

pub struct BuildJob {
    task_id: TaskId,
    runtime: Arc<dyn ContainerRuntime>,
    server: Option<ContainerHandle>,
    builder: Option<ContainerHandle>,
    cursor: usize,
    exports: usize,
    final_exported: bool,
    no_cleanup: bool,
    released: bool,
}

impl BuildJob {
    pub fn new(task_id: impl Into<TaskId>, runtime: Arc<dyn ContainerRuntime>, no_cleanup: bool) -> Self {
        Self {
            task_id: task_id.into(),
            runtime,
            server: None,
            builder: None,
            cursor: 0,
            exports: 0,
            final_exported: false,
            no_cleanup,
            released: false,
        }
    }

    pub fn task_id(&self) -> &str {
        &self.task_id
    }

    pub async fn provision(&mut self, spec: &ContainerSpec) -> Result<ContainerHandle, RuntimeError> {
        let handle = self.runtime.create(spec).await?;
        let slot = match spec.role {
            ContainerRole::Server => &mut self.server,
            ContainerRole::Builder => &mut self.builder,
        };
        *slot = Some(handle.clone());
        self.runtime.start(&handle).await?;
        Ok(handle)
    }

    pub fn server(&self) -> Option<&ContainerHandle> {
        self.server.as_ref()
    }

    pub fn builder(&self) -> Option<&ContainerHandle> {
        self.builder.as_ref()
    }

    /// Commands completed so far.
    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn advance(&mut self) -> usize {
        self.cursor += 1;
        self.cursor
    }

    /// Snapshots uploaded so far.
    pub fn exports(&self) -> usize {
        self.exports
    }

    /// Count an upload and return its sequence number (1-based).
    pub fn record_export(&mut self, is_final: bool) -> usize {
        self.exports += 1;
        self.final_exported |= is_final;
        self.exports
    }

    pub fn final_exported(&self) -> bool {
        self.final_exported
    }

    fn take_handles(&mut self) -> Vec<ContainerHandle> {
        // Builder first: it holds the server's network namespace.
        self.builder.take().into_iter().chain(self.server.take()).collect()
    }

    /// Destroy both containers unless cleanup is suppressed.
    pub async fn teardown(mut self) -> TeardownReport {
        self.released = true;
        let mut report = TeardownReport::default();
        let handles = self.take_handles();

        if self.no_cleanup {
            if !handles.is_empty() {
                let names: Vec<_> = handles.iter().map(|h| h.name.as_str()).collect();
                warn!(task_id = %self.task_id, containers = ?names, "teardown suppressed, containers left running");
            }
            report.suppressed = true;
            return report;
        }

        for handle in handles {
            match self.runtime.destroy(&handle).await {
                Ok(()) => report.destroyed.push(handle.name),
                Err(e) => {
                    error!(task_id = %self.task_id, container = %handle.name, error = %e, "teardown failed");
                    report.failed.push(handle.name);
                }
            }
        }
        info!(task_id = %self.task_id, destroyed = report.destroyed.len(), failed = report.failed.len(), "build job torn down");
        report
    }
}

impl Drop for BuildJob {
    fn drop(&mut self) {
        if self.released || self.no_cleanup {
            return;
        }
        let handles = self.take_handles();
        if handles.is_empty() {
            return;
        }
        let Ok(rt) = tokio::runtime::Handle::try_current() else {
            error!(task_id = %self.task_id, "build job dropped outside a runtime, containers leaked until the next sweep");
            return;
        };
        warn!(task_id = %self.task_id, "build job dropped without teardown, destroying in background");
        let runtime = self.runtime.clone();
        let task_id = self.task_id.clone();
        rt.spawn(async move {
            for handle in handles {
                if let Err(e) = runtime.destroy(&handle).await {
                    error!(%task_id, container = %handle.name, error = %e, "background teardown failed");
                }
            }
        });
    }
}
