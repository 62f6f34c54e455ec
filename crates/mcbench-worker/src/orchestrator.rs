//! BuildOrchestrator — runs one build task to a terminal outcome.
//!
//! # Sequence
//!
//! ```text
//!   provision server ─► await ready ─► provision builder
//!        │                                   │
//!        │       ┌───────────────────────────┘
//!        │       ▼
//!        │   for each command:  delay ─► cancel check ─► exec
//!        │                      every N      ─► checkpoint + heartbeat
//!        │                      export due   ─► snapshot upload
//!        ▼
//!   final export (if enabled and not yet taken) ─► teardown
//! ```
//!
//! The whole drive is bounded by the build timeout and every export by the
//! export timeout. Teardown runs on every path through `BuildJob::teardown`;
//! the job's `Drop` covers the rest.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use mcbench_core::{BuildConfig, Task, TaskPayload, WorkerId};
use mcbench_state::TaskStore;

use crate::error::BuildError;
use crate::job::{BuildJob, TeardownReport};
use crate::objects::{ObjectStore, final_key, snapshot_key};
use crate::plan::{CheckpointPolicy, ExportPlan};
use crate::progress::ProgressReporter;
use crate::runtime::{ContainerRole, ContainerRuntime, ContainerSpec, container_name};

/// Log line the game server prints once it accepts connections.
pub const SERVER_READY_MARKER: &str = "Done (";

/// Directory archived for structure snapshots.
pub const WORLD_PATH: &str = "/data/world";

/// Stats of a build that ran to the end of its command sequence.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuildSummary {
    pub commands_run: usize,
    pub checkpoints: usize,
    pub exports: usize,
}

/// Everything a build attempt produced.
#[derive(Debug)]
pub struct BuildOutcome {
    pub result: Result<BuildSummary, BuildError>,
    /// Object keys uploaded, including on failed attempts.
    pub artifacts: Vec<String>,
    pub commands_run: usize,
    pub checkpoints: usize,
    pub teardown: TeardownReport,
}

/// Mutable per-attempt bookkeeping shared between the drive and the
/// failure path.
#[derive(Default)]
struct Progress {
    artifacts: Vec<String>,
    checkpoints: usize,
}

pub struct BuildOrchestrator {
    runtime: Arc<dyn ContainerRuntime>,
    objects: Arc<dyn ObjectStore>,
    store: Arc<dyn TaskStore>,
    config: BuildConfig,
    worker_id: WorkerId,
}

impl BuildOrchestrator {
    pub fn new(
        runtime: Arc<dyn ContainerRuntime>,
        objects: Arc<dyn ObjectStore>,
        store: Arc<dyn TaskStore>,
        config: BuildConfig,
        worker_id: impl Into<WorkerId>,
    ) -> Self {
        Self {
            runtime,
            objects,
            store,
            config,
            worker_id: worker_id.into(),
        }
    }

    pub fn config(&self) -> &BuildConfig {
        &self.config
    }

    pub fn runtime(&self) -> &Arc<dyn ContainerRuntime> {
        &self.runtime
    }

    pub fn server_spec(&self, task: &Task) -> ContainerSpec {
        ContainerSpec {
            name: container_name(&task.id, ContainerRole::Server),
            role: ContainerRole::Server,
            image: self.config.server_image.clone(),
            env: BTreeMap::from([("EULA".to_string(), "TRUE".to_string())]),
            labels: task_labels(task, ContainerRole::Server),
            network: None,
            ready_marker: Some(SERVER_READY_MARKER.to_string()),
            exec_prefix: vec!["rcon-cli".to_string()],
        }
    }

    pub fn builder_spec(&self, task: &Task) -> ContainerSpec {
        let server = container_name(&task.id, ContainerRole::Server);
        ContainerSpec {
            name: container_name(&task.id, ContainerRole::Builder),
            role: ContainerRole::Builder,
            image: self.config.builder_image.clone(),
            env: BTreeMap::from([
                ("SERVER_HOST".to_string(), "localhost".to_string()),
                ("TASK_ID".to_string(), task.id.clone()),
            ]),
            labels: task_labels(task, ContainerRole::Builder),
            network: Some(format!("container:{server}")),
            ready_marker: None,
            exec_prefix: vec!["send-command".to_string()],
        }
    }

    /// Run one attempt of a build task. Never returns before teardown.
    pub async fn run(&self, task: &Task) -> BuildOutcome {
        let mut job = BuildJob::new(task.id.clone(), self.runtime.clone(), self.config.no_cleanup);
        let reporter = ProgressReporter::new(self.store.clone(), task.id.clone(), self.worker_id.clone());
        let mut progress = Progress::default();

        let after = self.config.build_timeout();
        let timed =
            tokio::time::timeout(after, self.drive(task, &mut job, &reporter, &mut progress))
                .await;
        let result = match timed {
            Ok(result) => result,
            Err(_) => {
                warn!(task_id = %task.id, cursor = job.cursor(), ?after, "build timed out");
                Err(BuildError::Timeout { after })
            }
        };

        if let Err(e) = &result {
            self.capture_on_failure(task, &mut job, &mut progress, e).await;
            info!(task_id = %task.id, cursor = job.cursor(), error = %e, "build stopped");
        }

        reporter.report("teardown", 1.0, None).await;
        let commands_run = job.cursor();
        let teardown = job.teardown().await;
        BuildOutcome {
            result,
            artifacts: progress.artifacts,
            commands_run,
            checkpoints: progress.checkpoints,
            teardown,
        }
    }

    async fn drive(
        &self,
        task: &Task,
        job: &mut BuildJob,
        reporter: &ProgressReporter,
        progress: &mut Progress,
    ) -> Result<BuildSummary, BuildError> {
        let TaskPayload::Build { commands, structure_name, .. } = &task.payload else {
            return Err(BuildError::InvalidPayload(task.payload.kind().to_string()));
        };
        let total = commands.len();

        // ── Server ──
        info!(task_id = %task.id, structure = %structure_name, commands = total, "provisioning server");
        reporter.report("provisioning", 0.0, None).await;
        let server = job
            .provision(&self.server_spec(task))
            .await
            .map_err(|e| BuildError::Provision(e.to_string()))?;

        let ready_timeout = self.config.server_ready_timeout();
        info!(task_id = %task.id, container = %server.name, timeout = ?ready_timeout, "waiting for server");
        let ready = tokio::time::timeout(ready_timeout, self.runtime.await_ready(&server, ready_timeout)).await;
        match ready {
            Ok(Ok(true)) => {}
            Ok(Ok(false)) | Err(_) => {
                warn!(task_id = %task.id, timeout = ?ready_timeout, "server never became ready");
                return Err(BuildError::ReadinessTimeout {
                    after: ready_timeout,
                });
            }
            Ok(Err(e)) => return Err(BuildError::Provision(e.to_string())),
        }
        reporter.heartbeat().await;

        // ── Builder ──
        info!(task_id = %task.id, "provisioning builder");
        let builder = job
            .provision(&self.builder_spec(task))
            .await
            .map_err(|e| BuildError::Provision(e.to_string()))?;

        // ── Commands ──
        info!(task_id = %task.id, commands = total, "streaming commands");
        reporter.report("building", 0.0, None).await;
        let checkpoints = CheckpointPolicy::every(self.config.log_interval_commands);
        let plan = ExportPlan::new(
            total,
            self.config.export_interval_percent,
            self.config.export_enabled,
        );
        let delay = self.config.command_delay();
        let command_timeout = self.config.command_timeout();

        for (index, command) in commands.iter().enumerate() {
            if index > 0 && !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            if self.cancel_requested(&task.id) {
                info!(task_id = %task.id, cursor = job.cursor(), "cancellation requested");
                return Err(BuildError::Cancelled);
            }

            let output = match tokio::time::timeout(command_timeout, self.runtime.exec(&builder, command)).await {
                Ok(Ok(output)) => output,
                Ok(Err(e)) => return Err(BuildError::Runtime(e.to_string())),
                Err(_) => {
                    return Err(BuildError::Command {
                        index,
                        command: command.clone(),
                        detail: format!("no response after {command_timeout:?}"),
                    });
                }
            };
            if !output.success() {
                return Err(BuildError::Command {
                    index,
                    command: command.clone(),
                    detail: output.detail(),
                });
            }

            let cursor = job.advance();
            if checkpoints.is_due(cursor) {
                progress.checkpoints += 1;
                info!(task_id = %task.id, cursor, total, "build checkpoint");
                reporter.heartbeat().await;
                reporter
                    .report("building", cursor as f64 / total as f64, Some(format!("{cursor}/{total} commands")))
                    .await;
            }
            if plan.is_due(cursor) {
                let is_final = plan.is_final(cursor);
                if let Err(e) = self.export_bounded(task, job, progress, is_final).await {
                    if is_final {
                        return Err(e);
                    }
                    warn!(task_id = %task.id, cursor, error = %e, "snapshot export failed, continuing");
                }
            }
        }

        if total == 0 && plan.is_due(0) {
            self.export_bounded(task, job, progress, true).await?;
        }

        info!(task_id = %task.id, commands = total, exports = job.exports(), "build complete");
        Ok(BuildSummary {
            commands_run: job.cursor(),
            checkpoints: progress.checkpoints,
            exports: job.exports(),
        })
    }

    /// `export` under the export timeout. Expiry is an export failure.
    async fn export_bounded(
        &self,
        task: &Task,
        job: &mut BuildJob,
        progress: &mut Progress,
        is_final: bool,
    ) -> Result<(), BuildError> {
        let after = self.config.export_timeout();
        match tokio::time::timeout(after, self.export(task, job, progress, is_final)).await {
            Ok(result) => result,
            Err(_) => Err(BuildError::Export(format!("no response after {after:?}"))),
        }
    }

    /// Archive the world from the server and upload it.
    async fn export(
        &self,
        task: &Task,
        job: &mut BuildJob,
        progress: &mut Progress,
        is_final: bool,
    ) -> Result<(), BuildError> {
        let server = job
            .server()
            .cloned()
            .ok_or_else(|| BuildError::Export("no server container".to_string()))?;
        let cursor = job.cursor();
        let key = if is_final {
            final_key(&task.id)
        } else {
            snapshot_key(&task.id, job.exports() + 1, cursor)
        };

        let bytes = self
            .runtime
            .archive(&server, WORLD_PATH)
            .await
            .map_err(|e| BuildError::Export(e.to_string()))?;
        let size = bytes.len();
        self.objects
            .put(&key, bytes)
            .await
            .map_err(|e| BuildError::Export(e.to_string()))?;

        let seq = job.record_export(is_final);
        info!(task_id = %task.id, %key, seq, cursor, bytes = size, is_final, "snapshot exported");
        progress.artifacts.push(key);
        Ok(())
    }

    /// Best-effort final snapshot of a build that stopped early.
    async fn capture_on_failure(
        &self,
        task: &Task,
        job: &mut BuildJob,
        progress: &mut Progress,
        error: &BuildError,
    ) {
        let stopped_mid_stream = matches!(
            error,
            BuildError::Command { .. } | BuildError::Timeout { .. } | BuildError::Cancelled
        );
        if !self.config.export_enabled || !stopped_mid_stream || job.cursor() == 0 || job.final_exported() {
            return;
        }
        if let Err(e) = self.export_bounded(task, job, progress, true).await {
            warn!(task_id = %task.id, error = %e, "final export after failure failed");
        }
    }

    fn cancel_requested(&self, task_id: &str) -> bool {
        match self.store.get_task(task_id) {
            Ok(Some(task)) => task.cancel_requested,
            Ok(None) => false,
            Err(e) => {
                debug!(%task_id, error = %e, "cancellation check failed");
                false
            }
        }
    }
}

fn task_labels(task: &Task, role: ContainerRole) -> BTreeMap<String, String> {
    BTreeMap::from([
        ("mcbench.task".to_string(), task.id.clone()),
        ("mcbench.role".to_string(), role.to_string()),
        ("mcbench.attempt".to_string(), task.attempts.to_string()),
    ])
}
