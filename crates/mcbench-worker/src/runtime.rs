//! Container runtime seam.
//!
//! The orchestrator only ever talks to containers through this trait, so a
//! fake runtime can stand in for Docker in tests. Container names are the
//! handle: they are derived from the task id, which keeps concurrent
//! BuildJobs on one host from colliding and lets the orphan sweep find
//! leftovers after a crash.

use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use crate::error::RuntimeResult;

/// Boxed future alias for runtime operations.
pub type RuntimeFuture<'a, T> = Pin<Box<dyn Future<Output = RuntimeResult<T>> + Send + 'a>>;

/// Prefix shared by every container a BuildJob creates.
pub const CONTAINER_PREFIX: &str = "mcbench-build-";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContainerRole {
    Server,
    Builder,
}

impl ContainerRole {
    pub fn as_str(self) -> &'static str {
        match self {
            ContainerRole::Server => "server",
            ContainerRole::Builder => "builder",
        }
    }
}

impl fmt::Display for ContainerRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// `mcbench-build-<task_id>-<role>`
pub fn container_name(task_id: &str, role: ContainerRole) -> String {
    format!("{CONTAINER_PREFIX}{task_id}-{role}")
}

/// Inverse of [`container_name`]. Returns `None` for foreign containers.
pub fn parse_container_name(name: &str) -> Option<(String, ContainerRole)> {
    let rest = name.strip_prefix(CONTAINER_PREFIX)?;
    let (task_id, role) = rest.rsplit_once('-')?;
    let role = match role {
        "server" => ContainerRole::Server,
        "builder" => ContainerRole::Builder,
        _ => return None,
    };
    if task_id.is_empty() {
        return None;
    }
    Some((task_id.to_string(), role))
}

/// Everything needed to start one container.
#[derive(Debug, Clone, PartialEq)]
pub struct ContainerSpec {
    pub name: String,
    pub role: ContainerRole,
    pub image: String,
    pub env: BTreeMap<String, String>,
    pub labels: BTreeMap<String, String>,
    /// Network mode, e.g. `container:<server>` to share the server's
    /// network namespace.
    pub network: Option<String>,
    /// Log line that signals readiness.
    pub ready_marker: Option<String>,
    /// argv prepended to every `exec` command.
    pub exec_prefix: Vec<String>,
}

/// Reference to a container created for a BuildJob.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ContainerHandle {
    pub name: String,
    pub role: ContainerRole,
    pub ready_marker: Option<String>,
    pub exec_prefix: Vec<String>,
}

impl ContainerHandle {
    pub fn from_spec(spec: &ContainerSpec) -> Self {
        Self {
            name: spec.name.clone(),
            role: spec.role,
            ready_marker: spec.ready_marker.clone(),
            exec_prefix: spec.exec_prefix.clone(),
        }
    }

    /// Handle for a container found by name (orphan sweep).
    pub fn named(name: impl Into<String>, role: ContainerRole) -> Self {
        Self {
            name: name.into(),
            role,
            ready_marker: None,
            exec_prefix: Vec::new(),
        }
    }
}

/// Result of one `exec`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExecOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl ExecOutput {
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            exit_code: 0,
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Best error text: stderr, else stdout, else the exit code.
    pub fn detail(&self) -> String {
        let stderr = self.stderr.trim();
        if !stderr.is_empty() {
            return stderr.to_string();
        }
        let stdout = self.stdout.trim();
        if !stdout.is_empty() {
            return stdout.to_string();
        }
        format!("exit code {}", self.exit_code)
    }
}

/// Container lifecycle operations used by the build orchestrator.
pub trait ContainerRuntime: Send + Sync {
    /// Create a container without starting it. On error nothing was
    /// created; a name already in use is an error.
    fn create<'a>(&'a self, spec: &'a ContainerSpec) -> RuntimeFuture<'a, ContainerHandle>;

    /// Start a created container.
    fn start<'a>(&'a self, handle: &'a ContainerHandle) -> RuntimeFuture<'a, ()>;

    /// Wait until the container reports ready. `Ok(false)` when `timeout`
    /// elapsed first.
    fn await_ready<'a>(
        &'a self,
        handle: &'a ContainerHandle,
        timeout: Duration,
    ) -> RuntimeFuture<'a, bool>;

    /// Run one command inside the container and wait for it to finish.
    fn exec<'a>(
        &'a self,
        handle: &'a ContainerHandle,
        command: &'a str,
    ) -> RuntimeFuture<'a, ExecOutput>;

    /// Copy `path` out of the container as a tar archive.
    fn archive<'a>(
        &'a self,
        handle: &'a ContainerHandle,
        path: &'a str,
    ) -> RuntimeFuture<'a, Vec<u8>>;

    /// Stop and remove the container. Removing a missing container is not
    /// an error.
    fn destroy<'a>(&'a self, handle: &'a ContainerHandle) -> RuntimeFuture<'a, ()>;

    /// Names of all containers (running or not) whose name starts with
    /// `prefix`.
    fn list<'a>(&'a self, prefix: &'a str) -> RuntimeFuture<'a, Vec<String>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_round_trip_through_parser() {
        let name = container_name("task-42", ContainerRole::Builder);
        assert_eq!(name, "mcbench-build-task-42-builder");
        assert_eq!(
            parse_container_name(&name),
            Some(("task-42".to_string(), ContainerRole::Builder))
        );
    }

    #[test]
    fn foreign_names_are_ignored() {
        assert_eq!(parse_container_name("postgres"), None);
        assert_eq!(parse_container_name("mcbench-build-x-sidecar"), None);
        assert_eq!(parse_container_name("mcbench-build--server"), None);
    }

    #[test]
    fn exec_detail_prefers_stderr() {
        let out = ExecOutput {
            exit_code: 1,
            stdout: "partial".into(),
            stderr: "Unknown command\n".into(),
        };
        assert_eq!(out.detail(), "Unknown command");
        assert_eq!(
            ExecOutput {
                exit_code: 2,
                ..Default::default()
            }
            .detail(),
            "exit code 2"
        );
    }
}
