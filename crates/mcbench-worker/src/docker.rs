//! DockerCli — `ContainerRuntime` that drives the `docker` command line.
//!
//! Every operation is one `docker` invocation through `tokio::process`,
//! with `kill_on_drop` so a timed-out or cancelled call never leaves a
//! stray client process behind. Readiness is detected by polling the
//! container log for the handle's ready marker.

use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;
use tokio::time::Instant;
use tracing::{debug, trace};

use crate::error::{RuntimeError, RuntimeResult};
use crate::runtime::{ContainerHandle, ContainerRuntime, ContainerSpec, ExecOutput, RuntimeFuture};

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(500);

#[derive(Debug, Clone)]
pub struct DockerCli {
    binary: String,
    poll_interval: Duration,
}

impl Default for DockerCli {
    fn default() -> Self {
        Self {
            binary: "docker".to_string(),
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

impl DockerCli {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use a different client binary (e.g. `podman`).
    pub fn with_binary(mut self, binary: impl Into<String>) -> Self {
        self.binary = binary.into();
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    async fn run(&self, args: &[String]) -> RuntimeResult<std::process::Output> {
        trace!(binary = %self.binary, ?args, "docker");
        let output = Command::new(&self.binary)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await?;
        Ok(output)
    }

    /// Run and require a zero exit status.
    async fn run_checked(
        &self,
        op: &'static str,
        target: &str,
        args: &[String],
    ) -> RuntimeResult<std::process::Output> {
        let output = self.run(args).await?;
        if !output.status.success() {
            return Err(RuntimeError::Command {
                op,
                target: target.to_string(),
                detail: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(output)
    }

    async fn is_running(&self, name: &str) -> RuntimeResult<bool> {
        let args = strings(&["inspect", "-f", "{{.State.Running}}", name]);
        let output = self.run_checked("inspect", name, &args).await?;
        Ok(String::from_utf8_lossy(&output.stdout).trim() == "true")
    }

    async fn logs_contain(&self, name: &str, marker: &str) -> RuntimeResult<bool> {
        let args = strings(&["logs", name]);
        let output = self.run_checked("logs", name, &args).await?;
        Ok(String::from_utf8_lossy(&output.stdout).contains(marker)
            || String::from_utf8_lossy(&output.stderr).contains(marker))
    }
}

fn strings(args: &[&str]) -> Vec<String> {
    args.iter().map(|s| s.to_string()).collect()
}

/// `docker create` argv for a spec.
pub fn create_args(spec: &ContainerSpec) -> Vec<String> {
    let mut args = strings(&["create", "--name", &spec.name]);
    for (key, value) in &spec.labels {
        args.push("--label".to_string());
        args.push(format!("{key}={value}"));
    }
    if let Some(network) = &spec.network {
        args.push("--network".to_string());
        args.push(network.clone());
    }
    for (key, value) in &spec.env {
        args.push("-e".to_string());
        args.push(format!("{key}={value}"));
    }
    args.push(spec.image.clone());
    args
}

/// `docker exec` argv for one command.
pub fn exec_args(handle: &ContainerHandle, command: &str) -> Vec<String> {
    let mut args = vec!["exec".to_string(), handle.name.clone()];
    args.extend(handle.exec_prefix.iter().cloned());
    args.push(command.to_string());
    args
}

impl ContainerRuntime for DockerCli {
    fn create<'a>(&'a self, spec: &'a ContainerSpec) -> RuntimeFuture<'a, ContainerHandle> {
        Box::pin(async move {
            self.run_checked("create", &spec.name, &create_args(spec))
                .await?;
            debug!(container = %spec.name, image = %spec.image, role = %spec.role, "container created");
            Ok(ContainerHandle::from_spec(spec))
        })
    }

    fn start<'a>(&'a self, handle: &'a ContainerHandle) -> RuntimeFuture<'a, ()> {
        Box::pin(async move {
            let args = strings(&["start", &handle.name]);
            self.run_checked("start", &handle.name, &args).await?;
            debug!(container = %handle.name, "container started");
            Ok(())
        })
    }

    fn await_ready<'a>(
        &'a self,
        handle: &'a ContainerHandle,
        timeout: Duration,
    ) -> RuntimeFuture<'a, bool> {
        Box::pin(async move {
            let deadline = Instant::now() + timeout;
            loop {
                let ready = match &handle.ready_marker {
                    Some(marker) => self.logs_contain(&handle.name, marker).await?,
                    None => self.is_running(&handle.name).await?,
                };
                if ready {
                    return Ok(true);
                }
                if !self.is_running(&handle.name).await? {
                    return Err(RuntimeError::Command {
                        op: "await_ready",
                        target: handle.name.clone(),
                        detail: "container exited before becoming ready".to_string(),
                    });
                }
                if Instant::now() + self.poll_interval > deadline {
                    return Ok(false);
                }
                tokio::time::sleep(self.poll_interval).await;
            }
        })
    }

    fn exec<'a>(
        &'a self,
        handle: &'a ContainerHandle,
        command: &'a str,
    ) -> RuntimeFuture<'a, ExecOutput> {
        Box::pin(async move {
            let output = self.run(&exec_args(handle, command)).await?;
            Ok(ExecOutput {
                exit_code: output.status.code().unwrap_or(-1),
                stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            })
        })
    }

    fn archive<'a>(
        &'a self,
        handle: &'a ContainerHandle,
        path: &'a str,
    ) -> RuntimeFuture<'a, Vec<u8>> {
        Box::pin(async move {
            let source = format!("{}:{path}", handle.name);
            let args = vec!["cp".to_string(), source, "-".to_string()];
            let output = self.run_checked("archive", &handle.name, &args).await?;
            Ok(output.stdout)
        })
    }

    fn destroy<'a>(&'a self, handle: &'a ContainerHandle) -> RuntimeFuture<'a, ()> {
        Box::pin(async move {
            let args = strings(&["rm", "-f", &handle.name]);
            let output = self.run(&args).await?;
            let stderr = String::from_utf8_lossy(&output.stderr);
            if output.status.success() || stderr.contains("No such container") {
                debug!(container = %handle.name, "container removed");
                return Ok(());
            }
            Err(RuntimeError::Command {
                op: "destroy",
                target: handle.name.clone(),
                detail: stderr.trim().to_string(),
            })
        })
    }

    fn list<'a>(&'a self, prefix: &'a str) -> RuntimeFuture<'a, Vec<String>> {
        Box::pin(async move {
            let filter = format!("name=^{prefix}");
            let args = strings(&["ps", "-a", "--filter", &filter, "--format", "{{.Names}}"]);
            let output = self.run_checked("list", prefix, &args).await?;
            Ok(String::from_utf8_lossy(&output.stdout)
                .lines()
                .map(str::trim)
                .filter(|name| name.starts_with(prefix))
                .map(str::to_string)
                .collect())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::ContainerRole;
    use std::collections::BTreeMap;

    fn builder_spec() -> ContainerSpec {
        ContainerSpec {
            name: "mcbench-build-t1-builder".into(),
            role: ContainerRole::Builder,
            image: "mcbench/builder:latest".into(),
            env: BTreeMap::from([("SERVER_HOST".to_string(), "localhost".to_string())]),
            labels: BTreeMap::from([("mcbench.task".to_string(), "t1".to_string())]),
            network: Some("container:mcbench-build-t1-server".into()),
            ready_marker: None,
            exec_prefix: vec!["send-command".into()],
        }
    }

    #[test]
    fn create_args_carry_name_network_env_and_image() {
        let args = create_args(&builder_spec());
        assert_eq!(&args[..3], &["create", "--name", "mcbench-build-t1-builder"]);
        assert!(args.windows(2).any(|w| w == ["--label", "mcbench.task=t1"]));
        assert!(args
            .windows(2)
            .any(|w| w == ["--network", "container:mcbench-build-t1-server"]));
        assert!(args.windows(2).any(|w| w == ["-e", "SERVER_HOST=localhost"]));
        assert_eq!(args.last().map(String::as_str), Some("mcbench/builder:latest"));
    }

    #[test]
    fn exec_args_prepend_prefix_and_keep_command_whole() {
        let handle = ContainerHandle::from_spec(&builder_spec());
        let args = exec_args(&handle, "/fill 0 64 0 4 64 4 oak_planks");
        assert_eq!(
            args,
            vec![
                "exec",
                "mcbench-build-t1-builder",
                "send-command",
                "/fill 0 64 0 4 64 4 oak_planks"
            ]
        );
    }

    #[tokio::test]
    async fn missing_binary_is_a_spawn_error() {
        let cli = DockerCli::new().with_binary("/nonexistent/docker-client");
        let err = cli.list("mcbench-build-").await.unwrap_err();
        assert!(matches!(err, RuntimeError::Spawn(_)));
    }
}
