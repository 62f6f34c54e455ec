//! Fakes for driving the orchestrator without Docker.

#![allow(dead_code)]

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use mcbench_core::{BuildConfig, Task, TaskPayload};
use mcbench_worker::{
    ContainerHandle, ContainerRole, ContainerRuntime, ContainerSpec, ExecOutput, ObjectStore,
    ObjectStoreError, RuntimeError, RuntimeFuture,
};
use mcbench_worker::objects::ObjectFuture;

pub type ExecHook = Box<dyn Fn(usize) + Send + Sync>;

#[derive(Default)]
pub struct FakeState {
    pub live: BTreeSet<String>,
    pub created: Vec<String>,
    pub destroyed: Vec<String>,
    pub execs: Vec<String>,
    pub max_live_servers: usize,
}

/// In-memory container runtime with switchable failures.
#[derive(Default)]
pub struct FakeRuntime {
    pub state: Mutex<FakeState>,
    /// Server never reports ready.
    pub never_ready: bool,
    /// `create` fails for this role and nothing is created.
    pub fail_create: Option<ContainerRole>,
    /// `start` fails for this role; the created container stays behind.
    pub fail_start: Option<ContainerRole>,
    /// Zero-based exec index that exits non-zero.
    pub fail_exec_at: Option<usize>,
    /// Zero-based exec index that never returns.
    pub hang_exec_at: Option<usize>,
    /// Simulated time each exec takes.
    pub exec_latency: Duration,
    /// Called with the number of execs completed so far.
    pub on_exec: Option<ExecHook>,
    pub exec_count: AtomicUsize,
}

impl FakeRuntime {
    pub fn live(&self) -> BTreeSet<String> {
        self.state.lock().unwrap().live.clone()
    }

    pub fn created(&self) -> Vec<String> {
        self.state.lock().unwrap().created.clone()
    }

    pub fn destroyed(&self) -> Vec<String> {
        self.state.lock().unwrap().destroyed.clone()
    }

    pub fn execs(&self) -> Vec<String> {
        self.state.lock().unwrap().execs.clone()
    }

    /// Pretend a container already exists (left by an earlier process).
    pub fn preload(&self, name: &str) {
        self.state.lock().unwrap().live.insert(name.to_string());
    }

    fn live_servers(state: &FakeState) -> usize {
        state.live.iter().filter(|n| n.ends_with("-server")).count()
    }
}

impl ContainerRuntime for FakeRuntime {
    fn create<'a>(&'a self, spec: &'a ContainerSpec) -> RuntimeFuture<'a, ContainerHandle> {
        Box::pin(async move {
            let mut state = self.state.lock().unwrap();
            if state.live.contains(&spec.name) {
                return Err(RuntimeError::Command {
                    op: "create",
                    target: spec.name.clone(),
                    detail: format!("Conflict. The container name \"/{}\" is already in use", spec.name),
                });
            }
            if self.fail_create == Some(spec.role) {
                return Err(RuntimeError::Command {
                    op: "create",
                    target: spec.name.clone(),
                    detail: "No such image".to_string(),
                });
            }
            state.created.push(spec.name.clone());
            state.live.insert(spec.name.clone());
            state.max_live_servers = state.max_live_servers.max(Self::live_servers(&state));
            Ok(ContainerHandle::from_spec(spec))
        })
    }

    fn start<'a>(&'a self, handle: &'a ContainerHandle) -> RuntimeFuture<'a, ()> {
        Box::pin(async move {
            if self.fail_start == Some(handle.role) {
                return Err(RuntimeError::Command {
                    op: "start",
                    target: handle.name.clone(),
                    detail: "port is already allocated".to_string(),
                });
            }
            Ok(())
        })
    }

    fn await_ready<'a>(
        &'a self,
        _handle: &'a ContainerHandle,
        timeout: Duration,
    ) -> RuntimeFuture<'a, bool> {
        Box::pin(async move {
            if self.never_ready {
                tokio::time::sleep(timeout).await;
                return Ok(false);
            }
            Ok(true)
        })
    }

    fn exec<'a>(
        &'a self,
        _handle: &'a ContainerHandle,
        command: &'a str,
    ) -> RuntimeFuture<'a, ExecOutput> {
        Box::pin(async move {
            let index = self.exec_count.fetch_add(1, Ordering::SeqCst);
            if self.hang_exec_at == Some(index) {
                std::future::pending::<()>().await;
            }
            if !self.exec_latency.is_zero() {
                tokio::time::sleep(self.exec_latency).await;
            }
            self.state.lock().unwrap().execs.push(command.to_string());
            if let Some(hook) = &self.on_exec {
                hook(index + 1);
            }
            if self.fail_exec_at == Some(index) {
                return Ok(ExecOutput {
                    exit_code: 1,
                    stdout: String::new(),
                    stderr: format!("Unknown or incomplete command: {command}"),
                });
            }
            Ok(ExecOutput::ok("ok"))
        })
    }

    fn archive<'a>(
        &'a self,
        handle: &'a ContainerHandle,
        path: &'a str,
    ) -> RuntimeFuture<'a, Vec<u8>> {
        Box::pin(async move {
            let execs = self.state.lock().unwrap().execs.len();
            Ok(format!("{}:{path}@{execs}", handle.name).into_bytes())
        })
    }

    fn destroy<'a>(&'a self, handle: &'a ContainerHandle) -> RuntimeFuture<'a, ()> {
        Box::pin(async move {
            let mut state = self.state.lock().unwrap();
            state.live.remove(&handle.name);
            state.destroyed.push(handle.name.clone());
            Ok(())
        })
    }

    fn list<'a>(&'a self, prefix: &'a str) -> RuntimeFuture<'a, Vec<String>> {
        Box::pin(async move {
            Ok(self
                .state
                .lock()
                .unwrap()
                .live
                .iter()
                .filter(|n| n.starts_with(prefix))
                .cloned()
                .collect())
        })
    }
}

/// Object store that rejects, or never answers, the puts whose
/// (zero-based) sequence number is listed.
#[derive(Default)]
pub struct FlakyObjects {
    pub fail_puts: Vec<usize>,
    pub hang_puts: Vec<usize>,
    pub puts: AtomicUsize,
    pub stored: Mutex<Vec<String>>,
}

impl ObjectStore for FlakyObjects {
    fn put<'a>(&'a self, key: &'a str, _bytes: Vec<u8>) -> ObjectFuture<'a, ()> {
        Box::pin(async move {
            let seq = self.puts.fetch_add(1, Ordering::SeqCst);
            if self.hang_puts.contains(&seq) {
                std::future::pending::<()>().await;
            }
            if self.fail_puts.contains(&seq) {
                return Err(ObjectStoreError::Unavailable("503 slow down".to_string()));
            }
            self.stored.lock().unwrap().push(key.to_string());
            Ok(())
        })
    }
}

pub fn build_task(id: &str, commands: usize) -> Task {
    Task::new(
        id,
        TaskPayload::Build {
            run_id: "run-1".to_string(),
            structure_name: "lighthouse".to_string(),
            commands: (0..commands)
                .map(|i| format!("/setblock {i} 64 0 stone"))
                .collect(),
        },
    )
}

pub fn fast_config() -> BuildConfig {
    BuildConfig {
        command_delay_ms: 0,
        log_interval_commands: 5,
        export_enabled: false,
        export_interval_percent: 50,
        server_ready_timeout_secs: 2,
        command_timeout_secs: 5,
        export_timeout_secs: 3,
        build_timeout_secs: 60,
        no_cleanup: false,
        ..BuildConfig::default()
    }
}

pub fn shared(runtime: FakeRuntime) -> Arc<FakeRuntime> {
    Arc::new(runtime)
}
