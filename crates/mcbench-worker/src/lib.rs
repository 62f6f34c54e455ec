//! mcbench-worker — the worker pools of the MC-Bench pipeline.
//!
//! # Architecture
//!
//! ```text
//!   Broker ──claim──► BuildWorker ──► BuildOrchestrator ──► ContainerRuntime
//!      ▲                  │  (local slot gate)   │              (DockerCli)
//!      │                  │                      ├──► ObjectStore (snapshots)
//!      └──────ack─────────┤                      └──► TaskStore (progress, heartbeat)
//!                         ▼
//!                     Lifecycle ──claim / complete / retry──► TaskStore
//!
//!   Broker ──claim──► GenericWorker ──► TaskHandler
//! ```
//!
//! Every BuildJob owns a server/builder container pair named after its task
//! and tears it down on every exit path. `OrphanSweep` removes pairs left
//! behind by a worker that died mid-build.

pub mod build_worker;
pub mod docker;
pub mod error;
pub mod generic;
pub mod job;
pub mod lifecycle;
pub mod objects;
pub mod orchestrator;
pub mod plan;
mod pool;
pub mod progress;
pub mod runtime;
pub mod sweep;

pub use build_worker::BuildWorker;
pub use docker::DockerCli;
pub use error::{BuildError, ObjectStoreError, RuntimeError, RuntimeResult};
pub use generic::{GenericWorker, HandlerError, HandlerFuture, TaskHandler};
pub use job::{BuildJob, TeardownReport};
pub use lifecycle::{Lifecycle, Settled, TaskOutcome};
pub use objects::{LocalObjectStore, MemoryObjectStore, ObjectStore};
pub use orchestrator::{BuildOrchestrator, BuildOutcome, BuildSummary};
pub use plan::{CheckpointPolicy, ExportPlan};
pub use progress::{Backoff, ProgressReporter};
pub use runtime::{
    ContainerHandle, ContainerRole, ContainerRuntime, ContainerSpec, ExecOutput, RuntimeFuture,
    container_name,
};
pub use sweep::{OrphanSweep, SweepReport};
