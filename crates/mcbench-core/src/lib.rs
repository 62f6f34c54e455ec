//! mcbench-core — shared data model for the MC-Bench work pipeline.
//!
//! Tasks flow from the task store through the admission scheduler and the
//! broker to the worker pools. This crate holds what all of them agree on:
//!
//! - **`types`** — `Task`, `TaskStatus` state machine, tagged `TaskPayload`,
//!   failure and progress records, `WorkerLease`
//! - **`order`** — FIFO / priority-FIFO ordering policy and comparator
//! - **`config`** — environment and TOML configuration surface

pub mod config;
pub mod error;
pub mod order;
pub mod types;

pub use config::{BuildConfig, QueueLimits, ReconcileConfig, SchedulerConfig, Settings, WorkerConfig};
pub use error::ConfigError;
pub use order::OrderingPolicy;
pub use types::*;
