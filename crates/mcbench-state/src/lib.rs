//! mcbench-state — durable task store for the MC-Bench pipeline.
//!
//! Backed by [redb](https://docs.rs/redb), provides persistent and in-memory
//! storage for tasks and worker leases.
//!
//! # Architecture
//!
//! ```text
//!   scheduler ──fetch_pending / transition──┐
//!                                           ▼
//!   workers ───claim / heartbeat / complete──► TaskStore ──► redb (tasks, leases)
//!                                           ▲
//!   reconciler ──list_stale / retry─────────┘
//! ```
//!
//! `TaskStore` is the seam; `StateStore` is the embedded implementation.
//! It is `Clone` + `Send` + `Sync` (backed by `Arc<Database>`) and can be
//! shared across async tasks.

pub mod embedded;
pub mod error;
pub mod store;
pub mod tables;

pub use embedded::StateStore;
pub use error::{StateError, StateResult};
pub use store::{CancelOutcome, Completion, RetryOutcome, TaskFilter, TaskStore};
