//! mcbench-scheduler — admission control for the MC-Bench work pipeline.
//!
//! # Architecture
//!
//! ```text
//!              ┌──────────────────────┐
//!   tick ────► │  AdmissionScheduler  │──publish──► Broker
//!              │  (SchedulerState)    │
//!              └──────────┬───────────┘
//!                         │ count_in_flight / fetch_pending / transition
//!                         ▼
//!                     TaskStore ◄──list_stale / retry── Reconciler
//! ```
//!
//! The pending → dispatched transition is the only synchronization point
//! between scheduler replicas. Failures the scheduler cannot compensate for
//! are raised on the operator alert channel.

pub mod admission;
pub mod alert;
pub mod error;
pub mod reconcile;
pub mod runner;
pub mod state;

pub use admission::AdmissionScheduler;
pub use alert::{AlertKind, AlertSink, OperatorAlert, alert_channel};
pub use error::{SchedulerError, SchedulerResult};
pub use reconcile::{ReconcileReport, Reconciler};
pub use runner::{run_admission_loop, run_reconcile_loop};
pub use state::{QueueReport, SchedulerState, TickReport};
