//! mcbench-broker — work-queue transport between admission and workers.
//!
//! The scheduler publishes one `DispatchMessage` per admitted task; worker
//! pools claim messages from their queue and ack them once the task reached
//! a terminal status (or nack them to hand the work back).
//!
//! ```text
//!   AdmissionScheduler ──publish──► [ build ][ render ][ prompt ] ...
//!                                        │
//!                          claim / ack / nack
//!                                        ▼
//!                                  worker pools
//! ```

pub mod broker;
pub mod error;
pub mod memory;
pub mod message;

pub use broker::{Broker, BrokerFuture};
pub use error::{BrokerError, BrokerResult};
pub use memory::MemoryBroker;
pub use message::DispatchMessage;
