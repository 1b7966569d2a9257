//! Outbox worker pool.
//!
//! Accepted generation events are queued on one of several workers in
//! round-robin order. Each worker publishes its queue sequentially, bounding
//! every attempt with the publish timeout. A failed or timed-out attempt
//! triggers compensation: a conditional transition of the record to `FAILED`
//! that never overwrites a terminal state.
//!
//! ## Structure
//!
//! - [`request`] - messages accepted by a worker.
//! - [`manager`] - [`OutboxPool`], dispatch and coordinated shutdown.
//! - [`worker`] - the per-worker loop, publish attempt and compensation.

pub mod manager;
pub mod request;
pub mod worker;

pub use manager::{OutboxPool, OutboxSlot};
pub use request::{OutboxEntry, OutboxRequest};
pub use worker::{OutboxWorker, PUBLISH_FAILURE_DETAILS, compensate};
