//! Shared types, call context and the crate-wide error definitions.
//!
//! ## Submodules
//!
//! - [`context`] - Per-call context built once at the transport boundary.
//! - [`error`] - The tagged-union [`Error`] returned by every operation.
//! - [`types`] - Records, templates, payloads and status projections.

pub mod context;
pub mod error;
pub mod types;

pub use context::{CallContext, SecurityContext, header};
pub use error::{Error, ErrorKind, Result};
pub use types::*;
