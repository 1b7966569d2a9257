//! Server-side components of the `excerpt-server` binary.
//!
//! ## Submodules
//!
//! - [`config`] - CLI and environment configuration.
//! - [`http`] - routes, header extraction and error rendering.
//! - [`telemetry`] - log subscriber and optional OpenTelemetry export.
//!
//! These are wired together in `main.rs`.

pub mod config;
pub mod http;
pub mod telemetry;
