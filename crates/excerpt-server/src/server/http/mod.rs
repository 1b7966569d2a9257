//! HTTP boundary of the excerpt service.
//!
//! ## Routes
//!
//! | Method | Path                     | Operation                       |
//! |--------|--------------------------|---------------------------------|
//! | POST   | `/excerpts`              | request a new excerpt           |
//! | GET    | `/excerpts/{id}`         | download a finished excerpt     |
//! | GET    | `/excerpts/{id}/status`  | read an excerpt's status        |
//! | GET    | `/health`                | liveness, `DOWN` once draining  |
//!
//! ## Structure
//!
//! - [`error`] - the `ErrorKind` to status-code table and error bodies.
//! - [`extract`] - header extraction and call-context resolution.
//! - [`handler`] - one handler per route.

pub mod error;
pub mod extract;
pub mod handler;

use axum::{
    Router,
    routing::{get, post},
};
use excerpt_core::ExcerptService;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

#[derive(Clone)]
pub struct AppState {
    pub service: ExcerptService,
}

pub fn router(service: ExcerptService) -> Router {
    Router::new()
        .route("/excerpts", post(handler::create))
        .route("/excerpts/{id}", get(handler::retrieve))
        .route("/excerpts/{id}/status", get(handler::status))
        .route("/health", get(handler::health))
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(AppState { service })
}
