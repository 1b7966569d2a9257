//! Route handlers.
//!
//! Each handler resolves the [`CallContext`](excerpt_core::CallContext) from
//! the request headers, calls one service operation and renders the result.
//! Failures are rendered by [`ApiError`].

use super::{
    AppState,
    error::{ApiError, CLIENT_ERROR},
    extract,
};
use crate::server::telemetry::{increment_errors, increment_requests, record_request_duration};
use axum::{
    Json,
    extract::{Path, State, rejection::JsonRejection},
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use excerpt_core::{
    Artifact, ExcerptCreated, ExcerptRequest, StatusReport,
    audit::{AuditScope, Operation},
};
use serde_json::json;
use std::time::Instant;

/// Counts and times one handler call under `operation`'s method name.
async fn observe<T>(
    operation: Operation,
    call: impl Future<Output = Result<T, ApiError>>,
) -> Result<T, ApiError> {
    let name = operation.method();
    increment_requests(name);
    let start = Instant::now();
    let result = call.await;
    record_request_duration(name, start.elapsed().as_secs_f64() * 1_000.0);
    if let Err(e) = &result {
        increment_errors(name, e.code());
    }
    result
}

pub async fn create(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Result<Json<ExcerptRequest>, JsonRejection>,
) -> Result<Json<ExcerptCreated>, ApiError> {
    observe(Operation::Create, async {
        let ctx = extract::call_context(&state.service, Operation::Create, &headers)?;
        let Json(request) = body.map_err(|rejection| {
            AuditScope::for_call(Operation::Create, &ctx, None)
                .reject_code(state.service.audit(), CLIENT_ERROR);
            ApiError::unreadable_body(ctx.trace_id(), &rejection)
        })?;
        state
            .service
            .create(&ctx, request)
            .await
            .map(Json)
            .map_err(|e| ApiError::new(ctx.trace_id(), e))
    })
    .await
}

pub async fn retrieve(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(raw_id): Path<String>,
) -> Result<Response, ApiError> {
    observe(Operation::Retrieve, async {
        let ctx = extract::call_context(&state.service, Operation::Retrieve, &headers)?;
        let id = extract::excerpt_id(&state.service, Operation::Retrieve, &ctx, &raw_id)?;
        state
            .service
            .retrieve(&ctx, id)
            .await
            .map(download)
            .map_err(|e| ApiError::new(ctx.trace_id(), e))
    })
    .await
}

pub async fn status(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(raw_id): Path<String>,
) -> Result<Json<StatusReport>, ApiError> {
    observe(Operation::Status, async {
        let ctx = extract::call_context(&state.service, Operation::Status, &headers)?;
        let id = extract::excerpt_id(&state.service, Operation::Status, &ctx, &raw_id)?;
        state
            .service
            .status(&ctx, id)
            .await
            .map(Json)
            .map_err(|e| ApiError::new(ctx.trace_id(), e))
    })
    .await
}

pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    if state.service.is_accepting() {
        (StatusCode::OK, Json(json!({ "status": "UP" })))
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, Json(json!({ "status": "DOWN" })))
    }
}

fn download(artifact: Artifact) -> Response {
    let disposition = HeaderValue::from_str(&format!(
        "attachment; filename=\"{}\"",
        artifact.file_name()
    ))
    .unwrap_or_else(|_| HeaderValue::from_static("attachment"));

    (
        [
            (
                header::CONTENT_TYPE,
                HeaderValue::from_static("application/octet-stream"),
            ),
            (
                header::CONTENT_LENGTH,
                HeaderValue::from(artifact.content_length),
            ),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        artifact.content,
    )
        .into_response()
}
