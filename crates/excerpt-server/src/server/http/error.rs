//! Translation of service errors into HTTP responses.

use axum::{
    Json,
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use excerpt_core::{Error, ErrorKind};
use serde::Serialize;
use serde_json::{Value, json};

/// Code reported for request bodies that cannot be read.
pub const CLIENT_ERROR: &str = "CLIENT_ERROR";

#[derive(Debug)]
enum Failure {
    Service(Error),
    UnreadableBody(String),
}

/// A failed request, tagged with the trace id it is reported under.
#[derive(Debug)]
pub struct ApiError {
    trace_id: String,
    failure: Failure,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ErrorBody<'a> {
    trace_id: &'a str,
    code: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<Value>,
}

impl ApiError {
    pub fn new(trace_id: impl Into<String>, error: Error) -> Self {
        Self {
            trace_id: trace_id.into(),
            failure: Failure::Service(error),
        }
    }

    pub fn unreadable_body(trace_id: impl Into<String>, rejection: &JsonRejection) -> Self {
        Self {
            trace_id: trace_id.into(),
            failure: Failure::UnreadableBody(rejection.body_text()),
        }
    }

    /// Machine-readable code of the failure.
    pub fn code(&self) -> &'static str {
        match &self.failure {
            Failure::Service(error) => error.code(),
            Failure::UnreadableBody(_) => CLIENT_ERROR,
        }
    }
}

/// The one place an [`ErrorKind`] becomes a status code.
pub const fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::Validation => StatusCode::BAD_REQUEST,
        ErrorKind::InvalidInput => StatusCode::UNPROCESSABLE_ENTITY,
        ErrorKind::Authentication => StatusCode::UNAUTHORIZED,
        ErrorKind::Authorization | ErrorKind::NotFound => StatusCode::NOT_FOUND,
        ErrorKind::SignatureViolation => StatusCode::PRECONDITION_FAILED,
        ErrorKind::ShuttingDown => StatusCode::SERVICE_UNAVAILABLE,
        ErrorKind::ThirdPartyUnavailable | ErrorKind::ContractViolation | ErrorKind::Runtime => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

/// Message shown to the caller, or `None` when the reason is internal.
fn public_message(error: &Error, status: StatusCode) -> Option<String> {
    if status.is_server_error() {
        return None;
    }
    match error {
        // Must read exactly like an unknown id.
        Error::OwnershipMismatch { id } => Some(Error::RequestNotFound { id: *id }.to_string()),
        other => Some(other.to_string()),
    }
}

fn service_response(trace_id: &str, error: &Error) -> Response {
    let status = status_for(error.kind());
    if status.is_server_error() {
        tracing::error!(trace_id, code = error.code(), error = %error, "Request failed");
    } else {
        tracing::warn!(trace_id, code = error.code(), error = %error, "Request rejected");
    }

    match error {
        Error::TemplateNotFound { .. } => (
            status,
            Json(json!({ "status": "FAILED", "statusDetails": error.to_string() })),
        )
            .into_response(),
        Error::InvalidRequest {
            field,
            value,
            reason,
        } => {
            let details = json!({
                "errors": [{ "value": value, "field": field, "message": reason }]
            });
            error_body(status, trace_id, error.code(), Some(details))
        }
        _ => {
            let details = public_message(error, status).map(|message| json!({ "message": message }));
            error_body(status, trace_id, error.code(), details)
        }
    }
}

fn error_body(status: StatusCode, trace_id: &str, code: &str, details: Option<Value>) -> Response {
    (
        status,
        Json(ErrorBody {
            trace_id,
            code,
            details,
        }),
    )
        .into_response()
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match &self.failure {
            Failure::Service(error) => service_response(&self.trace_id, error),
            Failure::UnreadableBody(reason) => {
                tracing::warn!(trace_id = %self.trace_id, reason = %reason, "Unreadable request body");
                error_body(
                    StatusCode::BAD_REQUEST,
                    &self.trace_id,
                    CLIENT_ERROR,
                    Some(json!({ "message": reason })),
                )
            }
        }
    }
}
