//! Header extraction and call-context resolution.

use super::error::ApiError;
use axum::http::HeaderMap;
use excerpt_core::{
    CallContext, Error, ExcerptId, ExcerptService, SecurityContext, SourceContext,
    audit::{AuditScope, Operation},
    header,
};

fn header_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

/// The caller's trace id, or a fresh one when the header is absent.
pub fn trace_id(headers: &HeaderMap) -> String {
    header_value(headers, header::TRACE_ID)
        .unwrap_or_else(|| uuid::Uuid::new_v4().simple().to_string())
}

pub fn security(headers: &HeaderMap) -> SecurityContext {
    SecurityContext {
        access_token: header_value(headers, header::ACCESS_TOKEN),
        digital_signature: header_value(headers, header::DIGITAL_SIGNATURE),
        digital_signature_derived: header_value(headers, header::DIGITAL_SIGNATURE_DERIVED),
    }
}

pub fn source(headers: &HeaderMap) -> SourceContext {
    SourceContext {
        source_system: header_value(headers, header::SOURCE_SYSTEM),
        source_application: header_value(headers, header::SOURCE_APPLICATION),
        source_business_process: header_value(headers, header::SOURCE_BUSINESS_PROCESS),
        source_business_activity: header_value(headers, header::SOURCE_BUSINESS_ACTIVITY),
    }
}

/// Builds the [`CallContext`] of a request.
///
/// A caller that cannot be identified never reaches the service, so the
/// failure is audited here.
pub fn call_context(
    service: &ExcerptService,
    operation: Operation,
    headers: &HeaderMap,
) -> Result<CallContext, ApiError> {
    let trace_id = trace_id(headers);
    let source = source(headers);
    CallContext::resolve(trace_id.clone(), security(headers), source.clone()).map_err(|error| {
        AuditScope {
            operation,
            trace_id: &trace_id,
            subject: None,
            source: &source,
            entity_id: None,
        }
        .reject(service.audit(), &error);
        ApiError::new(trace_id, error)
    })
}

/// Parses a path id, auditing a malformed one against `ctx`.
pub fn excerpt_id(
    service: &ExcerptService,
    operation: Operation,
    ctx: &CallContext,
    raw: &str,
) -> Result<ExcerptId, ApiError> {
    raw.parse::<ExcerptId>().map_err(|error: Error| {
        AuditScope::for_call(operation, ctx, None).reject(service.audit(), &error);
        ApiError::new(ctx.trace_id(), error)
    })
}
