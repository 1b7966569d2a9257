//! Audit trail for the three public operations.
//!
//! [`audited`] wraps one operation and emits a `BEFORE` event, then either an
//! `AFTER` event or an `EXCEPTION` event carrying the error code. Failures of
//! a security-relevant kind are classified as [`EventType::SecurityEvent`].
//! Events go to an [`AuditSink`]; the default sink logs them on the `audit`
//! tracing target.

use crate::{CallContext, Error, ExcerptId, Result, SourceContext};
use chrono::{DateTime, Utc};
use core::future::Future;
use serde::Serialize;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Operation {
    Create,
    Retrieve,
    Status,
}

impl Operation {
    pub const fn action(self) -> &'static str {
        match self {
            Self::Create => "GENERATE EXCERPT CALL",
            Self::Retrieve => "RETRIEVE EXCERPT CALL",
            Self::Status => "GET EXCERPT STATUS CALL",
        }
    }

    pub const fn method(self) -> &'static str {
        match self {
            Self::Create => "generate",
            Self::Retrieve => "retrieve",
            Self::Status => "status",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditStep {
    Before,
    After,
    Exception,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventType {
    UserAction,
    SecurityEvent,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditEvent {
    pub event_type: EventType,
    pub operation: Operation,
    pub step: AuditStep,
    /// Operation action for `BEFORE`/`AFTER`, error code for `EXCEPTION`.
    pub action: String,
    pub trace_id: String,
    pub subject: Option<String>,
    pub source: SourceContext,
    pub entity_id: Option<ExcerptId>,
    pub result: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

pub trait AuditSink: Send + Sync {
    fn record(&self, event: AuditEvent);
}

/// Writes audit events as structured `tracing` events on the `audit` target.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn record(&self, event: AuditEvent) {
        let entity_id = event.entity_id.map(|id| id.to_string());
        tracing::info!(
            target: "audit",
            event_type = ?event.event_type,
            operation = event.operation.method(),
            step = ?event.step,
            action = %event.action,
            trace_id = %event.trace_id,
            subject = event.subject.as_deref(),
            source_system = event.source.source_system.as_deref(),
            source_application = event.source.source_application.as_deref(),
            source_business_process = event.source.source_business_process.as_deref(),
            source_business_activity = event.source.source_business_activity.as_deref(),
            entity_id = entity_id.as_deref(),
            result = event.result.as_deref(),
            "audit"
        );
    }
}

/// Who and what an audited call is about.
#[derive(Clone, Copy, Debug)]
pub struct AuditScope<'a> {
    pub operation: Operation,
    pub trace_id: &'a str,
    pub subject: Option<&'a str>,
    pub source: &'a SourceContext,
    pub entity_id: Option<ExcerptId>,
}

impl<'a> AuditScope<'a> {
    pub fn for_call(operation: Operation, ctx: &'a CallContext, entity_id: Option<ExcerptId>) -> Self {
        Self {
            operation,
            trace_id: ctx.trace_id(),
            subject: Some(ctx.subject()),
            source: ctx.source(),
            entity_id,
        }
    }

    fn event(&self, event_type: EventType, step: AuditStep, action: &str) -> AuditEvent {
        AuditEvent {
            event_type,
            operation: self.operation,
            step,
            action: action.to_string(),
            trace_id: self.trace_id.to_string(),
            subject: self.subject.map(str::to_string),
            source: self.source.clone(),
            entity_id: self.entity_id,
            result: None,
            occurred_at: Utc::now(),
        }
    }

    /// Records the `EXCEPTION` event for `error`.
    pub fn reject(&self, sink: &dyn AuditSink, error: &Error) {
        let event_type = if error.kind().is_security() {
            EventType::SecurityEvent
        } else {
            EventType::UserAction
        };
        sink.record(self.event(event_type, AuditStep::Exception, error.code()));
    }

    /// Records an `EXCEPTION` event for a failure the boundary detected before
    /// any service [`Error`] existed, such as an undecodable body.
    pub fn reject_code(&self, sink: &dyn AuditSink, code: &str) {
        sink.record(self.event(EventType::UserAction, AuditStep::Exception, code));
    }
}

/// Runs `call` between `BEFORE` and `AFTER`/`EXCEPTION` audit events.
///
/// `entity_id` picks the created id out of a successful result, for
/// operations whose subject id is only known afterwards.
pub async fn audited<T, F>(
    sink: &dyn AuditSink,
    scope: AuditScope<'_>,
    entity_id: impl FnOnce(&T) -> Option<ExcerptId>,
    call: F,
) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    let action = scope.operation.action();
    sink.record(scope.event(EventType::UserAction, AuditStep::Before, action));

    match call.await {
        Ok(value) => {
            let mut after = scope.event(EventType::UserAction, AuditStep::After, action);
            after.entity_id = after.entity_id.or_else(|| entity_id(&value));
            after.result = Some("OK".to_string());
            sink.record(after);
            Ok(value)
        }
        Err(error) => {
            scope.reject(sink, &error);
            Err(error)
        }
    }
}
