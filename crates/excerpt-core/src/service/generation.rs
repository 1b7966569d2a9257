//! Generation Orchestrator.
//!
//! Everything up to the record insert is validation and may fail freely: no
//! record exists yet. A place on an outbox queue is reserved before the
//! insert, so waiting for queue capacity never leaves a record behind. The
//! insert and the hand-off through the reserved place then run as one detached
//! step that a departing caller cannot split.

use super::Inner;
use crate::{
    CallContext, Error, ExcerptCreated, ExcerptEvent, ExcerptRecord, ExcerptRequest, Result,
    publish::OutboxEntry,
    store::{self, StoreError},
};
use chrono::Utc;
use std::sync::Arc;

pub(super) async fn generate(
    inner: &Inner,
    ctx: &CallContext,
    request: ExcerptRequest,
) -> Result<ExcerptCreated> {
    if !inner.outbox.is_accepting() {
        return Err(Error::ServiceShutdown);
    }
    validate(&request)?;

    let signature_refs = inner.gate.admit(&request, ctx.security()).await?;

    let template = inner.templates.resolve(&request.excerpt_type).await?;
    inner
        .templates
        .enforce_signing_policy(&template, request.requires_system_signature)?;
    let topic = inner.config.topics.route(&template.declared_type)?.to_string();

    let record = ExcerptRecord::in_progress(
        ctx.subject(),
        &template.declared_type,
        request.requires_system_signature,
        ctx.source().clone(),
        signature_refs,
        Utc::now(),
    );
    let id = record.id;
    let entry = OutboxEntry {
        record_id: id,
        topic,
        event: ExcerptEvent::for_record(&record, request),
    };

    let slot = inner.outbox.reserve().await?;
    let records = Arc::clone(&inner.records);
    let limit = inner.config.storage_timeout;
    let commit = tokio::spawn(async move {
        store::bounded_record(limit, records.insert(record)).await?;
        slot.send(entry);
        Ok::<_, StoreError>(())
    });
    commit.await.map_err(|e| StoreError::Unavailable {
        reason: format!("record commit aborted: {e}"),
    })??;
    tracing::info!(record_id = %id, excerpt_type = %template.declared_type, "Record created");

    Ok(ExcerptCreated {
        excerpt_identifier: id,
    })
}

fn validate(request: &ExcerptRequest) -> Result<()> {
    if request.excerpt_type.trim().is_empty() {
        return Err(Error::InvalidRequest {
            field: "excerptType",
            value: Some(request.excerpt_type.clone()),
            reason: "must not be blank".to_string(),
        });
    }
    Ok(())
}
