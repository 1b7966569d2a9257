//! Retrieval Gate.

use super::Inner;
use crate::{Artifact, CallContext, Error, ExcerptId, Result, store};

pub(super) async fn retrieve(inner: &Inner, ctx: &CallContext, id: ExcerptId) -> Result<Artifact> {
    let record = store::bounded_record(inner.config.storage_timeout, inner.records.find(&id))
        .await?
        .ok_or(Error::RequestNotFound { id })?;

    // Ownership first, so a non-owner learns nothing about readiness.
    if record.owner_id != ctx.subject() {
        tracing::warn!(record_id = %id, "Retrieval attempted by a non-owner");
        return Err(Error::OwnershipMismatch { id });
    }

    let key = record
        .artifact_key
        .as_deref()
        .ok_or(Error::ArtifactNotReady { id })?;

    let bucket = &inner.config.excerpt_bucket;
    let Some(object) = store::bounded(
        inner.config.storage_timeout,
        inner.artifacts.get(bucket, key),
    )
    .await?
    else {
        tracing::error!(
            record_id = %id,
            bucket = %bucket,
            key,
            "Record names an artifact that storage does not hold"
        );
        return Err(Error::ArtifactMissingInStorage {
            key: key.to_string(),
        });
    };

    Ok(Artifact {
        id,
        content_length: object.content_length,
        content: object.content,
        excerpt_type: record.excerpt_type,
    })
}
