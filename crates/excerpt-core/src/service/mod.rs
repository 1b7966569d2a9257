//! The excerpt service facade.
//!
//! [`ExcerptService`] wires the Signature Gate, Template Resolver, record
//! store, object storage and outbox pool together and exposes the three
//! public operations. Each operation is wrapped by [`audited`] and takes an
//! explicit [`CallContext`].
//!
//! ## Structure
//!
//! - [`generation`] - the Generation Orchestrator.
//! - [`retrieval`] - the Retrieval Gate.
//! - [`status`] - the Status Reporter.

mod generation;
mod retrieval;
mod status;

use crate::{
    Artifact, CallContext, ExcerptCreated, ExcerptId, ExcerptRequest, Result, StatusReport,
    audit::{AuditScope, AuditSink, Operation, audited},
    publish::{EventPublisher, OutboxPool, TopicRouter, pool::OutboxWorker},
    signature::{SignatureGate, SignatureStorage, SignatureVerifier},
    store::{ObjectStore, RecordStore, TemplateStore},
    template::{DEFAULT_UNSIGNED_TYPES, TemplateResolver},
};
use core::time::Duration;
use std::sync::Arc;

/// Behavior knobs for [`ExcerptService`].
#[derive(Clone, Debug)]
pub struct ServiceConfig {
    /// Whether generation requests must carry verified signatures.
    pub signature_enabled: bool,
    /// Bucket holding signature blobs uploaded by callers.
    pub staging_bucket: String,
    /// Bucket signature blobs are relocated to.
    pub signature_bucket: String,
    /// Bucket the rendering worker writes artifacts to.
    pub excerpt_bucket: String,
    /// Output types that may never be signed.
    pub unsigned_types: Vec<String>,
    pub topics: TopicRouter,
    pub storage_timeout: Duration,
    pub publish_timeout: Duration,
    pub num_publish_workers: usize,
    pub publish_queue_size: usize,
    /// Per-worker wait for a shutdown acknowledgement.
    pub shutdown_timeout: Duration,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            signature_enabled: false,
            staging_bucket: "lowcode-form-data".to_string(),
            signature_bucket: "excerpt-signatures".to_string(),
            excerpt_bucket: "excerpts".to_string(),
            unsigned_types: DEFAULT_UNSIGNED_TYPES.map(String::from).to_vec(),
            topics: TopicRouter::new([
                ("pdf", "generate-excerpt-pdf"),
                ("docx", "generate-excerpt-docx"),
                ("csv", "generate-excerpt-csv"),
            ]),
            storage_timeout: Duration::from_secs(5),
            publish_timeout: Duration::from_secs(10),
            num_publish_workers: 2,
            publish_queue_size: 256,
            shutdown_timeout: Duration::from_secs(3),
        }
    }
}

/// External collaborators of the service.
#[derive(Clone)]
pub struct Backends {
    pub records: Arc<dyn RecordStore>,
    pub templates: Arc<dyn TemplateStore>,
    /// Store holding the staging bucket.
    pub staging: Arc<dyn ObjectStore>,
    /// Store holding the durable signature bucket.
    pub signatures: Arc<dyn ObjectStore>,
    /// Store holding the excerpt bucket.
    pub artifacts: Arc<dyn ObjectStore>,
    pub verifier: Arc<dyn SignatureVerifier>,
    pub publisher: Arc<dyn EventPublisher>,
    pub audit: Arc<dyn AuditSink>,
}

struct Inner {
    config: ServiceConfig,
    records: Arc<dyn RecordStore>,
    artifacts: Arc<dyn ObjectStore>,
    gate: SignatureGate,
    templates: TemplateResolver,
    outbox: OutboxPool,
    audit: Arc<dyn AuditSink>,
}

/// Cheaply cloneable handle to the running service.
#[derive(Clone)]
pub struct ExcerptService {
    inner: Arc<Inner>,
}

impl ExcerptService {
    /// Builds the service and spawns its outbox workers. Must be called inside
    /// a Tokio runtime.
    pub fn new(config: ServiceConfig, backends: Backends) -> Self {
        let gate = SignatureGate::new(
            config.signature_enabled,
            SignatureStorage {
                staging: backends.staging,
                staging_bucket: config.staging_bucket.clone(),
                durable: backends.signatures,
                durable_bucket: config.signature_bucket.clone(),
            },
            backends.verifier,
            config.storage_timeout,
        );
        let templates = TemplateResolver::new(backends.templates, config.unsigned_types.clone());
        let outbox = OutboxPool::spawn(
            &OutboxWorker {
                publisher: backends.publisher,
                records: backends.records.clone(),
                publish_timeout: config.publish_timeout,
            },
            config.num_publish_workers,
            config.publish_queue_size,
            config.shutdown_timeout,
        );

        Self {
            inner: Arc::new(Inner {
                config,
                records: backends.records,
                artifacts: backends.artifacts,
                gate,
                templates,
                outbox,
                audit: backends.audit,
            }),
        }
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.inner.config
    }

    /// The sink audit events are written to, for failures detected before a
    /// [`CallContext`] exists.
    pub fn audit(&self) -> &dyn AuditSink {
        self.inner.audit.as_ref()
    }

    /// Whether new generation requests are accepted.
    pub fn is_accepting(&self) -> bool {
        self.inner.outbox.is_accepting()
    }

    /// Validates `request`, persists an `IN_PROGRESS` record and queues its
    /// generation event. Returns as soon as the event is queued.
    #[tracing::instrument(skip_all, fields(trace_id = %ctx.trace_id()))]
    pub async fn create(&self, ctx: &CallContext, request: ExcerptRequest) -> Result<ExcerptCreated> {
        audited(
            self.audit(),
            AuditScope::for_call(Operation::Create, ctx, None),
            |created: &ExcerptCreated| Some(created.excerpt_identifier),
            generation::generate(&self.inner, ctx, request),
        )
        .await
    }

    /// Returns the finished artifact of `id` to its owner.
    #[tracing::instrument(skip_all, fields(trace_id = %ctx.trace_id(), record_id = %id))]
    pub async fn retrieve(&self, ctx: &CallContext, id: ExcerptId) -> Result<Artifact> {
        audited(
            self.audit(),
            AuditScope::for_call(Operation::Retrieve, ctx, Some(id)),
            |_| None,
            retrieval::retrieve(&self.inner, ctx, id),
        )
        .await
    }

    #[tracing::instrument(skip_all, fields(trace_id = %ctx.trace_id(), record_id = %id))]
    pub async fn status(&self, ctx: &CallContext, id: ExcerptId) -> Result<StatusReport> {
        audited(
            self.audit(),
            AuditScope::for_call(Operation::Status, ctx, Some(id)),
            |_| None,
            status::status(&self.inner, id),
        )
        .await
    }

    /// Stops accepting generation requests and drains the outbox.
    pub async fn shutdown(&self) {
        self.inner.outbox.shutdown().await;
    }
}

#[cfg(test)]
mod tests;
