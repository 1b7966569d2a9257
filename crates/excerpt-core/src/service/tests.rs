use super::*;
use crate::{
    Error, ExcerptStatus, SecurityContext, SourceContext,
    audit::{AuditStep, EventType, tests::RecordingSink},
    publish::PUBLISH_FAILURE_DETAILS,
    store::{
        InMemoryObjectStore, InMemoryRecordStore, InMemoryTemplateStore, StatusChange, StoreError,
        Transition,
    },
    testing::{
        Behavior, GatedPublisher, ScriptedPublisher, ScriptedVerifier, StalledRecordStore,
        signature_blob, templates,
    },
    token::tests::token_for,
};
use bytes::Bytes;
use chrono::Utc;
use serde_json::json;

const OWNER: &str = "3f1c9b7e-owner";
const STRANGER: &str = "9d2a41c0-stranger";

struct Harness {
    service: ExcerptService,
    records: Arc<InMemoryRecordStore>,
    objects: Arc<InMemoryObjectStore>,
    audit: Arc<RecordingSink>,
}

fn harness(signing: bool, publisher: Arc<dyn EventPublisher>) -> Harness {
    harness_with(
        ServiceConfig {
            signature_enabled: signing,
            publish_timeout: Duration::from_millis(50),
            ..ServiceConfig::default()
        },
        publisher,
    )
}

fn harness_with(config: ServiceConfig, publisher: Arc<dyn EventPublisher>) -> Harness {
    let records = Arc::new(InMemoryRecordStore::new());
    let objects = Arc::new(InMemoryObjectStore::with_buckets([
        config.staging_bucket.clone(),
        config.signature_bucket.clone(),
        config.excerpt_bucket.clone(),
    ]));
    let audit = Arc::new(RecordingSink::default());

    let service = ExcerptService::new(
        config,
        Backends {
            records: records.clone(),
            templates: Arc::new(InMemoryTemplateStore::new(templates())),
            staging: objects.clone(),
            signatures: objects.clone(),
            artifacts: objects.clone(),
            verifier: Arc::new(ScriptedVerifier::valid()),
            publisher,
            audit: audit.clone(),
        },
    );

    Harness {
        service,
        records,
        objects,
        audit,
    }
}

fn ctx_for(subject: &str, security: SecurityContext) -> CallContext {
    let security = SecurityContext {
        access_token: Some(token_for(subject)),
        ..security
    };
    let source = SourceContext {
        source_system: Some("portal".into()),
        ..SourceContext::default()
    };
    CallContext::resolve("trace-1", security, source).unwrap()
}

fn owner() -> CallContext {
    ctx_for(OWNER, SecurityContext::default())
}

fn request(excerpt_type: &str, sign: bool) -> ExcerptRequest {
    serde_json::from_value(json!({
        "excerptType": excerpt_type,
        "excerptInputData": { "patient": "Doe" },
        "requiresSystemSignature": sign
    }))
    .unwrap()
}

/// Simulates the rendering worker: stores the artifact and completes.
async fn complete(h: &Harness, id: ExcerptId, key: &str, content: &'static [u8]) {
    let bucket = &h.service.config().excerpt_bucket;
    h.objects
        .put(bucket, key, Bytes::from_static(content))
        .await
        .unwrap();
    let outcome = h
        .records
        .transition(
            &id,
            StatusChange::Completed {
                artifact_key: key.to_string(),
            },
            Utc::now(),
        )
        .await
        .unwrap();
    assert_eq!(outcome, Transition::Applied);
}

#[tokio::test]
async fn create_persists_in_progress_and_publishes_once() {
    let publisher = ScriptedPublisher::new(Behavior::Accept);
    let h = harness(false, publisher.clone());

    let created = h
        .service
        .create(&owner(), request("lab-report", false))
        .await
        .unwrap();
    h.service.shutdown().await;

    let record = h
        .records
        .find(&created.excerpt_identifier)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(record.status, ExcerptStatus::InProgress);
    assert_eq!(record.artifact_key, None);
    assert_eq!(record.owner_id, OWNER);
    assert_eq!(record.excerpt_type, "pdf");
    assert_eq!(record.source.source_system.as_deref(), Some("portal"));
    assert_eq!(record.signature_refs, None);

    assert_eq!(publisher.attempts(), 1);
    let published = publisher.published.lock();
    let (topic, event) = &published[0];
    assert_eq!(topic, "generate-excerpt-pdf");
    assert_eq!(event.record_id, created.excerpt_identifier);
    // The worker needs the template name, not the declared type.
    assert_eq!(event.excerpt_type, "lab-report");
    assert_eq!(event.excerpt_input_data["patient"], "Doe");
}

#[tokio::test]
async fn unknown_template_creates_nothing() {
    let publisher = ScriptedPublisher::new(Behavior::Accept);
    let h = harness(false, publisher.clone());

    let err = h
        .service
        .create(&owner(), request("invoice", false))
        .await
        .unwrap_err();
    assert_eq!(err.to_string(), "Template not found: invoice");
    assert!(h.records.is_empty());
    assert_eq!(publisher.attempts(), 0);
}

#[tokio::test]
async fn blank_template_name_is_invalid_input() {
    let h = harness(false, ScriptedPublisher::new(Behavior::Accept));
    let err = h
        .service
        .create(&owner(), request("  ", false))
        .await
        .unwrap_err();
    assert_eq!(err.code(), "VALIDATION_ERROR");
    assert!(h.records.is_empty());
}

#[tokio::test]
async fn signed_request_is_admitted_and_reported_in_progress() {
    let h = harness(true, ScriptedPublisher::new(Behavior::Accept));
    let staging = &h.service.config().staging_bucket;
    h.objects
        .put(staging, "sig-primary", signature_blob("primary"))
        .await
        .unwrap();
    h.objects
        .put(staging, "sig-derived", signature_blob("derived"))
        .await
        .unwrap();

    let ctx = ctx_for(
        OWNER,
        SecurityContext {
            digital_signature: Some("sig-primary".into()),
            digital_signature_derived: Some("sig-derived".into()),
            ..SecurityContext::default()
        },
    );
    let created = h
        .service
        .create(&ctx, request("lab-report", true))
        .await
        .unwrap();

    let report = h
        .service
        .status(&ctx, created.excerpt_identifier)
        .await
        .unwrap();
    assert_eq!(report.status, ExcerptStatus::InProgress);
    assert_eq!(report.status_details, None);

    let record = h
        .records
        .find(&created.excerpt_identifier)
        .await
        .unwrap()
        .unwrap();
    let refs = record.signature_refs.unwrap();
    assert_eq!(refs.primary, "sig-primary");
    assert_eq!(refs.derived, "sig-derived");
    let durable = &h.service.config().signature_bucket;
    assert!(h.objects.contains(durable, "sig-primary"));
    assert!(record.signature_required);
}

#[tokio::test]
async fn missing_signature_headers_create_nothing() {
    let publisher = ScriptedPublisher::new(Behavior::Accept);
    let h = harness(true, publisher.clone());
    let ctx = ctx_for(
        OWNER,
        SecurityContext {
            digital_signature: Some("sig-primary".into()),
            ..SecurityContext::default()
        },
    );

    let err = h
        .service
        .create(&ctx, request("lab-report", true))
        .await
        .unwrap_err();
    assert!(matches!(
        &err,
        Error::MissingSignatureHeaders { missing } if missing == &["X-Digital-Signature-Derived"]
    ));
    assert!(h.records.is_empty());
    assert_eq!(publisher.attempts(), 0);
}

#[tokio::test]
async fn unsigned_types_cannot_be_signed() {
    let h = harness(false, ScriptedPublisher::new(Behavior::Accept));
    for (name, ty) in [("ledger", "csv"), ("memo", "docx")] {
        let err = h
            .service
            .create(&owner(), request(name, true))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), format!("{ty} file not allowed to sign"));
    }
    assert!(h.records.is_empty());
}

#[tokio::test]
async fn unrouted_type_fails_before_persisting() {
    let h = harness(false, ScriptedPublisher::new(Behavior::Accept));
    let err = h
        .service
        .create(&owner(), request("spreadsheet", false))
        .await
        .unwrap_err();
    assert_eq!(err.code(), "INTERNAL_CONTRACT_VIOLATION");
    assert!(h.records.is_empty());
}

#[tokio::test]
async fn rejected_publish_is_compensated() {
    let publisher = ScriptedPublisher::new(Behavior::Reject);
    let h = harness(false, publisher.clone());

    let created = h
        .service
        .create(&owner(), request("lab-report", false))
        .await
        .unwrap();
    h.service.shutdown().await;

    let report = h
        .service
        .status(&owner(), created.excerpt_identifier)
        .await
        .unwrap();
    assert_eq!(report.status, ExcerptStatus::Failed);
    assert_eq!(
        report.status_details.as_deref(),
        Some(PUBLISH_FAILURE_DETAILS)
    );
    assert_eq!(publisher.attempts(), 1);
}

#[tokio::test]
async fn publish_timeout_is_compensated() {
    let publisher = ScriptedPublisher::new(Behavior::Hang);
    let h = harness(false, publisher.clone());

    let created = h
        .service
        .create(&owner(), request("lab-report", false))
        .await
        .unwrap();
    h.service.shutdown().await;

    let record = h
        .records
        .find(&created.excerpt_identifier)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(record.status, ExcerptStatus::Failed);
    assert!(record.updated_at >= record.created_at);
    assert_eq!(publisher.attempts(), 1);
}

#[tokio::test]
async fn compensation_never_clobbers_completion() {
    let publisher = Arc::new(GatedPublisher::default());
    let h = harness(false, publisher.clone());

    let created = h
        .service
        .create(&owner(), request("lab-report", false))
        .await
        .unwrap();
    let id = created.excerpt_identifier;

    // The worker finishes while the publish is still outstanding.
    complete(&h, id, "artifact-1", b"%PDF-1.7").await;
    publisher.release.notify_one();
    h.service.shutdown().await;

    let report = h.service.status(&owner(), id).await.unwrap();
    assert_eq!(report.status, ExcerptStatus::Completed);
    assert_eq!(report.status_details, None);
}

#[tokio::test]
async fn create_abandoned_while_queue_is_full_leaves_no_orphan() {
    let publisher = ScriptedPublisher::new(Behavior::Hang);
    let h = harness_with(
        ServiceConfig {
            num_publish_workers: 1,
            publish_queue_size: 1,
            publish_timeout: Duration::from_millis(200),
            ..ServiceConfig::default()
        },
        publisher.clone(),
    );

    // One entry stuck in the worker, one filling the only queue place.
    let mut ids = Vec::new();
    for _ in 0..2 {
        let created = h
            .service
            .create(&owner(), request("lab-report", false))
            .await
            .unwrap();
        ids.push(created.excerpt_identifier);
    }

    // The caller gives up while waiting for queue capacity.
    let abandoned = tokio::time::timeout(
        Duration::from_millis(50),
        h.service.create(&owner(), request("lab-report", false)),
    )
    .await;
    assert!(abandoned.is_err());

    tokio::time::sleep(Duration::from_secs(1)).await;

    assert_eq!(h.records.len(), 2);
    for id in ids {
        let record = h.records.find(&id).await.unwrap().unwrap();
        assert_eq!(record.status, ExcerptStatus::Failed);
    }
}

#[tokio::test]
async fn shutdown_past_its_deadline_compensates_queued_work() {
    let publisher = ScriptedPublisher::new(Behavior::Hang);
    let h = harness_with(
        ServiceConfig {
            publish_timeout: Duration::from_millis(300),
            shutdown_timeout: Duration::from_millis(100),
            ..ServiceConfig::default()
        },
        publisher.clone(),
    );

    let mut ids = Vec::new();
    for _ in 0..4 {
        let created = h
            .service
            .create(&owner(), request("lab-report", false))
            .await
            .unwrap();
        ids.push(created.excerpt_identifier);
    }
    h.service.shutdown().await;

    for id in ids {
        let report = h.service.status(&owner(), id).await.unwrap();
        assert_eq!(report.status, ExcerptStatus::Failed);
        assert_eq!(
            report.status_details.as_deref(),
            Some(PUBLISH_FAILURE_DETAILS)
        );
    }
}

#[tokio::test]
async fn stalled_record_store_is_bounded_by_the_storage_timeout() {
    let objects = Arc::new(InMemoryObjectStore::default());
    let service = ExcerptService::new(
        ServiceConfig {
            storage_timeout: Duration::from_millis(50),
            ..ServiceConfig::default()
        },
        Backends {
            records: Arc::new(StalledRecordStore),
            templates: Arc::new(InMemoryTemplateStore::new(templates())),
            staging: objects.clone(),
            signatures: objects.clone(),
            artifacts: objects,
            verifier: Arc::new(ScriptedVerifier::valid()),
            publisher: ScriptedPublisher::new(Behavior::Accept),
            audit: Arc::new(RecordingSink::default()),
        },
    );

    let calls = tokio::time::timeout(Duration::from_secs(1), async {
        let created = service.create(&owner(), request("lab-report", false)).await;
        let status = service.status(&owner(), ExcerptId::generate()).await;
        let retrieved = service.retrieve(&owner(), ExcerptId::generate()).await;
        (created, status, retrieved)
    })
    .await
    .unwrap();

    assert!(matches!(calls.0, Err(Error::Records(StoreError::Unavailable { .. }))));
    assert!(matches!(calls.1, Err(Error::Records(StoreError::Unavailable { .. }))));
    assert!(matches!(calls.2, Err(Error::Records(StoreError::Unavailable { .. }))));
}

#[tokio::test]
async fn refuses_generation_after_shutdown() {
    let h = harness(false, ScriptedPublisher::new(Behavior::Accept));
    h.service.shutdown().await;
    assert!(!h.service.is_accepting());

    let err = h
        .service
        .create(&owner(), request("lab-report", false))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::ServiceShutdown));
    assert!(h.records.is_empty());
}

#[tokio::test]
async fn owner_retrieves_completed_artifact() {
    let h = harness(false, ScriptedPublisher::new(Behavior::Accept));
    let created = h
        .service
        .create(&owner(), request("lab-report", false))
        .await
        .unwrap();
    let id = created.excerpt_identifier;
    complete(&h, id, "artifact-1", b"%PDF-1.7").await;

    let artifact = h.service.retrieve(&owner(), id).await.unwrap();
    assert_eq!(artifact.content, Bytes::from_static(b"%PDF-1.7"));
    assert_eq!(artifact.content_length, 8);
    assert_eq!(artifact.file_name(), format!("{id}.pdf"));
}

#[tokio::test]
async fn artifact_not_ready_is_not_found_class() {
    let h = harness(false, ScriptedPublisher::new(Behavior::Accept));
    let created = h
        .service
        .create(&owner(), request("lab-report", false))
        .await
        .unwrap();

    let err = h
        .service
        .retrieve(&owner(), created.excerpt_identifier)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::ArtifactNotReady { .. }));
    assert_eq!(err.code(), "NOT_FOUND");
}

#[tokio::test]
async fn ownership_is_checked_regardless_of_completion() {
    let h = harness(false, ScriptedPublisher::new(Behavior::Accept));
    let stranger = ctx_for(STRANGER, SecurityContext::default());

    let pending = h
        .service
        .create(&owner(), request("lab-report", false))
        .await
        .unwrap()
        .excerpt_identifier;
    let done = h
        .service
        .create(&owner(), request("lab-report", false))
        .await
        .unwrap()
        .excerpt_identifier;
    complete(&h, done, "artifact-2", b"%PDF").await;

    for id in [pending, done] {
        let err = h.service.retrieve(&stranger, id).await.unwrap_err();
        assert!(matches!(err, Error::OwnershipMismatch { .. }));
    }

    // Same code as an id that never existed.
    let unknown = h
        .service
        .retrieve(&stranger, ExcerptId::generate())
        .await
        .unwrap_err();
    assert!(matches!(unknown, Error::RequestNotFound { .. }));
    assert_eq!(unknown.code(), "NOT_FOUND");
}

#[tokio::test]
async fn artifact_missing_in_storage_is_not_found() {
    let h = harness(false, ScriptedPublisher::new(Behavior::Accept));
    let id = h
        .service
        .create(&owner(), request("lab-report", false))
        .await
        .unwrap()
        .excerpt_identifier;
    h.records
        .transition(
            &id,
            StatusChange::Completed {
                artifact_key: "vanished".into(),
            },
            Utc::now(),
        )
        .await
        .unwrap();

    let err = h.service.retrieve(&owner(), id).await.unwrap_err();
    assert!(matches!(err, Error::ArtifactMissingInStorage { key } if key == "vanished"));
}

#[tokio::test]
async fn status_is_readable_by_anyone_authenticated() {
    let h = harness(false, ScriptedPublisher::new(Behavior::Accept));
    let id = h
        .service
        .create(&owner(), request("lab-report", false))
        .await
        .unwrap()
        .excerpt_identifier;

    let stranger = ctx_for(STRANGER, SecurityContext::default());
    let report = h.service.status(&stranger, id).await.unwrap();
    assert_eq!(report.status, ExcerptStatus::InProgress);

    let err = h
        .service
        .status(&owner(), ExcerptId::generate())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::RequestNotFound { .. }));
}

#[tokio::test]
async fn operations_are_audited() {
    let h = harness(false, ScriptedPublisher::new(Behavior::Accept));
    let id = h
        .service
        .create(&owner(), request("lab-report", false))
        .await
        .unwrap()
        .excerpt_identifier;
    let stranger = ctx_for(STRANGER, SecurityContext::default());
    let _ = h.service.retrieve(&stranger, id).await;

    let events = h.audit.events.lock();
    let summary: Vec<_> = events
        .iter()
        .map(|e| (e.operation, e.step, e.event_type))
        .collect();
    assert_eq!(
        summary,
        vec![
            (Operation::Create, AuditStep::Before, EventType::UserAction),
            (Operation::Create, AuditStep::After, EventType::UserAction),
            (Operation::Retrieve, AuditStep::Before, EventType::UserAction),
            (
                Operation::Retrieve,
                AuditStep::Exception,
                EventType::SecurityEvent
            ),
        ]
    );
    assert_eq!(events[1].entity_id, Some(id));
    assert_eq!(events[1].subject.as_deref(), Some(OWNER));
    assert_eq!(events[3].subject.as_deref(), Some(STRANGER));
}
