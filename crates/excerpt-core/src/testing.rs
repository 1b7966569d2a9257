//! Hand-written test doubles shared by the unit tests.

use crate::{
    ExcerptEvent, ExcerptId, ExcerptRecord, Template,
    publish::{EventPublisher, PublishError},
    signature::{SignatureVerifier, Verification, VerifierError},
    store::{RecordStore, StatusChange, StoreError, Transition},
};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
};
use tokio::sync::Notify;

/// A staged signature blob in the form-data envelope.
pub(crate) fn signature_blob(signature: &str) -> Bytes {
    Bytes::from(serde_json::json!({ "signature": signature }).to_string())
}

pub(crate) fn templates() -> Vec<Template> {
    [
        ("lab-report", "pdf"),
        ("ledger", "csv"),
        ("memo", "docx"),
        ("spreadsheet", "xlsx"),
    ]
    .into_iter()
    .map(|(name, ty)| Template {
        name: name.into(),
        content: format!("<{name}/>"),
        declared_type: ty.into(),
    })
    .collect()
}

/// Verifier answering every call with the same scripted outcome.
pub(crate) struct ScriptedVerifier {
    outcome: Mutex<Result<Verification, VerifierError>>,
    pub(crate) calls: Mutex<Vec<(String, String)>>,
}

impl ScriptedVerifier {
    pub(crate) fn valid() -> Self {
        Self::answering(Ok(Verification::Valid))
    }

    pub(crate) fn answering(outcome: Result<Verification, VerifierError>) -> Self {
        Self {
            outcome: Mutex::new(outcome),
            calls: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl SignatureVerifier for ScriptedVerifier {
    async fn verify(&self, signature: &str, data: &str) -> Result<Verification, VerifierError> {
        self.calls
            .lock()
            .push((signature.to_string(), data.to_string()));
        self.outcome.lock().clone()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Behavior {
    Accept,
    Reject,
    Hang,
}

/// Publisher counting attempts and answering according to `behavior`.
pub(crate) struct ScriptedPublisher {
    behavior: Behavior,
    pub(crate) attempts: AtomicUsize,
    pub(crate) published: Mutex<Vec<(String, ExcerptEvent)>>,
}

impl ScriptedPublisher {
    pub(crate) fn new(behavior: Behavior) -> Arc<Self> {
        Arc::new(Self {
            behavior,
            attempts: AtomicUsize::new(0),
            published: Mutex::new(Vec::new()),
        })
    }

    pub(crate) fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EventPublisher for ScriptedPublisher {
    async fn publish(
        &self,
        topic: &str,
        _key: &ExcerptId,
        event: &ExcerptEvent,
    ) -> Result<(), PublishError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        match self.behavior {
            Behavior::Accept => {
                self.published
                    .lock()
                    .push((topic.to_string(), event.clone()));
                Ok(())
            }
            Behavior::Reject => Err(PublishError::Rejected {
                reason: "broker refused".into(),
            }),
            Behavior::Hang => core::future::pending().await,
        }
    }
}

/// Publisher that fails, but only once the test releases it.
#[derive(Default)]
pub(crate) struct GatedPublisher {
    pub(crate) release: Notify,
}

#[async_trait]
impl EventPublisher for GatedPublisher {
    async fn publish(
        &self,
        _topic: &str,
        _key: &ExcerptId,
        _event: &ExcerptEvent,
    ) -> Result<(), PublishError> {
        self.release.notified().await;
        Err(PublishError::Transport {
            reason: "connection reset".into(),
        })
    }
}

/// Record store whose calls never complete.
pub(crate) struct StalledRecordStore;

#[async_trait]
impl RecordStore for StalledRecordStore {
    async fn insert(&self, _record: ExcerptRecord) -> Result<(), StoreError> {
        core::future::pending().await
    }

    async fn find(&self, _id: &ExcerptId) -> Result<Option<ExcerptRecord>, StoreError> {
        core::future::pending().await
    }

    async fn transition(
        &self,
        _id: &ExcerptId,
        _change: StatusChange,
        _at: DateTime<Utc>,
    ) -> Result<Transition, StoreError> {
        core::future::pending().await
    }
}
