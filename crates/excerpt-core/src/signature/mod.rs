//! Signature Gate.
//!
//! When signing is enabled, every generation request must carry two signature
//! references (primary and derived). The derived signature is verified
//! against the canonical serialization of the request, and both staged blobs
//! are copied into the durable signature bucket under their original keys.
//!
//! Nothing here touches the record store: the gate runs entirely before a
//! record exists, so any failure leaves no durable trace apart from blobs
//! already relocated (which are idempotent copies).

pub mod verifier;

pub use verifier::{
    HttpSignatureVerifier, SignatureVerifier, UnconfiguredVerifier, Verification, VerifierError,
};

use crate::{
    Error, ExcerptId, ExcerptRequest, Result, SecurityContext, SignatureRefs,
    store::{self, ObjectStore, StorageError, StoredObject},
};
use bytes::Bytes;
use core::{future::Future, time::Duration};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;

/// Shape of a staged signature blob.
#[derive(Deserialize)]
struct SignatureBlob {
    signature: String,
}

/// The serialization the caller signed: the request as an event with no
/// record id yet. Input-data keys serialize in sorted order.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CanonicalPayload<'a> {
    record_id: Option<ExcerptId>,
    excerpt_type: &'a str,
    excerpt_input_data: &'a Map<String, Value>,
    requires_system_signature: bool,
}

/// Deterministic serialization of `request` used for signature checks.
pub fn canonical_payload(request: &ExcerptRequest) -> String {
    let payload = CanonicalPayload {
        record_id: None,
        excerpt_type: &request.excerpt_type,
        excerpt_input_data: &request.excerpt_input_data,
        requires_system_signature: request.requires_system_signature,
    };
    // A struct of strings, bools and JSON values always serializes.
    serde_json::to_string(&payload).unwrap_or_default()
}

/// Where staged blobs are read from and relocated to.
#[derive(Clone)]
pub struct SignatureStorage {
    pub staging: Arc<dyn ObjectStore>,
    pub staging_bucket: String,
    pub durable: Arc<dyn ObjectStore>,
    pub durable_bucket: String,
}

#[derive(Clone)]
pub struct SignatureGate {
    enabled: bool,
    storage: SignatureStorage,
    verifier: Arc<dyn SignatureVerifier>,
    storage_timeout: Duration,
}

impl SignatureGate {
    pub fn new(
        enabled: bool,
        storage: SignatureStorage,
        verifier: Arc<dyn SignatureVerifier>,
        storage_timeout: Duration,
    ) -> Self {
        Self {
            enabled,
            storage,
            verifier,
            storage_timeout,
        }
    }

    /// Runs the full gate for one request: headers, verification, then
    /// relocation of both blobs. Returns the references to record, or `None`
    /// when signing is disabled.
    #[tracing::instrument(skip_all, fields(enabled = self.enabled))]
    pub async fn admit(
        &self,
        request: &ExcerptRequest,
        security: &SecurityContext,
    ) -> Result<Option<SignatureRefs>> {
        let Some(refs) = self.verify_mandatory_headers(security)? else {
            return Ok(None);
        };
        self.check_signature(request, &refs.derived).await?;
        self.relocate(&refs.primary).await?;
        self.relocate(&refs.derived).await?;
        Ok(Some(refs))
    }

    /// Ensures both signature references are present when signing is enabled.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MissingSignatureHeaders`] naming every absent header.
    pub fn verify_mandatory_headers(
        &self,
        security: &SecurityContext,
    ) -> Result<Option<SignatureRefs>> {
        if !self.enabled {
            return Ok(None);
        }
        security
            .signature_refs()
            .map(Some)
            .map_err(|missing| Error::MissingSignatureHeaders { missing })
    }

    /// Verifies the staged signature at `derived_ref` against `request`.
    pub async fn check_signature(&self, request: &ExcerptRequest, derived_ref: &str) -> Result<()> {
        tracing::debug!(key = derived_ref, "Retrieving staged signature");
        let blob = self
            .bounded(
                self.storage
                    .staging
                    .get(&self.storage.staging_bucket, derived_ref),
            )
            .await?
            .ok_or_else(|| Error::SignatureBlobNotFound {
                key: derived_ref.to_string(),
            })?;
        let blob: SignatureBlob =
            serde_json::from_slice(&blob.content).map_err(|_| Error::MalformedSignatureBlob {
                key: derived_ref.to_string(),
            })?;

        tracing::debug!("Verifying signature");
        let data = canonical_payload(request);
        match self.verifier.verify(&blob.signature, &data).await {
            Ok(Verification::Valid) => Ok(()),
            Ok(Verification::Invalid { reason }) => Err(Error::InvalidSignature { reason }),
            Err(VerifierError::BadRequest { reason }) => Err(Error::VerifierBadRequest { reason }),
            Err(VerifierError::Unavailable { reason }) => {
                Err(Error::VerifierUnavailable { reason })
            }
        }
    }

    /// Copies the staged blob at `key` into the durable bucket under the same
    /// key. Repeating the call is harmless: the copy is overwritten with
    /// identical bytes, and a blob already evicted from staging but present in
    /// durable storage counts as relocated.
    pub async fn relocate(&self, key: &str) -> Result<()> {
        let storage = &self.storage;
        let staged = self
            .bounded(storage.staging.get(&storage.staging_bucket, key))
            .await?;

        let content: Bytes = match staged {
            Some(StoredObject { content, .. }) => content,
            None => {
                let durable = self
                    .bounded(storage.durable.get(&storage.durable_bucket, key))
                    .await?;
                return match durable {
                    Some(_) => Ok(()),
                    None => Err(Error::SignatureBlobNotFound {
                        key: key.to_string(),
                    }),
                };
            }
        };

        tracing::debug!(key, "Storing signature in durable bucket");
        self.bounded(storage.durable.put(&storage.durable_bucket, key, content))
            .await
    }

    async fn bounded<T>(
        &self,
        call: impl Future<Output = core::result::Result<T, StorageError>>,
    ) -> Result<T> {
        Ok(store::bounded(self.storage_timeout, call).await?)
    }
}
