//! Error types for the excerpt service.
//!
//! This module defines the central [`Error`] enum returned by the create,
//! retrieve and status operations. Every variant reports an [`ErrorKind`] and a
//! stable machine-readable [`code`](Error::code). The transport layer maps the
//! kind to a status code exactly once, at the boundary.
//!
//! ## Error Kinds
//! - `Validation`: a header, template name, id or signing combination was
//!   rejected before any record was written.
//! - `InvalidInput`: a body field failed validation.
//! - `Authentication` / `Authorization`: the caller could not be identified,
//!   or is not the owner of the record.
//! - `NotFound`: record, artifact or stored object absent.
//! - `SignatureViolation`: the verifier reported the signature as invalid.
//! - `ThirdPartyUnavailable`: the verifier or object storage could not be
//!   reached.
//! - `ContractViolation`: a downstream call or the deployment is
//!   misconfigured. Signals an operator bug, not a caller error.
//! - `ShuttingDown`: the service no longer accepts generation requests.
//! - `Runtime`: anything unclassified, including record store failures.

use crate::{
    ExcerptId,
    store::{StorageError, StoreError},
};

pub type Result<T> = core::result::Result<T, Error>;

/// Unified error type for the excerpt service.
#[derive(Clone, thiserror::Error, Debug)]
pub enum Error {
    /// Signing is enabled but one or both signature references are absent.
    #[error("Mandatory header(s) missed: [{}]", .missing.join(", "))]
    MissingSignatureHeaders { missing: Vec<&'static str> },

    /// A signature reference points at nothing in staging storage.
    #[error("Signature does not exist in storage. Key: {key}")]
    SignatureBlobNotFound { key: String },

    /// The staged blob exists but carries no readable signature.
    #[error("Signature blob is not readable. Key: {key}")]
    MalformedSignatureBlob { key: String },

    /// The verifier checked the signature and rejected it.
    #[error("Invalid signature: {reason}")]
    InvalidSignature { reason: String },

    /// The verifier refused the verification call itself (4xx).
    #[error("Signature verifier rejected the call: {reason}")]
    VerifierBadRequest { reason: String },

    /// The verifier could not be reached or failed (5xx, timeout).
    #[error("Signature verifier unavailable: {reason}")]
    VerifierUnavailable { reason: String },

    /// No template carries the requested name.
    #[error("Template not found: {name}")]
    TemplateNotFound { name: String },

    /// The template's output type may never be signed.
    #[error("{declared_type} file not allowed to sign")]
    SigningNotAllowed { declared_type: String },

    /// The resolved output type has no configured topic.
    #[error("No publish route for excerpt type: {declared_type}")]
    NoPublishRoute { declared_type: String },

    /// A body field failed validation.
    #[error("Invalid value for `{field}`: {reason}")]
    InvalidRequest {
        field: &'static str,
        value: Option<String>,
        reason: String,
    },

    /// A request id is not a well-formed identifier.
    #[error("Malformed excerpt id: {value}")]
    MalformedId { value: String },

    /// The access token is absent or has no usable subject.
    #[error("Authentication failed: {reason}")]
    Unauthenticated { reason: String },

    /// No record exists for the id.
    #[error("Record not found: {id}")]
    RequestNotFound { id: ExcerptId },

    /// The caller is not the subject that created the record.
    #[error("Caller does not own record {id}")]
    OwnershipMismatch { id: ExcerptId },

    /// The record exists but the worker has not produced the artifact.
    #[error("Excerpt {id} has no artifact yet")]
    ArtifactNotReady { id: ExcerptId },

    /// The record names an artifact key that storage does not hold.
    #[error("Excerpt not found in storage: {key}")]
    ArtifactMissingInStorage { key: String },

    /// Object storage failure.
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// Record store failure.
    #[error(transparent)]
    Records(#[from] StoreError),

    /// The service is in the process of shutting down.
    #[error("Service is shutting down")]
    ServiceShutdown,
}

/// Coarse classification of an [`Error`], used for transport mapping and
/// audit classification.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Validation,
    InvalidInput,
    Authentication,
    Authorization,
    NotFound,
    SignatureViolation,
    ThirdPartyUnavailable,
    ContractViolation,
    ShuttingDown,
    Runtime,
}

impl ErrorKind {
    /// Whether a failure of this kind is a security-relevant event.
    pub const fn is_security(self) -> bool {
        matches!(self, Self::Authentication | Self::Authorization)
    }
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::MissingSignatureHeaders { .. }
            | Self::SignatureBlobNotFound { .. }
            | Self::MalformedSignatureBlob { .. }
            | Self::TemplateNotFound { .. }
            | Self::SigningNotAllowed { .. }
            | Self::MalformedId { .. } => ErrorKind::Validation,
            Self::InvalidRequest { .. } => ErrorKind::InvalidInput,
            Self::Unauthenticated { .. } => ErrorKind::Authentication,
            Self::OwnershipMismatch { .. } => ErrorKind::Authorization,
            Self::RequestNotFound { .. }
            | Self::ArtifactNotReady { .. }
            | Self::ArtifactMissingInStorage { .. } => ErrorKind::NotFound,
            Self::InvalidSignature { .. } => ErrorKind::SignatureViolation,
            Self::VerifierUnavailable { .. } => ErrorKind::ThirdPartyUnavailable,
            Self::VerifierBadRequest { .. } | Self::NoPublishRoute { .. } => {
                ErrorKind::ContractViolation
            }
            Self::Storage(e) => match e {
                StorageError::Communication { .. } => ErrorKind::ThirdPartyUnavailable,
                StorageError::Misconfiguration { .. } => ErrorKind::ContractViolation,
                StorageError::InvalidKey { .. } => ErrorKind::Validation,
            },
            Self::Records(_) => ErrorKind::Runtime,
            Self::ServiceShutdown => ErrorKind::ShuttingDown,
        }
    }

    /// Machine-readable code surfaced to callers.
    pub fn code(&self) -> &'static str {
        match self {
            Self::MissingSignatureHeaders { .. } => "HEADERS_ARE_MISSING",
            Self::SignatureBlobNotFound { .. } | Self::MalformedSignatureBlob { .. } => {
                "INVALID_HEADER_VALUE"
            }
            Self::InvalidSignature { .. } => "SIGNATURE_VIOLATION",
            Self::VerifierBadRequest { .. } | Self::NoPublishRoute { .. } => {
                "INTERNAL_CONTRACT_VIOLATION"
            }
            Self::VerifierUnavailable { .. } => "THIRD_PARTY_SERVICE_UNAVAILABLE",
            Self::TemplateNotFound { .. } => "TEMPLATE_NOT_FOUND",
            Self::SigningNotAllowed { .. } => "SIGNING_NOT_ALLOWED",
            Self::InvalidRequest { .. } => "VALIDATION_ERROR",
            Self::MalformedId { .. } => "METHOD_ARGUMENT_TYPE_MISMATCH",
            Self::Unauthenticated { .. } => "AUTHENTICATION_FAILED",
            // Ownership failures share the not-found code so that a non-owner
            // cannot distinguish "exists" from "never existed".
            Self::RequestNotFound { .. }
            | Self::OwnershipMismatch { .. }
            | Self::ArtifactNotReady { .. }
            | Self::ArtifactMissingInStorage { .. } => "NOT_FOUND",
            Self::Storage(e) => match e {
                StorageError::Communication { .. } => "THIRD_PARTY_SERVICE_UNAVAILABLE",
                StorageError::Misconfiguration { .. } => "INTERNAL_CONTRACT_VIOLATION",
                StorageError::InvalidKey { .. } => "INVALID_HEADER_VALUE",
            },
            Self::Records(_) => "RUNTIME_ERROR",
            Self::ServiceShutdown => "SERVICE_SHUTTING_DOWN",
        }
    }
}
