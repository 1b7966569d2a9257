//! # Excerpt domain types
//!
//! The central entity is [`ExcerptRecord`], the durable tracking row for one
//! generation attempt. Everything else here is either read-only reference data
//! ([`Template`]), a wire payload ([`ExcerptRequest`], [`ExcerptEvent`]), or a
//! projection returned to callers ([`StatusReport`], [`Artifact`]).
//!
//! ## Record invariants
//!
//! - `status == InProgress` implies `artifact_key == None`.
//! - `status == Failed` implies `status_details == Some(_)`.
//! - `owner_id` is written once at creation and never changes.

use crate::Error;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use core::{fmt, str::FromStr};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// Identifier of a generation request.
///
/// Rendered and parsed in the hyphenated UUID form. Anything else fails to
/// parse with [`Error::MalformedId`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExcerptId(Uuid);

impl ExcerptId {
    /// Generates a fresh random identifier.
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }
}

impl From<Uuid> for ExcerptId {
    fn from(value: Uuid) -> Self {
        Self(value)
    }
}

impl fmt::Display for ExcerptId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.hyphenated())
    }
}

impl FromStr for ExcerptId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|_| Error::MalformedId {
                value: s.to_string(),
            })
    }
}

/// Lifecycle state of a generation request.
///
/// This crate only ever writes `InProgress` (on creation) and `Failed` (on
/// publish compensation). `Completed` is written by the rendering worker.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExcerptStatus {
    InProgress,
    Completed,
    Failed,
}

impl ExcerptStatus {
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::InProgress => "IN_PROGRESS",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
        }
    }
}

impl fmt::Display for ExcerptStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Provenance headers copied verbatim from the caller. Never validated.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceContext {
    pub source_system: Option<String>,
    pub source_application: Option<String>,
    pub source_business_process: Option<String>,
    pub source_business_activity: Option<String>,
}

/// Keys of the two signature blobs relocated into durable storage.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignatureRefs {
    pub primary: String,
    pub derived: String,
}

/// Durable tracking entity for one excerpt-generation attempt.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExcerptRecord {
    pub id: ExcerptId,
    pub status: ExcerptStatus,
    pub status_details: Option<String>,
    pub owner_id: String,
    /// Declared output type of the resolved template, not the caller's
    /// template name.
    pub excerpt_type: String,
    pub signature_required: bool,
    pub source: SourceContext,
    pub signature_refs: Option<SignatureRefs>,
    pub artifact_key: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ExcerptRecord {
    /// Builds a fresh `IN_PROGRESS` record with no artifact.
    pub fn in_progress(
        owner_id: impl Into<String>,
        excerpt_type: impl Into<String>,
        signature_required: bool,
        source: SourceContext,
        signature_refs: Option<SignatureRefs>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: ExcerptId::generate(),
            status: ExcerptStatus::InProgress,
            status_details: None,
            owner_id: owner_id.into(),
            excerpt_type: excerpt_type.into(),
            signature_required,
            source,
            signature_refs,
            artifact_key: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn status_report(&self) -> StatusReport {
        StatusReport {
            status: self.status,
            status_details: self.status_details.clone(),
        }
    }
}

/// A named template and its declared output type (`pdf`, `docx`, `csv`, ...).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Template {
    pub name: String,
    pub content: String,
    pub declared_type: String,
}

/// Body of a create call.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExcerptRequest {
    /// Template name chosen by the caller. Absent reads as blank.
    #[serde(default)]
    pub excerpt_type: String,
    #[serde(default)]
    pub excerpt_input_data: Map<String, Value>,
    #[serde(default)]
    pub requires_system_signature: bool,
}

/// Generation event handed to the rendering worker.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExcerptEvent {
    pub record_id: ExcerptId,
    /// The caller's template name as sent on the request, so the worker can
    /// load the template it renders. This is not the resolved declared type:
    /// topic routing and the record's `excerpt_type` use `declared_type`.
    pub excerpt_type: String,
    pub excerpt_input_data: Map<String, Value>,
    pub requires_system_signature: bool,
}

impl ExcerptEvent {
    pub fn for_record(record: &ExcerptRecord, request: ExcerptRequest) -> Self {
        Self {
            record_id: record.id,
            excerpt_type: request.excerpt_type,
            excerpt_input_data: request.excerpt_input_data,
            requires_system_signature: record.signature_required,
        }
    }
}

/// Response of a successful create call.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExcerptCreated {
    pub excerpt_identifier: ExcerptId,
}

/// Read-only projection of a record's lifecycle state.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusReport {
    pub status: ExcerptStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_details: Option<String>,
}

/// A finished excerpt ready to be streamed to its owner.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Artifact {
    pub id: ExcerptId,
    pub content: Bytes,
    pub content_length: u64,
    /// Declared output type, used as the download's file extension.
    pub excerpt_type: String,
}

impl Artifact {
    /// Download filename hint: `<id>.<type>`.
    pub fn file_name(&self) -> String {
        format!("{}.{}", self.id, self.excerpt_type)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn excerpt_id_round_trips_through_display() {
        let id = ExcerptId::generate();
        let parsed: ExcerptId = id.to_string().parse().unwrap();
        assert_eq!(parsed, id);
    }

    #[test]
    fn malformed_id_is_rejected() {
        let err = "not-a-uuid".parse::<ExcerptId>().unwrap_err();
        assert!(matches!(err, Error::MalformedId { value } if value == "not-a-uuid"));
    }

    #[test]
    fn status_serializes_in_screaming_case() {
        let json = serde_json::to_string(&ExcerptStatus::InProgress).unwrap();
        assert_eq!(json, "\"IN_PROGRESS\"");
        assert!(ExcerptStatus::Failed.is_terminal());
        assert!(!ExcerptStatus::InProgress.is_terminal());
    }

    #[test]
    fn status_report_omits_missing_details() {
        let report = StatusReport {
            status: ExcerptStatus::InProgress,
            status_details: None,
        };
        assert_eq!(
            serde_json::to_value(&report).unwrap(),
            serde_json::json!({ "status": "IN_PROGRESS" })
        );
    }

    #[test]
    fn request_defaults_optional_fields() {
        let request: ExcerptRequest =
            serde_json::from_str(r#"{"excerptType":"lab-report"}"#).unwrap();
        assert_eq!(request.excerpt_type, "lab-report");
        assert!(request.excerpt_input_data.is_empty());
        assert!(!request.requires_system_signature);
    }

    #[test]
    fn artifact_file_name_uses_declared_type() {
        let id = ExcerptId::generate();
        let artifact = Artifact {
            id,
            content: Bytes::from_static(b"%PDF"),
            content_length: 4,
            excerpt_type: "pdf".into(),
        };
        assert_eq!(artifact.file_name(), format!("{id}.pdf"));
    }
}
