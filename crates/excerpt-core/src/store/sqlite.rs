//! `SQLite`-backed [`RecordStore`].
//!
//! One connection behind a mutex; every call hops onto the blocking pool so
//! `SQLite` I/O never stalls the async runtime. Status writes are a single
//! conditional `UPDATE`, so compensation and the rendering worker can race on
//! the same row without either overwriting a state it may not replace.

use super::record::{RecordStore, StatusChange, StoreError, Transition};
use crate::{ExcerptId, ExcerptRecord, ExcerptStatus, SignatureRefs, SourceContext};
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{Connection, ErrorCode, OptionalExtension, Row, params, types::Type};
use std::{
    path::Path,
    sync::{Arc, Mutex},
};
use uuid::Uuid;

const SCHEMA: &str = "CREATE TABLE IF NOT EXISTS excerpt_records (
    id TEXT PRIMARY KEY NOT NULL,
    status TEXT NOT NULL,
    status_details TEXT,
    owner_id TEXT NOT NULL,
    excerpt_type TEXT NOT NULL,
    signature_required INTEGER NOT NULL,
    source_system TEXT,
    source_application TEXT,
    source_business_process TEXT,
    source_business_activity TEXT,
    signature_primary TEXT,
    signature_derived TEXT,
    artifact_key TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
)";

const SELECT_RECORD: &str = "SELECT id, status, status_details, owner_id, excerpt_type,
    signature_required, source_system, source_application, source_business_process,
    source_business_activity, signature_primary, signature_derived, artifact_key,
    created_at, updated_at
    FROM excerpt_records WHERE id = ?1";

const STATUSES: [ExcerptStatus; 3] = [
    ExcerptStatus::InProgress,
    ExcerptStatus::Completed,
    ExcerptStatus::Failed,
];

/// Record store persisted to a single `SQLite` database file.
#[derive(Clone, Debug)]
pub struct SqliteRecordStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteRecordStore {
    /// Opens (or creates) the database at `path` and ensures the schema.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        let conn = Connection::open(path).map_err(|e| StoreError::Unavailable {
            reason: format!("failed to open {}: {e}", path.display()),
        })?;
        Self::init(conn)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory().map_err(unavailable)?;
        Self::init(conn)
    }

    fn init(conn: Connection) -> Result<Self, StoreError> {
        conn.execute(SCHEMA, []).map_err(unavailable)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    async fn with_conn<T, F>(&self, op: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T, StoreError> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let guard = conn.lock().map_err(|e| StoreError::Unavailable {
                reason: format!("record store mutex poisoned: {e}"),
            })?;
            op(&guard)
        })
        .await
        .map_err(|e| StoreError::Unavailable {
            reason: format!("spawn_blocking failed: {e}"),
        })?
    }
}

#[async_trait]
impl RecordStore for SqliteRecordStore {
    async fn insert(&self, record: ExcerptRecord) -> Result<(), StoreError> {
        self.with_conn(move |conn| {
            let refs = record.signature_refs.as_ref();
            let inserted = conn.execute(
                "INSERT INTO excerpt_records (id, status, status_details, owner_id,
                    excerpt_type, signature_required, source_system, source_application,
                    source_business_process, source_business_activity, signature_primary,
                    signature_derived, artifact_key, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)",
                params![
                    record.id.to_string(),
                    record.status.as_str(),
                    record.status_details,
                    record.owner_id,
                    record.excerpt_type,
                    record.signature_required,
                    record.source.source_system,
                    record.source.source_application,
                    record.source.source_business_process,
                    record.source.source_business_activity,
                    refs.map(|r| r.primary.as_str()),
                    refs.map(|r| r.derived.as_str()),
                    record.artifact_key,
                    timestamp(record.created_at),
                    timestamp(record.updated_at),
                ],
            );
            match inserted {
                Ok(_) => Ok(()),
                Err(e) if e.sqlite_error_code() == Some(ErrorCode::ConstraintViolation) => {
                    Err(StoreError::Duplicate { id: record.id })
                }
                Err(e) => Err(unavailable(e)),
            }
        })
        .await
    }

    async fn find(&self, id: &ExcerptId) -> Result<Option<ExcerptRecord>, StoreError> {
        let id = id.to_string();
        self.with_conn(move |conn| {
            conn.query_row(SELECT_RECORD, params![id], read_record)
                .optional()
                .map_err(unavailable)
        })
        .await
    }

    async fn transition(
        &self,
        id: &ExcerptId,
        change: StatusChange,
        at: DateTime<Utc>,
    ) -> Result<Transition, StoreError> {
        let id = id.to_string();
        self.with_conn(move |conn| {
            let allowed = allowed_statuses(&change);
            let at = timestamp(at);
            let changed = match change {
                StatusChange::Completed { artifact_key } => conn.execute(
                    &format!(
                        "UPDATE excerpt_records
                         SET status = 'COMPLETED', status_details = NULL,
                             artifact_key = ?1, updated_at = ?2
                         WHERE id = ?3 AND status IN ({allowed})"
                    ),
                    params![artifact_key, at, id],
                ),
                StatusChange::Failed { details } => conn.execute(
                    &format!(
                        "UPDATE excerpt_records
                         SET status = 'FAILED', status_details = ?1, updated_at = ?2
                         WHERE id = ?3 AND status IN ({allowed})"
                    ),
                    params![details, at, id],
                ),
            }
            .map_err(unavailable)?;
            if changed > 0 {
                return Ok(Transition::Applied);
            }

            // Same guard, so the row cannot move between the update and this read.
            let current: Option<String> = conn
                .query_row(
                    "SELECT status FROM excerpt_records WHERE id = ?1",
                    params![id],
                    |row| row.get(0),
                )
                .optional()
                .map_err(unavailable)?;
            match current {
                None => Ok(Transition::Missing),
                Some(raw) => parse_status(&raw)
                    .map(|current| Transition::Skipped { current })
                    .ok_or_else(|| StoreError::Unavailable {
                        reason: format!("record {id} has unknown status {raw}"),
                    }),
            }
        })
        .await
    }
}

/// Quoted `IN (...)` list of the states `change` may overwrite.
fn allowed_statuses(change: &StatusChange) -> String {
    STATUSES
        .iter()
        .filter(|status| change.applies_to(**status))
        .map(|status| format!("'{}'", status.as_str()))
        .collect::<Vec<_>>()
        .join(", ")
}

fn parse_status(raw: &str) -> Option<ExcerptStatus> {
    STATUSES.into_iter().find(|status| status.as_str() == raw)
}

fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

fn read_record(row: &Row<'_>) -> rusqlite::Result<ExcerptRecord> {
    let id: String = row.get(0)?;
    let id = Uuid::parse_str(&id)
        .map(ExcerptId::from)
        .map_err(|e| conversion(0, e))?;
    let status: String = row.get(1)?;
    let status = parse_status(&status)
        .ok_or_else(|| conversion(1, format!("unknown status {status}")))?;

    let primary: Option<String> = row.get(10)?;
    let derived: Option<String> = row.get(11)?;
    let signature_refs = match (primary, derived) {
        (Some(primary), Some(derived)) => Some(SignatureRefs { primary, derived }),
        _ => None,
    };

    Ok(ExcerptRecord {
        id,
        status,
        status_details: row.get(2)?,
        owner_id: row.get(3)?,
        excerpt_type: row.get(4)?,
        signature_required: row.get(5)?,
        source: SourceContext {
            source_system: row.get(6)?,
            source_application: row.get(7)?,
            source_business_process: row.get(8)?,
            source_business_activity: row.get(9)?,
        },
        signature_refs,
        artifact_key: row.get(12)?,
        created_at: read_timestamp(row, 13)?,
        updated_at: read_timestamp(row, 14)?,
    })
}

fn read_timestamp(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|at| at.with_timezone(&Utc))
        .map_err(|e| conversion(idx, e))
}

fn conversion(
    idx: usize,
    err: impl Into<Box<dyn std::error::Error + Send + Sync>>,
) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, err.into())
}

fn unavailable(err: rusqlite::Error) -> StoreError {
    StoreError::Unavailable {
        reason: err.to_string(),
    }
}
