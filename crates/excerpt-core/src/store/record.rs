//! Record store: the single source of truth for request lifecycle state.
//!
//! Every status write goes through [`RecordStore::transition`], an atomic
//! conditional update keyed by record id. Two writers exist for a given
//! record: compensation (this crate, [`StatusChange::Failed`]) and the
//! rendering worker ([`StatusChange::Completed`]). The guard in
//! [`StatusChange::applies_to`] keeps compensation from clobbering a terminal
//! state.

use crate::{ExcerptId, ExcerptRecord, ExcerptStatus};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::HashMap;

#[derive(Clone, thiserror::Error, Debug, PartialEq, Eq)]
pub enum StoreError {
    #[error("Record store unavailable: {reason}")]
    Unavailable { reason: String },

    #[error("Record {id} already exists")]
    Duplicate { id: ExcerptId },
}

/// A status write requested against one record.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StatusChange {
    /// Written by the rendering worker once the artifact is in storage.
    Completed { artifact_key: String },
    /// Written by publish compensation.
    Failed { details: String },
}

impl StatusChange {
    /// Whether this change may be applied to a record currently in `current`.
    ///
    /// `Failed` only lands on `IN_PROGRESS`. `Completed` lands on
    /// `IN_PROGRESS` or `FAILED` but never repeats.
    pub const fn applies_to(&self, current: ExcerptStatus) -> bool {
        match self {
            Self::Failed { .. } => matches!(current, ExcerptStatus::InProgress),
            Self::Completed { .. } => !matches!(current, ExcerptStatus::Completed),
        }
    }

    fn apply(self, record: &mut ExcerptRecord, at: DateTime<Utc>) {
        match self {
            Self::Completed { artifact_key } => {
                record.status = ExcerptStatus::Completed;
                record.status_details = None;
                record.artifact_key = Some(artifact_key);
            }
            Self::Failed { details } => {
                record.status = ExcerptStatus::Failed;
                record.status_details = Some(details);
            }
        }
        record.updated_at = at;
    }
}

/// Outcome of a conditional transition.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Transition {
    Applied,
    /// The record was in a state the change may not overwrite.
    Skipped { current: ExcerptStatus },
    Missing,
}

#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Persists a new record.
    async fn insert(&self, record: ExcerptRecord) -> Result<(), StoreError>;

    async fn find(&self, id: &ExcerptId) -> Result<Option<ExcerptRecord>, StoreError>;

    /// Applies `change` atomically if the record's current state allows it.
    async fn transition(
        &self,
        id: &ExcerptId,
        change: StatusChange,
        at: DateTime<Utc>,
    ) -> Result<Transition, StoreError>;
}

/// Process-local record store.
#[derive(Debug, Default)]
pub struct InMemoryRecordStore {
    records: Mutex<HashMap<ExcerptId, ExcerptRecord>>,
}

impl InMemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }
}

#[async_trait]
impl RecordStore for InMemoryRecordStore {
    async fn insert(&self, record: ExcerptRecord) -> Result<(), StoreError> {
        let mut records = self.records.lock();
        if records.contains_key(&record.id) {
            return Err(StoreError::Duplicate { id: record.id });
        }
        records.insert(record.id, record);
        Ok(())
    }

    async fn find(&self, id: &ExcerptId) -> Result<Option<ExcerptRecord>, StoreError> {
        Ok(self.records.lock().get(id).cloned())
    }

    async fn transition(
        &self,
        id: &ExcerptId,
        change: StatusChange,
        at: DateTime<Utc>,
    ) -> Result<Transition, StoreError> {
        let mut records = self.records.lock();
        let Some(record) = records.get_mut(id) else {
            return Ok(Transition::Missing);
        };
        if !change.applies_to(record.status) {
            return Ok(Transition::Skipped {
                current: record.status,
            });
        }
        change.apply(record, at);
        Ok(Transition::Applied)
    }
}
