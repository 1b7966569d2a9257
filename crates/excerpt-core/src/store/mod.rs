//! Storage contracts consumed by the service, with in-process and `SQLite` backends.
//!
//! - [`record`] - the [`RecordStore`] holding generation records and applying
//!   atomic conditional status transitions.
//! - [`sqlite`] - the durable [`SqliteRecordStore`] backend.
//! - [`object`] - the bucket/key [`ObjectStore`] used for signature blobs and
//!   rendered artifacts.
//! - [`template`] - the read-only [`TemplateStore`].

pub mod object;
pub mod record;
pub mod sqlite;
pub mod template;

pub use object::{FsObjectStore, InMemoryObjectStore, ObjectStore, StorageError, StoredObject};
pub use record::{InMemoryRecordStore, RecordStore, StatusChange, StoreError, Transition};
pub use sqlite::SqliteRecordStore;
pub use template::{InMemoryTemplateStore, TemplateStore};

use core::{future::Future, time::Duration};

/// Bounds one object-storage call; running out of time counts as a
/// communication failure.
pub(crate) async fn bounded<T>(
    limit: Duration,
    call: impl Future<Output = Result<T, StorageError>>,
) -> Result<T, StorageError> {
    tokio::time::timeout(limit, call)
        .await
        .unwrap_or_else(|_| {
            Err(StorageError::Communication {
                reason: format!("storage call exceeded {limit:?}"),
            })
        })
}

/// Bounds one record-store call; running out of time counts as the store
/// being unavailable.
pub(crate) async fn bounded_record<T>(
    limit: Duration,
    call: impl Future<Output = Result<T, StoreError>>,
) -> Result<T, StoreError> {
    tokio::time::timeout(limit, call)
        .await
        .unwrap_or_else(|_| {
            Err(StoreError::Unavailable {
                reason: format!("record store call exceeded {limit:?}"),
            })
        })
}
