//! Bucket/key object storage.
//!
//! The contract is deliberately small: `get` returns the bytes or `None`, and
//! `put` overwrites unconditionally. Buckets are provisioned out of band; a
//! request against a bucket that does not exist is reported as
//! [`StorageError::Misconfiguration`], never as a missing object.

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::RwLock;
use std::{
    collections::HashMap,
    io::ErrorKind,
    path::PathBuf,
};

#[derive(Clone, thiserror::Error, Debug, PartialEq, Eq)]
pub enum StorageError {
    /// The backend could not be reached or failed mid-call.
    #[error("Object storage unavailable: {reason}")]
    Communication { reason: String },

    /// The deployment points at a bucket or root that does not exist.
    #[error("Object storage misconfigured: {reason}")]
    Misconfiguration { reason: String },

    /// The key cannot name an object.
    #[error("Invalid object key: {key:?}")]
    InvalidKey { key: String },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StoredObject {
    pub content: Bytes,
    pub content_length: u64,
}

impl From<Bytes> for StoredObject {
    fn from(content: Bytes) -> Self {
        Self {
            content_length: content.len() as u64,
            content,
        }
    }
}

#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn get(&self, bucket: &str, key: &str) -> Result<Option<StoredObject>, StorageError>;

    async fn put(&self, bucket: &str, key: &str, content: Bytes) -> Result<(), StorageError>;
}

/// A key is a single path-free segment.
fn is_valid_key(key: &str) -> bool {
    !key.is_empty()
        && key != "."
        && key != ".."
        && !key.contains(['/', '\\'])
        && !key.contains('\0')
}

fn missing_bucket(bucket: &str) -> StorageError {
    StorageError::Misconfiguration {
        reason: format!("bucket `{bucket}` does not exist"),
    }
}

/// Object store held in process memory.
#[derive(Debug, Default)]
pub struct InMemoryObjectStore {
    buckets: RwLock<HashMap<String, HashMap<String, Bytes>>>,
}

impl InMemoryObjectStore {
    /// Creates a store with the given (empty) buckets provisioned.
    pub fn with_buckets<I, S>(buckets: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            buckets: RwLock::new(
                buckets
                    .into_iter()
                    .map(|bucket| (bucket.into(), HashMap::new()))
                    .collect(),
            ),
        }
    }

    pub fn contains(&self, bucket: &str, key: &str) -> bool {
        self.buckets
            .read()
            .get(bucket)
            .is_some_and(|objects| objects.contains_key(key))
    }
}

#[async_trait]
impl ObjectStore for InMemoryObjectStore {
    async fn get(&self, bucket: &str, key: &str) -> Result<Option<StoredObject>, StorageError> {
        let buckets = self.buckets.read();
        let objects = buckets.get(bucket).ok_or_else(|| missing_bucket(bucket))?;
        if !is_valid_key(key) {
            return Ok(None);
        }
        Ok(objects.get(key).cloned().map(StoredObject::from))
    }

    async fn put(&self, bucket: &str, key: &str, content: Bytes) -> Result<(), StorageError> {
        let mut buckets = self.buckets.write();
        let objects = buckets
            .get_mut(bucket)
            .ok_or_else(|| missing_bucket(bucket))?;
        if !is_valid_key(key) {
            return Err(StorageError::InvalidKey {
                key: key.to_string(),
            });
        }
        objects.insert(key.to_string(), content);
        Ok(())
    }
}

/// Object store rooted at a local directory: `<root>/<bucket>/<key>`.
#[derive(Clone, Debug)]
pub struct FsObjectStore {
    root: PathBuf,
}

impl FsObjectStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    async fn bucket_dir(&self, bucket: &str) -> Result<PathBuf, StorageError> {
        if !is_valid_key(bucket) {
            return Err(missing_bucket(bucket));
        }
        let dir = self.root.join(bucket);
        match tokio::fs::metadata(&dir).await {
            Ok(meta) if meta.is_dir() => Ok(dir),
            Ok(_) => Err(missing_bucket(bucket)),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(missing_bucket(bucket)),
            Err(e) => Err(communication(&e)),
        }
    }
}

fn communication(e: &std::io::Error) -> StorageError {
    StorageError::Communication {
        reason: e.to_string(),
    }
}

#[async_trait]
impl ObjectStore for FsObjectStore {
    async fn get(&self, bucket: &str, key: &str) -> Result<Option<StoredObject>, StorageError> {
        let dir = self.bucket_dir(bucket).await?;
        if !is_valid_key(key) {
            return Ok(None);
        }
        match tokio::fs::read(dir.join(key)).await {
            Ok(content) => Ok(Some(StoredObject::from(Bytes::from(content)))),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(communication(&e)),
        }
    }

    async fn put(&self, bucket: &str, key: &str, content: Bytes) -> Result<(), StorageError> {
        let dir = self.bucket_dir(bucket).await?;
        if !is_valid_key(key) {
            return Err(StorageError::InvalidKey {
                key: key.to_string(),
            });
        }

        // Write to a sibling then rename, so readers never see a partial object.
        let staged = dir.join(format!(".{key}.{}", uuid::Uuid::new_v4().simple()));
        tokio::fs::write(&staged, &content)
            .await
            .map_err(|e| communication(&e))?;
        if let Err(e) = tokio::fs::rename(&staged, dir.join(key)).await {
            let _ = tokio::fs::remove_file(&staged).await;
            return Err(communication(&e));
        }
        Ok(())
    }
}
