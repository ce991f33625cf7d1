// SPDX-License-Identifier: MIT OR Apache-2.0
//! Object-store abstraction and backends for the update tree.
//!
//! Updates live under slash-joined keys of the form
//! `branch/runtimeVersion/updateId/<file>`.  The [`ObjectStore`] trait
//! exposes prefix listing, blob get/put, prefix deletion, presigned PUT
//! URLs, bulk prefix copies, and the persisted migration-history log.  Two
//! backends are provided: [`fs::FsStore`] for a local directory tree and
//! [`s3::S3Store`] for S3-compatible object storage.

#![deny(unsafe_code)]

pub mod fs;
pub mod s3;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use ota_config::StorageConfig;
use std::sync::Arc;
use std::time::Duration;

/// Name of the top-level migration-history object.
const MIGRATION_HISTORY_KEY: &str = ".migrationhistory";

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors produced by object-store backends.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// The requested key does not exist.
    #[error("object not found: {key}")]
    NotFound {
        /// Key that was requested.
        key: String,
    },

    /// Filesystem I/O failed.
    #[error("i/o error on {path}: {source}")]
    Io {
        /// Path involved.
        path: String,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// An S3 call failed.
    #[error("s3 error: {0}")]
    S3(String),

    /// The key would escape the store namespace.
    #[error("invalid object key: {0}")]
    InvalidKey(String),

    /// An upload token failed validation.
    #[error("upload token rejected: {0}")]
    Token(String),

    /// JWT encode/decode failed.
    #[error("jwt error: {0}")]
    Jwt(#[from] jsonwebtoken::errors::Error),
}

impl StorageError {
    /// Whether the error is a missing-object miss rather than a failure.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

// ---------------------------------------------------------------------------
// ObjectStore
// ---------------------------------------------------------------------------

/// A blob fetched from the store.
#[derive(Debug, Clone)]
pub struct StoredObject {
    /// Object contents.
    pub bytes: Bytes,
    /// Last-modified time reported by the backend.
    pub last_modified: DateTime<Utc>,
}

/// Opaque blob namespace keyed by slash-joined paths.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Immediate child names under a `/`-terminated (or empty) prefix.
    async fn list_common_prefixes(&self, prefix: &str) -> Result<Vec<String>, StorageError>;

    /// Every key below a prefix.
    async fn list_objects(&self, prefix: &str) -> Result<Vec<String>, StorageError>;

    /// Fetch one object.
    async fn get(&self, key: &str) -> Result<StoredObject, StorageError>;

    /// Store one object, creating any intermediate structure.
    async fn put(&self, key: &str, bytes: Bytes) -> Result<(), StorageError>;

    /// Remove every object below a prefix.  Removing an absent prefix is a
    /// no-op.
    async fn delete_prefix(&self, prefix: &str) -> Result<(), StorageError>;

    /// Produce a presigned PUT URL for a key.
    async fn presign_put(&self, key: &str, ttl: Duration) -> Result<String, StorageError>;

    /// Copy every object from `src_prefix` to `dst_prefix`, skipping files
    /// whose base name appears in `skip_names`.
    async fn copy_prefix(
        &self,
        src_prefix: &str,
        dst_prefix: &str,
        skip_names: &[&str],
    ) -> Result<(), StorageError>;

    /// Applied migration ids, oldest first.  An absent history reads as
    /// empty.
    async fn read_migration_history(&self) -> Result<Vec<String>, StorageError> {
        match self.get(MIGRATION_HISTORY_KEY).await {
            Ok(object) => Ok(String::from_utf8_lossy(&object.bytes)
                .lines()
                .map(str::trim)
                .filter(|line| !line.is_empty())
                .map(str::to_string)
                .collect()),
            Err(err) if err.is_not_found() => Ok(Vec::new()),
            Err(err) => Err(err),
        }
    }

    /// Record a migration id at the end of the history.
    async fn append_migration_history(&self, id: &str) -> Result<(), StorageError> {
        let mut history = self.read_migration_history().await?;
        history.push(id.to_string());
        self.put(
            MIGRATION_HISTORY_KEY,
            Bytes::from(format!("{}\n", history.join("\n"))),
        )
        .await
    }

    /// Remove a migration id from the history.
    async fn remove_migration_history(&self, id: &str) -> Result<(), StorageError> {
        let history: Vec<String> = self
            .read_migration_history()
            .await?
            .into_iter()
            .filter(|entry| entry != id)
            .collect();
        let body = if history.is_empty() {
            String::new()
        } else {
            format!("{}\n", history.join("\n"))
        };
        self.put(MIGRATION_HISTORY_KEY, Bytes::from(body)).await
    }
}

/// Reject keys that could escape the store namespace.
pub(crate) fn validate_key(key: &str) -> Result<(), StorageError> {
    if key.is_empty()
        || key.starts_with('/')
        || key.split('/').any(|part| part.is_empty() || part == "." || part == "..")
    {
        return Err(StorageError::InvalidKey(key.to_string()));
    }
    Ok(())
}

/// Base name of a slash-joined key.
pub(crate) fn base_name(key: &str) -> &str {
    key.rsplit('/').next().unwrap_or(key)
}

/// Build the store selected by the configuration.
///
/// The filesystem backend synthesizes presigned URLs pointing back at this
/// server, so it needs the upload-token settings; the S3 backend ignores
/// them.
pub async fn store_from_config(
    storage: &StorageConfig,
    tokens: fs::UploadTokenConfig,
) -> Arc<dyn ObjectStore> {
    match storage {
        StorageConfig::Local { base_path } => Arc::new(fs::FsStore::new(base_path, tokens)),
        StorageConfig::S3 {
            bucket,
            region,
            base_endpoint,
        } => Arc::new(s3::S3Store::new(bucket.clone(), region.clone(), base_endpoint.clone()).await),
    }
}
