// SPDX-License-Identifier: MIT OR Apache-2.0
//! Typed view over the object store for one update prefix.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use ota_crypto::{HashAlgorithm, HashEncoding, create_hash};
use ota_error::{ErrorKind, OtaError, OtaResult};
use ota_storage::{ObjectStore, StorageError, StoredObject};
use ota_types::{MetadataJson, StoredMetadata, UpdateRef, files};
use std::sync::Arc;

/// Whether an update is a bundle or a rollback directive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateKind {
    /// A JS bundle plus assets.
    Normal,
    /// A rollback directive; carries no bundle.
    Rollback,
}

/// Parsed `metadata.json` together with its canonical bytes and hash.
///
/// The canonical bytes are the parsed structure re-serialized, so that the
/// fingerprint is stable under irrelevant formatting differences in the
/// uploaded file.
#[derive(Debug, Clone)]
pub struct UpdateMetadata {
    /// Parsed structure.
    pub json: MetadataJson,
    /// Canonical serialization used for hashing.
    pub canonical: Vec<u8>,
    /// Hex SHA-256 of the canonical bytes.
    pub content_hash: String,
    /// Creation time of the owning update, millisecond ISO form.
    pub created_at: String,
}

fn storage_err(err: StorageError) -> OtaError {
    OtaError::new(ErrorKind::Storage, "object store operation failed").with_source(err)
}

/// Typed operations over update prefixes.
#[derive(Clone)]
pub struct UpdateStore {
    store: Arc<dyn ObjectStore>,
}

impl UpdateStore {
    /// Wrap an object store.
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self { store }
    }

    /// The underlying object store.
    pub fn object_store(&self) -> &Arc<dyn ObjectStore> {
        &self.store
    }

    /// All branch names present in storage.
    pub async fn list_branches(&self) -> OtaResult<Vec<String>> {
        self.store
            .list_common_prefixes("")
            .await
            .map(|branches| {
                branches
                    .into_iter()
                    .filter(|name| !name.starts_with('.'))
                    .collect()
            })
            .map_err(storage_err)
    }

    /// Runtime versions published under a branch.
    pub async fn list_runtime_versions(&self, branch: &str) -> OtaResult<Vec<String>> {
        self.store
            .list_common_prefixes(&format!("{branch}/"))
            .await
            .map_err(storage_err)
    }

    /// Updates under `(branch, runtimeVersion)`, newest first.  Non-numeric
    /// directory names are ignored.
    pub async fn list_updates(
        &self,
        branch: &str,
        runtime_version: &str,
    ) -> OtaResult<Vec<UpdateRef>> {
        let names = self
            .store
            .list_common_prefixes(&format!("{branch}/{runtime_version}/"))
            .await
            .map_err(storage_err)?;
        let mut updates: Vec<UpdateRef> = names
            .into_iter()
            .filter_map(|name| name.parse::<i64>().ok())
            .map(|id| UpdateRef::new(branch, runtime_version, id))
            .collect();
        updates.sort_by(|a, b| b.update_id.cmp(&a.update_id));
        Ok(updates)
    }

    /// One file inside an update.
    pub async fn file(&self, update: &UpdateRef, path: &str) -> OtaResult<StoredObject> {
        self.store.get(&update.key(path)).await.map_err(|err| {
            if err.is_not_found() {
                OtaError::new(ErrorKind::Storage, "asset missing from committed update")
                    .with_context("update", update.prefix())
                    .with_context("path", path)
            } else {
                storage_err(err)
            }
        })
    }

    /// Whether a file exists inside an update.
    pub async fn file_exists(&self, update: &UpdateRef, path: &str) -> OtaResult<bool> {
        match self.store.get(&update.key(path)).await {
            Ok(_) => Ok(true),
            Err(err) if err.is_not_found() => Ok(false),
            Err(err) => Err(storage_err(err)),
        }
    }

    /// Parse `metadata.json`.  Missing file maps to `NotFound`, malformed
    /// content to `InvalidUpload`; both mean the update cannot be served.
    pub async fn metadata(&self, update: &UpdateRef) -> OtaResult<UpdateMetadata> {
        let object = self
            .store
            .get(&update.key(files::METADATA))
            .await
            .map_err(|err| {
                if err.is_not_found() {
                    OtaError::new(ErrorKind::NotFound, "metadata.json missing")
                        .with_context("update", update.prefix())
                } else {
                    storage_err(err)
                }
            })?;
        let json: MetadataJson = serde_json::from_slice(&object.bytes).map_err(|err| {
            OtaError::new(ErrorKind::InvalidUpload, "metadata.json is malformed")
                .with_context("update", update.prefix())
                .with_source(err)
        })?;
        let canonical = serde_json::to_vec(&json).map_err(|err| {
            OtaError::internal("failed to reserialize metadata").with_source(err)
        })?;
        let content_hash = create_hash(&canonical, HashAlgorithm::Sha256, HashEncoding::Hex);
        Ok(UpdateMetadata {
            json,
            canonical,
            content_hash,
            created_at: update.created_at_iso(),
        })
    }

    /// The verbatim `expoConfig.json` blob; absent reads as `{}`.
    pub async fn expo_config(&self, update: &UpdateRef) -> OtaResult<serde_json::Value> {
        match self.store.get(&update.key(files::EXPO_CONFIG)).await {
            Ok(object) => serde_json::from_slice(&object.bytes).map_err(|err| {
                OtaError::new(ErrorKind::InvalidUpload, "expoConfig.json is malformed")
                    .with_context("update", update.prefix())
                    .with_source(err)
            }),
            Err(err) if err.is_not_found() => Ok(serde_json::json!({})),
            Err(err) => Err(storage_err(err)),
        }
    }

    /// Server-assigned metadata, if present.
    pub async fn stored_metadata(&self, update: &UpdateRef) -> OtaResult<Option<StoredMetadata>> {
        match self.store.get(&update.key(files::STORED_METADATA)).await {
            Ok(object) => {
                let stored = serde_json::from_slice(&object.bytes).map_err(|err| {
                    OtaError::new(ErrorKind::Storage, "update-metadata.json is malformed")
                        .with_context("update", update.prefix())
                        .with_source(err)
                })?;
                Ok(Some(stored))
            }
            Err(err) if err.is_not_found() => Ok(None),
            Err(err) => Err(storage_err(err)),
        }
    }

    /// Write (or rewrite) the server-assigned metadata.
    pub async fn write_stored_metadata(
        &self,
        update: &UpdateRef,
        stored: &StoredMetadata,
    ) -> OtaResult<()> {
        let body = serde_json::to_vec(stored)
            .map_err(|err| OtaError::internal("failed to serialize stored metadata").with_source(err))?;
        self.store
            .put(&update.key(files::STORED_METADATA), Bytes::from(body))
            .await
            .map_err(storage_err)
    }

    /// Whether the commit witness exists.
    pub async fn is_committed(&self, update: &UpdateRef) -> OtaResult<bool> {
        self.file_exists(update, files::CHECK_SENTINEL).await
    }

    /// Write the commit witness.  Callers must write every other file of
    /// the update first.
    pub async fn mark_committed(&self, update: &UpdateRef) -> OtaResult<()> {
        self.store
            .put(&update.key(files::CHECK_SENTINEL), Bytes::new())
            .await
            .map_err(storage_err)
    }

    /// Modification time of the rollback sentinel, when the update is a
    /// rollback.
    pub async fn rollback_sentinel(&self, update: &UpdateRef) -> OtaResult<Option<DateTime<Utc>>> {
        match self.store.get(&update.key(files::ROLLBACK_SENTINEL)).await {
            Ok(object) => Ok(Some(object.last_modified)),
            Err(err) if err.is_not_found() => Ok(None),
            Err(err) => Err(storage_err(err)),
        }
    }

    /// Write the rollback sentinel.
    pub async fn write_rollback_sentinel(&self, update: &UpdateRef) -> OtaResult<()> {
        self.store
            .put(&update.key(files::ROLLBACK_SENTINEL), Bytes::new())
            .await
            .map_err(storage_err)
    }

    /// Whether the update is a bundle or a rollback directive.
    pub async fn update_kind(&self, update: &UpdateRef) -> OtaResult<UpdateKind> {
        Ok(match self.rollback_sentinel(update).await? {
            Some(_) => UpdateKind::Rollback,
            None => UpdateKind::Normal,
        })
    }

    /// Remove the entire update prefix.
    pub async fn delete_update(&self, update: &UpdateRef) -> OtaResult<()> {
        self.store
            .delete_prefix(&update.prefix())
            .await
            .map_err(storage_err)
    }

    /// Copy an update tree into a new id, excluding `skip_names`.
    pub async fn copy_update(
        &self,
        src: &UpdateRef,
        dst: &UpdateRef,
        skip_names: &[&str],
    ) -> OtaResult<()> {
        self.store
            .copy_prefix(&src.prefix(), &dst.prefix(), skip_names)
            .await
            .map_err(storage_err)
    }
}
