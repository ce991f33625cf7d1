// SPDX-License-Identifier: MIT OR Apache-2.0
//! Filesystem-backed object store.
//!
//! Keys map directly to paths below a base directory.  Presigned PUT URLs
//! are synthesized by minting a short-lived HS256 token and pointing the
//! uploader back at this server's `/uploadLocalFile` endpoint; the
//! companion handler validates the token with
//! [`validate_upload_token`] and writes the body to the claimed key.

use crate::{ObjectStore, StorageError, StoredObject, base_name, validate_key};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::StreamExt;
use futures::stream::FuturesUnordered;
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

/// Upper bound on upload-token lifetime.
pub const MAX_UPLOAD_TOKEN_TTL: Duration = Duration::from_secs(10 * 60);

/// Action claim carried by upload tokens.
const UPLOAD_ACTION: &str = "uploadLocalFile";

/// Settings for synthesizing presigned upload URLs.
#[derive(Debug, Clone)]
pub struct UploadTokenConfig {
    /// Public base URL of this server.
    pub base_url: String,
    /// HS256 secret shared with the upload handler.
    pub jwt_secret: String,
    /// Operator identity pinned into the token subject.
    pub operator_id: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct UploadTokenClaims {
    sub: String,
    exp: i64,
    #[serde(rename = "filePath")]
    file_path: String,
    action: String,
}

/// Validate an upload token and return the object key it authorizes.
pub fn validate_upload_token(
    token: &str,
    jwt_secret: &str,
    operator_id: &str,
) -> Result<String, StorageError> {
    let decoded = jsonwebtoken::decode::<UploadTokenClaims>(
        token,
        &DecodingKey::from_secret(jwt_secret.as_bytes()),
        &Validation::default(),
    )?;
    let claims = decoded.claims;
    if claims.action != UPLOAD_ACTION {
        return Err(StorageError::Token(format!(
            "unexpected action: {}",
            claims.action
        )));
    }
    if claims.sub != operator_id {
        return Err(StorageError::Token("token subject mismatch".to_string()));
    }
    validate_key(&claims.file_path)?;
    Ok(claims.file_path)
}

/// Object store rooted at a local directory.
pub struct FsStore {
    base: PathBuf,
    tokens: UploadTokenConfig,
}

impl FsStore {
    /// Create a store rooted at `base_path`.
    pub fn new(base_path: impl AsRef<Path>, tokens: UploadTokenConfig) -> Self {
        Self {
            base: base_path.as_ref().to_path_buf(),
            tokens,
        }
    }

    fn path_for(&self, key: &str) -> Result<PathBuf, StorageError> {
        validate_key(key)?;
        Ok(self.base.join(key))
    }

    fn io_err(path: &Path, source: std::io::Error) -> StorageError {
        StorageError::Io {
            path: path.display().to_string(),
            source,
        }
    }
}

#[async_trait]
impl ObjectStore for FsStore {
    async fn list_common_prefixes(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
        let dir = if prefix.is_empty() {
            self.base.clone()
        } else {
            self.path_for(prefix.trim_end_matches('/'))?
        };
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(Self::io_err(&dir, err)),
        };
        let mut names = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|err| Self::io_err(&dir, err))?
        {
            let is_dir = entry
                .file_type()
                .await
                .map_err(|err| Self::io_err(&entry.path(), err))?
                .is_dir();
            if is_dir {
                names.push(entry.file_name().to_string_lossy().into_owned());
            }
        }
        names.sort();
        Ok(names)
    }

    async fn list_objects(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
        let dir = if prefix.is_empty() {
            self.base.clone()
        } else {
            self.path_for(prefix.trim_end_matches('/'))?
        };
        let base = self.base.clone();
        // Directory walks are blocking; do them off the runtime.
        tokio::task::spawn_blocking(move || {
            if !dir.exists() {
                return Ok(Vec::new());
            }
            let mut keys = Vec::new();
            for entry in walkdir::WalkDir::new(&dir) {
                let entry = entry.map_err(|err| StorageError::Io {
                    path: dir.display().to_string(),
                    source: err.into(),
                })?;
                if entry.file_type().is_file() {
                    if let Ok(rel) = entry.path().strip_prefix(&base) {
                        keys.push(rel.to_string_lossy().replace('\\', "/"));
                    }
                }
            }
            keys.sort();
            Ok(keys)
        })
        .await
        .map_err(|err| StorageError::Io {
            path: prefix.to_string(),
            source: std::io::Error::other(err),
        })?
    }

    async fn get(&self, key: &str) -> Result<StoredObject, StorageError> {
        let path = self.path_for(key)?;
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Err(StorageError::NotFound {
                    key: key.to_string(),
                });
            }
            Err(err) => return Err(Self::io_err(&path, err)),
        };
        let metadata = tokio::fs::metadata(&path)
            .await
            .map_err(|err| Self::io_err(&path, err))?;
        let last_modified = metadata
            .modified()
            .map(DateTime::<Utc>::from)
            .unwrap_or_else(|_| Utc::now());
        Ok(StoredObject {
            bytes: Bytes::from(bytes),
            last_modified,
        })
    }

    async fn put(&self, key: &str, bytes: Bytes) -> Result<(), StorageError> {
        let path = self.path_for(key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|err| Self::io_err(parent, err))?;
        }
        tokio::fs::write(&path, &bytes)
            .await
            .map_err(|err| Self::io_err(&path, err))
    }

    async fn delete_prefix(&self, prefix: &str) -> Result<(), StorageError> {
        let path = self.path_for(prefix.trim_end_matches('/'))?;
        match tokio::fs::remove_dir_all(&path).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(Self::io_err(&path, err)),
        }
    }

    async fn presign_put(&self, key: &str, ttl: Duration) -> Result<String, StorageError> {
        validate_key(key)?;
        let ttl = ttl.min(MAX_UPLOAD_TOKEN_TTL);
        let claims = UploadTokenClaims {
            sub: self.tokens.operator_id.clone(),
            exp: (Utc::now() + ttl).timestamp(),
            file_path: key.to_string(),
            action: UPLOAD_ACTION.to_string(),
        };
        let token = jsonwebtoken::encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(self.tokens.jwt_secret.as_bytes()),
        )?;
        let mut url = Url::parse(&self.tokens.base_url)
            .map_err(|err| StorageError::Token(format!("invalid base url: {err}")))?;
        url.path_segments_mut()
            .map_err(|_| StorageError::Token("base url cannot be a base".to_string()))?
            .pop_if_empty()
            .push("uploadLocalFile");
        url.query_pairs_mut().append_pair("token", &token);
        Ok(url.to_string())
    }

    async fn copy_prefix(
        &self,
        src_prefix: &str,
        dst_prefix: &str,
        skip_names: &[&str],
    ) -> Result<(), StorageError> {
        let src_prefix = src_prefix.trim_end_matches('/');
        let dst_prefix = dst_prefix.trim_end_matches('/');
        let keys = self.list_objects(src_prefix).await?;

        let mut pending = FuturesUnordered::new();
        let mut keys = keys
            .into_iter()
            .filter(|key| !skip_names.contains(&base_name(key)))
            .collect::<Vec<_>>();
        let concurrency = num_cpus::get().max(1);

        // Disk-bound fan-out, bounded by the CPU count.
        loop {
            while pending.len() < concurrency {
                let Some(key) = keys.pop() else { break };
                let relative = key
                    .strip_prefix(src_prefix)
                    .unwrap_or(&key)
                    .trim_start_matches('/')
                    .to_string();
                let src = self.path_for(&key)?;
                let dst = self.path_for(&format!("{dst_prefix}/{relative}"))?;
                pending.push(async move {
                    if let Some(parent) = dst.parent() {
                        tokio::fs::create_dir_all(parent)
                            .await
                            .map_err(|err| FsStore::io_err(parent, err))?;
                    }
                    tokio::fs::copy(&src, &dst)
                        .await
                        .map_err(|err| FsStore::io_err(&src, err))?;
                    Ok::<(), StorageError>(())
                });
            }
            match pending.next().await {
                Some(result) => result?,
                None => break,
            }
        }
        Ok(())
    }
}
