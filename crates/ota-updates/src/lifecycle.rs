// SPDX-License-Identifier: MIT OR Apache-2.0
//! The update lifecycle state machine.
//!
//! Upload-begin mints an id and hands out presigned PUT slots; finalize
//! validates the uploaded tree, dedups it against the current head, and
//! commits by writing `update-metadata.json` (now carrying the update UUID)
//! followed by the `.check` witness.  Validation is fail-closed: any
//! problem deletes the whole update prefix before the error is returned,
//! so storage never accumulates half-committed updates.

use crate::keys;
use crate::store::{UpdateKind, UpdateMetadata, UpdateStore};
use async_trait::async_trait;
use ota_cache::KvCache;
use ota_crypto::{HashAlgorithm, HashEncoding, create_hash, sha256_hash_to_uuid};
use ota_error::{ErrorKind, OtaError, OtaResult};
use ota_types::{Platform, StoredMetadata, UpdateRef, UploadRequest, files};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{info, warn};

/// TTL of the cached head; a safety net behind explicit invalidation.
pub const HEAD_CACHE_TTL: Duration = Duration::from_secs(1800);

/// TTL of the single-flight lock around a head listing.
const HEAD_LOCK_TTL: Duration = Duration::from_secs(10);

/// How long a loser of the single-flight race polls the cache before
/// falling back to its own listing.
const HEAD_WAIT_ATTEMPTS: u32 = 10;
const HEAD_WAIT_STEP: Duration = Duration::from_millis(50);

/// Lifetime requested for presigned upload URLs.
const UPLOAD_URL_TTL: Duration = Duration::from_secs(15 * 60);

// ---------------------------------------------------------------------------
// Fingerprints and UUIDs
// ---------------------------------------------------------------------------

/// Content fingerprint of an update scoped to `(branch, runtimeVersion)`.
///
/// Independent of the update id, so republished identical content hashes
/// identically and dedup can catch it.
pub fn fingerprint(metadata: &UpdateMetadata, branch: &str, runtime_version: &str) -> String {
    let mut input = metadata.canonical.clone();
    input.extend_from_slice(format!("::{branch}::{runtime_version}").as_bytes());
    create_hash(&input, HashAlgorithm::Sha256, HashEncoding::Hex)
}

/// Deterministic UUID of a committed update.  Unlike [`fingerprint`] the
/// update id participates, so recommits of the same bytes under new ids get
/// new identities on the wire.
pub fn update_uuid(
    metadata: &UpdateMetadata,
    update_id: i64,
    branch: &str,
    runtime_version: &str,
) -> String {
    let mut input = metadata.canonical.clone();
    input.extend_from_slice(format!("::{update_id}::{branch}::{runtime_version}").as_bytes());
    let hash = create_hash(&input, HashAlgorithm::Sha256, HashEncoding::Hex);
    sha256_hash_to_uuid(&hash).expect("sha-256 hex digest is 64 chars")
}

// ---------------------------------------------------------------------------
// Collaborators
// ---------------------------------------------------------------------------

/// Upstream "make sure this branch exists" hook, called when publishing to
/// a branch name for the first time.
#[async_trait]
pub trait BranchEnsurer: Send + Sync {
    /// Idempotently create the branch upstream.
    async fn ensure_branch(&self, branch: &str) -> OtaResult<()>;
}

// ---------------------------------------------------------------------------
// Outcomes
// ---------------------------------------------------------------------------

/// Result of a begin-upload call.
#[derive(Debug, Clone)]
pub struct BeginUpload {
    /// The freshly minted, uncommitted update.
    pub update: UpdateRef,
    /// One presigned PUT slot per unique file name.
    pub upload_requests: Vec<UploadRequest>,
}

/// Result of finalizing an upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FinalizeOutcome {
    /// The update was committed and is now the head candidate.
    Committed {
        /// UUID assigned at commit time.
        update_uuid: String,
    },
    /// The upload duplicated the current head; its prefix was deleted and
    /// the head is unchanged.
    Duplicate,
}

// ---------------------------------------------------------------------------
// LifecycleEngine
// ---------------------------------------------------------------------------

/// Owns the upload/commit/rollback/republish state machine and the head
/// cache for every `(branch, runtimeVersion, platform)` triple.
pub struct LifecycleEngine {
    updates: UpdateStore,
    cache: Arc<dyn KvCache>,
    branches: Arc<dyn BranchEnsurer>,
    last_minted: Mutex<i64>,
}

impl LifecycleEngine {
    /// Assemble the engine from its collaborators.
    pub fn new(
        updates: UpdateStore,
        cache: Arc<dyn KvCache>,
        branches: Arc<dyn BranchEnsurer>,
    ) -> Self {
        Self {
            updates,
            cache,
            branches,
            last_minted: Mutex::new(0),
        }
    }

    /// The typed store this engine operates on.
    pub fn update_store(&self) -> &UpdateStore {
        &self.updates
    }

    /// Mint a new update id: the current millisecond, bumped monotonically
    /// when several uploads land in the same millisecond.  The id is both
    /// primary key and sort key, so it must never repeat or go backwards
    /// within a process.
    pub fn mint_update_id(&self) -> i64 {
        let now = chrono::Utc::now().timestamp_millis();
        let mut last = self.last_minted.lock().expect("mint lock poisoned");
        let id = if now <= *last { *last + 1 } else { now };
        *last = id;
        id
    }

    // -- Begin upload --------------------------------------------------------

    /// Start an upload: ensure the branch upstream, mint an id, presign one
    /// PUT slot per unique file name, write the provisional stored
    /// metadata, and invalidate the head cache for the triple.
    pub async fn begin_upload(
        &self,
        branch: &str,
        runtime_version: &str,
        platform: Platform,
        commit_hash: &str,
        file_names: &[String],
    ) -> OtaResult<BeginUpload> {
        if file_names.is_empty() {
            return Err(OtaError::bad_request("no file names provided"));
        }
        self.branches.ensure_branch(branch).await?;

        let update = UpdateRef::new(branch, runtime_version, self.mint_update_id());

        let mut unique: Vec<&String> = file_names.iter().collect();
        unique.sort();
        unique.dedup();

        let mut tasks = tokio::task::JoinSet::new();
        for file_name in unique {
            let store = Arc::clone(self.updates.object_store());
            let key = update.key(file_name);
            let file_path = file_name.clone();
            tasks.spawn(async move {
                let url = store.presign_put(&key, UPLOAD_URL_TTL).await?;
                Ok::<(String, String), ota_storage::StorageError>((file_path, url))
            });
        }

        let mut upload_requests = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            let (file_path, url) = joined
                .map_err(|err| OtaError::internal("presign task panicked").with_source(err))?
                .map_err(|err| {
                    OtaError::new(ErrorKind::Storage, "failed to presign upload URL")
                        .with_source(err)
                })?;
            let file_name = file_path
                .rsplit('/')
                .next()
                .unwrap_or(file_path.as_str())
                .to_string();
            upload_requests.push(UploadRequest {
                url,
                file_name,
                file_path,
            });
        }
        upload_requests.sort_by(|a, b| a.file_path.cmp(&b.file_path));

        self.updates
            .write_stored_metadata(
                &update,
                &StoredMetadata {
                    platform: platform.as_str().to_string(),
                    commit_hash: commit_hash.to_string(),
                    update_uuid: None,
                },
            )
            .await?;

        self.cache
            .delete(&keys::last_update_key(branch, runtime_version, platform))
            .await;

        info!(update = %update, %platform, "upload started");
        Ok(BeginUpload {
            update,
            upload_requests,
        })
    }

    // -- Finalize ------------------------------------------------------------

    /// Validate, dedup, and commit an uploaded update.
    ///
    /// Invalid uploads are deleted before the error returns.  A duplicate
    /// of the current head is deleted too and reported as
    /// [`FinalizeOutcome::Duplicate`]; the head is left unchanged.
    pub async fn finalize_upload(
        &self,
        branch: &str,
        runtime_version: &str,
        platform: Platform,
        update_id: i64,
    ) -> OtaResult<FinalizeOutcome> {
        let update = UpdateRef::new(branch, runtime_version, update_id);

        let metadata = match self.updates.metadata(&update).await {
            Ok(metadata) => metadata,
            Err(err) if matches!(err.kind, ErrorKind::NotFound | ErrorKind::InvalidUpload) => {
                return Err(self.reject_upload(&update, "metadata.json missing or malformed").await);
            }
            Err(err) => return Err(err),
        };

        if !metadata.json.has_any_bundle() {
            return Err(self.reject_upload(&update, "no platform carries a bundle").await);
        }
        for path in metadata.json.referenced_files() {
            if !self.updates.file_exists(&update, path).await? {
                return Err(self
                    .reject_upload(&update, "referenced file missing from upload")
                    .await
                    .with_context("path", path));
            }
        }

        let stored = self.updates.stored_metadata(&update).await?.unwrap_or_default();
        if !stored.platform.is_empty() && stored.platform != platform.as_str() {
            return Err(OtaError::bad_request("platform does not match the upload")
                .with_context("expected", stored.platform)
                .with_context("got", platform.as_str()));
        }

        // Dedup against the current head.  A rollback head or an empty
        // branch always commits.
        if let Some(prev) = self
            .latest_servable(branch, runtime_version, platform)
            .await?
        {
            if self.updates.update_kind(&prev).await? == UpdateKind::Normal {
                let prev_metadata = self.updates.metadata(&prev).await?;
                let new_print = fingerprint(&metadata, branch, runtime_version);
                let prev_print = fingerprint(&prev_metadata, branch, runtime_version);
                if new_print == prev_print {
                    self.delete_quietly(&update).await;
                    self.invalidate_listings(branch, runtime_version, platform).await;
                    info!(update = %update, head = %prev, "duplicate upload discarded");
                    return Ok(FinalizeOutcome::Duplicate);
                }
            }
        }

        // Commit: rewrite the stored metadata with the UUID, then the
        // witness.  `.check` goes last; its existence is the commit.
        let uuid = update_uuid(&metadata, update_id, branch, runtime_version);
        self.updates
            .write_stored_metadata(
                &update,
                &StoredMetadata {
                    platform: platform.as_str().to_string(),
                    commit_hash: stored.commit_hash,
                    update_uuid: Some(uuid.clone()),
                },
            )
            .await?;
        self.updates.mark_committed(&update).await?;
        self.invalidate_listings(branch, runtime_version, platform).await;

        info!(update = %update, %uuid, "update committed");
        Ok(FinalizeOutcome::Committed { update_uuid: uuid })
    }

    /// Fail-closed rejection: delete the prefix, then report the upload as
    /// invalid.
    async fn reject_upload(&self, update: &UpdateRef, reason: &str) -> OtaError {
        self.delete_quietly(update).await;
        OtaError::new(ErrorKind::InvalidUpload, reason).with_context("update", update.prefix())
    }

    async fn delete_quietly(&self, update: &UpdateRef) {
        if let Err(err) = self.updates.delete_update(update).await {
            warn!(update = %update, error = %err, "failed to delete rejected update prefix");
        }
    }

    // -- Rollback ------------------------------------------------------------

    /// Publish a rollback directive: a new update carrying only the stored
    /// metadata and the `rollback` sentinel.
    pub async fn create_rollback(
        &self,
        branch: &str,
        runtime_version: &str,
        platform: Platform,
        commit_hash: &str,
    ) -> OtaResult<UpdateRef> {
        self.branches.ensure_branch(branch).await?;
        let update = UpdateRef::new(branch, runtime_version, self.mint_update_id());
        self.updates
            .write_stored_metadata(
                &update,
                &StoredMetadata {
                    platform: platform.as_str().to_string(),
                    commit_hash: commit_hash.to_string(),
                    update_uuid: None,
                },
            )
            .await?;
        self.updates.write_rollback_sentinel(&update).await?;
        self.updates.mark_committed(&update).await?;
        self.invalidate_listings(branch, runtime_version, platform).await;
        info!(update = %update, "rollback published");
        Ok(update)
    }

    // -- Republish -----------------------------------------------------------

    /// Copy a committed normal update into a fresh id and commit the copy.
    /// The copy keeps the content (hence the fingerprint) but gets a new
    /// update id and a new UUID.
    pub async fn republish(
        &self,
        previous: &UpdateRef,
        platform: Platform,
        commit_hash: &str,
    ) -> OtaResult<UpdateRef> {
        if !self.updates.is_committed(previous).await? {
            return Err(OtaError::bad_request("update is not committed")
                .with_context("update", previous.prefix()));
        }
        if self.updates.update_kind(previous).await? == UpdateKind::Rollback {
            return Err(OtaError::bad_request("cannot republish a rollback")
                .with_context("update", previous.prefix()));
        }
        let stored = self
            .updates
            .stored_metadata(previous)
            .await?
            .unwrap_or_default();
        if stored.platform != platform.as_str() {
            return Err(OtaError::bad_request("update platform mismatch")
                .with_context("expected", stored.platform)
                .with_context("got", platform.as_str()));
        }
        self.branches.ensure_branch(&previous.branch).await?;

        let update = UpdateRef::new(
            previous.branch.clone(),
            previous.runtime_version.clone(),
            self.mint_update_id(),
        );
        self.updates
            .copy_update(
                previous,
                &update,
                &[files::STORED_METADATA, files::CHECK_SENTINEL],
            )
            .await?;

        let metadata = self.updates.metadata(&update).await?;
        let uuid = update_uuid(
            &metadata,
            update.update_id,
            &update.branch,
            &update.runtime_version,
        );
        self.updates
            .write_stored_metadata(
                &update,
                &StoredMetadata {
                    platform: platform.as_str().to_string(),
                    commit_hash: commit_hash.to_string(),
                    update_uuid: Some(uuid),
                },
            )
            .await?;
        self.updates.mark_committed(&update).await?;
        self.invalidate_listings(&update.branch, &update.runtime_version, platform)
            .await;
        info!(previous = %previous, update = %update, "update republished");
        Ok(update)
    }

    // -- Head selection ------------------------------------------------------

    /// The latest servable update for a triple: the committed update with
    /// the greatest id whose stored platform matches.  Cache-aside with a
    /// single-flight guard around the listing.
    pub async fn latest_servable(
        &self,
        branch: &str,
        runtime_version: &str,
        platform: Platform,
    ) -> OtaResult<Option<UpdateRef>> {
        let cache_key = keys::last_update_key(branch, runtime_version, platform);
        if let Some(update) = self.cached_head(&cache_key).await {
            return Ok(Some(update));
        }

        let lock_key = keys::head_lock_key(branch, runtime_version, platform);
        if !self.cache.try_lock(&lock_key, HEAD_LOCK_TTL).await {
            // Another poller is filling the cache; give it a moment.
            for _ in 0..HEAD_WAIT_ATTEMPTS {
                tokio::time::sleep(HEAD_WAIT_STEP).await;
                if let Some(update) = self.cached_head(&cache_key).await {
                    return Ok(Some(update));
                }
            }
        }

        let head = self
            .select_head_from_listing(branch, runtime_version, platform)
            .await;
        self.cache.delete(&lock_key).await;
        let head = head?;

        if let Some(update) = &head {
            match serde_json::to_string(update) {
                Ok(serialized) => {
                    if let Err(err) = self
                        .cache
                        .set(&cache_key, &serialized, Some(HEAD_CACHE_TTL))
                        .await
                    {
                        warn!(key = cache_key, error = %err, "failed to cache head");
                    }
                }
                Err(err) => warn!(error = %err, "failed to serialize head for cache"),
            }
        }
        Ok(head)
    }

    async fn cached_head(&self, cache_key: &str) -> Option<UpdateRef> {
        let cached = self.cache.get(cache_key).await?;
        match serde_json::from_str(&cached) {
            Ok(update) => Some(update),
            Err(err) => {
                warn!(key = cache_key, error = %err, "discarding undecodable cached head");
                self.cache.delete(cache_key).await;
                None
            }
        }
    }

    async fn select_head_from_listing(
        &self,
        branch: &str,
        runtime_version: &str,
        platform: Platform,
    ) -> OtaResult<Option<UpdateRef>> {
        // Listing is newest-first, so the first committed match wins.
        // The commit witness is checked before the platform so that a
        // provisional update-metadata.json can never make an uncommitted
        // update visible.
        for update in self.updates.list_updates(branch, runtime_version).await? {
            if !self.updates.is_committed(&update).await? {
                continue;
            }
            let Some(stored) = self.updates.stored_metadata(&update).await? else {
                continue;
            };
            if stored.platform == platform.as_str() {
                return Ok(Some(update));
            }
        }
        Ok(None)
    }

    // -- Invalidation --------------------------------------------------------

    /// Drop the head key and the dashboard listing keys for a triple.
    async fn invalidate_listings(&self, branch: &str, runtime_version: &str, platform: Platform) {
        self.cache
            .delete(&keys::last_update_key(branch, runtime_version, platform))
            .await;
        self.cache.delete(&keys::dashboard_branches_key()).await;
        self.cache
            .delete(&keys::dashboard_runtime_versions_key(branch))
            .await;
        self.cache
            .delete(&keys::dashboard_updates_key(branch, runtime_version))
            .await;
    }
}
