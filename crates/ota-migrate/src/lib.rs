// SPDX-License-Identifier: MIT OR Apache-2.0
//! Storage migrations.
//!
//! Migrations run once per deployment, in timestamp order, before an
//! instance accepts traffic.  The applied set is recorded in the store's
//! `.migrationhistory` log, and a KV-cache try-lock keeps a fleet of
//! instances from migrating concurrently: whoever wins the lock migrates,
//! everyone else skips.

#![deny(unsafe_code)]

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use ota_cache::KvCache;
use ota_error::{ErrorKind, OtaError, OtaResult};
use ota_storage::ObjectStore;
use ota_types::StoredMetadata;
use ota_updates::{UpdateStore, update_uuid};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Lock key guarding the migration run.
const MIGRATION_LOCK_KEY: &str = "migration-lock";

/// How long the winner may hold the migration lock.
const MIGRATION_LOCK_TTL: Duration = Duration::from_secs(120);

// ---------------------------------------------------------------------------
// Migration trait
// ---------------------------------------------------------------------------

/// A single storage migration.
#[async_trait]
pub trait Migration: Send + Sync {
    /// Stable identifier recorded in the history log.
    fn id(&self) -> &'static str;

    /// Ordering key across migrations.
    fn timestamp(&self) -> DateTime<Utc>;

    /// Apply the migration.
    async fn up(&self, store: &Arc<dyn ObjectStore>) -> OtaResult<()>;

    /// Revert the migration.
    async fn down(&self, store: &Arc<dyn ObjectStore>) -> OtaResult<()>;
}

/// All migrations this build knows about.
pub fn builtin_migrations() -> Vec<Arc<dyn Migration>> {
    vec![Arc::new(PersistUuid)]
}

// ---------------------------------------------------------------------------
// Runner
// ---------------------------------------------------------------------------

fn sorted(mut migrations: Vec<Arc<dyn Migration>>) -> Vec<Arc<dyn Migration>> {
    migrations.sort_by_key(|m| m.timestamp());
    migrations
}

fn storage_err(err: ota_storage::StorageError) -> OtaError {
    OtaError::new(ErrorKind::Storage, "migration history I/O failed").with_source(err)
}

/// Apply every migration missing from the history, oldest first.  Returns
/// the ids applied by this call.
pub async fn run_migrations(
    store: &Arc<dyn ObjectStore>,
    migrations: Vec<Arc<dyn Migration>>,
) -> OtaResult<Vec<String>> {
    let applied = store.read_migration_history().await.map_err(storage_err)?;
    let mut newly_applied = Vec::new();
    for migration in sorted(migrations) {
        if applied.iter().any(|id| id == migration.id()) {
            continue;
        }
        info!(id = migration.id(), "applying migration");
        migration.up(store).await?;
        store
            .append_migration_history(migration.id())
            .await
            .map_err(storage_err)?;
        newly_applied.push(migration.id().to_string());
    }
    Ok(newly_applied)
}

/// Revert the most recently applied migration, if any.
pub async fn rollback_last(
    store: &Arc<dyn ObjectStore>,
    migrations: Vec<Arc<dyn Migration>>,
) -> OtaResult<Option<String>> {
    let applied = store.read_migration_history().await.map_err(storage_err)?;
    let Some(last) = applied.last() else {
        return Ok(None);
    };
    let Some(migration) = migrations.iter().find(|m| m.id() == last) else {
        return Err(OtaError::internal("unknown migration in history").with_context("id", last));
    };
    info!(id = migration.id(), "rolling back migration");
    migration.down(store).await?;
    store
        .remove_migration_history(migration.id())
        .await
        .map_err(storage_err)?;
    Ok(Some(migration.id().to_string()))
}

/// Boot-time entry point: contend for the migration lock and run the
/// missing migrations when it is won.  Returns whether this instance was
/// the one that migrated.
pub async fn run_with_lock(
    cache: &Arc<dyn KvCache>,
    store: &Arc<dyn ObjectStore>,
    migrations: Vec<Arc<dyn Migration>>,
) -> OtaResult<bool> {
    if !cache.try_lock(MIGRATION_LOCK_KEY, MIGRATION_LOCK_TTL).await {
        info!("migration lock held elsewhere, skipping");
        return Ok(false);
    }
    let result = run_migrations(store, migrations).await;
    cache.delete(MIGRATION_LOCK_KEY).await;
    result?;
    Ok(true)
}

// ---------------------------------------------------------------------------
// 20250417_persist_uuid
// ---------------------------------------------------------------------------

/// Backfills `updateUUID` into the stored metadata of historical updates
/// that were committed before the server persisted UUIDs.
pub struct PersistUuid;

#[async_trait]
impl Migration for PersistUuid {
    fn id(&self) -> &'static str {
        "20250417_persist_uuid"
    }

    fn timestamp(&self) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 4, 17, 0, 0, 0).unwrap()
    }

    async fn up(&self, store: &Arc<dyn ObjectStore>) -> OtaResult<()> {
        let updates = UpdateStore::new(Arc::clone(store));
        for branch in updates.list_branches().await? {
            for runtime_version in updates.list_runtime_versions(&branch).await? {
                for update in updates.list_updates(&branch, &runtime_version).await? {
                    let stored = updates.stored_metadata(&update).await?.unwrap_or_default();
                    if stored.update_uuid.is_some() {
                        continue;
                    }
                    // Rollbacks and broken trees have no metadata.json;
                    // leave them alone.
                    let metadata = match updates.metadata(&update).await {
                        Ok(metadata) => metadata,
                        Err(err) => {
                            warn!(update = %update, error = %err, "skipping update without metadata");
                            continue;
                        }
                    };
                    let uuid = update_uuid(
                        &metadata,
                        update.update_id,
                        &update.branch,
                        &update.runtime_version,
                    );
                    updates
                        .write_stored_metadata(
                            &update,
                            &StoredMetadata {
                                platform: stored.platform,
                                commit_hash: stored.commit_hash,
                                update_uuid: Some(uuid),
                            },
                        )
                        .await?;
                    info!(update = %update, "persisted update UUID");
                }
            }
        }
        Ok(())
    }

    async fn down(&self, _store: &Arc<dyn ObjectStore>) -> OtaResult<()> {
        // The backfilled field is harmless to keep.
        Ok(())
    }
}
