// SPDX-License-Identifier: MIT OR Apache-2.0
//! Dashboard listing endpoints.
//!
//! Read-only views over storage, joined with upstream channel mappings
//! and telemetry counters.  Every response is cached without a TTL; the
//! lifecycle engine deletes these keys whenever a commit, rollback, or
//! republish changes what they would show.

use crate::api::ApiError;
use crate::state::{AppState, expo_err};
use axum::Json;
use axum::extract::{Path, State};
use ota_updates::{dashboard_branches_key, dashboard_runtime_versions_key, dashboard_updates_key};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::warn;

/// One branch joined with its release channel, if mapped.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BranchItem {
    /// Branch name.
    #[serde(rename = "branchName")]
    pub branch_name: String,
    /// Channel mapped to this branch upstream, if any.
    #[serde(rename = "releaseChannel")]
    pub release_channel: Option<String>,
}

/// Per-runtime-version statistics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeVersionItem {
    /// Runtime version string.
    #[serde(rename = "runtimeVersion")]
    pub runtime_version: String,
    /// Creation time of the oldest update (RFC 3339).
    #[serde(rename = "createdAt")]
    pub created_at: String,
    /// Creation time of the newest update (RFC 3339).
    #[serde(rename = "lastUpdatedAt")]
    pub last_updated_at: String,
    /// Number of updates stored.
    #[serde(rename = "numberOfUpdates")]
    pub number_of_updates: usize,
}

/// One update row of the dashboard.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateItem {
    /// UUID assigned at commit time, empty if uncommitted.
    #[serde(rename = "updateUUID")]
    pub update_uuid: String,
    /// The update id.
    #[serde(rename = "updateId")]
    pub update_id: String,
    /// Creation time (RFC 3339).
    #[serde(rename = "createdAt")]
    pub created_at: String,
    /// Commit hash supplied at publish time.
    #[serde(rename = "commitHash")]
    pub commit_hash: String,
    /// Platform the update targets.
    pub platform: String,
    /// Distinct clients currently on this update.
    #[serde(rename = "activeUsers")]
    pub active_users: u64,
    /// Total downloads recorded for this update.
    #[serde(rename = "totalDownloads")]
    pub total_downloads: u64,
}

async fn cached<T: for<'de> Deserialize<'de>>(state: &AppState, key: &str) -> Option<T> {
    let raw = state.cache.get(key).await?;
    serde_json::from_str(&raw).ok()
}

async fn cache_response<T: Serialize>(state: &AppState, key: &str, value: &T) {
    match serde_json::to_string(value) {
        Ok(serialized) => {
            if let Err(err) = state.cache.set(key, &serialized, None).await {
                warn!(key, error = %err, "failed to cache dashboard response");
            }
        }
        Err(err) => warn!(key, error = %err, "failed to serialize dashboard response"),
    }
}

/// `GET /dashboard/branches`.
pub async fn get_branches(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<BranchItem>>, ApiError> {
    let key = dashboard_branches_key();
    if let Some(items) = cached(&state, &key).await {
        return Ok(Json(items));
    }

    let branches = state.updates.list_branches().await?;
    let mappings = state
        .expo
        .branches_mapping()
        .await
        .map_err(|err| ApiError::from(expo_err(err)))?;

    let items: Vec<BranchItem> = branches
        .into_iter()
        .map(|branch_name| {
            let release_channel = mappings
                .iter()
                .find(|mapping| mapping.branch_name == branch_name)
                .map(|mapping| mapping.channel_name.clone());
            BranchItem {
                branch_name,
                release_channel,
            }
        })
        .collect();

    cache_response(&state, &key, &items).await;
    Ok(Json(items))
}

/// `GET /dashboard/branch/{BRANCH}/runtimeVersions`.
pub async fn get_runtime_versions(
    State(state): State<Arc<AppState>>,
    Path(branch): Path<String>,
) -> Result<Json<Vec<RuntimeVersionItem>>, ApiError> {
    let key = dashboard_runtime_versions_key(&branch);
    if let Some(items) = cached(&state, &key).await {
        return Ok(Json(items));
    }

    let mut items = Vec::new();
    for runtime_version in state.updates.list_runtime_versions(&branch).await? {
        let updates = state.updates.list_updates(&branch, &runtime_version).await?;
        if updates.is_empty() {
            continue;
        }
        // list_updates is newest-first.
        let newest = &updates[0];
        let oldest = &updates[updates.len() - 1];
        items.push(RuntimeVersionItem {
            runtime_version,
            created_at: oldest.created_at().map(|t| t.to_rfc3339()).unwrap_or_default(),
            last_updated_at: newest.created_at().map(|t| t.to_rfc3339()).unwrap_or_default(),
            number_of_updates: updates.len(),
        });
    }
    items.sort_by(|a, b| b.last_updated_at.cmp(&a.last_updated_at));

    cache_response(&state, &key, &items).await;
    Ok(Json(items))
}

/// `GET /dashboard/branch/{BRANCH}/runtimeVersion/{RUNTIME_VERSION}/updates`.
pub async fn get_updates(
    State(state): State<Arc<AppState>>,
    Path((branch, runtime_version)): Path<(String, String)>,
) -> Result<Json<Vec<UpdateItem>>, ApiError> {
    let key = dashboard_updates_key(&branch, &runtime_version);
    if let Some(items) = cached(&state, &key).await {
        return Ok(Json(items));
    }

    let mut items = Vec::new();
    for update in state.updates.list_updates(&branch, &runtime_version).await? {
        let stored = state
            .updates
            .stored_metadata(&update)
            .await?
            .unwrap_or_default();
        let update_uuid = stored.update_uuid.unwrap_or_default();
        let update_id = update.update_id.to_string();
        items.push(UpdateItem {
            active_users: state
                .active_users
                .count(&runtime_version, &branch, &update_uuid)
                .await,
            total_downloads: state.metrics.update_downloads_count(
                &runtime_version,
                &branch,
                &update_uuid,
            ),
            update_uuid,
            update_id,
            created_at: update.created_at().map(|t| t.to_rfc3339()).unwrap_or_default(),
            commit_hash: stored.commit_hash,
            platform: stored.platform,
        });
    }

    cache_response(&state, &key, &items).await;
    Ok(Json(items))
}
