// SPDX-License-Identifier: MIT OR Apache-2.0
//! The publisher surface: begin upload, direct local upload, finalize,
//! rollback, and republish.
//!
//! Every endpoint here authenticates against the upstream account
//! service: the presented credential must resolve to the operator's own
//! account.

use crate::api::ApiError;
use crate::headers::expo_auth;
use crate::state::{AppState, expo_err};
use axum::Json;
use axum::extract::{Multipart, Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use ota_config::StorageConfig;
use ota_storage::fs::validate_upload_token;
use ota_types::{Platform, UpdateRef};
use ota_updates::FinalizeOutcome;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;

async fn authorize_publisher(state: &AppState, headers: &HeaderMap) -> Result<(), ApiError> {
    state
        .expo
        .validate_publisher(&expo_auth(headers))
        .await
        .map_err(|err| ApiError::from(expo_err(err)))?;
    Ok(())
}

fn parse_platform(raw: &str) -> Result<Platform, ApiError> {
    raw.parse()
        .map_err(|_| ApiError::bad_request("invalid platform"))
}

fn require(value: &str, message: &str) -> Result<(), ApiError> {
    if value.is_empty() {
        return Err(ApiError::bad_request(message));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// POST /requestUploadUrl/{BRANCH}
// ---------------------------------------------------------------------------

/// Query surface of the begin-upload endpoint.
#[derive(Debug, Deserialize)]
pub struct UploadQuery {
    /// Runtime version the update targets.
    #[serde(rename = "runtimeVersion", default)]
    pub runtime_version: String,
    /// Platform the update targets.
    #[serde(default)]
    pub platform: String,
    /// Commit hash recorded with the update.
    #[serde(rename = "commitHash", default)]
    pub commit_hash: String,
}

/// Body of the begin-upload endpoint.
#[derive(Debug, Deserialize)]
pub struct FileNamesBody {
    /// Files the publisher intends to upload.
    #[serde(rename = "fileNames", default)]
    pub file_names: Vec<String>,
}

/// `POST /requestUploadUrl/{BRANCH}`.
pub async fn request_upload_url(
    State(state): State<Arc<AppState>>,
    Path(branch): Path<String>,
    Query(query): Query<UploadQuery>,
    headers: HeaderMap,
    Json(body): Json<FileNamesBody>,
) -> Result<Response, ApiError> {
    require(&branch, "no branch provided")?;
    authorize_publisher(&state, &headers).await?;
    require(&query.runtime_version, "no runtime version provided")?;
    let platform = parse_platform(&query.platform)?;
    if body.file_names.is_empty() {
        return Err(ApiError::bad_request("no file names provided"));
    }

    let begin = state
        .lifecycle
        .begin_upload(
            &branch,
            &query.runtime_version,
            platform,
            &query.commit_hash,
            &body.file_names,
        )
        .await?;

    let payload = Json(json!({
        "updateId": begin.update.update_id.to_string(),
        "uploadRequests": begin.upload_requests,
    }));
    Ok((
        StatusCode::OK,
        [("expo-update-id", begin.update.update_id.to_string())],
        payload,
    )
        .into_response())
}

// ---------------------------------------------------------------------------
// PUT /uploadLocalFile
// ---------------------------------------------------------------------------

/// Query surface of the direct-upload endpoint.
#[derive(Debug, Deserialize)]
pub struct UploadTokenQuery {
    /// Upload token minted by the filesystem store's presigner.
    #[serde(default)]
    pub token: String,
}

/// `PUT /uploadLocalFile` — filesystem mode only.
pub async fn upload_local_file(
    State(state): State<Arc<AppState>>,
    Query(query): Query<UploadTokenQuery>,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> Result<StatusCode, ApiError> {
    if !matches!(state.config.storage, StorageConfig::Local { .. }) {
        return Err(ApiError::internal("direct uploads require local storage"));
    }
    authorize_publisher(&state, &headers).await?;
    require(&query.token, "no token provided")?;

    let key = validate_upload_token(&query.token, &state.config.jwt_secret, &state.operator_id)
        .map_err(|err| ApiError::bad_request(format!("invalid upload token: {err}")))?;

    let field = multipart
        .next_field()
        .await
        .map_err(|_| ApiError::bad_request("malformed multipart body"))?
        .ok_or_else(|| ApiError::bad_request("empty request body"))?;
    let bytes = field
        .bytes()
        .await
        .map_err(|_| ApiError::bad_request("failed to read uploaded file"))?;

    state
        .updates
        .object_store()
        .put(&key, Bytes::copy_from_slice(&bytes))
        .await
        .map_err(|err| ApiError::internal(format!("failed to store upload: {err}")))?;
    Ok(StatusCode::OK)
}

// ---------------------------------------------------------------------------
// POST /markUpdateAsUploaded/{BRANCH}
// ---------------------------------------------------------------------------

/// Query surface of the finalize endpoint.
#[derive(Debug, Deserialize)]
pub struct MarkUploadedQuery {
    /// Runtime version the update targets.
    #[serde(rename = "runtimeVersion", default)]
    pub runtime_version: String,
    /// Platform the update targets.
    #[serde(default)]
    pub platform: String,
    /// The update id returned by begin-upload.
    #[serde(rename = "updateId", default)]
    pub update_id: String,
}

/// `POST /markUpdateAsUploaded/{BRANCH}` — validate, dedup, commit.
pub async fn mark_update_as_uploaded(
    State(state): State<Arc<AppState>>,
    Path(branch): Path<String>,
    Query(query): Query<MarkUploadedQuery>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    require(&branch, "no branch provided")?;
    authorize_publisher(&state, &headers).await?;
    require(&query.runtime_version, "no runtime version provided")?;
    let platform = parse_platform(&query.platform)?;
    let update_id: i64 = query
        .update_id
        .parse()
        .map_err(|_| ApiError::bad_request("invalid update id"))?;

    let outcome = state
        .lifecycle
        .finalize_upload(&branch, &query.runtime_version, platform, update_id)
        .await?;

    match outcome {
        FinalizeOutcome::Committed { update_uuid } => Ok((
            StatusCode::OK,
            Json(json!({
                "updateId": update_id.to_string(),
                "updateUUID": update_uuid,
            })),
        )
            .into_response()),
        FinalizeOutcome::Duplicate => Ok((
            StatusCode::NOT_ACCEPTABLE,
            Json(json!({ "error": "update is identical to the current head" })),
        )
            .into_response()),
    }
}

// ---------------------------------------------------------------------------
// POST /rollback/{BRANCH}
// ---------------------------------------------------------------------------

/// Query surface of the rollback endpoint.
#[derive(Debug, Deserialize)]
pub struct RollbackQuery {
    /// Runtime version the rollback targets.
    #[serde(rename = "runtimeVersion", default)]
    pub runtime_version: String,
    /// Platform the rollback targets.
    #[serde(default)]
    pub platform: String,
    /// Commit hash recorded with the rollback.
    #[serde(rename = "commitHash", default)]
    pub commit_hash: String,
}

/// `POST /rollback/{BRANCH}`.
pub async fn rollback(
    State(state): State<Arc<AppState>>,
    Path(branch): Path<String>,
    Query(query): Query<RollbackQuery>,
    headers: HeaderMap,
) -> Result<Json<UpdateRef>, ApiError> {
    require(&branch, "no branch provided")?;
    authorize_publisher(&state, &headers).await?;
    require(&query.runtime_version, "no runtime version provided")?;
    let platform = parse_platform(&query.platform)?;

    let update = state
        .lifecycle
        .create_rollback(&branch, &query.runtime_version, platform, &query.commit_hash)
        .await?;
    Ok(Json(update))
}

// ---------------------------------------------------------------------------
// POST /republish/{BRANCH}
// ---------------------------------------------------------------------------

/// Query surface of the republish endpoint.
#[derive(Debug, Deserialize)]
pub struct RepublishQuery {
    /// Runtime version of the source update.
    #[serde(rename = "runtimeVersion", default)]
    pub runtime_version: String,
    /// Platform of the source update.
    #[serde(default)]
    pub platform: String,
    /// Id of the committed update to republish.
    #[serde(rename = "updateId", default)]
    pub update_id: String,
    /// Commit hash recorded with the republished update.
    #[serde(rename = "commitHash", default)]
    pub commit_hash: String,
}

/// `POST /republish/{BRANCH}`.
pub async fn republish(
    State(state): State<Arc<AppState>>,
    Path(branch): Path<String>,
    Query(query): Query<RepublishQuery>,
    headers: HeaderMap,
) -> Result<Json<UpdateRef>, ApiError> {
    require(&branch, "no branch provided")?;
    authorize_publisher(&state, &headers).await?;
    require(&query.runtime_version, "no runtime version provided")?;
    let platform = parse_platform(&query.platform)?;
    let update_id: i64 = query
        .update_id
        .parse()
        .map_err(|_| ApiError::bad_request("invalid update id"))?;

    let previous = UpdateRef::new(branch, query.runtime_version, update_id);
    let update = state
        .lifecycle
        .republish(&previous, platform, &query.commit_hash)
        .await?;
    Ok(Json(update))
}
