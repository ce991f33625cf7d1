// SPDX-License-Identifier: MIT OR Apache-2.0
//! The per-asset fetch endpoint: `GET /assets`.
//!
//! Locates the requested asset inside the latest committed update and
//! either streams the bytes (with content-encoding negotiation) or
//! answers with a signed CDN redirect when CloudFront is configured.

use crate::api::ApiError;
use crate::cdn::SIGNED_URL_TTL;
use crate::compression::{compress, negotiate};
use crate::headers::{header, resolve_channel};
use crate::state::{AppState, expo_err};
use axum::body::Body;
use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::Response;
use ota_types::Platform;
use serde::Deserialize;
use std::sync::Arc;

/// Query surface of `GET /assets`.
#[derive(Debug, Deserialize)]
pub struct AssetQuery {
    /// Path of the asset inside the update.
    #[serde(default)]
    pub asset: String,
    /// Runtime version of the polling client.
    #[serde(rename = "runtimeVersion", default)]
    pub runtime_version: String,
    /// Platform of the polling client.
    #[serde(default)]
    pub platform: String,
}

/// `GET /assets`.
pub async fn assets(
    State(state): State<Arc<AppState>>,
    Query(query): Query<AssetQuery>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    if query.asset.is_empty() {
        return Err(ApiError::bad_request("no asset name provided"));
    }
    let platform: Platform = query
        .platform
        .parse()
        .map_err(|_| ApiError::bad_request("invalid platform"))?;
    if query.runtime_version.is_empty() {
        return Err(ApiError::bad_request("no runtime version provided"));
    }

    let channel = resolve_channel(&headers);
    if channel.is_empty() {
        return Err(ApiError::bad_request("no channel name provided"));
    }
    let branch = state
        .expo
        .channel_mapping(&channel)
        .await
        .map_err(|err| ApiError::from(expo_err(err)))?
        .ok_or_else(|| ApiError::not_found("no branch mapping found"))?;

    let Some(head) = state
        .lifecycle
        .latest_servable(&branch, &query.runtime_version, platform)
        .await?
    else {
        return Err(ApiError::not_found("no update found"));
    };

    let metadata = state
        .updates
        .metadata(&head)
        .await
        .map_err(|err| match err.kind {
            ota_error::ErrorKind::NotFound => ApiError::not_found("no bundle for this update"),
            _ => ApiError::from(err),
        })?;
    let section = metadata.json.platform(platform);
    let is_launch_asset = section.bundle == query.asset;
    let listed_ext = section
        .assets
        .iter()
        .find(|asset| asset.path == query.asset)
        .map(|asset| asset.ext.clone());

    let content_type = if is_launch_asset {
        "application/javascript".to_string()
    } else {
        let ext = listed_ext.unwrap_or_else(|| {
            query
                .asset
                .rsplit('.')
                .next()
                .unwrap_or_default()
                .to_string()
        });
        mime_guess::from_ext(&ext).first_or_octet_stream().to_string()
    };

    // CDN mode: hand the client a short-lived signed URL instead of bytes.
    if let Some(cdn) = &state.cdn {
        if header(&headers, "prevent-cdn-redirection").is_empty() {
            let expires_at = chrono::Utc::now()
                + chrono::Duration::from_std(SIGNED_URL_TTL)
                    .map_err(|_| ApiError::internal("invalid signed-url ttl"))?;
            let location = cdn.signed_asset_url(
                &head.branch,
                &head.runtime_version,
                head.update_id,
                &query.asset,
                expires_at,
            )?;
            return Response::builder()
                .status(StatusCode::FOUND)
                .header("location", location)
                .header("cache-control", "private, max-age=0")
                .body(Body::empty())
                .map_err(|_| ApiError::internal("failed to build response"));
        }
    }

    // Streaming mode.
    let object = state.updates.file(&head, &query.asset).await?;
    let encoding = negotiate(header(&headers, "accept-encoding"));
    let body = compress(&object.bytes, encoding)
        .map_err(|_| ApiError::internal("failed to compress asset"))?;

    state.metrics.track_update_download(
        platform,
        &head.runtime_version,
        &head.branch,
        &head.update_id.to_string(),
        "asset",
    );

    let mut builder = Response::builder()
        .status(StatusCode::OK)
        .header("expo-protocol-version", "1")
        .header("expo-sfv-version", "0")
        .header("cache-control", "public, max-age=31536000")
        .header("content-type", content_type);
    if let Some(value) = encoding.header_value() {
        builder = builder.header("content-encoding", value);
    }
    builder
        .body(Body::from(body))
        .map_err(|_| ApiError::internal("failed to build response"))
}
