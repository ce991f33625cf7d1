// SPDX-License-Identifier: MIT OR Apache-2.0
//! The client poll endpoint: `GET /manifest`.
//!
//! Resolves the channel to a branch, selects the latest servable update
//! for the `(branch, runtimeVersion, platform)` triple, and answers with
//! exactly one of: a signed manifest, a rollback directive, or a
//! no-update directive (HTTP 204 for protocol 0 clients, which predate
//! directives).

use crate::api::ApiError;
use crate::headers::{header, resolve_channel};
use crate::state::{AppState, expo_err};
use axum::body::Body;
use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::Response;
use ota_manifest::MultipartResponse;
use ota_types::{NoUpdateAvailableDirective, Platform, RollbackDirective, UpdateRef};
use ota_updates::UpdateKind;
use std::collections::HashMap;
use std::sync::Arc;

/// Assemble the protocol response around a rendered multipart body.
fn multipart_response(
    part: MultipartResponse,
    protocol_version: i64,
    extra_headers: &[(&str, String)],
) -> Result<Response, ApiError> {
    let mut builder = Response::builder()
        .status(StatusCode::OK)
        .header("expo-protocol-version", protocol_version.to_string())
        .header("expo-sfv-version", "0")
        .header("cache-control", "private, max-age=0")
        .header("content-type", part.content_type.clone());
    for (name, value) in extra_headers {
        builder = builder.header(*name, value);
    }
    builder
        .body(Body::from(part.body))
        .map_err(|_| ApiError::internal("failed to build response"))
}

/// The "no newer update" answer for the given protocol version.
fn no_update_response(
    state: &AppState,
    protocol_version: i64,
    expect_signature: bool,
) -> Result<Response, ApiError> {
    if protocol_version == 0 {
        // Protocol 0 predates directives.
        return Response::builder()
            .status(StatusCode::NO_CONTENT)
            .body(Body::empty())
            .map_err(|_| ApiError::internal("failed to build response"));
    }
    let directive = NoUpdateAvailableDirective::default();
    let part = state
        .manifests
        .build_part("directive", &directive, expect_signature)?;
    multipart_response(part, protocol_version, &[])
}

async fn rollback_response(
    state: &AppState,
    headers: &HeaderMap,
    head: &UpdateRef,
    platform: Platform,
    protocol_version: i64,
    expect_signature: bool,
) -> Result<Response, ApiError> {
    if protocol_version == 0 {
        return Err(ApiError::bad_request(
            "rollback is not supported in protocol version 0",
        ));
    }
    let embedded_update_id = header(headers, "expo-embedded-update-id");
    if embedded_update_id.is_empty() {
        return Err(ApiError::bad_request("no embedded update id provided"));
    }
    let current_update_id = header(headers, "expo-current-update-id");
    if !current_update_id.is_empty() && current_update_id == embedded_update_id {
        return no_update_response(state, protocol_version, expect_signature);
    }

    let commit_time = state
        .updates
        .rollback_sentinel(head)
        .await?
        .ok_or_else(|| ApiError::internal("rollback sentinel vanished"))?;
    let directive = RollbackDirective::new(commit_time);
    state.metrics.track_update_download(
        platform,
        &head.runtime_version,
        &head.branch,
        &head.update_id.to_string(),
        "rollback",
    );
    let part = state
        .manifests
        .build_part("directive", &directive, expect_signature)?;
    multipart_response(part, protocol_version, &[])
}

async fn update_response(
    state: &AppState,
    headers: &HeaderMap,
    head: &UpdateRef,
    platform: Platform,
    protocol_version: i64,
    expect_signature: bool,
) -> Result<Response, ApiError> {
    let stored = state
        .updates
        .stored_metadata(head)
        .await?
        .ok_or_else(|| ApiError::internal("committed update has no stored metadata"))?;
    let Some(update_uuid) = stored.update_uuid else {
        return Err(ApiError::internal("committed update has no UUID"));
    };

    let current_update_id = header(headers, "expo-current-update-id");
    if !current_update_id.is_empty() && current_update_id == update_uuid && protocol_version >= 1 {
        return no_update_response(state, protocol_version, expect_signature);
    }

    let metadata = state.updates.metadata(head).await?;
    let manifest = state
        .manifests
        .compose(head, &metadata, &update_uuid, platform)
        .await?;
    state.metrics.track_update_download(
        platform,
        &head.runtime_version,
        &head.branch,
        &update_uuid,
        "update",
    );
    let part = state
        .manifests
        .build_part("manifest", &manifest, expect_signature)?;
    multipart_response(
        part,
        protocol_version,
        &[(
            "expo-manifest-filters",
            format!("branch=\"{}\"", head.branch),
        )],
    )
}

/// `GET /manifest`.
pub async fn manifest(
    State(state): State<Arc<AppState>>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let channel = resolve_channel(&headers);
    if channel.is_empty() {
        return Err(ApiError::bad_request("no channel name provided"));
    }

    let protocol_version: i64 = header(&headers, "expo-protocol-version")
        .parse()
        .map_err(|_| ApiError::bad_request("invalid protocol version"))?;
    if !(0..=1).contains(&protocol_version) {
        return Err(ApiError::bad_request("invalid protocol version"));
    }

    let platform_raw = match header(&headers, "expo-platform") {
        "" => query.get("platform").map(String::as_str).unwrap_or(""),
        value => value,
    };
    let platform: Platform = platform_raw
        .parse()
        .map_err(|_| ApiError::bad_request("invalid platform"))?;

    let runtime_version = match header(&headers, "expo-runtime-version") {
        "" => query
            .get("runtimeVersion")
            .map(String::as_str)
            .unwrap_or(""),
        value => value,
    };
    if runtime_version.is_empty() {
        return Err(ApiError::bad_request("no runtime version provided"));
    }

    let branch = state
        .expo
        .channel_mapping(&channel)
        .await
        .map_err(|err| ApiError::from(expo_err(err)))?
        .ok_or_else(|| ApiError::not_found("no branch mapping found"))?;

    state
        .active_users
        .track(
            header(&headers, "EAS-Client-ID"),
            platform,
            runtime_version,
            &branch,
            header(&headers, "expo-current-update-id"),
        )
        .await;

    let expect_signature = !header(&headers, "expo-expect-signature").is_empty();

    let Some(head) = state
        .lifecycle
        .latest_servable(&branch, runtime_version, platform)
        .await?
    else {
        return no_update_response(&state, protocol_version, expect_signature);
    };

    match state.updates.update_kind(&head).await? {
        UpdateKind::Normal => {
            update_response(
                &state,
                &headers,
                &head,
                platform,
                protocol_version,
                expect_signature,
            )
            .await
        }
        UpdateKind::Rollback => {
            rollback_response(
                &state,
                &headers,
                &head,
                platform,
                protocol_version,
                expect_signature,
            )
            .await
        }
    }
}
