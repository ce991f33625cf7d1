// SPDX-License-Identifier: MIT OR Apache-2.0
//! Manifest composition and the signed multipart wire format.
//!
//! Given a committed update, [`ManifestEngine::compose`] shapes every asset
//! (content hashes, download URL, content type) in parallel and assembles
//! the manifest body.  Composed manifests are cached content-addressed —
//! the update id is part of the key, so they never need invalidation.
//! [`ManifestEngine::build_part`] turns any manifest or directive into the
//! single-part `multipart/mixed` body clients expect, signing the exact
//! JSON bytes when the client asked for a signature.

#![deny(unsafe_code)]

use ota_cache::KvCache;
use ota_crypto::{
    HashAlgorithm, HashEncoding, SigningKeys, base64_url_encoding, create_hash, sign_rsa_sha256,
};
use ota_error::{ErrorKind, OtaError, OtaResult};
use ota_types::{
    AssetRef, ExtraManifestData, ManifestAsset, Platform, UpdateManifest, UpdateRef,
};
use ota_updates::{UpdateMetadata, UpdateStore, manifest_key};
use serde::Serialize;
use std::sync::Arc;
use tracing::warn;
use url::Url;

/// Key id advertised in signature headers.  Rotation is out of scope.
const SIGNING_KEY_ID: &str = "main";

// ---------------------------------------------------------------------------
// Multipart
// ---------------------------------------------------------------------------

/// A rendered `multipart/mixed` response body.
#[derive(Debug, Clone)]
pub struct MultipartResponse {
    /// Boundary used in both the header and the body.
    pub boundary: String,
    /// `multipart/mixed; boundary=<b>`.
    pub content_type: String,
    /// The full body bytes.
    pub body: Vec<u8>,
    /// Signature emitted on the part, when one was requested.
    pub signature: Option<String>,
}

/// Render the single-part body.  The part carries the JSON content type and,
/// when present, the `expo-signature` part header.
fn render_multipart(part_name: &str, json: &[u8], signature: Option<&str>) -> MultipartResponse {
    let boundary = uuid::Uuid::new_v4().simple().to_string();
    let mut body = Vec::with_capacity(json.len() + 256);
    body.extend_from_slice(format!("--{boundary}\r\n").as_bytes());
    body.extend_from_slice(
        format!("Content-Disposition: form-data; name=\"{part_name}\"\r\n").as_bytes(),
    );
    body.extend_from_slice(b"Content-Type: application/json; charset=utf-8\r\n");
    if let Some(signature) = signature {
        body.extend_from_slice(
            format!("expo-signature: sig=\"{signature}\", keyid=\"{SIGNING_KEY_ID}\"\r\n")
                .as_bytes(),
        );
    }
    body.extend_from_slice(b"\r\n");
    body.extend_from_slice(json);
    body.extend_from_slice(format!("\r\n--{boundary}--\r\n").as_bytes());
    MultipartResponse {
        content_type: format!("multipart/mixed; boundary={boundary}"),
        boundary,
        body,
        signature: signature.map(str::to_string),
    }
}

// ---------------------------------------------------------------------------
// Asset shaping
// ---------------------------------------------------------------------------

/// Shape one asset: fetch the bytes, hash them, and build the download URL.
async fn shape_asset(
    updates: UpdateStore,
    base_url: String,
    update: UpdateRef,
    asset: AssetRef,
    is_launch_asset: bool,
    platform: Platform,
) -> OtaResult<ManifestAsset> {
    let object = updates.file(&update, &asset.path).await?;

    let hash_b64 = create_hash(&object.bytes, HashAlgorithm::Sha256, HashEncoding::Base64);
    let hash = base64_url_encoding(&hash_b64);
    let key = create_hash(&object.bytes, HashAlgorithm::Md5, HashEncoding::Hex);

    let extension = if is_launch_asset { "bundle" } else { &asset.ext };
    let content_type = if is_launch_asset {
        "application/javascript".to_string()
    } else {
        mime_guess::from_ext(&asset.ext)
            .first_or_octet_stream()
            .to_string()
    };

    let mut url = Url::parse(&base_url)
        .map_err(|err| OtaError::internal("invalid base url").with_source(err))?;
    url.path_segments_mut()
        .map_err(|_| OtaError::internal("base url cannot be a base"))?
        .pop_if_empty()
        .push("assets");
    url.query_pairs_mut()
        .append_pair("asset", &asset.path)
        .append_pair("runtimeVersion", &update.runtime_version)
        .append_pair("platform", platform.as_str());

    Ok(ManifestAsset {
        hash,
        key,
        file_extension: format!(".{extension}"),
        content_type,
        url: url.to_string(),
    })
}

// ---------------------------------------------------------------------------
// ManifestEngine
// ---------------------------------------------------------------------------

/// Composes and signs manifests and directives.
pub struct ManifestEngine {
    updates: UpdateStore,
    cache: Arc<dyn KvCache>,
    base_url: String,
    keys: SigningKeys,
}

impl ManifestEngine {
    /// Assemble the engine from its collaborators.
    pub fn new(
        updates: UpdateStore,
        cache: Arc<dyn KvCache>,
        base_url: impl Into<String>,
        keys: SigningKeys,
    ) -> Self {
        Self {
            updates,
            cache,
            base_url: base_url.into(),
            keys,
        }
    }

    /// Compose the manifest for `(update, platform)`.
    ///
    /// `update_uuid` is the identity persisted at commit time; it becomes
    /// the manifest `id`.  Assets are shaped in parallel, one task each.
    pub async fn compose(
        &self,
        update: &UpdateRef,
        metadata: &UpdateMetadata,
        update_uuid: &str,
        platform: Platform,
    ) -> OtaResult<UpdateManifest> {
        let cache_key = manifest_key(
            &update.branch,
            &update.runtime_version,
            update.update_id,
            platform,
        );
        if let Some(cached) = self.cache.get(&cache_key).await {
            match serde_json::from_str(&cached) {
                Ok(manifest) => return Ok(manifest),
                Err(err) => {
                    warn!(key = cache_key, error = %err, "discarding undecodable cached manifest");
                    self.cache.delete(&cache_key).await;
                }
            }
        }

        let expo_config = self.updates.expo_config(update).await?;
        let section = metadata.json.platform(platform);
        if section.bundle.is_empty() {
            return Err(
                OtaError::new(ErrorKind::NotFound, "update carries no bundle for platform")
                    .with_context("platform", platform.as_str()),
            );
        }

        let mut tasks = tokio::task::JoinSet::new();
        for (index, asset) in section.assets.iter().enumerate() {
            let fut = shape_asset(
                self.updates.clone(),
                self.base_url.clone(),
                update.clone(),
                asset.clone(),
                false,
                platform,
            );
            tasks.spawn(async move { (index, fut.await) });
        }

        let mut assets: Vec<Option<ManifestAsset>> = vec![None; section.assets.len()];
        while let Some(joined) = tasks.join_next().await {
            let (index, shaped) = joined
                .map_err(|err| OtaError::internal("asset task panicked").with_source(err))?;
            assets[index] = Some(shaped?);
        }
        let assets: Vec<ManifestAsset> = assets.into_iter().flatten().collect();

        let launch_asset = shape_asset(
            self.updates.clone(),
            self.base_url.clone(),
            update.clone(),
            AssetRef {
                path: section.bundle.clone(),
                ext: String::new(),
            },
            true,
            platform,
        )
        .await?;

        let manifest = UpdateManifest {
            id: update_uuid.to_string(),
            created_at: metadata.created_at.clone(),
            runtime_version: update.runtime_version.clone(),
            metadata: serde_json::json!({ "branch": update.branch }),
            assets,
            launch_asset,
            extra: ExtraManifestData {
                expo_client: expo_config,
                branch: update.branch.clone(),
            },
        };

        match serde_json::to_string(&manifest) {
            // Content-addressed: no TTL.
            Ok(serialized) => {
                if let Err(err) = self.cache.set(&cache_key, &serialized, None).await {
                    warn!(key = cache_key, error = %err, "failed to cache manifest");
                }
            }
            Err(err) => warn!(error = %err, "failed to serialize manifest for cache"),
        }
        Ok(manifest)
    }

    /// Serialize `content`, optionally sign the exact bytes, and wrap them
    /// in the single-part multipart body.
    pub fn build_part(
        &self,
        part_name: &str,
        content: &impl Serialize,
        expect_signature: bool,
    ) -> OtaResult<MultipartResponse> {
        let json = serde_json::to_vec(content)
            .map_err(|err| OtaError::internal("failed to serialize response body").with_source(err))?;
        let signature = if expect_signature {
            Some(
                sign_rsa_sha256(&json, &self.keys.private_expo_key).map_err(|err| {
                    OtaError::new(ErrorKind::Crypto, "failed to sign response body")
                        .with_source(err)
                })?,
            )
        } else {
            None
        };
        Ok(render_multipart(part_name, &json, signature.as_deref()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn multipart_body_contains_part_and_boundary() {
        let rendered = render_multipart("manifest", br#"{"id":"x"}"#, None);
        let text = String::from_utf8(rendered.body.clone()).unwrap();
        assert!(text.starts_with(&format!("--{}\r\n", rendered.boundary)));
        assert!(text.contains("Content-Disposition: form-data; name=\"manifest\""));
        assert!(text.contains("Content-Type: application/json; charset=utf-8"));
        assert!(text.contains(r#"{"id":"x"}"#));
        assert!(text.ends_with(&format!("\r\n--{}--\r\n", rendered.boundary)));
        assert!(!text.contains("expo-signature"));
        assert_eq!(
            rendered.content_type,
            format!("multipart/mixed; boundary={}", rendered.boundary)
        );
    }

    #[test]
    fn multipart_body_carries_signature_header() {
        let rendered = render_multipart("directive", b"{}", Some("c2ln"));
        let text = String::from_utf8(rendered.body).unwrap();
        assert!(text.contains("expo-signature: sig=\"c2ln\", keyid=\"main\""));
    }

    #[test]
    fn boundaries_are_unique_per_response() {
        let a = render_multipart("manifest", b"{}", None);
        let b = render_multipart("manifest", b"{}", None);
        assert_ne!(a.boundary, b.boundary);
    }
}
