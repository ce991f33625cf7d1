// SPDX-License-Identifier: MIT OR Apache-2.0
//! End-to-end scenarios: publish through the HTTP surface, then poll as a
//! client would, exercising the whole stack over a filesystem store and a
//! mocked upstream account service.

use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use ota_cache::{KvCache, MemoryCache};
use ota_config::{CacheConfig, CloudfrontConfig, KeysConfig, ServerConfig, StorageConfig};
use ota_crypto::{SigningKeys, verify_rsa_sha256};
use ota_expo::ExpoClient;
use ota_manifest::ManifestEngine;
use ota_metrics::{ActiveUserTracker, Metrics};
use ota_server::cdn::CloudFrontSigner;
use ota_server::{AppState, ExpoBranches, build_app};
use ota_storage::ObjectStore;
use ota_storage::fs::{FsStore, UploadTokenConfig};
use ota_updates::{LifecycleEngine, UpdateStore};
use rsa::pkcs8::{EncodePrivateKey, EncodePublicKey, LineEnding};
use rsa::{RsaPrivateKey, RsaPublicKey};
use serde_json::json;
use std::sync::Arc;
use tower::ServiceExt;
use wiremock::matchers::{body_string_contains, method};
use wiremock::{Mock, MockServer, ResponseTemplate};

const OPERATOR_TOKEN: &str = "operator-token";

fn test_keys() -> SigningKeys {
    let mut rng = rand::thread_rng();
    let private = RsaPrivateKey::new(&mut rng, 2048).unwrap();
    let public = RsaPublicKey::from(&private);
    SigningKeys {
        public_expo_key: public.to_public_key_pem(LineEnding::LF).unwrap(),
        private_expo_key: private.to_pkcs8_pem(LineEnding::LF).unwrap().to_string(),
        private_cloudfront_key: None,
    }
}

struct Harness {
    _dir: tempfile::TempDir,
    app: Router,
    keys: SigningKeys,
}

async fn harness(upstream: &MockServer, with_cdn: bool) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let keys = test_keys();

    let config = ServerConfig {
        base_url: "http://localhost:3000".into(),
        jwt_secret: "test-secret".into(),
        expo_access_token: OPERATOR_TOKEN.into(),
        expo_app_id: "app-id".into(),
        storage: StorageConfig::Local {
            base_path: dir.path().to_string_lossy().into_owned(),
        },
        cache: CacheConfig::Local,
        cache_key_prefix: "expoopenota".into(),
        keys: KeysConfig::Environment {
            public_key_b64: String::new(),
            private_key_b64: String::new(),
            cloudfront_key_b64: None,
        },
        cloudfront: with_cdn.then(|| CloudfrontConfig {
            domain: "https://d111.cloudfront.net".into(),
            key_pair_id: "K2JCJMDEHXQW5F".into(),
        }),
        prometheus_enabled: false,
        dashboard_enabled: false,
        admin_password: None,
    };

    let store: Arc<dyn ObjectStore> = Arc::new(FsStore::new(
        dir.path(),
        UploadTokenConfig {
            base_url: config.base_url.clone(),
            jwt_secret: config.jwt_secret.clone(),
            operator_id: "operator".into(),
        },
    ));
    let cache: Arc<dyn KvCache> = Arc::new(MemoryCache::new("test"));
    let expo = Arc::new(ExpoClient::with_endpoint(
        upstream.uri(),
        OPERATOR_TOKEN,
        "app-id",
    ));
    let updates = UpdateStore::new(Arc::clone(&store));
    let metrics = Arc::new(Metrics::new().unwrap());

    let cdn = with_cdn.then(|| {
        let mut rng = rand::thread_rng();
        let cdn_key = RsaPrivateKey::new(&mut rng, 2048).unwrap();
        Arc::new(CloudFrontSigner::new(
            config.cloudfront.as_ref().unwrap(),
            cdn_key.to_pkcs8_pem(LineEnding::LF).unwrap().to_string(),
        ))
    });

    let state = Arc::new(AppState {
        lifecycle: Arc::new(LifecycleEngine::new(
            updates.clone(),
            Arc::clone(&cache),
            Arc::new(ExpoBranches(Arc::clone(&expo))),
        )),
        manifests: Arc::new(ManifestEngine::new(
            updates.clone(),
            Arc::clone(&cache),
            config.base_url.clone(),
            keys.clone(),
        )),
        active_users: ActiveUserTracker::new(Arc::clone(&cache), Arc::clone(&metrics)),
        updates,
        cache,
        expo,
        metrics,
        keys: keys.clone(),
        cdn,
        operator_id: "operator".into(),
        config,
    });

    Harness {
        _dir: dir,
        app: build_app(state),
        keys,
    }
}

/// Mount the standard upstream: one operator account, a `staging` branch
/// mapped from the `staging` channel, and a `production` channel mapped to
/// the `prod-branch` branch.
async fn mount_upstream(server: &MockServer) {
    Mock::given(method("POST"))
        .and(body_string_contains("GetCurrentUserAccount"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": { "me": { "id": "1", "username": "operator", "email": "op@example.com" } }
        })))
        .mount(server)
        .await;
    Mock::given(method("POST"))
        .and(body_string_contains("FetchAppBranches"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": { "app": { "byId": {
                "id": "app-id",
                "updateBranches": [
                    { "id": "b-1", "name": "staging" },
                    { "id": "b-2", "name": "prod-branch" }
                ]
            }}}
        })))
        .mount(server)
        .await;
    Mock::given(method("POST"))
        .and(body_string_contains("FetchAppChannel"))
        .and(body_string_contains("\"channelName\":\"staging\""))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": { "app": { "byId": {
                "id": "app-id",
                "updateBranches": [
                    { "id": "b-1", "name": "staging" },
                    { "id": "b-2", "name": "prod-branch" }
                ],
                "updateChannelByName": {
                    "id": "c-1",
                    "name": "staging",
                    "branchMapping": "{\"version\":0,\"data\":[{\"branchId\":\"b-1\",\"branchMappingLogic\":\"true\"}]}"
                }
            }}}
        })))
        .mount(server)
        .await;
    Mock::given(method("POST"))
        .and(body_string_contains("FetchAppChannel"))
        .and(body_string_contains("\"channelName\":\"production\""))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": { "app": { "byId": {
                "id": "app-id",
                "updateBranches": [
                    { "id": "b-1", "name": "staging" },
                    { "id": "b-2", "name": "prod-branch" }
                ],
                "updateChannelByName": {
                    "id": "c-2",
                    "name": "production",
                    "branchMapping": "{\"version\":0,\"data\":[{\"branchId\":\"b-2\",\"branchMappingLogic\":\"true\"}]}"
                }
            }}}
        })))
        .mount(server)
        .await;
}

async fn send(app: &Router, req: Request<Body>) -> (StatusCode, axum::http::HeaderMap, Vec<u8>) {
    let resp = app.clone().oneshot(req).await.unwrap();
    let status = resp.status();
    let headers = resp.headers().clone();
    let body = resp.into_body().collect().await.unwrap().to_bytes().to_vec();
    (status, headers, body)
}

const METADATA_JSON: &str = r#"{
    "version": 0,
    "bundler": "metro",
    "fileMetadata": {
        "ios": {
            "bundle": "bundles/ios-abc.js",
            "assets": [{"path": "assets/4f1.png", "ext": "png"}]
        },
        "android": {"bundle": "", "assets": []}
    }
}"#;

fn update_files() -> Vec<(&'static str, &'static [u8])> {
    vec![
        ("metadata.json", METADATA_JSON.as_bytes()),
        ("expoConfig.json", br#"{"name":"demo-app"}"#),
        ("bundles/ios-abc.js", b"console.log('bundle')"),
        ("assets/4f1.png", b"png-bytes"),
    ]
}

/// Drive the whole publisher flow; returns the committed update id.
async fn publish_update(app: &Router, branch: &str) -> i64 {
    let file_names: Vec<&str> = update_files().iter().map(|(name, _)| *name).collect();
    let (status, headers, body) = send(
        app,
        Request::builder()
            .method("POST")
            .uri(format!(
                "/requestUploadUrl/{branch}?runtimeVersion=1&platform=ios&commitHash=c1"
            ))
            .header("authorization", format!("Bearer {OPERATOR_TOKEN}"))
            .header("content-type", "application/json")
            .body(Body::from(
                serde_json::to_vec(&json!({ "fileNames": file_names })).unwrap(),
            ))
            .unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{}", String::from_utf8_lossy(&body));
    let update_id: i64 = headers
        .get("expo-update-id")
        .unwrap()
        .to_str()
        .unwrap()
        .parse()
        .unwrap();

    let response: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(response["updateId"], update_id.to_string());
    let requests = response["uploadRequests"].as_array().unwrap();
    assert_eq!(requests.len(), update_files().len());

    // PUT every file through its presigned URL.
    for request in requests {
        let url = request["requestUploadUrl"].as_str().unwrap();
        let token = url.split("token=").nth(1).unwrap();
        let file_path = request["filePath"].as_str().unwrap();
        let bytes = update_files()
            .into_iter()
            .find(|(name, _)| *name == file_path)
            .unwrap()
            .1;

        let boundary = "e2e-test-boundary";
        let mut form = Vec::new();
        form.extend_from_slice(format!("--{boundary}\r\n").as_bytes());
        form.extend_from_slice(
            format!(
                "Content-Disposition: form-data; name=\"file\"; filename=\"{file_path}\"\r\n"
            )
            .as_bytes(),
        );
        form.extend_from_slice(b"Content-Type: application/octet-stream\r\n\r\n");
        form.extend_from_slice(bytes);
        form.extend_from_slice(format!("\r\n--{boundary}--\r\n").as_bytes());

        let (status, _, body) = send(
            app,
            Request::builder()
                .method("PUT")
                .uri(format!("/uploadLocalFile?token={token}"))
                .header("authorization", format!("Bearer {OPERATOR_TOKEN}"))
                .header(
                    "content-type",
                    format!("multipart/form-data; boundary={boundary}"),
                )
                .body(Body::from(form))
                .unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::OK, "{}", String::from_utf8_lossy(&body));
    }

    update_id
}

async fn mark_uploaded(app: &Router, branch: &str, update_id: i64) -> (StatusCode, Vec<u8>) {
    let (status, _, body) = send(
        app,
        Request::builder()
            .method("POST")
            .uri(format!(
                "/markUpdateAsUploaded/{branch}?runtimeVersion=1&platform=ios&updateId={update_id}"
            ))
            .header("authorization", format!("Bearer {OPERATOR_TOKEN}"))
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    (status, body)
}

fn manifest_request(extra: &[(&str, &str)]) -> Request<Body> {
    let mut builder = Request::builder()
        .uri("/manifest")
        .header("expo-channel-name", "staging")
        .header("expo-platform", "ios")
        .header("expo-runtime-version", "1")
        .header("expo-protocol-version", "1")
        .header("EAS-Client-ID", "client-1");
    for (name, value) in extra {
        builder = builder.header(*name, *value);
    }
    builder.body(Body::empty()).unwrap()
}

/// Split a single-part multipart body into (part headers, json bytes).
fn parse_multipart(headers: &axum::http::HeaderMap, body: &[u8]) -> (String, Vec<u8>) {
    let content_type = headers.get("content-type").unwrap().to_str().unwrap();
    let boundary = content_type.split("boundary=").nth(1).unwrap();
    let text = String::from_utf8_lossy(body);
    assert!(text.starts_with(&format!("--{boundary}\r\n")), "boundary mismatch");

    let header_end = text.find("\r\n\r\n").unwrap();
    let part_headers = text[..header_end].to_string();
    let json_end = text.rfind(&format!("\r\n--{boundary}--")).unwrap();
    (part_headers, body[header_end + 4..json_end].to_vec())
}

// ---------------------------------------------------------------------------
// Scenario: publish then poll
// ---------------------------------------------------------------------------

#[tokio::test]
async fn publish_then_poll_returns_signed_manifest() {
    let upstream = MockServer::start().await;
    mount_upstream(&upstream).await;
    let h = harness(&upstream, false).await;

    let update_id = publish_update(&h.app, "staging").await;
    let (status, body) = mark_uploaded(&h.app, "staging", update_id).await;
    assert_eq!(status, StatusCode::OK, "{}", String::from_utf8_lossy(&body));
    let commit: serde_json::Value = serde_json::from_slice(&body).unwrap();
    let expected_uuid = commit["updateUUID"].as_str().unwrap().to_string();

    let (status, headers, body) = send(
        &h.app,
        manifest_request(&[("expo-expect-signature", "true")]),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        headers.get("expo-manifest-filters").unwrap(),
        "branch=\"staging\""
    );
    assert_eq!(headers.get("expo-protocol-version").unwrap(), "1");
    assert_eq!(headers.get("expo-sfv-version").unwrap(), "0");
    assert_eq!(headers.get("cache-control").unwrap(), "private, max-age=0");

    let (part_headers, json) = parse_multipart(&headers, &body);
    assert!(part_headers.contains("name=\"manifest\""));

    // Signature verifies over the exact part bytes.
    let signature = part_headers
        .split("sig=\"")
        .nth(1)
        .unwrap()
        .split('"')
        .next()
        .unwrap();
    assert!(verify_rsa_sha256(&json, &h.keys.public_expo_key, signature).unwrap());

    let manifest: serde_json::Value = serde_json::from_slice(&json).unwrap();
    assert_eq!(manifest["id"], expected_uuid);
    assert_eq!(manifest["runtimeVersion"], "1");
    assert_eq!(manifest["metadata"]["branch"], "staging");
    assert_eq!(manifest["extra"]["branch"], "staging");
    assert_eq!(manifest["extra"]["expoClient"]["name"], "demo-app");
    assert_eq!(manifest["launchAsset"]["contentType"], "application/javascript");
    assert_eq!(manifest["assets"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn polling_with_current_update_gets_no_update() {
    let upstream = MockServer::start().await;
    mount_upstream(&upstream).await;
    let h = harness(&upstream, false).await;

    let update_id = publish_update(&h.app, "staging").await;
    let (status, body) = mark_uploaded(&h.app, "staging", update_id).await;
    assert_eq!(status, StatusCode::OK);
    let commit: serde_json::Value = serde_json::from_slice(&body).unwrap();
    let uuid = commit["updateUUID"].as_str().unwrap();

    let (status, headers, body) = send(
        &h.app,
        manifest_request(&[("expo-current-update-id", uuid)]),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let (part_headers, json) = parse_multipart(&headers, &body);
    assert!(part_headers.contains("name=\"directive\""));
    let directive: serde_json::Value = serde_json::from_slice(&json).unwrap();
    assert_eq!(directive["type"], "noUpdateAvailable");
}

// ---------------------------------------------------------------------------
// Scenario: no-op republish (dedup)
// ---------------------------------------------------------------------------

#[tokio::test]
async fn identical_second_upload_is_rejected_with_406() {
    let upstream = MockServer::start().await;
    mount_upstream(&upstream).await;
    let h = harness(&upstream, false).await;

    let first_id = publish_update(&h.app, "staging").await;
    let (status, body) = mark_uploaded(&h.app, "staging", first_id).await;
    assert_eq!(status, StatusCode::OK);
    let first_uuid = serde_json::from_slice::<serde_json::Value>(&body).unwrap()["updateUUID"]
        .as_str()
        .unwrap()
        .to_string();

    let second_id = publish_update(&h.app, "staging").await;
    assert!(second_id > first_id);
    let (status, _) = mark_uploaded(&h.app, "staging", second_id).await;
    assert_eq!(status, StatusCode::NOT_ACCEPTABLE);

    // The manifest still serves the first update.
    let (status, headers, body) = send(&h.app, manifest_request(&[])).await;
    assert_eq!(status, StatusCode::OK);
    let (_, json) = parse_multipart(&headers, &body);
    let manifest: serde_json::Value = serde_json::from_slice(&json).unwrap();
    assert_eq!(manifest["id"], first_uuid);
}

// ---------------------------------------------------------------------------
// Scenario: rollback
// ---------------------------------------------------------------------------

#[tokio::test]
async fn rollback_flow() {
    let upstream = MockServer::start().await;
    mount_upstream(&upstream).await;
    let h = harness(&upstream, false).await;

    let update_id = publish_update(&h.app, "staging").await;
    let (status, _) = mark_uploaded(&h.app, "staging", update_id).await;
    assert_eq!(status, StatusCode::OK);

    let (status, _, _) = send(
        &h.app,
        Request::builder()
            .method("POST")
            .uri("/rollback/staging?runtimeVersion=1&platform=ios&commitHash=h")
            .header("authorization", format!("Bearer {OPERATOR_TOKEN}"))
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    // Client already on its embedded bundle: nothing to do.
    let (status, headers, body) = send(
        &h.app,
        manifest_request(&[
            ("expo-current-update-id", "embedded-uuid"),
            ("expo-embedded-update-id", "embedded-uuid"),
        ]),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let (_, json) = parse_multipart(&headers, &body);
    let directive: serde_json::Value = serde_json::from_slice(&json).unwrap();
    assert_eq!(directive["type"], "noUpdateAvailable");

    // Client on another update: roll back to embedded.
    let (status, headers, body) = send(
        &h.app,
        manifest_request(&[
            ("expo-current-update-id", "other-uuid"),
            ("expo-embedded-update-id", "embedded-uuid"),
        ]),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let (part_headers, json) = parse_multipart(&headers, &body);
    assert!(part_headers.contains("name=\"directive\""));
    let directive: serde_json::Value = serde_json::from_slice(&json).unwrap();
    assert_eq!(directive["type"], "rollBackToEmbedded");
    let commit_time = directive["parameters"]["commitTime"].as_str().unwrap();
    assert!(commit_time.ends_with('Z'));

    // Protocol 0 clients cannot express rollbacks.
    let (status, _, _) = send(
        &h.app,
        Request::builder()
            .uri("/manifest")
            .header("expo-channel-name", "staging")
            .header("expo-platform", "ios")
            .header("expo-runtime-version", "1")
            .header("expo-protocol-version", "0")
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    // Missing embedded id is a protocol violation.
    let (status, _, _) = send(
        &h.app,
        manifest_request(&[("expo-current-update-id", "other-uuid")]),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

// ---------------------------------------------------------------------------
// Scenario: republish
// ---------------------------------------------------------------------------

#[tokio::test]
async fn republish_serves_new_identity_for_same_content() {
    let upstream = MockServer::start().await;
    mount_upstream(&upstream).await;
    let h = harness(&upstream, false).await;

    let update_id = publish_update(&h.app, "staging").await;
    let (status, body) = mark_uploaded(&h.app, "staging", update_id).await;
    assert_eq!(status, StatusCode::OK);
    let first_uuid = serde_json::from_slice::<serde_json::Value>(&body).unwrap()["updateUUID"]
        .as_str()
        .unwrap()
        .to_string();

    let (status, _, body) = send(
        &h.app,
        Request::builder()
            .method("POST")
            .uri(format!(
                "/republish/staging?runtimeVersion=1&platform=ios&updateId={update_id}&commitHash=c2"
            ))
            .header("authorization", format!("Bearer {OPERATOR_TOKEN}"))
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{}", String::from_utf8_lossy(&body));
    let republished: serde_json::Value = serde_json::from_slice(&body).unwrap();
    let new_id = republished["updateId"].as_i64().unwrap();
    assert!(new_id > update_id);

    let (status, headers, body) = send(&h.app, manifest_request(&[])).await;
    assert_eq!(status, StatusCode::OK);
    let (_, json) = parse_multipart(&headers, &body);
    let manifest: serde_json::Value = serde_json::from_slice(&json).unwrap();
    assert_ne!(manifest["id"], first_uuid);
}

// ---------------------------------------------------------------------------
// Scenario: channel override
// ---------------------------------------------------------------------------

#[tokio::test]
async fn channel_override_resolves_other_branch() {
    let upstream = MockServer::start().await;
    mount_upstream(&upstream).await;
    let h = harness(&upstream, false).await;

    let update_id = publish_update(&h.app, "prod-branch").await;
    let (status, _) = mark_uploaded(&h.app, "prod-branch", update_id).await;
    assert_eq!(status, StatusCode::OK);

    let (status, headers, body) = send(
        &h.app,
        manifest_request(&[(
            "expo-extra-params",
            "ow-expo-channel=\"production\"",
        )]),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        headers.get("expo-manifest-filters").unwrap(),
        "branch=\"prod-branch\""
    );
    let (_, json) = parse_multipart(&headers, &body);
    let manifest: serde_json::Value = serde_json::from_slice(&json).unwrap();
    assert_eq!(manifest["metadata"]["branch"], "prod-branch");
}

// ---------------------------------------------------------------------------
// Scenario: asset fetch, direct and via CDN
// ---------------------------------------------------------------------------

#[tokio::test]
async fn asset_fetch_streams_bytes() {
    let upstream = MockServer::start().await;
    mount_upstream(&upstream).await;
    let h = harness(&upstream, false).await;

    let update_id = publish_update(&h.app, "staging").await;
    let (status, _) = mark_uploaded(&h.app, "staging", update_id).await;
    assert_eq!(status, StatusCode::OK);

    let (status, headers, body) = send(
        &h.app,
        Request::builder()
            .uri("/assets?asset=bundles%2Fios-abc.js&runtimeVersion=1&platform=ios")
            .header("expo-channel-name", "staging")
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(headers.get("content-type").unwrap(), "application/javascript");
    assert_eq!(
        headers.get("cache-control").unwrap(),
        "public, max-age=31536000"
    );
    assert_eq!(body, b"console.log('bundle')");

    // Gzip negotiation.
    let (status, headers, _) = send(
        &h.app,
        Request::builder()
            .uri("/assets?asset=assets%2F4f1.png&runtimeVersion=1&platform=ios")
            .header("expo-channel-name", "staging")
            .header("accept-encoding", "gzip")
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(headers.get("content-encoding").unwrap(), "gzip");
    assert_eq!(headers.get("content-type").unwrap(), "image/png");
}

#[tokio::test]
async fn asset_fetch_redirects_to_signed_cdn_url() {
    let upstream = MockServer::start().await;
    mount_upstream(&upstream).await;
    let h = harness(&upstream, true).await;

    let update_id = publish_update(&h.app, "staging").await;
    let (status, _) = mark_uploaded(&h.app, "staging", update_id).await;
    assert_eq!(status, StatusCode::OK);

    let (status, headers, _) = send(
        &h.app,
        Request::builder()
            .uri("/assets?asset=bundles%2Fios-abc.js&runtimeVersion=1&platform=ios")
            .header("expo-channel-name", "staging")
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::FOUND);
    let location = headers.get("location").unwrap().to_str().unwrap();
    assert!(location.starts_with(&format!(
        "https://d111.cloudfront.net/staging/1/{update_id}/bundles/ios-abc.js?"
    )));
    assert!(location.contains("Expires="));
    assert!(location.contains("Signature="));
    assert!(location.contains("Key-Pair-Id=K2JCJMDEHXQW5F"));

    // The escape hatch forces a direct stream.
    let (status, _, body) = send(
        &h.app,
        Request::builder()
            .uri("/assets?asset=bundles%2Fios-abc.js&runtimeVersion=1&platform=ios")
            .header("expo-channel-name", "staging")
            .header("prevent-cdn-redirection", "true")
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, b"console.log('bundle')");
}
