// SPDX-License-Identifier: MIT OR Apache-2.0
//! Lifecycle state-machine behavior over a real filesystem store.

use async_trait::async_trait;
use bytes::Bytes;
use ota_cache::{KvCache, MemoryCache};
use ota_error::{ErrorKind, OtaResult};
use ota_storage::fs::{FsStore, UploadTokenConfig};
use ota_storage::ObjectStore;
use ota_types::{Platform, UpdateRef, files};
use ota_updates::{
    BranchEnsurer, FinalizeOutcome, LifecycleEngine, UpdateKind, UpdateStore, fingerprint,
    update_uuid,
};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

struct RecordingEnsurer {
    calls: AtomicUsize,
}

#[async_trait]
impl BranchEnsurer for RecordingEnsurer {
    async fn ensure_branch(&self, _branch: &str) -> OtaResult<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

struct Harness {
    _dir: tempfile::TempDir,
    store: Arc<dyn ObjectStore>,
    engine: LifecycleEngine,
    ensurer: Arc<RecordingEnsurer>,
}

fn harness() -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let store: Arc<dyn ObjectStore> = Arc::new(FsStore::new(
        dir.path(),
        UploadTokenConfig {
            base_url: "http://localhost:3000".into(),
            jwt_secret: "secret".into(),
            operator_id: "operator".into(),
        },
    ));
    let cache: Arc<dyn KvCache> = Arc::new(MemoryCache::new("test"));
    let ensurer = Arc::new(RecordingEnsurer {
        calls: AtomicUsize::new(0),
    });
    let engine = LifecycleEngine::new(
        UpdateStore::new(Arc::clone(&store)),
        cache,
        ensurer.clone(),
    );
    Harness {
        _dir: dir,
        store,
        engine,
        ensurer,
    }
}

fn ios_metadata() -> &'static [u8] {
    br#"{
        "version": 0,
        "bundler": "metro",
        "fileMetadata": {
            "ios": {
                "bundle": "bundles/ios-abc.js",
                "assets": [{"path": "assets/4f1.png", "ext": "png"}]
            },
            "android": {"bundle": "", "assets": []}
        }
    }"#
}

/// Simulate the client PUTting the update files after begin-upload.
async fn upload_ios_files(store: &Arc<dyn ObjectStore>, update: &UpdateRef, metadata: &[u8]) {
    store
        .put(&update.key(files::METADATA), Bytes::copy_from_slice(metadata))
        .await
        .unwrap();
    store
        .put(&update.key(files::EXPO_CONFIG), Bytes::from_static(b"{\"name\":\"app\"}"))
        .await
        .unwrap();
    store
        .put(&update.key("bundles/ios-abc.js"), Bytes::from_static(b"console.log(1)"))
        .await
        .unwrap();
    store
        .put(&update.key("assets/4f1.png"), Bytes::from_static(b"png-bytes"))
        .await
        .unwrap();
}

async fn publish(h: &Harness, branch: &str, runtime: &str, metadata: &[u8]) -> (UpdateRef, String) {
    let begin = h
        .engine
        .begin_upload(
            branch,
            runtime,
            Platform::Ios,
            "commit-1",
            &[
                "metadata.json".to_string(),
                "expoConfig.json".to_string(),
                "bundles/ios-abc.js".to_string(),
                "assets/4f1.png".to_string(),
            ],
        )
        .await
        .unwrap();
    upload_ios_files(&h.store, &begin.update, metadata).await;
    let outcome = h
        .engine
        .finalize_upload(branch, runtime, Platform::Ios, begin.update.update_id)
        .await
        .unwrap();
    let FinalizeOutcome::Committed { update_uuid } = outcome else {
        panic!("expected commit, got {outcome:?}");
    };
    (begin.update, update_uuid)
}

// ---------------------------------------------------------------------------
// Minting
// ---------------------------------------------------------------------------

#[tokio::test]
async fn minted_ids_are_strictly_increasing() {
    let h = harness();
    let mut last = 0;
    for _ in 0..100 {
        let id = h.engine.mint_update_id();
        assert!(id > last, "{id} not greater than {last}");
        last = id;
    }
}

// ---------------------------------------------------------------------------
// Begin upload
// ---------------------------------------------------------------------------

#[tokio::test]
async fn begin_upload_presigns_unique_files_and_writes_provisional_metadata() {
    let h = harness();
    let begin = h
        .engine
        .begin_upload(
            "staging",
            "1",
            Platform::Ios,
            "abc",
            &[
                "metadata.json".to_string(),
                "bundles/ios-abc.js".to_string(),
                "metadata.json".to_string(), // duplicate collapses
            ],
        )
        .await
        .unwrap();

    assert_eq!(begin.upload_requests.len(), 2);
    assert!(begin.upload_requests.iter().all(|r| r.url.contains("uploadLocalFile?token=")));
    let bundle = begin
        .upload_requests
        .iter()
        .find(|r| r.file_path == "bundles/ios-abc.js")
        .unwrap();
    assert_eq!(bundle.file_name, "ios-abc.js");

    let stored = UpdateStore::new(Arc::clone(&h.store))
        .stored_metadata(&begin.update)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.platform, "ios");
    assert_eq!(stored.commit_hash, "abc");
    assert!(stored.update_uuid.is_none());

    assert_eq!(h.ensurer.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn begin_upload_rejects_empty_file_list() {
    let h = harness();
    let err = h
        .engine
        .begin_upload("staging", "1", Platform::Ios, "abc", &[])
        .await
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::BadRequest);
}

// ---------------------------------------------------------------------------
// Finalize: validation
// ---------------------------------------------------------------------------

#[tokio::test]
async fn finalize_without_metadata_deletes_prefix() {
    let h = harness();
    let begin = h
        .engine
        .begin_upload("staging", "1", Platform::Ios, "abc", &["metadata.json".to_string()])
        .await
        .unwrap();
    // Nothing uploaded.
    let err = h
        .engine
        .finalize_upload("staging", "1", Platform::Ios, begin.update.update_id)
        .await
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::InvalidUpload);
    assert!(h.store.list_objects(&begin.update.prefix()).await.unwrap().is_empty());
}

#[tokio::test]
async fn finalize_with_missing_referenced_file_deletes_prefix() {
    let h = harness();
    let begin = h
        .engine
        .begin_upload("staging", "1", Platform::Ios, "abc", &["metadata.json".to_string()])
        .await
        .unwrap();
    h.store
        .put(&begin.update.key(files::METADATA), Bytes::from_static(ios_metadata()))
        .await
        .unwrap();
    // Bundle and asset never uploaded.
    let err = h
        .engine
        .finalize_upload("staging", "1", Platform::Ios, begin.update.update_id)
        .await
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::InvalidUpload);
    assert!(h.store.list_objects(&begin.update.prefix()).await.unwrap().is_empty());
}

#[tokio::test]
async fn finalize_rejects_metadata_without_any_bundle() {
    let h = harness();
    let begin = h
        .engine
        .begin_upload("staging", "1", Platform::Ios, "abc", &["metadata.json".to_string()])
        .await
        .unwrap();
    h.store
        .put(
            &begin.update.key(files::METADATA),
            Bytes::from_static(b"{\"version\":0,\"bundler\":\"metro\",\"fileMetadata\":{}}"),
        )
        .await
        .unwrap();
    let err = h
        .engine
        .finalize_upload("staging", "1", Platform::Ios, begin.update.update_id)
        .await
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::InvalidUpload);
}

// ---------------------------------------------------------------------------
// Finalize: commit and the witness
// ---------------------------------------------------------------------------

#[tokio::test]
async fn committed_update_has_witness_and_uuid() {
    let h = harness();
    let (update, uuid) = publish(&h, "staging", "1", ios_metadata()).await;

    let updates = UpdateStore::new(Arc::clone(&h.store));
    assert!(updates.is_committed(&update).await.unwrap());
    let stored = updates.stored_metadata(&update).await.unwrap().unwrap();
    assert_eq!(stored.update_uuid.as_deref(), Some(uuid.as_str()));

    // The UUID is the deterministic function of metadata + triple + id.
    let metadata = updates.metadata(&update).await.unwrap();
    assert_eq!(uuid, update_uuid(&metadata, update.update_id, "staging", "1"));
}

#[tokio::test]
async fn uncommitted_update_is_invisible_to_head_selection() {
    let h = harness();
    let begin = h
        .engine
        .begin_upload("staging", "1", Platform::Ios, "abc", &["metadata.json".to_string()])
        .await
        .unwrap();
    upload_ios_files(&h.store, &begin.update, ios_metadata()).await;
    // Provisional update-metadata.json exists with a matching platform,
    // but no `.check` yet.
    let head = h
        .engine
        .latest_servable("staging", "1", Platform::Ios)
        .await
        .unwrap();
    assert_eq!(head, None);
}

#[tokio::test]
async fn head_is_greatest_committed_id_for_platform() {
    let h = harness();
    let (first, _) = publish(&h, "staging", "1", ios_metadata()).await;

    let altered = ios_metadata().to_vec();
    let altered = String::from_utf8(altered).unwrap().replace("ios-abc", "ios-def");
    let begin = h
        .engine
        .begin_upload("staging", "1", Platform::Ios, "commit-2", &["metadata.json".to_string()])
        .await
        .unwrap();
    h.store
        .put(&begin.update.key(files::METADATA), Bytes::from(altered.clone().into_bytes()))
        .await
        .unwrap();
    h.store
        .put(&begin.update.key("bundles/ios-def.js"), Bytes::from_static(b"2"))
        .await
        .unwrap();
    h.store
        .put(&begin.update.key("assets/4f1.png"), Bytes::from_static(b"png"))
        .await
        .unwrap();
    h.engine
        .finalize_upload("staging", "1", Platform::Ios, begin.update.update_id)
        .await
        .unwrap();

    let head = h
        .engine
        .latest_servable("staging", "1", Platform::Ios)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(head.update_id, begin.update.update_id);
    assert!(head.update_id > first.update_id);
}

// ---------------------------------------------------------------------------
// Dedup
// ---------------------------------------------------------------------------

#[tokio::test]
async fn identical_upload_is_discarded_and_head_unchanged() {
    let h = harness();
    let (first, _) = publish(&h, "staging", "1", ios_metadata()).await;

    let begin = h
        .engine
        .begin_upload("staging", "1", Platform::Ios, "commit-2", &["metadata.json".to_string()])
        .await
        .unwrap();
    upload_ios_files(&h.store, &begin.update, ios_metadata()).await;
    let outcome = h
        .engine
        .finalize_upload("staging", "1", Platform::Ios, begin.update.update_id)
        .await
        .unwrap();

    assert_eq!(outcome, FinalizeOutcome::Duplicate);
    // The duplicate's prefix is gone.
    assert!(h.store.list_objects(&begin.update.prefix()).await.unwrap().is_empty());
    // The head is still the first update.
    let head = h
        .engine
        .latest_servable("staging", "1", Platform::Ios)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(head.update_id, first.update_id);
}

#[tokio::test]
async fn cross_platform_uploads_do_not_dedup() {
    let h = harness();
    publish(&h, "staging", "1", ios_metadata()).await;

    // Same bytes, android platform: the ios head is invisible to android
    // so no dedup happens; metadata needs an android bundle though.
    let both = br#"{
        "version": 0,
        "bundler": "metro",
        "fileMetadata": {
            "ios": {"bundle": "bundles/ios-abc.js", "assets": [{"path": "assets/4f1.png", "ext": "png"}]},
            "android": {"bundle": "bundles/android-abc.js", "assets": []}
        }
    }"#;
    let begin = h
        .engine
        .begin_upload("staging", "1", Platform::Android, "commit-2", &["metadata.json".to_string()])
        .await
        .unwrap();
    upload_ios_files(&h.store, &begin.update, both).await;
    h.store
        .put(&begin.update.key("bundles/android-abc.js"), Bytes::from_static(b"a"))
        .await
        .unwrap();
    let outcome = h
        .engine
        .finalize_upload("staging", "1", Platform::Android, begin.update.update_id)
        .await
        .unwrap();
    assert!(matches!(outcome, FinalizeOutcome::Committed { .. }));
}

// ---------------------------------------------------------------------------
// Fingerprint properties
// ---------------------------------------------------------------------------

#[tokio::test]
async fn fingerprint_ignores_update_id_but_uuid_does_not() {
    let h = harness();
    let (update, _) = publish(&h, "staging", "1", ios_metadata()).await;
    let updates = UpdateStore::new(Arc::clone(&h.store));
    let metadata = updates.metadata(&update).await.unwrap();

    assert_eq!(
        fingerprint(&metadata, "staging", "1"),
        fingerprint(&metadata, "staging", "1")
    );
    assert_ne!(
        fingerprint(&metadata, "staging", "1"),
        fingerprint(&metadata, "production", "1")
    );
    assert_ne!(
        update_uuid(&metadata, 1, "staging", "1"),
        update_uuid(&metadata, 2, "staging", "1")
    );
}

// ---------------------------------------------------------------------------
// Rollback
// ---------------------------------------------------------------------------

#[tokio::test]
async fn rollback_is_committed_and_becomes_head() {
    let h = harness();
    publish(&h, "staging", "1", ios_metadata()).await;
    let rollback = h
        .engine
        .create_rollback("staging", "1", Platform::Ios, "deadbeef")
        .await
        .unwrap();

    let updates = UpdateStore::new(Arc::clone(&h.store));
    assert!(updates.is_committed(&rollback).await.unwrap());
    assert_eq!(updates.update_kind(&rollback).await.unwrap(), UpdateKind::Rollback);
    assert!(updates.rollback_sentinel(&rollback).await.unwrap().is_some());

    let head = h
        .engine
        .latest_servable("staging", "1", Platform::Ios)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(head.update_id, rollback.update_id);
}

#[tokio::test]
async fn upload_after_rollback_commits_without_dedup() {
    let h = harness();
    let (_, first_uuid) = publish(&h, "staging", "1", ios_metadata()).await;
    h.engine
        .create_rollback("staging", "1", Platform::Ios, "h")
        .await
        .unwrap();

    // Identical content again: the head is a rollback, so dedup is
    // impossible and the upload must commit.
    let begin = h
        .engine
        .begin_upload("staging", "1", Platform::Ios, "commit-3", &["metadata.json".to_string()])
        .await
        .unwrap();
    upload_ios_files(&h.store, &begin.update, ios_metadata()).await;
    let outcome = h
        .engine
        .finalize_upload("staging", "1", Platform::Ios, begin.update.update_id)
        .await
        .unwrap();
    match outcome {
        FinalizeOutcome::Committed { update_uuid } => assert_ne!(update_uuid, first_uuid),
        other => panic!("expected commit, got {other:?}"),
    }
}

// ---------------------------------------------------------------------------
// Republish
// ---------------------------------------------------------------------------

#[tokio::test]
async fn republish_copies_content_under_new_id() {
    let h = harness();
    let (original, original_uuid) = publish(&h, "staging", "1", ios_metadata()).await;

    let republished = h
        .engine
        .republish(&original, Platform::Ios, "commit-2")
        .await
        .unwrap();
    assert!(republished.update_id > original.update_id);

    let updates = UpdateStore::new(Arc::clone(&h.store));
    assert!(updates.is_committed(&republished).await.unwrap());

    // fingerprint(U') == fingerprint(U), updateId(U') > updateId(U)
    let original_meta = updates.metadata(&original).await.unwrap();
    let republished_meta = updates.metadata(&republished).await.unwrap();
    assert_eq!(
        fingerprint(&original_meta, "staging", "1"),
        fingerprint(&republished_meta, "staging", "1")
    );

    // New UUID, fresh commit hash.
    let stored = updates.stored_metadata(&republished).await.unwrap().unwrap();
    assert_ne!(stored.update_uuid.as_deref(), Some(original_uuid.as_str()));
    assert_eq!(stored.commit_hash, "commit-2");

    // The bundle bytes came along.
    let bundle = updates.file(&republished, "bundles/ios-abc.js").await.unwrap();
    assert_eq!(&bundle.bytes[..], b"console.log(1)");
}

#[tokio::test]
async fn republish_rejects_rollbacks_and_platform_mismatch() {
    let h = harness();
    let (original, _) = publish(&h, "staging", "1", ios_metadata()).await;

    let err = h
        .engine
        .republish(&original, Platform::Android, "c")
        .await
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::BadRequest);

    let rollback = h
        .engine
        .create_rollback("staging", "1", Platform::Ios, "h")
        .await
        .unwrap();
    let err = h
        .engine
        .republish(&rollback, Platform::Ios, "c")
        .await
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::BadRequest);
}

#[tokio::test]
async fn republish_rejects_uncommitted_update() {
    let h = harness();
    let ghost = UpdateRef::new("staging", "1", 12345);
    let err = h
        .engine
        .republish(&ghost, Platform::Ios, "c")
        .await
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::BadRequest);
}

// ---------------------------------------------------------------------------
// Head cache behavior
// ---------------------------------------------------------------------------

#[tokio::test]
async fn head_cache_serves_after_first_lookup() {
    let h = harness();
    let (update, _) = publish(&h, "staging", "1", ios_metadata()).await;

    let first = h
        .engine
        .latest_servable("staging", "1", Platform::Ios)
        .await
        .unwrap();
    // Remove the tree behind the cache's back: a cached head keeps serving.
    h.store.delete_prefix(&update.prefix()).await.unwrap();
    let second = h
        .engine
        .latest_servable("staging", "1", Platform::Ios)
        .await
        .unwrap();
    assert_eq!(first, second);
}

#[tokio::test]
async fn concurrent_head_misses_agree() {
    let h = harness();
    let (update, _) = publish(&h, "staging", "1", ios_metadata()).await;
    let engine = Arc::new(h.engine);

    let mut tasks = Vec::new();
    for _ in 0..8 {
        let engine = Arc::clone(&engine);
        tasks.push(tokio::spawn(async move {
            engine.latest_servable("staging", "1", Platform::Ios).await
        }));
    }
    for task in tasks {
        let head = task.await.unwrap().unwrap().unwrap();
        assert_eq!(head.update_id, update.update_id);
    }
}
