// SPDX-License-Identifier: MIT OR Apache-2.0
//! Core data model shared by every crate of the OTA update server.
//!
//! This crate defines the storage layout constants, the update identity
//! ([`UpdateRef`]), the JSON shapes persisted inside an update prefix
//! (`metadata.json`, `update-metadata.json`), and the wire values returned
//! to polling clients (manifests and directives).

#![deny(unsafe_code)]
#![warn(missing_docs)]

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// ---------------------------------------------------------------------------
// Storage layout
// ---------------------------------------------------------------------------

/// Well-known file names inside an update prefix.
pub mod files {
    /// Bundler output: per-platform bundle path plus asset list.
    pub const METADATA: &str = "metadata.json";
    /// App-config blob returned verbatim to clients.
    pub const EXPO_CONFIG: &str = "expoConfig.json";
    /// Server-assigned fields: platform, commit hash, update UUID.
    pub const STORED_METADATA: &str = "update-metadata.json";
    /// Commit witness. An update is servable iff this sentinel exists.
    pub const CHECK_SENTINEL: &str = ".check";
    /// Marks the update as a rollback directive instead of a bundle.
    pub const ROLLBACK_SENTINEL: &str = "rollback";
    /// Top-level newline-separated log of applied migration ids.
    pub const MIGRATION_HISTORY: &str = ".migrationhistory";
}

// ---------------------------------------------------------------------------
// Platform
// ---------------------------------------------------------------------------

/// Mobile platform an update targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    /// Apple iOS.
    Ios,
    /// Android.
    Android,
}

impl Platform {
    /// Lowercase wire representation (`"ios"` / `"android"`).
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ios => "ios",
            Self::Android => "android",
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing an unknown platform string.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown platform: {0}")]
pub struct UnknownPlatform(
    /// The rejected input.
    pub String,
);

impl FromStr for Platform {
    type Err = UnknownPlatform;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ios" => Ok(Self::Ios),
            "android" => Ok(Self::Android),
            other => Err(UnknownPlatform(other.to_string())),
        }
    }
}

// ---------------------------------------------------------------------------
// UpdateRef
// ---------------------------------------------------------------------------

/// Identity of an update: `(branch, runtimeVersion, updateId)`.
///
/// The update id is a millisecond timestamp; its numeric value is both the
/// creation time and the ordering key within `(branch, runtimeVersion)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UpdateRef {
    /// Publishing line the update belongs to.
    pub branch: String,
    /// Native-binary compatibility identifier.
    #[serde(rename = "runtimeVersion")]
    pub runtime_version: String,
    /// Millisecond timestamp minted when the upload began.
    #[serde(rename = "updateId")]
    pub update_id: i64,
}

impl UpdateRef {
    /// Build a reference from its parts.
    pub fn new(
        branch: impl Into<String>,
        runtime_version: impl Into<String>,
        update_id: i64,
    ) -> Self {
        Self {
            branch: branch.into(),
            runtime_version: runtime_version.into(),
            update_id,
        }
    }

    /// Storage prefix `branch/runtimeVersion/updateId/` (no trailing slash).
    pub fn prefix(&self) -> String {
        format!("{}/{}/{}", self.branch, self.runtime_version, self.update_id)
    }

    /// Full storage key of a file inside this update.
    pub fn key(&self, file_name: &str) -> String {
        format!("{}/{}", self.prefix(), file_name)
    }

    /// Creation time derived from the update id.
    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp_millis(self.update_id)
    }

    /// Creation time rendered as `YYYY-MM-DDTHH:MM:SS.sssZ`.
    pub fn created_at_iso(&self) -> String {
        self.created_at()
            .map(format_commit_time)
            .unwrap_or_default()
    }
}

impl fmt::Display for UpdateRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.prefix())
    }
}

/// Render a timestamp in the millisecond-precision UTC form the update
/// protocol uses (`2006-01-02T15:04:05.000Z`).
pub fn format_commit_time(ts: DateTime<Utc>) -> String {
    ts.format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string()
}

// ---------------------------------------------------------------------------
// metadata.json
// ---------------------------------------------------------------------------

/// A single asset entry in the bundler output.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetRef {
    /// Path relative to the update prefix.
    pub path: String,
    /// File extension without the leading dot.
    pub ext: String,
}

/// Per-platform section of `metadata.json`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlatformMetadata {
    /// Path of the launch bundle, empty when the platform is absent.
    #[serde(default)]
    pub bundle: String,
    /// Assets referenced by the bundle.
    #[serde(default)]
    pub assets: Vec<AssetRef>,
}

/// The `fileMetadata` object of `metadata.json`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileMetadata {
    /// Android section.
    #[serde(default)]
    pub android: PlatformMetadata,
    /// iOS section.
    #[serde(default)]
    pub ios: PlatformMetadata,
}

/// Bundler output persisted as `metadata.json` inside each normal update.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetadataJson {
    /// Metadata format version.
    #[serde(default)]
    pub version: i64,
    /// Name of the bundler that produced the update.
    #[serde(default)]
    pub bundler: String,
    /// Per-platform bundle and asset listing.
    #[serde(rename = "fileMetadata", default)]
    pub file_metadata: FileMetadata,
}

impl MetadataJson {
    /// The section for `platform`.
    pub fn platform(&self, platform: Platform) -> &PlatformMetadata {
        match platform {
            Platform::Ios => &self.file_metadata.ios,
            Platform::Android => &self.file_metadata.android,
        }
    }

    /// Every file path the metadata references for platforms that carry a
    /// bundle: the bundles themselves plus all listed assets.
    pub fn referenced_files(&self) -> Vec<&str> {
        let mut out = Vec::new();
        for section in [&self.file_metadata.ios, &self.file_metadata.android] {
            if section.bundle.is_empty() {
                continue;
            }
            out.push(section.bundle.as_str());
            out.extend(section.assets.iter().map(|a| a.path.as_str()));
        }
        out
    }

    /// Whether at least one platform section carries a bundle.
    pub fn has_any_bundle(&self) -> bool {
        !self.file_metadata.ios.bundle.is_empty() || !self.file_metadata.android.bundle.is_empty()
    }
}

// ---------------------------------------------------------------------------
// update-metadata.json
// ---------------------------------------------------------------------------

/// Server-assigned fields persisted as `update-metadata.json`.
///
/// Written provisionally (without `updateUUID`) when an upload begins and
/// rewritten with the UUID at commit time.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredMetadata {
    /// Platform the update targets.
    #[serde(default)]
    pub platform: String,
    /// Commit hash supplied by the publisher.
    #[serde(rename = "commitHash", default)]
    pub commit_hash: String,
    /// Deterministic UUID assigned at commit time.
    #[serde(rename = "updateUUID", default, skip_serializing_if = "Option::is_none")]
    pub update_uuid: Option<String>,
}

// ---------------------------------------------------------------------------
// Manifest and directives
// ---------------------------------------------------------------------------

/// One asset entry of a composed manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestAsset {
    /// Base64url-encoded SHA-256 of the asset bytes.
    pub hash: String,
    /// Hex-encoded MD5 of the asset bytes.
    pub key: String,
    /// Extension with leading dot (`.bundle` for the launch asset).
    #[serde(rename = "fileExtension")]
    pub file_extension: String,
    /// Content type served for the asset.
    #[serde(rename = "contentType")]
    pub content_type: String,
    /// Download URL on this server's `/assets` endpoint.
    pub url: String,
}

/// Extra manifest payload: the verbatim app config plus branch metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtraManifestData {
    /// Contents of `expoConfig.json`, passed through untouched.
    #[serde(rename = "expoClient")]
    pub expo_client: serde_json::Value,
    /// Branch the manifest was composed for.
    pub branch: String,
}

/// The signed manifest returned to a polling client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateManifest {
    /// Deterministic update UUID.
    pub id: String,
    /// Creation time of the update (`YYYY-MM-DDTHH:MM:SS.sssZ`).
    #[serde(rename = "createdAt")]
    pub created_at: String,
    /// Runtime version the update targets.
    #[serde(rename = "runtimeVersion")]
    pub runtime_version: String,
    /// Branch metadata (`{"branch": <name>}`).
    pub metadata: serde_json::Value,
    /// Non-launch assets.
    pub assets: Vec<ManifestAsset>,
    /// The launch bundle.
    #[serde(rename = "launchAsset")]
    pub launch_asset: ManifestAsset,
    /// Extra payload.
    pub extra: ExtraManifestData,
}

/// Parameters of a [`RollbackDirective`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RollbackDirectiveParameters {
    /// Modification time of the `rollback` sentinel.
    #[serde(rename = "commitTime")]
    pub commit_time: String,
}

/// Directive telling the client to return to its embedded bundle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RollbackDirective {
    /// Always `"rollBackToEmbedded"`.
    #[serde(rename = "type")]
    pub directive_type: String,
    /// Directive parameters.
    pub parameters: RollbackDirectiveParameters,
}

impl RollbackDirective {
    /// Build a rollback directive with the given commit time.
    pub fn new(commit_time: DateTime<Utc>) -> Self {
        Self {
            directive_type: "rollBackToEmbedded".to_string(),
            parameters: RollbackDirectiveParameters {
                commit_time: format_commit_time(commit_time),
            },
        }
    }
}

/// Directive telling the client no newer update exists.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NoUpdateAvailableDirective {
    /// Always `"noUpdateAvailable"`.
    #[serde(rename = "type")]
    pub directive_type: String,
}

impl Default for NoUpdateAvailableDirective {
    fn default() -> Self {
        Self {
            directive_type: "noUpdateAvailable".to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// Upload requests
// ---------------------------------------------------------------------------

/// One presigned upload slot returned by the begin-upload operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadRequest {
    /// Presigned PUT URL.
    #[serde(rename = "requestUploadUrl")]
    pub url: String,
    /// Base name of the file.
    #[serde(rename = "fileName")]
    pub file_name: String,
    /// Path of the file relative to the update prefix.
    #[serde(rename = "filePath")]
    pub file_path: String,
}
