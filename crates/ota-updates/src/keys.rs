// SPDX-License-Identifier: MIT OR Apache-2.0
//! Cache key construction.
//!
//! Every key embeds the crate version so that a schema change in the cached
//! payloads cannot be misread by an older or newer instance sharing the
//! same Redis.

use ota_types::Platform;

/// Version tag embedded in every cache key.
pub const CACHE_SCHEMA_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Key holding the serialized head update of a triple.
pub fn last_update_key(branch: &str, runtime_version: &str, platform: Platform) -> String {
    format!("lastUpdate:{CACHE_SCHEMA_VERSION}:{branch}:{runtime_version}:{platform}")
}

/// Single-flight lock guarding the head listing of a triple.
pub fn head_lock_key(branch: &str, runtime_version: &str, platform: Platform) -> String {
    format!("lock:head:{CACHE_SCHEMA_VERSION}:{branch}:{runtime_version}:{platform}")
}

/// Key holding a composed manifest.  Content-addressed by update id, so it
/// never needs invalidation.
pub fn manifest_key(
    branch: &str,
    runtime_version: &str,
    update_id: i64,
    platform: Platform,
) -> String {
    format!("manifest:{CACHE_SCHEMA_VERSION}:{branch}:{runtime_version}:{update_id}:{platform}")
}

/// Dashboard branch-listing key.
pub fn dashboard_branches_key() -> String {
    format!("dashboard:{CACHE_SCHEMA_VERSION}:request:getBranches")
}

/// Dashboard runtime-version-listing key.
pub fn dashboard_runtime_versions_key(branch: &str) -> String {
    format!("dashboard:{CACHE_SCHEMA_VERSION}:request:getRuntimeVersions:{branch}")
}

/// Dashboard update-listing key.
pub fn dashboard_updates_key(branch: &str, runtime_version: &str) -> String {
    format!("dashboard:{CACHE_SCHEMA_VERSION}:request:getUpdates:{branch}:{runtime_version}")
}
