// SPDX-License-Identifier: MIT OR Apache-2.0
//! Prometheus collectors for the update server.
//!
//! Download counters and active-user gauges are write-only telemetry: they
//! never participate in head selection or dedup.  Active users are counted
//! from a deduplicated set of client ids kept in the KV cache, so the gauge
//! survives restarts and is shared across instances in Redis mode.

#![deny(unsafe_code)]

use ota_cache::KvCache;
use ota_types::Platform;
use prometheus::{Encoder, IntCounterVec, IntGaugeVec, Opts, Registry, TextEncoder};
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

/// How long a client id stays in an active-user set without polling again.
const ACTIVE_USER_TTL: Duration = Duration::from_secs(30 * 24 * 60 * 60);

/// Registered collectors.
pub struct Metrics {
    registry: Registry,
    update_downloads: IntCounterVec,
    active_users: IntGaugeVec,
}

impl Metrics {
    /// Create and register all collectors.
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let update_downloads = IntCounterVec::new(
            Opts::new(
                "update_downloads_total",
                "Total number of update downloads per platform, runtime version, branch and update",
            ),
            &["platform", "runtime", "branch", "update", "update_type"],
        )?;
        registry.register(Box::new(update_downloads.clone()))?;

        let active_users = IntGaugeVec::new(
            Opts::new(
                "active_users_total",
                "Distinct polling clients per platform, runtime version, branch and update",
            ),
            &["platform", "runtime", "branch", "update"],
        )?;
        registry.register(Box::new(active_users.clone()))?;

        Ok(Self {
            registry,
            update_downloads,
            active_users,
        })
    }

    /// Count one manifest or directive download.
    pub fn track_update_download(
        &self,
        platform: Platform,
        runtime: &str,
        branch: &str,
        update: &str,
        update_type: &str,
    ) {
        self.update_downloads
            .with_label_values(&[platform.as_str(), runtime, branch, update, update_type])
            .inc();
    }

    /// Publish the current distinct-client count for one update.
    pub fn set_active_users(
        &self,
        platform: Platform,
        runtime: &str,
        branch: &str,
        update: &str,
        count: u64,
    ) {
        self.active_users
            .with_label_values(&[platform.as_str(), runtime, branch, update])
            .set(count as i64);
    }

    /// Total downloads recorded for one update, summed over platforms and
    /// download types (dashboard reporting).
    pub fn update_downloads_count(&self, runtime: &str, branch: &str, update: &str) -> u64 {
        let mut total = 0;
        for platform in [Platform::Ios, Platform::Android] {
            for update_type in ["update", "rollback"] {
                total += self
                    .update_downloads
                    .with_label_values(&[platform.as_str(), runtime, branch, update, update_type])
                    .get();
            }
        }
        total
    }

    /// Prometheus text exposition of every registered collector.
    pub fn gather(&self) -> String {
        let mut buffer = Vec::new();
        let encoder = TextEncoder::new();
        if let Err(err) = encoder.encode(&self.registry.gather(), &mut buffer) {
            warn!(error = %err, "failed to encode metrics");
            return String::new();
        }
        String::from_utf8(buffer).unwrap_or_default()
    }
}

/// Cache key of the active-user set for one `(platform, runtime, branch,
/// update)` combination.
fn active_users_key(platform: Platform, runtime: &str, branch: &str, update: &str) -> String {
    format!("activeUsers:{platform}:{runtime}:{branch}:{update}")
}

/// Tracks distinct polling clients through KV-cache sets.
#[derive(Clone)]
pub struct ActiveUserTracker {
    cache: Arc<dyn KvCache>,
    metrics: Arc<Metrics>,
}

impl ActiveUserTracker {
    /// Build a tracker over the process-wide cache and collectors.
    pub fn new(cache: Arc<dyn KvCache>, metrics: Arc<Metrics>) -> Self {
        Self { cache, metrics }
    }

    /// Record one poll.  A missing client id is ignored; cache failures are
    /// logged and dropped (telemetry must never fail a request).
    pub async fn track(
        &self,
        client_id: &str,
        platform: Platform,
        runtime: &str,
        branch: &str,
        current_update_id: &str,
    ) {
        if client_id.is_empty() {
            return;
        }
        let update = if current_update_id.is_empty() {
            "none"
        } else {
            current_update_id
        };
        let key = active_users_key(platform, runtime, branch, update);
        if let Err(err) = self
            .cache
            .sadd(&key, &[client_id.to_string()], Some(ACTIVE_USER_TTL))
            .await
        {
            warn!(key, error = %err, "failed to record active user");
            return;
        }
        let count = self.cache.scard(&key).await;
        self.metrics
            .set_active_users(platform, runtime, branch, update, count);
    }

    /// Distinct clients currently on one update, summed over platforms.
    pub async fn count(&self, runtime: &str, branch: &str, update: &str) -> u64 {
        let mut total = 0;
        for platform in [Platform::Ios, Platform::Android] {
            total += self
                .cache
                .scard(&active_users_key(platform, runtime, branch, update))
                .await;
        }
        total
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ota_cache::MemoryCache;

    fn tracker() -> (ActiveUserTracker, Arc<Metrics>) {
        let metrics = Arc::new(Metrics::new().unwrap());
        let cache: Arc<dyn KvCache> = Arc::new(MemoryCache::new("test"));
        (ActiveUserTracker::new(cache, metrics.clone()), metrics)
    }

    #[test]
    fn download_counter_appears_in_exposition() {
        let metrics = Metrics::new().unwrap();
        metrics.track_update_download(Platform::Ios, "1", "staging", "uuid-1", "update");
        metrics.track_update_download(Platform::Ios, "1", "staging", "uuid-1", "update");
        let text = metrics.gather();
        assert!(text.contains("update_downloads_total"));
        assert!(text.contains("platform=\"ios\""));
        assert!(text.contains(" 2"));
    }

    #[tokio::test]
    async fn distinct_clients_are_deduplicated() {
        let (tracker, metrics) = tracker();
        tracker.track("client-a", Platform::Ios, "1", "staging", "u1").await;
        tracker.track("client-a", Platform::Ios, "1", "staging", "u1").await;
        tracker.track("client-b", Platform::Ios, "1", "staging", "u1").await;

        assert_eq!(tracker.count("1", "staging", "u1").await, 2);
        let text = metrics.gather();
        assert!(text.contains("active_users_total"));
        assert!(text.contains(" 2"));
    }

    #[tokio::test]
    async fn missing_client_id_is_ignored() {
        let (tracker, _) = tracker();
        tracker.track("", Platform::Ios, "1", "staging", "u1").await;
        assert_eq!(tracker.count("1", "staging", "u1").await, 0);
    }

    #[tokio::test]
    async fn platforms_tracked_separately_but_summed() {
        let (tracker, _) = tracker();
        tracker.track("a", Platform::Ios, "1", "staging", "u1").await;
        tracker.track("b", Platform::Android, "1", "staging", "u1").await;
        assert_eq!(tracker.count("1", "staging", "u1").await, 2);
    }

    #[tokio::test]
    async fn empty_current_update_buckets_as_none() {
        let (tracker, _) = tracker();
        tracker.track("a", Platform::Ios, "1", "staging", "").await;
        assert_eq!(tracker.count("1", "staging", "none").await, 1);
    }
}
