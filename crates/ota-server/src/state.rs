// SPDX-License-Identifier: MIT OR Apache-2.0
//! Shared application state and upstream glue.

use crate::cdn::CloudFrontSigner;
use async_trait::async_trait;
use ota_cache::KvCache;
use ota_config::ServerConfig;
use ota_crypto::SigningKeys;
use ota_error::{ErrorKind, OtaError, OtaResult};
use ota_expo::{ExpoClient, ExpoError};
use ota_manifest::ManifestEngine;
use ota_metrics::{ActiveUserTracker, Metrics};
use ota_updates::{BranchEnsurer, LifecycleEngine, UpdateStore};
use std::sync::Arc;

/// Everything a handler needs, shared behind an `Arc`.
pub struct AppState {
    /// Runtime configuration.
    pub config: ServerConfig,
    /// Process-wide KV cache.
    pub cache: Arc<dyn KvCache>,
    /// Typed update storage.
    pub updates: UpdateStore,
    /// The lifecycle state machine.
    pub lifecycle: Arc<LifecycleEngine>,
    /// Manifest composition and signing.
    pub manifests: Arc<ManifestEngine>,
    /// Upstream account-service client.
    pub expo: Arc<ExpoClient>,
    /// Prometheus collectors.
    pub metrics: Arc<Metrics>,
    /// Distinct-client tracking.
    pub active_users: ActiveUserTracker,
    /// Loaded signing keys.
    pub keys: SigningKeys,
    /// CDN signer, when CloudFront is fully configured.
    pub cdn: Option<Arc<CloudFrontSigner>>,
    /// Operator identity pinned into filesystem upload tokens.
    pub operator_id: String,
}

/// Map an upstream error into the server taxonomy.
pub fn expo_err(err: ExpoError) -> OtaError {
    match err {
        ExpoError::Unauthorized(message) => OtaError::new(ErrorKind::Unauthorized, message),
        other => OtaError::new(ErrorKind::Upstream, "channel-mapping provider failed")
            .with_source(other),
    }
}

/// [`BranchEnsurer`] backed by the upstream client.
pub struct ExpoBranches(pub Arc<ExpoClient>);

#[async_trait]
impl BranchEnsurer for ExpoBranches {
    async fn ensure_branch(&self, branch: &str) -> OtaResult<()> {
        self.0.ensure_branch(branch).await.map_err(expo_err)
    }
}
