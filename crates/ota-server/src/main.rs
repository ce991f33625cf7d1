// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]
use anyhow::{Context, Result};
use clap::Parser;
use ota_cache::cache_from_config;
use ota_config::ServerConfig;
use ota_crypto::key_store_from_config;
use ota_expo::ExpoClient;
use ota_manifest::ManifestEngine;
use ota_metrics::{ActiveUserTracker, Metrics};
use ota_migrate::{builtin_migrations, run_with_lock};
use ota_server::cdn::CloudFrontSigner;
use ota_server::{AppState, ExpoBranches, build_app};
use ota_storage::fs::UploadTokenConfig;
use ota_storage::store_from_config;
use ota_updates::{LifecycleEngine, UpdateStore};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "ota-server", version, about = "Self-hosted Expo OTA update server")]
struct Args {
    /// Bind address.
    #[arg(long, default_value = "0.0.0.0:3000")]
    bind: String,

    /// Enable request/response debug logging.
    #[arg(long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let filter = if args.debug {
        EnvFilter::new("ota=debug,ota_server=debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = ServerConfig::from_env().context("load configuration")?;

    let cache = cache_from_config(&config.cache, &config.cache_key_prefix)
        .await
        .context("connect cache")?;

    let expo = Arc::new(ExpoClient::new(
        config.expo_access_token.clone(),
        config.expo_app_id.clone(),
    ));

    // The operator identity pins filesystem upload tokens to this
    // deployment.  Fall back to the app id when the account service is
    // unreachable at boot.
    let operator_id = match expo.self_username().await {
        Ok(username) => username,
        Err(err) => {
            warn!(error = %err, "could not resolve operator account, using app id");
            config.expo_app_id.clone()
        }
    };

    let store = store_from_config(
        &config.storage,
        UploadTokenConfig {
            base_url: config.base_url.clone(),
            jwt_secret: config.jwt_secret.clone(),
            operator_id: operator_id.clone(),
        },
    )
    .await;

    let keys = key_store_from_config(&config.keys)
        .await
        .load()
        .await
        .context("load signing keys")?;

    let cdn = match (&config.cloudfront, &keys.private_cloudfront_key) {
        (Some(cloudfront), Some(private_key)) => Some(Arc::new(CloudFrontSigner::new(
            cloudfront,
            private_key.clone(),
        ))),
        (Some(_), None) => {
            warn!("CLOUDFRONT_DOMAIN set but no private CloudFront key loaded, CDN disabled");
            None
        }
        _ => None,
    };

    // Migrate before accepting traffic; losers of the lock skip.
    run_with_lock(&cache, &store, builtin_migrations())
        .await
        .context("run migrations")?;

    let updates = UpdateStore::new(Arc::clone(&store));
    let lifecycle = Arc::new(LifecycleEngine::new(
        updates.clone(),
        Arc::clone(&cache),
        Arc::new(ExpoBranches(Arc::clone(&expo))),
    ));
    let manifests = Arc::new(ManifestEngine::new(
        updates.clone(),
        Arc::clone(&cache),
        config.base_url.clone(),
        keys.clone(),
    ));
    let metrics = Arc::new(Metrics::new().context("register metrics")?);
    let active_users = ActiveUserTracker::new(Arc::clone(&cache), Arc::clone(&metrics));

    let state = Arc::new(AppState {
        config,
        cache,
        updates,
        lifecycle,
        manifests,
        expo,
        metrics,
        active_users,
        keys,
        cdn,
        operator_id,
    });

    let app = build_app(state);

    let listener = tokio::net::TcpListener::bind(&args.bind)
        .await
        .with_context(|| format!("bind {}", args.bind))?;
    info!(bind = %args.bind, "ota-server listening");

    axum::serve(listener, app).await.context("serve")
}
