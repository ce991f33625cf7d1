// SPDX-License-Identifier: MIT OR Apache-2.0
//! HTTP surface of the OTA update server.
//!
//! Client endpoints (`/manifest`, `/assets`), the publisher surface
//! (`/requestUploadUrl`, `/uploadLocalFile`, `/markUpdateAsUploaded`,
//! `/rollback`, `/republish`), operator auth, dashboard listings, the
//! healthcheck, and Prometheus exposition — all wired over the shared
//! [`AppState`].

#![deny(unsafe_code)]

pub mod api;
pub mod cdn;
pub mod compression;
pub mod handlers;
pub mod headers;
pub mod middleware;
mod state;

pub use state::{AppState, ExpoBranches, expo_err};

use axum::Router;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post, put};
use std::sync::Arc;
use tower_http::cors::CorsLayer;

/// Build the router with every route and middleware attached.
pub fn build_app(state: Arc<AppState>) -> Router {
    let auth_routes = Router::new()
        .route("/login", post(handlers::auth::login))
        .route("/refreshToken", post(handlers::auth::refresh_token))
        .layer(CorsLayer::permissive());

    let dashboard_routes = Router::new()
        .route("/branches", get(handlers::dashboard::get_branches))
        .route(
            "/branch/{BRANCH}/runtimeVersions",
            get(handlers::dashboard::get_runtime_versions),
        )
        .route(
            "/branch/{BRANCH}/runtimeVersion/{RUNTIME_VERSION}/updates",
            get(handlers::dashboard::get_updates),
        )
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            handlers::auth::dashboard_auth,
        ));

    Router::new()
        .route("/hc", get(health))
        .route("/metrics", get(metrics))
        .route("/manifest", get(handlers::manifest::manifest))
        .route("/assets", get(handlers::assets::assets))
        .route(
            "/requestUploadUrl/{BRANCH}",
            post(handlers::publish::request_upload_url),
        )
        .route("/uploadLocalFile", put(handlers::publish::upload_local_file))
        .route(
            "/markUpdateAsUploaded/{BRANCH}",
            post(handlers::publish::mark_update_as_uploaded),
        )
        .route("/rollback/{BRANCH}", post(handlers::publish::rollback))
        .route("/republish/{BRANCH}", post(handlers::publish::republish))
        .nest("/auth", auth_routes)
        .nest("/dashboard", dashboard_routes)
        .layer(axum::middleware::from_fn(middleware::request_logger))
        .layer(axum::middleware::from_fn(middleware::request_id_middleware))
        .with_state(state)
}

async fn health() -> impl IntoResponse {
    StatusCode::OK
}

async fn metrics(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    if !state.config.prometheus_enabled {
        return (StatusCode::NOT_FOUND, String::new());
    }
    (StatusCode::OK, state.metrics.gather())
}
