// SPDX-License-Identifier: MIT OR Apache-2.0
//! Operator login and dashboard session tokens.
//!
//! The dashboard authenticates with a single operator password exchanged
//! for an HS256 access/refresh token pair.  Both tokens share the
//! `admin-dashboard` subject; the `type` claim keeps them apart so a
//! refresh token can never be replayed as an access token.

use crate::api::ApiError;
use crate::headers::bearer_token;
use crate::state::AppState;
use axum::Json;
use axum::extract::{Request, State};
use axum::http::StatusCode;
use axum::middleware::Next;
use axum::response::Response;
use chrono::Utc;
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

const SESSION_SUBJECT: &str = "admin-dashboard";
const ACCESS_TOKEN_TTL: Duration = Duration::from_secs(2 * 60 * 60);
const REFRESH_TOKEN_TTL: Duration = Duration::from_secs(7 * 24 * 60 * 60);

#[derive(Debug, Serialize, Deserialize)]
struct SessionClaims {
    sub: String,
    exp: i64,
    iat: i64,
    #[serde(rename = "type")]
    token_type: String,
}

/// Access/refresh token pair returned by login and refresh.
#[derive(Debug, Serialize, Deserialize)]
pub struct AuthTokens {
    /// Short-lived access token.
    pub token: String,
    /// Long-lived refresh token.
    #[serde(rename = "refreshToken")]
    pub refresh_token: String,
}

fn issue_token(secret: &str, token_type: &str, ttl: Duration) -> Result<String, ApiError> {
    let now = Utc::now();
    let claims = SessionClaims {
        sub: SESSION_SUBJECT.to_string(),
        exp: (now + ttl).timestamp(),
        iat: now.timestamp(),
        token_type: token_type.to_string(),
    };
    jsonwebtoken::encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .map_err(|_| ApiError::internal("failed to issue session token"))
}

/// Issue a fresh access/refresh pair.
pub fn issue_session_tokens(secret: &str) -> Result<AuthTokens, ApiError> {
    Ok(AuthTokens {
        token: issue_token(secret, "token", ACCESS_TOKEN_TTL)?,
        refresh_token: issue_token(secret, "refreshToken", REFRESH_TOKEN_TTL)?,
    })
}

/// Validate a session token of the expected type.
pub fn validate_session_token(
    secret: &str,
    token: &str,
    expected_type: &str,
) -> Result<(), ApiError> {
    let decoded = jsonwebtoken::decode::<SessionClaims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )
    .map_err(|_| ApiError::unauthorized("invalid token"))?;
    if decoded.claims.sub != SESSION_SUBJECT {
        return Err(ApiError::unauthorized("invalid token subject"));
    }
    if decoded.claims.token_type != expected_type {
        return Err(ApiError::unauthorized("invalid token type"));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

/// Body of `POST /auth/login`.
#[derive(Debug, Deserialize)]
pub struct LoginBody {
    /// The operator password.
    #[serde(default)]
    pub password: String,
}

/// `POST /auth/login`.
pub async fn login(
    State(state): State<Arc<AppState>>,
    Json(body): Json<LoginBody>,
) -> Result<Json<AuthTokens>, ApiError> {
    if !state.config.dashboard_enabled {
        return Err(ApiError::not_found("dashboard is disabled"));
    }
    let Some(admin_password) = &state.config.admin_password else {
        return Err(ApiError::internal("ADMIN_PASSWORD is not configured"));
    };
    if body.password.is_empty() || body.password != *admin_password {
        return Err(ApiError::unauthorized("invalid password"));
    }
    Ok(Json(issue_session_tokens(&state.config.jwt_secret)?))
}

/// Body of `POST /auth/refreshToken`.
#[derive(Debug, Deserialize)]
pub struct RefreshBody {
    /// The refresh token from a previous login.
    #[serde(rename = "refreshToken", default)]
    pub refresh_token: String,
}

/// `POST /auth/refreshToken`.
pub async fn refresh_token(
    State(state): State<Arc<AppState>>,
    Json(body): Json<RefreshBody>,
) -> Result<Json<AuthTokens>, ApiError> {
    if !state.config.dashboard_enabled {
        return Err(ApiError::not_found("dashboard is disabled"));
    }
    validate_session_token(&state.config.jwt_secret, &body.refresh_token, "refreshToken")?;
    Ok(Json(issue_session_tokens(&state.config.jwt_secret)?))
}

/// Middleware guarding the dashboard sub-router.
pub async fn dashboard_auth(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    if !state.config.dashboard_enabled {
        return Err(ApiError::new(StatusCode::NOT_FOUND, "dashboard is disabled"));
    }
    let token = bearer_token(request.headers())
        .ok_or_else(|| ApiError::unauthorized("no authorization header provided"))?;
    validate_session_token(&state.config.jwt_secret, &token, "token")?;
    Ok(next.run(request).await)
}
