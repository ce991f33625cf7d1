// SPDX-License-Identifier: MIT OR Apache-2.0
//! Protocol header parsing helpers.

use axum::http::HeaderMap;
use ota_expo::ExpoAuth;
use std::collections::HashMap;

/// Read a header as a string, empty when absent or non-UTF-8.
pub fn header<'a>(headers: &'a HeaderMap, name: &str) -> &'a str {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .unwrap_or("")
}

/// Parse an `expo-extra-params` style list: `k="v", k2="v2"`.
pub fn parse_extra_params(raw: &str) -> HashMap<String, String> {
    let mut params = HashMap::new();
    for pair in raw.split(',') {
        let pair = pair.trim();
        let Some((key, value)) = pair.split_once('=') else {
            continue;
        };
        params.insert(
            key.trim().to_string(),
            value.trim().trim_matches('"').to_string(),
        );
    }
    params
}

/// Resolve the effective channel: `expo-channel-name`, overridden by an
/// `ow-expo-channel` entry in `expo-extra-params` when it differs.
pub fn resolve_channel(headers: &HeaderMap) -> String {
    let channel = header(headers, "expo-channel-name").to_string();
    let extra = parse_extra_params(header(headers, "expo-extra-params"));
    match extra.get("ow-expo-channel") {
        Some(replacement) if !replacement.is_empty() && *replacement != channel => {
            replacement.clone()
        }
        _ => channel,
    }
}

/// Extract a bearer token from the `Authorization` header.
pub fn bearer_token(headers: &HeaderMap) -> Option<String> {
    header(headers, "authorization")
        .strip_prefix("Bearer ")
        .filter(|token| !token.is_empty())
        .map(str::to_string)
}

/// Publisher credential: bearer token, else `expo-session` secret.
pub fn expo_auth(headers: &HeaderMap) -> ExpoAuth {
    if let Some(token) = bearer_token(headers) {
        return ExpoAuth::bearer(token);
    }
    let session = header(headers, "expo-session");
    if !session.is_empty() {
        return ExpoAuth {
            token: None,
            session_secret: Some(session.to_string()),
        };
    }
    ExpoAuth::default()
}
