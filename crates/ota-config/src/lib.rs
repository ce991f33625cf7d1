// SPDX-License-Identifier: MIT OR Apache-2.0
//! Configuration loading and validation for the OTA update server.
//!
//! All options come from environment variables (the deployment surface is a
//! container).  [`ServerConfig::from_env`] reads the process environment;
//! [`ServerConfig::from_lookup`] accepts any `name -> value` function, which
//! is what the tests use.  Validation is collected: every problem found is
//! reported in a single [`ConfigError::Validation`].

#![deny(unsafe_code)]
#![warn(missing_docs)]

use url::Url;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors that can occur during configuration loading or validation.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Semantic validation failed (one or more problems).
    #[error("config validation failed: {reasons:?}")]
    Validation {
        /// Individual validation failure messages.
        reasons: Vec<String>,
    },
}

// ---------------------------------------------------------------------------
// Sub-configs
// ---------------------------------------------------------------------------

/// Object-store backend selection (`STORAGE_MODE`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageConfig {
    /// Filesystem store rooted at `LOCAL_BUCKET_BASE_PATH`.
    Local {
        /// Base directory for the update tree.
        base_path: String,
    },
    /// S3 or S3-compatible store.
    S3 {
        /// `S3_BUCKET_NAME`.
        bucket: String,
        /// `AWS_REGION`.
        region: String,
        /// `AWS_BASE_ENDPOINT`, for S3-compatible providers.
        base_endpoint: Option<String>,
    },
}

/// KV cache backend selection (`CACHE_MODE`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheConfig {
    /// In-process map.
    Local,
    /// Redis server.
    Redis {
        /// `REDIS_HOST`.
        host: String,
        /// `REDIS_PORT`.
        port: u16,
        /// `REDIS_PASSWORD`.
        password: Option<String>,
        /// `REDIS_USE_TLS`.
        use_tls: bool,
    },
}

/// Signing-key material source (`KEYS_STORAGE_TYPE`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeysConfig {
    /// PEM files on disk.
    Local {
        /// `PUBLIC_LOCAL_EXPO_KEY_PATH`.
        public_key_path: String,
        /// `PRIVATE_LOCAL_EXPO_KEY_PATH`.
        private_key_path: String,
        /// `PRIVATE_CLOUDFRONT_KEY_PATH`.
        cloudfront_key_path: Option<String>,
    },
    /// AWS Secrets Manager secret ids.
    AwsSecretsManager {
        /// `AWSSM_EXPO_PUBLIC_KEY_SECRET_ID`.
        public_key_secret_id: String,
        /// `AWSSM_EXPO_PRIVATE_KEY_SECRET_ID`.
        private_key_secret_id: String,
        /// `AWSSM_CLOUDFRONT_PRIVATE_KEY_SECRET_ID`.
        cloudfront_key_secret_id: Option<String>,
    },
    /// Base64-encoded PEM blobs in the environment.
    Environment {
        /// `PUBLIC_EXPO_KEY_B64`.
        public_key_b64: String,
        /// `PRIVATE_EXPO_KEY_B64`.
        private_key_b64: String,
        /// `PRIVATE_CLOUDFRONT_KEY_B64`.
        cloudfront_key_b64: Option<String>,
    },
}

/// Optional CDN redirection settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloudfrontConfig {
    /// `CLOUDFRONT_DOMAIN`, e.g. `https://dxxxx.cloudfront.net`.
    pub domain: String,
    /// `CLOUDFRONT_KEY_PAIR_ID`.
    pub key_pair_id: String,
}

// ---------------------------------------------------------------------------
// ServerConfig
// ---------------------------------------------------------------------------

/// Top-level runtime configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    /// Public base URL of this server (`BASE_URL`).
    pub base_url: String,
    /// HS256 secret for upload tokens and dashboard sessions (`JWT_SECRET`).
    pub jwt_secret: String,
    /// Access token for the upstream account service (`EXPO_ACCESS_TOKEN`).
    pub expo_access_token: String,
    /// Application id at the upstream account service (`EXPO_APP_ID`).
    pub expo_app_id: String,
    /// Object-store backend.
    pub storage: StorageConfig,
    /// Cache backend.
    pub cache: CacheConfig,
    /// Prefix prepended to every cache key (`CACHE_KEY_PREFIX`).
    pub cache_key_prefix: String,
    /// Signing-key source.
    pub keys: KeysConfig,
    /// CDN redirection, when fully configured.
    pub cloudfront: Option<CloudfrontConfig>,
    /// Expose `/metrics` (`PROMETHEUS_ENABLED`).
    pub prometheus_enabled: bool,
    /// Enable the dashboard endpoints (`USE_DASHBOARD`).
    pub dashboard_enabled: bool,
    /// Operator password for dashboard login (`ADMIN_PASSWORD`).
    pub admin_password: Option<String>,
}

/// Default values applied when a variable is unset.
fn default_for(name: &str) -> Option<&'static str> {
    match name {
        "LOCAL_BUCKET_BASE_PATH" => Some("./updates"),
        "STORAGE_MODE" => Some("local"),
        "CACHE_MODE" => Some("local"),
        "CACHE_KEY_PREFIX" => Some("expoopenota"),
        "KEYS_STORAGE_TYPE" => Some("environment"),
        "PUBLIC_LOCAL_EXPO_KEY_PATH" => Some("./keys/public-key.pem"),
        "PRIVATE_LOCAL_EXPO_KEY_PATH" => Some("./keys/private-key.pem"),
        "AWS_REGION" => Some("eu-west-3"),
        "REDIS_PORT" => Some("6379"),
        _ => None,
    }
}

impl ServerConfig {
    /// Load from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load from an arbitrary `name -> value` lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| -> Option<String> {
            lookup(name)
                .filter(|v| !v.is_empty())
                .or_else(|| default_for(name).map(str::to_string))
        };

        let mut reasons = Vec::new();

        let base_url = get("BASE_URL").unwrap_or_default();
        if !is_valid_url(&base_url) {
            reasons.push(format!("invalid BASE_URL: {base_url:?}"));
        }
        let jwt_secret = get("JWT_SECRET").unwrap_or_default();
        if jwt_secret.is_empty() {
            reasons.push("JWT_SECRET not set".to_string());
        }
        let expo_access_token = get("EXPO_ACCESS_TOKEN").unwrap_or_default();
        if expo_access_token.is_empty() {
            reasons.push("EXPO_ACCESS_TOKEN not set".to_string());
        }
        let expo_app_id = get("EXPO_APP_ID").unwrap_or_default();
        if expo_app_id.is_empty() {
            reasons.push("EXPO_APP_ID not set".to_string());
        }

        let storage_mode = get("STORAGE_MODE").unwrap_or_default();
        let storage = match storage_mode.as_str() {
            "local" => StorageConfig::Local {
                base_path: get("LOCAL_BUCKET_BASE_PATH").unwrap_or_default(),
            },
            "s3" => {
                let bucket = get("S3_BUCKET_NAME").unwrap_or_default();
                if bucket.is_empty() {
                    reasons.push("S3_BUCKET_NAME not set".to_string());
                }
                StorageConfig::S3 {
                    bucket,
                    region: get("AWS_REGION").unwrap_or_default(),
                    base_endpoint: get("AWS_BASE_ENDPOINT"),
                }
            }
            other => {
                reasons.push(format!("invalid STORAGE_MODE: {other:?}"));
                StorageConfig::Local {
                    base_path: String::new(),
                }
            }
        };

        let cache_mode = get("CACHE_MODE").unwrap_or_default();
        let cache = match cache_mode.as_str() {
            "local" => CacheConfig::Local,
            "redis" => {
                let host = get("REDIS_HOST").unwrap_or_default();
                if host.is_empty() {
                    reasons.push("REDIS_HOST not set".to_string());
                }
                let port = get("REDIS_PORT")
                    .and_then(|p| p.parse::<u16>().ok())
                    .unwrap_or_else(|| {
                        reasons.push("invalid REDIS_PORT".to_string());
                        0
                    });
                CacheConfig::Redis {
                    host,
                    port,
                    password: get("REDIS_PASSWORD"),
                    use_tls: get("REDIS_USE_TLS").as_deref() == Some("true"),
                }
            }
            other => {
                reasons.push(format!("invalid CACHE_MODE: {other:?}"));
                CacheConfig::Local
            }
        };

        let keys_mode = get("KEYS_STORAGE_TYPE").unwrap_or_default();
        let keys = match keys_mode.as_str() {
            "local" => KeysConfig::Local {
                public_key_path: get("PUBLIC_LOCAL_EXPO_KEY_PATH").unwrap_or_default(),
                private_key_path: get("PRIVATE_LOCAL_EXPO_KEY_PATH").unwrap_or_default(),
                cloudfront_key_path: get("PRIVATE_CLOUDFRONT_KEY_PATH"),
            },
            "aws-secrets-manager" => {
                let public_key_secret_id = get("AWSSM_EXPO_PUBLIC_KEY_SECRET_ID").unwrap_or_default();
                let private_key_secret_id =
                    get("AWSSM_EXPO_PRIVATE_KEY_SECRET_ID").unwrap_or_default();
                if public_key_secret_id.is_empty() || private_key_secret_id.is_empty() {
                    reasons.push(
                        "AWSSM_EXPO_PUBLIC_KEY_SECRET_ID and AWSSM_EXPO_PRIVATE_KEY_SECRET_ID must be set"
                            .to_string(),
                    );
                }
                KeysConfig::AwsSecretsManager {
                    public_key_secret_id,
                    private_key_secret_id,
                    cloudfront_key_secret_id: get("AWSSM_CLOUDFRONT_PRIVATE_KEY_SECRET_ID"),
                }
            }
            "environment" => KeysConfig::Environment {
                public_key_b64: get("PUBLIC_EXPO_KEY_B64").unwrap_or_default(),
                private_key_b64: get("PRIVATE_EXPO_KEY_B64").unwrap_or_default(),
                cloudfront_key_b64: get("PRIVATE_CLOUDFRONT_KEY_B64"),
            },
            other => {
                reasons.push(format!("invalid KEYS_STORAGE_TYPE: {other:?}"));
                KeysConfig::Environment {
                    public_key_b64: String::new(),
                    private_key_b64: String::new(),
                    cloudfront_key_b64: None,
                }
            }
        };

        // CDN redirection is opt-in: only active when both halves are present.
        let cloudfront = match (get("CLOUDFRONT_DOMAIN"), get("CLOUDFRONT_KEY_PAIR_ID")) {
            (Some(domain), Some(key_pair_id)) => Some(CloudfrontConfig {
                domain,
                key_pair_id,
            }),
            _ => None,
        };

        if !reasons.is_empty() {
            return Err(ConfigError::Validation { reasons });
        }

        Ok(Self {
            base_url,
            jwt_secret,
            expo_access_token,
            expo_app_id,
            storage,
            cache,
            cache_key_prefix: get("CACHE_KEY_PREFIX").unwrap_or_default(),
            keys,
            cloudfront,
            prometheus_enabled: get("PROMETHEUS_ENABLED").as_deref() == Some("true"),
            dashboard_enabled: get("USE_DASHBOARD").as_deref() == Some("true"),
            admin_password: get("ADMIN_PASSWORD"),
        })
    }
}

/// A URL is valid when it has both a scheme and a host.
fn is_valid_url(value: &str) -> bool {
    match Url::parse(value) {
        Ok(url) => url.has_host(),
        Err(_) => false,
    }
}
