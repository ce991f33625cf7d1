// SPDX-License-Identifier: MIT OR Apache-2.0
//! Content hashing, manifest/URL signing, and signing-key storage.
//!
//! Everything the protocol signs goes through here: SHA-256/MD5 content
//! hashes for manifest assets, the SHA-256→UUID conversion that produces
//! update ids on the wire, RSA-SHA256 signatures over manifest bodies, and
//! RSA-SHA1 signatures for CDN canned policies.  Key material is loaded once
//! per process through the [`KeyStore`] trait, with interchangeable
//! filesystem, environment, and AWS Secrets Manager providers.

#![deny(unsafe_code)]

use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use md5::Md5;
use ota_config::KeysConfig;
use rsa::pkcs1::{DecodeRsaPrivateKey, DecodeRsaPublicKey};
use rsa::pkcs8::{DecodePrivateKey, DecodePublicKey};
use rsa::{Pkcs1v15Sign, RsaPrivateKey, RsaPublicKey};
use sha1::Sha1;
use sha2::{Digest, Sha256, Sha512};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors produced by signing and key loading.
#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    /// PEM parsing failed for both PKCS#1 and PKCS#8 layouts.
    #[error("failed to parse RSA key: {0}")]
    KeyParse(String),

    /// The RSA signature operation failed.
    #[error("failed to sign data: {0}")]
    Sign(#[from] rsa::Error),

    /// A required key is not present in the configured store.
    #[error("missing key material: {0}")]
    MissingKey(String),

    /// Reading key files from disk failed.
    #[error("failed to read key file {path}: {source}")]
    Io {
        /// Path that failed.
        path: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Base64 decoding of environment key material failed.
    #[error("failed to decode base64 key material: {0}")]
    Base64(#[from] base64::DecodeError),

    /// AWS Secrets Manager lookup failed.
    #[error("secrets manager error: {0}")]
    SecretsManager(String),
}

// ---------------------------------------------------------------------------
// Hashing
// ---------------------------------------------------------------------------

/// Digest algorithm for [`create_hash`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HashAlgorithm {
    /// SHA-256.
    Sha256,
    /// SHA-512.
    Sha512,
    /// MD5 (asset keys only).
    Md5,
}

/// Output encoding for [`create_hash`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HashEncoding {
    /// Lowercase hex.
    Hex,
    /// Standard base64 with padding.
    Base64,
}

/// Hash `data` and encode the digest.
pub fn create_hash(data: &[u8], algorithm: HashAlgorithm, encoding: HashEncoding) -> String {
    let digest: Vec<u8> = match algorithm {
        HashAlgorithm::Sha256 => Sha256::digest(data).to_vec(),
        HashAlgorithm::Sha512 => Sha512::digest(data).to_vec(),
        HashAlgorithm::Md5 => Md5::digest(data).to_vec(),
    };
    match encoding {
        HashEncoding::Hex => hex::encode(digest),
        HashEncoding::Base64 => BASE64.encode(digest),
    }
}

/// Convert a standard base64 string to the base64url alphabet without
/// padding (`+`→`-`, `/`→`_`, trailing `=` stripped).
pub fn base64_url_encoding(encoded: &str) -> String {
    encoded
        .replace('+', "-")
        .replace('/', "_")
        .trim_end_matches('=')
        .to_string()
}

/// Format the first 32 hex characters of a SHA-256 digest as a UUID
/// (8-4-4-4-12).  Returns `None` when the input is too short.
pub fn sha256_hash_to_uuid(value: &str) -> Option<String> {
    if value.len() < 32 {
        return None;
    }
    Some(format!(
        "{}-{}-{}-{}-{}",
        &value[..8],
        &value[8..12],
        &value[12..16],
        &value[16..20],
        &value[20..32],
    ))
}

// ---------------------------------------------------------------------------
// RSA signing
// ---------------------------------------------------------------------------

/// Parse an RSA private key from PEM, accepting PKCS#1 then PKCS#8.
fn parse_private_key(pem: &str) -> Result<RsaPrivateKey, CryptoError> {
    RsaPrivateKey::from_pkcs1_pem(pem)
        .or_else(|_| RsaPrivateKey::from_pkcs8_pem(pem))
        .map_err(|err| CryptoError::KeyParse(err.to_string()))
}

/// Parse an RSA public key from PEM, accepting SPKI then PKCS#1.
fn parse_public_key(pem: &str) -> Result<RsaPublicKey, CryptoError> {
    RsaPublicKey::from_public_key_pem(pem)
        .or_else(|_| RsaPublicKey::from_pkcs1_pem(pem))
        .map_err(|err| CryptoError::KeyParse(err.to_string()))
}

/// Sign `data` with RSA PKCS#1 v1.5 over SHA-256; returns standard base64.
pub fn sign_rsa_sha256(data: &[u8], private_key_pem: &str) -> Result<String, CryptoError> {
    let key = parse_private_key(private_key_pem)?;
    let digest = Sha256::digest(data);
    let signature = key.sign(Pkcs1v15Sign::new::<Sha256>(), &digest)?;
    Ok(BASE64.encode(signature))
}

/// Sign `data` with RSA PKCS#1 v1.5 over SHA-1 (CDN canned policies).
pub fn sign_rsa_sha1(data: &[u8], private_key_pem: &str) -> Result<String, CryptoError> {
    let key = parse_private_key(private_key_pem)?;
    let digest = Sha1::digest(data);
    let signature = key.sign(Pkcs1v15Sign::new::<Sha1>(), &digest)?;
    Ok(BASE64.encode(signature))
}

/// Verify an RSA-SHA256 signature produced by [`sign_rsa_sha256`].
pub fn verify_rsa_sha256(
    data: &[u8],
    public_key_pem: &str,
    signature_b64: &str,
) -> Result<bool, CryptoError> {
    let key = parse_public_key(public_key_pem)?;
    let digest = Sha256::digest(data);
    let signature = BASE64.decode(signature_b64)?;
    Ok(key
        .verify(Pkcs1v15Sign::new::<Sha256>(), &digest, &signature)
        .is_ok())
}

// ---------------------------------------------------------------------------
// Key storage
// ---------------------------------------------------------------------------

/// Key material loaded once per process.
#[derive(Debug, Clone)]
pub struct SigningKeys {
    /// Public half of the manifest signing key (clients pin this).
    pub public_expo_key: String,
    /// Private manifest signing key, PEM.
    pub private_expo_key: String,
    /// Private CloudFront key for CDN URL signing, PEM.
    pub private_cloudfront_key: Option<String>,
}

/// A source of [`SigningKeys`].
#[async_trait]
pub trait KeyStore: Send + Sync {
    /// Load all key material.
    async fn load(&self) -> Result<SigningKeys, CryptoError>;
}

/// PEM files on local disk.
pub struct LocalKeyStore {
    /// Path to the public manifest key.
    pub public_key_path: String,
    /// Path to the private manifest key.
    pub private_key_path: String,
    /// Path to the private CloudFront key.
    pub cloudfront_key_path: Option<String>,
}

#[async_trait]
impl KeyStore for LocalKeyStore {
    async fn load(&self) -> Result<SigningKeys, CryptoError> {
        let read = |path: String| async move {
            tokio::fs::read_to_string(&path)
                .await
                .map_err(|source| CryptoError::Io { path, source })
        };
        let public_expo_key = read(self.public_key_path.clone()).await?;
        let private_expo_key = read(self.private_key_path.clone()).await?;
        let private_cloudfront_key = match &self.cloudfront_key_path {
            Some(path) => Some(read(path.clone()).await?),
            None => None,
        };
        Ok(SigningKeys {
            public_expo_key,
            private_expo_key,
            private_cloudfront_key,
        })
    }
}

/// Base64-encoded PEM blobs carried in environment variables.
pub struct EnvKeyStore {
    /// Base64 of the public manifest key.
    pub public_key_b64: String,
    /// Base64 of the private manifest key.
    pub private_key_b64: String,
    /// Base64 of the private CloudFront key.
    pub cloudfront_key_b64: Option<String>,
}

#[async_trait]
impl KeyStore for EnvKeyStore {
    async fn load(&self) -> Result<SigningKeys, CryptoError> {
        let decode = |value: &str, name: &str| -> Result<String, CryptoError> {
            if value.is_empty() {
                return Err(CryptoError::MissingKey(name.to_string()));
            }
            let bytes = BASE64.decode(value)?;
            String::from_utf8(bytes)
                .map_err(|_| CryptoError::KeyParse("key material is not UTF-8".to_string()))
        };
        Ok(SigningKeys {
            public_expo_key: decode(&self.public_key_b64, "PUBLIC_EXPO_KEY_B64")?,
            private_expo_key: decode(&self.private_key_b64, "PRIVATE_EXPO_KEY_B64")?,
            private_cloudfront_key: self
                .cloudfront_key_b64
                .as_deref()
                .map(|v| decode(v, "PRIVATE_CLOUDFRONT_KEY_B64"))
                .transpose()?,
        })
    }
}

/// Secrets held in AWS Secrets Manager.
pub struct AwsSecretsManagerKeyStore {
    client: aws_sdk_secretsmanager::Client,
    /// Secret id of the public manifest key.
    pub public_key_secret_id: String,
    /// Secret id of the private manifest key.
    pub private_key_secret_id: String,
    /// Secret id of the private CloudFront key.
    pub cloudfront_key_secret_id: Option<String>,
}

impl AwsSecretsManagerKeyStore {
    /// Build a store using the ambient AWS configuration.
    pub async fn new(
        public_key_secret_id: String,
        private_key_secret_id: String,
        cloudfront_key_secret_id: Option<String>,
    ) -> Self {
        let aws_config = aws_config::load_defaults(aws_config::BehaviorVersion::latest()).await;
        Self {
            client: aws_sdk_secretsmanager::Client::new(&aws_config),
            public_key_secret_id,
            private_key_secret_id,
            cloudfront_key_secret_id,
        }
    }

    async fn fetch_secret(&self, secret_id: &str) -> Result<String, CryptoError> {
        let out = self
            .client
            .get_secret_value()
            .secret_id(secret_id)
            .send()
            .await
            .map_err(|err| CryptoError::SecretsManager(err.to_string()))?;
        out.secret_string()
            .map(str::to_string)
            .ok_or_else(|| CryptoError::MissingKey(secret_id.to_string()))
    }
}

#[async_trait]
impl KeyStore for AwsSecretsManagerKeyStore {
    async fn load(&self) -> Result<SigningKeys, CryptoError> {
        let public_expo_key = self.fetch_secret(&self.public_key_secret_id).await?;
        let private_expo_key = self.fetch_secret(&self.private_key_secret_id).await?;
        let private_cloudfront_key = match &self.cloudfront_key_secret_id {
            Some(id) => Some(self.fetch_secret(id).await?),
            None => None,
        };
        Ok(SigningKeys {
            public_expo_key,
            private_expo_key,
            private_cloudfront_key,
        })
    }
}

/// Select a [`KeyStore`] implementation from the configuration.
pub async fn key_store_from_config(keys: &KeysConfig) -> Box<dyn KeyStore> {
    match keys {
        KeysConfig::Local {
            public_key_path,
            private_key_path,
            cloudfront_key_path,
        } => Box::new(LocalKeyStore {
            public_key_path: public_key_path.clone(),
            private_key_path: private_key_path.clone(),
            cloudfront_key_path: cloudfront_key_path.clone(),
        }),
        KeysConfig::Environment {
            public_key_b64,
            private_key_b64,
            cloudfront_key_b64,
        } => Box::new(EnvKeyStore {
            public_key_b64: public_key_b64.clone(),
            private_key_b64: private_key_b64.clone(),
            cloudfront_key_b64: cloudfront_key_b64.clone(),
        }),
        KeysConfig::AwsSecretsManager {
            public_key_secret_id,
            private_key_secret_id,
            cloudfront_key_secret_id,
        } => Box::new(
            AwsSecretsManagerKeyStore::new(
                public_key_secret_id.clone(),
                private_key_secret_id.clone(),
                cloudfront_key_secret_id.clone(),
            )
            .await,
        ),
    }
}
