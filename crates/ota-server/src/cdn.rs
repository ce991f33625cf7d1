// SPDX-License-Identifier: MIT OR Apache-2.0
//! CloudFront URL signing.
//!
//! Canned policy: resource URL plus an epoch expiry, signed with RSA-SHA1
//! and encoded with CloudFront's base64 variant (`+`→`-`, `=`→`_`,
//! `/`→`~`).

use chrono::{DateTime, Utc};
use ota_config::CloudfrontConfig;
use ota_crypto::sign_rsa_sha1;
use ota_error::{ErrorKind, OtaError, OtaResult};
use std::time::Duration;

/// Lifetime of signed asset URLs.
pub const SIGNED_URL_TTL: Duration = Duration::from_secs(10 * 60);

/// Signs asset URLs for CDN redirection.
pub struct CloudFrontSigner {
    domain: String,
    key_pair_id: String,
    private_key_pem: String,
}

impl CloudFrontSigner {
    /// Build a signer from the CDN config and the private key PEM.
    pub fn new(config: &CloudfrontConfig, private_key_pem: String) -> Self {
        Self {
            domain: config.domain.trim_end_matches('/').to_string(),
            key_pair_id: config.key_pair_id.clone(),
            private_key_pem,
        }
    }

    /// Canned-policy signed URL for one asset, valid until `expires_at`.
    pub fn signed_asset_url(
        &self,
        branch: &str,
        runtime_version: &str,
        update_id: i64,
        asset: &str,
        expires_at: DateTime<Utc>,
    ) -> OtaResult<String> {
        let resource = format!(
            "{}/{branch}/{runtime_version}/{update_id}/{asset}",
            self.domain
        );
        let expires = expires_at.timestamp();
        let policy = format!(
            r#"{{"Statement":[{{"Resource":"{resource}","Condition":{{"DateLessThan":{{"AWS:EpochTime":{expires}}}}}}}]}}"#
        );
        let signature = sign_rsa_sha1(policy.as_bytes(), &self.private_key_pem).map_err(|err| {
            OtaError::new(ErrorKind::Crypto, "failed to sign CDN policy").with_source(err)
        })?;
        let signature = cloudfront_base64(&signature);
        Ok(format!(
            "{resource}?Expires={expires}&Signature={signature}&Key-Pair-Id={}",
            self.key_pair_id
        ))
    }
}

/// CloudFront's URL-safe base64 alphabet.
fn cloudfront_base64(standard: &str) -> String {
    standard
        .replace('+', "-")
        .replace('=', "_")
        .replace('/', "~")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cloudfront_alphabet_replacements() {
        assert_eq!(cloudfront_base64("a+b=c/d"), "a-b_c~d");
    }
}
