// SPDX-License-Identifier: MIT OR Apache-2.0
//! S3-compatible object store.
//!
//! Prefix listings use `ListObjectsV2` with `Delimiter=/`, deletions are
//! batched through `DeleteObjects` (1000 keys per page), and presigned PUT
//! URLs come straight from the SDK presigner.  Setting `AWS_BASE_ENDPOINT`
//! switches the client to path-style addressing for S3-compatible
//! providers.

use crate::{ObjectStore, StorageError, StoredObject, base_name, validate_key};
use async_trait::async_trait;
use aws_sdk_s3::presigning::PresigningConfig;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{Delete, ObjectIdentifier};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::StreamExt;
use futures::stream::FuturesUnordered;
use std::time::Duration;

/// Expiry applied to presigned PUT URLs.
const PRESIGNED_PUT_TTL: Duration = Duration::from_secs(15 * 60);

/// Maximum keys per `DeleteObjects` request.
const DELETE_BATCH_SIZE: usize = 1000;

/// Object store backed by an S3 bucket.
pub struct S3Store {
    client: aws_sdk_s3::Client,
    bucket: String,
}

impl S3Store {
    /// Build a client from the ambient AWS configuration, optionally
    /// overriding the endpoint for S3-compatible providers.
    pub async fn new(bucket: String, region: String, base_endpoint: Option<String>) -> Self {
        let shared = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .region(aws_config::Region::new(region))
            .load()
            .await;
        let mut builder = aws_sdk_s3::config::Builder::from(&shared);
        if let Some(endpoint) = base_endpoint {
            builder = builder.endpoint_url(endpoint).force_path_style(true);
        }
        Self {
            client: aws_sdk_s3::Client::from_conf(builder.build()),
            bucket,
        }
    }

    /// Wrap an existing client (test support).
    pub fn with_client(client: aws_sdk_s3::Client, bucket: String) -> Self {
        Self { client, bucket }
    }

    fn s3_err(err: impl std::fmt::Display) -> StorageError {
        StorageError::S3(err.to_string())
    }
}

#[async_trait]
impl ObjectStore for S3Store {
    async fn list_common_prefixes(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
        let mut pages = self
            .client
            .list_objects_v2()
            .bucket(&self.bucket)
            .prefix(prefix)
            .delimiter("/")
            .into_paginator()
            .send();
        let mut names = Vec::new();
        while let Some(page) = pages.next().await {
            let page = page.map_err(Self::s3_err)?;
            for common in page.common_prefixes() {
                if let Some(full) = common.prefix() {
                    let name = full
                        .strip_prefix(prefix)
                        .unwrap_or(full)
                        .trim_end_matches('/');
                    if !name.is_empty() {
                        names.push(name.to_string());
                    }
                }
            }
        }
        names.sort();
        Ok(names)
    }

    async fn list_objects(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
        let prefix = if prefix.is_empty() || prefix.ends_with('/') {
            prefix.to_string()
        } else {
            format!("{prefix}/")
        };
        let mut pages = self
            .client
            .list_objects_v2()
            .bucket(&self.bucket)
            .prefix(prefix)
            .into_paginator()
            .send();
        let mut keys = Vec::new();
        while let Some(page) = pages.next().await {
            let page = page.map_err(Self::s3_err)?;
            keys.extend(page.contents().iter().filter_map(|o| o.key()).map(str::to_string));
        }
        keys.sort();
        Ok(keys)
    }

    async fn get(&self, key: &str) -> Result<StoredObject, StorageError> {
        validate_key(key)?;
        let out = match self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
        {
            Ok(out) => out,
            Err(err) => {
                let service_err = err.into_service_error();
                if service_err.is_no_such_key() {
                    return Err(StorageError::NotFound {
                        key: key.to_string(),
                    });
                }
                return Err(Self::s3_err(service_err));
            }
        };
        let last_modified = out
            .last_modified()
            .and_then(|dt| dt.to_millis().ok())
            .and_then(DateTime::from_timestamp_millis)
            .unwrap_or_else(Utc::now);
        let data = out.body.collect().await.map_err(Self::s3_err)?;
        Ok(StoredObject {
            bytes: data.into_bytes(),
            last_modified,
        })
    }

    async fn put(&self, key: &str, bytes: Bytes) -> Result<(), StorageError> {
        validate_key(key)?;
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(ByteStream::from(bytes))
            .send()
            .await
            .map_err(Self::s3_err)?;
        Ok(())
    }

    async fn delete_prefix(&self, prefix: &str) -> Result<(), StorageError> {
        let keys = self.list_objects(prefix).await?;
        for batch in keys.chunks(DELETE_BATCH_SIZE) {
            let identifiers = batch
                .iter()
                .map(|key| ObjectIdentifier::builder().key(key).build())
                .collect::<Result<Vec<_>, _>>()
                .map_err(Self::s3_err)?;
            let delete = Delete::builder()
                .set_objects(Some(identifiers))
                .quiet(true)
                .build()
                .map_err(Self::s3_err)?;
            self.client
                .delete_objects()
                .bucket(&self.bucket)
                .delete(delete)
                .send()
                .await
                .map_err(Self::s3_err)?;
        }
        Ok(())
    }

    async fn presign_put(&self, key: &str, ttl: Duration) -> Result<String, StorageError> {
        validate_key(key)?;
        let ttl = ttl.min(PRESIGNED_PUT_TTL);
        let config = PresigningConfig::expires_in(ttl).map_err(Self::s3_err)?;
        let presigned = self
            .client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .presigned(config)
            .await
            .map_err(Self::s3_err)?;
        Ok(presigned.uri().to_string())
    }

    async fn copy_prefix(
        &self,
        src_prefix: &str,
        dst_prefix: &str,
        skip_names: &[&str],
    ) -> Result<(), StorageError> {
        let src_prefix = src_prefix.trim_end_matches('/');
        let dst_prefix = dst_prefix.trim_end_matches('/');
        let keys = self.list_objects(src_prefix).await?;
        let mut pending = keys
            .iter()
            .filter(|key| !skip_names.contains(&base_name(key)))
            .map(|key| {
                let relative = key
                    .strip_prefix(src_prefix)
                    .unwrap_or(key)
                    .trim_start_matches('/');
                let dst_key = format!("{dst_prefix}/{relative}");
                let source = format!("{}/{}", self.bucket, key);
                async move {
                    self.client
                        .copy_object()
                        .bucket(&self.bucket)
                        .copy_source(source)
                        .key(dst_key)
                        .send()
                        .await
                        .map_err(Self::s3_err)?;
                    Ok::<(), StorageError>(())
                }
            })
            .collect::<FuturesUnordered<_>>();
        while let Some(result) = pending.next().await {
            result?;
        }
        Ok(())
    }
}
