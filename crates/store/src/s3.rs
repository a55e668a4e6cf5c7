//! Object-storage-backed cache store
//!
//! Maps a cache key to the object key
//! `{prefix/}namespace/group/name/digest/fileName`. Writes stamp an
//! `expires-at` metadata timestamp (now + TTL); reads treat both a missing
//! key and an already-expired object as absent, so entries disappear from
//! the cache's point of view even before the backend purges them.
//!
//! The SDK is async; the store owns a current-thread runtime and drives each
//! call to completion, keeping the [`CacheStore`] contract synchronous.

use crate::CacheStore;
use aws_sdk_s3::error::SdkError;
use chrono::{DateTime, Duration, Utc};
use kiln_core::{CacheKey, Error, Result, validate_file_name};
use std::collections::HashMap;

/// Metadata key carrying the expiry timestamp, RFC 3339
const EXPIRES_AT_KEY: &str = "expires-at";

/// Configuration for [`S3Store`]
#[derive(Debug, Clone)]
pub struct S3StoreConfig {
    /// Bucket name
    pub bucket: String,
    /// Optional key prefix within the bucket
    pub prefix: Option<String>,
    /// Optional custom endpoint URL (MinIO, LocalStack)
    pub endpoint_url: Option<String>,
    /// Optional region override
    pub region: Option<String>,
    /// Entry time-to-live; `None` stores without expiry
    pub ttl: Option<std::time::Duration>,
}

impl S3StoreConfig {
    /// Config with just a bucket name; credentials come from the standard
    /// AWS chain (env vars, profile, IAM role).
    #[must_use]
    pub fn new(bucket: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            prefix: None,
            endpoint_url: None,
            region: None,
            ttl: None,
        }
    }
}

/// S3-compatible cache store
pub struct S3Store {
    client: aws_sdk_s3::Client,
    bucket: String,
    prefix: Option<String>,
    ttl: Option<std::time::Duration>,
    runtime: tokio::runtime::Runtime,
}

impl S3Store {
    /// Create a store from `config`, loading the AWS credential chain.
    pub fn new(config: S3StoreConfig) -> Result<Self> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| Error::configuration(format!("failed to start S3 runtime: {e}")))?;

        let client = runtime.block_on(async {
            let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest());
            if let Some(region) = &config.region {
                loader = loader.region(aws_config::Region::new(region.clone()));
            }
            if let Some(endpoint_url) = &config.endpoint_url {
                loader = loader.endpoint_url(endpoint_url);
            }
            aws_sdk_s3::Client::new(&loader.load().await)
        });

        Ok(Self {
            client,
            bucket: config.bucket,
            prefix: config.prefix,
            ttl: config.ttl,
            runtime,
        })
    }
}

/// Build the object key for one stored file.
fn object_key(prefix: Option<&str>, key: &CacheKey, file_name: &str) -> String {
    match prefix {
        Some(prefix) => format!(
            "{}/{}/{}",
            prefix.trim_end_matches('/'),
            key.canonical(),
            file_name
        ),
        None => format!("{}/{}", key.canonical(), file_name),
    }
}

/// Whether expiry metadata says the object is already stale at `now`.
///
/// Unparseable timestamps are treated as live; a broken clock on a writer
/// should not wipe out the entry for every reader.
fn is_expired(metadata: Option<&HashMap<String, String>>, now: DateTime<Utc>) -> bool {
    let Some(raw) = metadata.and_then(|m| m.get(EXPIRES_AT_KEY)) else {
        return false;
    };
    match DateTime::parse_from_rfc3339(raw) {
        Ok(expires_at) => expires_at.with_timezone(&Utc) <= now,
        Err(e) => {
            tracing::warn!(value = %raw, error = %e, "Ignoring unparseable expiry metadata");
            false
        }
    }
}

fn is_not_found<E>(err: &SdkError<E>) -> bool {
    matches!(err, SdkError::ServiceError(e) if e.raw().status().as_u16() == 404)
}

fn map_sdk_error<E: std::fmt::Debug>(operation: &str, err: &SdkError<E>) -> Error {
    Error::storage_fault(format!("S3 {operation} failed: {err:?}"))
}

impl CacheStore for S3Store {
    fn read(&self, key: &CacheKey, file_name: &str) -> Result<Option<Vec<u8>>> {
        validate_file_name(file_name)?;
        let object_key = object_key(self.prefix.as_deref(), key, file_name);

        self.runtime.block_on(async {
            let response = match self
                .client
                .get_object()
                .bucket(&self.bucket)
                .key(&object_key)
                .send()
                .await
            {
                Ok(response) => response,
                Err(err) if is_not_found(&err) => return Ok(None),
                Err(err) => return Err(map_sdk_error("get_object", &err)),
            };

            if is_expired(response.metadata(), Utc::now()) {
                tracing::debug!(key = %object_key, "Treating expired object as absent");
                return Ok(None);
            }

            let bytes = response
                .body
                .collect()
                .await
                .map_err(|e| Error::storage_fault(format!("S3 body read failed: {e}")))?;
            Ok(Some(bytes.to_vec()))
        })
    }

    fn write(&self, key: &CacheKey, file_name: &str, bytes: &[u8]) -> Result<u64> {
        validate_file_name(file_name)?;
        let object_key = object_key(self.prefix.as_deref(), key, file_name);

        let mut request = self
            .client
            .put_object()
            .bucket(&self.bucket)
            .key(&object_key)
            .body(bytes.to_vec().into());

        if let Some(ttl) = self.ttl {
            let expires_at = Utc::now()
                + Duration::from_std(ttl)
                    .map_err(|e| Error::configuration(format!("TTL out of range: {e}")))?;
            request = request.metadata(EXPIRES_AT_KEY, expires_at.to_rfc3339());
        }

        self.runtime.block_on(async {
            request
                .send()
                .await
                .map_err(|err| map_sdk_error("put_object", &err))?;
            // The backend expires entries on its own schedule; nothing is
            // evicted synchronously.
            Ok(0)
        })
    }
}
