//! The object-storage capability the gateway is written against.
//!
//! Implementations: [`S3Backend`](crate::services::s3_backend::S3Backend) for
//! any S3-compatible server (MinIO, AWS, R2) and
//! [`LocalBackend`](crate::services::local_backend::LocalBackend) for a
//! single-node SQLite + disk store.

use crate::{
    models::{bucket::BucketInfo, object::ObjectInfo, payload::ObjectPayload},
    services::error::{StorageError, StorageResult},
};
use async_trait::async_trait;
use std::{fmt, path::Path, time::Duration};
use url::Url;

/// Smallest part size S3-compatible backends accept for multipart uploads.
/// Payloads up to this size go out as a single PUT.
pub const MIN_MULTIPART_SIZE: u64 = 5 * 1024 * 1024;

/// Arguments of a streamed object write.
#[derive(Debug)]
pub struct PutObjectRequest<'a> {
    pub bucket: &'a str,
    pub region: Option<&'a str>,
    pub key: &'a str,
    pub payload: ObjectPayload,
    /// Multipart threshold and part size hint.
    pub part_size: u64,
}

/// Bucket and object operations of a storage backend.
///
/// Every method performs at least one round trip and reports failures as a
/// typed [`StorageError`]. Implementations must be safe to share across tasks.
#[async_trait]
pub trait StorageBackend: Send + Sync + fmt::Debug {
    async fn bucket_exists(&self, bucket: &str, region: Option<&str>) -> StorageResult<bool>;

    /// Create a bucket. Reports `BucketAlreadyExists` if the name is taken,
    /// including when a concurrent caller created it first.
    async fn create_bucket(&self, bucket: &str, region: Option<&str>) -> StorageResult<()>;

    /// Remove an empty bucket.
    async fn remove_bucket(&self, bucket: &str, region: Option<&str>) -> StorageResult<()>;

    /// Drop the bucket-level default encryption configuration.
    async fn delete_bucket_encryption(
        &self,
        bucket: &str,
        region: Option<&str>,
    ) -> StorageResult<()>;

    async fn list_buckets(&self) -> StorageResult<Vec<BucketInfo>>;

    async fn put_object(&self, request: PutObjectRequest<'_>) -> StorageResult<()>;

    /// Upload the file at `path` under `key`.
    async fn put_object_from_file(
        &self,
        bucket: &str,
        region: Option<&str>,
        key: &str,
        path: &Path,
    ) -> StorageResult<()> {
        let payload = ObjectPayload::from_file(path, None)
            .await
            .map_err(|err| StorageError::upload_failed(bucket, key, err))?;
        self.put_object(PutObjectRequest {
            bucket,
            region,
            key,
            payload,
            part_size: MIN_MULTIPART_SIZE,
        })
        .await
    }

    /// Metadata of an existing object, `ObjectNotFound` otherwise.
    async fn stat_object(
        &self,
        bucket: &str,
        region: Option<&str>,
        key: &str,
    ) -> StorageResult<ObjectInfo>;

    /// A GET URL for the object valid for `expiry`.
    async fn presigned_get_url(
        &self,
        bucket: &str,
        region: Option<&str>,
        key: &str,
        expiry: Duration,
    ) -> StorageResult<Url>;

    /// Remove an object. Removing an absent object succeeds.
    async fn remove_object(
        &self,
        bucket: &str,
        region: Option<&str>,
        key: &str,
    ) -> StorageResult<()>;
}
