//! ObjectGateway: uploads, deletions and presigned download URLs.
//!
//! Every write path goes through [`BucketManager::ensure_exists`] first, so
//! an upload is never attempted against a bucket known to be absent. The
//! gateway holds no mutable state and can be cloned freely across handlers.

use crate::{
    models::payload::ObjectPayload,
    services::{
        backend::{MIN_MULTIPART_SIZE, PutObjectRequest, StorageBackend},
        bucket_manager::BucketManager,
        error::{StorageError, StorageResult},
        naming::{derive_object_key, validate_bucket_name, validate_object_key},
    },
};
use std::{path::Path, sync::Arc, time::Duration};
use tracing::{debug, info};
use url::Url;

/// Expiry the MinIO client applies to presigned URLs when none is given.
pub const DEFAULT_PRESIGN_EXPIRY: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// Where a streamed upload landed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadedObject {
    /// Key derived from the payload's file name.
    pub key: String,
    pub url: Url,
}

#[derive(Clone, Debug)]
pub struct ObjectGateway {
    backend: Arc<dyn StorageBackend>,
    buckets: BucketManager,
    presign_expiry: Duration,
}

impl ObjectGateway {
    pub fn new(backend: Arc<dyn StorageBackend>, presign_expiry: Duration) -> Self {
        Self {
            buckets: BucketManager::new(backend.clone()),
            backend,
            presign_expiry,
        }
    }

    pub fn buckets(&self) -> &BucketManager {
        &self.buckets
    }

    pub fn presign_expiry(&self) -> Duration {
        self.presign_expiry
    }

    /// Upload a streamed payload and return its key and a download URL.
    ///
    /// The object key is the payload's original file name. Payloads above
    /// [`MIN_MULTIPART_SIZE`] are split into parts by the backend. Any failure
    /// after the bucket is ready is reported as `UploadFailed`; the bucket is
    /// left in place.
    pub async fn upload_streamed(
        &self,
        payload: ObjectPayload,
        bucket: &str,
        region: Option<&str>,
    ) -> StorageResult<UploadedObject> {
        self.buckets.ensure_exists(bucket, region).await?;

        let key = derive_object_key(payload.file_name.as_deref())
            .map_err(|err| StorageError::upload_failed(bucket, "", err))?;
        let size = payload.length;
        let content_type = payload.content_type_or_default().to_string();

        self.backend
            .put_object(PutObjectRequest {
                bucket,
                region,
                key: &key,
                payload,
                part_size: MIN_MULTIPART_SIZE,
            })
            .await
            .map_err(|err| wrap_upload_error(bucket, &key, err))?;
        info!(bucket, key = %key, size, content_type = %content_type, "uploaded object");

        let url = self
            .presign(bucket, region, &key)
            .await
            .map_err(|err| StorageError::upload_failed(bucket, &key, err))?;
        Ok(UploadedObject { key, url })
    }

    /// Upload the local file at `path` under `key` and return a download URL.
    pub async fn upload_from_path(
        &self,
        bucket: &str,
        region: Option<&str>,
        key: &str,
        path: &Path,
    ) -> StorageResult<Url> {
        self.buckets.ensure_exists(bucket, region).await?;
        validate_object_key(key).map_err(|err| StorageError::upload_failed(bucket, key, err))?;

        self.backend
            .put_object_from_file(bucket, region, key, path)
            .await
            .map_err(|err| wrap_upload_error(bucket, key, err))?;
        info!(bucket, key, path = %path.display(), "uploaded file");

        self.presign(bucket, region, key)
            .await
            .map_err(|err| StorageError::upload_failed(bucket, key, err))
    }

    /// Presigned GET URL for an existing object. Never creates the bucket.
    pub async fn download_url(
        &self,
        bucket: &str,
        key: &str,
        region: Option<&str>,
    ) -> StorageResult<Url> {
        validate_bucket_name(bucket)?;
        validate_object_key(key)?;
        self.backend.stat_object(bucket, region, key).await?;
        self.presign(bucket, region, key).await
    }

    /// Remove an object. Deleting an object that does not exist succeeds.
    pub async fn delete_object(
        &self,
        bucket: &str,
        key: &str,
        region: Option<&str>,
    ) -> StorageResult<()> {
        validate_bucket_name(bucket)?;
        validate_object_key(key)?;
        self.backend.remove_object(bucket, region, key).await?;
        info!(bucket, key, "deleted object");
        Ok(())
    }

    async fn presign(&self, bucket: &str, region: Option<&str>, key: &str) -> StorageResult<Url> {
        let url = self
            .backend
            .presigned_get_url(bucket, region, key, self.presign_expiry)
            .await?;
        debug!(bucket, key, expiry_secs = self.presign_expiry.as_secs(), "issued presigned url");
        Ok(url)
    }
}

fn wrap_upload_error(bucket: &str, key: &str, err: StorageError) -> StorageError {
    match err {
        already @ StorageError::UploadFailed { .. } => already,
        other => StorageError::upload_failed(bucket, key, other),
    }
}
