//! BucketManager: existence checks, idempotent creation and deletion of
//! buckets.
//!
//! The manager keeps no state of its own. Every call re-queries the backend,
//! which stays the only source of truth for which buckets exist.

use crate::{
    models::bucket::BucketInfo,
    services::{
        backend::StorageBackend,
        error::{StorageError, StorageResult},
        naming::validate_bucket_name,
    },
};
use std::sync::Arc;
use tracing::{debug, info};

#[derive(Clone, Debug)]
pub struct BucketManager {
    backend: Arc<dyn StorageBackend>,
}

impl BucketManager {
    pub fn new(backend: Arc<dyn StorageBackend>) -> Self {
        Self { backend }
    }

    /// Whether `bucket` exists. Backend failures are reported as errors,
    /// never as `false`.
    pub async fn exists(&self, bucket: &str, region: Option<&str>) -> StorageResult<bool> {
        validate_bucket_name(bucket)?;
        self.backend.bucket_exists(bucket, region).await
    }

    /// Create `bucket` unless it already exists.
    ///
    /// Losing a creation race against another caller is not an error: the
    /// backend reports the bucket as already existing and that is the state
    /// we wanted.
    pub async fn ensure_exists(&self, bucket: &str, region: Option<&str>) -> StorageResult<()> {
        if self.exists(bucket, region).await? {
            debug!(bucket, "bucket already present");
            return Ok(());
        }

        match self.backend.create_bucket(bucket, region).await {
            Ok(()) => {
                info!(bucket, region = region.unwrap_or("default"), "created bucket");
                Ok(())
            }
            Err(StorageError::BucketAlreadyExists(_)) => {
                debug!(bucket, "bucket created concurrently");
                Ok(())
            }
            Err(err) => Err(err),
        }
    }

    /// Remove the bucket itself. It must be empty; objects are never deleted
    /// on the caller's behalf.
    pub async fn delete(&self, bucket: &str, region: Option<&str>) -> StorageResult<()> {
        validate_bucket_name(bucket)?;
        self.backend.remove_bucket(bucket, region).await?;
        info!(bucket, "removed bucket");
        Ok(())
    }

    /// Drop the bucket's default encryption configuration. Bucket and
    /// objects stay in place.
    pub async fn clear_encryption(&self, bucket: &str, region: Option<&str>) -> StorageResult<()> {
        validate_bucket_name(bucket)?;
        self.backend.delete_bucket_encryption(bucket, region).await?;
        info!(bucket, "cleared bucket encryption configuration");
        Ok(())
    }

    /// All buckets visible to the configured credentials, in backend order.
    pub async fn list_all(&self) -> StorageResult<Vec<BucketInfo>> {
        self.backend.list_buckets().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::testing::MemoryBackend;
    use std::sync::atomic::Ordering;

    fn manager() -> (BucketManager, Arc<MemoryBackend>) {
        let backend = Arc::new(MemoryBackend::new());
        (BucketManager::new(backend.clone()), backend)
    }

    #[tokio::test]
    async fn ensure_exists_then_exists_is_true() {
        let (buckets, _) = manager();
        assert!(!buckets.exists("demo", None).await.unwrap());
        buckets.ensure_exists("demo", None).await.unwrap();
        assert!(buckets.exists("demo", None).await.unwrap());
    }

    #[tokio::test]
    async fn ensure_exists_is_idempotent() {
        let (buckets, backend) = manager();
        buckets.ensure_exists("demo", Some("us-east-1")).await.unwrap();
        buckets.ensure_exists("demo", Some("us-east-1")).await.unwrap();
        assert_eq!(backend.bucket_count(), 1);
        assert_eq!(backend.create_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn concurrent_ensure_exists_yields_one_bucket() {
        let (buckets, backend) = manager();
        let tasks: Vec<_> = (0..16)
            .map(|_| {
                let buckets = buckets.clone();
                tokio::spawn(async move { buckets.ensure_exists("race", None).await })
            })
            .collect();
        for task in tasks {
            task.await.unwrap().unwrap();
        }
        assert_eq!(backend.bucket_count(), 1);
    }

    #[tokio::test]
    async fn backend_failure_is_not_reported_as_absent() {
        let (buckets, backend) = manager();
        backend.set_unavailable(true);
        let err = buckets.exists("demo", None).await.unwrap_err();
        assert!(matches!(err, StorageError::BackendUnavailable(_)));

        let err = buckets.ensure_exists("demo", None).await.unwrap_err();
        assert!(matches!(err, StorageError::BackendUnavailable(_)));
        assert_eq!(backend.create_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn invalid_names_never_reach_the_backend() {
        let (buckets, backend) = manager();
        let err = buckets.ensure_exists("Bad_Name", None).await.unwrap_err();
        assert!(matches!(err, StorageError::InvalidIdentifier { .. }));
        assert_eq!(backend.create_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn delete_removes_the_bucket() {
        let (buckets, _) = manager();
        buckets.ensure_exists("demo", None).await.unwrap();
        buckets.delete("demo", None).await.unwrap();
        assert!(!buckets.exists("demo", None).await.unwrap());

        let err = buckets.delete("demo", None).await.unwrap_err();
        assert!(matches!(err, StorageError::BucketNotFound(_)));
    }

    #[tokio::test]
    async fn clear_encryption_keeps_the_bucket() {
        let (buckets, _) = manager();
        buckets.ensure_exists("demo", None).await.unwrap();
        buckets.clear_encryption("demo", None).await.unwrap();
        assert!(buckets.exists("demo", None).await.unwrap());
    }

    #[tokio::test]
    async fn list_all_reports_every_bucket() {
        let (buckets, _) = manager();
        buckets.ensure_exists("alpha", None).await.unwrap();
        buckets.ensure_exists("beta", None).await.unwrap();
        let names: Vec<_> = buckets
            .list_all()
            .await
            .unwrap()
            .into_iter()
            .map(|b| b.name)
            .collect();
        assert_eq!(names, ["alpha", "beta"]);
    }
}
