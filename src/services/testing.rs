//! In-memory backend used by the unit tests of the manager and the gateway.

use crate::{
    models::{bucket::BucketInfo, object::ObjectInfo},
    services::{
        backend::{PutObjectRequest, StorageBackend},
        error::{StorageError, StorageResult},
    },
};
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use chrono::{DateTime, Utc};
use futures::StreamExt;
use std::{
    collections::{BTreeMap, HashMap},
    io,
    sync::{
        Mutex,
        atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering},
    },
    time::Duration,
};
use url::Url;

#[derive(Debug, Clone)]
pub struct StoredObject {
    pub data: Bytes,
    pub content_type: String,
}

#[derive(Debug, Default)]
struct State {
    buckets: BTreeMap<String, DateTime<Utc>>,
    objects: HashMap<(String, String), StoredObject>,
}

#[derive(Debug, Default)]
pub struct MemoryBackend {
    state: Mutex<State>,
    unavailable: AtomicBool,
    pub create_calls: AtomicUsize,
    pub put_calls: AtomicUsize,
    pub last_part_size: AtomicU64,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent call fail with `BackendUnavailable`.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub fn bucket_count(&self) -> usize {
        self.state.lock().unwrap().buckets.len()
    }

    pub fn object(&self, bucket: &str, key: &str) -> Option<StoredObject> {
        self.state
            .lock()
            .unwrap()
            .objects
            .get(&(bucket.to_string(), key.to_string()))
            .cloned()
    }

    /// Resolve a URL issued by `presigned_get_url` back to the stored object.
    pub fn fetch(&self, url: &Url) -> Option<StoredObject> {
        let mut segments = url.path_segments()?;
        let bucket = segments.next()?.to_string();
        let key = segments.collect::<Vec<_>>().join("/");
        self.object(&bucket, &key)
    }

    fn check_available(&self) -> StorageResult<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            Err(StorageError::backend(io::Error::new(
                io::ErrorKind::ConnectionRefused,
                "connection refused",
            )))
        } else {
            Ok(())
        }
    }

    fn require_bucket(&self, bucket: &str) -> StorageResult<()> {
        if self.state.lock().unwrap().buckets.contains_key(bucket) {
            Ok(())
        } else {
            Err(StorageError::BucketNotFound(bucket.to_string()))
        }
    }
}

#[async_trait]
impl StorageBackend for MemoryBackend {
    async fn bucket_exists(&self, bucket: &str, _region: Option<&str>) -> StorageResult<bool> {
        self.check_available()?;
        tokio::task::yield_now().await;
        Ok(self.state.lock().unwrap().buckets.contains_key(bucket))
    }

    async fn create_bucket(&self, bucket: &str, _region: Option<&str>) -> StorageResult<()> {
        self.check_available()?;
        self.create_calls.fetch_add(1, Ordering::SeqCst);
        tokio::task::yield_now().await;
        let mut state = self.state.lock().unwrap();
        if state.buckets.contains_key(bucket) {
            return Err(StorageError::BucketAlreadyExists(bucket.to_string()));
        }
        state.buckets.insert(bucket.to_string(), Utc::now());
        Ok(())
    }

    async fn remove_bucket(&self, bucket: &str, _region: Option<&str>) -> StorageResult<()> {
        self.check_available()?;
        let mut state = self.state.lock().unwrap();
        if !state.buckets.contains_key(bucket) {
            return Err(StorageError::BucketNotFound(bucket.to_string()));
        }
        if state.objects.keys().any(|(b, _)| b == bucket) {
            return Err(StorageError::BucketNotEmpty(bucket.to_string()));
        }
        state.buckets.remove(bucket);
        Ok(())
    }

    async fn delete_bucket_encryption(
        &self,
        bucket: &str,
        _region: Option<&str>,
    ) -> StorageResult<()> {
        self.check_available()?;
        self.require_bucket(bucket)
    }

    async fn list_buckets(&self) -> StorageResult<Vec<BucketInfo>> {
        self.check_available()?;
        Ok(self
            .state
            .lock()
            .unwrap()
            .buckets
            .iter()
            .map(|(name, created)| BucketInfo {
                name: name.clone(),
                creation_date: Some(*created),
            })
            .collect())
    }

    async fn put_object(&self, request: PutObjectRequest<'_>) -> StorageResult<()> {
        self.check_available()?;
        self.put_calls.fetch_add(1, Ordering::SeqCst);
        self.last_part_size
            .store(request.part_size, Ordering::SeqCst);
        self.require_bucket(request.bucket)?;

        let content_type = request.payload.content_type_or_default().to_string();
        let expected = request.payload.length;
        let mut body = request.payload.body;
        let mut buf = BytesMut::new();
        while let Some(chunk) = body.next().await {
            let chunk = chunk
                .map_err(|err| StorageError::upload_failed(request.bucket, request.key, err))?;
            buf.extend_from_slice(&chunk);
        }
        if buf.len() as u64 != expected {
            return Err(StorageError::upload_failed(
                request.bucket,
                request.key,
                format!("expected {expected} bytes, stream yielded {}", buf.len()),
            ));
        }

        self.state.lock().unwrap().objects.insert(
            (request.bucket.to_string(), request.key.to_string()),
            StoredObject {
                data: buf.freeze(),
                content_type,
            },
        );
        Ok(())
    }

    async fn stat_object(
        &self,
        bucket: &str,
        _region: Option<&str>,
        key: &str,
    ) -> StorageResult<ObjectInfo> {
        self.check_available()?;
        self.require_bucket(bucket)?;
        let object = self
            .object(bucket, key)
            .ok_or_else(|| StorageError::object_not_found(bucket, key))?;
        Ok(ObjectInfo {
            bucket: bucket.to_string(),
            key: key.to_string(),
            size_bytes: object.data.len() as i64,
            content_type: Some(object.content_type),
            etag: None,
            last_modified: None,
        })
    }

    async fn presigned_get_url(
        &self,
        bucket: &str,
        _region: Option<&str>,
        key: &str,
        expiry: Duration,
    ) -> StorageResult<Url> {
        self.check_available()?;
        let mut url = Url::parse("http://memory.test/").map_err(StorageError::backend)?;
        url.path_segments_mut()
            .map_err(|_| StorageError::backend("base url cannot carry a path"))?
            .pop_if_empty()
            .push(bucket)
            .extend(key.split('/'));
        url.query_pairs_mut()
            .append_pair("expires", &expiry.as_secs().to_string());
        Ok(url)
    }

    async fn remove_object(
        &self,
        bucket: &str,
        _region: Option<&str>,
        key: &str,
    ) -> StorageResult<()> {
        self.check_available()?;
        self.require_bucket(bucket)?;
        self.state
            .lock()
            .unwrap()
            .objects
            .remove(&(bucket.to_string(), key.to_string()));
        Ok(())
    }
}
