//! LocalBackend is a single-node backend backed by SQLite for metadata and the
//! local disk for object payloads.
//!
//! Payloads are sharded beneath `base_path/{bucket}/{shard}/{shard}/{key}`.
//! Presigned URLs are signed by [`UrlSigner`] and served by the gateway's own
//! router, so a client needs nothing but the URL to download.

use crate::{
    models::{bucket::BucketInfo, object::ObjectInfo},
    services::{
        backend::{PutObjectRequest, StorageBackend},
        error::{StorageError, StorageResult},
        naming::{validate_bucket_name, validate_object_key, validate_region},
        url_signer::UrlSigner,
    },
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::StreamExt;
use md5::Context;
use sqlx::{
    FromRow, SqlitePool,
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
};
use std::{
    io::{self, ErrorKind},
    path::{Path, PathBuf},
    str::FromStr,
    sync::Arc,
    time::Duration,
};
use tokio::{
    fs::{self, File},
    io::AsyncWriteExt,
};
use tracing::debug;
use url::Url;
use uuid::Uuid;

const MIGRATION: &str = include_str!("../../migrations/0001_init.sql");
const DEFAULT_REGION: &str = "local";

#[derive(Debug, FromRow)]
struct BucketRecord {
    id: Uuid,
    name: String,
}

#[derive(Clone, Debug)]
pub struct LocalBackend {
    /// Shared SQLite connection pool used for metadata operations.
    pub db: Arc<SqlitePool>,

    /// Base directory on disk where object payloads are stored.
    pub base_path: PathBuf,

    signer: UrlSigner,
}

/// Open (and create if missing) the SQLite database at `database_url`.
pub async fn connect_pool(database_url: &str, max_connections: u32) -> StorageResult<SqlitePool> {
    let options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);
    if let Some(parent) = options.get_filename().parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            fs::create_dir_all(parent).await?;
            debug!("created database directory {}", parent.display());
        }
    }
    let pool = SqlitePoolOptions::new()
        .max_connections(max_connections)
        .connect_with(options)
        .await?;
    Ok(pool)
}

impl LocalBackend {
    pub fn new(db: Arc<SqlitePool>, base_path: impl Into<PathBuf>, signer: UrlSigner) -> Self {
        Self {
            db,
            base_path: base_path.into(),
            signer,
        }
    }

    /// Apply the embedded schema. Safe to run on every start.
    pub async fn migrate(&self) -> StorageResult<()> {
        let statements = MIGRATION
            .split(';')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>();

        debug!("running {} migration statements", statements.len());
        for stmt in statements {
            sqlx::query(stmt).execute(&*self.db).await?;
        }
        fs::create_dir_all(&self.base_path).await?;
        Ok(())
    }

    /// Verify a presigned URL and open the object it refers to.
    pub async fn open_presigned(
        &self,
        bucket: &str,
        key: &str,
        expires_at: i64,
        signature: &str,
    ) -> StorageResult<(ObjectInfo, File)> {
        self.signer
            .verify_get(bucket, key, expires_at, signature, Utc::now().timestamp())?;
        self.get_object_reader(bucket, key).await
    }

    /// Metadata and an opened File handle ready for streaming out.
    ///
    /// Returns ObjectNotFound if metadata exists but the physical file is
    /// missing.
    pub async fn get_object_reader(
        &self,
        bucket: &str,
        key: &str,
    ) -> StorageResult<(ObjectInfo, File)> {
        validate_object_key(key)?;
        let bucket_rec = self.fetch_bucket(bucket).await?;
        let object = self.fetch_object(&bucket_rec, key).await?;

        let file_path = self.object_path(&bucket_rec.name, key);
        let file = File::open(&file_path).await.map_err(|err| {
            if err.kind() == ErrorKind::NotFound {
                StorageError::object_not_found(bucket, key)
            } else {
                StorageError::from(err)
            }
        })?;

        Ok((object, file))
    }

    fn bucket_root(&self, bucket_name: &str) -> PathBuf {
        self.base_path.join(bucket_name)
    }

    /// Two-level shard identifiers for an object key: the first two bytes of
    /// MD5(bucket/key) as lowercase hex.
    fn object_shards(bucket_name: &str, key: &str) -> (String, String) {
        let digest = md5::compute(format!("{}/{}", bucket_name, key));
        (format!("{:02x}", digest[0]), format!("{:02x}", digest[1]))
    }

    fn object_path(&self, bucket_name: &str, key: &str) -> PathBuf {
        let (shard_a, shard_b) = Self::object_shards(bucket_name, key);
        let mut path = self.bucket_root(bucket_name);
        path.push(shard_a);
        path.push(shard_b);
        path.push(key);
        path
    }

    async fn find_bucket(&self, bucket: &str) -> StorageResult<Option<BucketRecord>> {
        validate_bucket_name(bucket)?;
        let record = sqlx::query_as::<_, BucketRecord>("SELECT id, name FROM buckets WHERE name = ?")
            .bind(bucket)
            .fetch_optional(&*self.db)
            .await?;
        Ok(record)
    }

    async fn fetch_bucket(&self, bucket: &str) -> StorageResult<BucketRecord> {
        self.find_bucket(bucket)
            .await?
            .ok_or_else(|| StorageError::BucketNotFound(bucket.to_string()))
    }

    async fn fetch_object(&self, bucket: &BucketRecord, key: &str) -> StorageResult<ObjectInfo> {
        sqlx::query_as::<_, ObjectInfo>(
            "SELECT b.name AS bucket, o.key AS key, o.size_bytes AS size_bytes,
                    o.content_type AS content_type, o.etag AS etag,
                    o.last_modified AS last_modified
             FROM objects o JOIN buckets b ON b.id = o.bucket_id
             WHERE o.bucket_id = ? AND o.key = ?",
        )
        .bind(bucket.id)
        .bind(key)
        .fetch_optional(&*self.db)
        .await?
        .ok_or_else(|| StorageError::object_not_found(&bucket.name, key))
    }

    /// Stream the payload into a temp file next to its final location,
    /// checking the declared length, then rename it into place.
    async fn write_payload(
        &self,
        request: PutObjectRequest<'_>,
        file_path: &Path,
    ) -> StorageResult<(i64, String)> {
        let PutObjectRequest {
            bucket,
            key,
            payload,
            ..
        } = request;
        let parent = file_path
            .parent()
            .map(Path::to_path_buf)
            .ok_or_else(|| StorageError::backend("object path missing parent directory"))?;
        fs::create_dir_all(&parent).await?;
        let tmp_path = parent.join(format!(".tmp-{}", Uuid::new_v4()));
        let mut file = File::create(&tmp_path).await?;

        let expected = payload.length;
        let mut written: u64 = 0;
        let mut digest = Context::new();
        let mut body = payload.body;
        while let Some(chunk_res) = body.next().await {
            let chunk = match chunk_res {
                Ok(chunk) => chunk,
                Err(err) => {
                    let _ = fs::remove_file(&tmp_path).await;
                    return Err(StorageError::upload_failed(bucket, key, err));
                }
            };
            written += chunk.len() as u64;
            if written > expected {
                let _ = fs::remove_file(&tmp_path).await;
                return Err(StorageError::upload_failed(
                    bucket,
                    key,
                    format!("stream exceeds declared length of {expected} bytes"),
                ));
            }
            digest.consume(&chunk);
            if let Err(err) = file.write_all(&chunk).await {
                let _ = fs::remove_file(&tmp_path).await;
                return Err(err.into());
            }
        }
        if written != expected {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(StorageError::upload_failed(
                bucket,
                key,
                format!("expected {expected} bytes, stream yielded {written}"),
            ));
        }
        if let Err(err) = file.flush().await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(err.into());
        }
        if let Err(err) = file.sync_all().await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(err.into());
        }

        if let Err(err) = fs::rename(&tmp_path, file_path).await {
            if err.kind() == ErrorKind::AlreadyExists {
                fs::remove_file(file_path).await?;
                fs::rename(&tmp_path, file_path).await?;
            } else {
                let _ = fs::remove_file(&tmp_path).await;
                return Err(err.into());
            }
        }

        Ok((written as i64, format!("{:x}", digest.compute())))
    }

    /// Remove empty directories from `start` up to, not including, `stop`.
    async fn prune_empty_dirs(&self, start: &Path, stop: &Path) {
        let mut current = start.to_path_buf();
        while current.starts_with(stop) && current != stop {
            match fs::remove_dir(&current).await {
                Ok(_) => match current.parent() {
                    Some(parent) => current = parent.to_path_buf(),
                    None => break,
                },
                Err(err) if err.kind() == ErrorKind::NotFound => break,
                Err(err) if err.kind() == ErrorKind::DirectoryNotEmpty => break,
                Err(err) => {
                    debug!("failed to prune directory {}: {}", current.display(), err);
                    break;
                }
            }
        }
    }
}

#[async_trait]
impl StorageBackend for LocalBackend {
    async fn bucket_exists(&self, bucket: &str, region: Option<&str>) -> StorageResult<bool> {
        if let Some(region) = region {
            validate_region(region)?;
        }
        Ok(self.find_bucket(bucket).await?.is_some())
    }

    async fn create_bucket(&self, bucket: &str, region: Option<&str>) -> StorageResult<()> {
        validate_bucket_name(bucket)?;
        let region = region.unwrap_or(DEFAULT_REGION).to_lowercase();
        validate_region(&region)?;
        fs::create_dir_all(self.bucket_root(bucket)).await?;

        match sqlx::query(
            "INSERT INTO buckets (id, name, region, created_at, sse_algorithm)
             VALUES (?, ?, ?, ?, NULL)",
        )
        .bind(Uuid::new_v4())
        .bind(bucket)
        .bind(&region)
        .bind(Utc::now())
        .execute(&*self.db)
        .await
        {
            Ok(_) => Ok(()),
            Err(err) if is_unique_violation(&err) => {
                Err(StorageError::BucketAlreadyExists(bucket.to_string()))
            }
            Err(err) => Err(err.into()),
        }
    }

    async fn remove_bucket(&self, bucket: &str, _region: Option<&str>) -> StorageResult<()> {
        let bucket_rec = self.fetch_bucket(bucket).await?;

        // Emptiness is checked in the same statement so a concurrent upload
        // can't land between the check and the cascading delete.
        let result = sqlx::query(
            "DELETE FROM buckets
             WHERE id = ? AND NOT EXISTS (SELECT 1 FROM objects WHERE bucket_id = ?)",
        )
        .bind(bucket_rec.id)
        .bind(bucket_rec.id)
        .execute(&*self.db)
        .await?;
        if result.rows_affected() == 0 {
            return match self.find_bucket(bucket).await? {
                Some(_) => Err(StorageError::BucketNotEmpty(bucket.to_string())),
                None => Err(StorageError::BucketNotFound(bucket.to_string())),
            };
        }

        let bucket_path = self.bucket_root(bucket);
        if let Err(err) = fs::remove_dir_all(&bucket_path).await {
            if err.kind() != ErrorKind::NotFound {
                debug!(
                    "failed to remove bucket directory {} after delete: {}",
                    bucket_path.display(),
                    err
                );
            }
        }
        Ok(())
    }

    async fn delete_bucket_encryption(
        &self,
        bucket: &str,
        _region: Option<&str>,
    ) -> StorageResult<()> {
        let bucket_rec = self.fetch_bucket(bucket).await?;
        sqlx::query("UPDATE buckets SET sse_algorithm = NULL WHERE id = ?")
            .bind(bucket_rec.id)
            .execute(&*self.db)
            .await?;
        Ok(())
    }

    async fn list_buckets(&self) -> StorageResult<Vec<BucketInfo>> {
        let buckets = sqlx::query_as::<_, BucketInfo>(
            "SELECT name, created_at AS creation_date FROM buckets ORDER BY name ASC",
        )
        .fetch_all(&*self.db)
        .await?;
        Ok(buckets)
    }

    /// Single-file write regardless of `part_size`: the local disk has no
    /// part limit.
    async fn put_object(&self, request: PutObjectRequest<'_>) -> StorageResult<()> {
        validate_object_key(request.key)?;
        let bucket_rec = self.fetch_bucket(request.bucket).await?;
        let key = request.key;
        let content_type = request.payload.content_type_or_default().to_string();

        let file_path = self.object_path(&bucket_rec.name, key);
        let (size_bytes, etag) = self.write_payload(request, &file_path).await?;

        let upsert = sqlx::query(
            r#"
            INSERT INTO objects (
                id, bucket_id, key, content_type, size_bytes, etag, last_modified
            ) VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(bucket_id, key) DO UPDATE SET
                content_type = excluded.content_type,
                size_bytes = excluded.size_bytes,
                etag = excluded.etag,
                last_modified = excluded.last_modified
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(bucket_rec.id)
        .bind(key)
        .bind(&content_type)
        .bind(size_bytes)
        .bind(&etag)
        .bind(Utc::now())
        .execute(&*self.db)
        .await;

        match upsert {
            Ok(_) => {
                debug!("stored {} bytes at {}", size_bytes, file_path.display());
                Ok(())
            }
            Err(err) => {
                let _ = fs::remove_file(&file_path).await;
                Err(err.into())
            }
        }
    }

    async fn stat_object(
        &self,
        bucket: &str,
        _region: Option<&str>,
        key: &str,
    ) -> StorageResult<ObjectInfo> {
        validate_object_key(key)?;
        let bucket_rec = self.fetch_bucket(bucket).await?;
        self.fetch_object(&bucket_rec, key).await
    }

    async fn presigned_get_url(
        &self,
        bucket: &str,
        _region: Option<&str>,
        key: &str,
        expiry: Duration,
    ) -> StorageResult<Url> {
        let expires_at: DateTime<Utc> = Utc::now()
            + chrono::Duration::from_std(expiry)
                .map_err(|_| StorageError::invalid(key, "presign expiry out of range"))?;
        self.signer.sign_get(bucket, key, expires_at.timestamp())
    }

    async fn remove_object(
        &self,
        bucket: &str,
        _region: Option<&str>,
        key: &str,
    ) -> StorageResult<()> {
        validate_object_key(key)?;
        let bucket_rec = self.fetch_bucket(bucket).await?;

        let result = sqlx::query("DELETE FROM objects WHERE bucket_id = ? AND key = ?")
            .bind(bucket_rec.id)
            .bind(key)
            .execute(&*self.db)
            .await?;
        if result.rows_affected() == 0 {
            debug!("object {}/{} already absent", bucket, key);
        }

        let file_path = self.object_path(&bucket_rec.name, key);
        match fs::remove_file(&file_path).await {
            Ok(_) => debug!("removed physical file {}", file_path.display()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => {}
            Err(err) => return Err(err.into()),
        }

        if let Some(parent) = file_path.parent() {
            let bucket_root = self.bucket_root(&bucket_rec.name);
            self.prune_empty_dirs(parent, &bucket_root).await;
        }
        Ok(())
    }
}

/// Return true if SQLx error indicates a unique constraint violation.
fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(
        err,
        sqlx::Error::Database(db_err) if db_err.message().to_ascii_lowercase().contains("unique")
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{models::payload::ObjectPayload, services::backend::MIN_MULTIPART_SIZE};
    use bytes::Bytes;
    use tempfile::TempDir;
    use tokio::io::AsyncReadExt;

    async fn backend() -> (LocalBackend, TempDir) {
        let dir = TempDir::new().unwrap();
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        let signer =
            UrlSigner::new(b"secret", Url::parse("http://127.0.0.1:3000").unwrap()).unwrap();
        let backend = LocalBackend::new(Arc::new(pool), dir.path().join("objects"), signer);
        backend.migrate().await.unwrap();
        (backend, dir)
    }

    fn put<'a>(bucket: &'a str, key: &'a str, data: &'static [u8]) -> PutObjectRequest<'a> {
        PutObjectRequest {
            bucket,
            region: None,
            key,
            payload: ObjectPayload::from_bytes(
                Some(key.to_string()),
                Some("text/plain".into()),
                Bytes::from_static(data),
            ),
            part_size: MIN_MULTIPART_SIZE,
        }
    }

    #[tokio::test]
    async fn create_twice_reports_already_exists() {
        let (backend, _dir) = backend().await;
        backend.create_bucket("demo", None).await.unwrap();
        let err = backend.create_bucket("demo", None).await.unwrap_err();
        assert!(matches!(err, StorageError::BucketAlreadyExists(_)));
        assert!(backend.bucket_exists("demo", None).await.unwrap());
    }

    #[tokio::test]
    async fn unsupported_region_is_rejected() {
        let (backend, _dir) = backend().await;
        let err = backend
            .create_bucket("demo", Some("mars-1"))
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::InvalidIdentifier { .. }));
    }

    #[tokio::test]
    async fn put_then_read_back() {
        let (backend, _dir) = backend().await;
        backend.create_bucket("demo", None).await.unwrap();
        backend.put_object(put("demo", "a/b.txt", b"hey")).await.unwrap();

        let info = backend.stat_object("demo", None, "a/b.txt").await.unwrap();
        assert_eq!(info.size_bytes, 3);
        assert_eq!(info.content_type.as_deref(), Some("text/plain"));
        assert_eq!(info.etag.as_deref(), Some(format!("{:x}", md5::compute(b"hey")).as_str()));

        let (_, mut file) = backend.get_object_reader("demo", "a/b.txt").await.unwrap();
        let mut buf = Vec::new();
        file.read_to_end(&mut buf).await.unwrap();
        assert_eq!(buf, b"hey");
    }

    #[tokio::test]
    async fn overwrite_replaces_content() {
        let (backend, _dir) = backend().await;
        backend.create_bucket("demo", None).await.unwrap();
        backend.put_object(put("demo", "k", b"one")).await.unwrap();
        backend.put_object(put("demo", "k", b"second")).await.unwrap();
        let info = backend.stat_object("demo", None, "k").await.unwrap();
        assert_eq!(info.size_bytes, 6);
    }

    #[tokio::test]
    async fn put_into_missing_bucket_fails() {
        let (backend, _dir) = backend().await;
        let err = backend.put_object(put("demo", "k", b"x")).await.unwrap_err();
        assert!(matches!(err, StorageError::BucketNotFound(_)));
    }

    #[tokio::test]
    async fn length_mismatch_leaves_no_object() {
        let (backend, _dir) = backend().await;
        backend.create_bucket("demo", None).await.unwrap();
        let mut request = put("demo", "k", b"abc");
        request.payload.length = 5;
        let err = backend.put_object(request).await.unwrap_err();
        assert!(matches!(err, StorageError::UploadFailed { .. }));
        assert!(matches!(
            backend.stat_object("demo", None, "k").await,
            Err(StorageError::ObjectNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn refused_bucket_removal_keeps_object_metadata() {
        let (backend, _dir) = backend().await;
        backend.create_bucket("demo", None).await.unwrap();
        backend.put_object(put("demo", "keep.txt", b"kept")).await.unwrap();

        let err = backend.remove_bucket("demo", None).await.unwrap_err();
        assert!(matches!(err, StorageError::BucketNotEmpty(_)));

        let info = backend.stat_object("demo", None, "keep.txt").await.unwrap();
        assert_eq!(info.size_bytes, 4);
        assert!(backend.bucket_exists("demo", None).await.unwrap());
    }

    #[tokio::test]
    async fn removing_missing_bucket_is_not_found() {
        let (backend, _dir) = backend().await;
        let err = backend.remove_bucket("ghost", None).await.unwrap_err();
        assert!(matches!(err, StorageError::BucketNotFound(_)));
    }

    #[tokio::test]
    async fn remove_bucket_requires_empty_bucket() {
        let (backend, _dir) = backend().await;
        backend.create_bucket("demo", None).await.unwrap();
        backend.put_object(put("demo", "k", b"x")).await.unwrap();

        let err = backend.remove_bucket("demo", None).await.unwrap_err();
        assert!(matches!(err, StorageError::BucketNotEmpty(_)));

        backend.remove_object("demo", None, "k").await.unwrap();
        backend.remove_object("demo", None, "k").await.unwrap();
        backend.remove_bucket("demo", None).await.unwrap();
        assert!(!backend.bucket_exists("demo", None).await.unwrap());
    }

    #[tokio::test]
    async fn presigned_url_opens_the_object() {
        let (backend, _dir) = backend().await;
        backend.create_bucket("demo", None).await.unwrap();
        backend.put_object(put("demo", "hello.txt", b"hey")).await.unwrap();

        let url = backend
            .presigned_get_url("demo", None, "hello.txt", Duration::from_secs(60))
            .await
            .unwrap();
        assert!(url.path().ends_with("/demo/hello.txt"));

        let query: std::collections::HashMap<_, _> = url.query_pairs().into_owned().collect();
        let expires: i64 = query["X-Expires"].parse().unwrap();
        let (info, _) = backend
            .open_presigned("demo", "hello.txt", expires, &query["X-Signature"])
            .await
            .unwrap();
        assert_eq!(info.key, "hello.txt");

        let err = backend
            .open_presigned("demo", "hello.txt", expires + 1, &query["X-Signature"])
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::AccessDenied(_)));
    }

    #[tokio::test]
    async fn list_buckets_is_name_ordered() {
        let (backend, _dir) = backend().await;
        backend.create_bucket("zeta", None).await.unwrap();
        backend.create_bucket("alpha", Some("us-east-1")).await.unwrap();
        let names: Vec<_> = backend
            .list_buckets()
            .await
            .unwrap()
            .into_iter()
            .map(|b| b.name)
            .collect();
        assert_eq!(names, ["alpha", "zeta"]);
    }
}
