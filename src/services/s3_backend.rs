//! S3Backend talks to any S3-compatible server (MinIO, AWS S3, R2) through
//! `aws-sdk-s3`.
//!
//! The client is built once with static credentials and path-style
//! addressing. A per-call region, when given, is applied as a config
//! override on that request only.

use crate::{
    models::{bucket::BucketInfo, object::ObjectInfo},
    services::{
        backend::{MIN_MULTIPART_SIZE, PutObjectRequest, StorageBackend},
        error::{StorageError, StorageResult},
    },
};
use async_trait::async_trait;
use aws_sdk_s3::{
    Client,
    config::{BehaviorVersion, Builder as S3ConfigBuilder, Credentials, Region},
    error::{DisplayErrorContext, ProvideErrorMetadata, SdkError},
    presigning::PresigningConfig,
    primitives::{ByteStream, DateTime as SmithyDateTime},
    types::{
        BucketLocationConstraint, CompletedMultipartUpload, CompletedPart,
        CreateBucketConfiguration,
    },
};
use bytes::{Bytes, BytesMut};
use chrono::{DateTime, Utc};
use futures::{StreamExt, stream::BoxStream};
use std::{fmt, io, time::Duration};
use tracing::{debug, warn};
use url::Url;

/// Region MinIO and AWS assume when none is configured.
pub const DEFAULT_REGION: &str = "us-east-1";

#[derive(Clone, Debug)]
pub struct S3Backend {
    client: Client,
}

impl S3Backend {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Client for `endpoint` with static credentials and path-style URLs,
    /// which MinIO requires.
    pub fn connect(
        endpoint: &str,
        access_key: &str,
        secret_key: &str,
        region: Option<&str>,
    ) -> Self {
        let credentials = Credentials::new(access_key, secret_key, None, None, "bucket-gateway");
        let config = S3ConfigBuilder::new()
            .behavior_version(BehaviorVersion::latest())
            .region(Region::new(region.unwrap_or(DEFAULT_REGION).to_owned()))
            .credentials_provider(credentials)
            .endpoint_url(endpoint)
            .force_path_style(true)
            .build();
        Self::new(Client::from_conf(config))
    }

    async fn put_single(
        &self,
        bucket: &str,
        region: Option<&str>,
        key: &str,
        content_type: &str,
        body: Bytes,
    ) -> StorageResult<()> {
        let length = body.len() as i64;
        self.client
            .put_object()
            .bucket(bucket)
            .key(key)
            .content_type(content_type)
            .content_length(length)
            .body(ByteStream::from(body))
            .customize()
            .config_override(region_override(region))
            .send()
            .await
            .map_err(|err| map_sdk_error(err, bucket, Some(key)))?;
        debug!(bucket, key, length, "single part upload complete");
        Ok(())
    }

    async fn put_multipart(
        &self,
        bucket: &str,
        region: Option<&str>,
        key: &str,
        content_type: &str,
        first: Bytes,
        reader: &mut PartReader,
    ) -> StorageResult<()> {
        let created = self
            .client
            .create_multipart_upload()
            .bucket(bucket)
            .key(key)
            .content_type(content_type)
            .customize()
            .config_override(region_override(region))
            .send()
            .await
            .map_err(|err| map_sdk_error(err, bucket, Some(key)))?;
        let upload_id = created
            .upload_id()
            .ok_or_else(|| StorageError::backend("multipart upload created without an upload id"))?
            .to_string();

        let parts = match self
            .upload_parts(bucket, region, key, &upload_id, first, reader)
            .await
        {
            Ok(parts) => parts,
            Err(err) => {
                self.abort_multipart(bucket, region, key, &upload_id).await;
                return Err(err);
            }
        };

        let part_count = parts.len();
        let completed = self
            .client
            .complete_multipart_upload()
            .bucket(bucket)
            .key(key)
            .upload_id(&upload_id)
            .multipart_upload(
                CompletedMultipartUpload::builder()
                    .set_parts(Some(parts))
                    .build(),
            )
            .customize()
            .config_override(region_override(region))
            .send()
            .await;
        if let Err(err) = completed {
            self.abort_multipart(bucket, region, key, &upload_id).await;
            return Err(map_sdk_error(err, bucket, Some(key)));
        }
        debug!(bucket, key, part_count, "multipart upload complete");
        Ok(())
    }

    async fn upload_parts(
        &self,
        bucket: &str,
        region: Option<&str>,
        key: &str,
        upload_id: &str,
        first: Bytes,
        reader: &mut PartReader,
    ) -> StorageResult<Vec<CompletedPart>> {
        let mut parts = Vec::new();
        let mut next = Some(first);
        let mut part_number: i32 = 1;
        while let Some(body) = next.take() {
            let uploaded = self
                .client
                .upload_part()
                .bucket(bucket)
                .key(key)
                .upload_id(upload_id)
                .part_number(part_number)
                .body(ByteStream::from(body))
                .customize()
                .config_override(region_override(region))
                .send()
                .await
                .map_err(|err| map_sdk_error(err, bucket, Some(key)))?;
            parts.push(
                CompletedPart::builder()
                    .set_e_tag(uploaded.e_tag().map(str::to_owned))
                    .part_number(part_number)
                    .build(),
            );

            if !reader.is_finished() {
                let part = reader
                    .next_part()
                    .await
                    .map_err(|err| StorageError::upload_failed(bucket, key, err))?;
                if !part.is_empty() {
                    next = Some(part);
                    part_number += 1;
                }
            }
        }
        Ok(parts)
    }

    async fn abort_multipart(&self, bucket: &str, region: Option<&str>, key: &str, upload_id: &str) {
        let aborted = self
            .client
            .abort_multipart_upload()
            .bucket(bucket)
            .key(key)
            .upload_id(upload_id)
            .customize()
            .config_override(region_override(region))
            .send()
            .await;
        if let Err(err) = aborted {
            warn!(
                bucket,
                key,
                upload_id,
                "failed to abort multipart upload: {}",
                DisplayErrorContext(&err)
            );
        }
    }
}

#[async_trait]
impl StorageBackend for S3Backend {
    async fn bucket_exists(&self, bucket: &str, region: Option<&str>) -> StorageResult<bool> {
        let result = self
            .client
            .head_bucket()
            .bucket(bucket)
            .customize()
            .config_override(region_override(region))
            .send()
            .await;
        match result {
            Ok(_) => Ok(true),
            Err(err) if err.as_service_error().is_some_and(|e| e.is_not_found()) => Ok(false),
            Err(err) => Err(map_sdk_error(err, bucket, None)),
        }
    }

    async fn create_bucket(&self, bucket: &str, region: Option<&str>) -> StorageResult<()> {
        let mut request = self.client.create_bucket().bucket(bucket);
        // us-east-1 is the implicit location and must not be sent as a constraint.
        if let Some(region) = region.filter(|r| *r != DEFAULT_REGION) {
            request = request.create_bucket_configuration(
                CreateBucketConfiguration::builder()
                    .location_constraint(BucketLocationConstraint::from(region))
                    .build(),
            );
        }
        request
            .customize()
            .config_override(region_override(region))
            .send()
            .await
            .map_err(|err| map_sdk_error(err, bucket, None))?;
        Ok(())
    }

    async fn remove_bucket(&self, bucket: &str, region: Option<&str>) -> StorageResult<()> {
        self.client
            .delete_bucket()
            .bucket(bucket)
            .customize()
            .config_override(region_override(region))
            .send()
            .await
            .map_err(|err| map_sdk_error(err, bucket, None))?;
        Ok(())
    }

    async fn delete_bucket_encryption(
        &self,
        bucket: &str,
        region: Option<&str>,
    ) -> StorageResult<()> {
        self.client
            .delete_bucket_encryption()
            .bucket(bucket)
            .customize()
            .config_override(region_override(region))
            .send()
            .await
            .map_err(|err| map_sdk_error(err, bucket, None))?;
        Ok(())
    }

    async fn list_buckets(&self) -> StorageResult<Vec<BucketInfo>> {
        let output = self
            .client
            .list_buckets()
            .send()
            .await
            .map_err(|err| map_sdk_error(err, "", None))?;
        Ok(output
            .buckets()
            .iter()
            .map(|bucket| BucketInfo {
                name: bucket.name().unwrap_or_default().to_string(),
                creation_date: bucket.creation_date().and_then(to_chrono),
            })
            .collect())
    }

    async fn put_object(&self, request: PutObjectRequest<'_>) -> StorageResult<()> {
        let PutObjectRequest {
            bucket,
            region,
            key,
            payload,
            part_size,
        } = request;
        let content_type = payload.content_type_or_default().to_string();
        let part_size = part_size.max(MIN_MULTIPART_SIZE);
        let mut reader = PartReader::new(payload.body, payload.length, part_size);

        let first = reader
            .next_part()
            .await
            .map_err(|err| StorageError::upload_failed(bucket, key, err))?;
        if reader.is_finished() {
            self.put_single(bucket, region, key, &content_type, first)
                .await
        } else {
            self.put_multipart(bucket, region, key, &content_type, first, &mut reader)
                .await
        }
    }

    async fn stat_object(
        &self,
        bucket: &str,
        region: Option<&str>,
        key: &str,
    ) -> StorageResult<ObjectInfo> {
        let result = self
            .client
            .head_object()
            .bucket(bucket)
            .key(key)
            .customize()
            .config_override(region_override(region))
            .send()
            .await;
        let output = match result {
            Ok(output) => output,
            Err(err) if err.as_service_error().is_some_and(|e| e.is_not_found()) => {
                return Err(StorageError::object_not_found(bucket, key));
            }
            Err(err) => return Err(map_sdk_error(err, bucket, Some(key))),
        };
        Ok(ObjectInfo {
            bucket: bucket.to_string(),
            key: key.to_string(),
            size_bytes: output.content_length().unwrap_or_default(),
            content_type: output.content_type().map(str::to_owned),
            etag: output.e_tag().map(|tag| tag.trim_matches('"').to_owned()),
            last_modified: output.last_modified().and_then(to_chrono),
        })
    }

    async fn presigned_get_url(
        &self,
        bucket: &str,
        region: Option<&str>,
        key: &str,
        expiry: Duration,
    ) -> StorageResult<Url> {
        let config = PresigningConfig::expires_in(expiry)
            .map_err(|err| StorageError::invalid(key, err.to_string()))?;
        let presigned = self
            .client
            .get_object()
            .bucket(bucket)
            .key(key)
            .customize()
            .config_override(region_override(region))
            .presigned(config)
            .await
            .map_err(|err| map_sdk_error(err, bucket, Some(key)))?;
        Url::parse(presigned.uri()).map_err(StorageError::backend)
    }

    async fn remove_object(
        &self,
        bucket: &str,
        region: Option<&str>,
        key: &str,
    ) -> StorageResult<()> {
        self.client
            .delete_object()
            .bucket(bucket)
            .key(key)
            .customize()
            .config_override(region_override(region))
            .send()
            .await
            .map_err(|err| map_sdk_error(err, bucket, Some(key)))?;
        Ok(())
    }
}

/// Config override carrying the per-call region, or nothing.
fn region_override(region: Option<&str>) -> S3ConfigBuilder {
    let mut builder = S3ConfigBuilder::new();
    if let Some(region) = region {
        builder.set_region(Some(Region::new(region.to_owned())));
    }
    builder
}

/// Translate S3 error codes into the gateway taxonomy. Anything without a
/// recognised code (timeouts, dispatch failures, auth errors, 5xx) is
/// `BackendUnavailable`.
fn map_sdk_error<E, R>(err: SdkError<E, R>, bucket: &str, key: Option<&str>) -> StorageError
where
    E: ProvideErrorMetadata + std::error::Error + Send + Sync + 'static,
    R: fmt::Debug + Send + Sync + 'static,
{
    match err.code() {
        Some("NoSuchBucket") => StorageError::BucketNotFound(bucket.to_string()),
        Some("NoSuchKey") => StorageError::object_not_found(bucket, key.unwrap_or_default()),
        Some("BucketAlreadyOwnedByYou" | "BucketAlreadyExists") => {
            StorageError::BucketAlreadyExists(bucket.to_string())
        }
        Some("BucketNotEmpty") => StorageError::BucketNotEmpty(bucket.to_string()),
        Some("InvalidBucketName") => StorageError::invalid(
            bucket,
            err.message().unwrap_or("rejected by backend").to_string(),
        ),
        Some("KeyTooLongError") => StorageError::invalid(
            key.unwrap_or_default(),
            err.message().unwrap_or("rejected by backend").to_string(),
        ),
        _ => StorageError::backend(DisplayErrorContext(&err).to_string()),
    }
}

fn to_chrono(value: &SmithyDateTime) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp(value.secs(), value.subsec_nanos())
}

/// Cuts a payload stream into parts of `part_size` bytes while checking the
/// declared length.
///
/// It reads one chunk past `part_size` before handing out a part, so a
/// payload that fits in one part is known to be finished after the first
/// call.
struct PartReader {
    body: BoxStream<'static, io::Result<Bytes>>,
    declared: u64,
    part_size: usize,
    read: u64,
    pending: BytesMut,
    exhausted: bool,
}

impl PartReader {
    fn new(body: BoxStream<'static, io::Result<Bytes>>, declared: u64, part_size: u64) -> Self {
        Self {
            body,
            declared,
            part_size: usize::try_from(part_size).unwrap_or(usize::MAX),
            read: 0,
            pending: BytesMut::new(),
            exhausted: false,
        }
    }

    fn is_finished(&self) -> bool {
        self.exhausted && self.pending.is_empty()
    }

    async fn next_part(&mut self) -> io::Result<Bytes> {
        while self.pending.len() <= self.part_size && !self.exhausted {
            match self.body.next().await {
                Some(chunk) => {
                    let chunk = chunk?;
                    self.read += chunk.len() as u64;
                    if self.read > self.declared {
                        return Err(io::Error::new(
                            io::ErrorKind::InvalidData,
                            format!("stream exceeds declared length of {} bytes", self.declared),
                        ));
                    }
                    self.pending.extend_from_slice(&chunk);
                }
                None => {
                    self.exhausted = true;
                    if self.read != self.declared {
                        return Err(io::Error::new(
                            io::ErrorKind::UnexpectedEof,
                            format!(
                                "expected {} bytes, stream yielded {}",
                                self.declared, self.read
                            ),
                        ));
                    }
                }
            }
        }
        let take = self.pending.len().min(self.part_size);
        Ok(self.pending.split_to(take).freeze())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aws_sdk_s3::{
        config::http::HttpResponse,
        error::ErrorMetadata,
        operation::{create_bucket::CreateBucketError, get_object::GetObjectError},
        primitives::SdkBody,
    };
    use futures::stream;

    fn service_error<E>(err: E, status: u16) -> SdkError<E, HttpResponse> {
        let raw = HttpResponse::new(status.try_into().unwrap(), SdkBody::empty());
        SdkError::service_error(err, raw)
    }

    fn coded(code: &str) -> ErrorMetadata {
        ErrorMetadata::builder()
            .code(code)
            .message("from the server")
            .build()
    }

    #[test]
    fn no_such_key_maps_to_object_not_found() {
        let err = service_error(GetObjectError::generic(coded("NoSuchKey")), 404);
        match map_sdk_error(err, "demo", Some("missing.txt")) {
            StorageError::ObjectNotFound { bucket, key } => {
                assert_eq!(bucket, "demo");
                assert_eq!(key, "missing.txt");
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn create_race_codes_map_to_already_exists() {
        for code in ["BucketAlreadyOwnedByYou", "BucketAlreadyExists"] {
            let err = service_error(CreateBucketError::generic(coded(code)), 409);
            assert!(
                matches!(map_sdk_error(err, "demo", None), StorageError::BucketAlreadyExists(_)),
                "{code}"
            );
        }
    }

    #[test]
    fn bucket_codes_map_to_taxonomy() {
        let err = service_error(GetObjectError::generic(coded("NoSuchBucket")), 404);
        assert!(matches!(
            map_sdk_error(err, "demo", Some("a")),
            StorageError::BucketNotFound(_)
        ));

        let err = service_error(CreateBucketError::generic(coded("InvalidBucketName")), 400);
        assert!(matches!(
            map_sdk_error(err, "Bad", None),
            StorageError::InvalidIdentifier { .. }
        ));
    }

    #[test]
    fn uncoded_failures_are_backend_unavailable() {
        let err: SdkError<GetObjectError, HttpResponse> = SdkError::timeout_error("took too long");
        assert!(matches!(
            map_sdk_error(err, "demo", Some("a")),
            StorageError::BackendUnavailable(_)
        ));

        let err = service_error(GetObjectError::generic(coded("AccessDenied")), 403);
        assert!(matches!(
            map_sdk_error(err, "demo", Some("a")),
            StorageError::BackendUnavailable(_)
        ));
    }

    fn chunks(parts: &[&'static [u8]]) -> BoxStream<'static, io::Result<Bytes>> {
        stream::iter(
            parts
                .iter()
                .map(|p| Ok(Bytes::from_static(*p)))
                .collect::<Vec<_>>(),
        )
        .boxed()
    }

    #[tokio::test]
    async fn small_payload_is_a_single_part() {
        let mut reader = PartReader::new(chunks(&[b"he", b"llo"]), 5, 8);
        let first = reader.next_part().await.unwrap();
        assert_eq!(&first[..], b"hello");
        assert!(reader.is_finished());
    }

    #[tokio::test]
    async fn payload_of_exactly_one_part_is_single() {
        let mut reader = PartReader::new(chunks(&[b"abcd", b"efgh"]), 8, 8);
        let first = reader.next_part().await.unwrap();
        assert_eq!(first.len(), 8);
        assert!(reader.is_finished());
    }

    #[tokio::test]
    async fn large_payload_is_split_into_parts() {
        let mut reader = PartReader::new(chunks(&[b"abcdef", b"ghijkl", b"m"]), 13, 4);
        let mut parts = vec![reader.next_part().await.unwrap()];
        while !reader.is_finished() {
            parts.push(reader.next_part().await.unwrap());
        }
        let sizes: Vec<_> = parts.iter().map(Bytes::len).collect();
        assert_eq!(sizes, [4, 4, 4, 1]);
        assert_eq!(parts.concat(), b"abcdefghijklm");
    }

    #[tokio::test]
    async fn short_stream_is_rejected() {
        let mut reader = PartReader::new(chunks(&[b"abc"]), 10, 8);
        let err = reader.next_part().await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }

    #[tokio::test]
    async fn overlong_stream_is_rejected() {
        let mut reader = PartReader::new(chunks(&[b"abc", b"def"]), 4, 8);
        let err = reader.next_part().await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[tokio::test]
    async fn empty_payload_is_a_single_empty_part() {
        let mut reader = PartReader::new(chunks(&[]), 0, 8);
        let first = reader.next_part().await.unwrap();
        assert!(first.is_empty());
        assert!(reader.is_finished());
    }

    #[test]
    fn smithy_timestamps_convert_to_chrono() {
        let ts = SmithyDateTime::from_secs(1_700_000_000);
        assert_eq!(to_chrono(&ts).unwrap().timestamp(), 1_700_000_000);
    }
}
