//! HTTP handlers for the file endpoints under `/minio`.
//!
//! Upload, download-link, delete and bucket listing all act on the configured
//! default bucket and delegate to `ObjectGateway`.

use crate::{
    errors::AppError,
    models::{bucket::BucketInfo, payload::ObjectPayload},
    services::error::StorageError,
    state::AppState,
};
use axum::{
    Json,
    extract::{
        Multipart, Query, State,
        multipart::{Field, MultipartError},
    },
};
use serde::{Deserialize, Serialize};
use std::io;
use tempfile::NamedTempFile;
use tokio::{fs::File, io::AsyncWriteExt};
use tokio_util::io::ReaderStream;

/// Multipart form field carrying the uploaded file.
pub const FILE_FIELD: &str = "file";

/// `?fileName=` as sent by the download and delete endpoints.
#[derive(Debug, Deserialize)]
pub struct FileNameQuery {
    #[serde(rename = "fileName")]
    pub file_name: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ObjectUrlResponse {
    pub bucket: String,
    pub key: String,
    pub url: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DeleteResponse {
    pub bucket: String,
    pub key: String,
    pub deleted: bool,
}

/// `POST /minio/upload`: store the `file` field in the default bucket and
/// return a download URL for it.
///
/// The field is spooled to a temporary file chunk by chunk so its length is
/// known before the backend decides between a single PUT and a multipart
/// upload. The file is removed when the request finishes.
pub async fn upload_file(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<ObjectUrlResponse>, AppError> {
    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        if field.name() != Some(FILE_FIELD) {
            continue;
        }

        let file_name = field.file_name().map(str::to_owned);
        let content_type = field.content_type().map(str::to_owned);
        let (spool, length) =
            spool_field(field, &state.default_bucket, file_name.as_deref()).await?;
        tracing::debug!(
            "received upload {:?} ({} bytes, {:?})",
            file_name,
            length,
            content_type
        );

        let reader = spool
            .reopen()
            .map_err(|err| spool_error(&state.default_bucket, file_name.as_deref(), err))?;
        let payload = ObjectPayload::new(
            file_name,
            content_type,
            length,
            ReaderStream::new(File::from_std(reader)),
        );
        let uploaded = state
            .gateway
            .upload_streamed(payload, &state.default_bucket, state.region())
            .await?;
        drop(spool);

        return Ok(Json(ObjectUrlResponse {
            bucket: state.default_bucket.clone(),
            key: uploaded.key,
            url: uploaded.url.into(),
        }));
    }

    Err(AppError::bad_request(format!(
        "multipart form field `{}` is required",
        FILE_FIELD
    )))
}

/// Copy a multipart field into a fresh temporary file, returning the file
/// and the number of bytes written.
async fn spool_field(
    mut field: Field<'_>,
    bucket: &str,
    file_name: Option<&str>,
) -> Result<(NamedTempFile, u64), AppError> {
    let spool = tempfile::Builder::new()
        .prefix(".upload-")
        .tempfile()
        .map_err(|err| spool_error(bucket, file_name, err))?;
    let writer = spool
        .as_file()
        .try_clone()
        .map_err(|err| spool_error(bucket, file_name, err))?;
    let mut writer = File::from_std(writer);

    let mut length: u64 = 0;
    while let Some(chunk) = field.chunk().await.map_err(multipart_error)? {
        length += chunk.len() as u64;
        writer
            .write_all(&chunk)
            .await
            .map_err(|err| spool_error(bucket, file_name, err))?;
    }
    writer
        .flush()
        .await
        .map_err(|err| spool_error(bucket, file_name, err))?;

    Ok((spool, length))
}

fn spool_error(bucket: &str, file_name: Option<&str>, err: io::Error) -> AppError {
    StorageError::upload_failed(bucket, file_name.unwrap_or_default(), err).into()
}

/// `GET /minio/list`: every bucket visible to the gateway's credentials.
pub async fn list_buckets(
    State(state): State<AppState>,
) -> Result<Json<Vec<BucketInfo>>, AppError> {
    let buckets = state.gateway.buckets().list_all().await?;
    Ok(Json(buckets))
}

/// `GET /minio/download?fileName=`: presigned download URL.
pub async fn download_file(
    State(state): State<AppState>,
    Query(q): Query<FileNameQuery>,
) -> Result<Json<ObjectUrlResponse>, AppError> {
    let url = state
        .gateway
        .download_url(&state.default_bucket, &q.file_name, state.region())
        .await?;
    Ok(Json(ObjectUrlResponse {
        bucket: state.default_bucket.clone(),
        key: q.file_name,
        url: url.into(),
    }))
}

/// `GET|DELETE /minio/delete?fileName=`: remove an object. Succeeds for
/// objects that do not exist.
pub async fn delete_file(
    State(state): State<AppState>,
    Query(q): Query<FileNameQuery>,
) -> Result<Json<DeleteResponse>, AppError> {
    state
        .gateway
        .delete_object(&state.default_bucket, &q.file_name, state.region())
        .await?;
    Ok(Json(DeleteResponse {
        bucket: state.default_bucket.clone(),
        key: q.file_name,
        deleted: true,
    }))
}

fn multipart_error(err: MultipartError) -> AppError {
    AppError::new(err.status(), err.body_text())
}
