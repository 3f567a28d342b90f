//! Bucket administration under `/minio/buckets/{bucket}`.

use crate::{errors::AppError, state::AppState};
use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize)]
pub struct BucketStatus {
    pub bucket: String,
    pub exists: bool,
}

/// `GET /minio/buckets/{bucket}`
pub async fn bucket_status(
    State(state): State<AppState>,
    Path(bucket): Path<String>,
) -> Result<Json<BucketStatus>, AppError> {
    let exists = state
        .gateway
        .buckets()
        .exists(&bucket, state.region())
        .await?;
    Ok(Json(BucketStatus { bucket, exists }))
}

/// `PUT /minio/buckets/{bucket}`: idempotent create.
pub async fn create_bucket(
    State(state): State<AppState>,
    Path(bucket): Path<String>,
) -> Result<Json<BucketStatus>, AppError> {
    state
        .gateway
        .buckets()
        .ensure_exists(&bucket, state.region())
        .await?;
    Ok(Json(BucketStatus {
        bucket,
        exists: true,
    }))
}

/// `DELETE /minio/buckets/{bucket}`: remove an empty bucket.
pub async fn delete_bucket(
    State(state): State<AppState>,
    Path(bucket): Path<String>,
) -> Result<StatusCode, AppError> {
    state
        .gateway
        .buckets()
        .delete(&bucket, state.region())
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

/// `DELETE /minio/buckets/{bucket}/encryption`
pub async fn clear_bucket_encryption(
    State(state): State<AppState>,
    Path(bucket): Path<String>,
) -> Result<StatusCode, AppError> {
    state
        .gateway
        .buckets()
        .clear_encryption(&bucket, state.region())
        .await?;
    Ok(StatusCode::NO_CONTENT)
}
