//! Defines the gateway's HTTP surface.
//!
//! ## Structure
//! - **File endpoints** (default bucket)
//!   - `POST   /minio/upload`: multipart upload, field `file`
//!   - `GET    /minio/list`: list buckets
//!   - `GET    /minio/download?fileName=`: presigned download URL
//!   - `GET|DELETE /minio/delete?fileName=`: delete object
//!
//! - **Bucket endpoints**
//!   - `GET    /minio/buckets/{bucket}`: existence check
//!   - `PUT    /minio/buckets/{bucket}`: ensure exists
//!   - `DELETE /minio/buckets/{bucket}`: delete bucket
//!   - `DELETE /minio/buckets/{bucket}/encryption`: drop SSE config
//!
//! - **Presigned downloads** (local backend only)
//!   - `GET    /objects/{bucket}/{*key}`

use crate::{
    handlers::{
        bucket_handlers::{bucket_status, clear_bucket_encryption, create_bucket, delete_bucket},
        file_handlers::{delete_file, download_file, list_buckets, upload_file},
        health_handlers::{healthz, readyz},
        presigned_handlers::get_presigned_object,
    },
    state::AppState,
};
use axum::{
    Router,
    extract::DefaultBodyLimit,
    routing::{delete, get, post},
};
use tower_http::trace::TraceLayer;

/// Build the router for every gateway route.
///
/// Uploads accept bodies up to `max_upload_bytes`; every other route keeps
/// axum's default limit.
pub fn routes(max_upload_bytes: usize) -> Router<AppState> {
    Router::new()
        // health endpoints (mounted at root)
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        // File endpoints
        .route(
            "/minio/upload",
            post(upload_file).layer(DefaultBodyLimit::max(max_upload_bytes)),
        )
        .route("/minio/list", get(list_buckets))
        .route("/minio/download", get(download_file))
        .route("/minio/delete", get(delete_file).delete(delete_file))
        // Bucket endpoints
        .route(
            "/minio/buckets/{bucket}",
            get(bucket_status).put(create_bucket).delete(delete_bucket),
        )
        .route(
            "/minio/buckets/{bucket}/encryption",
            delete(clear_bucket_encryption),
        )
        .route("/objects/{bucket}/{*key}", get(get_presigned_object))
}

/// The complete application with state attached.
pub fn app(state: AppState, max_upload_bytes: usize) -> Router {
    routes(max_upload_bytes)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
