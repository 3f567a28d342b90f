//! Serves presigned download links issued by the local backend.

use crate::{
    errors::AppError,
    models::{object::ObjectInfo, payload::DEFAULT_CONTENT_TYPE},
    state::AppState,
};
use axum::{
    body::Body,
    extract::{Path, Query, State},
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::Response,
};
use serde::Deserialize;
use tokio_util::io::ReaderStream;

#[derive(Debug, Deserialize)]
pub struct PresignedQuery {
    #[serde(rename = "X-Expires")]
    pub expires: i64,
    #[serde(rename = "X-Signature")]
    pub signature: String,
}

/// `GET /objects/{bucket}/{*key}`: stream the object if the signature in the
/// query string is valid and unexpired.
pub async fn get_presigned_object(
    State(state): State<AppState>,
    Path((bucket, key)): Path<(String, String)>,
    Query(q): Query<PresignedQuery>,
) -> Result<Response, AppError> {
    let Some(local) = state.local.as_ref() else {
        return Err(AppError::new(
            StatusCode::NOT_FOUND,
            "presigned links are served by the storage backend",
        ));
    };

    let (meta, file) = local
        .open_presigned(&bucket, &key, q.expires, &q.signature)
        .await?;
    let body = Body::from_stream(ReaderStream::new(file));

    let mut response = Response::new(body);
    *response.status_mut() = StatusCode::OK;
    set_object_headers(response.headers_mut(), &meta);
    Ok(response)
}

fn set_object_headers(headers: &mut HeaderMap, meta: &ObjectInfo) {
    let content_type = meta.content_type.as_deref().unwrap_or(DEFAULT_CONTENT_TYPE);
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_str(content_type)
            .unwrap_or_else(|_| HeaderValue::from_static(DEFAULT_CONTENT_TYPE)),
    );

    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(meta.size_bytes.max(0)));

    if let Some(etag) = meta.etag.as_ref() {
        if let Ok(value) = HeaderValue::from_str(&format!("\"{}\"", etag)) {
            headers.insert(header::ETAG, value);
        }
    }

    if let Some(modified) = meta.last_modified {
        if let Ok(value) = HeaderValue::from_str(&modified.to_rfc2822()) {
            headers.insert(header::LAST_MODIFIED, value);
        }
    }
}
