use crate::services::error::StorageError;
use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use std::fmt;

/// A lightweight wrapper for errors returned by HTTP handlers.
#[derive(Debug)]
pub struct AppError {
    pub status: StatusCode,
    pub message: String,
}

impl AppError {
    /// Create a new AppError with a specific status and message.
    pub fn new(status: StatusCode, msg: impl Into<String>) -> Self {
        Self {
            status,
            message: msg.into(),
        }
    }

    /// Shortcut for 400 Bad Request
    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, msg)
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for AppError {}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = Json(json!({
            "error": self.message,
            "status": self.status.as_u16()
        }));

        (self.status, body).into_response()
    }
}

/// Status code for a storage outcome. Upload failures caused by a bad name
/// are the caller's fault; every other upload failure is the backend's.
fn status_for(err: &StorageError) -> StatusCode {
    match err {
        StorageError::InvalidIdentifier { .. } => StatusCode::BAD_REQUEST,
        StorageError::AccessDenied(_) => StatusCode::FORBIDDEN,
        StorageError::BucketNotFound(_) | StorageError::ObjectNotFound { .. } => {
            StatusCode::NOT_FOUND
        }
        StorageError::BucketAlreadyExists(_) | StorageError::BucketNotEmpty(_) => {
            StatusCode::CONFLICT
        }
        StorageError::UploadFailed { .. } => match err.upload_cause() {
            StorageError::InvalidIdentifier { .. } => StatusCode::BAD_REQUEST,
            _ => StatusCode::BAD_GATEWAY,
        },
        StorageError::BackendUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
    }
}

impl From<StorageError> for AppError {
    fn from(err: StorageError) -> Self {
        let status = status_for(&err);
        let message = render_chain(&err);
        if status.is_server_error() {
            tracing::error!(status = status.as_u16(), "{}", message);
        } else {
            tracing::debug!(status = status.as_u16(), "{}", message);
        }
        AppError::new(status, message)
    }
}

/// `outer: inner: innermost`
pub(crate) fn render_chain(err: &dyn std::error::Error) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}
