//! Error taxonomy shared by the backend adapters, the bucket manager and the
//! object gateway.

use std::io;
use thiserror::Error;

/// Boxed source error carried by opaque backend failures.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

#[derive(Debug, Error)]
pub enum StorageError {
    /// The backend could not be reached, rejected our credentials, or failed
    /// internally. Never used to mean "absent".
    #[error("storage backend unavailable")]
    BackendUnavailable(#[source] BoxError),
    #[error("bucket `{0}` not found")]
    BucketNotFound(String),
    #[error("bucket `{0}` already exists")]
    BucketAlreadyExists(String),
    #[error("bucket `{0}` is not empty")]
    BucketNotEmpty(String),
    #[error("object `{key}` not found in bucket `{bucket}`")]
    ObjectNotFound { bucket: String, key: String },
    #[error("upload of `{key}` to bucket `{bucket}` failed")]
    UploadFailed {
        bucket: String,
        key: String,
        #[source]
        source: BoxError,
    },
    #[error("invalid identifier `{name}`: {reason}")]
    InvalidIdentifier { name: String, reason: String },
    #[error("access denied: {0}")]
    AccessDenied(String),
}

pub type StorageResult<T> = Result<T, StorageError>;

impl StorageError {
    pub fn backend(err: impl Into<BoxError>) -> Self {
        StorageError::BackendUnavailable(err.into())
    }

    pub fn invalid(name: impl Into<String>, reason: impl Into<String>) -> Self {
        StorageError::InvalidIdentifier {
            name: name.into(),
            reason: reason.into(),
        }
    }

    pub fn object_not_found(bucket: &str, key: &str) -> Self {
        StorageError::ObjectNotFound {
            bucket: bucket.to_string(),
            key: key.to_string(),
        }
    }

    pub fn upload_failed(bucket: &str, key: &str, cause: impl Into<BoxError>) -> Self {
        StorageError::UploadFailed {
            bucket: bucket.to_string(),
            key: key.to_string(),
            source: cause.into(),
        }
    }

    /// The innermost `StorageError` an upload failure wraps, or `self`.
    pub fn upload_cause(&self) -> &StorageError {
        match self {
            StorageError::UploadFailed { source, .. } => source
                .downcast_ref::<StorageError>()
                .map(StorageError::upload_cause)
                .unwrap_or(self),
            other => other,
        }
    }
}

impl From<sqlx::Error> for StorageError {
    fn from(err: sqlx::Error) -> Self {
        StorageError::backend(err)
    }
}

impl From<io::Error> for StorageError {
    fn from(err: io::Error) -> Self {
        StorageError::backend(err)
    }
}
