//! Represents a bucket as reported by the storage backend.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// A bucket visible to the configured credentials.
///
/// Returned by bucket listing in backend order.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug, PartialEq, Eq)]
pub struct BucketInfo {
    /// Bucket name (must conform to DNS naming rules).
    pub name: String,

    /// When this bucket was created, if the backend reports it.
    pub creation_date: Option<DateTime<Utc>>,
}
