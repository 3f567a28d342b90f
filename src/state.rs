//! Shared state handed to every HTTP handler.

use crate::services::{local_backend::LocalBackend, object_gateway::ObjectGateway};
use std::sync::Arc;

#[derive(Clone, Debug)]
pub struct AppState {
    pub gateway: ObjectGateway,

    /// Bucket used by the upload, download and delete endpoints.
    pub default_bucket: String,

    /// Region qualifier passed to every backend call.
    pub region: Option<String>,

    /// Set when the local backend is active; presigned downloads are then
    /// served by this process.
    pub local: Option<Arc<LocalBackend>>,
}

impl AppState {
    pub fn region(&self) -> Option<&str> {
        self.region.as_deref()
    }
}
