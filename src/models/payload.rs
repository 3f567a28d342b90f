//! Upload payloads: a byte stream with a declared length and the metadata the
//! client sent alongside it.

use bytes::Bytes;
use futures::stream::{self, BoxStream, StreamExt};
use std::{fmt, io, path::Path};
use tokio::fs::File;
use tokio_util::io::ReaderStream;

/// Content type used when the client did not declare one.
pub const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

/// A streamed upload body.
///
/// `length` is the number of bytes the stream is expected to yield. Backends
/// reject payloads whose stream ends early or runs over.
pub struct ObjectPayload {
    /// Original file name as declared by the client (multipart `filename`).
    pub file_name: Option<String>,
    pub content_type: Option<String>,
    pub length: u64,
    pub body: BoxStream<'static, io::Result<Bytes>>,
}

impl ObjectPayload {
    pub fn new<S>(
        file_name: Option<String>,
        content_type: Option<String>,
        length: u64,
        body: S,
    ) -> Self
    where
        S: futures::Stream<Item = io::Result<Bytes>> + Send + 'static,
    {
        Self {
            file_name,
            content_type,
            length,
            body: body.boxed(),
        }
    }

    /// Payload backed by an in-memory buffer.
    pub fn from_bytes(
        file_name: Option<String>,
        content_type: Option<String>,
        data: Bytes,
    ) -> Self {
        let length = data.len() as u64;
        Self::new(
            file_name,
            content_type,
            length,
            stream::once(async move { Ok::<_, io::Error>(data) }),
        )
    }

    /// Payload streamed from a local file. The length is taken from the file
    /// metadata at open time.
    pub async fn from_file(path: &Path, content_type: Option<String>) -> io::Result<Self> {
        let file = File::open(path).await?;
        let length = file.metadata().await?.len();
        let file_name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned());
        Ok(Self::new(
            file_name,
            content_type,
            length,
            ReaderStream::new(file),
        ))
    }

    /// Declared content type, or `application/octet-stream`.
    pub fn content_type_or_default(&self) -> &str {
        self.content_type.as_deref().unwrap_or(DEFAULT_CONTENT_TYPE)
    }
}

impl fmt::Debug for ObjectPayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectPayload")
            .field("file_name", &self.file_name)
            .field("content_type", &self.content_type)
            .field("length", &self.length)
            .finish_non_exhaustive()
    }
}
