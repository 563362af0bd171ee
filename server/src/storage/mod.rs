//! Blob Storage
//!
//! Key-addressed byte storage for file contents and derived thumbnails.

mod memory;
mod s3;

use std::pin::Pin;

use async_trait::async_trait;
use thiserror::Error;
use tokio::io::AsyncRead;
use uuid::Uuid;

pub use memory::{MemoryBlobStore, StoredObject};
pub use s3::S3BlobStore;

use crate::db::FileKind;

/// Streaming blob body.
pub type BlobReader = Pin<Box<dyn AsyncRead + Send>>;

/// Storage-related errors.
#[derive(Debug, Error)]
pub enum StorageError {
    /// No object under this key.
    #[error("Object not found: {0}")]
    NotFound(String),

    /// Failed to upload file.
    #[error("Failed to upload file: {0}")]
    Upload(String),

    /// Failed to download file.
    #[error("Failed to download file: {0}")]
    Download(String),

    /// Failed to generate presigned URL.
    #[error("Failed to generate presigned URL: {0}")]
    Presign(String),

    /// Failed to delete file.
    #[error("Failed to delete file: {0}")]
    Delete(String),

    /// Storage configuration error.
    #[error("Storage configuration error: {0}")]
    Config(String),

    /// Reading the upload body failed.
    #[error("Failed to read upload body: {0}")]
    Body(#[from] std::io::Error),
}

/// Address of a blob: the file kind routes it, the name identifies it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BlobKey {
    kind: FileKind,
    name: String,
}

impl BlobKey {
    /// Key of a file's primary content: `<kind>/<id>`.
    #[must_use]
    pub fn primary(id: Uuid, kind: FileKind) -> Self {
        Self {
            kind,
            name: id.to_string(),
        }
    }

    /// Key of a file's thumbnail: `<kind>/<id>-thumb`, next to the primary
    /// content.
    #[must_use]
    pub fn thumbnail(id: Uuid, kind: FileKind) -> Self {
        Self {
            kind,
            name: format!("{id}-thumb"),
        }
    }

    #[must_use]
    pub const fn kind(&self) -> FileKind {
        self.kind
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Full object path in the backend.
    #[must_use]
    pub fn path(&self) -> String {
        format!("{}/{}", self.kind, self.name)
    }
}

impl std::fmt::Display for BlobKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.kind, self.name)
    }
}

/// Key-addressed durable storage.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Store `body` under `key`, returning the number of bytes written.
    ///
    /// The object only becomes readable once the whole body was stored.
    async fn put(&self, key: &BlobKey, body: BlobReader, content_type: &str)
        -> Result<u64, StorageError>;

    /// Open the object under `key` for streaming.
    async fn get(&self, key: &BlobKey) -> Result<BlobReader, StorageError>;

    /// Delete the object under `key`. Deleting a missing object succeeds.
    async fn delete(&self, key: &BlobKey) -> Result<(), StorageError>;

    /// Direct download URL, for backends that can hand one out.
    async fn access_url(&self, _key: &BlobKey) -> Result<Option<String>, StorageError> {
        Ok(None)
    }
}
