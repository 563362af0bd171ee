//! Shared fixtures for file service integration tests.
//!
//! Everything runs against the in-memory store and repository. The failing
//! variants inject errors at the store and repository seams.
#![allow(dead_code)]

use std::io::Cursor;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use image::codecs::gif::GifEncoder;
use image::{DynamicImage, Frame, ImageFormat, Rgb, RgbImage, Rgba, RgbaImage};
use tokio::io::AsyncReadExt;
use uuid::Uuid;
use vc_files::access::AclEntry;
use vc_files::config::Config;
use vc_files::db::{
    FilePage, FileRecord, FileRepository, FilesQuery, MemoryFileRepository, RepositoryError,
};
use vc_files::storage::{BlobKey, BlobReader, BlobStore, MemoryBlobStore, StorageError};
use vc_files::FileService;

/// A service over in-memory backends, with handles to inspect them.
pub struct TestContext {
    pub service: FileService,
    pub store: MemoryBlobStore,
    pub repo: Arc<MemoryFileRepository>,
}

/// Test configuration with small channels so uploads exercise backpressure.
pub fn test_config() -> Config {
    let mut config = Config::default_for_test();
    config.ingest_channel_capacity = 2;
    config
}

pub fn memory_context() -> TestContext {
    memory_context_with(&test_config())
}

pub fn memory_context_with(config: &Config) -> TestContext {
    let store = MemoryBlobStore::new();
    let repo = Arc::new(MemoryFileRepository::new());
    let service = FileService::new(Arc::new(store.clone()), repo.clone(), config);
    TestContext {
        service,
        store,
        repo,
    }
}

/// Deterministic non-image payload.
pub fn payload(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 31 % 251) as u8).collect()
}

/// A gradient image encoded in `format`.
pub fn encoded_image(width: u32, height: u32, format: ImageFormat) -> Vec<u8> {
    let img = RgbImage::from_fn(width, height, |x, y| {
        Rgb([(x % 256) as u8, (y % 256) as u8, 128])
    });
    let mut buf = Cursor::new(Vec::new());
    DynamicImage::ImageRgb8(img)
        .write_to(&mut buf, format)
        .expect("encode test image");
    buf.into_inner()
}

/// An animated GIF with `frames` distinct frames.
pub fn animated_gif(width: u32, height: u32, frames: u8) -> Vec<u8> {
    let mut buf = Vec::new();
    {
        let mut encoder = GifEncoder::new_with_speed(&mut buf, 30);
        for i in 0..frames {
            let img = RgbaImage::from_fn(width, height, |x, y| {
                Rgba([(x % 256) as u8, (y % 256) as u8, i.wrapping_mul(80), 255])
            });
            encoder.encode_frame(Frame::new(img)).expect("encode frame");
        }
    }
    buf
}

pub async fn read_all(mut reader: BlobReader) -> Vec<u8> {
    let mut out = Vec::new();
    reader.read_to_end(&mut out).await.expect("read blob");
    out
}

/// Blob store whose uploads always fail after storing part of the body.
#[derive(Clone, Default)]
pub struct FailingBlobStore {
    pub inner: MemoryBlobStore,
}

#[async_trait]
impl BlobStore for FailingBlobStore {
    async fn put(
        &self,
        key: &BlobKey,
        mut body: BlobReader,
        content_type: &str,
    ) -> Result<u64, StorageError> {
        let mut partial = vec![0u8; 1024];
        let n = body.read(&mut partial).await?;
        partial.truncate(n);
        self.inner.insert(key, partial, content_type);
        Err(StorageError::Upload("connection reset by peer".to_string()))
    }

    async fn get(&self, key: &BlobKey) -> Result<BlobReader, StorageError> {
        self.inner.get(key).await
    }

    async fn delete(&self, key: &BlobKey) -> Result<(), StorageError> {
        self.inner.delete(key).await
    }
}

/// Blob store that exposes each upload as it arrives: after every read the
/// bytes received so far are stored under the key.
#[derive(Clone, Default)]
pub struct StreamingBlobStore {
    pub inner: MemoryBlobStore,
}

#[async_trait]
impl BlobStore for StreamingBlobStore {
    async fn put(
        &self,
        key: &BlobKey,
        mut body: BlobReader,
        content_type: &str,
    ) -> Result<u64, StorageError> {
        let mut received = Vec::new();
        let mut buf = vec![0u8; 4096];
        loop {
            let n = body.read(&mut buf).await?;
            if n == 0 {
                return Ok(received.len() as u64);
            }
            received.extend_from_slice(&buf[..n]);
            self.inner.insert(key, received.clone(), content_type);
        }
    }

    async fn get(&self, key: &BlobKey) -> Result<BlobReader, StorageError> {
        self.inner.get(key).await
    }

    async fn delete(&self, key: &BlobKey) -> Result<(), StorageError> {
        self.inner.delete(key).await
    }
}

/// Repository whose inserts commit and then never return, like a `COMMIT`
/// whose acknowledgement is still in flight.
#[derive(Default)]
pub struct StalledCommitRepository {
    pub inner: MemoryFileRepository,
}

#[async_trait]
impl FileRepository for StalledCommitRepository {
    async fn create_file(
        &self,
        record: &FileRecord,
        acl: &[AclEntry],
    ) -> Result<(), RepositoryError> {
        self.inner.create_file(record, acl).await?;
        std::future::pending().await
    }

    async fn find_file(&self, id: Uuid) -> Result<Option<FileRecord>, RepositoryError> {
        self.inner.find_file(id).await
    }

    async fn list_files(&self, query: &FilesQuery) -> Result<FilePage, RepositoryError> {
        self.inner.list_files(query).await
    }

    async fn file_acl(&self, id: Uuid) -> Result<Vec<AclEntry>, RepositoryError> {
        self.inner.file_acl(id).await
    }

    async fn soft_delete_file(
        &self,
        id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<bool, RepositoryError> {
        self.inner.soft_delete_file(id, at).await
    }

    async fn delete_file(&self, id: Uuid) -> Result<Option<FileRecord>, RepositoryError> {
        self.inner.delete_file(id).await
    }
}

/// Repository whose inserts always fail.
#[derive(Default)]
pub struct FailingRepository;

#[async_trait]
impl FileRepository for FailingRepository {
    async fn create_file(
        &self,
        _record: &FileRecord,
        _acl: &[AclEntry],
    ) -> Result<(), RepositoryError> {
        Err(RepositoryError::Database(sqlx::Error::PoolTimedOut))
    }

    async fn find_file(&self, _id: Uuid) -> Result<Option<FileRecord>, RepositoryError> {
        Ok(None)
    }

    async fn list_files(&self, _query: &FilesQuery) -> Result<FilePage, RepositoryError> {
        Ok(FilePage {
            files: Vec::new(),
            more: false,
        })
    }

    async fn file_acl(&self, _id: Uuid) -> Result<Vec<AclEntry>, RepositoryError> {
        Ok(Vec::new())
    }

    async fn soft_delete_file(
        &self,
        _id: Uuid,
        _at: DateTime<Utc>,
    ) -> Result<bool, RepositoryError> {
        Ok(false)
    }

    async fn delete_file(&self, _id: Uuid) -> Result<Option<FileRecord>, RepositoryError> {
        Ok(None)
    }
}
