//! File Service
//!
//! Entry point for hosts: ingestion, reads, access checks, deletion and
//! image conversion over one blob store and one metadata repository.

use std::sync::Arc;

use chrono::Utc;
use tokio::io::AsyncRead;
use tracing::{info, warn};
use uuid::Uuid;

use crate::access;
use crate::config::Config;
use crate::db::{self, FilePage, FileRecord, FileRepository, FilesQuery, PgFileRepository};
use crate::error::FileError;
use crate::ingest::{IngestRequest, Ingestor};
use crate::media::convert::ImageConverter;
use crate::storage::{BlobKey, BlobReader, BlobStore, S3BlobStore};

/// File ingestion and retrieval.
#[derive(Clone)]
pub struct FileService {
    store: Arc<dyn BlobStore>,
    repo: Arc<dyn FileRepository>,
    ingestor: Ingestor,
    converter: ImageConverter,
    public_by_default: bool,
}

impl FileService {
    #[must_use]
    pub fn new(store: Arc<dyn BlobStore>, repo: Arc<dyn FileRepository>, config: &Config) -> Self {
        Self {
            ingestor: Ingestor::new(store.clone(), repo.clone(), Arc::new(config.clone())),
            converter: ImageConverter::from_config(config),
            public_by_default: config.files_public_by_default,
            store,
            repo,
        }
    }

    /// Replace the image converter.
    #[must_use]
    pub fn with_converter(mut self, converter: ImageConverter) -> Self {
        self.converter = converter;
        self
    }

    /// Connect to `PostgreSQL` and S3 as configured, running pending
    /// migrations.
    pub async fn from_config(config: &Config) -> anyhow::Result<Self> {
        let pool = db::create_pool(&config.database_url).await?;
        db::run_migrations(&pool).await?;

        let s3 = S3BlobStore::new(config).await?;
        if let Err(e) = s3.health_check().await {
            warn!(error = %e, bucket = s3.bucket(), "S3 health check failed");
        }

        if config.has_image_converter() {
            info!(path = ?config.image_converter_path, "Image converter enabled");
        }

        Ok(Self::new(
            Arc::new(s3),
            Arc::new(PgFileRepository::new(pool)),
            config,
        ))
    }

    /// Ingest an upload. See [`Ingestor::ingest`].
    #[tracing::instrument(skip(self, source), fields(name = %request.name, kind = %request.kind))]
    pub async fn ingest<R>(&self, request: IngestRequest, source: R) -> Result<FileRecord, FileError>
    where
        R: AsyncRead + Send + Unpin,
    {
        self.ingestor.ingest(request, source).await
    }

    /// Metadata of a live file.
    pub async fn get(&self, id: Uuid) -> Result<FileRecord, FileError> {
        if id.is_nil() {
            return Err(FileError::NotFound);
        }
        self.repo.find_file(id).await?.ok_or(FileError::NotFound)
    }

    /// Stream a file's content.
    #[tracing::instrument(skip(self))]
    pub async fn open(&self, id: Uuid) -> Result<BlobReader, FileError> {
        let record = self.get(id).await?;
        Ok(self.store.get(&BlobKey::primary(id, record.kind)).await?)
    }

    /// Stream a file's thumbnail.
    #[tracing::instrument(skip(self))]
    pub async fn open_thumbnail(&self, id: Uuid) -> Result<BlobReader, FileError> {
        let record = self.get(id).await?;
        if !record.has_thumbnail() {
            return Err(FileError::NotFound);
        }
        Ok(self.store.get(&BlobKey::thumbnail(id, record.kind)).await?)
    }

    /// Direct download URL for a file, when the store can issue one.
    pub async fn alternative_url(&self, id: Uuid) -> Result<Option<String>, FileError> {
        let record = self.get(id).await?;
        Ok(self
            .store
            .access_url(&BlobKey::primary(id, record.kind))
            .await?)
    }

    pub async fn list(&self, query: &FilesQuery) -> Result<FilePage, FileError> {
        Ok(self.repo.list_files(query).await?)
    }

    /// Whether `subject_id` may read the file.
    #[tracing::instrument(skip(self))]
    pub async fn is_accessible(&self, file_id: Uuid, subject_id: Uuid) -> Result<bool, FileError> {
        self.get(file_id).await?;
        let entries = self.repo.file_acl(file_id).await?;
        Ok(access::evaluate(&entries, subject_id).is_allowed(self.public_by_default))
    }

    /// Hide a file from reads. Its blobs are kept.
    #[tracing::instrument(skip(self))]
    pub async fn soft_delete(&self, id: Uuid) -> Result<(), FileError> {
        if id.is_nil() || !self.repo.soft_delete_file(id, Utc::now()).await? {
            return Err(FileError::NotFound);
        }
        info!(file_id = %id, "File soft-deleted");
        Ok(())
    }

    /// Remove a file's record, then its blobs.
    ///
    /// Blob deletion failures are logged and never restore the record.
    #[tracing::instrument(skip(self))]
    pub async fn delete(&self, id: Uuid) -> Result<(), FileError> {
        if id.is_nil() {
            return Err(FileError::NotFound);
        }
        let record = self
            .repo
            .delete_file(id)
            .await?
            .ok_or(FileError::NotFound)?;

        for key in [
            BlobKey::primary(id, record.kind),
            BlobKey::thumbnail(id, record.kind),
        ] {
            if let Err(e) = self.store.delete(&key).await {
                warn!(key = %key, error = %e, "Failed to delete blob of removed file");
            }
        }

        info!(file_id = %id, kind = %record.kind, "File deleted");
        Ok(())
    }

    /// Rasterize `source` to a PNG fitting `max_width`x`max_height`.
    pub async fn convert<R>(&self, source: R, max_width: u32, max_height: u32) -> Result<Vec<u8>, FileError>
    where
        R: AsyncRead + Send + Unpin,
    {
        Ok(self
            .converter
            .convert_to_png(source, max_width, max_height)
            .await?)
    }
}
