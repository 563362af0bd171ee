//! S3 Storage Client
//!
//! Handles S3-compatible storage for file contents and thumbnails.
//! Supports any S3-compatible backend: AWS S3, MinIO, Backblaze B2, Cloudflare R2.

use async_trait::async_trait;
use aws_config::Region;
use aws_sdk_s3::{
    config::{Credentials, IdentityCache, SharedCredentialsProvider, StalledStreamProtectionConfig},
    presigning::PresigningConfig,
    primitives::ByteStream,
    types::{CompletedMultipartUpload, CompletedPart},
    Client,
};
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tracing::{info, warn};

use super::{BlobKey, BlobReader, BlobStore, StorageError};
use crate::config::Config;

/// Upload part size. S3 requires every part but the last to be at least 5 MiB.
const PART_SIZE: usize = 8 * 1024 * 1024;

/// S3 client wrapper with configuration.
#[derive(Clone)]
pub struct S3BlobStore {
    client: Client,
    bucket: String,
    presign_expiry: Duration,
}

impl S3BlobStore {
    /// Create a new S3 client from configuration.
    ///
    /// Supports custom endpoints for S3-compatible backends (MinIO, R2, B2).
    /// Uses path-style addressing when a custom endpoint is configured.
    pub async fn new(config: &Config) -> Result<Self, StorageError> {
        let region = Region::new(
            std::env::var("AWS_REGION").unwrap_or_else(|_| "us-east-1".to_string()),
        );

        let mut s3_config_builder = aws_sdk_s3::Config::builder()
            .region(region)
            .stalled_stream_protection(StalledStreamProtectionConfig::disabled())
            .identity_cache(IdentityCache::no_cache());

        // Configure credentials from environment
        if let (Ok(access_key), Ok(secret_key)) = (
            std::env::var("AWS_ACCESS_KEY_ID"),
            std::env::var("AWS_SECRET_ACCESS_KEY"),
        ) {
            let credentials = Credentials::new(
                access_key,
                secret_key,
                None, // session token
                None, // expiry
                "environment",
            );
            s3_config_builder =
                s3_config_builder.credentials_provider(SharedCredentialsProvider::new(credentials));
        }

        // Configure custom endpoint for S3-compatible backends
        if let Some(endpoint) = &config.s3_endpoint {
            s3_config_builder = s3_config_builder
                .endpoint_url(endpoint)
                .force_path_style(true); // Required for MinIO and most S3-compatible backends
        }

        let s3_config = s3_config_builder.build();
        let client = Client::from_conf(s3_config);

        if config.s3_presign_expiry <= 0 {
            return Err(StorageError::Config(
                "S3_PRESIGN_EXPIRY must be positive".to_string(),
            ));
        }

        info!(
            bucket = %config.s3_bucket,
            endpoint = ?config.s3_endpoint,
            "S3 client initialized"
        );

        Ok(Self {
            client,
            bucket: config.s3_bucket.clone(),
            presign_expiry: Duration::from_secs(config.s3_presign_expiry as u64),
        })
    }

    /// Check if the bucket is accessible (health check).
    pub async fn health_check(&self) -> Result<(), StorageError> {
        self.client
            .head_bucket()
            .bucket(&self.bucket)
            .send()
            .await
            .map_err(|e| StorageError::Config(format!("Bucket not accessible: {e}")))?;

        Ok(())
    }

    /// Get the bucket name.
    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    /// Upload a body that did not fit into a single part.
    ///
    /// The multipart upload is aborted on any failure so that no parts linger
    /// in the bucket.
    async fn put_multipart(
        &self,
        path: &str,
        first_part: Vec<u8>,
        mut body: BlobReader,
        content_type: &str,
    ) -> Result<u64, StorageError> {
        let upload = self
            .client
            .create_multipart_upload()
            .bucket(&self.bucket)
            .key(path)
            .content_type(content_type)
            .send()
            .await
            .map_err(|e| StorageError::Upload(e.to_string()))?;

        let upload_id = upload
            .upload_id()
            .ok_or_else(|| StorageError::Upload("missing multipart upload id".to_string()))?
            .to_string();

        let mut parts = Vec::new();
        let mut part = first_part;
        let mut total = 0u64;

        let result: Result<(), StorageError> = async {
            loop {
                let part_number = parts.len() as i32 + 1;
                total += part.len() as u64;

                let uploaded = self
                    .client
                    .upload_part()
                    .bucket(&self.bucket)
                    .key(path)
                    .upload_id(&upload_id)
                    .part_number(part_number)
                    .body(ByteStream::from(std::mem::take(&mut part)))
                    .send()
                    .await
                    .map_err(|e| StorageError::Upload(e.to_string()))?;

                parts.push(
                    CompletedPart::builder()
                        .set_e_tag(uploaded.e_tag().map(String::from))
                        .part_number(part_number)
                        .build(),
                );

                part = read_part(&mut body).await?;
                if part.is_empty() {
                    break;
                }
            }

            self.client
                .complete_multipart_upload()
                .bucket(&self.bucket)
                .key(path)
                .upload_id(&upload_id)
                .multipart_upload(
                    CompletedMultipartUpload::builder()
                        .set_parts(Some(parts))
                        .build(),
                )
                .send()
                .await
                .map_err(|e| StorageError::Upload(e.to_string()))?;

            Ok(())
        }
        .await;

        if let Err(e) = result {
            if let Err(abort) = self
                .client
                .abort_multipart_upload()
                .bucket(&self.bucket)
                .key(path)
                .upload_id(&upload_id)
                .send()
                .await
            {
                warn!(key = %path, error = %abort, "Failed to abort multipart upload");
            }
            return Err(e);
        }

        Ok(total)
    }
}

/// Read up to [`PART_SIZE`] bytes. An empty result means end of body.
async fn read_part(body: &mut BlobReader) -> Result<Vec<u8>, StorageError> {
    let mut part = Vec::with_capacity(PART_SIZE);
    body.take(PART_SIZE as u64).read_to_end(&mut part).await?;
    Ok(part)
}

#[async_trait]
impl BlobStore for S3BlobStore {
    async fn put(
        &self,
        key: &BlobKey,
        mut body: BlobReader,
        content_type: &str,
    ) -> Result<u64, StorageError> {
        let path = key.path();
        let first = read_part(&mut body).await?;

        if first.len() == PART_SIZE {
            return self.put_multipart(&path, first, body, content_type).await;
        }

        let size = first.len() as u64;
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(&path)
            .body(ByteStream::from(first))
            .content_type(content_type)
            .send()
            .await
            .map_err(|e| StorageError::Upload(e.to_string()))?;

        Ok(size)
    }

    async fn get(&self, key: &BlobKey) -> Result<BlobReader, StorageError> {
        let path = key.path();
        let output = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(&path)
            .send()
            .await
            .map_err(|e| {
                if e.as_service_error().is_some_and(|se| se.is_no_such_key()) {
                    StorageError::NotFound(path.clone())
                } else {
                    StorageError::Download(e.to_string())
                }
            })?;

        Ok(Box::pin(output.body.into_async_read()))
    }

    async fn delete(&self, key: &BlobKey) -> Result<(), StorageError> {
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(key.path())
            .send()
            .await
            .map_err(|e| StorageError::Delete(e.to_string()))?;

        Ok(())
    }

    /// Generate a presigned URL for downloading a file.
    ///
    /// The URL is valid for the configured expiry duration.
    async fn access_url(&self, key: &BlobKey) -> Result<Option<String>, StorageError> {
        let presign_config = PresigningConfig::builder()
            .expires_in(self.presign_expiry)
            .build()
            .map_err(|e| StorageError::Presign(e.to_string()))?;

        let presigned = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key.path())
            .presigned(presign_config)
            .await
            .map_err(|e| StorageError::Presign(e.to_string()))?;

        Ok(Some(presigned.uri().to_string()))
    }
}
