//! Upload Ingestion
//!
//! Streams an upload into the blob store while fingerprinting it and deriving
//! a thumbnail, all from a single read of the source. The record becomes
//! visible only once the primary blob is stored and the metadata committed.
//! Every other outcome leaves no blob and no record behind.
//!
//! Failure policy:
//! - Source read errors, size mismatches and store failures are fatal and
//!   roll back.
//! - Thumbnail failures are logged and the record is created without one.

mod policy;
mod rollback;
pub mod tee;

use std::io::{self, Cursor};
use std::sync::Arc;

use chrono::Utc;
use sha2::{Digest, Sha256};
use tokio::io::AsyncRead;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

pub use policy::IngestRequest;
use rollback::Rollback;
use tee::{chunk_reader, Chunk, Tee, TeeError};

use crate::access;
use crate::config::Config;
use crate::db::{FileRecord, FileRepository, ThumbnailInfo};
use crate::error::FileError;
use crate::media::thumbnail::{
    generate_thumbnail, is_supported_image, ThumbnailBounds, MAX_PROCESSABLE_SIZE, SNIFF_LEN,
};
use crate::storage::{BlobKey, BlobStore, StorageError};

/// Runs uploads through the store, fingerprint and thumbnail consumers.
#[derive(Clone)]
pub struct Ingestor {
    store: Arc<dyn BlobStore>,
    repo: Arc<dyn FileRepository>,
    config: Arc<Config>,
}

impl Ingestor {
    #[must_use]
    pub fn new(store: Arc<dyn BlobStore>, repo: Arc<dyn FileRepository>, config: Arc<Config>) -> Self {
        Self {
            store,
            repo,
            config,
        }
    }

    fn thumbnail_bounds(&self) -> ThumbnailBounds {
        ThumbnailBounds {
            max_width: self.config.thumbnail_max_width,
            max_height: self.config.thumbnail_max_height,
        }
    }

    /// Ingest `source` as a new file.
    ///
    /// Dropping the returned future cancels the upload. Blobs it already
    /// wrote are deleted in the background, unless the record write has
    /// already started: that write may still commit, so the blobs are kept.
    pub async fn ingest<R>(
        &self,
        mut request: IngestRequest,
        source: R,
    ) -> Result<FileRecord, FileError>
    where
        R: AsyncRead + Send + Unpin,
    {
        policy::check(&self.config, &mut request)?;

        let id = Uuid::now_v7();
        let primary_key = BlobKey::primary(id, request.kind);
        let thumbnail_key = BlobKey::thumbnail(id, request.kind);
        let mut rollback = Rollback::new(
            self.store.clone(),
            vec![primary_key.clone(), thumbnail_key.clone()],
        );

        let declared = request.declared_size as u64;
        let mut tee = Tee::new(self.config.ingest_channel_capacity);
        let store_rx = tee.required("store");
        let hash_rx = tee.required("fingerprint");
        let thumbnail_rx = tee.optional("thumbnail");

        let (pumped, stored, fingerprint, thumbnail) = tokio::join!(
            tee.pump(source, declared),
            self.store
                .put(&primary_key, Box::pin(chunk_reader(store_rx)), &request.mime_type),
            fingerprint(hash_rx),
            produce_thumbnail(
                self.store.as_ref(),
                &thumbnail_key,
                thumbnail_rx,
                self.thumbnail_bounds(),
            ),
        );

        let fingerprint = match settle(pumped, stored, fingerprint, declared) {
            Ok(fingerprint) => fingerprint,
            Err(e) => {
                warn!(file_id = %id, error = %e, "Ingestion failed, rolling back");
                rollback.run().await;
                return Err(e);
            }
        };

        let record = FileRecord {
            id,
            name: request.name,
            size: request.declared_size,
            mime_type: request.mime_type,
            kind: request.kind,
            creator_id: request.creator_id,
            channel_id: request.channel_id,
            fingerprint,
            thumbnail,
            created_at: Utc::now(),
            deleted_at: None,
        };
        let acl = access::normalize(&request.acl);

        // The commit may land after the caller stops polling
        rollback.skip_on_drop();
        if let Err(e) = self.repo.create_file(&record, &acl).await {
            warn!(file_id = %id, error = %e, "Failed to save file record, rolling back");
            rollback.run().await;
            return Err(e.into());
        }
        rollback.disarm();

        info!(
            file_id = %record.id,
            kind = %record.kind,
            size = record.size,
            has_thumbnail = record.has_thumbnail(),
            "File ingested"
        );

        Ok(record)
    }
}

/// Combine the outcomes of the pump and the required consumers into the
/// fingerprint, or the error to report.
///
/// A source failure explains every other failure, so it wins. A store error
/// comes next since it is what closes the store channel.
fn settle(
    pumped: Result<u64, TeeError>,
    stored: Result<u64, StorageError>,
    fingerprint: io::Result<String>,
    declared: u64,
) -> Result<String, FileError> {
    let total = match pumped {
        Ok(total) => total,
        Err(e @ TeeError::ConsumerClosed(_)) => {
            stored?;
            return Err(e.into());
        }
        Err(e) => return Err(e.into()),
    };

    let written = stored?;
    let fingerprint =
        fingerprint.map_err(|e| FileError::Internal(format!("fingerprint failed: {e}")))?;

    if total != declared {
        return Err(FileError::Validation(format!(
            "Upload ended after {total} of {declared} declared bytes"
        )));
    }
    if written != total {
        return Err(FileError::Internal(format!(
            "Store wrote {written} of {total} bytes"
        )));
    }

    Ok(fingerprint)
}

/// Hex SHA-256 of everything received.
async fn fingerprint(mut rx: mpsc::Receiver<Chunk>) -> io::Result<String> {
    let mut hasher = Sha256::new();
    while let Some(chunk) = rx.recv().await {
        hasher.update(&chunk?);
    }
    Ok(hex::encode(hasher.finalize()))
}

/// Best-effort thumbnail. Any failure yields `None`.
///
/// Returning early drops `rx`, which detaches this consumer from the tee.
async fn produce_thumbnail(
    store: &dyn BlobStore,
    key: &BlobKey,
    mut rx: mpsc::Receiver<Chunk>,
    bounds: ThumbnailBounds,
) -> Option<ThumbnailInfo> {
    let mut data = Vec::new();
    let mut sniffed = false;

    while let Some(chunk) = rx.recv().await {
        let Ok(chunk) = chunk else {
            return None;
        };
        data.extend_from_slice(&chunk);

        if data.len() > MAX_PROCESSABLE_SIZE {
            debug!(key = %key, "Upload too large for a thumbnail");
            return None;
        }
        if !sniffed && data.len() >= SNIFF_LEN {
            if !is_supported_image(&data) {
                return None;
            }
            sniffed = true;
        }
    }
    drop(rx);

    if !sniffed && !is_supported_image(&data) {
        return None;
    }

    let generated = tokio::task::spawn_blocking(move || generate_thumbnail(&data, bounds)).await;
    let thumbnail = match generated {
        Ok(Ok(thumbnail)) => thumbnail,
        Ok(Err(e)) => {
            warn!(key = %key, error = %e, "Thumbnail generation failed");
            return None;
        }
        Err(e) => {
            warn!(key = %key, error = %e, "Thumbnail task failed");
            return None;
        }
    };

    let info = ThumbnailInfo {
        mime_type: thumbnail.content_type.to_string(),
        width: thumbnail.width,
        height: thumbnail.height,
    };

    match store
        .put(key, Box::pin(Cursor::new(thumbnail.data)), thumbnail.content_type)
        .await
    {
        Ok(_) => Some(info),
        Err(e) => {
            warn!(key = %key, error = %e, "Failed to store thumbnail");
            if let Err(e) = store.delete(key).await {
                warn!(key = %key, error = %e, "Failed to remove partial thumbnail");
            }
            None
        }
    }
}
