//! Cleanup of blobs written by an ingestion that did not commit.

use std::sync::Arc;

use tokio::runtime::Handle;
use tracing::{error, warn};

use crate::storage::{BlobKey, BlobStore};

/// Deletes a set of blob keys unless disarmed.
///
/// Failed ingestions call [`Rollback::run`]. If the ingestion future is
/// dropped mid-flight, `Drop` hands the deletions to a background task
/// until [`Rollback::skip_on_drop`] is called.
pub(crate) struct Rollback {
    store: Arc<dyn BlobStore>,
    keys: Vec<BlobKey>,
    on_drop: bool,
}

impl Rollback {
    pub(crate) fn new(store: Arc<dyn BlobStore>, keys: Vec<BlobKey>) -> Self {
        Self {
            store,
            keys,
            on_drop: true,
        }
    }

    /// Leave the blobs in place if the guard is dropped. [`Rollback::run`]
    /// still deletes them.
    pub(crate) fn skip_on_drop(&mut self) {
        self.on_drop = false;
    }

    /// Keep the blobs.
    pub(crate) fn disarm(mut self) {
        self.keys.clear();
    }

    /// Delete the blobs now.
    pub(crate) async fn run(mut self) {
        let keys = std::mem::take(&mut self.keys);
        delete_all(self.store.as_ref(), &keys).await;
    }
}

impl Drop for Rollback {
    fn drop(&mut self) {
        if !self.on_drop || self.keys.is_empty() {
            return;
        }

        let keys = std::mem::take(&mut self.keys);
        match Handle::try_current() {
            Ok(handle) => {
                let store = self.store.clone();
                handle.spawn(async move {
                    delete_all(store.as_ref(), &keys).await;
                });
            }
            Err(_) => {
                error!(?keys, "Ingestion cancelled outside a runtime, blobs left behind");
            }
        }
    }
}

async fn delete_all(store: &dyn BlobStore, keys: &[BlobKey]) {
    for key in keys {
        if let Err(e) = store.delete(key).await {
            warn!(key = %key, error = %e, "Failed to delete blob during rollback");
        }
    }
}
