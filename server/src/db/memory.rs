//! In-process [`FileRepository`].
//!
//! Records and ACL entries live behind a single lock so that a record and its
//! entries become visible together.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use super::models::{FilePage, FileRecord, FilesQuery};
use super::{FileRepository, RepositoryError};
use crate::access::AclEntry;

#[derive(Default)]
struct State {
    files: HashMap<Uuid, FileRecord>,
    acl: HashMap<Uuid, Vec<AclEntry>>,
}

/// Memory-backed file repository.
#[derive(Default)]
pub struct MemoryFileRepository {
    state: RwLock<State>,
}

impl MemoryFileRepository {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored records, including soft-deleted ones.
    pub async fn len(&self) -> usize {
        self.state.read().await.files.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl FileRepository for MemoryFileRepository {
    async fn create_file(
        &self,
        record: &FileRecord,
        acl: &[AclEntry],
    ) -> Result<(), RepositoryError> {
        let mut state = self.state.write().await;
        if state.files.contains_key(&record.id) {
            return Err(RepositoryError::Duplicate(record.id));
        }
        state.files.insert(record.id, record.clone());
        state.acl.insert(record.id, acl.to_vec());
        Ok(())
    }

    async fn find_file(&self, id: Uuid) -> Result<Option<FileRecord>, RepositoryError> {
        let state = self.state.read().await;
        Ok(state.files.get(&id).filter(|f| !f.is_deleted()).cloned())
    }

    async fn list_files(&self, query: &FilesQuery) -> Result<FilePage, RepositoryError> {
        let state = self.state.read().await;

        let mut files: Vec<FileRecord> = state
            .files
            .values()
            .filter(|f| query.matches(f))
            .cloned()
            .collect();

        files.sort_by(|a, b| (a.created_at, a.id).cmp(&(b.created_at, b.id)));
        if !query.ascending {
            files.reverse();
        }

        let limit = query.effective_limit() as usize;
        let offset = query.offset.max(0) as usize;
        let mut page: Vec<FileRecord> = files.into_iter().skip(offset).take(limit + 1).collect();
        let more = page.len() > limit;
        page.truncate(limit);

        Ok(FilePage { files: page, more })
    }

    async fn file_acl(&self, id: Uuid) -> Result<Vec<AclEntry>, RepositoryError> {
        let state = self.state.read().await;
        Ok(state.acl.get(&id).cloned().unwrap_or_default())
    }

    async fn soft_delete_file(
        &self,
        id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<bool, RepositoryError> {
        let mut state = self.state.write().await;
        match state.files.get_mut(&id) {
            Some(file) if !file.is_deleted() => {
                file.deleted_at = Some(at);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn delete_file(&self, id: Uuid) -> Result<Option<FileRecord>, RepositoryError> {
        let mut state = self.state.write().await;
        state.acl.remove(&id);
        Ok(state.files.remove(&id))
    }
}
