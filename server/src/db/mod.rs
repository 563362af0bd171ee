//! Database Layer
//!
//! File metadata and ACL persistence. [`FileRepository`] is the seam the
//! service talks to; [`PgFileRepository`] backs it with `PostgreSQL` and
//! [`MemoryFileRepository`] keeps everything in process.

mod memory;
mod models;
mod queries;

#[cfg(test)]
mod tests;

use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
pub use memory::MemoryFileRepository;
pub use models::*;
pub use queries::PgFileRepository;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use thiserror::Error;
use tracing::info;
use uuid::Uuid;

use crate::access::AclEntry;

/// Repository errors.
#[derive(Debug, Error)]
pub enum RepositoryError {
    /// A file with this id already exists.
    #[error("File {0} already exists")]
    Duplicate(Uuid),

    /// Database error.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Persistence for file records and their ACL entries.
#[async_trait]
pub trait FileRepository: Send + Sync {
    /// Insert a record together with its ACL entries as one atomic unit.
    async fn create_file(&self, record: &FileRecord, acl: &[AclEntry])
        -> Result<(), RepositoryError>;

    /// Find a live (not soft-deleted) file.
    async fn find_file(&self, id: Uuid) -> Result<Option<FileRecord>, RepositoryError>;

    /// List live files matching `query`.
    async fn list_files(&self, query: &FilesQuery) -> Result<FilePage, RepositoryError>;

    /// All ACL entries of a file.
    async fn file_acl(&self, id: Uuid) -> Result<Vec<AclEntry>, RepositoryError>;

    /// Set the deletion marker. Returns `false` if no live file matched.
    async fn soft_delete_file(&self, id: Uuid, at: DateTime<Utc>)
        -> Result<bool, RepositoryError>;

    /// Remove a file (live or soft-deleted) and its ACL entries, returning
    /// the removed record.
    async fn delete_file(&self, id: Uuid) -> Result<Option<FileRecord>, RepositoryError>;
}

/// Create `PostgreSQL` connection pool with health configuration.
pub async fn create_pool(database_url: &str) -> Result<PgPool> {
    let pool = PgPoolOptions::new()
        .min_connections(2)
        .max_connections(20)
        // Prevent hanging requests on pool exhaustion
        .acquire_timeout(Duration::from_secs(5))
        .idle_timeout(Duration::from_secs(600))
        .test_before_acquire(true)
        .connect(database_url)
        .await?;

    info!("Connected to PostgreSQL");
    Ok(pool)
}

/// Run database migrations.
pub async fn run_migrations(pool: &PgPool) -> Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    info!("Database migrations completed");
    Ok(())
}
