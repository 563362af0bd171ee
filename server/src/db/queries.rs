//! `PostgreSQL` queries for file records and ACL entries.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, QueryBuilder};
use uuid::Uuid;

use super::models::{AclRow, FilePage, FileRecord, FileRow, FilesQuery};
use super::{FileRepository, RepositoryError};
use crate::access::AclEntry;

/// [`FileRepository`] backed by the `files` and `file_acl` tables.
#[derive(Clone)]
pub struct PgFileRepository {
    pool: PgPool,
}

impl PgFileRepository {
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl FileRepository for PgFileRepository {
    async fn create_file(
        &self,
        record: &FileRecord,
        acl: &[AclEntry],
    ) -> Result<(), RepositoryError> {
        let mut tx = self.pool.begin().await?;

        let thumbnail = record.thumbnail.as_ref();
        let inserted = sqlx::query(
            r"
            INSERT INTO files (
                id, name, size_bytes, mime_type, kind, creator_id, channel_id, fingerprint,
                has_thumbnail, thumbnail_mime, thumbnail_width, thumbnail_height, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            ON CONFLICT (id) DO NOTHING
            ",
        )
        .bind(record.id)
        .bind(&record.name)
        .bind(record.size)
        .bind(&record.mime_type)
        .bind(record.kind)
        .bind(record.creator_id)
        .bind(record.channel_id)
        .bind(&record.fingerprint)
        .bind(thumbnail.is_some())
        .bind(thumbnail.map(|t| t.mime_type.as_str()))
        .bind(thumbnail.map_or(0, |t| t.width as i32))
        .bind(thumbnail.map_or(0, |t| t.height as i32))
        .bind(record.created_at)
        .execute(&mut *tx)
        .await?;

        if inserted.rows_affected() == 0 {
            return Err(RepositoryError::Duplicate(record.id));
        }

        if !acl.is_empty() {
            let subjects: Vec<Uuid> = acl.iter().map(|e| e.subject.stored_id()).collect();
            let allows: Vec<bool> = acl.iter().map(|e| e.allow).collect();

            sqlx::query(
                r"
                INSERT INTO file_acl (file_id, subject_id, allow)
                SELECT $1, subject_id, allow
                FROM UNNEST($2::uuid[], $3::bool[]) AS t(subject_id, allow)
                ON CONFLICT (file_id, subject_id)
                DO UPDATE SET allow = file_acl.allow AND EXCLUDED.allow
                ",
            )
            .bind(record.id)
            .bind(&subjects)
            .bind(&allows)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn find_file(&self, id: Uuid) -> Result<Option<FileRecord>, RepositoryError> {
        let row = sqlx::query_as::<_, FileRow>(
            "SELECT * FROM files WHERE id = $1 AND deleted_at IS NULL",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(FileRecord::from))
    }

    async fn list_files(&self, query: &FilesQuery) -> Result<FilePage, RepositoryError> {
        let limit = query.effective_limit();

        let mut builder: QueryBuilder<Postgres> =
            QueryBuilder::new("SELECT * FROM files WHERE deleted_at IS NULL");

        if let Some(channel_id) = query.channel_id {
            builder.push(" AND channel_id = ").push_bind(channel_id);
        }
        if let Some(creator_id) = query.creator_id {
            builder.push(" AND creator_id = ").push_bind(creator_id);
        }
        if let Some(kind) = query.kind {
            builder.push(" AND kind = ").push_bind(kind);
        }
        if let Some(since) = query.since {
            builder.push(" AND created_at >= ").push_bind(since);
        }
        if let Some(until) = query.until {
            builder.push(" AND created_at <= ").push_bind(until);
        }

        if query.ascending {
            builder.push(" ORDER BY created_at ASC, id ASC");
        } else {
            builder.push(" ORDER BY created_at DESC, id DESC");
        }

        // Fetch one extra row to learn whether another page exists
        builder.push(" LIMIT ").push_bind(limit + 1);
        builder.push(" OFFSET ").push_bind(query.offset.max(0));

        let mut rows = builder
            .build_query_as::<FileRow>()
            .fetch_all(&self.pool)
            .await?;

        let more = rows.len() as i64 > limit;
        rows.truncate(limit as usize);

        Ok(FilePage {
            files: rows.into_iter().map(FileRecord::from).collect(),
            more,
        })
    }

    async fn file_acl(&self, id: Uuid) -> Result<Vec<AclEntry>, RepositoryError> {
        let rows = sqlx::query_as::<_, AclRow>(
            "SELECT subject_id, allow FROM file_acl WHERE file_id = $1",
        )
        .bind(id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(AclEntry::from).collect())
    }

    async fn soft_delete_file(
        &self,
        id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<bool, RepositoryError> {
        let result =
            sqlx::query("UPDATE files SET deleted_at = $2 WHERE id = $1 AND deleted_at IS NULL")
                .bind(id)
                .bind(at)
                .execute(&self.pool)
                .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn delete_file(&self, id: Uuid) -> Result<Option<FileRecord>, RepositoryError> {
        // file_acl rows go with the file (ON DELETE CASCADE)
        let row = sqlx::query_as::<_, FileRow>("DELETE FROM files WHERE id = $1 RETURNING *")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(FileRecord::from))
    }
}
