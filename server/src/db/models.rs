//! Database models.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use crate::access::{AclEntry, AclSubject};

/// Logical file type. Also selects the storage prefix of the file's blobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "file_kind", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum FileKind {
    /// Message attachment uploaded by a user.
    Attachment,
    /// User or webhook icon.
    Icon,
    /// Custom stamp (emoji) image.
    Stamp,
    /// Derived preview image. Never uploaded directly.
    Thumbnail,
}

impl FileKind {
    /// Storage prefix and database label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Attachment => "attachment",
            Self::Icon => "icon",
            Self::Stamp => "stamp",
            Self::Thumbnail => "thumbnail",
        }
    }
}

impl std::fmt::Display for FileKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Thumbnail metadata. Present only when a thumbnail blob was stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThumbnailInfo {
    pub mime_type: String,
    pub width: u32,
    pub height: u32,
}

/// A stored file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileRecord {
    pub id: Uuid,
    pub name: String,
    pub size: i64,
    pub mime_type: String,
    pub kind: FileKind,
    /// Absent for system-generated files.
    pub creator_id: Option<Uuid>,
    /// Channel the file was uploaded to, if any.
    pub channel_id: Option<Uuid>,
    /// Hex SHA-256 of the stored bytes.
    pub fingerprint: String,
    pub thumbnail: Option<ThumbnailInfo>,
    pub created_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl FileRecord {
    #[must_use]
    pub const fn has_thumbnail(&self) -> bool {
        self.thumbnail.is_some()
    }

    #[must_use]
    pub fn thumbnail_mime_type(&self) -> Option<&str> {
        self.thumbnail.as_ref().map(|t| t.mime_type.as_str())
    }

    /// Thumbnail width in pixels, zero when there is no thumbnail.
    #[must_use]
    pub fn thumbnail_width(&self) -> u32 {
        self.thumbnail.as_ref().map_or(0, |t| t.width)
    }

    /// Thumbnail height in pixels, zero when there is no thumbnail.
    #[must_use]
    pub fn thumbnail_height(&self) -> u32 {
        self.thumbnail.as_ref().map_or(0, |t| t.height)
    }

    #[must_use]
    pub const fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }
}

/// Row shape of the `files` table.
#[derive(Debug, Clone, FromRow)]
pub(crate) struct FileRow {
    pub id: Uuid,
    pub name: String,
    pub size_bytes: i64,
    pub mime_type: String,
    pub kind: FileKind,
    pub creator_id: Option<Uuid>,
    pub channel_id: Option<Uuid>,
    pub fingerprint: String,
    pub has_thumbnail: bool,
    pub thumbnail_mime: Option<String>,
    pub thumbnail_width: i32,
    pub thumbnail_height: i32,
    pub created_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl From<FileRow> for FileRecord {
    fn from(row: FileRow) -> Self {
        // A row only carries a thumbnail when every thumbnail column agrees
        let thumbnail = match (row.has_thumbnail, row.thumbnail_mime) {
            (true, Some(mime_type)) if row.thumbnail_width > 0 && row.thumbnail_height > 0 => {
                Some(ThumbnailInfo {
                    mime_type,
                    width: row.thumbnail_width as u32,
                    height: row.thumbnail_height as u32,
                })
            }
            _ => None,
        };

        Self {
            id: row.id,
            name: row.name,
            size: row.size_bytes,
            mime_type: row.mime_type,
            kind: row.kind,
            creator_id: row.creator_id,
            channel_id: row.channel_id,
            fingerprint: row.fingerprint,
            thumbnail,
            created_at: row.created_at,
            deleted_at: row.deleted_at,
        }
    }
}

/// Row shape of the `file_acl` table. The nil UUID is the wildcard subject.
#[derive(Debug, Clone, FromRow)]
pub(crate) struct AclRow {
    pub subject_id: Uuid,
    pub allow: bool,
}

impl From<AclRow> for AclEntry {
    fn from(row: AclRow) -> Self {
        Self {
            subject: AclSubject::from_stored(row.subject_id),
            allow: row.allow,
        }
    }
}

/// Default page size for [`FilesQuery`].
pub const DEFAULT_FILES_LIMIT: i64 = 50;

/// Largest page size accepted by [`FilesQuery`].
pub const MAX_FILES_LIMIT: i64 = 200;

/// Filter for listing files. Soft-deleted files are never listed.
#[derive(Debug, Clone, Default)]
pub struct FilesQuery {
    pub channel_id: Option<Uuid>,
    pub creator_id: Option<Uuid>,
    pub kind: Option<FileKind>,
    /// Inclusive lower bound on creation time.
    pub since: Option<DateTime<Utc>>,
    /// Inclusive upper bound on creation time.
    pub until: Option<DateTime<Utc>>,
    pub limit: Option<i64>,
    pub offset: i64,
    /// Oldest first when true, newest first otherwise.
    pub ascending: bool,
}

impl FilesQuery {
    /// Page size clamped to `1..=MAX_FILES_LIMIT`.
    #[must_use]
    pub fn effective_limit(&self) -> i64 {
        self.limit
            .unwrap_or(DEFAULT_FILES_LIMIT)
            .clamp(1, MAX_FILES_LIMIT)
    }

    /// Check a record against every filter except paging.
    #[must_use]
    pub fn matches(&self, record: &FileRecord) -> bool {
        !record.is_deleted()
            && self.channel_id.is_none_or(|c| record.channel_id == Some(c))
            && self.creator_id.is_none_or(|c| record.creator_id == Some(c))
            && self.kind.is_none_or(|k| record.kind == k)
            && self.since.is_none_or(|t| record.created_at >= t)
            && self.until.is_none_or(|t| record.created_at <= t)
    }
}

/// One page of a file listing.
#[derive(Debug, Clone, Serialize)]
pub struct FilePage {
    pub files: Vec<FileRecord>,
    /// Whether another page exists after this one.
    pub more: bool,
}
