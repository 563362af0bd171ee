//! Upload request validation.

use serde::Deserialize;
use uuid::Uuid;
use validator::Validate;

use crate::access::AclEntry;
use crate::config::Config;
use crate::db::FileKind;
use crate::error::FileError;
use crate::util::{format_file_size, guess_mime_type, sanitize_filename};

/// Metadata accompanying an upload stream.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct IngestRequest {
    /// Original file name.
    #[validate(length(min = 1, max = 255, message = "File name must be 1-255 characters"))]
    pub name: String,

    /// Size the client announced, in bytes. The stream must match it exactly.
    #[validate(range(min = 0, message = "Declared size must not be negative"))]
    pub declared_size: i64,

    /// Client-supplied MIME type. Guessed from the name when empty.
    #[serde(default)]
    pub mime_type: String,

    pub kind: FileKind,

    #[serde(default)]
    pub creator_id: Option<Uuid>,

    #[serde(default)]
    pub channel_id: Option<Uuid>,

    #[serde(default)]
    pub acl: Vec<AclEntry>,
}

impl IngestRequest {
    #[must_use]
    pub fn new(name: impl Into<String>, declared_size: i64, kind: FileKind) -> Self {
        Self {
            name: name.into(),
            declared_size,
            mime_type: String::new(),
            kind,
            creator_id: None,
            channel_id: None,
            acl: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_mime_type(mut self, mime_type: impl Into<String>) -> Self {
        self.mime_type = mime_type.into();
        self
    }

    #[must_use]
    pub const fn with_creator(mut self, creator_id: Uuid) -> Self {
        self.creator_id = Some(creator_id);
        self
    }

    #[must_use]
    pub const fn with_channel(mut self, channel_id: Uuid) -> Self {
        self.channel_id = Some(channel_id);
        self
    }

    #[must_use]
    pub fn with_acl(mut self, acl: Vec<AclEntry>) -> Self {
        self.acl = acl;
        self
    }
}

/// Check `request` against the configured limits, sanitizing its name and
/// filling in a missing MIME type. Runs before any byte is read or written.
pub fn check(config: &Config, request: &mut IngestRequest) -> Result<(), FileError> {
    request.validate()?;

    let name = sanitize_filename(&request.name);
    if name.is_empty() {
        return Err(FileError::Validation("Invalid file name".to_string()));
    }
    request.name = name;

    let max_size = config.max_size_for(request.kind).ok_or_else(|| {
        FileError::Validation(format!("Files of kind '{}' cannot be uploaded", request.kind))
    })?;

    // validate() guarantees a non-negative size
    let declared = request.declared_size as u64;
    if declared > max_size as u64 {
        return Err(FileError::Validation(format!(
            "File too large: {} exceeds the {} limit for {} files",
            format_file_size(declared),
            format_file_size(max_size as u64),
            request.kind
        )));
    }

    if request.mime_type.trim().is_empty() {
        request.mime_type = guess_mime_type(&request.name);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> Config {
        let mut config = Config::default_for_test();
        config.max_icon_size = 1024;
        config
    }

    #[test]
    fn test_accepts_valid_request() {
        let mut req = IngestRequest::new("photo.jpg", 512, FileKind::Icon).with_mime_type("image/jpeg");
        check(&config(), &mut req).unwrap();
        assert_eq!(req.mime_type, "image/jpeg");
    }

    #[test]
    fn test_rejects_bad_names() {
        let mut empty = IngestRequest::new("", 1, FileKind::Attachment);
        assert!(matches!(check(&config(), &mut empty), Err(FileError::Validation(_))));

        let mut long = IngestRequest::new("a".repeat(256), 1, FileKind::Attachment);
        assert!(matches!(check(&config(), &mut long), Err(FileError::Validation(_))));

        // 255 multi-byte characters is still within the limit
        let mut wide = IngestRequest::new("é".repeat(255), 1, FileKind::Attachment);
        check(&config(), &mut wide).unwrap();
    }

    #[test]
    fn test_rejects_names_with_nothing_usable() {
        for name in ["   ", "<>", "\u{7}\u{1b}", "..", "files/"] {
            let mut req = IngestRequest::new(name, 1, FileKind::Attachment);
            assert!(
                matches!(check(&config(), &mut req), Err(FileError::Validation(_))),
                "{name:?} was accepted"
            );
        }
    }

    #[test]
    fn test_sanitizes_name() {
        let mut traversal = IngestRequest::new("../../etc/passwd.txt", 1, FileKind::Attachment);
        check(&config(), &mut traversal).unwrap();
        assert_eq!(traversal.name, "passwd.txt");
        assert_eq!(traversal.mime_type, "text/plain");

        let mut control = IngestRequest::new("re\u{0}port\r\n.pdf", 1, FileKind::Attachment);
        check(&config(), &mut control).unwrap();
        assert_eq!(control.name, "report.pdf");
    }

    #[test]
    fn test_rejects_negative_size() {
        let mut req = IngestRequest::new("a.bin", -1, FileKind::Attachment);
        assert!(matches!(check(&config(), &mut req), Err(FileError::Validation(_))));
    }

    #[test]
    fn test_enforces_kind_limit() {
        let mut at_limit = IngestRequest::new("icon.png", 1024, FileKind::Icon);
        check(&config(), &mut at_limit).unwrap();

        let mut over = IngestRequest::new("icon.png", 1025, FileKind::Icon);
        let err = check(&config(), &mut over).unwrap_err();
        assert!(err.to_string().contains("1KB"), "{err}");

        // The same size is fine as an attachment
        let mut attachment = IngestRequest::new("icon.png", 1025, FileKind::Attachment);
        check(&config(), &mut attachment).unwrap();
    }

    #[test]
    fn test_thumbnail_kind_not_uploadable() {
        let mut req = IngestRequest::new("x-thumb.png", 10, FileKind::Thumbnail);
        assert!(matches!(check(&config(), &mut req), Err(FileError::Validation(_))));
    }

    #[test]
    fn test_guesses_missing_mime_type() {
        let mut png = IngestRequest::new("diagram.png", 10, FileKind::Attachment);
        check(&config(), &mut png).unwrap();
        assert_eq!(png.mime_type, "image/png");

        let mut unknown = IngestRequest::new("blob", 10, FileKind::Attachment).with_mime_type("  ");
        check(&config(), &mut unknown).unwrap();
        assert_eq!(unknown.mime_type, "application/octet-stream");
    }
}
