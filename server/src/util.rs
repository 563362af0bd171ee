//! Shared utility functions

const KB: u64 = 1024;
const MB: u64 = 1024 * KB;
const GB: u64 = 1024 * MB;

/// Format file size in human-readable units
///
/// # Examples
///
/// ```
/// use vc_files::util::format_file_size;
///
/// assert_eq!(format_file_size(512), "512 bytes");
/// assert_eq!(format_file_size(2048), "2KB");
/// assert_eq!(format_file_size(5 * 1024 * 1024), "5.0MB");
/// ```
pub fn format_file_size(bytes: u64) -> String {
    match bytes {
        b if b < KB => format!("{b} bytes"),
        b if b < MB => format!("{}KB", b / KB),
        b if b < GB => format!("{:.1}MB", b as f64 / MB as f64),
        b => format!("{:.1}GB", b as f64 / GB as f64),
    }
}

/// MIME type for a file name, by extension.
///
/// Falls back to `application/octet-stream`.
pub fn guess_mime_type(name: &str) -> String {
    mime_guess::from_path(name)
        .first_or_octet_stream()
        .essence_str()
        .to_string()
}

/// Reduce a client-supplied file name to a safe display name.
///
/// Keeps only the last path component and strips control characters and
/// characters reserved by common filesystems. Returns an empty string when
/// nothing usable is left.
pub fn sanitize_filename(filename: &str) -> String {
    let name = filename.rsplit(['/', '\\']).next().unwrap_or("");
    let cleaned: String = name
        .chars()
        .filter(|c| !c.is_control() && !matches!(c, '<' | '>' | ':' | '"' | '|' | '?' | '*'))
        .take(255)
        .collect();

    let cleaned = cleaned.trim();
    if cleaned.chars().all(|c| c == '.') {
        return String::new();
    }
    cleaned.to_string()
}
