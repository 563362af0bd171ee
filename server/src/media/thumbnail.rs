//! Thumbnail generation for uploaded files.
//!
//! Decodes a raster image, applies its orientation, fits it into a bounding
//! box and re-encodes it as PNG.

use std::io::Cursor;

use image::imageops::FilterType;
use image::{DynamicImage, GenericImageView, ImageDecoder, ImageFormat, ImageReader, Limits};
use thiserror::Error;

/// Maximum file size we'll attempt to process (20 MB).
pub const MAX_PROCESSABLE_SIZE: usize = 20 * 1024 * 1024;

/// Maximum image dimension (width or height) to prevent decompression bombs.
/// A 16384x16384 RGBA image is ~1 GB in memory, acceptable for processing.
const MAX_IMAGE_DIMENSION: u32 = 16384;

/// Bytes needed to recognise every supported format's signature.
pub const SNIFF_LEN: usize = 16;

/// Output MIME type of every thumbnail.
pub const THUMBNAIL_MIME: &str = "image/png";

/// Formats decoded in process. Anything else gets no thumbnail.
const SUPPORTED_FORMATS: &[ImageFormat] = &[
    ImageFormat::Png,
    ImageFormat::Jpeg,
    ImageFormat::Gif,
    ImageFormat::WebP,
];

#[derive(Error, Debug)]
pub enum ThumbnailError {
    #[error("File too large for processing: {0} bytes")]
    TooLarge(usize),
    #[error("Unsupported image format")]
    UnsupportedFormat,
    #[error("Image decode failed: {0}")]
    DecodeFailed(String),
    #[error("Image encoding failed: {0}")]
    EncodeFailed(String),
}

/// Box a thumbnail must fit in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThumbnailBounds {
    pub max_width: u32,
    pub max_height: u32,
}

impl Default for ThumbnailBounds {
    fn default() -> Self {
        Self {
            max_width: 360,
            max_height: 480,
        }
    }
}

/// An encoded thumbnail ready for upload.
pub struct EncodedThumbnail {
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub content_type: &'static str,
}

/// Whether `prefix` starts like an image we can decode.
///
/// `prefix` should hold at least [`SNIFF_LEN`] bytes unless the whole
/// payload is shorter.
pub fn is_supported_image(prefix: &[u8]) -> bool {
    image::guess_format(prefix).is_ok_and(|f| SUPPORTED_FORMATS.contains(&f))
}

/// Generate a thumbnail fitting `bounds`.
///
/// Animated images (GIF, animated WebP) are reduced to their first frame.
///
/// This function is CPU-bound and should be called inside `spawn_blocking`.
pub fn generate_thumbnail(
    data: &[u8],
    bounds: ThumbnailBounds,
) -> Result<EncodedThumbnail, ThumbnailError> {
    if data.len() > MAX_PROCESSABLE_SIZE {
        return Err(ThumbnailError::TooLarge(data.len()));
    }

    let mut reader = ImageReader::new(Cursor::new(data))
        .with_guessed_format()
        .map_err(|e| ThumbnailError::DecodeFailed(e.to_string()))?;

    match reader.format() {
        Some(format) if SUPPORTED_FORMATS.contains(&format) => {}
        _ => return Err(ThumbnailError::UnsupportedFormat),
    }

    // Use reader API to enforce dimension limits (prevents decompression bombs:
    // a small compressed file can expand to enormous RGBA buffers)
    let mut limits = Limits::default();
    limits.max_image_width = Some(MAX_IMAGE_DIMENSION);
    limits.max_image_height = Some(MAX_IMAGE_DIMENSION);
    reader.limits(limits);

    let mut decoder = reader
        .into_decoder()
        .map_err(|e| ThumbnailError::DecodeFailed(e.to_string()))?;
    let orientation = decoder
        .orientation()
        .map_err(|e| ThumbnailError::DecodeFailed(e.to_string()))?;
    let mut img = DynamicImage::from_decoder(decoder)
        .map_err(|e| ThumbnailError::DecodeFailed(e.to_string()))?;
    img.apply_orientation(orientation);

    let fitted = fit_within(img, bounds);
    let (width, height) = fitted.dimensions();

    let mut buf = Cursor::new(Vec::new());
    fitted
        .write_to(&mut buf, ImageFormat::Png)
        .map_err(|e| ThumbnailError::EncodeFailed(e.to_string()))?;

    Ok(EncodedThumbnail {
        data: buf.into_inner(),
        width,
        height,
        content_type: THUMBNAIL_MIME,
    })
}

/// Scale `img` down to fit `bounds`, keeping its aspect ratio. Images that
/// already fit are returned unchanged.
fn fit_within(img: DynamicImage, bounds: ThumbnailBounds) -> DynamicImage {
    let (w, h) = img.dimensions();
    if w <= bounds.max_width && h <= bounds.max_height {
        return img;
    }
    img.resize(bounds.max_width, bounds.max_height, FilterType::Triangle)
}
