//! Image processing: in-process thumbnails and external rasterization.

pub mod convert;
pub mod thumbnail;
