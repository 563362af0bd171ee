//! Kaiku Files
//!
//! Upload ingestion for the chat platform. A single pass over each upload
//! stores it, fingerprints it and derives a preview thumbnail. Reads go
//! through a per-file allow/deny access gate.

pub mod access;
pub mod config;
pub mod db;
pub mod error;
pub mod ingest;
pub mod media;
pub mod observability;
pub mod service;
pub mod storage;
pub mod util;

pub use error::FileError;
pub use service::FileService;
