//! Storage backend trait definition.

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use tokio::io::AsyncRead;

use crate::Result;

/// The generic binary content type returned when sniffing fails.
pub const OCTET_STREAM: &str = "application/octet-stream";

/// Metadata about a stored object.
#[derive(Debug, Clone)]
pub struct FileInfo {
    /// Size in bytes
    pub size: u64,
    /// Last modified timestamp
    pub last_modified: DateTime<Utc>,
    /// ETag or content hash, when the backend has one (local disk does not)
    pub e_tag: Option<String>,
    /// Content type, best-effort sniffed from the extension
    pub content_type: String,
}

impl FileInfo {
    /// Sniff a content type from the path's extension, falling back to the
    /// generic binary type.
    pub fn sniff_content_type(path: &str) -> String {
        mime_guess::from_path(path)
            .first_raw()
            .unwrap_or(OCTET_STREAM)
            .to_string()
    }
}

/// An open, caller-owned readable handle onto an object.
///
/// The caller is responsible for dropping it on every exit path.
pub type ByteStream = Box<dyn AsyncRead + Send + Unpin>;

/// Trait for storage backends.
///
/// Paths are logical slash-separated keys. No implementation carries
/// cross-backend knowledge; composition (the dual-backend router) supplies
/// that.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Backend identity, used in logs.
    fn name(&self) -> &str;

    /// Write an object. All-or-nothing: a concurrent reader never observes
    /// a partially written object.
    async fn put(&self, path: &str, data: Bytes) -> Result<()>;

    /// Read a full object.
    async fn get(&self, path: &str) -> Result<Bytes>;

    /// Open a raw readable handle. Bypasses any cache.
    async fn stream(&self, path: &str) -> Result<ByteStream>;

    /// Delete an object. Absence is not an error.
    async fn delete(&self, path: &str) -> Result<()>;

    /// Check whether an object exists. Implementations must surface errors
    /// rather than fabricate `false`.
    async fn exists(&self, path: &str) -> Result<bool>;

    /// Get object metadata.
    async fn stat(&self, path: &str) -> Result<FileInfo>;

    /// List object keys under a prefix.
    async fn list(&self, prefix: &str) -> Result<Vec<String>>;

    /// Remove every object whose key starts with the prefix.
    async fn delete_folder(&self, prefix: &str) -> Result<()>;

    /// Move an object. On success the old path no longer resolves; on
    /// failure the old path is untouched.
    async fn rename(&self, from: &str, to: &str) -> Result<()>;
}
