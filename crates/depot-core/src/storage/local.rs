//! Local filesystem storage backend.
//!
//! Writes are crash-safe: data lands in a sibling temp file that is
//! fsynced and atomically renamed over the target, so a concurrent reader
//! observes either the previous complete object or the new one, never a
//! partial write. Reads go through the content cache and a per-path
//! single-flight group, so N concurrent reads of the same cold path cost
//! one disk read.

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::debug;
use uuid::Uuid;

use super::backend::{ByteStream, FileInfo, StorageBackend};
use super::flight::FlightGroup;
use crate::cache::ContentCache;
use crate::error::StorageError;
use crate::{Error, Result};

/// Filesystem-based storage backend rooted at a media directory.
pub struct LocalBackend {
    root: PathBuf,
    cache: Arc<dyn ContentCache>,
    flights: FlightGroup<std::result::Result<Bytes, StorageError>>,
}

impl LocalBackend {
    /// Create a local backend. The media root is created if missing;
    /// failure to do so is a permanent configuration error.
    pub fn new(root: PathBuf, cache: Arc<dyn ContentCache>) -> Result<Self> {
        std::fs::create_dir_all(&root).map_err(|e| {
            Error::Config(format!("media root {}: {}", root.display(), e))
        })?;

        Ok(Self {
            root,
            cache,
            flights: FlightGroup::new(),
        })
    }

    /// Resolve a storage key to a physical path under the media root.
    ///
    /// Leading slashes are stripped and `..` segments rejected so a key can
    /// never escape the root.
    fn resolve(&self, key: &str) -> Result<PathBuf> {
        let normalized = key.trim_start_matches('/');
        if normalized.is_empty()
            || normalized.split('/').any(|seg| seg == "..")
        {
            return Err(StorageError::InvalidPath(key.to_string()).into());
        }
        Ok(self.root.join(normalized))
    }

    /// Convert a physical path back to a storage key.
    fn path_to_key(&self, path: &Path) -> Option<String> {
        path.strip_prefix(&self.root)
            .ok()
            .map(|p| p.to_string_lossy().to_string())
    }

    async fn read_file(
        path: PathBuf,
        key: String,
    ) -> std::result::Result<Bytes, StorageError> {
        let mut file = fs::File::open(&path)
            .await
            .map_err(|e| StorageError::from_io("open", &key, &e))?;

        let mut data = Vec::new();
        file.read_to_end(&mut data)
            .await
            .map_err(|e| StorageError::from_io("read", &key, &e))?;

        Ok(Bytes::from(data))
    }

    /// Write `data` to a sibling temp file, fsync, and rename over `path`.
    /// On any failure the temp file is removed and the target untouched.
    async fn write_atomic(&self, key: &str, path: &Path, data: &Bytes) -> Result<()> {
        let parent = path
            .parent()
            .ok_or_else(|| StorageError::InvalidPath(key.to_string()))?;
        let file_name = path
            .file_name()
            .ok_or_else(|| StorageError::InvalidPath(key.to_string()))?;

        fs::create_dir_all(parent)
            .await
            .map_err(|e| StorageError::from_io("create directories for", key, &e))?;

        // Same directory as the target, so the rename stays on one filesystem.
        let tmp = parent.join(format!(
            ".{}.tmp-{}",
            file_name.to_string_lossy(),
            Uuid::new_v4().simple()
        ));

        let result = Self::write_and_sync(&tmp, data).await;
        if let Err(e) = result {
            let _ = fs::remove_file(&tmp).await;
            return Err(StorageError::from_io("write", key, &e).into());
        }

        if let Err(e) = fs::rename(&tmp, path).await {
            let _ = fs::remove_file(&tmp).await;
            return Err(StorageError::from_io("rename temp file for", key, &e).into());
        }

        Ok(())
    }

    async fn write_and_sync(tmp: &Path, data: &Bytes) -> std::io::Result<()> {
        let mut file = fs::File::create(tmp).await?;
        file.write_all(data).await?;
        file.sync_all().await?;
        Ok(())
    }
}

#[async_trait]
impl StorageBackend for LocalBackend {
    fn name(&self) -> &str {
        "local"
    }

    async fn put(&self, path: &str, data: Bytes) -> Result<()> {
        let physical = self.resolve(path)?;
        self.write_atomic(path, &physical, &data).await
    }

    async fn get(&self, path: &str) -> Result<Bytes> {
        let physical = self.resolve(path)?;
        let cache_key = physical.to_string_lossy().to_string();

        if let Some(data) = self.cache.get(&cache_key).await {
            return Ok(data);
        }

        let key = path.to_string();
        let (result, leader) = self
            .flights
            .run(&cache_key, || {
                let physical = physical.clone();
                let key = key.clone();
                async move { Self::read_file(physical, key).await }
            })
            .await;

        if leader {
            if let Ok(data) = &result {
                self.cache.add(&cache_key, data.clone()).await;
            }
        }

        result.map_err(Error::from)
    }

    async fn stream(&self, path: &str) -> Result<ByteStream> {
        let physical = self.resolve(path)?;
        let file = fs::File::open(&physical)
            .await
            .map_err(|e| StorageError::from_io("open", path, &e))?;
        Ok(Box::new(file))
    }

    async fn delete(&self, path: &str) -> Result<()> {
        let physical = self.resolve(path)?;

        match fs::remove_file(&physical).await {
            Ok(()) => Ok(()),
            // Idempotent: deleting an absent object is fine.
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StorageError::from_io("delete", path, &e).into()),
        }
    }

    async fn exists(&self, path: &str) -> Result<bool> {
        let physical = self.resolve(path)?;

        match fs::metadata(&physical).await {
            Ok(_) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            // Cannot distinguish absent from broken; surface the error.
            Err(e) => Err(StorageError::from_io("stat", path, &e).into()),
        }
    }

    async fn stat(&self, path: &str) -> Result<FileInfo> {
        let physical = self.resolve(path)?;

        let metadata = fs::metadata(&physical)
            .await
            .map_err(|e| StorageError::from_io("stat", path, &e))?;

        let last_modified = metadata
            .modified()
            .map(DateTime::<Utc>::from)
            .unwrap_or_else(|_| Utc::now());

        Ok(FileInfo {
            size: metadata.len(),
            last_modified,
            e_tag: None,
            content_type: FileInfo::sniff_content_type(path),
        })
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>> {
        // An empty prefix enumerates the whole namespace.
        let base = if prefix.trim_start_matches('/').is_empty() {
            self.root.clone()
        } else {
            self.resolve(prefix)?
        };
        let mut results = Vec::new();

        if !base.exists() {
            return Ok(results);
        }

        let mut stack = vec![base];
        while let Some(dir) = stack.pop() {
            if dir.is_file() {
                if let Some(key) = self.path_to_key(&dir) {
                    results.push(key);
                }
                continue;
            }

            let mut entries = fs::read_dir(&dir)
                .await
                .map_err(|e| StorageError::from_io("read directory", prefix, &e))?;

            while let Some(entry) = entries.next_entry().await.map_err(|e| {
                StorageError::Backend(format!("read directory entry under {}: {}", prefix, e))
            })? {
                let path = entry.path();
                if path.is_dir() {
                    stack.push(path);
                } else if let Some(key) = self.path_to_key(&path) {
                    results.push(key);
                }
            }
        }

        results.sort();
        Ok(results)
    }

    async fn delete_folder(&self, prefix: &str) -> Result<()> {
        let physical = self.resolve(prefix)?;

        match fs::remove_dir_all(&physical).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StorageError::from_io("delete folder", prefix, &e).into()),
        }
    }

    async fn rename(&self, from: &str, to: &str) -> Result<()> {
        let src = self.resolve(from)?;
        let dst = self.resolve(to)?;

        if let Some(parent) = dst.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| StorageError::from_io("create directories for", to, &e))?;
        }

        match fs::rename(&src, &dst).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::CrossesDevices => {
                debug!(from, to, "rename crosses devices, copying instead");

                // Copy first; the source is only removed once the copy is
                // complete, so a fallback failure leaves it untouched.
                fs::copy(&src, &dst)
                    .await
                    .map_err(|e| StorageError::from_io("copy", from, &e))?;
                fs::remove_file(&src)
                    .await
                    .map_err(|e| StorageError::from_io("remove after copy", from, &e))?;
                Ok(())
            }
            Err(e) => Err(StorageError::from_io("rename", from, &e).into()),
        }
    }
}
