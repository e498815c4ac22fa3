//! Backend adapter over the `object_store` crate.
//!
//! Any provider that can produce an `Arc<dyn ObjectStore>` (S3-compatible,
//! Azure, GCS, in-memory) plugs in through this adapter; credential
//! construction and validation stay with the caller. The in-memory variant
//! is the testing backend.

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use object_store::memory::InMemory;
use object_store::path::Path;
use object_store::{ObjectStore, PutPayload};
use std::sync::Arc;

use super::backend::{ByteStream, FileInfo, StorageBackend};
use crate::error::StorageError;
use crate::Result;

/// Storage backend over an `object_store` implementation.
pub struct ObjectStoreBackend {
    store: Arc<dyn ObjectStore>,
    name: String,
}

impl ObjectStoreBackend {
    pub fn new(store: Arc<dyn ObjectStore>, name: impl Into<String>) -> Self {
        Self {
            store,
            name: name.into(),
        }
    }

    /// In-memory backend. Nothing persists between runs; meant for tests.
    pub fn in_memory() -> Self {
        Self::new(Arc::new(InMemory::new()), "memory")
    }

    fn location(key: &str) -> Path {
        Path::from(key.trim_start_matches('/'))
    }

    fn map_err(&self, op: &str, key: &str, err: object_store::Error) -> StorageError {
        match err {
            object_store::Error::NotFound { .. } => StorageError::NotFound(key.to_string()),
            _ => StorageError::Backend(format!("{} {} {}: {}", self.name, op, key, err)),
        }
    }
}

#[async_trait]
impl StorageBackend for ObjectStoreBackend {
    fn name(&self) -> &str {
        &self.name
    }

    async fn put(&self, path: &str, data: Bytes) -> Result<()> {
        let location = Self::location(path);
        self.store
            .put(&location, PutPayload::from_bytes(data))
            .await
            .map_err(|e| self.map_err("PUT", path, e))?;
        Ok(())
    }

    async fn get(&self, path: &str) -> Result<Bytes> {
        let location = Self::location(path);
        let result = self
            .store
            .get(&location)
            .await
            .map_err(|e| self.map_err("GET", path, e))?;

        let data = result
            .bytes()
            .await
            .map_err(|e| self.map_err("GET", path, e))?;
        Ok(data)
    }

    async fn stream(&self, path: &str) -> Result<ByteStream> {
        let data = self.get(path).await?;
        Ok(Box::new(std::io::Cursor::new(data)))
    }

    async fn delete(&self, path: &str) -> Result<()> {
        let location = Self::location(path);
        match self.store.delete(&location).await {
            Ok(()) => Ok(()),
            // Idempotent: deleting an absent object is fine.
            Err(object_store::Error::NotFound { .. }) => Ok(()),
            Err(e) => Err(self.map_err("DELETE", path, e).into()),
        }
    }

    async fn exists(&self, path: &str) -> Result<bool> {
        let location = Self::location(path);
        match self.store.head(&location).await {
            Ok(_) => Ok(true),
            Err(object_store::Error::NotFound { .. }) => Ok(false),
            Err(e) => Err(self.map_err("HEAD", path, e).into()),
        }
    }

    async fn stat(&self, path: &str) -> Result<FileInfo> {
        let location = Self::location(path);
        let meta = self
            .store
            .head(&location)
            .await
            .map_err(|e| self.map_err("HEAD", path, e))?;

        Ok(FileInfo {
            size: meta.size as u64,
            last_modified: meta.last_modified,
            e_tag: meta.e_tag.clone(),
            content_type: FileInfo::sniff_content_type(path),
        })
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>> {
        let trimmed = prefix.trim_start_matches('/');
        let prefix_path = if trimmed.is_empty() {
            None
        } else {
            Some(Path::from(trimmed))
        };

        let mut keys = Vec::new();
        let mut stream = self.store.list(prefix_path.as_ref());
        while let Some(result) = stream.next().await {
            let meta = result.map_err(|e| self.map_err("LIST", prefix, e))?;
            keys.push(meta.location.to_string());
        }

        keys.sort();
        Ok(keys)
    }

    async fn delete_folder(&self, prefix: &str) -> Result<()> {
        // Flat stores have no directories; enumerate then delete.
        for key in self.list(prefix).await? {
            self.delete(&key).await?;
        }
        Ok(())
    }

    async fn rename(&self, from: &str, to: &str) -> Result<()> {
        let src = Self::location(from);
        let dst = Self::location(to);

        // Copy first; the source survives a failed copy untouched.
        self.store
            .copy(&src, &dst)
            .await
            .map_err(|e| self.map_err("COPY", from, e))?;
        self.store
            .delete(&src)
            .await
            .map_err(|e| self.map_err("DELETE", from, e))?;
        Ok(())
    }
}
