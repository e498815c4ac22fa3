//! Storage configuration types.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Storage backend configuration using a tagged enum.
///
/// Remote providers are wired in by the caller: anything that yields an
/// `object_store::ObjectStore` goes through
/// [`ObjectStoreBackend`](super::ObjectStoreBackend), keeping credential
/// handling outside this crate.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "backend")]
pub enum StorageBackendConfig {
    /// Local filesystem storage rooted at a media directory
    #[serde(rename = "local")]
    Local {
        /// Media root directory
        root: PathBuf,
    },

    /// In-memory storage (for testing)
    #[serde(rename = "memory")]
    Memory,
}

impl StorageBackendConfig {
    /// Parse configuration from a URL string.
    ///
    /// Supported URL formats:
    /// - `file:///path/to/media`
    /// - `memory://`
    pub fn from_url(url: &str) -> crate::Result<Self> {
        let parsed = url::Url::parse(url)
            .map_err(|e| crate::Error::Config(format!("Invalid storage URL: {}", e)))?;

        match parsed.scheme() {
            "file" => {
                let root = PathBuf::from(parsed.path());
                if root.as_os_str().is_empty() {
                    return Err(crate::Error::Config(
                        "file:// URL requires a path".to_string(),
                    ));
                }
                Ok(StorageBackendConfig::Local { root })
            }
            "memory" => Ok(StorageBackendConfig::Memory),
            scheme => Err(crate::Error::Config(format!(
                "Unsupported storage scheme: {}",
                scheme
            ))),
        }
    }
}
