//! Storage backend abstraction and implementations.
//!
//! This module provides a uniform interface for storing opaque byte blobs
//! across interchangeable physical backends:
//!
//! - **Local**: local filesystem with crash-safe writes, read coalescing,
//!   and content caching
//! - **ObjectStore**: adapter over any `object_store` implementation
//!   (in-memory for tests, S3-compatible/Azure/GCS via the caller's
//!   credentials)
//! - **Dual**: a router over a primary/secondary pair, used while a
//!   migration is in flight

mod backend;
mod config;
mod flight;
mod local;
mod memory;
mod router;

pub use backend::{ByteStream, FileInfo, StorageBackend, OCTET_STREAM};
pub use config::StorageBackendConfig;
pub use flight::FlightGroup;
pub use local::LocalBackend;
pub use memory::ObjectStoreBackend;
pub use router::{DualBackend, MigrationMode};

use crate::cache::CacheConfig;
use crate::Result;
use std::sync::Arc;

/// Create a storage backend from configuration.
///
/// Validation is eager: an unusable media root fails here with a
/// configuration error rather than on first use.
///
/// # Example
///
/// ```rust,ignore
/// use depot_core::storage::{create_backend, StorageBackendConfig};
/// use depot_core::cache::CacheConfig;
///
/// let config = StorageBackendConfig::Memory;
/// let backend = create_backend(&config, &CacheConfig::default())?;
/// ```
pub fn create_backend(
    config: &StorageBackendConfig,
    cache: &CacheConfig,
) -> Result<Arc<dyn StorageBackend>> {
    match config {
        StorageBackendConfig::Local { root } => {
            Ok(Arc::new(LocalBackend::new(root.clone(), cache.build())?))
        }
        StorageBackendConfig::Memory => Ok(Arc::new(ObjectStoreBackend::in_memory())),
    }
}
