//! Depot Core Library
//!
//! This crate provides a pluggable object-storage abstraction: a uniform
//! contract for storing, retrieving, and relocating opaque byte blobs
//! across interchangeable physical backends, plus a content cache that
//! avoids redundant reads under concurrent access and a resumable
//! backend-to-backend migration engine.

pub mod cache;
pub mod error;
pub mod migration;
pub mod storage;

pub use cache::{CacheConfig, ContentCache, NoopCache, TinyLfuCache};
pub use error::{Error, MigrationError, Result, StorageError};
pub use migration::{
    ErrorCallback, MigrationConfig, MigrationEngine, MigrationOutcome, MigrationReport,
    MigrationState, ProgressCallback,
};
pub use storage::{
    create_backend, ByteStream, DualBackend, FileInfo, FlightGroup, LocalBackend, MigrationMode,
    ObjectStoreBackend, StorageBackend, StorageBackendConfig,
};
