//! Error types for the depot core library.

use thiserror::Error;

/// Result type alias using the library's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the depot library.
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error (permanent, detected eagerly, never retried)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Storage error
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// Migration error
    #[error("Migration error: {0}")]
    Migration(#[from] MigrationError),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl Error {
    /// Whether this error means the object simply does not exist.
    ///
    /// Callers use this to decide retry vs. abort: not-found is final,
    /// everything else under `Storage`/`Io` may be transient.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::Storage(StorageError::NotFound(_)))
    }
}

/// Storage-specific errors.
///
/// Variants carry only string payloads so the type stays `Clone`: a
/// coalesced read hands the identical failure to every waiting caller.
#[derive(Error, Debug, Clone)]
pub enum StorageError {
    /// Object not found
    #[error("Object not found: {0}")]
    NotFound(String),

    /// Permission denied
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// Storage backend error
    #[error("Backend error: {0}")]
    Backend(String),

    /// Invalid path
    #[error("Invalid path: {0}")]
    InvalidPath(String),
}

impl StorageError {
    /// Map an IO error for `path` into the storage taxonomy.
    pub fn from_io(op: &str, path: &str, err: &std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound => StorageError::NotFound(path.to_string()),
            std::io::ErrorKind::PermissionDenied => {
                StorageError::PermissionDenied(format!("{} {}: {}", op, path, err))
            }
            _ => StorageError::Backend(format!("{} {}: {}", op, path, err)),
        }
    }
}

/// Migration-specific errors.
#[derive(Error, Debug)]
pub enum MigrationError {
    /// Another migration run is already active on this engine
    #[error("A migration is already active")]
    AlreadyActive,

    /// Migration requested without a secondary backend configured
    #[error("No migration target configured")]
    NoSecondary,

    /// The run was cancelled before completion
    #[error("Migration cancelled")]
    Cancelled,

    /// Enumerating the source namespace failed; the run never started
    #[error("Failed to list source objects: {0}")]
    Listing(String),
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}
