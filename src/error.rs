//! Error types for the verification store and its snapshot storage

use std::path::Path;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("path not found: {path}")]
    PathNotFound { path: String },

    #[error("IO error: {message}")]
    Io { message: String },

    #[error("malformed snapshot {path}: {message}")]
    Malformed { path: String, message: String },

    #[error("failed to serialize snapshot: {0}")]
    Serialize(#[from] serde_json::Error),
}

impl StorageError {
    /// Convert an `io::Error` into a `StorageError` carrying the path it failed on
    #[must_use]
    pub fn from_io_with_path(err: &std::io::Error, path: &Path) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound => Self::PathNotFound {
                path: path.display().to_string(),
            },
            _ => Self::Io {
                message: format!("{}: {}", path.display(), err),
            },
        }
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("verification store lock poisoned")]
    Poisoned,

    #[error("store worker failed: {0}")]
    Worker(String),
}
