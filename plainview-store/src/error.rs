//! Storage error types.

use thiserror::Error;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur in the local store.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("database error: {0}")]
    Duckdb(#[from] duckdb::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("invalid column value: {0}")]
    InvalidColumn(String),

    #[error("storage error: {0}")]
    Other(String),
}
