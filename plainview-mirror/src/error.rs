//! Mirror engine error types.

use plainview_crypto::CryptoError;
use plainview_keys::KeyError;
use plainview_store::StorageError;
use thiserror::Error;

/// Result type for mirror operations.
pub type MirrorResult<T> = Result<T, MirrorError>;

/// Errors that can occur in encrypted writes and mirror projection.
#[derive(Debug, Error)]
pub enum MirrorError {
    /// No DEK is unlocked for the session. Writes fail; the synchronizer
    /// degrades affected rows to stale instead of surfacing this.
    #[error("session is locked, no DEK available")]
    Locked,

    #[error("row not found: {0}")]
    NotFound(String),

    #[error("no pair registered for table {0}")]
    UnknownPair(String),

    #[error("projection error: {0}")]
    Projection(String),

    #[error("invalid pair configuration: {0}")]
    Config(String),

    #[error("crypto error: {0}")]
    Crypto(#[from] CryptoError),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<KeyError> for MirrorError {
    fn from(e: KeyError) -> Self {
        match e {
            KeyError::Locked => Self::Locked,
            KeyError::Crypto(c) => Self::Crypto(c),
            KeyError::Storage(s) => Self::Storage(s),
            other => Self::Projection(other.to_string()),
        }
    }
}
