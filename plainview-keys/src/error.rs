//! Key lifecycle error types.

use plainview_crypto::CryptoError;
use plainview_store::StorageError;
use thiserror::Error;

/// Result type for key operations.
pub type KeyResult<T> = Result<T, KeyError>;

/// Errors that can occur resolving or rewrapping a DEK.
///
/// `WrongSecret`, `Crypto(CredentialUnavailable)`, and
/// `Crypto(UserCancelled)` all mean "list stays locked" — callers must not
/// treat them as fatal.
#[derive(Debug, Error)]
pub enum KeyError {
    #[error("wrong secret for wrapped key")]
    WrongSecret,

    #[error("no DEK unlocked for this session")]
    Locked,

    #[error("no wrapped key found for user {user_id} ({provider})")]
    NotFound { user_id: String, provider: String },

    #[error("crypto error: {0}")]
    Crypto(#[from] CryptoError),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
}
