//! Crypto error types.

use thiserror::Error;

/// Result type for crypto operations.
pub type CryptoResult<T> = Result<T, CryptoError>;

/// Errors that can occur in envelope and provider operations.
#[derive(Debug, Error)]
pub enum CryptoError {
    /// Authentication tag verification failed: wrong secret, tampered
    /// ciphertext, or mismatched AAD. This is the only signal used to
    /// verify a password or credential ("try-decrypt-to-verify").
    #[error("decryption failed (wrong secret, tampered data, or AAD mismatch)")]
    DecryptionFailed,

    #[error("credential unavailable: {0}")]
    CredentialUnavailable(String),

    #[error("user cancelled the authenticator ceremony")]
    UserCancelled,

    #[error("key derivation failed: {0}")]
    KeyDerivation(String),

    #[error("encryption failed: {0}")]
    Encryption(String),

    #[error("invalid envelope: {0}")]
    InvalidEnvelope(String),

    #[error("invalid key length: expected {expected}, got {actual}")]
    InvalidKeyLength { expected: usize, actual: usize },
}
