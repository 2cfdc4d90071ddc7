//! Encryption layer for Plainview.
//!
//! Provides the cipher envelope format, key wrapping, and crypto providers:
//! - ChaCha20-Poly1305 for authenticated encryption with AAD
//! - Argon2id (reference) or PBKDF2-SHA256 (fast path) for password keys
//! - PRF/hmac-secret derivation for authenticator-backed keys
//! - Secure key handling with zeroization
//!
//! # Architecture
//!
//! A two-tier key system:
//!
//! 1. **Wrapping secret**: derived from the user's password or from a
//!    platform authenticator credential. Never stored — re-derived each
//!    time through a [`CryptoProvider`].
//!
//! 2. **DEK**: 32 random bytes encrypting all domain content. Persisted
//!    only wrapped inside a [`CipherEnvelope`]; unwrapped copies live in
//!    memory for the session and are zeroed on drop.
//!
//! Decryption doubles as verification: a wrong password or credential
//! fails the authentication tag, and that failure is the only signal.

pub mod cipher;
pub mod envelope;
mod error;
pub mod kdf;
pub mod provider;

pub use cipher::{ALGORITHM, Dek, KEY_SIZE, NONCE_SIZE, open, seal};
pub use envelope::{CipherEnvelope, ENVELOPE_VERSION, EnvelopeColumns};
pub use error::{CryptoError, CryptoResult};
pub use kdf::{DerivedKey, KdfAlgorithm, SALT_SIZE, Salt, derive_key};
pub use provider::{
    AuthenticatorProvider, CryptoProvider, HmacPrfCredential, PasswordProvider, PrfCredential,
    ProviderKind,
};
