//! Crypto providers: the polymorphic encrypt/decrypt capability.
//!
//! A provider wraps a secret derived from a password or from a
//! platform-authenticator credential and exposes the same envelope
//! contract either way. Consumers hold `Arc<dyn CryptoProvider>` and never
//! learn which variant they are talking to.

use crate::cipher::{self, KEY_SIZE};
use crate::envelope::CipherEnvelope;
use crate::error::{CryptoError, CryptoResult};
use crate::kdf::{self, KdfAlgorithm, Salt};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::sync::{Arc, Mutex};
use zeroize::Zeroizing;

/// Which kind of secret backs a provider. Persisted in wrapped-key rows.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Password,
    Authenticator,
}

impl ProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Password => "password",
            Self::Authenticator => "authenticator",
        }
    }

    pub fn parse(s: &str) -> CryptoResult<Self> {
        match s {
            "password" => Ok(Self::Password),
            "authenticator" => Ok(Self::Authenticator),
            other => Err(CryptoError::InvalidEnvelope(format!(
                "unknown provider kind: {other}"
            ))),
        }
    }
}

/// Encrypt/decrypt capability over a wrapped secret.
///
/// `decrypt` fails with [`CryptoError::DecryptionFailed`] on tag
/// verification failure — that failure is the sole mechanism for
/// password/credential verification.
pub trait CryptoProvider: Send + Sync {
    fn kind(&self) -> ProviderKind;

    fn encrypt(&self, plaintext: &[u8], aad: Option<&str>) -> CryptoResult<CipherEnvelope>;

    fn decrypt(&self, envelope: &CipherEnvelope, aad: Option<&str>) -> CryptoResult<Vec<u8>>;
}

// ============================================================================
// Password provider
// ============================================================================

/// Provider backed by a password and a slow KDF.
///
/// A fresh random salt is generated for every encryption and stored in the
/// envelope's `kdf_salt`. Decryption re-derives the key from the salt found
/// in the envelope being decrypted — never from a cached key — so the same
/// password re-derives independently per envelope.
pub struct PasswordProvider {
    password: Zeroizing<String>,
    algorithm: KdfAlgorithm,
}

impl PasswordProvider {
    pub fn new(password: impl Into<String>, algorithm: KdfAlgorithm) -> Self {
        Self {
            password: Zeroizing::new(password.into()),
            algorithm,
        }
    }
}

impl CryptoProvider for PasswordProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Password
    }

    fn encrypt(&self, plaintext: &[u8], aad: Option<&str>) -> CryptoResult<CipherEnvelope> {
        let salt = Salt::random();
        let key = kdf::derive_key(&self.password, &salt, &self.algorithm)?;
        let mut envelope = cipher::seal(key.as_bytes(), plaintext, aad)?;
        envelope.kdf_salt = Some(salt.as_bytes().to_vec());
        Ok(envelope)
    }

    fn decrypt(&self, envelope: &CipherEnvelope, aad: Option<&str>) -> CryptoResult<Vec<u8>> {
        let salt_bytes = envelope
            .kdf_salt
            .as_deref()
            .ok_or_else(|| CryptoError::InvalidEnvelope("missing kdf_salt".to_string()))?;
        let salt = Salt::from_slice(salt_bytes)?;
        let key = kdf::derive_key(&self.password, &salt, &self.algorithm)?;
        cipher::open(key.as_bytes(), envelope, aad)
    }
}

// ============================================================================
// Authenticator provider
// ============================================================================

/// Platform secret-derivation capability (PRF / hmac-secret semantics).
///
/// For a fixed credential and a fixed salt the same 32-byte secret comes
/// back deterministically. Every call may run a user-presence ceremony;
/// implementations surface `CredentialUnavailable` when the platform lacks
/// the extension and `UserCancelled` when the ceremony is aborted.
pub trait PrfCredential: Send + Sync {
    fn credential_id(&self) -> &str;

    fn derive_secret(&self, salt: &[u8]) -> CryptoResult<[u8; KEY_SIZE]>;
}

/// Provider backed by an authenticator credential.
///
/// The per-provider context salt pins the derived secret to one purpose;
/// with `cache_secret` the ceremony runs once per session and the secret is
/// held in memory until [`AuthenticatorProvider::clear_cached_secret`].
pub struct AuthenticatorProvider {
    credential: Arc<dyn PrfCredential>,
    context_salt: Vec<u8>,
    cache_secret: bool,
    cached: Mutex<Option<Zeroizing<[u8; KEY_SIZE]>>>,
}

impl AuthenticatorProvider {
    pub fn new(credential: Arc<dyn PrfCredential>, context_salt: Vec<u8>, cache_secret: bool) -> Self {
        Self {
            credential,
            context_salt,
            cache_secret,
            cached: Mutex::new(None),
        }
    }

    /// Drops the session-cached secret; the next call runs a fresh ceremony.
    pub fn clear_cached_secret(&self) {
        *self.cached.lock().unwrap() = None;
    }

    fn secret(&self) -> CryptoResult<Zeroizing<[u8; KEY_SIZE]>> {
        if self.cache_secret {
            if let Some(cached) = self.cached.lock().unwrap().as_ref() {
                return Ok(cached.clone());
            }
        }
        let secret = Zeroizing::new(self.credential.derive_secret(&self.context_salt)?);
        if self.cache_secret {
            *self.cached.lock().unwrap() = Some(secret.clone());
        }
        Ok(secret)
    }
}

impl CryptoProvider for AuthenticatorProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Authenticator
    }

    fn encrypt(&self, plaintext: &[u8], aad: Option<&str>) -> CryptoResult<CipherEnvelope> {
        let secret = self.secret()?;
        cipher::seal(&secret, plaintext, aad)
    }

    fn decrypt(&self, envelope: &CipherEnvelope, aad: Option<&str>) -> CryptoResult<Vec<u8>> {
        let secret = self.secret()?;
        cipher::open(&secret, envelope, aad)
    }
}

/// Software PRF credential: HMAC-SHA256 over a device-held seed.
///
/// Reference implementation of [`PrfCredential`] for platforms without a
/// hardware authenticator and for tests. Matches hmac-secret semantics:
/// deterministic per `(seed, salt)`.
pub struct HmacPrfCredential {
    id: String,
    seed: Zeroizing<[u8; KEY_SIZE]>,
}

impl HmacPrfCredential {
    pub fn new(id: impl Into<String>, seed: [u8; KEY_SIZE]) -> Self {
        Self {
            id: id.into(),
            seed: Zeroizing::new(seed),
        }
    }
}

impl PrfCredential for HmacPrfCredential {
    fn credential_id(&self) -> &str {
        &self.id
    }

    fn derive_secret(&self, salt: &[u8]) -> CryptoResult<[u8; KEY_SIZE]> {
        let mut mac = Hmac::<Sha256>::new_from_slice(self.seed.as_ref())
            .map_err(|e| CryptoError::KeyDerivation(format!("hmac init: {e}")))?;
        mac.update(salt);
        let digest = mac.finalize().into_bytes();
        let mut out = [0u8; KEY_SIZE];
        out.copy_from_slice(&digest);
        Ok(out)
    }
}
