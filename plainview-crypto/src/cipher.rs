//! ChaCha20-Poly1305 AEAD primitives and the DEK type.

use crate::envelope::CipherEnvelope;
use crate::error::{CryptoError, CryptoResult};
use chacha20poly1305::aead::{Aead, KeyInit, Payload};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};
use rand::RngCore;
use rand::rngs::OsRng;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Algorithm tag written into envelopes produced by this module.
pub const ALGORITHM: &str = "chacha20poly1305";

/// Key size in bytes (256-bit).
pub const KEY_SIZE: usize = 32;

/// ChaCha20-Poly1305 nonce size in bytes.
pub const NONCE_SIZE: usize = 12;

/// A data encryption key. Lives in memory only; zeroed on drop.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct Dek([u8; KEY_SIZE]);

impl Dek {
    /// Generates a fresh random DEK.
    pub fn generate() -> Self {
        let mut bytes = [0u8; KEY_SIZE];
        OsRng.fill_bytes(&mut bytes);
        Self(bytes)
    }

    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self(bytes)
    }

    /// Builds a DEK from a slice, rejecting anything but exactly 32 bytes.
    pub fn from_slice(bytes: &[u8]) -> CryptoResult<Self> {
        if bytes.len() != KEY_SIZE {
            return Err(CryptoError::InvalidKeyLength {
                expected: KEY_SIZE,
                actual: bytes.len(),
            });
        }
        let mut buf = [0u8; KEY_SIZE];
        buf.copy_from_slice(bytes);
        Ok(Self(buf))
    }

    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.0
    }
}

impl std::fmt::Debug for Dek {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Never print key material
        f.write_str("Dek(..)")
    }
}

/// Encrypts `plaintext` under a raw 32-byte key with an optional AAD,
/// generating a fresh random nonce. Returns an envelope with no KDF salt.
pub fn seal(key: &[u8; KEY_SIZE], plaintext: &[u8], aad: Option<&str>) -> CryptoResult<CipherEnvelope> {
    let cipher = ChaCha20Poly1305::new(Key::from_slice(key));

    let mut nonce_bytes = [0u8; NONCE_SIZE];
    OsRng.fill_bytes(&mut nonce_bytes);
    let nonce = Nonce::from_slice(&nonce_bytes);

    let payload = Payload {
        msg: plaintext,
        aad: aad.map(str::as_bytes).unwrap_or_default(),
    };
    let ciphertext = cipher
        .encrypt(nonce, payload)
        .map_err(|e| CryptoError::Encryption(format!("seal failed: {e}")))?;

    Ok(CipherEnvelope::new(
        ALGORITHM,
        aad.map(str::to_string),
        None,
        nonce_bytes.to_vec(),
        ciphertext,
    ))
}

/// Decrypts an envelope under a raw 32-byte key, verifying the AAD.
///
/// The AAD the caller expects must match what was bound at encrypt time;
/// any mismatch (or wrong key, or tampering) fails as `DecryptionFailed`.
pub fn open(key: &[u8; KEY_SIZE], envelope: &CipherEnvelope, aad: Option<&str>) -> CryptoResult<Vec<u8>> {
    if envelope.algorithm != ALGORITHM {
        return Err(CryptoError::InvalidEnvelope(format!(
            "unsupported algorithm: {}",
            envelope.algorithm
        )));
    }
    if envelope.nonce.len() != NONCE_SIZE {
        return Err(CryptoError::InvalidEnvelope(format!(
            "nonce must be {NONCE_SIZE} bytes, got {}",
            envelope.nonce.len()
        )));
    }

    let cipher = ChaCha20Poly1305::new(Key::from_slice(key));
    let nonce = Nonce::from_slice(&envelope.nonce);

    let payload = Payload {
        msg: envelope.ciphertext.as_ref(),
        aad: aad.map(str::as_bytes).unwrap_or_default(),
    };

    cipher
        .decrypt(nonce, payload)
        .map_err(|_| CryptoError::DecryptionFailed)
}
