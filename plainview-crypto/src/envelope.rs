//! Self-describing cipher envelope.
//!
//! A `CipherEnvelope` carries one ciphertext plus everything needed to
//! decrypt it: algorithm tag, optional AAD, optional KDF salt, and nonce.
//! Envelopes are immutable value types; no cryptographic validation happens
//! here — that is asserted at decrypt time by the crypto provider.
//!
//! Envelopes persist in relational rows as flat base64 text columns
//! (`EnvelopeColumns`), and the two representations convert losslessly.

use crate::error::{CryptoError, CryptoResult};
use base64::Engine;
use base64::engine::general_purpose::STANDARD as B64;
use serde::{Deserialize, Serialize};

/// Current envelope format version.
pub const ENVELOPE_VERSION: u32 = 1;

/// Versioned container for one ciphertext and its decryption metadata.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CipherEnvelope {
    pub version: u32,
    /// Algorithm tag, e.g. `"chacha20poly1305"`.
    pub algorithm: String,
    /// AAD bound into the authentication tag at encrypt time, if any.
    pub aad: Option<String>,
    /// KDF salt for password-derived keys; absent for raw-key encryption.
    pub kdf_salt: Option<Vec<u8>>,
    pub nonce: Vec<u8>,
    pub ciphertext: Vec<u8>,
}

impl CipherEnvelope {
    pub fn new(
        algorithm: impl Into<String>,
        aad: Option<String>,
        kdf_salt: Option<Vec<u8>>,
        nonce: Vec<u8>,
        ciphertext: Vec<u8>,
    ) -> Self {
        Self {
            version: ENVELOPE_VERSION,
            algorithm: algorithm.into(),
            aad,
            kdf_salt,
            nonce,
            ciphertext,
        }
    }

    /// Flattens the envelope into base64 text columns for relational storage.
    pub fn to_columns(&self) -> EnvelopeColumns {
        EnvelopeColumns {
            algorithm: self.algorithm.clone(),
            aad: self.aad.clone(),
            kdf_salt: self.kdf_salt.as_deref().map(|s| B64.encode(s)),
            nonce: B64.encode(&self.nonce),
            ciphertext: B64.encode(&self.ciphertext),
        }
    }
}

/// Flat column representation of an envelope as persisted in a row.
///
/// `nonce`, `ciphertext`, and `kdf_salt` are base64 strings; `algorithm`
/// and `aad` are stored verbatim.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvelopeColumns {
    pub algorithm: String,
    pub aad: Option<String>,
    pub kdf_salt: Option<String>,
    pub nonce: String,
    pub ciphertext: String,
}

impl EnvelopeColumns {
    /// Reconstructs the envelope from its column representation.
    pub fn into_envelope(self) -> CryptoResult<CipherEnvelope> {
        let decode = |field: &str, value: &str| {
            B64.decode(value)
                .map_err(|e| CryptoError::InvalidEnvelope(format!("{field}: {e}")))
        };

        let kdf_salt = match &self.kdf_salt {
            Some(s) => Some(decode("kdf_salt", s)?),
            None => None,
        };

        Ok(CipherEnvelope {
            version: ENVELOPE_VERSION,
            algorithm: self.algorithm,
            aad: self.aad,
            kdf_salt,
            nonce: decode("nonce", &self.nonce)?,
            ciphertext: decode("ciphertext", &self.ciphertext)?,
        })
    }
}
