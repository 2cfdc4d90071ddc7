//! Password key derivation.
//!
//! Two interchangeable KDFs, selected by configuration: Argon2id as the
//! portable reference, PBKDF2-SHA256 as the fast path where a platform
//! provides a native implementation of it.

use crate::cipher::KEY_SIZE;
use crate::error::{CryptoError, CryptoResult};
use rand::RngCore;
use rand::rngs::OsRng;
use sha2::Sha256;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// KDF salt size in bytes.
pub const SALT_SIZE: usize = 16;

/// A random KDF salt. Generated fresh per encryption; stored in the envelope.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Salt([u8; SALT_SIZE]);

impl Salt {
    pub fn random() -> Self {
        let mut bytes = [0u8; SALT_SIZE];
        OsRng.fill_bytes(&mut bytes);
        Self(bytes)
    }

    pub fn from_bytes(bytes: [u8; SALT_SIZE]) -> Self {
        Self(bytes)
    }

    pub fn from_slice(bytes: &[u8]) -> CryptoResult<Self> {
        if bytes.len() != SALT_SIZE {
            return Err(CryptoError::KeyDerivation(format!(
                "salt must be {SALT_SIZE} bytes, got {}",
                bytes.len()
            )));
        }
        let mut buf = [0u8; SALT_SIZE];
        buf.copy_from_slice(bytes);
        Ok(Self(buf))
    }

    pub fn as_bytes(&self) -> &[u8; SALT_SIZE] {
        &self.0
    }
}

/// Key derivation algorithm selection.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum KdfAlgorithm {
    /// Portable reference KDF.
    Argon2id {
        memory_kib: u32,
        iterations: u32,
        parallelism: u32,
    },
    /// Fast-path KDF for platforms with a native PBKDF2.
    Pbkdf2Sha256 { iterations: u32 },
}

impl Default for KdfAlgorithm {
    fn default() -> Self {
        // OWASP-recommended Argon2id parameters (19 MiB, 2 passes)
        Self::Argon2id {
            memory_kib: 19 * 1024,
            iterations: 2,
            parallelism: 1,
        }
    }
}

impl KdfAlgorithm {
    /// Cheap parameters for tests. Not for production use.
    pub fn fast_insecure() -> Self {
        Self::Pbkdf2Sha256 { iterations: 10 }
    }
}

/// A key derived from a password. Zeroed on drop.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct DerivedKey([u8; KEY_SIZE]);

impl DerivedKey {
    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.0
    }
}

/// Derives a 256-bit key from `(password, salt)` with the configured KDF.
pub fn derive_key(password: &str, salt: &Salt, algorithm: &KdfAlgorithm) -> CryptoResult<DerivedKey> {
    let mut out = [0u8; KEY_SIZE];
    match algorithm {
        KdfAlgorithm::Argon2id {
            memory_kib,
            iterations,
            parallelism,
        } => {
            let params =
                argon2::Params::new(*memory_kib, *iterations, *parallelism, Some(KEY_SIZE))
                    .map_err(|e| CryptoError::KeyDerivation(format!("argon2 params: {e}")))?;
            let argon2 = argon2::Argon2::new(
                argon2::Algorithm::Argon2id,
                argon2::Version::V0x13,
                params,
            );
            argon2
                .hash_password_into(password.as_bytes(), salt.as_bytes(), &mut out)
                .map_err(|e| CryptoError::KeyDerivation(format!("argon2: {e}")))?;
        }
        KdfAlgorithm::Pbkdf2Sha256 { iterations } => {
            pbkdf2::pbkdf2_hmac::<Sha256>(
                password.as_bytes(),
                salt.as_bytes(),
                *iterations,
                &mut out,
            );
        }
    }
    Ok(DerivedKey(out))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_inputs_same_key() {
        let salt = Salt::from_bytes([1u8; SALT_SIZE]);
        let algo = KdfAlgorithm::fast_insecure();
        let a = derive_key("hunter2", &salt, &algo).unwrap();
        let b = derive_key("hunter2", &salt, &algo).unwrap();
        assert_eq!(a.as_bytes(), b.as_bytes());
    }

    #[test]
    fn different_salt_different_key() {
        let algo = KdfAlgorithm::fast_insecure();
        let a = derive_key("hunter2", &Salt::from_bytes([1u8; SALT_SIZE]), &algo).unwrap();
        let b = derive_key("hunter2", &Salt::from_bytes([2u8; SALT_SIZE]), &algo).unwrap();
        assert_ne!(a.as_bytes(), b.as_bytes());
    }

    #[test]
    fn argon2_and_pbkdf2_disagree() {
        let salt = Salt::from_bytes([1u8; SALT_SIZE]);
        let a = derive_key(
            "hunter2",
            &salt,
            &KdfAlgorithm::Argon2id {
                memory_kib: 8,
                iterations: 1,
                parallelism: 1,
            },
        )
        .unwrap();
        let b = derive_key("hunter2", &salt, &KdfAlgorithm::fast_insecure()).unwrap();
        assert_ne!(a.as_bytes(), b.as_bytes());
    }
}
