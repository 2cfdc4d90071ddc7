use plainview_crypto::{
    AuthenticatorProvider, CipherEnvelope, CryptoError, CryptoProvider, CryptoResult, Dek,
    HmacPrfCredential, KdfAlgorithm, PasswordProvider, PrfCredential, ProviderKind,
};
use std::sync::Arc;

fn password_provider(password: &str) -> PasswordProvider {
    PasswordProvider::new(password, KdfAlgorithm::fast_insecure())
}

#[test]
fn password_encrypt_decrypt_roundtrip() {
    let provider = password_provider("correct-horse-battery-staple");
    let envelope = provider.encrypt(b"plaintext payload", Some("ctx")).unwrap();
    let recovered = provider.decrypt(&envelope, Some("ctx")).unwrap();
    assert_eq!(recovered, b"plaintext payload");
}

#[test]
fn wrong_password_fails_with_decryption_failed() {
    let envelope = password_provider("correct-horse")
        .encrypt(b"payload", None)
        .unwrap();

    let result = password_provider("wrong").decrypt(&envelope, None);
    assert!(matches!(result, Err(CryptoError::DecryptionFailed)));
}

#[test]
fn aad_mismatch_fails_for_any_provider() {
    let provider = password_provider("pw");
    let envelope = provider.encrypt(b"payload", Some("pair:tasks")).unwrap();

    assert!(provider.decrypt(&envelope, Some("pair:notes")).is_err());
    assert!(provider.decrypt(&envelope, None).is_err());
    assert_eq!(
        provider.decrypt(&envelope, Some("pair:tasks")).unwrap(),
        b"payload"
    );
}

#[test]
fn each_password_encryption_gets_a_fresh_salt() {
    let provider = password_provider("pw");
    let env1 = provider.encrypt(b"same plaintext", None).unwrap();
    let env2 = provider.encrypt(b"same plaintext", None).unwrap();

    assert_ne!(env1.kdf_salt, env2.kdf_salt);
    assert_ne!(env1.nonce, env2.nonce);
    assert_ne!(env1.ciphertext, env2.ciphertext);

    // Both still decrypt independently via their own salt
    assert_eq!(provider.decrypt(&env1, None).unwrap(), b"same plaintext");
    assert_eq!(provider.decrypt(&env2, None).unwrap(), b"same plaintext");
}

#[test]
fn password_envelope_missing_salt_is_structural_error() {
    let provider = password_provider("pw");
    let mut envelope = provider.encrypt(b"payload", None).unwrap();
    envelope.kdf_salt = None;

    assert!(matches!(
        provider.decrypt(&envelope, None),
        Err(CryptoError::InvalidEnvelope(_))
    ));
}

#[test]
fn dek_wrap_unwrap_roundtrip() {
    let provider = password_provider("unlock-me");
    let dek = Dek::generate();

    let wrapped = provider.encrypt(dek.as_bytes(), Some("dek:u1")).unwrap();
    let unwrapped = provider.decrypt(&wrapped, Some("dek:u1")).unwrap();

    assert_eq!(unwrapped, dek.as_bytes().to_vec());
    assert_eq!(Dek::from_slice(&unwrapped).unwrap().as_bytes(), dek.as_bytes());
}

#[test]
fn wrapped_dek_survives_column_flattening() {
    let provider = password_provider("unlock-me");
    let dek = Dek::generate();

    let wrapped = provider.encrypt(dek.as_bytes(), None).unwrap();
    let restored = wrapped.to_columns().into_envelope().unwrap();

    assert_eq!(provider.decrypt(&restored, None).unwrap(), dek.as_bytes());
}

#[test]
fn authenticator_provider_roundtrip() {
    let credential = Arc::new(HmacPrfCredential::new("cred-1", [7u8; 32]));
    let provider = AuthenticatorProvider::new(credential, b"plainview-dek".to_vec(), false);

    assert_eq!(provider.kind(), ProviderKind::Authenticator);
    let envelope = provider.encrypt(b"payload", Some("ctx")).unwrap();
    assert!(envelope.kdf_salt.is_none(), "no KDF salt on the PRF path");
    assert_eq!(provider.decrypt(&envelope, Some("ctx")).unwrap(), b"payload");
}

#[test]
fn different_credential_seed_fails_decrypt() {
    let enc = AuthenticatorProvider::new(
        Arc::new(HmacPrfCredential::new("cred-1", [1u8; 32])),
        b"plainview-dek".to_vec(),
        false,
    );
    let dec = AuthenticatorProvider::new(
        Arc::new(HmacPrfCredential::new("cred-2", [2u8; 32])),
        b"plainview-dek".to_vec(),
        false,
    );

    let envelope = enc.encrypt(b"payload", None).unwrap();
    assert!(matches!(
        dec.decrypt(&envelope, None),
        Err(CryptoError::DecryptionFailed)
    ));
}

#[test]
fn different_context_salt_derives_a_different_secret() {
    let seed = [9u8; 32];
    let a = AuthenticatorProvider::new(
        Arc::new(HmacPrfCredential::new("cred", seed)),
        b"context-a".to_vec(),
        false,
    );
    let b = AuthenticatorProvider::new(
        Arc::new(HmacPrfCredential::new("cred", seed)),
        b"context-b".to_vec(),
        false,
    );

    let envelope = a.encrypt(b"payload", None).unwrap();
    assert!(b.decrypt(&envelope, None).is_err());
    assert_eq!(a.decrypt(&envelope, None).unwrap(), b"payload");
}

/// Credential that counts ceremonies, to observe session caching.
struct CountingCredential {
    inner: HmacPrfCredential,
    ceremonies: std::sync::atomic::AtomicUsize,
}

impl PrfCredential for CountingCredential {
    fn credential_id(&self) -> &str {
        self.inner.credential_id()
    }

    fn derive_secret(&self, salt: &[u8]) -> CryptoResult<[u8; 32]> {
        self.ceremonies
            .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        self.inner.derive_secret(salt)
    }
}

#[test]
fn cached_secret_runs_one_ceremony_per_session() {
    let credential = Arc::new(CountingCredential {
        inner: HmacPrfCredential::new("cred", [3u8; 32]),
        ceremonies: std::sync::atomic::AtomicUsize::new(0),
    });
    let provider =
        AuthenticatorProvider::new(credential.clone(), b"ctx".to_vec(), true);

    let envelope = provider.encrypt(b"a", None).unwrap();
    provider.decrypt(&envelope, None).unwrap();
    provider.encrypt(b"b", None).unwrap();
    assert_eq!(
        credential.ceremonies.load(std::sync::atomic::Ordering::SeqCst),
        1
    );

    provider.clear_cached_secret();
    provider.encrypt(b"c", None).unwrap();
    assert_eq!(
        credential.ceremonies.load(std::sync::atomic::Ordering::SeqCst),
        2
    );
}

/// Credential simulating a platform without PRF support.
struct UnavailableCredential;

impl PrfCredential for UnavailableCredential {
    fn credential_id(&self) -> &str {
        "unavailable"
    }

    fn derive_secret(&self, _salt: &[u8]) -> CryptoResult<[u8; 32]> {
        Err(CryptoError::CredentialUnavailable(
            "platform lacks hmac-secret".to_string(),
        ))
    }
}

/// Credential simulating a user aborting the presence ceremony.
struct CancellingCredential;

impl PrfCredential for CancellingCredential {
    fn credential_id(&self) -> &str {
        "cancelling"
    }

    fn derive_secret(&self, _salt: &[u8]) -> CryptoResult<[u8; 32]> {
        Err(CryptoError::UserCancelled)
    }
}

#[test]
fn credential_failures_pass_through() {
    let unavailable =
        AuthenticatorProvider::new(Arc::new(UnavailableCredential), b"ctx".to_vec(), false);
    assert!(matches!(
        unavailable.encrypt(b"x", None),
        Err(CryptoError::CredentialUnavailable(_))
    ));

    let cancelled =
        AuthenticatorProvider::new(Arc::new(CancellingCredential), b"ctx".to_vec(), false);
    assert!(matches!(
        cancelled.encrypt(b"x", None),
        Err(CryptoError::UserCancelled)
    ));
}

#[test]
fn envelope_json_roundtrip_still_decrypts() {
    let provider = password_provider("pw");
    let envelope = provider.encrypt(b"payload", Some("ctx")).unwrap();

    let json = serde_json::to_string(&envelope).unwrap();
    let deserialized: CipherEnvelope = serde_json::from_str(&json).unwrap();

    assert_eq!(provider.decrypt(&deserialized, Some("ctx")).unwrap(), b"payload");
}

// Property-based tests
mod proptests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(16))]

        #[test]
        fn password_roundtrip_any_payload(
            payload in proptest::collection::vec(any::<u8>(), 0..512),
            aad in proptest::option::of("[a-z:]{0,24}"),
        ) {
            let provider = password_provider("prop-pw");
            let envelope = provider.encrypt(&payload, aad.as_deref()).unwrap();
            let recovered = provider.decrypt(&envelope, aad.as_deref()).unwrap();
            prop_assert_eq!(recovered, payload);
        }

        #[test]
        fn column_flattening_is_lossless(
            payload in proptest::collection::vec(any::<u8>(), 1..128),
        ) {
            let provider = password_provider("prop-pw");
            let envelope = provider.encrypt(&payload, None).unwrap();
            let restored = envelope.to_columns().into_envelope().unwrap();
            prop_assert_eq!(restored, envelope);
        }
    }
}
