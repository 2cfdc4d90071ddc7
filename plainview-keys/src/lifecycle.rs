//! DEK lifecycle: find-or-create, unwrap, cache for the session.
//!
//! The unwrapped DEK exists only inside a [`KeySession`]; nothing here ever
//! persists it. Locking or signing out drops it, after which dependent
//! mirror rows go stale instead of being deleted.

use crate::error::{KeyError, KeyResult};
use crate::registry::{KeyRegistry, WrappedKeyRecord};
use chrono::Utc;
use plainview_crypto::{CryptoError, CryptoProvider, Dek, ProviderKind};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, info};

/// An installed DEK, tagged with the wrapped-key tuple it was resolved from.
struct UnlockedDek {
    dek: Dek,
    provider: ProviderKind,
    key_id: String,
}

/// Session-scoped holder for the unwrapped DEK.
///
/// Passed explicitly to every mirror call — there is no process-global
/// "current key". Cloning shares the same underlying slot.
#[derive(Clone)]
pub struct KeySession {
    user_id: String,
    unlocked: Arc<RwLock<Option<UnlockedDek>>>,
}

impl KeySession {
    /// Creates a locked session for a user.
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            unlocked: Arc::new(RwLock::new(None)),
        }
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn is_unlocked(&self) -> bool {
        self.unlocked.read().unwrap().is_some()
    }

    /// Returns the session DEK, or `Locked` if none is installed.
    pub fn dek(&self) -> KeyResult<Dek> {
        self.unlocked
            .read()
            .unwrap()
            .as_ref()
            .map(|u| u.dek.clone())
            .ok_or(KeyError::Locked)
    }

    /// Returns the session DEK only if it was resolved from the given
    /// `(provider, key_id)` tuple. A session unlocked for a different key
    /// does not satisfy this — each key id has its own DEK.
    pub fn dek_for(&self, provider: ProviderKind, key_id: &str) -> Option<Dek> {
        self.unlocked
            .read()
            .unwrap()
            .as_ref()
            .filter(|u| u.provider == provider && u.key_id == key_id)
            .map(|u| u.dek.clone())
    }

    /// Installs an unwrapped DEK for the session, recording which
    /// wrapped-key tuple it belongs to.
    pub fn install(&self, dek: Dek, provider: ProviderKind, key_id: impl Into<String>) {
        *self.unlocked.write().unwrap() = Some(UnlockedDek {
            dek,
            provider,
            key_id: key_id.into(),
        });
    }

    /// Drops the DEK from memory (explicit lock or sign-out). Subsequent
    /// decrypt attempts fail and mirror rows degrade to stale.
    pub fn lock(&self) {
        *self.unlocked.write().unwrap() = None;
    }
}

/// Resolves a usable DEK for the active session.
pub struct DekLifecycle {
    registry: KeyRegistry,
    /// Per-(user, provider-kind, key-id) in-flight guards. Storage-level
    /// detection alone leaves a window where two concurrent ensures both
    /// observe "not found"; the guard serializes them before the lookup.
    /// Released guards are pruned on the next acquisition.
    inflight: AsyncMutex<HashMap<(String, ProviderKind, String), Arc<AsyncMutex<()>>>>,
}

impl DekLifecycle {
    pub fn new(registry: KeyRegistry) -> Self {
        Self {
            registry,
            inflight: AsyncMutex::new(HashMap::new()),
        }
    }

    /// Finds-or-creates the wrapped DEK for `(session.user_id, provider,
    /// key_id)`, unwraps it, installs it into the session, and returns it.
    ///
    /// A wrong password surfaces as [`KeyError::WrongSecret`]; authenticator
    /// failures pass through as `Crypto(CredentialUnavailable)` or
    /// `Crypto(UserCancelled)`. All three mean "still locked", not fatal.
    pub async fn ensure_dek_wrapped(
        &self,
        session: &KeySession,
        provider: Arc<dyn CryptoProvider>,
        key_id: &str,
    ) -> KeyResult<Dek> {
        let guard = self.guard_for(session.user_id(), provider.kind(), key_id).await;
        let _held = guard.lock().await;

        // A concurrent ensure that won the guard first may have already
        // resolved this same key for the session. A DEK installed for a
        // different key id never satisfies this.
        if let Some(dek) = session.dek_for(provider.kind(), key_id) {
            return Ok(dek);
        }

        let user_id = session.user_id();
        let aad = wrap_aad(user_id, key_id);

        if let Some(record) =
            self.registry
                .find_wrapped_key(user_id, provider.kind(), Some(key_id))?
        {
            let dek = unwrap_record(&record, provider.as_ref(), &aad)?;
            session.install(dek.clone(), provider.kind(), key_id);
            debug!("unwrapped existing DEK for user {user_id} ({})", provider.kind().as_str());
            return Ok(dek);
        }

        // No wrapped key yet: generate, wrap, persist.
        let dek = Dek::generate();
        let envelope = provider.encrypt(dek.as_bytes(), Some(&aad))?;
        let record = WrappedKeyRecord {
            key_id: key_id.to_string(),
            user_id: user_id.to_string(),
            provider: provider.kind(),
            created_at: Utc::now().timestamp_millis(),
            envelope,
        };

        let (committed, inserted) = self.registry.insert_wrapped_key(&record)?;
        let dek = if inserted {
            info!("created wrapped DEK for user {user_id} ({})", provider.kind().as_str());
            dek
        } else {
            // Another writer committed first; their row is canonical.
            unwrap_record(&committed, provider.as_ref(), &aad)?
        };

        session.install(dek.clone(), provider.kind(), key_id);
        Ok(dek)
    }

    /// Rewraps an existing DEK under a new secret (password change, or a
    /// switch between password and authenticator). Content encrypted under
    /// the DEK is untouched — only the wrapping changes.
    pub async fn rewrap_dek(
        &self,
        session: &KeySession,
        old_provider: Arc<dyn CryptoProvider>,
        new_provider: Arc<dyn CryptoProvider>,
        key_id: &str,
    ) -> KeyResult<()> {
        let guard = self
            .guard_for(session.user_id(), new_provider.kind(), key_id)
            .await;
        let _held = guard.lock().await;

        let user_id = session.user_id();
        let aad = wrap_aad(user_id, key_id);

        let record = self
            .registry
            .find_wrapped_key(user_id, old_provider.kind(), Some(key_id))?
            .ok_or_else(|| KeyError::NotFound {
                user_id: user_id.to_string(),
                provider: old_provider.kind().as_str().to_string(),
            })?;

        let dek = unwrap_record(&record, old_provider.as_ref(), &aad)?;
        let envelope = new_provider.encrypt(dek.as_bytes(), Some(&aad))?;

        let new_record = WrappedKeyRecord {
            key_id: key_id.to_string(),
            user_id: user_id.to_string(),
            provider: new_provider.kind(),
            created_at: Utc::now().timestamp_millis(),
            envelope,
        };
        self.registry
            .replace_wrapped_key(old_provider.kind(), &new_record)?;

        info!(
            "rewrapped DEK for user {user_id}: {} -> {}",
            old_provider.kind().as_str(),
            new_provider.kind().as_str()
        );
        session.install(dek, new_provider.kind(), key_id);
        Ok(())
    }

    async fn guard_for(
        &self,
        user_id: &str,
        kind: ProviderKind,
        key_id: &str,
    ) -> Arc<AsyncMutex<()>> {
        let mut map = self.inflight.lock().await;
        // A strong count of 1 means nobody holds the guard anymore.
        map.retain(|_, guard| Arc::strong_count(guard) > 1);
        map.entry((user_id.to_string(), kind, key_id.to_string()))
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone()
    }
}

/// AAD binding a wrapped DEK to its owner and key id.
fn wrap_aad(user_id: &str, key_id: &str) -> String {
    format!("dek:{user_id}:{key_id}")
}

fn unwrap_record(
    record: &WrappedKeyRecord,
    provider: &dyn CryptoProvider,
    aad: &str,
) -> KeyResult<Dek> {
    let bytes = provider
        .decrypt(&record.envelope, Some(aad))
        .map_err(|e| match e {
            CryptoError::DecryptionFailed => KeyError::WrongSecret,
            other => KeyError::Crypto(other),
        })?;
    Ok(Dek::from_slice(&bytes)?)
}
