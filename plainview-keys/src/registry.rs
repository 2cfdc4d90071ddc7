//! Persistent registry of wrapped DEKs.
//!
//! One row per `(user_id, provider, key_id)`, each holding a cipher
//! envelope that wraps exactly 32 raw bytes. Rows are created once and
//! only replaced whole (rewrap); there is no update-in-place.

use crate::error::KeyResult;
use duckdb::params;
use plainview_crypto::{CipherEnvelope, EnvelopeColumns, ProviderKind};
use plainview_store::LocalStore;

/// Default key identifier when a caller manages a single DEK per user.
pub const DEFAULT_KEY_ID: &str = "default";

const WRAPPED_KEYS_DDL: &str = r#"
CREATE TABLE IF NOT EXISTS wrapped_keys (
    key_id VARCHAR NOT NULL,
    user_id VARCHAR NOT NULL,
    provider VARCHAR NOT NULL,
    created_at BIGINT NOT NULL,
    algorithm VARCHAR NOT NULL,
    aad VARCHAR,
    kdf_salt VARCHAR,
    nonce VARCHAR NOT NULL,
    ciphertext VARCHAR NOT NULL,
    PRIMARY KEY (user_id, provider, key_id)
);
"#;

/// A persisted wrapped DEK.
#[derive(Clone, Debug)]
pub struct WrappedKeyRecord {
    pub key_id: String,
    pub user_id: String,
    pub provider: ProviderKind,
    pub created_at: i64,
    pub envelope: CipherEnvelope,
}

/// Store-backed wrapped-key registry.
#[derive(Clone)]
pub struct KeyRegistry {
    store: LocalStore,
}

impl KeyRegistry {
    /// Opens the registry, creating its table if needed. Idempotent.
    pub fn open(store: LocalStore) -> KeyResult<Self> {
        store.execute_batch(WRAPPED_KEYS_DDL)?;
        Ok(Self { store })
    }

    /// Finds the wrapped key for `(user_id, provider, key_id)`.
    ///
    /// With `key_id` unset, returns the oldest row for the
    /// `(user_id, provider)` pair, which is the canonical one.
    pub fn find_wrapped_key(
        &self,
        user_id: &str,
        provider: ProviderKind,
        key_id: Option<&str>,
    ) -> KeyResult<Option<WrappedKeyRecord>> {
        let raw = self.store.with_conn(|conn| {
            let (sql, binds): (&str, Vec<&str>) = match key_id {
                Some(kid) => (
                    "SELECT key_id, user_id, provider, created_at, algorithm, aad, kdf_salt, nonce, ciphertext \
                     FROM wrapped_keys WHERE user_id = ? AND provider = ? AND key_id = ?",
                    vec![user_id, provider.as_str(), kid],
                ),
                None => (
                    "SELECT key_id, user_id, provider, created_at, algorithm, aad, kdf_salt, nonce, ciphertext \
                     FROM wrapped_keys WHERE user_id = ? AND provider = ? ORDER BY created_at ASC LIMIT 1",
                    vec![user_id, provider.as_str()],
                ),
            };

            let mut stmt = conn.prepare(sql)?;
            match stmt.query_row(duckdb::params_from_iter(binds), read_record_row) {
                Ok(raw) => Ok(Some(raw)),
                Err(duckdb::Error::QueryReturnedNoRows) => Ok(None),
                Err(e) => Err(e.into()),
            }
        })?;

        raw.map(raw_to_record).transpose()
    }

    /// Inserts a wrapped key if no row exists for its tuple.
    ///
    /// Read-before-write inside one transaction: when a concurrent ensure
    /// already committed a row, that existing row wins and is returned with
    /// `inserted = false` — never a duplicate, never an overwrite.
    pub fn insert_wrapped_key(
        &self,
        record: &WrappedKeyRecord,
    ) -> KeyResult<(WrappedKeyRecord, bool)> {
        let committed = self.store.with_transaction(|conn| {
            let mut stmt = conn.prepare(
                "SELECT key_id, user_id, provider, created_at, algorithm, aad, kdf_salt, nonce, ciphertext \
                 FROM wrapped_keys WHERE user_id = ? AND provider = ? AND key_id = ?",
            )?;
            let existing = stmt.query_row(
                params![record.user_id, record.provider.as_str(), record.key_id],
                read_record_row,
            );

            match existing {
                Ok(raw) => Ok(Some(raw)),
                Err(duckdb::Error::QueryReturnedNoRows) => {
                    insert_row(conn, record)?;
                    Ok(None)
                }
                Err(e) => Err(e.into()),
            }
        })?;

        match committed {
            Some(raw) => Ok((raw_to_record(raw)?, false)),
            None => Ok((record.clone(), true)),
        }
    }

    /// Unconditionally replaces the row for a tuple (rewrap). When the
    /// provider kind changes, the old tuple's row is removed in the same
    /// transaction so exactly one wrapped copy of the DEK remains.
    pub fn replace_wrapped_key(
        &self,
        old_provider: ProviderKind,
        record: &WrappedKeyRecord,
    ) -> KeyResult<()> {
        self.store.with_transaction(|conn| {
            if old_provider != record.provider {
                conn.execute(
                    "DELETE FROM wrapped_keys WHERE user_id = ? AND provider = ? AND key_id = ?",
                    params![record.user_id, old_provider.as_str(), record.key_id],
                )?;
            }
            conn.execute(
                "DELETE FROM wrapped_keys WHERE user_id = ? AND provider = ? AND key_id = ?",
                params![record.user_id, record.provider.as_str(), record.key_id],
            )?;
            insert_row(conn, record)?;
            Ok(())
        })?;
        Ok(())
    }
}

type RawRecord = (
    String,
    String,
    String,
    i64,
    String,
    Option<String>,
    Option<String>,
    String,
    String,
);

fn read_record_row(row: &duckdb::Row<'_>) -> Result<RawRecord, duckdb::Error> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
        row.get(6)?,
        row.get(7)?,
        row.get(8)?,
    ))
}

fn raw_to_record(raw: RawRecord) -> KeyResult<WrappedKeyRecord> {
    let (key_id, user_id, provider, created_at, algorithm, aad, kdf_salt, nonce, ciphertext) = raw;
    let envelope = EnvelopeColumns {
        algorithm,
        aad,
        kdf_salt,
        nonce,
        ciphertext,
    }
    .into_envelope()?;
    Ok(WrappedKeyRecord {
        key_id,
        user_id,
        provider: ProviderKind::parse(&provider)?,
        created_at,
        envelope,
    })
}

fn insert_row(conn: &duckdb::Connection, record: &WrappedKeyRecord) -> Result<(), duckdb::Error> {
    let cols = record.envelope.to_columns();
    conn.execute(
        "INSERT INTO wrapped_keys \
         (key_id, user_id, provider, created_at, algorithm, aad, kdf_salt, nonce, ciphertext) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        params![
            record.key_id,
            record.user_id,
            record.provider.as_str(),
            record.created_at,
            cols.algorithm,
            cols.aad,
            cols.kdf_salt,
            cols.nonce,
            cols.ciphertext,
        ],
    )?;
    Ok(())
}
