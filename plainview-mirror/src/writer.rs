//! Encrypted writes with atomic mirror projection.
//!
//! Every mutation writes the encrypted row and its mirror projection in one
//! transaction, so readers of the mirror table never observe a row whose
//! plaintext columns disagree with the committed ciphertext.

use crate::error::{MirrorError, MirrorResult};
use crate::pairs::MirrorPair;
use chrono::Utc;
use duckdb::params;
use plainview_crypto::{EnvelopeColumns, seal};
use plainview_keys::KeySession;
use plainview_store::{LocalStore, SqlValue};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

/// Hook for a remote replication layer. Called after local commit with the
/// encrypted table name and row id; implementations queue the ciphertext
/// row for upload and must not block.
pub trait SyncDelegate: Send + Sync {
    fn enqueue_upload(&self, table: &str, row_id: &str);
    fn enqueue_delete(&self, table: &str, row_id: &str);
}

/// Delegate for deployments without a replication layer.
pub struct NoopSyncDelegate;

impl SyncDelegate for NoopSyncDelegate {
    fn enqueue_upload(&self, _table: &str, _row_id: &str) {}
    fn enqueue_delete(&self, _table: &str, _row_id: &str) {}
}

/// Writer for the encrypted side of configured pairs.
#[derive(Clone)]
pub struct MirrorWriter {
    store: LocalStore,
    session: KeySession,
    pairs: Arc<HashMap<String, MirrorPair>>,
    delegate: Arc<dyn SyncDelegate>,
}

impl MirrorWriter {
    pub fn new(store: LocalStore, session: KeySession, pairs: Vec<MirrorPair>) -> Self {
        let pairs = pairs
            .into_iter()
            .map(|p| (p.encrypted_table.clone(), p))
            .collect();
        Self {
            store,
            session,
            pairs: Arc::new(pairs),
            delegate: Arc::new(NoopSyncDelegate),
        }
    }

    pub fn with_sync_delegate(mut self, delegate: Arc<dyn SyncDelegate>) -> Self {
        self.delegate = delegate;
        self
    }

    fn pair(&self, encrypted_table: &str) -> MirrorResult<&MirrorPair> {
        self.pairs
            .get(encrypted_table)
            .ok_or_else(|| MirrorError::UnknownPair(encrypted_table.to_string()))
    }

    /// Inserts a plaintext object: encrypts it into a new row and projects
    /// the mirror row in the same transaction. Returns the generated row id.
    pub fn insert(
        &self,
        encrypted_table: &str,
        bucket_id: Option<&str>,
        plain: &serde_json::Value,
    ) -> MirrorResult<String> {
        let pair = self.pair(encrypted_table)?;
        let dek = self.session.dek()?;
        let user_id = self.session.user_id().to_string();

        let id = Uuid::new_v4().to_string();
        let updated_at = Utc::now().timestamp_millis();

        let bytes = pair.serialize(plain)?;
        let envelope = seal(dek.as_bytes(), &bytes, Some(&pair.default_aad))?;
        let columns = envelope.to_columns();
        let projected = pair.project(plain)?;

        let mirror_sql = upsert_mirror_sql(
            pair, &id, &user_id, bucket_id, updated_at, &projected,
        );
        let enc = &pair.encrypted_table;

        self.store.with_transaction(|conn| {
            conn.execute(
                &format!(
                    "INSERT INTO {enc} (id, user_id, bucket_id, updated_at, algorithm, aad, kdf_salt, nonce, ciphertext)
                     VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)"
                ),
                params![
                    id,
                    user_id,
                    bucket_id,
                    updated_at,
                    columns.algorithm,
                    columns.aad,
                    columns.kdf_salt,
                    columns.nonce,
                    columns.ciphertext,
                ],
            )?;
            conn.execute_batch(&mirror_sql)?;
            Ok(())
        })?;

        debug!(table = %enc, id = %id, "inserted encrypted row");
        self.store.publish_change(enc, vec![id.clone()]);
        self.delegate.enqueue_upload(enc, &id);
        Ok(id)
    }

    /// Re-encrypts an existing row with new plaintext. The new `updated_at`
    /// is strictly greater than the stored one even under clock skew.
    pub fn update(
        &self,
        encrypted_table: &str,
        id: &str,
        plain: &serde_json::Value,
    ) -> MirrorResult<()> {
        let pair = self.pair(encrypted_table)?;
        let dek = self.session.dek()?;

        let bytes = pair.serialize(plain)?;
        let envelope = seal(dek.as_bytes(), &bytes, Some(&pair.default_aad))?;
        let columns = envelope.to_columns();
        let projected = pair.project(plain)?;

        let enc = pair.encrypted_table.clone();
        let pair = pair.clone();
        let id_owned = id.to_string();

        let found = self.store.with_transaction(|conn| {
            let stored: Option<(i64, String, Option<String>)> = match conn.query_row(
                &format!("SELECT updated_at, user_id, bucket_id FROM {enc} WHERE id = ?"),
                params![id_owned],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            ) {
                Ok(row) => Some(row),
                Err(duckdb::Error::QueryReturnedNoRows) => None,
                Err(e) => return Err(e.into()),
            };
            let Some((stored_at, user_id, bucket_id)) = stored else {
                return Ok(false);
            };

            let updated_at = Utc::now().timestamp_millis().max(stored_at + 1);
            conn.execute(
                &format!(
                    "UPDATE {enc}
                     SET updated_at = ?, algorithm = ?, aad = ?, kdf_salt = ?, nonce = ?, ciphertext = ?
                     WHERE id = ?"
                ),
                params![
                    updated_at,
                    columns.algorithm,
                    columns.aad,
                    columns.kdf_salt,
                    columns.nonce,
                    columns.ciphertext,
                    id_owned,
                ],
            )?;
            conn.execute_batch(&upsert_mirror_sql(
                &pair,
                &id_owned,
                &user_id,
                bucket_id.as_deref(),
                updated_at,
                &projected,
            ))?;
            Ok(true)
        })?;

        if !found {
            return Err(MirrorError::NotFound(id.to_string()));
        }
        debug!(table = %enc, id = %id, "updated encrypted row");
        self.store.publish_change(&enc, vec![id.to_string()]);
        self.delegate.enqueue_upload(&enc, id);
        Ok(())
    }

    /// Deletes a row from both the encrypted table and its mirror.
    pub fn delete(&self, encrypted_table: &str, id: &str) -> MirrorResult<()> {
        let pair = self.pair(encrypted_table)?;
        let enc = pair.encrypted_table.clone();
        let mirror = pair.mirror_table.clone();
        let id_owned = id.to_string();

        let deleted = self.store.with_transaction(|conn| {
            let n = conn.execute(&format!("DELETE FROM {enc} WHERE id = ?"), params![id_owned])?;
            conn.execute(&format!("DELETE FROM {mirror} WHERE id = ?"), params![id_owned])?;
            Ok(n > 0)
        })?;

        if !deleted {
            return Err(MirrorError::NotFound(id.to_string()));
        }
        debug!(table = %enc, id = %id, "deleted encrypted row");
        self.store.publish_change(&enc, vec![id.to_string()]);
        self.delegate.enqueue_delete(&enc, id);
        Ok(())
    }

    /// Decrypts one row back to its plaintext object. Used by callers that
    /// need fields the mirror does not project.
    pub fn fetch_plain(&self, encrypted_table: &str, id: &str) -> MirrorResult<serde_json::Value> {
        let pair = self.pair(encrypted_table)?;
        let dek = self.session.dek()?;

        let id_lit = SqlValue::Text(id.to_string()).to_literal();
        let rows = self.store.get_all(&format!(
            "SELECT algorithm, aad, kdf_salt, nonce, ciphertext FROM {} WHERE id = {id_lit}",
            pair.encrypted_table
        ))?;
        let row = rows
            .into_iter()
            .next()
            .ok_or_else(|| MirrorError::NotFound(id.to_string()))?;

        let envelope = envelope_from_row(&row)?;
        let bytes = plainview_crypto::open(dek.as_bytes(), &envelope, Some(&pair.default_aad))?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}

/// Builds the mirror upsert for one row. Column lists are dynamic, so values
/// are rendered as escaped literals; identifiers were validated at pair
/// construction.
pub(crate) fn upsert_mirror_sql(
    pair: &MirrorPair,
    id: &str,
    user_id: &str,
    bucket_id: Option<&str>,
    updated_at: i64,
    projected: &[(String, SqlValue)],
) -> String {
    let mut names = vec![
        "id".to_string(),
        "user_id".to_string(),
        "bucket_id".to_string(),
        "updated_at".to_string(),
        "stale".to_string(),
    ];
    let mut values = vec![
        SqlValue::Text(id.to_string()).to_literal(),
        SqlValue::Text(user_id.to_string()).to_literal(),
        bucket_id
            .map(|b| SqlValue::Text(b.to_string()).to_literal())
            .unwrap_or_else(|| "NULL".to_string()),
        updated_at.to_string(),
        "FALSE".to_string(),
    ];
    for (name, value) in projected {
        names.push(name.clone());
        values.push(value.to_literal());
    }

    format!(
        "INSERT OR REPLACE INTO {} ({}) VALUES ({});",
        pair.mirror_table,
        names.join(", "),
        values.join(", ")
    )
}

/// Reconstructs an envelope from the flat columns of an encrypted row.
pub(crate) fn envelope_from_row(
    row: &plainview_store::SqlRow,
) -> MirrorResult<plainview_crypto::CipherEnvelope> {
    let text = |name: &str| -> MirrorResult<String> {
        row.get(name)
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .ok_or_else(|| MirrorError::Projection(format!("encrypted row missing column {name}")))
    };
    let optional_text = |name: &str| -> Option<String> {
        row.get(name).and_then(|v| v.as_str()).map(str::to_string)
    };

    let columns = EnvelopeColumns {
        algorithm: text("algorithm")?,
        aad: optional_text("aad"),
        kdf_salt: optional_text("kdf_salt"),
        nonce: text("nonce")?,
        ciphertext: text("ciphertext")?,
    };
    Ok(columns.into_envelope()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pairs::MirrorColumn;

    #[test]
    fn mirror_upsert_escapes_text_values() {
        let pair = MirrorPair::new("notes_enc", "notes", vec![MirrorColumn::text("title")]).unwrap();
        let sql = upsert_mirror_sql(
            &pair,
            "r1",
            "u1",
            None,
            42,
            &[("title".to_string(), SqlValue::Text("it's a trap".to_string()))],
        );
        assert!(sql.contains("'it''s a trap'"));
        assert!(sql.contains("INSERT OR REPLACE INTO notes"));
        assert!(sql.contains("FALSE"));
    }
}
