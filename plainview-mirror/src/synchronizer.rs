//! Background mirror synchronizer.
//!
//! Subscribes to change events on the store and repairs the mirror row for
//! every reported id by re-reading the encrypted row (events carry ids only,
//! so a stale event body cannot overwrite newer data). Rows that cannot be
//! decrypted are degraded to `stale = TRUE` with their last good fields left
//! in place; decryption problems never stop the drain loop.

use crate::error::{MirrorError, MirrorResult};
use crate::pairs::MirrorPair;
use crate::writer::{envelope_from_row, upsert_mirror_sql};
use duckdb::params;
use plainview_crypto::CryptoError;
use plainview_keys::KeySession;
use plainview_store::{LocalStore, SqlRow, SqlValue};
use std::collections::HashMap;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Handle to a running synchronizer task.
pub struct MirrorHandle {
    shutdown: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

impl MirrorHandle {
    /// Signals the task to stop and waits for it to drain.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(());
        let _ = self.task.await;
    }
}

/// Outcome of repairing one mirror row.
#[derive(Debug, PartialEq, Eq)]
enum RepairOutcome {
    Projected,
    Stale,
    Removed,
}

/// Counts from a full mirror rebuild.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RebuildStats {
    /// Rows decrypted and projected.
    pub projected: usize,
    /// Rows that could not be decrypted and were marked stale.
    pub stale: usize,
    /// Mirror rows removed because no encrypted counterpart exists.
    pub removed: usize,
}

/// Starts the synchronizer for the given pairs.
///
/// Events for tables with no configured pair are ignored. The task exits
/// when the handle is shut down or the store's change bus closes.
pub fn start_encrypted_mirrors(
    store: LocalStore,
    session: KeySession,
    pairs: Vec<MirrorPair>,
) -> MirrorHandle {
    let pairs: HashMap<String, MirrorPair> = pairs
        .into_iter()
        .map(|p| (p.encrypted_table.clone(), p))
        .collect();
    let mut events = store.changes().subscribe();
    let (shutdown_tx, mut shutdown_rx) = oneshot::channel();

    let task = tokio::spawn(async move {
        info!(pairs = pairs.len(), "mirror synchronizer started");
        loop {
            tokio::select! {
                _ = &mut shutdown_rx => break,
                event = events.recv() => {
                    let Some(event) = event else { break };
                    let Some(pair) = pairs.get(&event.table) else {
                        continue;
                    };
                    for id in &event.row_ids {
                        if let Err(e) = repair_row(&store, &session, pair, id) {
                            warn!(table = %event.table, id = %id, "mirror repair failed: {e}");
                        }
                    }
                }
            }
        }
        info!("mirror synchronizer stopped");
    });

    MirrorHandle {
        shutdown: shutdown_tx,
        task,
    }
}

/// Re-reads one encrypted row and brings its mirror row up to date.
fn repair_row(
    store: &LocalStore,
    session: &KeySession,
    pair: &MirrorPair,
    id: &str,
) -> MirrorResult<RepairOutcome> {
    let id_lit = SqlValue::Text(id.to_string()).to_literal();
    let rows = store.get_all(&format!(
        "SELECT * FROM {} WHERE id = {id_lit}",
        pair.encrypted_table
    ))?;

    let Some(row) = rows.into_iter().next() else {
        // Encrypted row is gone; the mirror row follows it.
        store.with_conn(|conn| {
            conn.execute(
                &format!("DELETE FROM {} WHERE id = ?", pair.mirror_table),
                params![id],
            )?;
            Ok(())
        })?;
        debug!(table = %pair.mirror_table, id = %id, "removed orphaned mirror row");
        return Ok(RepairOutcome::Removed);
    };

    project_encrypted_row(store, session, pair, &row)
}

/// Decrypts and projects one already-fetched encrypted row, or degrades its
/// mirror row to stale when the plaintext is unavailable.
fn project_encrypted_row(
    store: &LocalStore,
    session: &KeySession,
    pair: &MirrorPair,
    row: &SqlRow,
) -> MirrorResult<RepairOutcome> {
    let id = row
        .get("id")
        .and_then(|v| v.as_str())
        .ok_or_else(|| MirrorError::Projection("encrypted row missing id".to_string()))?
        .to_string();

    let plain = match decrypt_row(session, pair, row) {
        Ok(plain) => plain,
        Err(MirrorError::Locked) | Err(MirrorError::Crypto(CryptoError::DecryptionFailed)) => {
            warn!(table = %pair.encrypted_table, id = %id, "cannot decrypt, marking mirror row stale");
            mark_stale(store, pair, &id)?;
            return Ok(RepairOutcome::Stale);
        }
        Err(e) => return Err(e),
    };

    let user_id = row
        .get("user_id")
        .and_then(|v| v.as_str())
        .ok_or_else(|| MirrorError::Projection("encrypted row missing user_id".to_string()))?;
    let bucket_id = row.get("bucket_id").and_then(|v| v.as_str());
    let updated_at = row
        .get("updated_at")
        .and_then(|v| v.as_i64())
        .ok_or_else(|| MirrorError::Projection("encrypted row missing updated_at".to_string()))?;

    let projected = pair.project(&plain)?;
    let sql = upsert_mirror_sql(pair, &id, user_id, bucket_id, updated_at, &projected);
    store.execute_batch(&sql)?;
    Ok(RepairOutcome::Projected)
}

fn decrypt_row(
    session: &KeySession,
    pair: &MirrorPair,
    row: &SqlRow,
) -> MirrorResult<serde_json::Value> {
    let dek = session.dek()?;
    let envelope = envelope_from_row(row)?;
    // The pair's configured AAD is the expectation; a row whose envelope
    // was bound to anything else fails the tag and goes stale.
    let bytes = plainview_crypto::open(dek.as_bytes(), &envelope, Some(&pair.default_aad))?;
    Ok(serde_json::from_slice(&bytes)?)
}

/// Flags an existing mirror row as stale without touching its fields. A
/// row that was never projected has nothing to show, so absence is fine.
fn mark_stale(store: &LocalStore, pair: &MirrorPair, id: &str) -> MirrorResult<()> {
    store.with_conn(|conn| {
        conn.execute(
            &format!("UPDATE {} SET stale = TRUE WHERE id = ?", pair.mirror_table),
            params![id],
        )?;
        Ok(())
    })?;
    Ok(())
}

/// Rebuilds a pair's mirror table from scratch: removes mirror rows with no
/// encrypted counterpart, then re-projects every encrypted row. Used after
/// schema changes or suspected divergence.
pub fn rebuild_mirror(
    store: &LocalStore,
    session: &KeySession,
    pair: &MirrorPair,
) -> MirrorResult<RebuildStats> {
    let mut stats = RebuildStats::default();

    stats.removed = store.with_conn(|conn| {
        let n = conn.execute(
            &format!(
                "DELETE FROM {} WHERE id NOT IN (SELECT id FROM {})",
                pair.mirror_table, pair.encrypted_table
            ),
            [],
        )?;
        Ok(n)
    })?;

    let rows = store.get_all(&format!("SELECT * FROM {}", pair.encrypted_table))?;
    for row in &rows {
        match project_encrypted_row(store, session, pair, row) {
            Ok(RepairOutcome::Projected) => stats.projected += 1,
            Ok(RepairOutcome::Stale) => stats.stale += 1,
            Ok(RepairOutcome::Removed) => {}
            Err(e) => {
                let id = row.get("id").and_then(|v| v.as_str()).unwrap_or("?");
                warn!(table = %pair.encrypted_table, id = %id, "rebuild skipped row: {e}");
            }
        }
    }

    info!(
        table = %pair.mirror_table,
        projected = stats.projected,
        stale = stats.stale,
        removed = stats.removed,
        "mirror rebuild complete"
    );
    Ok(stats)
}
