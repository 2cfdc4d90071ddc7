//! Shared DuckDB connection with transactions and change publication.

use crate::changes::{ChangeBus, ChangeEvent};
use crate::error::{StorageError, StorageResult};
use duckdb::Connection;
use duckdb::types::Value as DbValue;
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::warn;

/// A dynamically-typed column value read from or written to the store.
#[derive(Clone, Debug, PartialEq)]
pub enum SqlValue {
    Null,
    Boolean(bool),
    Integer(i64),
    Real(f64),
    Text(String),
}

impl SqlValue {
    /// Renders the value as a SQL literal with single-quote escaping.
    /// Used where statements are assembled with dynamic column lists.
    pub fn to_literal(&self) -> String {
        match self {
            Self::Null => "NULL".to_string(),
            Self::Boolean(b) => if *b { "TRUE" } else { "FALSE" }.to_string(),
            Self::Integer(i) => i.to_string(),
            Self::Real(r) => r.to_string(),
            Self::Text(s) => format!("'{}'", s.replace('\'', "''")),
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Integer(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    fn from_db(value: DbValue) -> StorageResult<Self> {
        Ok(match value {
            DbValue::Null => Self::Null,
            DbValue::Boolean(b) => Self::Boolean(b),
            DbValue::TinyInt(i) => Self::Integer(i as i64),
            DbValue::SmallInt(i) => Self::Integer(i as i64),
            DbValue::Int(i) => Self::Integer(i as i64),
            DbValue::BigInt(i) => Self::Integer(i),
            DbValue::UTinyInt(i) => Self::Integer(i as i64),
            DbValue::USmallInt(i) => Self::Integer(i as i64),
            DbValue::UInt(i) => Self::Integer(i as i64),
            DbValue::Float(f) => Self::Real(f as f64),
            DbValue::Double(f) => Self::Real(f),
            DbValue::Text(s) => Self::Text(s),
            other => {
                return Err(StorageError::InvalidColumn(format!(
                    "unsupported column type: {other:?}"
                )));
            }
        })
    }
}

/// One result row as a column-name map.
pub type SqlRow = HashMap<String, SqlValue>;

/// Local relational store shared across the workspace.
///
/// One DuckDB connection behind a mutex; every atomic unit (e.g. encrypted
/// write + mirror projection) runs inside [`LocalStore::with_transaction`]
/// while holding the lock, so writers against the same row are linearized.
#[derive(Clone)]
pub struct LocalStore {
    conn: Arc<Mutex<Connection>>,
    changes: Arc<ChangeBus>,
}

impl LocalStore {
    /// Opens or creates a store at the given path.
    ///
    /// If the initial open fails and a `.wal` file exists alongside the
    /// database, the stale WAL is removed and the open retried once —
    /// an unclean shutdown otherwise prevents reopening.
    pub fn open(path: &Path) -> StorageResult<Self> {
        let conn = match Connection::open(path) {
            Ok(c) => c,
            Err(first_err) => {
                let wal_path = path.with_extension(
                    path.extension()
                        .map(|ext| format!("{}.wal", ext.to_string_lossy()))
                        .unwrap_or_else(|| "wal".to_string()),
                );
                if wal_path.exists() && std::fs::remove_file(&wal_path).is_ok() {
                    warn!("open failed, removed stale WAL and retrying: {}", wal_path.display());
                    Connection::open(path)?
                } else {
                    return Err(first_err.into());
                }
            }
        };
        apply_resource_limits(&conn)?;
        Ok(Self::from_connection(conn))
    }

    /// Opens an in-memory store (for testing).
    pub fn open_in_memory() -> StorageResult<Self> {
        Ok(Self::from_connection(Connection::open_in_memory()?))
    }

    fn from_connection(conn: Connection) -> Self {
        Self {
            conn: Arc::new(Mutex::new(conn)),
            changes: Arc::new(ChangeBus::new()),
        }
    }

    /// Runs `f` with the connection locked.
    pub fn with_conn<T>(
        &self,
        f: impl FnOnce(&Connection) -> StorageResult<T>,
    ) -> StorageResult<T> {
        let conn = self.conn.lock().unwrap();
        f(&conn)
    }

    /// Runs `f` inside an explicit transaction; rolls back on error.
    ///
    /// The connection lock is held for the whole unit, so no other writer
    /// can observe a partial state.
    pub fn with_transaction<T>(
        &self,
        f: impl FnOnce(&Connection) -> StorageResult<T>,
    ) -> StorageResult<T> {
        let conn = self.conn.lock().unwrap();
        conn.execute_batch("BEGIN TRANSACTION;")?;
        match f(&conn) {
            Ok(value) => {
                conn.execute_batch("COMMIT;")?;
                Ok(value)
            }
            Err(e) => {
                if let Err(rollback_err) = conn.execute_batch("ROLLBACK;") {
                    warn!("rollback failed after {e}: {rollback_err}");
                }
                Err(e)
            }
        }
    }

    /// Executes a statement batch (DDL, maintenance).
    pub fn execute_batch(&self, sql: &str) -> StorageResult<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute_batch(sql)?;
        Ok(())
    }

    /// Runs a query and returns every row as a column-name map.
    pub fn get_all(&self, sql: &str) -> StorageResult<Vec<SqlRow>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(sql)?;

        let raw_rows: Vec<Vec<DbValue>> = stmt
            .query_map([], |row| {
                let column_count = row.as_ref().column_count();
                let mut values = Vec::with_capacity(column_count);
                for i in 0..column_count {
                    values.push(row.get::<_, DbValue>(i)?);
                }
                Ok(values)
            })?
            .filter_map(|r| r.ok())
            .collect();

        // duckdb-rs only exposes column metadata once the statement has executed.
        let column_names: Vec<String> = stmt.column_names().iter().map(|s| s.to_string()).collect();

        let mut rows = Vec::with_capacity(raw_rows.len());
        for raw in raw_rows {
            let mut map = SqlRow::with_capacity(column_names.len());
            for (name, value) in column_names.iter().zip(raw) {
                map.insert(name.clone(), SqlValue::from_db(value)?);
            }
            rows.push(map);
        }
        Ok(rows)
    }

    /// The change bus for this store.
    pub fn changes(&self) -> &ChangeBus {
        &self.changes
    }

    /// Publishes a committed change. Callers invoke this after their
    /// transaction has committed, never from inside it.
    pub fn publish_change(&self, table: &str, row_ids: Vec<String>) {
        self.changes.publish(ChangeEvent::new(table, row_ids));
    }
}

/// DuckDB defaults to ~80% of system RAM and all cores; far too aggressive
/// for an embedded per-app database.
fn apply_resource_limits(conn: &Connection) -> StorageResult<()> {
    conn.execute_batch("PRAGMA memory_limit='256MB'; PRAGMA threads=2;")?;
    Ok(())
}
