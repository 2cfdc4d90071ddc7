//! DuckDB storage layer for Plainview.
//!
//! One shared connection per database, explicit transactions, and a
//! post-commit change bus. Encrypted tables and their plaintext mirrors
//! live in the same database so a single transaction can cover both.

mod changes;
mod error;
mod store;

pub use changes::{ChangeBus, ChangeEvent};
pub use error::{StorageError, StorageResult};
pub use store::{LocalStore, SqlRow, SqlValue};
