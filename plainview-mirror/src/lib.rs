//! Encrypted-table to plaintext-mirror synchronization engine.
//!
//! Each configured [`MirrorPair`] binds an encrypted table (ciphertext rows
//! in flat envelope columns) to a mirror table whose declared plaintext
//! columns support ordinary SQL queries. Writes go through [`MirrorWriter`],
//! which encrypts and projects atomically; the background synchronizer
//! started by [`start_encrypted_mirrors`] repairs mirror rows when change
//! events arrive, marking rows it cannot decrypt as stale rather than
//! dropping them.

pub mod ddl;
pub mod error;
pub mod pairs;
pub mod query;
pub mod synchronizer;
pub mod writer;

pub use ddl::ensure_pairs_ddl;
pub use error::{MirrorError, MirrorResult};
pub use pairs::{IMPLICIT_COLUMNS, MirrorColumn, MirrorPair, ProjectFn, SerializeFn};
pub use query::{MirrorQuery, SortOrder, query_mirror};
pub use synchronizer::{MirrorHandle, RebuildStats, rebuild_mirror, start_encrypted_mirrors};
pub use writer::{MirrorWriter, NoopSyncDelegate, SyncDelegate};
