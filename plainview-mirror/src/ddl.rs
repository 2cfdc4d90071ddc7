//! Mirror schema synthesis.
//!
//! Emits the encrypted table, mirror table, and indexes for each pair.
//! Everything is `IF NOT EXISTS` — safe to run on every startup.

use crate::error::{MirrorError, MirrorResult};
use crate::pairs::{MirrorPair, validate_identifier};
use plainview_store::LocalStore;

/// Ensures tables and indexes exist for every configured pair.
pub fn ensure_pairs_ddl(store: &LocalStore, pairs: &[MirrorPair]) -> MirrorResult<()> {
    for pair in pairs {
        store.execute_batch(&pair_ddl(pair)?)?;
    }
    Ok(())
}

fn pair_ddl(pair: &MirrorPair) -> MirrorResult<String> {
    let enc = &pair.encrypted_table;
    let mirror = &pair.mirror_table;

    let mut declared = String::new();
    for column in &pair.columns {
        declared.push_str(&format!("    {} {}", column.name, column.sql_type));
        if !column.nullable {
            declared.push_str(" NOT NULL");
        }
        if let Some(default) = &column.default {
            declared.push_str(&format!(" DEFAULT {default}"));
        }
        declared.push_str(",\n");
    }

    let mut ddl = format!(
        r#"
CREATE TABLE IF NOT EXISTS {enc} (
    id VARCHAR PRIMARY KEY,
    user_id VARCHAR NOT NULL,
    bucket_id VARCHAR,
    updated_at BIGINT NOT NULL,
    algorithm VARCHAR NOT NULL,
    aad VARCHAR,
    kdf_salt VARCHAR,
    nonce VARCHAR NOT NULL,
    ciphertext VARCHAR NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_{enc}_user ON {enc}(user_id);
CREATE INDEX IF NOT EXISTS idx_{enc}_bucket ON {enc}(bucket_id);
CREATE INDEX IF NOT EXISTS idx_{enc}_updated ON {enc}(updated_at);

CREATE TABLE IF NOT EXISTS {mirror} (
    id VARCHAR,
    user_id VARCHAR NOT NULL,
    bucket_id VARCHAR,
    updated_at BIGINT NOT NULL,
    stale BOOLEAN DEFAULT FALSE,
{declared}    PRIMARY KEY (id)
);
CREATE INDEX IF NOT EXISTS idx_{mirror}_user ON {mirror}(user_id);
CREATE INDEX IF NOT EXISTS idx_{mirror}_bucket ON {mirror}(bucket_id);
"#
    );

    for (name, columns) in &pair.extra_indexes {
        validate_identifier("index", name)?;
        for column in columns {
            validate_identifier("index column", column)?;
            let declared = pair.columns.iter().any(|c| &c.name == column)
                || crate::pairs::IMPLICIT_COLUMNS.contains(&column.as_str());
            if !declared {
                return Err(MirrorError::Config(format!(
                    "index {name} references unknown column {column}"
                )));
            }
        }
        ddl.push_str(&format!(
            "CREATE INDEX IF NOT EXISTS {name} ON {mirror}({});\n",
            columns.join(", ")
        ));
    }

    Ok(ddl)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pairs::MirrorColumn;

    fn pair() -> MirrorPair {
        MirrorPair::new(
            "tasks_enc",
            "tasks",
            vec![
                MirrorColumn::text("text").not_null(),
                MirrorColumn::boolean("completed").with_default("FALSE"),
            ],
        )
        .unwrap()
        .with_index("idx_tasks_completed", vec!["completed".to_string()])
    }

    #[test]
    fn ddl_is_idempotent() {
        let store = LocalStore::open_in_memory().unwrap();
        let pairs = vec![pair()];

        ensure_pairs_ddl(&store, &pairs).unwrap();
        ensure_pairs_ddl(&store, &pairs).unwrap();

        // Both tables exist and are queryable
        assert!(store.get_all("SELECT * FROM tasks_enc").unwrap().is_empty());
        assert!(store.get_all("SELECT * FROM tasks").unwrap().is_empty());
    }

    #[test]
    fn mirror_has_implicit_and_declared_columns() {
        let store = LocalStore::open_in_memory().unwrap();
        ensure_pairs_ddl(&store, &[pair()]).unwrap();

        store
            .execute_batch(
                "INSERT INTO tasks (id, user_id, bucket_id, updated_at, stale, text, completed)
                 VALUES ('r1', 'u1', NULL, 1, FALSE, 'hello', TRUE);",
            )
            .unwrap();
        let rows = store.get_all("SELECT * FROM tasks").unwrap();
        assert_eq!(rows.len(), 1);
        assert!(rows[0].contains_key("stale"));
        assert!(rows[0].contains_key("text"));
    }

    #[test]
    fn unknown_index_column_is_rejected() {
        let store = LocalStore::open_in_memory().unwrap();
        let bad = MirrorPair::new("a_enc", "a", vec![MirrorColumn::text("x")])
            .unwrap()
            .with_index("idx_a_bad", vec!["missing".to_string()]);
        assert!(matches!(
            ensure_pairs_ddl(&store, &[bad]),
            Err(MirrorError::Config(_))
        ));
    }
}
