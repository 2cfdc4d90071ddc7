//! Plaintext queries against mirror tables.
//!
//! Queries never touch the encrypted side; they read the declared and
//! implicit columns of the mirror table directly.

use crate::error::{MirrorError, MirrorResult};
use crate::pairs::{IMPLICIT_COLUMNS, MirrorPair};
use plainview_store::{LocalStore, SqlRow, SqlValue};

/// Sort direction for [`MirrorQuery::order_by`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SortOrder {
    Ascending,
    Descending,
}

/// Declarative mirror-table query: equality filters, one sort column, and
/// an optional limit. Stale rows are returned by default so callers can
/// render them greyed out; `exclude_stale` drops them instead.
#[derive(Clone, Default)]
pub struct MirrorQuery {
    filters: Vec<(String, SqlValue)>,
    order_by: Option<(String, SortOrder)>,
    limit: Option<usize>,
    exclude_stale: bool,
}

impl MirrorQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn filter(mut self, column: impl Into<String>, value: SqlValue) -> Self {
        self.filters.push((column.into(), value));
        self
    }

    pub fn order_by(mut self, column: impl Into<String>, order: SortOrder) -> Self {
        self.order_by = Some((column.into(), order));
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn exclude_stale(mut self) -> Self {
        self.exclude_stale = true;
        self
    }
}

/// Runs a query against a pair's mirror table.
pub fn query_mirror(
    store: &LocalStore,
    pair: &MirrorPair,
    query: &MirrorQuery,
) -> MirrorResult<Vec<SqlRow>> {
    let mut predicates = Vec::new();
    for (column, value) in &query.filters {
        check_column(pair, column)?;
        if matches!(value, SqlValue::Null) {
            predicates.push(format!("{column} IS NULL"));
        } else {
            predicates.push(format!("{column} = {}", value.to_literal()));
        }
    }
    if query.exclude_stale {
        predicates.push("stale = FALSE".to_string());
    }

    let mut sql = format!("SELECT * FROM {}", pair.mirror_table);
    if !predicates.is_empty() {
        sql.push_str(" WHERE ");
        sql.push_str(&predicates.join(" AND "));
    }
    if let Some((column, order)) = &query.order_by {
        check_column(pair, column)?;
        let direction = match order {
            SortOrder::Ascending => "ASC",
            SortOrder::Descending => "DESC",
        };
        sql.push_str(&format!(" ORDER BY {column} {direction}"));
    }
    if let Some(limit) = query.limit {
        sql.push_str(&format!(" LIMIT {limit}"));
    }

    Ok(store.get_all(&sql)?)
}

/// Only columns that actually exist on the mirror table may appear in a
/// query; anything else is a configuration error, not a SQL error.
fn check_column(pair: &MirrorPair, column: &str) -> MirrorResult<()> {
    let known = IMPLICIT_COLUMNS.contains(&column)
        || pair.columns.iter().any(|c| c.name == column);
    if known {
        Ok(())
    } else {
        Err(MirrorError::Config(format!(
            "unknown query column {column} for table {}",
            pair.mirror_table
        )))
    }
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
                MirrorColumn::text("text"),
                MirrorColumn::boolean("completed"),
            ],
        )
        .unwrap()
    }

    #[test]
    fn unknown_filter_column_is_rejected() {
        let store = LocalStore::open_in_memory().unwrap();
        let query = MirrorQuery::new().filter("nope", SqlValue::Null);
        assert!(matches!(
            query_mirror(&store, &pair(), &query),
            Err(MirrorError::Config(_))
        ));
    }

    #[test]
    fn filters_and_order_compose() {
        let store = LocalStore::open_in_memory().unwrap();
        crate::ddl::ensure_pairs_ddl(&store, &[pair()]).unwrap();
        store
            .execute_batch(
                "INSERT INTO tasks (id, user_id, updated_at, stale, text, completed) VALUES
                 ('a', 'u1', 1, FALSE, 'one', FALSE),
                 ('b', 'u1', 2, FALSE, 'two', TRUE),
                 ('c', 'u2', 3, TRUE, 'three', TRUE);",
            )
            .unwrap();

        let query = MirrorQuery::new()
            .filter("user_id", SqlValue::Text("u1".to_string()))
            .order_by("updated_at", SortOrder::Descending);
        let rows = query_mirror(&store, &pair(), &query).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0]["id"].as_str(), Some("b"));

        let rows = query_mirror(
            &store,
            &pair(),
            &MirrorQuery::new().filter("completed", SqlValue::Boolean(true)).exclude_stale(),
        )
        .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["id"].as_str(), Some("b"));
    }
}
