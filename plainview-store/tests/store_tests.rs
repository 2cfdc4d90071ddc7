use plainview_store::{LocalStore, SqlValue, StorageError};
use tempfile::TempDir;

#[test]
fn open_creates_database_file() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("plainview.db");
    let store = LocalStore::open(&path).unwrap();

    store
        .execute_batch("CREATE TABLE t (id VARCHAR PRIMARY KEY, n BIGINT);")
        .unwrap();
    drop(store);
    assert!(path.exists());
}

#[test]
fn get_all_returns_typed_row_maps() {
    let store = LocalStore::open_in_memory().unwrap();
    store
        .execute_batch(
            "CREATE TABLE t (id VARCHAR, n BIGINT, flag BOOLEAN, score DOUBLE, note VARCHAR);
             INSERT INTO t VALUES ('a', 7, TRUE, 1.5, NULL);",
        )
        .unwrap();

    let rows = store.get_all("SELECT * FROM t").unwrap();
    assert_eq!(rows.len(), 1);

    let row = &rows[0];
    assert_eq!(row["id"], SqlValue::Text("a".to_string()));
    assert_eq!(row["n"], SqlValue::Integer(7));
    assert_eq!(row["flag"], SqlValue::Boolean(true));
    assert_eq!(row["score"], SqlValue::Real(1.5));
    assert_eq!(row["note"], SqlValue::Null);
}

#[test]
fn transaction_rolls_back_on_error() {
    let store = LocalStore::open_in_memory().unwrap();
    store
        .execute_batch("CREATE TABLE t (id VARCHAR PRIMARY KEY);")
        .unwrap();

    let result: Result<(), _> = store.with_transaction(|conn| {
        conn.execute("INSERT INTO t VALUES ('a')", [])?;
        Err(StorageError::Other("boom".to_string()))
    });
    assert!(result.is_err());

    let rows = store.get_all("SELECT * FROM t").unwrap();
    assert!(rows.is_empty(), "insert must not survive the rollback");
}

#[test]
fn transaction_commits_all_writes() {
    let store = LocalStore::open_in_memory().unwrap();
    store
        .execute_batch("CREATE TABLE t (id VARCHAR PRIMARY KEY);")
        .unwrap();

    store
        .with_transaction(|conn| {
            conn.execute("INSERT INTO t VALUES ('a')", [])?;
            conn.execute("INSERT INTO t VALUES ('b')", [])?;
            Ok(())
        })
        .unwrap();

    assert_eq!(store.get_all("SELECT * FROM t").unwrap().len(), 2);
}

#[test]
fn text_literal_escapes_quotes() {
    assert_eq!(
        SqlValue::Text("it's".to_string()).to_literal(),
        "'it''s'"
    );
    assert_eq!(SqlValue::Null.to_literal(), "NULL");
    assert_eq!(SqlValue::Boolean(false).to_literal(), "FALSE");
}

#[tokio::test]
async fn change_events_reach_subscribers() {
    let store = LocalStore::open_in_memory().unwrap();
    let mut rx = store.changes().subscribe();

    store.publish_change("tasks_enc", vec!["r1".to_string(), "r2".to_string()]);

    let event = rx.recv().await.unwrap();
    assert_eq!(event.table, "tasks_enc");
    assert_eq!(event.row_ids.len(), 2);
}

#[test]
fn clones_share_one_connection() {
    let store = LocalStore::open_in_memory().unwrap();
    store
        .execute_batch("CREATE TABLE t (id VARCHAR PRIMARY KEY);")
        .unwrap();

    let clone = store.clone();
    clone
        .with_conn(|conn| {
            conn.execute("INSERT INTO t VALUES ('a')", [])?;
            Ok(())
        })
        .unwrap();

    assert_eq!(store.get_all("SELECT * FROM t").unwrap().len(), 1);
}
