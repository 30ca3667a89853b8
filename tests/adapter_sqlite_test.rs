//! Integration tests for the SQLite adapter.
//!
//! Tests verify that:
//! - Connecting bootstraps the prefixed tables, idempotently
//! - Statements run with bound parameters and rows are buffered
//! - Transactions commit, roll back and are reset by `reset_session`
//! - Scripts run as a unit

#![cfg(feature = "sqlite")]

use dbpool::db::{Adapter, DbAdapter, verify_connection};
use dbpool::error::DbError;
use dbpool::models::{AdapterConfig, Dialect, QueryParam, Record};
use rand::Rng;
use rand::distributions::Alphanumeric;
use serde_json::Value as JsonValue;
use tempfile::TempDir;

fn random_prefix() -> String {
    let body: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(6)
        .map(char::from)
        .collect();
    format!("p{}_", body)
}

fn new_adapter(dir: &TempDir, id: u64, prefix: &str) -> DbAdapter {
    let config = AdapterConfig::sqlite(dir.path().join("adapter.db")).with_prefix(prefix);
    DbAdapter::new(id, Dialect::Sqlite, config).unwrap()
}

/// Integers may come back as numbers or text depending on the column type.
fn int_field(record: &Record, key: &str) -> i64 {
    match record.get(key) {
        Some(JsonValue::Number(n)) => n.as_i64().unwrap(),
        Some(JsonValue::String(s)) => s.parse().unwrap(),
        other => panic!("expected integer in '{}', got {:?}", key, other),
    }
}

async fn count(adapter: &mut DbAdapter, table: &str) -> i64 {
    adapter
        .execute(&format!("SELECT COUNT(*) AS n FROM {}", table), &[])
        .await
        .unwrap();
    let row = adapter.fetch_one().unwrap().unwrap();
    int_field(&row, "n")
}

async fn table_names(adapter: &mut DbAdapter) -> Vec<String> {
    adapter
        .execute(
            "SELECT name FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%' ORDER BY name",
            &[],
        )
        .await
        .unwrap();
    adapter
        .fetch_all()
        .unwrap()
        .into_iter()
        .map(|r| r["name"].as_str().unwrap().to_string())
        .collect()
}

#[tokio::test]
async fn test_connect_bootstraps_prefixed_tables() {
    let dir = TempDir::new().unwrap();
    let mut adapter = new_adapter(&dir, 1, "t_");

    adapter.connect().await.unwrap();
    assert!(adapter.is_connected());

    assert_eq!(
        table_names(&mut adapter).await,
        vec!["t_options", "t_usermeta", "t_users"]
    );
    adapter.disconnect().await.unwrap();
}

#[tokio::test]
async fn test_bootstrap_is_idempotent() {
    let dir = TempDir::new().unwrap();
    let mut first = new_adapter(&dir, 1, "t_");
    first.connect().await.unwrap();
    first.bootstrap_schema().await.unwrap();
    first.bootstrap_schema().await.unwrap();

    // A second adapter on the same file bootstraps over existing tables
    let mut second = new_adapter(&dir, 2, "t_");
    second.connect().await.unwrap();
    assert_eq!(table_names(&mut second).await.len(), 3);

    first.disconnect().await.unwrap();
    second.disconnect().await.unwrap();
}

#[tokio::test]
async fn test_random_prefix_is_applied() {
    let dir = TempDir::new().unwrap();
    let prefix = random_prefix();
    let mut adapter = new_adapter(&dir, 1, &prefix);
    adapter.connect().await.unwrap();

    let names = table_names(&mut adapter).await;
    assert_eq!(names.len(), 3);
    assert!(names.iter().all(|n| n.starts_with(&prefix)));
    adapter.disconnect().await.unwrap();
}

#[tokio::test]
async fn test_execute_connects_on_demand() {
    let dir = TempDir::new().unwrap();
    let mut adapter = new_adapter(&dir, 1, "t_");
    assert!(!adapter.is_connected());

    adapter.execute("SELECT 1 AS one", &[]).await.unwrap();
    assert!(adapter.is_connected());

    let row = adapter.fetch_one().unwrap().unwrap();
    assert_eq!(int_field(&row, "one"), 1);
    assert!(adapter.fetch_one().unwrap().is_none());
    adapter.disconnect().await.unwrap();
}

#[tokio::test]
async fn test_fetch_after_disconnect_is_illegal() {
    let dir = TempDir::new().unwrap();
    let mut adapter = new_adapter(&dir, 1, "t_");
    adapter.connect().await.unwrap();
    adapter.disconnect().await.unwrap();
    // Disconnecting twice is a no-op
    adapter.disconnect().await.unwrap();

    assert!(!adapter.is_connected());
    assert!(matches!(
        adapter.fetch_all(),
        Err(DbError::IllegalState { .. })
    ));
}

#[tokio::test]
async fn test_parameters_and_buffered_rows() {
    let dir = TempDir::new().unwrap();
    let mut adapter = new_adapter(&dir, 1, "t_");

    for (uid, name, active) in [(1, "alice", true), (2, "bob", false), (3, "carol", true)] {
        let affected = adapter
            .execute(
                "INSERT INTO t_users (uid, name, mail, isActive) VALUES (?, ?, ?, ?)",
                &[
                    QueryParam::Int(uid),
                    name.into(),
                    QueryParam::Null,
                    QueryParam::Int(active as i64),
                ],
            )
            .await
            .unwrap();
        assert_eq!(affected, 1);
        assert_eq!(adapter.rows_affected(), Some(1));
    }

    adapter
        .execute(
            "SELECT uid, name, mail, \"group\" FROM t_users WHERE isActive = ? ORDER BY uid",
            &[QueryParam::Int(1)],
        )
        .await
        .unwrap();

    let first = adapter.fetch_one().unwrap().unwrap();
    assert_eq!(int_field(&first, "uid"), 1);
    assert_eq!(first["name"], "alice");
    assert!(first["mail"].is_null());
    assert_eq!(first["group"], "visitor");

    let rest = adapter.fetch_all().unwrap();
    assert_eq!(rest.len(), 1);
    assert_eq!(rest[0]["name"], "carol");
    assert!(adapter.fetch_all().unwrap().is_empty());
    adapter.disconnect().await.unwrap();
}

#[tokio::test]
async fn test_options_unique_name_user() {
    let dir = TempDir::new().unwrap();
    let mut adapter = new_adapter(&dir, 1, "t_");

    adapter
        .execute(
            "INSERT INTO t_options (name, value) VALUES (?, ?)",
            &["theme".into(), "dark".into()],
        )
        .await
        .unwrap();

    let err = adapter
        .execute(
            "INSERT INTO t_options (name, value) VALUES (?, ?)",
            &["theme".into(), "light".into()],
        )
        .await
        .unwrap_err();
    assert!(matches!(err, DbError::Query { .. }));
    // A failed statement leaves an empty cursor
    assert!(adapter.fetch_one().unwrap().is_none());

    // Same name for another user is allowed
    adapter
        .execute(
            "INSERT INTO t_options (name, \"user\", value) VALUES (?, ?, ?)",
            &["theme".into(), QueryParam::Int(7), "light".into()],
        )
        .await
        .unwrap();
    assert_eq!(count(&mut adapter, "t_options").await, 2);
    adapter.disconnect().await.unwrap();
}

#[tokio::test]
async fn test_usermeta_cascades_on_user_delete() {
    let dir = TempDir::new().unwrap();
    let mut adapter = new_adapter(&dir, 1, "t_");

    adapter
        .execute("INSERT INTO t_users (uid, name) VALUES (1, 'alice')", &[])
        .await
        .unwrap();
    adapter
        .execute(
            "INSERT INTO t_usermeta (user_id, meta_key, meta_value) VALUES (?, ?, ?)",
            &[QueryParam::Int(1), "nickname".into(), "al".into()],
        )
        .await
        .unwrap();
    assert_eq!(count(&mut adapter, "t_usermeta").await, 1);

    adapter
        .execute("DELETE FROM t_users WHERE uid = 1", &[])
        .await
        .unwrap();
    assert_eq!(count(&mut adapter, "t_usermeta").await, 0);
    adapter.disconnect().await.unwrap();
}

#[tokio::test]
async fn test_rollback_discards_changes() {
    let dir = TempDir::new().unwrap();
    let mut adapter = new_adapter(&dir, 1, "t_");

    adapter.begin_transaction().await.unwrap();
    assert!(adapter.in_transaction());
    // Beginning twice is a no-op
    adapter.begin_transaction().await.unwrap();

    adapter
        .execute("INSERT INTO t_users (uid, name) VALUES (1, 'alice')", &[])
        .await
        .unwrap();
    adapter.rollback().await.unwrap();
    assert!(!adapter.in_transaction());

    assert_eq!(count(&mut adapter, "t_users").await, 0);
    adapter.disconnect().await.unwrap();
}

#[tokio::test]
async fn test_commit_is_visible_to_other_connections() {
    let dir = TempDir::new().unwrap();
    let mut writer = new_adapter(&dir, 1, "t_");
    let mut reader = new_adapter(&dir, 2, "t_");

    writer.begin_transaction().await.unwrap();
    writer
        .execute("INSERT INTO t_users (uid, name) VALUES (1, 'alice')", &[])
        .await
        .unwrap();
    writer.commit().await.unwrap();

    assert_eq!(count(&mut reader, "t_users").await, 1);

    // Commit and rollback outside a transaction are no-ops
    writer.commit().await.unwrap();
    writer.rollback().await.unwrap();

    writer.disconnect().await.unwrap();
    reader.disconnect().await.unwrap();
}

#[tokio::test]
async fn test_transaction_statements_are_tracked() {
    let dir = TempDir::new().unwrap();
    let mut adapter = new_adapter(&dir, 1, "t_");

    adapter.execute("BEGIN", &[]).await.unwrap();
    assert!(adapter.in_transaction());
    adapter
        .execute("INSERT INTO t_users (uid, name) VALUES (1, 'alice')", &[])
        .await
        .unwrap();
    adapter.execute("COMMIT", &[]).await.unwrap();
    assert!(!adapter.in_transaction());

    assert_eq!(count(&mut adapter, "t_users").await, 1);
    adapter.disconnect().await.unwrap();
}

#[tokio::test]
async fn test_reset_session_rolls_back_open_transaction() {
    let dir = TempDir::new().unwrap();
    let mut adapter = new_adapter(&dir, 1, "t_");

    adapter.begin_transaction().await.unwrap();
    adapter
        .execute("INSERT INTO t_users (uid, name) VALUES (1, 'alice')", &[])
        .await
        .unwrap();
    adapter.execute("SELECT uid FROM t_users", &[]).await.unwrap();

    adapter.reset_session().await.unwrap();
    assert!(!adapter.in_transaction());
    assert!(adapter.fetch_one().unwrap().is_none());
    assert_eq!(count(&mut adapter, "t_users").await, 0);

    // Resetting a clean session is harmless
    adapter.reset_session().await.unwrap();
    adapter.disconnect().await.unwrap();
}

#[tokio::test]
async fn test_commit_ends_savepoint_transaction() {
    let dir = TempDir::new().unwrap();
    let mut writer = new_adapter(&dir, 1, "t_");
    let mut reader = new_adapter(&dir, 2, "t_");

    // A savepoint outside a transaction opens one without setting the flag
    writer.execute("SAVEPOINT sp", &[]).await.unwrap();
    writer
        .execute("INSERT INTO t_users (uid, name) VALUES (1, 'alice')", &[])
        .await
        .unwrap();
    assert!(!writer.in_transaction());

    writer.commit().await.unwrap();
    writer.reset_session().await.unwrap();
    assert_eq!(count(&mut reader, "t_users").await, 1);

    writer.disconnect().await.unwrap();
    reader.disconnect().await.unwrap();
}

#[tokio::test]
async fn test_reset_session_discards_savepoint_transaction() {
    let dir = TempDir::new().unwrap();
    let mut writer = new_adapter(&dir, 1, "t_");
    let mut reader = new_adapter(&dir, 2, "t_");

    writer.execute("SAVEPOINT sp", &[]).await.unwrap();
    writer
        .execute("INSERT INTO t_users (uid, name) VALUES (1, 'alice')", &[])
        .await
        .unwrap();

    writer.reset_session().await.unwrap();
    assert_eq!(count(&mut writer, "t_users").await, 0);
    assert_eq!(count(&mut reader, "t_users").await, 0);

    // Rolling back an untracked savepoint transaction works too
    writer.execute("SAVEPOINT sp", &[]).await.unwrap();
    writer
        .execute("INSERT INTO t_users (uid, name) VALUES (2, 'bob')", &[])
        .await
        .unwrap();
    writer.rollback().await.unwrap();
    assert_eq!(count(&mut reader, "t_users").await, 0);

    writer.disconnect().await.unwrap();
    reader.disconnect().await.unwrap();
}

#[tokio::test]
async fn test_execute_script() {
    let dir = TempDir::new().unwrap();
    let mut adapter = new_adapter(&dir, 1, "t_");

    adapter
        .execute_script(
            "CREATE TABLE notes (id INTEGER PRIMARY KEY, body TEXT);
             INSERT INTO notes (body) VALUES ('one');
             INSERT INTO notes (body) VALUES ('two');",
        )
        .await
        .unwrap();
    assert_eq!(count(&mut adapter, "notes").await, 2);

    let err = adapter
        .execute_script("INSERT INTO notes (body) VALUES ('three'); INSERT INTO missing VALUES (1);")
        .await
        .unwrap_err();
    assert!(matches!(err, DbError::Query { .. }));
    assert!(!adapter.in_transaction());
    adapter.disconnect().await.unwrap();
}

#[tokio::test]
async fn test_ping() {
    let dir = TempDir::new().unwrap();
    let mut adapter = new_adapter(&dir, 1, "t_");
    assert!(matches!(
        adapter.ping().await,
        Err(DbError::IllegalState { .. })
    ));

    adapter.connect().await.unwrap();
    adapter.execute("SELECT 42 AS answer", &[]).await.unwrap();
    adapter.ping().await.unwrap();

    // The probe leaves the cursor alone
    let row = adapter.fetch_one().unwrap().unwrap();
    assert_eq!(int_field(&row, "answer"), 42);
    adapter.disconnect().await.unwrap();
}

#[tokio::test]
async fn test_creates_missing_parent_directory() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("nested").join("deeper").join("app.db");
    let mut adapter =
        DbAdapter::new(1, Dialect::Sqlite, AdapterConfig::sqlite(&path)).unwrap();

    adapter.connect().await.unwrap();
    assert!(path.exists());
    adapter.disconnect().await.unwrap();
}

#[tokio::test]
async fn test_verify_connection() {
    let dir = TempDir::new().unwrap();
    let config = AdapterConfig::sqlite(dir.path().join("verify.db"));
    verify_connection(Dialect::Sqlite, &config).await.unwrap();

    let err = verify_connection(Dialect::MySql, &AdapterConfig::default())
        .await
        .unwrap_err();
    assert!(matches!(err, DbError::Configuration { .. }));
}
