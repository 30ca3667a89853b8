//! Integration tests for the pool registry.

#![cfg(feature = "sqlite")]

use dbpool::config::PoolOptions;
use dbpool::db::{Adapter, Registry};
use dbpool::error::{DbError, DbResult};
use dbpool::models::{AdapterConfig, Dialect};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

fn small_pool() -> PoolOptions {
    PoolOptions {
        pool_size: Some(2),
        max_idle_secs: None,
    }
}

async fn register_sqlite(registry: &Registry, dir: &TempDir, name: &str) -> DbResult<()> {
    let config = AdapterConfig::sqlite(dir.path().join(format!("{}.db", name))).with_prefix("t_");
    registry
        .register(name, Dialect::Sqlite, config, &small_pool())
        .await
}

#[tokio::test]
async fn test_default_registration_executes_without_connect() {
    let dir = TempDir::new().unwrap();
    let registry = Registry::new();
    register_sqlite(&registry, &dir, "default").await.unwrap();
    assert_eq!(registry.default_name().await.as_deref(), Some("default"));

    let mut adapter = registry.get(None).await.unwrap();
    adapter.execute("SELECT 1", &[]).await.unwrap();
    registry.put(adapter, None).await;

    registry.close_all().await;
}

#[tokio::test]
async fn test_unknown_database() {
    let dir = TempDir::new().unwrap();
    let registry = Registry::new();
    register_sqlite(&registry, &dir, "main").await.unwrap();

    let result = registry.get(Some("unregistered")).await;
    assert!(matches!(result, Err(DbError::UnknownDatabase { .. })));
    registry.close_all().await;
}

#[tokio::test]
async fn test_first_registration_is_default() {
    let dir = TempDir::new().unwrap();
    let registry = Registry::new();
    register_sqlite(&registry, &dir, "first").await.unwrap();
    register_sqlite(&registry, &dir, "second").await.unwrap();

    assert_eq!(registry.default_name().await.as_deref(), Some("first"));
    assert_eq!(registry.names().await, vec!["first", "second"]);

    registry.set_default("second").await.unwrap();
    let adapter = registry.get(None).await.unwrap();
    let status = registry.status().await;
    assert_eq!(status[1].name, "second");
    assert_eq!(status[1].checked_out(), 1);
    assert_eq!(status[0].checked_out(), 0);
    registry.put(adapter, Some("second")).await;

    registry.close_all().await;
}

#[tokio::test]
async fn test_duplicate_registration_fails() {
    let dir = TempDir::new().unwrap();
    let registry = Registry::new();
    register_sqlite(&registry, &dir, "main").await.unwrap();

    let result = register_sqlite(&registry, &dir, "main").await;
    assert!(matches!(
        result,
        Err(DbError::DatabaseAlreadyRegistered { .. })
    ));

    // The original pool is untouched
    let status = registry.status().await;
    assert_eq!(status.len(), 1);
    assert_eq!(status[0].idle, 2);
    registry.close_all().await;
}

#[tokio::test]
async fn test_close_then_register_again() {
    let dir = TempDir::new().unwrap();
    let registry = Registry::new();
    register_sqlite(&registry, &dir, "main").await.unwrap();

    let pool = registry.pool(Some("main")).await.unwrap();
    registry.close("main").await.unwrap();
    assert!(pool.is_closed());
    assert!(registry.default_name().await.is_none());
    assert!(matches!(
        registry.get(None).await,
        Err(DbError::UnknownDatabase { .. })
    ));

    register_sqlite(&registry, &dir, "main").await.unwrap();
    assert_eq!(registry.default_name().await.as_deref(), Some("main"));
    registry.close_all().await;
}

#[tokio::test]
async fn test_put_unknown_name_drops_adapter() {
    let dir = TempDir::new().unwrap();
    let registry = Registry::new();
    register_sqlite(&registry, &dir, "main").await.unwrap();

    let adapter = registry.get(None).await.unwrap();
    registry.put(adapter, Some("elsewhere")).await;

    let status = registry.status().await;
    assert_eq!(status[0].idle, 1);
    registry.close_all().await;
}

#[tokio::test]
async fn test_close_all_clears_everything() {
    let dir = TempDir::new().unwrap();
    let registry = Registry::new();
    register_sqlite(&registry, &dir, "a").await.unwrap();
    register_sqlite(&registry, &dir, "b").await.unwrap();

    let pool = registry.pool(Some("a")).await.unwrap();
    registry.close_all().await;

    assert!(pool.is_closed());
    assert_eq!(pool.live_count(), 0);
    assert!(registry.names().await.is_empty());
    assert!(registry.default_name().await.is_none());
    assert!(matches!(
        registry.get(Some("a")).await,
        Err(DbError::UnknownDatabase { .. })
    ));
}

#[tokio::test]
async fn test_acquire_guard() {
    let dir = TempDir::new().unwrap();
    let registry = Registry::new();
    register_sqlite(&registry, &dir, "main").await.unwrap();

    let mut guard = registry.acquire(None).await.unwrap();
    guard
        .execute(
            "INSERT INTO t_options (name, value) VALUES (?, ?)",
            &["site".into(), "example".into()],
        )
        .await
        .unwrap();
    assert_eq!(registry.status().await[0].checked_out(), 1);
    guard.release().await;
    assert_eq!(registry.status().await[0].checked_out(), 0);

    {
        let mut guard = registry.acquire(Some("main")).await.unwrap();
        guard
            .execute("SELECT value FROM t_options WHERE name = ?", &["site".into()])
            .await
            .unwrap();
        let row = guard.fetch_one().unwrap().unwrap();
        assert_eq!(row["value"], "example");
    }
    assert_eq!(registry.status().await[0].checked_out(), 0);

    registry.close_all().await;
}

#[tokio::test]
async fn test_reaper_evicts_stale_adapters() {
    let dir = TempDir::new().unwrap();
    let registry = Arc::new(Registry::new());
    let config = AdapterConfig::sqlite(dir.path().join("reaped.db"));
    let options = PoolOptions {
        pool_size: Some(2),
        max_idle_secs: Some(1),
    };
    registry
        .register("reaped", Dialect::Sqlite, config, &options)
        .await
        .unwrap();
    assert_eq!(registry.status().await[0].idle, 2);

    registry.start_reaper(Duration::from_millis(200));
    tokio::time::sleep(Duration::from_millis(1800)).await;

    let status = registry.status().await;
    assert_eq!(status[0].idle, 0);
    assert_eq!(status[0].live, 0);
    assert_eq!(status[0].disposed, 2);

    // The pool grows back on demand
    let adapter = registry.get(None).await.unwrap();
    registry.put(adapter, None).await;
    assert_eq!(registry.status().await[0].idle, 1);

    registry.close_all().await;
}

#[tokio::test]
async fn test_concurrent_register_same_name() {
    let dir = TempDir::new().unwrap();
    let registry = Arc::new(Registry::new());
    let path = dir.path().join("race.db");

    let handles: Vec<_> = (0..2)
        .map(|_| {
            let registry = Arc::clone(&registry);
            let config = AdapterConfig::sqlite(&path);
            tokio::spawn(async move {
                registry
                    .register("race", Dialect::Sqlite, config, &small_pool())
                    .await
            })
        })
        .collect();

    let mut ok = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(()) => ok += 1,
            Err(e) => assert!(matches!(e, DbError::DatabaseAlreadyRegistered { .. })),
        }
    }
    assert_eq!(ok, 1);
    assert_eq!(registry.names().await, vec!["race"]);
    registry.close_all().await;
}
