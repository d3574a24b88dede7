//! Integration tests for transaction scope functionality.

use rowbind::config::ConnectionConfig;
use rowbind::{Command, CommandExecutor, DbPool, MapError, ScopeRegistry, SqlValue};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tempfile::NamedTempFile;
use tokio::time::sleep;

/// Create a file-backed SQLite executor with an empty table.
async fn setup() -> (CommandExecutor, ScopeRegistry) {
    let temp_file = NamedTempFile::new().unwrap();
    // Keep the temp file alive - prevent deletion when function returns
    let db_path = temp_file
        .into_temp_path()
        .keep()
        .unwrap()
        .to_str()
        .unwrap()
        .to_string();

    let config = ConnectionConfig::new("main", format!("sqlite:{}", db_path));
    let pool = DbPool::connect(&config).await.unwrap();
    let registry = ScopeRegistry::new();
    let executor = CommandExecutor::new(pool, "main", registry.clone());

    executor
        .non_query(&Command::new(
            "CREATE TABLE tx_test (id INTEGER PRIMARY KEY, name TEXT)",
        ))
        .await
        .expect("Failed to create test table");

    (executor, registry)
}

fn insert_command(id: i64, name: &str) -> Command {
    Command::new("INSERT INTO tx_test (id, name) VALUES (@id, @name)")
        .value("@id", SqlValue::Int(id))
        .value("@name", SqlValue::Text(name.into()))
}

async fn count_rows(executor: &CommandExecutor) -> i64 {
    match executor
        .scalar(&Command::new("SELECT COUNT(*) FROM tx_test"))
        .await
        .unwrap()
    {
        SqlValue::Int(n) => n,
        other => panic!("unexpected count value: {:?}", other),
    }
}

#[tokio::test]
async fn test_completed_root_scope_commits() {
    let (executor, registry) = setup().await;

    let mut scope = registry.begin(executor.pool(), "main").await.unwrap();
    assert!(scope.is_root());
    assert!(registry.is_active("main").await);

    executor.non_query(&insert_command(1, "kept")).await.unwrap();

    scope.complete();
    scope.finish().await.unwrap();

    assert!(!registry.is_active("main").await);
    assert_eq!(count_rows(&executor).await, 1);
}

#[tokio::test]
async fn test_root_scope_without_complete_rolls_back() {
    let (executor, registry) = setup().await;

    let scope = registry.begin(executor.pool(), "main").await.unwrap();
    executor
        .non_query(&insert_command(1, "discarded"))
        .await
        .unwrap();

    // No complete() call
    scope.finish().await.unwrap();

    assert!(!registry.is_active("main").await);
    assert_eq!(count_rows(&executor).await, 0);
}

#[tokio::test]
async fn test_nested_scopes_share_one_transaction() {
    let (executor, registry) = setup().await;

    let mut outer = registry.begin(executor.pool(), "main").await.unwrap();
    let inner = registry.begin(executor.pool(), "main").await.unwrap();

    assert!(outer.is_root());
    assert!(!inner.is_root());
    assert_eq!(registry.count().await, 1);

    executor.non_query(&insert_command(1, "a")).await.unwrap();

    // Inner finish without complete() leaves the outer transaction intact
    inner.finish().await.unwrap();
    assert!(registry.is_active("main").await);

    executor.non_query(&insert_command(2, "b")).await.unwrap();

    outer.complete();
    outer.finish().await.unwrap();

    assert_eq!(count_rows(&executor).await, 2);
}

#[tokio::test]
async fn test_dropped_nested_scope_does_not_wedge_root() {
    let (executor, registry) = setup().await;

    let mut root = registry.begin(executor.pool(), "main").await.unwrap();
    {
        let nested = registry.begin(executor.pool(), "main").await.unwrap();
        assert!(!nested.is_root());
        // Dropped without finish(), as on an early return
    }
    // The depth release runs on a spawned task
    sleep(Duration::from_millis(50)).await;

    executor.non_query(&insert_command(1, "kept")).await.unwrap();
    root.complete();
    root.finish().await.unwrap();

    assert!(!registry.is_active("main").await);
    assert_eq!(count_rows(&executor).await, 1);
}

#[tokio::test]
async fn test_root_finish_with_open_nested_scope_fails_then_abandons() {
    let (executor, registry) = setup().await;

    let rollbacks = Arc::new(AtomicUsize::new(0));
    {
        let rollbacks = Arc::clone(&rollbacks);
        registry.on_rollback(move |_| {
            rollbacks.fetch_add(1, Ordering::SeqCst);
        });
    }

    let mut outer = registry.begin(executor.pool(), "main").await.unwrap();
    let inner = registry.begin(executor.pool(), "main").await.unwrap();

    outer.complete();
    let err = outer.finish().await.unwrap_err();
    assert!(matches!(err, MapError::TransactionState { .. }));

    // The consumed root is unfinished, so its drop hands the transaction to
    // the best-effort rollback path instead of leaking it
    sleep(Duration::from_millis(50)).await;
    assert!(!registry.is_active("main").await);
    assert_eq!(rollbacks.load(Ordering::SeqCst), 1);

    drop(inner);
}

#[tokio::test]
async fn test_writes_in_scope_are_read_back_in_scope() {
    let (executor, registry) = setup().await;

    let mut scope = registry.begin(executor.pool(), "main").await.unwrap();
    executor.non_query(&insert_command(7, "visible")).await.unwrap();

    // Queries on the same connection name route into the open transaction
    let rows = executor
        .query(
            &Command::new("SELECT name FROM tx_test WHERE id = @id")
                .value("@id", SqlValue::Int(7)),
        )
        .await
        .unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].get("name"), Some(&SqlValue::Text("visible".into())));

    scope.complete();
    scope.finish().await.unwrap();
}

#[tokio::test]
async fn test_commit_and_rollback_callbacks_fire() {
    let (executor, registry) = setup().await;

    let commits = Arc::new(AtomicUsize::new(0));
    let rollbacks = Arc::new(AtomicUsize::new(0));
    {
        let commits = Arc::clone(&commits);
        registry.on_commit(move |name| {
            assert_eq!(name, "main");
            commits.fetch_add(1, Ordering::SeqCst);
        });
        let rollbacks = Arc::clone(&rollbacks);
        registry.on_rollback(move |name| {
            assert_eq!(name, "main");
            rollbacks.fetch_add(1, Ordering::SeqCst);
        });
    }

    let mut scope = registry.begin(executor.pool(), "main").await.unwrap();
    scope.complete();
    scope.finish().await.unwrap();
    assert_eq!(commits.load(Ordering::SeqCst), 1);
    assert_eq!(rollbacks.load(Ordering::SeqCst), 0);

    let scope = registry.begin(executor.pool(), "main").await.unwrap();
    scope.finish().await.unwrap();
    assert_eq!(commits.load(Ordering::SeqCst), 1);
    assert_eq!(rollbacks.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_scopes_on_different_names_are_independent() {
    let (executor_a, registry) = setup().await;
    let (executor_b, _) = setup().await;
    // Second connection joins the shared registry under its own name
    let executor_b = CommandExecutor::new(executor_b.pool().clone(), "other", registry.clone());

    let scope_a = registry.begin(executor_a.pool(), "main").await.unwrap();
    let scope_b = registry.begin(executor_b.pool(), "other").await.unwrap();

    assert!(scope_a.is_root());
    assert!(scope_b.is_root());
    assert_eq!(registry.count().await, 2);

    scope_a.finish().await.unwrap();
    assert!(!registry.is_active("main").await);
    assert!(registry.is_active("other").await);
    scope_b.finish().await.unwrap();
}
