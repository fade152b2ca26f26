//! Edge Case Tests
//!
//! Statement execution corner cases against `SQLite`:
//! - Unicode, quotes, semicolons and comment markers inside values and literals
//! - BLOB, numeric extremes, NULL vs empty string
//! - Injection-shaped parameter values bound safely
//! - Large results and row limits

#![cfg(feature = "sqlite")]

use pretty_assertions::assert_eq;
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;

use dbexplorer::descriptor::ConnectionDescriptor;
use dbexplorer::pool::{ConnectionPool, PoolSettings};
use dbexplorer::query::execute_query;
use dbexplorer::QueryPolicy;

// ============================================================================
// Test Helpers
// ============================================================================

fn create_test_db(script: &str) -> PathBuf {
    use std::sync::atomic::{AtomicU64, Ordering};
    static COUNTER: AtomicU64 = AtomicU64::new(0);

    let id = COUNTER.fetch_add(1, Ordering::SeqCst);
    let path = std::env::temp_dir().join(format!("dbexplorer_edge_{}_{id}.db", std::process::id()));
    let _ = std::fs::remove_file(&path);
    let conn = rusqlite::Connection::open(&path).expect("Failed to create temp database");
    conn.execute_batch(script).expect("Failed to create schema");
    path
}

fn pool_for(path: &PathBuf) -> Arc<ConnectionPool> {
    let descriptor = ConnectionDescriptor::parse(&format!("sqlite://{}", path.display())).unwrap();
    Arc::new(ConnectionPool::new("edge", Arc::new(descriptor), PoolSettings::default()))
}

fn cleanup_db(path: &PathBuf) {
    let _ = std::fs::remove_file(path);
}

fn policy() -> QueryPolicy {
    QueryPolicy::default()
}

// ============================================================================
// Unicode and Special Character Tests
// ============================================================================

#[tokio::test]
async fn test_unicode_round_trip() {
    let path = create_test_db("CREATE TABLE notes (id INTEGER PRIMARY KEY, body TEXT);");
    let pool = pool_for(&path);

    let text = "Hello 世界 🌍 Здравствуй мир";
    execute_query(&pool, "INSERT INTO notes (body) VALUES (?)", &[json!(text)], &policy()).await.unwrap();

    let result = execute_query(&pool, "SELECT body FROM notes", &[], &policy()).await.unwrap();
    assert_eq!(result.rows, vec![vec![json!(text)]]);
    cleanup_db(&path);
}

#[tokio::test]
async fn test_special_characters_in_literals() {
    let path = create_test_db("CREATE TABLE t (id INTEGER PRIMARY KEY);");
    let pool = pool_for(&path);

    let result = execute_query(
        &pool,
        "SELECT 'semi; colon' AS a, 'it''s -- not a comment' AS b, '?' AS c /* ; */",
        &[],
        &policy(),
    )
    .await
    .unwrap();
    assert_eq!(result.columns, vec!["a", "b", "c"]);
    assert_eq!(result.rows, vec![vec![json!("semi; colon"), json!("it's -- not a comment"), json!("?")]]);
    cleanup_db(&path);
}

#[tokio::test]
async fn test_injection_shaped_values_are_bound() {
    let path = create_test_db(
        "CREATE TABLE users (id INTEGER PRIMARY KEY, name TEXT);
         INSERT INTO users (name) VALUES ('alice');",
    );
    let pool = pool_for(&path);

    let hostile = "x'; DROP TABLE users; --";
    let result = execute_query(&pool, "SELECT id FROM users WHERE name = ?", &[json!(hostile)], &policy())
        .await
        .unwrap();
    assert!(result.rows.is_empty());

    let still_there = execute_query(&pool, "SELECT COUNT(*) FROM users", &[], &policy()).await.unwrap();
    assert_eq!(still_there.rows, vec![vec![json!(1)]]);
    cleanup_db(&path);
}

// ============================================================================
// Value Conversion Tests
// ============================================================================

#[tokio::test]
async fn test_blob_is_base64() {
    let path = create_test_db(
        "CREATE TABLE blobs (id INTEGER PRIMARY KEY, data BLOB);
         INSERT INTO blobs (data) VALUES (X'000102FF');",
    );
    let pool = pool_for(&path);

    let result = execute_query(&pool, "SELECT data FROM blobs", &[], &policy()).await.unwrap();
    assert_eq!(result.rows, vec![vec![json!("AAEC/w==")]]);
    cleanup_db(&path);
}

#[tokio::test]
async fn test_numeric_extremes_and_booleans() {
    let path = create_test_db("CREATE TABLE nums (big INTEGER, small INTEGER, flag INTEGER, ratio REAL);");
    let pool = pool_for(&path);

    execute_query(
        &pool,
        "INSERT INTO nums VALUES (?, ?, ?, ?)",
        &[json!(i64::MAX), json!(i64::MIN), json!(true), json!(0.25)],
        &policy(),
    )
    .await
    .unwrap();

    let result = execute_query(&pool, "SELECT big, small, flag, ratio FROM nums", &[], &policy()).await.unwrap();
    assert_eq!(result.rows, vec![vec![json!(i64::MAX), json!(i64::MIN), json!(1), json!(0.25)]]);
    cleanup_db(&path);
}

#[tokio::test]
async fn test_empty_string_vs_null() {
    let path = create_test_db("CREATE TABLE vals (id INTEGER PRIMARY KEY, v TEXT);");
    let pool = pool_for(&path);

    execute_query(&pool, "INSERT INTO vals (v) VALUES (?), (?)", &[json!(""), json!(null)], &policy())
        .await
        .unwrap();

    let result = execute_query(&pool, "SELECT v FROM vals ORDER BY id", &[], &policy()).await.unwrap();
    assert_eq!(result.rows, vec![vec![json!("")], vec![json!(null)]]);
    cleanup_db(&path);
}

// ============================================================================
// Statement Shape Tests
// ============================================================================

#[tokio::test]
async fn test_multiple_statements_rejected_before_execution() {
    let path = create_test_db("CREATE TABLE users (id INTEGER PRIMARY KEY);");
    let pool = pool_for(&path);

    let err = execute_query(&pool, "SELECT 1; DROP TABLE users", &[], &policy()).await.unwrap_err();
    assert_eq!(err.error_code(), "QUERY_ERROR");
    assert_eq!(pool.metrics().connections_created, 0);

    let tables = execute_query(&pool, "SELECT name FROM sqlite_master WHERE type = 'table'", &[], &policy())
        .await
        .unwrap();
    assert_eq!(tables.rows, vec![vec![json!("users")]]);
    cleanup_db(&path);
}

#[tokio::test]
async fn test_whitespace_and_trailing_semicolon() {
    let path = create_test_db("CREATE TABLE t (id INTEGER PRIMARY KEY);");
    let pool = pool_for(&path);

    let result = execute_query(&pool, "\n\n   SELECT   42  ;  \n", &[], &policy()).await.unwrap();
    assert_eq!(result.rows, vec![vec![json!(42)]]);

    let err = execute_query(&pool, "   \n  ", &[], &policy()).await.unwrap_err();
    assert_eq!(err.error_code(), "INVALID_INPUT");
    cleanup_db(&path);
}

#[tokio::test]
async fn test_large_result_with_row_limit() {
    let path = create_test_db("CREATE TABLE t (id INTEGER PRIMARY KEY);");
    let pool = pool_for(&path);

    let sql = "WITH RECURSIVE n(x) AS (SELECT 1 UNION ALL SELECT x + 1 FROM n WHERE x < 5000) SELECT x FROM n";
    let limited = QueryPolicy { read_only: true, max_rows: Some(100) };
    let result = execute_query(&pool, sql, &[], &limited).await.unwrap();
    assert_eq!(result.rows.len(), 100);
    assert!(result.truncated);

    let full = execute_query(&pool, sql, &[], &policy()).await.unwrap();
    assert_eq!(full.rows.len(), 5000);
    assert!(!full.truncated);
    cleanup_db(&path);
}

#[tokio::test]
async fn test_case_insensitive_table_names() {
    let path = create_test_db(
        "CREATE TABLE Users (id INTEGER PRIMARY KEY);
         INSERT INTO Users DEFAULT VALUES;",
    );
    let pool = pool_for(&path);

    let result = execute_query(&pool, "SELECT COUNT(*) FROM users", &[], &policy()).await.unwrap();
    assert_eq!(result.rows, vec![vec![json!(1)]]);
    cleanup_db(&path);
}
