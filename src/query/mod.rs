//! Parameterized statement execution against a pooled database

use serde_json::Value;
use std::sync::Arc;

use crate::engine::QueryResult;
use crate::error::Result;
use crate::pool::ConnectionPool;
use crate::statement::{self, QueryPolicy};

/// Check, then run one statement with positional parameters
///
/// Parameters bind in order (`$1..$n` on `PostgreSQL`, `?` on `SQLite`) and are
/// never interpolated into the SQL text. Rows beyond `policy.max_rows` are
/// dropped and the result is marked `truncated`.
pub async fn execute_query(
    pool: &Arc<ConnectionPool>,
    sql: &str,
    params: &[Value],
    policy: &QueryPolicy,
) -> Result<QueryResult> {
    statement::check_statement(pool.database(), pool.descriptor().engine(), sql, params.len(), policy)?;

    let mut lease = pool.acquire().await?;
    let outcome = pool
        .bounded(async { lease.connection_mut()?.execute(sql, params, policy.max_rows).await })
        .await;
    let result = lease.settle("query", outcome)?;

    tracing::debug!(
        database = %pool.database(),
        rows = result.rows.len(),
        truncated = result.truncated,
        execution_ms = result.execution_ms,
        "executed query"
    );
    Ok(result)
}

#[cfg(all(test, feature = "sqlite"))]
mod tests {
    use super::*;
    use crate::descriptor::ConnectionDescriptor;
    use crate::pool::PoolSettings;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn memory_pool() -> Arc<ConnectionPool> {
        // One slot keeps every call on the same in-memory database
        let settings = PoolSettings { max_connections: 1, ..PoolSettings::default() };
        let descriptor = ConnectionDescriptor::parse("sqlite://:memory:").unwrap();
        Arc::new(ConnectionPool::new("mem", Arc::new(descriptor), settings))
    }

    #[tokio::test]
    async fn test_execute_with_parameters() {
        let pool = memory_pool();
        let policy = QueryPolicy::default();

        execute_query(&pool, "CREATE TABLE t (id INTEGER PRIMARY KEY, name TEXT)", &[], &policy)
            .await
            .unwrap();
        let inserted =
            execute_query(&pool, "INSERT INTO t (name) VALUES (?), (?)", &[json!("a"), json!("b")], &policy)
                .await
                .unwrap();
        assert_eq!(inserted.rows_affected, Some(2));

        let result = execute_query(&pool, "SELECT name FROM t WHERE id = ?", &[json!(2)], &policy)
            .await
            .unwrap();
        assert_eq!(result.columns, vec!["name"]);
        assert_eq!(result.rows, vec![vec![json!("b")]]);
    }

    #[tokio::test]
    async fn test_checks_run_before_acquiring() {
        let pool = memory_pool();
        let err = execute_query(&pool, "SELECT ?", &[], &QueryPolicy::default()).await.unwrap_err();
        assert_eq!(err.error_code(), "QUERY_ERROR");
        assert_eq!(err.database(), Some("mem"));
        assert_eq!(pool.metrics().connections_created, 0);
    }

    #[tokio::test]
    async fn test_read_only_policy() {
        let pool = memory_pool();
        let policy = QueryPolicy { read_only: true, max_rows: None };
        let err = execute_query(&pool, "CREATE TABLE x (id INTEGER)", &[], &policy).await.unwrap_err();
        assert!(err.message().contains("read-only mode"));
        assert!(execute_query(&pool, "SELECT 1", &[], &policy).await.is_ok());
    }

    #[tokio::test]
    async fn test_max_rows_truncates() {
        let pool = memory_pool();
        let policy = QueryPolicy { read_only: false, max_rows: Some(2) };
        let result = execute_query(
            &pool,
            "WITH RECURSIVE n(x) AS (SELECT 1 UNION ALL SELECT x + 1 FROM n WHERE x < 5) SELECT x FROM n",
            &[],
            &policy,
        )
        .await
        .unwrap();
        assert_eq!(result.rows.len(), 2);
        assert!(result.truncated);
    }

    #[tokio::test]
    async fn test_statement_error_is_query_error() {
        let pool = memory_pool();
        let err = execute_query(&pool, "SELECT * FROM nowhere", &[], &QueryPolicy::default())
            .await
            .unwrap_err();
        assert_eq!(err.error_code(), "QUERY_ERROR");
        assert!(err.message().contains("nowhere"));
    }
}
