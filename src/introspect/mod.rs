//! Schema Introspection
//!
//! Catalog lookups against a pooled database. Each operation runs on a single
//! leased connection under the query timeout, and checks that the schema (and
//! table, where one is named) exists before reading details, so a miss is
//! reported as `SchemaNotFound` / `TableNotFound` rather than an empty result.

use std::sync::Arc;

use crate::engine::{DatabaseType, ForeignKeyInfo, TableInfo};
use crate::error::{ExplorerError, Result};
use crate::pool::ConnectionPool;

/// Schema used when the caller does not name one (`public` / `main`)
#[must_use]
pub const fn default_schema(engine: DatabaseType) -> &'static str {
    engine.default_schema()
}

/// Result of a lookup that may miss its schema or table
enum Lookup<T> {
    Found(T),
    MissingSchema,
    MissingTable,
}

impl<T> Lookup<T> {
    fn into_result(self, database: &str, schema: &str, table: &str) -> Result<T> {
        match self {
            Self::Found(value) => Ok(value),
            Self::MissingSchema => Err(ExplorerError::schema_not_found(database, schema)),
            Self::MissingTable => Err(ExplorerError::table_not_found(database, schema, table)),
        }
    }
}

/// All schemas visible to the connection (system schemas excluded)
pub async fn list_schemas(pool: &Arc<ConnectionPool>) -> Result<Vec<String>> {
    let mut lease = pool.acquire().await?;
    let outcome = pool.bounded(async { lease.connection_mut()?.list_schemas().await }).await;
    let schemas = lease.settle("list schemas", outcome)?;
    tracing::debug!(database = %pool.database(), count = schemas.len(), "listed schemas");
    Ok(schemas)
}

/// Tables and views of `schema` with their columns and primary keys
pub async fn list_tables(pool: &Arc<ConnectionPool>, schema: &str) -> Result<Vec<TableInfo>> {
    let mut lease = pool.acquire().await?;
    let outcome = pool
        .bounded(async {
            let conn = lease.connection_mut()?;
            if !conn.schema_exists(schema).await? {
                return Ok(Lookup::MissingSchema);
            }
            conn.list_tables(schema).await.map(Lookup::Found)
        })
        .await;
    let tables = lease.settle("list tables", outcome)?.into_result(pool.database(), schema, "")?;
    tracing::debug!(database = %pool.database(), schema, count = tables.len(), "listed tables");
    Ok(tables)
}

/// Columns, keys and indexes of `schema.table`
pub async fn describe_table(pool: &Arc<ConnectionPool>, schema: &str, table: &str) -> Result<TableInfo> {
    let mut lease = pool.acquire().await?;
    let outcome = pool
        .bounded(async {
            let conn = lease.connection_mut()?;
            if !conn.schema_exists(schema).await? {
                return Ok(Lookup::MissingSchema);
            }
            Ok(conn.describe_table(schema, table).await?.map_or(Lookup::MissingTable, Lookup::Found))
        })
        .await;
    let info = lease.settle("describe table", outcome)?.into_result(pool.database(), schema, table)?;
    tracing::debug!(
        database = %pool.database(),
        schema,
        table,
        columns = info.columns.len(),
        "described table"
    );
    Ok(info)
}

/// Declared foreign keys whose referencing table is `schema.table`
pub async fn list_foreign_keys(
    pool: &Arc<ConnectionPool>,
    schema: &str,
    table: &str,
) -> Result<Vec<ForeignKeyInfo>> {
    let mut lease = pool.acquire().await?;
    let outcome = pool
        .bounded(async {
            let conn = lease.connection_mut()?;
            if !conn.schema_exists(schema).await? {
                return Ok(Lookup::MissingSchema);
            }
            if conn.describe_table(schema, table).await?.is_none() {
                return Ok(Lookup::MissingTable);
            }
            conn.foreign_keys(schema, Some(table)).await.map(Lookup::Found)
        })
        .await;
    let keys = lease.settle("list foreign keys", outcome)?.into_result(pool.database(), schema, table)?;
    tracing::debug!(database = %pool.database(), schema, table, count = keys.len(), "listed foreign keys");
    Ok(keys)
}

/// Every declared foreign key whose referencing table lives in `schema`
pub async fn list_schema_foreign_keys(pool: &Arc<ConnectionPool>, schema: &str) -> Result<Vec<ForeignKeyInfo>> {
    let mut lease = pool.acquire().await?;
    let outcome = pool
        .bounded(async {
            let conn = lease.connection_mut()?;
            if !conn.schema_exists(schema).await? {
                return Ok(Lookup::MissingSchema);
            }
            conn.foreign_keys(schema, None).await.map(Lookup::Found)
        })
        .await;
    lease.settle("list foreign keys", outcome)?.into_result(pool.database(), schema, "")
}

#[cfg(all(test, feature = "sqlite"))]
mod tests {
    use super::*;
    use crate::descriptor::ConnectionDescriptor;
    use crate::pool::PoolSettings;
    use pretty_assertions::assert_eq;
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicU64, Ordering};

    static COUNTER: AtomicU64 = AtomicU64::new(0);

    fn shop_db() -> PathBuf {
        let n = COUNTER.fetch_add(1, Ordering::SeqCst);
        let path =
            std::env::temp_dir().join(format!("dbexplorer_introspect_{}_{n}.db", std::process::id()));
        let _ = std::fs::remove_file(&path);
        let conn = rusqlite::Connection::open(&path).unwrap();
        conn.execute_batch(
            "CREATE TABLE customers (id INTEGER PRIMARY KEY, name TEXT NOT NULL);
             CREATE TABLE orders (
                 id INTEGER PRIMARY KEY,
                 customer_id INTEGER NOT NULL REFERENCES customers(id),
                 total REAL
             );",
        )
        .unwrap();
        path
    }

    fn pool_for(path: &PathBuf) -> Arc<ConnectionPool> {
        let descriptor = ConnectionDescriptor::parse(&format!("sqlite://{}", path.display())).unwrap();
        Arc::new(ConnectionPool::new("shop", Arc::new(descriptor), PoolSettings::default()))
    }

    #[tokio::test]
    async fn test_list_schemas_and_tables() {
        let path = shop_db();
        let pool = pool_for(&path);

        assert_eq!(list_schemas(&pool).await.unwrap(), vec!["main"]);

        let names: Vec<String> = list_tables(&pool, "main").await.unwrap().into_iter().map(|t| t.name).collect();
        assert_eq!(names, vec!["customers", "orders"]);
        let _ = std::fs::remove_file(&path);
    }

    #[tokio::test]
    async fn test_missing_schema_and_table() {
        let path = shop_db();
        let pool = pool_for(&path);

        let err = list_tables(&pool, "nope").await.unwrap_err();
        assert_eq!(err, ExplorerError::schema_not_found("shop", "nope"));

        let err = describe_table(&pool, "main", "ghosts").await.unwrap_err();
        assert_eq!(err, ExplorerError::table_not_found("shop", "main", "ghosts"));

        let err = list_foreign_keys(&pool, "main", "ghosts").await.unwrap_err();
        assert_eq!(err.error_code(), "TABLE_NOT_FOUND");
        let _ = std::fs::remove_file(&path);
    }

    #[tokio::test]
    async fn test_describe_and_foreign_keys() {
        let path = shop_db();
        let pool = pool_for(&path);

        let orders = describe_table(&pool, "main", "orders").await.unwrap();
        assert_eq!(orders.primary_key, vec!["id"]);
        assert!(!orders.column("customer_id").unwrap().nullable);

        let keys = list_foreign_keys(&pool, "main", "orders").await.unwrap();
        assert_eq!(keys.len(), 1);
        assert_eq!(keys[0].referenced_table, "customers");
        assert_eq!(keys[0].referenced_columns, vec!["id"]);

        assert!(list_foreign_keys(&pool, "main", "customers").await.unwrap().is_empty());
        assert_eq!(list_schema_foreign_keys(&pool, "main").await.unwrap().len(), 1);
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn test_default_schema() {
        assert_eq!(default_schema(DatabaseType::SQLite), "main");
        assert_eq!(default_schema(DatabaseType::Postgres), "public");
    }
}
