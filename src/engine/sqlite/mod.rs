//! `SQLite` Database Engine Implementation
//!
//! # Features
//! - File-based connections (`sqlite:///path/to/db.sqlite`)
//! - In-memory connections (`sqlite://:memory:`, private to each connection)
//! - Schema introspection via `sqlite_master` and table-valued PRAGMAs
//! - Attached databases are reported as schemas (`main`, plus any `ATTACH`ed)
//!
//! # Implementation Notes
//! - Uses `rusqlite` (synchronous driver, calls run inline on the caller's task)
//! - BLOB data is Base64-encoded for JSON safety
//! - Timeouts enforced via `busy_timeout`
//! - Row limits enforced in application code

use rusqlite::types::Value as SqlValue;
use rusqlite::{Connection, ErrorCode, OpenFlags, Row};
use serde_json::Value;
use std::time::Instant;

use crate::descriptor::ConnectionDescriptor;
use crate::engine::{
    ColumnInfo, ConnectFailure, ConnectOptions, EngineError, EngineResult, ForeignKeyInfo,
    IndexInfo, QueryResult, TableInfo, TableKind,
};

/// A live `SQLite` handle
pub struct SqliteConnection {
    conn: Connection,
}

impl SqliteConnection {
    /// Open the database file named by the descriptor
    pub fn open(
        descriptor: &ConnectionDescriptor,
        options: ConnectOptions,
    ) -> std::result::Result<Self, ConnectFailure> {
        let path = descriptor.database().ok_or_else(|| ConnectFailure {
            detail: "SQLite descriptor has no database path".to_string(),
            transient: false,
        })?;

        let opened = if path == ":memory:" {
            Connection::open_in_memory()
        } else {
            Connection::open_with_flags(path, open_flags(descriptor))
        };

        // A missing or unreadable file will not appear on retry
        let conn = opened.map_err(|e| ConnectFailure {
            detail: format!("Failed to open SQLite database: {e}"),
            transient: false,
        })?;

        conn.busy_timeout(options.statement_timeout).map_err(|e| ConnectFailure {
            detail: format!("Failed to set busy timeout: {e}"),
            transient: false,
        })?;

        Ok(Self { conn })
    }

    pub fn ping(&mut self) -> EngineResult<()> {
        self.conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0)).map_err(classify)?;
        Ok(())
    }

    pub fn list_schemas(&mut self) -> EngineResult<Vec<String>> {
        let mut stmt = self
            .conn
            .prepare("SELECT name FROM pragma_database_list WHERE name <> 'temp' ORDER BY seq")
            .map_err(classify)?;
        let names = stmt
            .query_map([], |row| row.get::<_, String>(0))
            .map_err(classify)?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(classify)?;
        Ok(names)
    }

    pub fn schema_exists(&mut self, schema: &str) -> EngineResult<bool> {
        self.conn
            .query_row(
                "SELECT EXISTS (SELECT 1 FROM pragma_database_list WHERE name = ?1 AND name <> 'temp')",
                [schema],
                |row| row.get::<_, bool>(0),
            )
            .map_err(classify)
    }

    pub fn list_tables(&mut self, schema: &str) -> EngineResult<Vec<TableInfo>> {
        let relations = self.relations(schema, None)?;
        relations
            .into_iter()
            .map(|(name, kind)| self.load_table(schema, name, kind))
            .collect()
    }

    pub fn describe_table(&mut self, schema: &str, table: &str) -> EngineResult<Option<TableInfo>> {
        let Some((name, kind)) = self.relations(schema, Some(table))?.into_iter().next() else {
            return Ok(None);
        };

        let mut info = self.load_table(schema, name, kind)?;
        info.foreign_keys = self.table_foreign_keys(schema, &info.name)?;
        info.indexes = self.indexes(schema, &info.name)?;
        Ok(Some(info))
    }

    pub fn foreign_keys(&mut self, schema: &str, table: Option<&str>) -> EngineResult<Vec<ForeignKeyInfo>> {
        let tables: Vec<String> = self
            .relations(schema, table)?
            .into_iter()
            .filter(|(_, kind)| *kind == TableKind::Table)
            .map(|(name, _)| name)
            .collect();

        let mut foreign_keys = Vec::new();
        for name in tables {
            foreign_keys.extend(self.table_foreign_keys(schema, &name)?);
        }
        Ok(foreign_keys)
    }

    pub fn execute(
        &mut self,
        sql: &str,
        params: &[Value],
        max_rows: Option<usize>,
    ) -> EngineResult<QueryResult> {
        let start = Instant::now();
        let mut stmt = self.conn.prepare(sql).map_err(classify)?;

        let expected = stmt.parameter_count();
        if expected != params.len() {
            return Err(EngineError::Statement(format!(
                "statement expects {expected} parameter(s), got {}",
                params.len()
            )));
        }
        for (i, value) in params.iter().enumerate() {
            stmt.raw_bind_parameter(i + 1, json_to_sql(value)).map_err(classify)?;
        }

        let columns: Vec<String> = stmt.column_names().iter().map(|s| (*s).to_string()).collect();

        if columns.is_empty() {
            // Non-SELECT statement (INSERT, UPDATE, DELETE, DDL)
            let changed = stmt.raw_execute().map_err(classify)?;
            return Ok(QueryResult {
                columns,
                rows: Vec::new(),
                rows_affected: Some(changed as u64),
                truncated: false,
                execution_ms: elapsed_ms(start),
            });
        }

        let limit = max_rows.unwrap_or(usize::MAX);
        let mut rows_data = Vec::new();
        let mut truncated = false;
        let mut rows = stmt.raw_query();
        while let Some(row) = rows.next().map_err(classify)? {
            if rows_data.len() >= limit {
                truncated = true;
                break;
            }
            rows_data.push(row_to_json(columns.len(), row).map_err(classify)?);
        }

        Ok(QueryResult {
            columns,
            rows: rows_data,
            rows_affected: None,
            truncated,
            execution_ms: elapsed_ms(start),
        })
    }

    /// Tables and views in `sqlite_master`, internal tables excluded
    fn relations(&self, schema: &str, table: Option<&str>) -> EngineResult<Vec<(String, TableKind)>> {
        let sql = format!(
            "SELECT name, type FROM {}.sqlite_master
             WHERE type IN ('table', 'view')
               AND name NOT LIKE 'sqlite\\_%' ESCAPE '\\'
               AND (?1 IS NULL OR name = ?1)
             ORDER BY name",
            quote_identifier(schema)
        );
        let mut stmt = self.conn.prepare(&sql).map_err(classify)?;
        let relations = stmt
            .query_map([table], |row| {
                let name: String = row.get(0)?;
                let kind: String = row.get(1)?;
                Ok((name, if kind == "view" { TableKind::View } else { TableKind::Table }))
            })
            .map_err(classify)?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(classify)?;
        Ok(relations)
    }

    fn load_table(&self, schema: &str, name: String, kind: TableKind) -> EngineResult<TableInfo> {
        let mut stmt = self
            .conn
            .prepare("SELECT cid, name, type, \"notnull\", dflt_value, pk FROM pragma_table_info(?1, ?2) ORDER BY cid")
            .map_err(classify)?;

        let mut columns = Vec::new();
        let mut pk_positions: Vec<(i64, String)> = Vec::new();
        let mut rows = stmt.query([name.as_str(), schema]).map_err(classify)?;
        while let Some(row) = rows.next().map_err(classify)? {
            let cid: i64 = row.get(0).map_err(classify)?;
            let column: String = row.get(1).map_err(classify)?;
            let data_type: String = row.get(2).map_err(classify)?;
            let not_null: bool = row.get(3).map_err(classify)?;
            let default: Option<String> = row.get(4).map_err(classify)?;
            let pk: i64 = row.get(5).map_err(classify)?;

            if pk > 0 {
                pk_positions.push((pk, column.clone()));
            }
            columns.push(ColumnInfo {
                name: column,
                data_type,
                // INTEGER PRIMARY KEY is a rowid alias and never NULL
                nullable: !not_null && pk == 0,
                ordinal: u32::try_from(cid + 1).unwrap_or(0),
                default,
            });
        }

        pk_positions.sort_by_key(|(position, _)| *position);
        Ok(TableInfo {
            schema: schema.to_string(),
            name,
            kind,
            columns,
            primary_key: pk_positions.into_iter().map(|(_, column)| column).collect(),
            foreign_keys: Vec::new(),
            indexes: Vec::new(),
        })
    }

    fn table_foreign_keys(&self, schema: &str, table: &str) -> EngineResult<Vec<ForeignKeyInfo>> {
        let mut stmt = self
            .conn
            .prepare("SELECT id, \"table\", \"from\", \"to\" FROM pragma_foreign_key_list(?1, ?2) ORDER BY id, seq")
            .map_err(classify)?;

        let mut grouped: Vec<(i64, ForeignKeyInfo, Vec<Option<String>>)> = Vec::new();
        let mut rows = stmt.query([table, schema]).map_err(classify)?;
        while let Some(row) = rows.next().map_err(classify)? {
            let id: i64 = row.get(0).map_err(classify)?;
            let referenced_table: String = row.get(1).map_err(classify)?;
            let from: String = row.get(2).map_err(classify)?;
            let to: Option<String> = row.get(3).map_err(classify)?;

            match grouped.last_mut() {
                Some((last_id, fk, targets)) if *last_id == id => {
                    fk.columns.push(from);
                    targets.push(to);
                }
                _ => grouped.push((
                    id,
                    ForeignKeyInfo {
                        name: format!("fk_{table}_{id}"),
                        schema: schema.to_string(),
                        table: table.to_string(),
                        columns: vec![from],
                        referenced_schema: schema.to_string(),
                        referenced_table,
                        referenced_columns: Vec::new(),
                    },
                    vec![to],
                )),
            }
        }
        drop(rows);
        drop(stmt);

        let mut foreign_keys = Vec::with_capacity(grouped.len());
        for (_, mut fk, targets) in grouped {
            // `REFERENCES parent` without a column list points at the parent's primary key
            if targets.iter().any(Option::is_none) {
                let parent_pk = self.primary_key(schema, &fk.referenced_table)?;
                fk.referenced_columns = targets
                    .into_iter()
                    .enumerate()
                    .map(|(i, to)| to.or_else(|| parent_pk.get(i).cloned()).unwrap_or_default())
                    .collect();
            } else {
                fk.referenced_columns = targets.into_iter().flatten().collect();
            }
            foreign_keys.push(fk);
        }
        Ok(foreign_keys)
    }

    fn primary_key(&self, schema: &str, table: &str) -> EngineResult<Vec<String>> {
        let mut stmt = self
            .conn
            .prepare("SELECT name FROM pragma_table_info(?1, ?2) WHERE pk > 0 ORDER BY pk")
            .map_err(classify)?;
        let columns = stmt
            .query_map([table, schema], |row| row.get::<_, String>(0))
            .map_err(classify)?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(classify)?;
        Ok(columns)
    }

    fn indexes(&self, schema: &str, table: &str) -> EngineResult<Vec<IndexInfo>> {
        let mut list = self
            .conn
            .prepare("SELECT name, \"unique\" FROM pragma_index_list(?1, ?2) WHERE origin <> 'pk' ORDER BY name")
            .map_err(classify)?;
        let entries = list
            .query_map([table, schema], |row| Ok((row.get::<_, String>(0)?, row.get::<_, bool>(1)?)))
            .map_err(classify)?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(classify)?;

        let mut info = self
            .conn
            .prepare("SELECT name FROM pragma_index_info(?1, ?2) ORDER BY seqno")
            .map_err(classify)?;

        let mut indexes = Vec::with_capacity(entries.len());
        for (name, unique) in entries {
            let columns = info
                .query_map([name.as_str(), schema], |row| row.get::<_, Option<String>>(0))
                .map_err(classify)?
                .map(|column| column.map(|c| c.unwrap_or_else(|| "(expression)".to_string())))
                .collect::<std::result::Result<Vec<_>, _>>()
                .map_err(classify)?;
            indexes.push(IndexInfo { name, columns, unique });
        }
        Ok(indexes)
    }
}

fn open_flags(descriptor: &ConnectionDescriptor) -> OpenFlags {
    let base = OpenFlags::SQLITE_OPEN_URI | OpenFlags::SQLITE_OPEN_NO_MUTEX;
    if descriptor.sqlite_read_only() {
        base | OpenFlags::SQLITE_OPEN_READ_ONLY
    } else if descriptor.sqlite_create() {
        base | OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_CREATE
    } else {
        base | OpenFlags::SQLITE_OPEN_READ_WRITE
    }
}

fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Map a driver error onto the pool's retry classes
fn classify(e: rusqlite::Error) -> EngineError {
    let detail = e.to_string();
    match e.sqlite_error_code() {
        Some(ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked) => EngineError::TimedOut(detail),
        Some(
            ErrorCode::CannotOpen
            | ErrorCode::NotADatabase
            | ErrorCode::DatabaseCorrupt
            | ErrorCode::SystemIoFailure,
        ) => EngineError::ConnectionLost(detail),
        _ => EngineError::Statement(detail),
    }
}

fn elapsed_ms(start: Instant) -> u64 {
    u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX)
}

fn json_to_sql(value: &Value) -> SqlValue {
    match value {
        Value::Null => SqlValue::Null,
        Value::Bool(b) => SqlValue::Integer(i64::from(*b)),
        Value::Number(n) => match n.as_i64() {
            Some(i) => SqlValue::Integer(i),
            None => n.as_f64().map_or(SqlValue::Null, SqlValue::Real),
        },
        Value::String(s) => SqlValue::Text(s.clone()),
        // Nested JSON is stored as its text form
        other => SqlValue::Text(other.to_string()),
    }
}

/// Convert a `SQLite` row to a JSON-safe `Vec`
fn row_to_json(width: usize, row: &Row) -> std::result::Result<Vec<Value>, rusqlite::Error> {
    (0..width).map(|idx| sqlite_value_to_json(row, idx)).collect()
}

/// Convert `SQLite` value to JSON value
fn sqlite_value_to_json(row: &Row, idx: usize) -> std::result::Result<Value, rusqlite::Error> {
    use rusqlite::types::ValueRef;

    Ok(match row.get_ref(idx)? {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::Number(i.into()),
        // Handle NaN/Infinity as null
        ValueRef::Real(f) => serde_json::Number::from_f64(f).map_or(Value::Null, Value::Number),
        ValueRef::Text(s) => Value::String(String::from_utf8_lossy(s).into_owned()),
        ValueRef::Blob(b) => {
            use base64::Engine;
            Value::String(base64::engine::general_purpose::STANDARD.encode(b))
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::time::Duration;

    static COUNTER: AtomicU64 = AtomicU64::new(0);

    fn temp_db(setup: &str) -> PathBuf {
        let n = COUNTER.fetch_add(1, Ordering::SeqCst);
        let path = std::env::temp_dir()
            .join(format!("dbexplorer_sqlite_engine_{}_{n}.db", std::process::id()));
        let _ = std::fs::remove_file(&path);
        let conn = Connection::open(&path).unwrap();
        conn.execute_batch(setup).unwrap();
        path
    }

    fn open(path: &PathBuf, mode: &str) -> SqliteConnection {
        let raw = format!("sqlite://{}{mode}", path.display());
        let descriptor = ConnectionDescriptor::parse(&raw).unwrap();
        SqliteConnection::open(&descriptor, options()).unwrap()
    }

    fn options() -> ConnectOptions {
        ConnectOptions {
            connect_timeout: Duration::from_secs(1),
            statement_timeout: Duration::from_millis(200),
        }
    }

    const SHOP: &str = "
        CREATE TABLE customers (id INTEGER PRIMARY KEY, name TEXT NOT NULL, email TEXT);
        CREATE TABLE orders (
            id INTEGER PRIMARY KEY,
            customer_id INTEGER NOT NULL REFERENCES customers(id),
            total REAL DEFAULT 0
        );
        CREATE TABLE order_items (
            order_id INTEGER REFERENCES orders,
            sku TEXT,
            qty INTEGER,
            PRIMARY KEY (order_id, sku)
        );
        CREATE UNIQUE INDEX idx_customers_email ON customers(email);
        CREATE VIEW big_orders AS SELECT * FROM orders WHERE total > 100;
        INSERT INTO customers (name, email) VALUES ('Alice', 'a@example.com'), ('Bob', NULL);
        INSERT INTO orders (customer_id, total) VALUES (1, 10.5), (1, 250.0), (2, 99.0);
    ";

    #[test]
    fn test_open_missing_file_is_final() {
        let path = std::env::temp_dir().join("dbexplorer_definitely_missing.db");
        let _ = std::fs::remove_file(&path);
        let descriptor =
            ConnectionDescriptor::parse(&format!("sqlite://{}", path.display())).unwrap();
        let failure = SqliteConnection::open(&descriptor, options()).err().unwrap();
        assert!(!failure.transient);
        assert!(failure.detail.contains("Failed to open SQLite database"));
    }

    #[test]
    fn test_open_create_mode() {
        let n = COUNTER.fetch_add(1, Ordering::SeqCst);
        let path = std::env::temp_dir().join(format!("dbexplorer_rwc_{}_{n}.db", std::process::id()));
        let _ = std::fs::remove_file(&path);
        let mut conn = open(&path, "?mode=rwc");
        conn.ping().unwrap();
        assert!(path.exists());
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn test_list_schemas_and_exists() {
        let path = temp_db(SHOP);
        let mut conn = open(&path, "");
        assert_eq!(conn.list_schemas().unwrap(), vec!["main"]);
        assert!(conn.schema_exists("main").unwrap());
        assert!(!conn.schema_exists("temp").unwrap());
        assert!(!conn.schema_exists("public").unwrap());
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn test_list_tables() {
        let path = temp_db(SHOP);
        let mut conn = open(&path, "");
        let tables = conn.list_tables("main").unwrap();
        let names: Vec<&str> = tables.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["big_orders", "customers", "order_items", "orders"]);

        assert_eq!(tables[0].kind, TableKind::View);
        let customers = &tables[1];
        assert_eq!(customers.primary_key, vec!["id"]);
        assert_eq!(customers.columns.len(), 3);
        assert!(!customers.column("id").unwrap().nullable);
        assert!(!customers.column("name").unwrap().nullable);
        assert!(customers.column("email").unwrap().nullable);
        assert_eq!(customers.column("email").unwrap().ordinal, 3);

        assert_eq!(tables[2].primary_key, vec!["order_id", "sku"]);
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn test_describe_table() {
        let path = temp_db(SHOP);
        let mut conn = open(&path, "");

        let customers = conn.describe_table("main", "customers").unwrap().unwrap();
        assert_eq!(customers.indexes.len(), 1);
        assert_eq!(customers.indexes[0].name, "idx_customers_email");
        assert!(customers.indexes[0].unique);
        assert_eq!(customers.indexes[0].columns, vec!["email"]);

        let orders = conn.describe_table("main", "orders").unwrap().unwrap();
        assert_eq!(orders.foreign_keys.len(), 1);
        assert_eq!(orders.foreign_keys[0].columns, vec!["customer_id"]);
        assert_eq!(orders.foreign_keys[0].referenced_table, "customers");
        assert_eq!(orders.foreign_keys[0].referenced_columns, vec!["id"]);
        assert_eq!(orders.column("total").unwrap().default.as_deref(), Some("0"));

        assert!(conn.describe_table("main", "missing").unwrap().is_none());
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn test_foreign_key_without_column_list_targets_primary_key() {
        let path = temp_db(SHOP);
        let mut conn = open(&path, "");
        let fks = conn.foreign_keys("main", Some("order_items")).unwrap();
        assert_eq!(fks.len(), 1);
        assert_eq!(fks[0].name, "fk_order_items_0");
        assert_eq!(fks[0].referenced_table, "orders");
        assert_eq!(fks[0].referenced_columns, vec!["id"]);

        let all = conn.foreign_keys("main", None).unwrap();
        assert_eq!(all.len(), 2);
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn test_execute_select_with_params_and_limit() {
        let path = temp_db(SHOP);
        let mut conn = open(&path, "");

        let result = conn
            .execute("SELECT id, total FROM orders WHERE customer_id = ?1 ORDER BY id", &[json!(1)], None)
            .unwrap();
        assert_eq!(result.columns, vec!["id", "total"]);
        assert_eq!(result.rows, vec![vec![json!(1), json!(10.5)], vec![json!(2), json!(250.0)]]);
        assert!(!result.truncated);

        let limited = conn.execute("SELECT id FROM orders", &[], Some(2)).unwrap();
        assert_eq!(limited.rows.len(), 2);
        assert!(limited.truncated);

        let exact = conn.execute("SELECT id FROM orders", &[], Some(3)).unwrap();
        assert!(!exact.truncated);
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn test_execute_parameter_mismatch() {
        let path = temp_db(SHOP);
        let mut conn = open(&path, "");
        let err = conn.execute("SELECT * FROM orders WHERE id = ?", &[], None).unwrap_err();
        assert!(matches!(err, EngineError::Statement(ref d) if d.contains("expects 1")));
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn test_execute_write_reports_rows_affected() {
        let path = temp_db(SHOP);
        let mut conn = open(&path, "");
        let result =
            conn.execute("UPDATE orders SET total = total + 1 WHERE customer_id = ?", &[json!(1)], None).unwrap();
        assert_eq!(result.rows_affected, Some(2));
        assert!(result.columns.is_empty());
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn test_value_conversion() {
        let path = temp_db("CREATE TABLE t (b BLOB, n INTEGER, s TEXT);");
        let mut conn = open(&path, "");
        conn.execute("INSERT INTO t VALUES (X'48656C6C6F', NULL, ?)", &[json!({"k": true})], None)
            .unwrap();
        let result = conn.execute("SELECT b, n, s FROM t", &[], None).unwrap();
        assert_eq!(result.rows[0], vec![json!("SGVsbG8="), Value::Null, json!(r#"{"k":true}"#)]);
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn test_read_only_mode_rejects_writes() {
        let path = temp_db(SHOP);
        let mut conn = open(&path, "?mode=ro");
        let err = conn.execute("DELETE FROM orders", &[], None).unwrap_err();
        assert!(matches!(err, EngineError::Statement(_)));
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn test_syntax_error_is_statement_error() {
        let path = temp_db(SHOP);
        let mut conn = open(&path, "");
        assert!(matches!(conn.execute("SELEKT 1", &[], None), Err(EngineError::Statement(_))));
        conn.ping().unwrap();
        let _ = std::fs::remove_file(&path);
    }
}
