//! `PostgreSQL` Database Engine Implementation
//!
//! # Features
//! - Client-server connections via TCP (`tokio-postgres`, `NoTls`)
//! - Catalog introspection via `pg_catalog` (schemas, tables, columns, keys, indexes)
//! - Parameterized execution with JSON parameters bound by declared parameter type
//! - Rich result conversion (JSON/JSONB, arrays, timestamps, UUID, NUMERIC)
//!
//! # Implementation Notes
//! - The connection task is spawned onto the tokio runtime; its errors are not
//!   logged to prevent credential leakage
//! - BYTEA data is Base64-encoded for JSON safety
//! - NUMERIC values are rendered as strings to keep their precision
//! - Row limits are enforced in application code

use std::error::Error as StdError;
use std::fmt::Write as _;
use std::time::Instant;

use serde_json::Value;
use tokio_postgres::config::SslMode as PgSslMode;
use tokio_postgres::types::{FromSql, ToSql, Type};
use tokio_postgres::{Client, Config, NoTls, Row};

use crate::descriptor::{ConnectionDescriptor, SslMode};
use crate::engine::{
    ColumnInfo, ConnectFailure, ConnectOptions, EngineError, EngineResult, ForeignKeyInfo,
    IndexInfo, QueryResult, TableInfo, TableKind,
};

const LIST_SCHEMAS_SQL: &str = "
    SELECT n.nspname::text
    FROM pg_catalog.pg_namespace n
    WHERE n.nspname NOT IN ('pg_catalog', 'information_schema')
      AND n.nspname NOT LIKE 'pg\\_toast%'
      AND n.nspname NOT LIKE 'pg\\_temp\\_%'
    ORDER BY n.nspname";

const SCHEMA_EXISTS_SQL: &str =
    "SELECT EXISTS (SELECT 1 FROM pg_catalog.pg_namespace WHERE nspname = $1::text)";

// One row per column; relations without columns yield a single row of NULLs
const TABLE_COLUMNS_SQL: &str = "
    SELECT c.relname::text,
           c.relkind::text,
           a.attname::text,
           pg_catalog.format_type(a.atttypid, a.atttypmod),
           NOT a.attnotnull,
           a.attnum::int4,
           pg_catalog.pg_get_expr(d.adbin, d.adrelid)
    FROM pg_catalog.pg_class c
    JOIN pg_catalog.pg_namespace n ON n.oid = c.relnamespace
    LEFT JOIN pg_catalog.pg_attribute a
           ON a.attrelid = c.oid AND a.attnum > 0 AND NOT a.attisdropped
    LEFT JOIN pg_catalog.pg_attrdef d
           ON d.adrelid = c.oid AND d.adnum = a.attnum
    WHERE n.nspname = $1::text
      AND c.relkind IN ('r', 'p', 'v', 'm', 'f')
      AND ($2::text IS NULL OR c.relname = $2::text)
    ORDER BY c.relname, a.attnum";

const PRIMARY_KEYS_SQL: &str = "
    SELECT c.relname::text, a.attname::text
    FROM pg_catalog.pg_constraint con
    JOIN pg_catalog.pg_class c ON c.oid = con.conrelid
    JOIN pg_catalog.pg_namespace n ON n.oid = c.relnamespace
    CROSS JOIN LATERAL unnest(con.conkey) WITH ORDINALITY AS k(attnum, ord)
    JOIN pg_catalog.pg_attribute a ON a.attrelid = con.conrelid AND a.attnum = k.attnum
    WHERE con.contype = 'p'
      AND n.nspname = $1::text
      AND ($2::text IS NULL OR c.relname = $2::text)
    ORDER BY c.relname, k.ord";

const FOREIGN_KEYS_SQL: &str = "
    SELECT con.conname::text,
           src.relname::text,
           sa.attname::text,
           tn.nspname::text,
           tgt.relname::text,
           ta.attname::text
    FROM pg_catalog.pg_constraint con
    JOIN pg_catalog.pg_class src ON src.oid = con.conrelid
    JOIN pg_catalog.pg_namespace sn ON sn.oid = src.relnamespace
    JOIN pg_catalog.pg_class tgt ON tgt.oid = con.confrelid
    JOIN pg_catalog.pg_namespace tn ON tn.oid = tgt.relnamespace
    CROSS JOIN LATERAL unnest(con.conkey, con.confkey) WITH ORDINALITY AS k(src_attnum, tgt_attnum, ord)
    JOIN pg_catalog.pg_attribute sa ON sa.attrelid = con.conrelid AND sa.attnum = k.src_attnum
    JOIN pg_catalog.pg_attribute ta ON ta.attrelid = con.confrelid AND ta.attnum = k.tgt_attnum
    WHERE con.contype = 'f'
      AND sn.nspname = $1::text
      AND ($2::text IS NULL OR src.relname = $2::text)
    ORDER BY src.relname, con.conname, k.ord";

const INDEXES_SQL: &str = "
    SELECT i.relname::text, ix.indisunique, a.attname::text
    FROM pg_catalog.pg_index ix
    JOIN pg_catalog.pg_class t ON t.oid = ix.indrelid
    JOIN pg_catalog.pg_class i ON i.oid = ix.indexrelid
    JOIN pg_catalog.pg_namespace n ON n.oid = t.relnamespace
    CROSS JOIN LATERAL unnest(ix.indkey::int2[]) WITH ORDINALITY AS k(attnum, ord)
    LEFT JOIN pg_catalog.pg_attribute a ON a.attrelid = t.oid AND a.attnum = k.attnum
    WHERE n.nspname = $1::text
      AND t.relname = $2::text
      AND NOT ix.indisprimary
    ORDER BY i.relname, k.ord";

/// A live `PostgreSQL` session
pub struct PgConnection {
    client: Client,
}

impl PgConnection {
    /// Connect and spawn the connection driver task
    pub async fn connect(
        descriptor: &ConnectionDescriptor,
        options: ConnectOptions,
    ) -> std::result::Result<Self, ConnectFailure> {
        let config = build_pg_config(descriptor, options);

        let (client, connection) =
            match tokio::time::timeout(options.connect_timeout, config.connect(NoTls)).await {
                Err(_) => {
                    return Err(ConnectFailure {
                        detail: format!(
                            "connection attempt timed out after {}ms",
                            options.connect_timeout.as_millis()
                        ),
                        transient: true,
                    })
                }
                Ok(Err(e)) => {
                    // Server-side rejections (authentication, unknown database) are final
                    return Err(ConnectFailure {
                        transient: e.as_db_error().is_none(),
                        detail: describe_error(&e),
                    });
                }
                Ok(Ok(pair)) => pair,
            };

        // Connection errors are not logged to prevent credential leakage
        tokio::spawn(async move {
            let _ = connection.await;
        });

        Ok(Self { client })
    }

    /// Ask the server to stop the statement this session is running
    ///
    /// Fire and forget: the request goes over its own short-lived connection.
    pub fn cancel_in_flight(&self) {
        let token = self.client.cancel_token();
        tokio::spawn(async move {
            if token.cancel_query(NoTls).await.is_err() {
                tracing::debug!("cancel request was not delivered");
            }
        });
    }

    pub async fn ping(&mut self) -> EngineResult<()> {
        self.client.simple_query("SELECT 1").await.map_err(|e| self.classify(&e))?;
        Ok(())
    }

    pub async fn list_schemas(&mut self) -> EngineResult<Vec<String>> {
        let rows = self.client.query(LIST_SCHEMAS_SQL, &[]).await.map_err(|e| self.classify(&e))?;
        rows.iter().map(|row| get(row, 0)).collect()
    }

    pub async fn schema_exists(&mut self, schema: &str) -> EngineResult<bool> {
        let row =
            self.client.query_one(SCHEMA_EXISTS_SQL, &[&schema]).await.map_err(|e| self.classify(&e))?;
        get(&row, 0)
    }

    pub async fn list_tables(&mut self, schema: &str) -> EngineResult<Vec<TableInfo>> {
        self.load_tables(schema, None).await
    }

    pub async fn describe_table(&mut self, schema: &str, table: &str) -> EngineResult<Option<TableInfo>> {
        let Some(mut info) = self.load_tables(schema, Some(table)).await?.into_iter().next() else {
            return Ok(None);
        };
        info.foreign_keys = self.foreign_keys(schema, Some(table)).await?;
        info.indexes = self.indexes(schema, table).await?;
        Ok(Some(info))
    }

    pub async fn foreign_keys(&mut self, schema: &str, table: Option<&str>) -> EngineResult<Vec<ForeignKeyInfo>> {
        let rows = self
            .client
            .query(FOREIGN_KEYS_SQL, &[&schema, &table])
            .await
            .map_err(|e| self.classify(&e))?;

        // Rows arrive ordered by table, constraint and key position
        let mut foreign_keys: Vec<ForeignKeyInfo> = Vec::new();
        for row in &rows {
            let name: String = get(row, 0)?;
            let source_table: String = get(row, 1)?;
            let column: String = get(row, 2)?;
            let referenced_schema: String = get(row, 3)?;
            let referenced_table: String = get(row, 4)?;
            let referenced_column: String = get(row, 5)?;

            match foreign_keys.last_mut() {
                Some(fk) if fk.name == name && fk.table == source_table => {
                    fk.columns.push(column);
                    fk.referenced_columns.push(referenced_column);
                }
                _ => foreign_keys.push(ForeignKeyInfo {
                    name,
                    schema: schema.to_string(),
                    table: source_table,
                    columns: vec![column],
                    referenced_schema,
                    referenced_table,
                    referenced_columns: vec![referenced_column],
                }),
            }
        }
        Ok(foreign_keys)
    }

    pub async fn execute(
        &mut self,
        sql: &str,
        params: &[Value],
        max_rows: Option<usize>,
    ) -> EngineResult<QueryResult> {
        let start = Instant::now();
        let stmt = self.client.prepare(sql).await.map_err(|e| self.classify(&e))?;

        if stmt.params().len() != params.len() {
            return Err(EngineError::Statement(format!(
                "statement expects {} parameter(s), got {}",
                stmt.params().len(),
                params.len()
            )));
        }

        let bound = stmt
            .params()
            .iter()
            .zip(params)
            .enumerate()
            .map(|(i, (ty, value))| {
                json_to_sql(value, ty)
                    .map_err(|msg| EngineError::Statement(format!("parameter ${}: {msg}", i + 1)))
            })
            .collect::<EngineResult<Vec<_>>>()?;
        let refs: Vec<&(dyn ToSql + Sync)> =
            bound.iter().map(|b| b.as_ref() as &(dyn ToSql + Sync)).collect();

        if stmt.columns().is_empty() {
            let rows_affected =
                self.client.execute(&stmt, &refs).await.map_err(|e| self.classify(&e))?;
            return Ok(QueryResult {
                columns: Vec::new(),
                rows: Vec::new(),
                rows_affected: Some(rows_affected),
                truncated: false,
                execution_ms: elapsed_ms(start),
            });
        }

        let rows = self.client.query(&stmt, &refs).await.map_err(|e| self.classify(&e))?;
        let columns: Vec<String> = stmt.columns().iter().map(|c| c.name().to_string()).collect();

        let limit = max_rows.unwrap_or(usize::MAX);
        let truncated = rows.len() > limit;
        let mut out = Vec::with_capacity(rows.len().min(limit));
        for row in rows.iter().take(limit) {
            out.push(row_to_json(row)?);
        }

        Ok(QueryResult {
            columns,
            rows: out,
            rows_affected: None,
            truncated,
            execution_ms: elapsed_ms(start),
        })
    }

    async fn load_tables(&mut self, schema: &str, table: Option<&str>) -> EngineResult<Vec<TableInfo>> {
        let rows = self
            .client
            .query(TABLE_COLUMNS_SQL, &[&schema, &table])
            .await
            .map_err(|e| self.classify(&e))?;

        let mut tables: Vec<TableInfo> = Vec::new();
        for row in &rows {
            let name: String = get(row, 0)?;
            if tables.last().map_or(true, |t| t.name != name) {
                let relkind: String = get(row, 1)?;
                tables.push(TableInfo {
                    schema: schema.to_string(),
                    name,
                    kind: if matches!(relkind.as_str(), "v" | "m") { TableKind::View } else { TableKind::Table },
                    columns: Vec::new(),
                    primary_key: Vec::new(),
                    foreign_keys: Vec::new(),
                    indexes: Vec::new(),
                });
            }

            let Some(column) = get::<Option<String>>(row, 2)? else {
                continue;
            };
            let data_type: Option<String> = get(row, 3)?;
            let nullable: Option<bool> = get(row, 4)?;
            let ordinal: Option<i32> = get(row, 5)?;
            let default: Option<String> = get(row, 6)?;

            if let Some(current) = tables.last_mut() {
                current.columns.push(ColumnInfo {
                    name: column,
                    data_type: data_type.unwrap_or_default(),
                    nullable: nullable.unwrap_or(true),
                    ordinal: ordinal.and_then(|o| u32::try_from(o).ok()).unwrap_or(0),
                    default,
                });
            }
        }

        let pk_rows = self
            .client
            .query(PRIMARY_KEYS_SQL, &[&schema, &table])
            .await
            .map_err(|e| self.classify(&e))?;
        for row in &pk_rows {
            let table_name: String = get(row, 0)?;
            let column: String = get(row, 1)?;
            if let Some(t) = tables.iter_mut().find(|t| t.name == table_name) {
                t.primary_key.push(column);
            }
        }

        Ok(tables)
    }

    async fn indexes(&mut self, schema: &str, table: &str) -> EngineResult<Vec<IndexInfo>> {
        let rows =
            self.client.query(INDEXES_SQL, &[&schema, &table]).await.map_err(|e| self.classify(&e))?;

        let mut indexes: Vec<IndexInfo> = Vec::new();
        for row in &rows {
            let name: String = get(row, 0)?;
            let unique: bool = get(row, 1)?;
            let column: Option<String> = get(row, 2)?;
            let column = column.unwrap_or_else(|| "(expression)".to_string());

            match indexes.last_mut() {
                Some(index) if index.name == name => index.columns.push(column),
                _ => indexes.push(IndexInfo { name, columns: vec![column], unique }),
            }
        }
        Ok(indexes)
    }

    /// Decide whether a driver error leaves the session usable
    fn classify(&self, e: &tokio_postgres::Error) -> EngineError {
        let detail = describe_error(e);
        if let Some(db) = e.as_db_error() {
            let code = db.code().code();
            return if code == "57014" {
                EngineError::TimedOut(detail)
            } else if code.starts_with("08") || code.starts_with("57P") {
                EngineError::ConnectionLost(detail)
            } else {
                EngineError::Statement(detail)
            };
        }

        let io_failure = e.source().is_some_and(|s| s.is::<std::io::Error>());
        if e.is_closed() || io_failure || self.client.is_closed() {
            EngineError::ConnectionLost(detail)
        } else {
            EngineError::Statement(detail)
        }
    }
}

/// Build `PostgreSQL` connection config from a descriptor
fn build_pg_config(descriptor: &ConnectionDescriptor, options: ConnectOptions) -> Config {
    let mut config = Config::new();
    if let Some(host) = descriptor.host() {
        config.host(host);
    }
    if let Some(port) = descriptor.port() {
        config.port(port);
    }
    if let Some(user) = descriptor.user() {
        config.user(user);
    }
    if let Some(secret) = descriptor.secret() {
        config.password(secret.expose());
    }
    if let Some(database) = descriptor.database() {
        config.dbname(database);
    }
    config.application_name(descriptor.option("application_name").unwrap_or("dbexplorer"));
    config.connect_timeout(options.connect_timeout);
    config.ssl_mode(match descriptor.ssl_mode() {
        SslMode::Disable => PgSslMode::Disable,
        SslMode::Allow | SslMode::Prefer => PgSslMode::Prefer,
    });
    config
}

fn describe_error(e: &tokio_postgres::Error) -> String {
    match e.as_db_error() {
        Some(db) => format!("{}: {} (SQLSTATE {})", db.severity(), db.message(), db.code().code()),
        None => e.to_string(),
    }
}

fn elapsed_ms(start: Instant) -> u64 {
    u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX)
}

fn get<'a, T: FromSql<'a>>(row: &'a Row, idx: usize) -> EngineResult<T> {
    row.try_get(idx)
        .map_err(|e| EngineError::Statement(format!("failed to read catalog column {idx}: {e}")))
}

// ============================================================================
// Parameter binding
// ============================================================================

type BoxedParam = Box<dyn ToSql + Sync + Send>;

/// Bind a JSON value to the type the server inferred for the parameter
fn json_to_sql(value: &Value, ty: &Type) -> std::result::Result<BoxedParam, String> {
    let param: BoxedParam = match *ty {
        Type::BOOL => Box::new(nullable(value, |v| match v {
            Value::Bool(b) => Ok(*b),
            Value::String(s) => match s.to_ascii_lowercase().as_str() {
                "true" | "t" | "1" => Ok(true),
                "false" | "f" | "0" => Ok(false),
                _ => Err(format!("expected boolean, got '{s}'")),
            },
            other => Err(format!("expected boolean, got {other}")),
        })?),
        Type::INT2 => Box::new(nullable(value, |v| {
            i16::try_from(as_i64(v)?).map_err(|_| "value out of range for smallint".to_string())
        })?),
        Type::INT4 => Box::new(nullable(value, |v| {
            i32::try_from(as_i64(v)?).map_err(|_| "value out of range for integer".to_string())
        })?),
        Type::INT8 => Box::new(nullable(value, as_i64)?),
        #[allow(clippy::cast_possible_truncation)]
        Type::FLOAT4 => Box::new(nullable(value, |v| as_f64(v).map(|f| f as f32))?),
        Type::FLOAT8 => Box::new(nullable(value, as_f64)?),
        Type::TEXT | Type::VARCHAR | Type::BPCHAR | Type::NAME | Type::UNKNOWN => {
            Box::new(nullable(value, |v| Ok(as_text(v)))?)
        }
        Type::JSON | Type::JSONB => Box::new(nullable(value, |v| Ok(v.clone()))?),
        Type::UUID => Box::new(nullable(value, |v| {
            uuid::Uuid::parse_str(&as_text(v)).map_err(|e| format!("invalid uuid: {e}"))
        })?),
        Type::DATE => Box::new(nullable(value, |v| {
            chrono::NaiveDate::parse_from_str(&as_text(v), "%Y-%m-%d")
                .map_err(|e| format!("invalid date: {e}"))
        })?),
        Type::TIME => Box::new(nullable(value, |v| {
            chrono::NaiveTime::parse_from_str(&as_text(v), "%H:%M:%S%.f")
                .map_err(|e| format!("invalid time: {e}"))
        })?),
        Type::TIMESTAMP => Box::new(nullable(value, |v| {
            let text = as_text(v);
            chrono::NaiveDateTime::parse_from_str(&text, "%Y-%m-%dT%H:%M:%S%.f")
                .or_else(|_| chrono::NaiveDateTime::parse_from_str(&text, "%Y-%m-%d %H:%M:%S%.f"))
                .map_err(|e| format!("invalid timestamp: {e}"))
        })?),
        Type::TIMESTAMPTZ => Box::new(nullable(value, |v| {
            chrono::DateTime::parse_from_rfc3339(&as_text(v))
                .map(|dt| dt.with_timezone(&chrono::Utc))
                .map_err(|e| format!("invalid RFC 3339 timestamp: {e}"))
        })?),
        Type::BYTEA => Box::new(nullable(value, |v| {
            use base64::Engine;
            base64::engine::general_purpose::STANDARD
                .decode(as_text(v))
                .map_err(|e| format!("invalid base64 for bytea: {e}"))
        })?),
        _ => {
            return Err(format!(
                "unsupported parameter type '{}'; add an explicit cast such as $n::text",
                ty.name()
            ))
        }
    };
    Ok(param)
}

/// JSON `null` binds as SQL NULL of the parameter's type
fn nullable<T>(
    value: &Value,
    convert: impl FnOnce(&Value) -> std::result::Result<T, String>,
) -> std::result::Result<Option<T>, String> {
    match value {
        Value::Null => Ok(None),
        other => convert(other).map(Some),
    }
}

fn as_i64(value: &Value) -> std::result::Result<i64, String> {
    match value {
        Value::Number(n) => n.as_i64().ok_or_else(|| format!("expected integer, got {n}")),
        Value::String(s) => s.trim().parse().map_err(|_| format!("expected integer, got '{s}'")),
        other => Err(format!("expected integer, got {other}")),
    }
}

fn as_f64(value: &Value) -> std::result::Result<f64, String> {
    match value {
        Value::Number(n) => n.as_f64().ok_or_else(|| format!("expected number, got {n}")),
        Value::String(s) => s.trim().parse().map_err(|_| format!("expected number, got '{s}'")),
        other => Err(format!("expected number, got {other}")),
    }
}

fn as_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

// ============================================================================
// Result conversion
// ============================================================================

/// Convert a `PostgreSQL` row to a JSON-safe `Vec`
fn row_to_json(row: &Row) -> EngineResult<Vec<Value>> {
    (0..row.columns().len()).map(|idx| postgres_value_to_json(row, idx)).collect()
}

fn cell<'a, T: FromSql<'a>>(row: &'a Row, idx: usize) -> EngineResult<Option<T>> {
    row.try_get::<_, Option<T>>(idx).map_err(|e| {
        EngineError::Statement(format!(
            "failed to convert column '{}' ({}): {e}",
            row.columns()[idx].name(),
            row.columns()[idx].type_().name()
        ))
    })
}

fn array<'a, T: FromSql<'a>>(
    row: &'a Row,
    idx: usize,
    convert: impl Fn(T) -> Value,
) -> EngineResult<Option<Value>> {
    Ok(cell::<Vec<Option<T>>>(row, idx)?.map(|items| {
        Value::Array(items.into_iter().map(|item| item.map_or(Value::Null, &convert)).collect())
    }))
}

fn float_to_json(v: f64) -> Value {
    // NaN and Infinity have no JSON representation
    serde_json::Number::from_f64(v).map_or(Value::Null, Value::Number)
}

/// Convert `PostgreSQL` value to JSON value
fn postgres_value_to_json(row: &Row, idx: usize) -> EngineResult<Value> {
    let col_type = row.columns()[idx].type_().clone();

    let value = match col_type {
        Type::BOOL => cell::<bool>(row, idx)?.map(Value::Bool),
        Type::INT2 => cell::<i16>(row, idx)?.map(Value::from),
        Type::INT4 => cell::<i32>(row, idx)?.map(Value::from),
        Type::INT8 => cell::<i64>(row, idx)?.map(Value::from),
        Type::OID => cell::<u32>(row, idx)?.map(Value::from),
        Type::FLOAT4 => cell::<f32>(row, idx)?.map(|v| float_to_json(f64::from(v))),
        Type::FLOAT8 => cell::<f64>(row, idx)?.map(float_to_json),
        Type::NUMERIC => cell::<PgNumeric>(row, idx)?.map(|n| Value::String(n.0)),
        Type::VARCHAR | Type::TEXT | Type::BPCHAR | Type::NAME => {
            cell::<String>(row, idx)?.map(Value::String)
        }
        Type::JSON | Type::JSONB => cell::<Value>(row, idx)?,
        Type::BYTEA => cell::<Vec<u8>>(row, idx)?.map(|v| {
            use base64::Engine;
            Value::String(base64::engine::general_purpose::STANDARD.encode(v))
        }),
        Type::TIMESTAMP => cell::<chrono::NaiveDateTime>(row, idx)?
            .map(|v| Value::String(v.format("%Y-%m-%dT%H:%M:%S%.f").to_string())),
        Type::TIMESTAMPTZ => {
            cell::<chrono::DateTime<chrono::Utc>>(row, idx)?.map(|v| Value::String(v.to_rfc3339()))
        }
        Type::DATE => {
            cell::<chrono::NaiveDate>(row, idx)?.map(|v| Value::String(v.format("%Y-%m-%d").to_string()))
        }
        Type::TIME => cell::<chrono::NaiveTime>(row, idx)?
            .map(|v| Value::String(v.format("%H:%M:%S%.f").to_string())),
        Type::UUID => cell::<uuid::Uuid>(row, idx)?.map(|v| Value::String(v.to_string())),
        Type::BOOL_ARRAY => array::<bool>(row, idx, Value::Bool)?,
        Type::INT2_ARRAY => array::<i16>(row, idx, Value::from)?,
        Type::INT4_ARRAY => array::<i32>(row, idx, Value::from)?,
        Type::INT8_ARRAY => array::<i64>(row, idx, Value::from)?,
        Type::FLOAT4_ARRAY => array::<f32>(row, idx, |v| float_to_json(f64::from(v)))?,
        Type::FLOAT8_ARRAY => array::<f64>(row, idx, float_to_json)?,
        Type::TEXT_ARRAY | Type::VARCHAR_ARRAY | Type::BPCHAR_ARRAY | Type::NAME_ARRAY => {
            array::<String>(row, idx, Value::String)?
        }
        Type::UUID_ARRAY => array::<uuid::Uuid>(row, idx, |v| Value::String(v.to_string()))?,
        Type::JSONB_ARRAY | Type::JSON_ARRAY => array::<Value>(row, idx, |v| v)?,
        // Enums, domains over text and other text-like types arrive as UTF-8;
        // anything else is passed through as Base64
        _ => cell::<RawValue>(row, idx)?.map(|raw| match String::from_utf8(raw.0) {
            Ok(text) => Value::String(text),
            Err(e) => {
                use base64::Engine;
                Value::String(base64::engine::general_purpose::STANDARD.encode(e.into_bytes()))
            }
        }),
    };

    Ok(value.unwrap_or(Value::Null))
}

/// Raw wire bytes for types without a dedicated conversion
struct RawValue(Vec<u8>);

impl<'a> FromSql<'a> for RawValue {
    fn from_sql(_: &Type, raw: &'a [u8]) -> std::result::Result<Self, Box<dyn StdError + Sync + Send>> {
        Ok(Self(raw.to_vec()))
    }

    fn accepts(_: &Type) -> bool {
        true
    }
}

/// NUMERIC rendered as decimal text (binary wire format: base-10000 digits)
struct PgNumeric(String);

impl<'a> FromSql<'a> for PgNumeric {
    fn from_sql(_: &Type, raw: &'a [u8]) -> std::result::Result<Self, Box<dyn StdError + Sync + Send>> {
        decode_numeric(raw).map(Self).map_err(Into::into)
    }

    fn accepts(ty: &Type) -> bool {
        *ty == Type::NUMERIC
    }
}

fn decode_numeric(raw: &[u8]) -> std::result::Result<String, String> {
    let word = |at: usize| -> std::result::Result<u16, String> {
        raw.get(at..at + 2)
            .map(|b| u16::from_be_bytes([b[0], b[1]]))
            .ok_or_else(|| "truncated numeric value".to_string())
    };

    let ndigits = usize::from(word(0)?);
    #[allow(clippy::cast_possible_wrap)]
    let weight = word(2)? as i16;
    let sign = word(4)?;
    let dscale = usize::from(word(6)?);

    match sign {
        0xC000 => return Ok("NaN".to_string()),
        0xD000 => return Ok("Infinity".to_string()),
        0xF000 => return Ok("-Infinity".to_string()),
        _ => {}
    }

    let digits = (0..ndigits).map(|i| word(8 + i * 2)).collect::<std::result::Result<Vec<u16>, _>>()?;
    let digit_at = |k: i32| -> u16 {
        usize::try_from(k).ok().and_then(|k| digits.get(k).copied()).unwrap_or(0)
    };

    let mut out = String::new();
    if sign == 0x4000 {
        out.push('-');
    }

    let weight = i32::from(weight);
    if weight < 0 {
        out.push('0');
    } else {
        for k in 0..=weight {
            if k == 0 {
                let _ = write!(out, "{}", digit_at(k));
            } else {
                let _ = write!(out, "{:04}", digit_at(k));
            }
        }
    }

    if dscale > 0 {
        let mut frac = String::new();
        let mut k = weight + 1;
        while frac.len() < dscale {
            let _ = write!(frac, "{:04}", digit_at(k));
            k += 1;
        }
        frac.truncate(dscale);
        out.push('.');
        out.push_str(&frac);
    }

    Ok(out)
}
