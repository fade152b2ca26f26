//! Database Engine Types and Connection Dispatch
//!
//! This module defines the catalog and result types shared by every engine and
//! the [`Connection`] enum that dispatches to an engine implementation.
//!
//! # Engine Isolation
//! Each engine implementation is completely independent.
//! No shared SQL helpers or cross-engine abstractions: catalog queries, value
//! conversion and error classification live inside the engine module.
//!
//! # Failure Classification
//! Engine calls return [`EngineError`], which tells the pool whether the
//! connection is still usable. The pool turns it into an [`ExplorerError`]
//! carrying the logical database name.
//!
//! [`ExplorerError`]: crate::error::ExplorerError

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::descriptor::ConnectionDescriptor;

#[cfg(feature = "sqlite")]
pub mod sqlite;

#[cfg(feature = "postgres")]
pub mod postgres;

/// Supported database engine types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseType {
    /// `PostgreSQL` database
    Postgres,
    /// `SQLite` database
    SQLite,
}

impl DatabaseType {
    /// Get the engine name as a string
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Postgres => "postgres",
            Self::SQLite => "sqlite",
        }
    }

    /// Schema used when a caller does not name one
    #[must_use]
    pub const fn default_schema(&self) -> &'static str {
        match self {
            Self::Postgres => "public",
            Self::SQLite => "main",
        }
    }

    /// Whether support for this engine was compiled in
    #[must_use]
    pub const fn is_enabled(&self) -> bool {
        match self {
            Self::Postgres => cfg!(feature = "postgres"),
            Self::SQLite => cfg!(feature = "sqlite"),
        }
    }
}

impl std::fmt::Display for DatabaseType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Relation kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TableKind {
    Table,
    View,
}

/// Table information
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableInfo {
    /// Schema name (`SQLite`: attached database name)
    pub schema: String,

    /// Table name
    pub name: String,

    pub kind: TableKind,

    /// Table columns in ordinal order
    pub columns: Vec<ColumnInfo>,

    /// Primary key columns in key order
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub primary_key: Vec<String>,

    /// Foreign keys (only populated by `describe_table`)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub foreign_keys: Vec<ForeignKeyInfo>,

    /// Indexes (only populated by `describe_table`)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub indexes: Vec<IndexInfo>,
}

impl TableInfo {
    #[must_use]
    pub fn column(&self, name: &str) -> Option<&ColumnInfo> {
        self.columns.iter().find(|c| c.name == name)
    }
}

/// Column information
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnInfo {
    /// Column name
    pub name: String,

    /// Declared column type (engine-specific spelling)
    pub data_type: String,

    /// Whether column allows NULL values
    pub nullable: bool,

    /// 1-based position in the table
    pub ordinal: u32,

    /// Default expression (if any)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default: Option<String>,
}

/// Declared foreign key, straight from catalog metadata
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForeignKeyInfo {
    /// Constraint name
    pub name: String,

    /// Schema of the referencing table
    pub schema: String,

    /// Referencing table
    pub table: String,

    /// Referencing columns, paired by position with `referenced_columns`
    pub columns: Vec<String>,

    pub referenced_schema: String,

    pub referenced_table: String,

    pub referenced_columns: Vec<String>,
}

/// Index information
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexInfo {
    /// Index name
    pub name: String,

    /// Indexed columns (`(expression)` for expression entries)
    pub columns: Vec<String>,

    /// Whether this is a unique index
    pub unique: bool,
}

/// Query execution result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryResult {
    /// Column names in result set
    pub columns: Vec<String>,

    /// Result rows in columnar order (one JSON array per row)
    pub rows: Vec<Vec<serde_json::Value>>,

    /// Number of rows affected (statements without a result set)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rows_affected: Option<u64>,

    /// More rows were available than the row limit allowed
    #[serde(default)]
    pub truncated: bool,

    /// Execution time in milliseconds
    pub execution_ms: u64,
}

/// Failure reported by an engine call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    /// The connection is broken and must be discarded
    ConnectionLost(String),
    /// The statement failed; the connection is still usable
    Statement(String),
    /// The engine gave up waiting (lock or busy timeout)
    TimedOut(String),
}

impl EngineError {
    #[must_use]
    pub fn detail(&self) -> &str {
        match self {
            Self::ConnectionLost(d) | Self::Statement(d) | Self::TimedOut(d) => d,
        }
    }
}

pub type EngineResult<T> = std::result::Result<T, EngineError>;

/// Failure to open a physical connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectFailure {
    /// Driver message (may contain credentials until scrubbed)
    pub detail: String,
    /// Network-level failure worth one retry
    pub transient: bool,
}

/// Timeouts handed to an engine when opening a connection
#[derive(Debug, Clone, Copy)]
pub struct ConnectOptions {
    pub connect_timeout: Duration,
    /// Used as the `SQLite` busy timeout
    pub statement_timeout: Duration,
}

/// A live connection to one database
pub enum Connection {
    #[cfg(feature = "postgres")]
    Postgres(postgres::PgConnection),
    #[cfg(feature = "sqlite")]
    Sqlite(sqlite::SqliteConnection),
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Connection({})", self.engine())
    }
}

/// Open a physical connection for a descriptor
pub async fn connect(
    descriptor: &ConnectionDescriptor,
    options: ConnectOptions,
) -> std::result::Result<Connection, ConnectFailure> {
    match descriptor.engine() {
        #[cfg(feature = "postgres")]
        DatabaseType::Postgres => {
            postgres::PgConnection::connect(descriptor, options).await.map(Connection::Postgres)
        }
        #[cfg(feature = "sqlite")]
        DatabaseType::SQLite => {
            sqlite::SqliteConnection::open(descriptor, options).map(Connection::Sqlite)
        }
        #[allow(unreachable_patterns)]
        other => Err(ConnectFailure {
            detail: format!("{other} support is not enabled in this build"),
            transient: false,
        }),
    }
}

impl Connection {
    #[must_use]
    pub const fn engine(&self) -> DatabaseType {
        match self {
            #[cfg(feature = "postgres")]
            Self::Postgres(_) => DatabaseType::Postgres,
            #[cfg(feature = "sqlite")]
            Self::Sqlite(_) => DatabaseType::SQLite,
        }
    }

    /// Cancel a statement abandoned by a timed-out caller
    pub fn cancel_in_flight(&self) {
        match self {
            #[cfg(feature = "postgres")]
            Self::Postgres(c) => c.cancel_in_flight(),
            // Statements run inline, so nothing outlives the caller
            #[cfg(feature = "sqlite")]
            Self::Sqlite(_) => {}
        }
    }

    /// Trivial round trip (`SELECT 1`)
    pub async fn ping(&mut self) -> EngineResult<()> {
        match self {
            #[cfg(feature = "postgres")]
            Self::Postgres(c) => c.ping().await,
            #[cfg(feature = "sqlite")]
            Self::Sqlite(c) => c.ping(),
        }
    }

    pub async fn list_schemas(&mut self) -> EngineResult<Vec<String>> {
        match self {
            #[cfg(feature = "postgres")]
            Self::Postgres(c) => c.list_schemas().await,
            #[cfg(feature = "sqlite")]
            Self::Sqlite(c) => c.list_schemas(),
        }
    }

    pub async fn schema_exists(&mut self, schema: &str) -> EngineResult<bool> {
        match self {
            #[cfg(feature = "postgres")]
            Self::Postgres(c) => c.schema_exists(schema).await,
            #[cfg(feature = "sqlite")]
            Self::Sqlite(c) => c.schema_exists(schema),
        }
    }

    /// Tables and views of a schema with columns and primary keys
    pub async fn list_tables(&mut self, schema: &str) -> EngineResult<Vec<TableInfo>> {
        match self {
            #[cfg(feature = "postgres")]
            Self::Postgres(c) => c.list_tables(schema).await,
            #[cfg(feature = "sqlite")]
            Self::Sqlite(c) => c.list_tables(schema),
        }
    }

    /// Full table details, `None` when the table does not exist
    pub async fn describe_table(&mut self, schema: &str, table: &str) -> EngineResult<Option<TableInfo>> {
        match self {
            #[cfg(feature = "postgres")]
            Self::Postgres(c) => c.describe_table(schema, table).await,
            #[cfg(feature = "sqlite")]
            Self::Sqlite(c) => c.describe_table(schema, table),
        }
    }

    /// Declared foreign keys of a schema, optionally limited to one referencing table
    pub async fn foreign_keys(
        &mut self,
        schema: &str,
        table: Option<&str>,
    ) -> EngineResult<Vec<ForeignKeyInfo>> {
        match self {
            #[cfg(feature = "postgres")]
            Self::Postgres(c) => c.foreign_keys(schema, table).await,
            #[cfg(feature = "sqlite")]
            Self::Sqlite(c) => c.foreign_keys(schema, table),
        }
    }

    /// Execute one parameterized statement
    pub async fn execute(
        &mut self,
        sql: &str,
        params: &[serde_json::Value],
        max_rows: Option<usize>,
    ) -> EngineResult<QueryResult> {
        match self {
            #[cfg(feature = "postgres")]
            Self::Postgres(c) => c.execute(sql, params, max_rows).await,
            #[cfg(feature = "sqlite")]
            Self::Sqlite(c) => c.execute(sql, params, max_rows),
        }
    }
}
