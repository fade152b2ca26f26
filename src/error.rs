//! Error Handling Infrastructure
//!
//! This module defines all error types used throughout dbexplorer.
//! All errors are structured and map to specific error codes for JSON output.
//!
//! # Error Categories
//! - `InvalidDescriptor`: Malformed connection strings (never retried)
//! - `DuplicateName` / `NotFound` / `NoCurrentSelected` / `RemovalRefused`: Registry errors
//! - `Unreachable` / `Timeout`: Network-bound failures against a registered database
//! - `SchemaNotFound` / `TableNotFound`: Introspection misses
//! - `QueryError`: SQL execution failures
//! - `InvalidInput` / `ConfigError`: Caller and configuration mistakes
//!
//! Messages never contain credentials. Engine-derived detail is scrubbed by the
//! descriptor before it is wrapped here.

use thiserror::Error;

/// Main error type for dbexplorer operations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ExplorerError {
    /// Connection string could not be parsed
    #[error("Invalid connection descriptor: {0}")]
    InvalidDescriptor(String),

    /// A database with this name is already registered
    #[error("Database '{0}' is already registered")]
    DuplicateName(String),

    /// No database registered under this name
    #[error("Database '{name}' not found. Available databases: {}", format_available(.available))]
    NotFound { name: String, available: Vec<String> },

    /// No database name given and no current database set
    #[error("No database specified and no current database selected")]
    NoCurrentSelected,

    /// Removal blocked by the registry's removal policy
    #[error("Cannot remove database '{0}': it is the current database")]
    RemovalRefused(String),

    /// Database could not be reached (network or authentication failure)
    #[error("Database '{database}' is unreachable: {detail}")]
    Unreachable { database: String, detail: String },

    /// A bounded wait was exceeded
    #[error("{operation} on database '{database}' timed out after {timeout_ms}ms")]
    Timeout { database: String, operation: String, timeout_ms: u64 },

    /// Schema does not exist in the target database
    #[error("Schema '{schema}' not found in database '{database}'")]
    SchemaNotFound { database: String, schema: String },

    /// Table does not exist in the target schema
    #[error("Table '{schema}.{table}' not found in database '{database}'")]
    TableNotFound { database: String, schema: String, table: String },

    /// Query execution failed
    #[error("Query failed on database '{database}': {detail}")]
    QueryError { database: String, detail: String },

    /// Invalid input or missing required parameters
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Configuration error (file not found, invalid JSON, bad environment value)
    #[error("Configuration error: {0}")]
    ConfigError(String),
}

fn format_available(available: &[String]) -> String {
    if available.is_empty() {
        "(none)".to_string()
    } else {
        available.join(", ")
    }
}

impl ExplorerError {
    /// Convert error to error code string for JSON output
    ///
    /// Error codes are stable and suitable for programmatic handling by agents.
    #[must_use]
    pub const fn error_code(&self) -> &'static str {
        match self {
            Self::InvalidDescriptor(_) => "INVALID_DESCRIPTOR",
            Self::DuplicateName(_) => "DUPLICATE_NAME",
            Self::NotFound { .. } => "NOT_FOUND",
            Self::NoCurrentSelected => "NO_CURRENT_SELECTED",
            Self::RemovalRefused(_) => "REMOVAL_REFUSED",
            Self::Unreachable { .. } => "UNREACHABLE",
            Self::Timeout { .. } => "TIMEOUT",
            Self::SchemaNotFound { .. } => "SCHEMA_NOT_FOUND",
            Self::TableNotFound { .. } => "TABLE_NOT_FOUND",
            Self::QueryError { .. } => "QUERY_ERROR",
            Self::InvalidInput(_) => "INVALID_INPUT",
            Self::ConfigError(_) => "CONFIG_ERROR",
        }
    }

    /// Get human-readable error message (agent-appropriate, no sensitive data)
    #[must_use]
    pub fn message(&self) -> String {
        self.to_string()
    }

    /// Database name the error refers to, when there is one
    #[must_use]
    pub fn database(&self) -> Option<&str> {
        match self {
            Self::NotFound { name, .. } => Some(name),
            Self::DuplicateName(name) | Self::RemovalRefused(name) => Some(name),
            Self::Unreachable { database, .. }
            | Self::Timeout { database, .. }
            | Self::SchemaNotFound { database, .. }
            | Self::TableNotFound { database, .. }
            | Self::QueryError { database, .. } => Some(database),
            _ => None,
        }
    }

    /// Create an invalid descriptor error
    pub fn invalid_descriptor(message: impl Into<String>) -> Self {
        Self::InvalidDescriptor(message.into())
    }

    /// Create a duplicate name error
    pub fn duplicate_name(name: impl Into<String>) -> Self {
        Self::DuplicateName(name.into())
    }

    /// Create a not-found error listing the names that do exist
    pub fn not_found(name: impl Into<String>, available: Vec<String>) -> Self {
        Self::NotFound { name: name.into(), available }
    }

    /// Create a removal refused error
    pub fn removal_refused(name: impl Into<String>) -> Self {
        Self::RemovalRefused(name.into())
    }

    /// Create an unreachable error
    pub fn unreachable(database: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::Unreachable { database: database.into(), detail: detail.into() }
    }

    /// Create a timeout error
    pub fn timeout(database: impl Into<String>, operation: impl Into<String>, timeout_ms: u64) -> Self {
        Self::Timeout { database: database.into(), operation: operation.into(), timeout_ms }
    }

    /// Create a schema-not-found error
    pub fn schema_not_found(database: impl Into<String>, schema: impl Into<String>) -> Self {
        Self::SchemaNotFound { database: database.into(), schema: schema.into() }
    }

    /// Create a table-not-found error
    pub fn table_not_found(
        database: impl Into<String>,
        schema: impl Into<String>,
        table: impl Into<String>,
    ) -> Self {
        Self::TableNotFound { database: database.into(), schema: schema.into(), table: table.into() }
    }

    /// Create a query error
    pub fn query_error(database: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::QueryError { database: database.into(), detail: detail.into() }
    }

    /// Create an invalid input error
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput(message.into())
    }

    /// Create a configuration error
    pub fn config_error(message: impl Into<String>) -> Self {
        Self::ConfigError(message.into())
    }
}

/// Result type alias for dbexplorer operations
pub type Result<T> = std::result::Result<T, ExplorerError>;
