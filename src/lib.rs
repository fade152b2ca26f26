//! dbexplorer - Multi-Database Explorer for Agents
//!
//! dbexplorer keeps a registry of named database connections and lets an agent
//! explore them: list schemas and tables, describe tables, run parameterized
//! queries, and discover relationships between tables from declared foreign keys
//! and `<name>_id` column naming.
//!
//! # Core Principles
//! - Agent-first, machine-only interface (JSON-only output)
//! - One registry, many databases, an explicit "current" pointer
//! - Lazy connections (registering never touches the network)
//! - Credentials never appear in output or logs
//!
//! # Module Organization
//! - [`error`] - Error types and handling
//! - [`output`] - JSON output envelope types
//! - [`descriptor`] - Connection string parsing and redaction
//! - [`engine`] - Catalog types and engine implementations
//! - [`pool`] - Per-database connection pools
//! - [`registry`] - Named connection registry
//! - [`introspect`] - Schema introspection
//! - [`relationships`] - Relationship inference
//! - [`statement`] / [`query`] - Statement checks and execution
//! - [`config`] - Configuration management
//! - [`tools`] - Tool façade used by the CLI

#[cfg(not(any(feature = "postgres", feature = "sqlite")))]
compile_error!("enable at least one engine feature: `postgres` or `sqlite`");

pub mod error;         // Error handling infrastructure
pub mod output;        // JSON output envelopes
pub mod descriptor;    // Connection descriptors
pub mod engine;        // Engine dispatch and implementations
pub mod pool;          // Connection pools
pub mod registry;      // Named connections and the current pointer
pub mod introspect;    // Catalog lookups
pub mod relationships; // Declared + implied relationships
pub mod statement;     // Statement checks and query policy
pub mod query;         // Statement execution
pub mod config;        // Configuration management
pub mod tools;         // Agent-facing tool façade

// Re-export commonly used types for convenience
pub use error::{ExplorerError, Result};
pub use output::{ErrorEnvelope, ErrorInfo, Metadata, SuccessEnvelope};
pub use descriptor::ConnectionDescriptor;
pub use engine::{ColumnInfo, DatabaseType, ForeignKeyInfo, IndexInfo, QueryResult, TableInfo, TableKind};
pub use pool::{ConnectionPool, ConnectionStatus, HealthReport, PoolSettings};
pub use registry::{ConnectionEntry, EntrySummary, Registry, RemovalPolicy};
pub use relationships::{Confidence, Direction, InferredRelationship};
pub use statement::QueryPolicy;
pub use config::{LoadOptions, Settings};
pub use tools::{tool_definitions, ToolDefinition, ToolFacade, ToolOutput};
