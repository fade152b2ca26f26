//! JSON Output Envelope Types
//!
//! Every tool call produces exactly one envelope on stdout.
//!
//! # Output Contract
//! - Success: `{"ok": true, "tool": "...", "database": "...", "data": {...}, "meta": {...}}`
//! - Error: `{"ok": false, "tool": "...", "database": "...", "error": {"code": "...", "message": "..."}}`
//!
//! `database` is omitted when the call is not scoped to one database.

use serde::{Deserialize, Serialize};

use crate::error::ExplorerError;

/// Success envelope for tool results
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuccessEnvelope<T> {
    /// Always true for success envelopes
    pub ok: bool,

    /// Tool that was called
    pub tool: String,

    /// Database the call ran against
    #[serde(skip_serializing_if = "Option::is_none")]
    pub database: Option<String>,

    /// Tool-specific data
    pub data: T,

    pub meta: Metadata,
}

impl<T> SuccessEnvelope<T> {
    pub fn new(tool: impl Into<String>, database: Option<String>, data: T, meta: Metadata) -> Self {
        Self { ok: true, tool: tool.into(), database, data, meta }
    }
}

/// Error envelope for failed tool calls
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorEnvelope {
    /// Always false for error envelopes
    pub ok: bool,

    pub tool: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub database: Option<String>,

    pub error: ErrorInfo,
}

impl ErrorEnvelope {
    pub fn new(tool: impl Into<String>, database: Option<String>, error: ErrorInfo) -> Self {
        Self { ok: false, tool: tool.into(), database, error }
    }

    /// Build from an `ExplorerError`, taking the database name from the error
    pub fn from_error(tool: impl Into<String>, err: &ExplorerError) -> Self {
        Self::new(
            tool,
            err.database().map(str::to_string),
            ErrorInfo { code: err.error_code().to_string(), message: err.message() },
        )
    }
}

/// Error information structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorInfo {
    /// Stable error code (e.g., `NOT_FOUND`, `UNREACHABLE`)
    pub code: String,

    /// Human-readable message, credentials scrubbed
    pub message: String,
}

impl ErrorInfo {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self { code: code.into(), message: message.into() }
    }
}

/// Execution metadata included in all success responses
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Metadata {
    /// Wall-clock time of the tool call in milliseconds
    pub execution_ms: u64,

    /// Rows returned by the `query` tool
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rows_returned: Option<usize>,
}

impl Metadata {
    #[must_use]
    pub const fn new(execution_ms: u64, rows_returned: Option<usize>) -> Self {
        Self { execution_ms, rows_returned }
    }
}
