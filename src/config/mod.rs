//! Configuration Management
//!
//! This module builds the startup [`Settings`]: which databases to register and
//! how pools and the `query` tool behave.
//!
//! # Configuration Locations
//! - Global: `<config_dir>/dbexplorer/config.json` (per-user)
//! - Local: `.dbexplorer/config.json` (team-shareable, per-project)
//! - Explicit: `--config <PATH>` (replaces the global/local lookup)
//!
//! # Resolution Precedence (lowest to highest)
//! 1. Built-in defaults
//! 2. Global config file
//! 3. Local config file
//! 4. Environment (a `.env` file fills in variables that are not already set)
//! 5. `--conn` on the command line
//!
//! Files are merged key by key, so a local file can override a single pool
//! timeout without repeating the rest.
//!
//! # Environment
//! - `POSTGRES_CONNECTION_STRING`: comma-separated bulk connection strings
//! - `POSTGRES_DB_<NAME>`: one named connection (name lower-cased)
//! - `DBEXPLORER_DATABASE_URL`: the primary connection
//! - `DBEXPLORER_MAX_CONNECTIONS`, `DBEXPLORER_*_TIMEOUT_MS`: pool settings
//! - `DBEXPLORER_READ_ONLY`, `DBEXPLORER_MAX_ROWS`: query policy

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{ExplorerError, Result};
use crate::pool::PoolSettings;
use crate::statement::QueryPolicy;

const APP_DIR: &str = "dbexplorer";
const LOCAL_DIR: &str = ".dbexplorer";
const CONFIG_FILE: &str = "config.json";

const ENV_BULK: &str = "POSTGRES_CONNECTION_STRING";
const ENV_NAMED_PREFIX: &str = "POSTGRES_DB_";
const ENV_PRIMARY: &str = "DBEXPLORER_DATABASE_URL";

/// Startup configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Registered under the name `primary`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub primary: Option<String>,

    /// Comma-separated connection strings registered under generated names
    #[serde(skip_serializing_if = "Option::is_none")]
    pub connection_string: Option<String>,

    /// Named connection strings
    pub databases: BTreeMap<String, String>,

    pub pool: PoolSettings,

    pub query: QueryPolicy,

    /// Refuse to unregister the current database instead of clearing the pointer
    pub refuse_removing_current: bool,
}

/// Where [`load`] looks for configuration
#[derive(Debug, Clone, Default)]
pub struct LoadOptions {
    /// `--config`: read only this file
    pub config_file: Option<PathBuf>,
    /// `.env` file to read (missing files are ignored)
    pub env_file: Option<PathBuf>,
    /// `--conn`: primary connection string
    pub primary: Option<String>,
}

/// Get path to local config file (`.dbexplorer/config.json`)
pub fn local_config_path() -> Result<PathBuf> {
    let current_dir = std::env::current_dir().map_err(|e| {
        ExplorerError::config_error(format!("Could not determine current directory: {e}"))
    })?;

    Ok(current_dir.join(LOCAL_DIR).join(CONFIG_FILE))
}

/// Get path to global config file (`<config_dir>/dbexplorer/config.json`)
pub fn global_config_path() -> Result<PathBuf> {
    let config_dir = dirs::config_dir()
        .ok_or_else(|| ExplorerError::config_error("Could not determine user config directory"))?;

    Ok(config_dir.join(APP_DIR).join(CONFIG_FILE))
}

/// Build settings from every source
pub fn load(options: &LoadOptions) -> Result<Settings> {
    let mut settings = match &options.config_file {
        Some(path) => {
            if !path.exists() {
                return Err(ExplorerError::config_error(format!(
                    "Config file not found: {}",
                    path.display()
                )));
            }
            load_files(&[path.clone()])?
        }
        None => load_files(&[global_config_path()?, local_config_path()?])?,
    };

    let dotenv = options.env_file.as_deref().map(read_dotenv).unwrap_or_default();
    settings.apply_env(merge_env(dotenv, std::env::vars()))?;
    settings.apply_primary(options.primary.clone());

    tracing::debug!(
        primary = settings.primary.is_some(),
        bulk = settings.connection_string.is_some(),
        named = settings.databases.len(),
        read_only = settings.query.read_only,
        "loaded configuration"
    );
    Ok(settings)
}

/// Merge config files in order (later files win, key by key); missing files are skipped
pub fn load_files(paths: &[PathBuf]) -> Result<Settings> {
    let mut merged = Value::Object(serde_json::Map::new());
    for path in paths {
        if let Some(value) = read_config_value(path)? {
            tracing::debug!(path = %path.display(), "read config file");
            merge_json(&mut merged, value);
        }
    }
    Settings::from_json(merged)
}

/// Read one config file as raw JSON, `None` if it does not exist
fn read_config_value(path: &Path) -> Result<Option<Value>> {
    if !path.exists() {
        return Ok(None);
    }

    let contents = fs::read_to_string(path).map_err(|e| {
        ExplorerError::config_error(format!("Could not read config file {}: {e}", path.display()))
    })?;

    let value: Value = serde_json::from_str(&contents).map_err(|e| {
        ExplorerError::config_error(format!("Invalid config file {}: {e}", path.display()))
    })?;

    if !value.is_object() {
        return Err(ExplorerError::config_error(format!(
            "Invalid config file {}: expected a JSON object",
            path.display()
        )));
    }
    Ok(Some(value))
}

/// Overlay `overlay` onto `base`, recursing into objects
fn merge_json(base: &mut Value, overlay: Value) {
    match (base, overlay) {
        (Value::Object(base), Value::Object(overlay)) => {
            for (key, value) in overlay {
                match base.get_mut(&key) {
                    Some(existing) => merge_json(existing, value),
                    None => {
                        base.insert(key, value);
                    }
                }
            }
        }
        (base, overlay) => *base = overlay,
    }
}

/// Combine `.env` entries with the process environment (process wins)
fn merge_env(
    dotenv: Vec<(String, String)>,
    process: impl IntoIterator<Item = (String, String)>,
) -> HashMap<String, String> {
    let mut vars: HashMap<String, String> = dotenv.into_iter().collect();
    vars.extend(process);
    vars
}

/// Parse a `.env` file; unreadable files yield nothing
#[must_use]
pub fn read_dotenv(path: &Path) -> Vec<(String, String)> {
    match fs::read_to_string(path) {
        Ok(contents) => parse_dotenv(&contents),
        Err(_) => Vec::new(),
    }
}

/// `KEY=value` lines; blank lines and `#` comments are skipped
#[must_use]
pub fn parse_dotenv(contents: &str) -> Vec<(String, String)> {
    contents
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter_map(|line| {
            let line = line.strip_prefix("export ").unwrap_or(line);
            let (key, value) = line.split_once('=')?;
            let key = key.trim();
            if key.is_empty() {
                return None;
            }
            Some((key.to_string(), unquote(value.trim()).to_string()))
        })
        .collect()
}

fn unquote(value: &str) -> &str {
    for quote in ['"', '\''] {
        if value.len() >= 2 && value.starts_with(quote) && value.ends_with(quote) {
            return &value[1..value.len() - 1];
        }
    }
    value
}

impl Settings {
    /// Deserialize settings from a merged JSON document
    pub fn from_json(value: Value) -> Result<Self> {
        serde_json::from_value(value)
            .map_err(|e| ExplorerError::config_error(format!("Invalid configuration: {e}")))
    }

    /// Apply environment variables on top of file settings
    ///
    /// Empty values are treated as unset. Malformed numbers and booleans fail.
    pub fn apply_env<I>(&mut self, vars: I) -> Result<()>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        for (key, value) in vars {
            let value = value.trim();
            if value.is_empty() {
                continue;
            }

            if let Some(name) = key.strip_prefix(ENV_NAMED_PREFIX) {
                if !name.is_empty() {
                    self.databases.insert(name.to_lowercase(), value.to_string());
                }
                continue;
            }

            match key.as_str() {
                ENV_BULK => self.connection_string = Some(value.to_string()),
                ENV_PRIMARY => self.primary = Some(value.to_string()),
                "DBEXPLORER_MAX_CONNECTIONS" => self.pool.max_connections = parse_env(&key, value)?,
                "DBEXPLORER_ACQUIRE_TIMEOUT_MS" => self.pool.acquire_timeout_ms = parse_env(&key, value)?,
                "DBEXPLORER_CONNECT_TIMEOUT_MS" => self.pool.connect_timeout_ms = parse_env(&key, value)?,
                "DBEXPLORER_QUERY_TIMEOUT_MS" => self.pool.query_timeout_ms = parse_env(&key, value)?,
                "DBEXPLORER_HEALTH_CHECK_TIMEOUT_MS" => {
                    self.pool.health_check_timeout_ms = parse_env(&key, value)?;
                }
                "DBEXPLORER_READ_ONLY" => self.query.read_only = parse_bool(&key, value)?,
                // 0 lifts the limit
                "DBEXPLORER_MAX_ROWS" => {
                    self.query.max_rows = Some(parse_env::<usize>(&key, value)?).filter(|n| *n > 0);
                }
                _ => {}
            }
        }
        Ok(())
    }

    /// `--conn` replaces any configured primary connection
    pub fn apply_primary(&mut self, primary: Option<String>) {
        if let Some(primary) = primary.filter(|p| !p.trim().is_empty()) {
            self.primary = Some(primary);
        }
    }

    /// Whether any database connection is configured
    #[must_use]
    pub fn has_databases(&self) -> bool {
        self.primary.is_some() || self.connection_string.is_some() || !self.databases.is_empty()
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .parse()
        .map_err(|_| ExplorerError::config_error(format!("{key} must be a non-negative integer, got '{value}'")))
}

fn parse_bool(key: &str, value: &str) -> Result<bool> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ExplorerError::config_error(format!("{key} must be a boolean, got '{value}'"))),
    }
}
