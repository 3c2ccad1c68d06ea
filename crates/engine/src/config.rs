//! Data-access configuration via `txflow.toml`
//!
//! A default `txflow.toml` is written next to the database on first open.
//! Edit the file and reopen to change settings.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use txflow_concurrency::Propagation;
use txflow_core::{Error, Result};

/// Config file name placed in the database directory.
pub const CONFIG_FILE_NAME: &str = "txflow.toml";

/// Default SQLite database file name inside the database directory.
pub const DEFAULT_SQLITE_FILE: &str = "txflow.db";

/// Path value selecting a private in-memory SQLite database.
pub const IN_MEMORY_PATH: &str = ":memory:";

/// SQLite connection settings, persisted under `[sqlite]`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SqliteConfig {
    /// Database file, or `":memory:"` for an in-memory database shared by
    /// all connections of one provider
    #[serde(default = "default_sqlite_path")]
    pub path: String,
    /// How long a connection waits on a locked database (default: 5000)
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
    /// Enforce foreign key constraints (default: true)
    #[serde(default = "default_true")]
    pub foreign_keys: bool,
}

fn default_sqlite_path() -> String {
    DEFAULT_SQLITE_FILE.to_string()
}

fn default_busy_timeout_ms() -> u64 {
    5000
}

fn default_true() -> bool {
    true
}

impl Default for SqliteConfig {
    fn default() -> Self {
        Self {
            path: default_sqlite_path(),
            busy_timeout_ms: default_busy_timeout_ms(),
            foreign_keys: true,
        }
    }
}

impl SqliteConfig {
    /// Settings for an in-memory database
    pub fn in_memory() -> Self {
        Self {
            path: IN_MEMORY_PATH.to_string(),
            ..Self::default()
        }
    }

    /// True if `path` selects an in-memory database
    pub fn is_in_memory(&self) -> bool {
        self.path == IN_MEMORY_PATH
    }
}

/// Configuration loaded from `txflow.toml`.
///
/// # Example
///
/// ```toml
/// default_propagation = "REQUIRED"
/// log_statements = false
///
/// [sqlite]
/// path = "txflow.db"
/// busy_timeout_ms = 5000
/// foreign_keys = true
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct DataAccessConfig {
    /// Mode used when a unit of work does not name one.
    #[serde(default)]
    pub default_propagation: Propagation,
    /// Log statement text at `info` rather than `debug`.
    #[serde(default)]
    pub log_statements: bool,
    /// SQLite provider settings.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sqlite: Option<SqliteConfig>,
}

impl DataAccessConfig {
    /// Config with an in-memory SQLite database
    pub fn in_memory() -> Self {
        Self {
            sqlite: Some(SqliteConfig::in_memory()),
            ..Self::default()
        }
    }

    /// Returns the default config file content with comments.
    pub fn default_toml() -> &'static str {
        r#"# txflow data-access configuration
#
# Propagation mode for units of work that do not name one:
# REQUIRED (default), REQUIRES_NEW, SUPPORTS, MANDATORY,
# NOT_SUPPORTED, NEVER or NESTED
default_propagation = "REQUIRED"

# Log every statement at info level instead of debug (default: false)
log_statements = false

[sqlite]
# Database file relative to the database directory, or ":memory:"
path = "txflow.db"
# Milliseconds to wait on a locked database
busy_timeout_ms = 5000
# Enforce foreign key constraints
foreign_keys = true
"#
    }

    /// Parse config from TOML text.
    ///
    /// # Errors
    ///
    /// `Config` if the text is not valid TOML for this structure.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| Error::config(format!("invalid txflow config: {}", e)))
    }

    /// Read and parse config from a file path.
    ///
    /// # Errors
    ///
    /// `Config` if the file cannot be read or parsed.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::config(format!(
                "failed to read config file '{}': {}",
                path.display(),
                e
            ))
        })?;
        toml::from_str(&content).map_err(|e| {
            Error::config(format!(
                "failed to parse config file '{}': {}",
                path.display(),
                e
            ))
        })
    }

    /// Write the default config into `dir` unless one already exists.
    ///
    /// Returns the path of the config file either way.
    pub fn write_default_if_missing(dir: &Path) -> Result<PathBuf> {
        let path = dir.join(CONFIG_FILE_NAME);
        if !path.exists() {
            std::fs::write(&path, Self::default_toml()).map_err(|e| {
                Error::config(format!(
                    "failed to write default config file '{}': {}",
                    path.display(),
                    e
                ))
            })?;
        }
        Ok(path)
    }

    /// Serialize this config to TOML and write it to the given path.
    pub fn write_to_file(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| Error::config(format!("failed to serialize config: {}", e)))?;
        std::fs::write(path, content).map_err(|e| {
            Error::config(format!(
                "failed to write config file '{}': {}",
                path.display(),
                e
            ))
        })
    }
}
