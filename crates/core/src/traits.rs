//! Connection provider contract
//!
//! These traits are what a database driver must implement to be driven by
//! the statement executor and the transaction coordinator. They are
//! deliberately small: the core never parses commands, it only prepares,
//! binds, executes and iterates.
//!
//! Thread safety: a [`ConnectionProvider`] is shared across threads
//! (`Send + Sync`), a [`Connection`] is owned by exactly one thread at a
//! time (`Send` so it can be handed out, never shared).

use chrono::{DateTime, Utc};

use crate::error::BoxError;
use crate::row::Row;

/// Source of physical connections
///
/// Pooling, if any, lives behind this trait.
pub trait ConnectionProvider: Send + Sync {
    /// Open (or check out) a connection
    ///
    /// Returned connections must be in auto-commit mode.
    ///
    /// # Errors
    ///
    /// Returns the provider error when no connection can be supplied; the
    /// core reports it as `ConnectionUnavailable`.
    fn get_connection(&self) -> Result<Box<dyn Connection>, BoxError>;

    /// Give a connection back once the caller is done with it
    ///
    /// The default closes it by dropping.
    fn release_connection(&self, connection: Box<dyn Connection>) {
        drop(connection);
    }
}

/// One physical database session
pub trait Connection: Send {
    /// Switch between auto-commit and manual-commit mode
    ///
    /// Disabling auto-commit starts a transaction that lasts until
    /// [`commit`](Connection::commit) or [`rollback`](Connection::rollback).
    fn set_auto_commit(&mut self, auto_commit: bool) -> Result<(), BoxError>;

    /// Current commit mode
    fn auto_commit(&self) -> bool;

    /// Commit the current transaction
    fn commit(&mut self) -> Result<(), BoxError>;

    /// Roll back the current transaction
    fn rollback(&mut self) -> Result<(), BoxError>;

    /// Whether [`savepoint`](Connection::savepoint) is available
    fn supports_savepoints(&self) -> bool {
        false
    }

    /// Create a named savepoint inside the current transaction
    fn savepoint(&mut self, name: &str) -> Result<(), BoxError> {
        Err(format!("savepoint '{}' not supported by this connection", name).into())
    }

    /// Release (forget) a savepoint, keeping its effects
    fn release_savepoint(&mut self, name: &str) -> Result<(), BoxError> {
        Err(format!("savepoint '{}' not supported by this connection", name).into())
    }

    /// Undo everything done since the savepoint was created
    fn rollback_to_savepoint(&mut self, name: &str) -> Result<(), BoxError> {
        Err(format!("savepoint '{}' not supported by this connection", name).into())
    }

    /// Prepare a command with positional `?` placeholders
    fn prepare<'c>(&'c mut self, command: &str) -> Result<Box<dyn PreparedCommand + 'c>, BoxError>;
}

/// A prepared command awaiting parameters
///
/// Parameter indexes are 1-based. Each setter is the provider's native
/// binding for that type.
pub trait PreparedCommand {
    /// Number of placeholders in the command
    fn parameter_count(&self) -> usize;

    /// Bind SQL NULL
    fn bind_null(&mut self, index: usize) -> Result<(), BoxError>;

    /// Bind a boolean
    fn bind_bool(&mut self, index: usize, value: bool) -> Result<(), BoxError>;

    /// Bind an integer
    fn bind_int(&mut self, index: usize, value: i64) -> Result<(), BoxError>;

    /// Bind a float
    fn bind_float(&mut self, index: usize, value: f64) -> Result<(), BoxError>;

    /// Bind text
    fn bind_text(&mut self, index: usize, value: &str) -> Result<(), BoxError>;

    /// Bind raw bytes
    fn bind_bytes(&mut self, index: usize, value: &[u8]) -> Result<(), BoxError>;

    /// Bind a timestamp
    fn bind_timestamp(&mut self, index: usize, value: &DateTime<Utc>) -> Result<(), BoxError>;

    /// Run as a mutation, returning the affected row count
    fn execute_update(&mut self) -> Result<u64, BoxError>;

    /// Run as a query, returning a cursor over the result
    fn execute_query<'s>(&'s mut self) -> Result<Box<dyn ResultCursor + 's>, BoxError>;
}

/// Forward-only cursor over a query result
pub trait ResultCursor {
    /// Advance to the next row, or `None` when exhausted
    fn next_row(&mut self) -> Result<Option<&dyn Row>, BoxError>;
}
