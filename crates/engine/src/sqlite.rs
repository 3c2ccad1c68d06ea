//! SQLite provider
//!
//! Backed by `rusqlite` with the bundled SQLite build. Each
//! `get_connection` opens a new SQLite connection to the same database; a
//! file path or `":memory:"` selects the database. In-memory databases use
//! a shared-cache URI unique to the provider, and the provider keeps one
//! idle connection open so the database lives as long as the provider.
//!
//! SQLite has no "auto-commit off" switch. Disabling auto-commit marks the
//! connection and the first statement or savepoint issues `BEGIN`; commit
//! and rollback end that transaction. A transaction that never ran a
//! statement never touches the database. If SQLite rolls the transaction
//! back by itself (`INSERT OR ROLLBACK`, `RAISE(ROLLBACK)`, a full disk),
//! every later statement and the commit fail instead of silently starting
//! a second transaction.
//!
//! SQLite allows one writer per database. A REQUIRES_NEW or NOT_SUPPORTED
//! unit that writes while its caller holds an open write transaction on the
//! same thread cannot succeed: a shared-cache in-memory database fails at
//! once with "database table is locked", and a file database fails with
//! "database is locked" after `busy_timeout_ms`. The inner failure is a
//! `DataAccess` error and the caller's transaction is resumed intact.
//!
//! Timestamps bind as RFC 3339 text, SQLite's conventional date storage,
//! and read back through `FromSql for DateTime<Utc>`.

use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use parking_lot::Mutex;
use rusqlite::types::{Null, ValueRef};
use rusqlite::OpenFlags;
use tracing::debug;
use txflow_core::{
    BoxError, Connection, ConnectionProvider, Error, PreparedCommand, Result, ResultCursor, Row,
    SqlValue, ValueRow,
};

use crate::config::SqliteConfig;

static NEXT_MEMORY_DB: AtomicU64 = AtomicU64::new(1);

/// Connection provider for one SQLite database
pub struct SqliteProvider {
    target: String,
    busy_timeout: Duration,
    foreign_keys: bool,
    /// Holds a shared in-memory database open
    _keepalive: Option<Mutex<rusqlite::Connection>>,
}

impl SqliteProvider {
    /// Provider for the database described by `config`
    ///
    /// # Errors
    ///
    /// `ConnectionUnavailable` if the database cannot be opened.
    pub fn open(config: &SqliteConfig) -> Result<Self> {
        let busy_timeout = Duration::from_millis(config.busy_timeout_ms);
        if config.is_in_memory() {
            let n = NEXT_MEMORY_DB.fetch_add(1, Ordering::Relaxed);
            let target = format!(
                "file:txflow-mem-{}-{}?mode=memory&cache=shared",
                std::process::id(),
                n
            );
            let mut provider = Self {
                target,
                busy_timeout,
                foreign_keys: config.foreign_keys,
                _keepalive: None,
            };
            let keepalive = provider.connect().map_err(Error::connection_unavailable)?;
            provider._keepalive = Some(Mutex::new(keepalive));
            Ok(provider)
        } else {
            let provider = Self {
                target: config.path.clone(),
                busy_timeout,
                foreign_keys: config.foreign_keys,
                _keepalive: None,
            };
            // Fail at open time rather than on the first unit of work
            drop(provider.connect().map_err(Error::connection_unavailable)?);
            Ok(provider)
        }
    }

    /// Provider for a database file, created if missing
    pub fn open_file(path: impl AsRef<Path>) -> Result<Self> {
        Self::open(&SqliteConfig {
            path: path.as_ref().to_string_lossy().into_owned(),
            ..SqliteConfig::default()
        })
    }

    /// Provider for a fresh in-memory database
    pub fn in_memory() -> Result<Self> {
        Self::open(&SqliteConfig::in_memory())
    }

    fn connect(&self) -> rusqlite::Result<rusqlite::Connection> {
        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_URI
            | OpenFlags::SQLITE_OPEN_NO_MUTEX;
        let conn = rusqlite::Connection::open_with_flags(&self.target, flags)?;
        conn.busy_timeout(self.busy_timeout)?;
        conn.execute_batch(if self.foreign_keys {
            "PRAGMA foreign_keys = ON"
        } else {
            "PRAGMA foreign_keys = OFF"
        })?;
        Ok(conn)
    }
}

impl ConnectionProvider for SqliteProvider {
    fn get_connection(&self) -> std::result::Result<Box<dyn Connection>, BoxError> {
        let conn = self.connect()?;
        debug!(target: "txflow::sql", database = %self.target, "Opened SQLite connection");
        Ok(Box::new(SqliteConnection {
            conn,
            auto_commit: true,
            in_transaction: false,
        }))
    }
}

struct SqliteConnection {
    conn: rusqlite::Connection,
    /// Requested mode; `BEGIN` is issued lazily
    auto_commit: bool,
    /// `BEGIN` was issued and the transaction has not been ended by us
    in_transaction: bool,
}

impl SqliteConnection {
    /// Fails if SQLite ended our transaction on its own
    ///
    /// `INSERT OR ROLLBACK`, `RAISE(ROLLBACK)` and some I/O errors roll the
    /// whole transaction back and put the connection in auto-commit mode.
    fn check_not_lost(&self) -> std::result::Result<(), BoxError> {
        if self.in_transaction && self.conn.is_autocommit() {
            return Err("transaction was rolled back by the database".into());
        }
        Ok(())
    }

    fn ensure_begun(&mut self) -> std::result::Result<(), BoxError> {
        if self.auto_commit {
            return Ok(());
        }
        self.check_not_lost()?;
        if !self.in_transaction {
            self.conn.execute_batch("BEGIN")?;
            self.in_transaction = true;
        }
        Ok(())
    }

    fn commit_open(&mut self) -> std::result::Result<(), BoxError> {
        self.check_not_lost()?;
        if self.in_transaction {
            self.conn.execute_batch("COMMIT")?;
            self.in_transaction = false;
        }
        Ok(())
    }
}

impl Connection for SqliteConnection {
    fn set_auto_commit(&mut self, auto_commit: bool) -> std::result::Result<(), BoxError> {
        if auto_commit && !self.auto_commit {
            self.commit_open()?;
        }
        self.auto_commit = auto_commit;
        Ok(())
    }

    fn auto_commit(&self) -> bool {
        self.auto_commit
    }

    fn commit(&mut self) -> std::result::Result<(), BoxError> {
        self.commit_open()
    }

    fn rollback(&mut self) -> std::result::Result<(), BoxError> {
        if !self.conn.is_autocommit() {
            self.conn.execute_batch("ROLLBACK")?;
        }
        self.in_transaction = false;
        Ok(())
    }

    fn supports_savepoints(&self) -> bool {
        true
    }

    fn savepoint(&mut self, name: &str) -> std::result::Result<(), BoxError> {
        self.ensure_begun()?;
        self.conn.execute_batch(&format!("SAVEPOINT {}", name))?;
        Ok(())
    }

    fn release_savepoint(&mut self, name: &str) -> std::result::Result<(), BoxError> {
        self.conn.execute_batch(&format!("RELEASE SAVEPOINT {}", name))?;
        Ok(())
    }

    fn rollback_to_savepoint(&mut self, name: &str) -> std::result::Result<(), BoxError> {
        self.conn
            .execute_batch(&format!("ROLLBACK TO SAVEPOINT {}", name))?;
        Ok(())
    }

    fn prepare<'c>(
        &'c mut self,
        command: &str,
    ) -> std::result::Result<Box<dyn PreparedCommand + 'c>, BoxError> {
        self.ensure_begun()?;
        let stmt = self.conn.prepare(command)?;
        Ok(Box::new(SqliteCommand { stmt }))
    }
}

struct SqliteCommand<'c> {
    stmt: rusqlite::Statement<'c>,
}

impl PreparedCommand for SqliteCommand<'_> {
    fn parameter_count(&self) -> usize {
        self.stmt.parameter_count()
    }

    fn bind_null(&mut self, index: usize) -> std::result::Result<(), BoxError> {
        Ok(self.stmt.raw_bind_parameter(index, Null)?)
    }

    fn bind_bool(&mut self, index: usize, value: bool) -> std::result::Result<(), BoxError> {
        Ok(self.stmt.raw_bind_parameter(index, value)?)
    }

    fn bind_int(&mut self, index: usize, value: i64) -> std::result::Result<(), BoxError> {
        Ok(self.stmt.raw_bind_parameter(index, value)?)
    }

    fn bind_float(&mut self, index: usize, value: f64) -> std::result::Result<(), BoxError> {
        Ok(self.stmt.raw_bind_parameter(index, value)?)
    }

    fn bind_text(&mut self, index: usize, value: &str) -> std::result::Result<(), BoxError> {
        Ok(self.stmt.raw_bind_parameter(index, value)?)
    }

    fn bind_bytes(&mut self, index: usize, value: &[u8]) -> std::result::Result<(), BoxError> {
        Ok(self.stmt.raw_bind_parameter(index, value)?)
    }

    fn bind_timestamp(
        &mut self,
        index: usize,
        value: &DateTime<Utc>,
    ) -> std::result::Result<(), BoxError> {
        let text = value.to_rfc3339_opts(SecondsFormat::AutoSi, true);
        Ok(self.stmt.raw_bind_parameter(index, text)?)
    }

    fn execute_update(&mut self) -> std::result::Result<u64, BoxError> {
        Ok(self.stmt.raw_execute()? as u64)
    }

    fn execute_query<'s>(&'s mut self) -> std::result::Result<Box<dyn ResultCursor + 's>, BoxError> {
        let columns: Arc<[String]> = self
            .stmt
            .column_names()
            .into_iter()
            .map(String::from)
            .collect();
        Ok(Box::new(SqliteCursor {
            columns,
            rows: self.stmt.raw_query(),
            current: None,
        }))
    }
}

struct SqliteCursor<'s> {
    columns: Arc<[String]>,
    rows: rusqlite::Rows<'s>,
    current: Option<ValueRow>,
}

impl ResultCursor for SqliteCursor<'_> {
    fn next_row(&mut self) -> std::result::Result<Option<&dyn Row>, BoxError> {
        self.current = match self.rows.next()? {
            None => None,
            Some(row) => {
                let values = (0..self.columns.len())
                    .map(|index| -> std::result::Result<SqlValue, BoxError> {
                        Ok(sql_value(row.get_ref(index)?)?)
                    })
                    .collect::<std::result::Result<Vec<_>, BoxError>>()?;
                Some(ValueRow::new(Arc::clone(&self.columns), values))
            }
        };
        Ok(self.current.as_ref().map(|row| row as &dyn Row))
    }
}

fn sql_value(value: ValueRef<'_>) -> std::result::Result<SqlValue, std::str::Utf8Error> {
    Ok(match value {
        ValueRef::Null => SqlValue::Null,
        ValueRef::Integer(i) => SqlValue::Int(i),
        ValueRef::Real(f) => SqlValue::Float(f),
        ValueRef::Text(bytes) => SqlValue::Text(std::str::from_utf8(bytes)?.to_string()),
        ValueRef::Blob(bytes) => SqlValue::Bytes(bytes.to_vec()),
    })
}
