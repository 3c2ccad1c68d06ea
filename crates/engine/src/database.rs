//! Database facade
//!
//! [`Database`] bundles one [`DataSource`] with the coordinator and the
//! executor that share it, so application code only carries one handle:
//!
//! ```ignore
//! let db = Database::open("/var/lib/myapp")?;
//! db.transaction(Propagation::Required, || -> anyhow::Result<()> {
//!     db.execute("INSERT INTO users (account, active) VALUES (?, ?)", &params!["gugu", true])?;
//!     Ok(())
//! })?;
//! ```
//!
//! Opening a directory creates a default `txflow.toml` there on first use
//! and reads it on every open.

use std::path::{Path, PathBuf};
use std::sync::Arc;

#[cfg(feature = "sqlite")]
use tracing::info;
use txflow_concurrency::{Propagation, TransactionState};
use txflow_core::{ConnectionProvider, DataSource, Error, FromSql, Result, Row, SqlValue};

use crate::config::DataAccessConfig;
use crate::coordinator::{TransactionCoordinator, TransactionMetrics};
use crate::executor::StatementExecutor;

/// A configured data source with its transaction coordinator and executor
#[derive(Debug)]
pub struct Database {
    config: DataAccessConfig,
    data_dir: Option<PathBuf>,
    coordinator: TransactionCoordinator,
    executor: StatementExecutor,
}

impl Database {
    /// Open the SQLite database in directory `path`
    ///
    /// Creates the directory and a default `txflow.toml` if missing, then
    /// opens with the settings from that file. A relative SQLite path is
    /// resolved against the directory.
    ///
    /// # Errors
    ///
    /// `Config` if the directory or config file cannot be created or read,
    /// `ConnectionUnavailable` if the database cannot be opened.
    #[cfg(feature = "sqlite")]
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Arc<Self>> {
        let data_dir = path.as_ref().to_path_buf();
        create_dir(&data_dir)?;
        let config_path = DataAccessConfig::write_default_if_missing(&data_dir)?;
        let config = DataAccessConfig::from_file(&config_path)?;
        Self::open_sqlite(data_dir, config)
    }

    /// Open directory `path` with an explicit configuration
    ///
    /// The configuration is written to `txflow.toml` so a later
    /// [`open`](Self::open) picks up the same settings.
    #[cfg(feature = "sqlite")]
    pub fn open_with_config<P: AsRef<Path>>(path: P, config: DataAccessConfig) -> Result<Arc<Self>> {
        let data_dir = path.as_ref().to_path_buf();
        create_dir(&data_dir)?;
        config.write_to_file(&data_dir.join(crate::config::CONFIG_FILE_NAME))?;
        Self::open_sqlite(data_dir, config)
    }

    /// Open a private in-memory SQLite database
    #[cfg(feature = "sqlite")]
    pub fn in_memory() -> Result<Arc<Self>> {
        let config = DataAccessConfig::in_memory();
        let sqlite = config.sqlite.clone().unwrap_or_default();
        let provider = crate::sqlite::SqliteProvider::open(&sqlite)?;
        Ok(Self::with_provider(Arc::new(provider), config))
    }

    #[cfg(feature = "sqlite")]
    fn open_sqlite(data_dir: PathBuf, config: DataAccessConfig) -> Result<Arc<Self>> {
        let mut sqlite = config.sqlite.clone().unwrap_or_default();
        if !sqlite.is_in_memory() && Path::new(&sqlite.path).is_relative() {
            sqlite.path = data_dir.join(&sqlite.path).to_string_lossy().into_owned();
        }
        let provider = crate::sqlite::SqliteProvider::open(&sqlite)?;
        info!(
            target: "txflow::txn",
            data_dir = %data_dir.display(),
            database = %sqlite.path,
            "Opened SQLite database"
        );
        let db = Self::build(Arc::new(provider), config, Some(data_dir));
        Ok(Arc::new(db))
    }

    /// Wrap any provider
    pub fn with_provider(provider: Arc<dyn ConnectionProvider>, config: DataAccessConfig) -> Arc<Self> {
        Arc::new(Self::build(provider, config, None))
    }

    fn build(
        provider: Arc<dyn ConnectionProvider>,
        config: DataAccessConfig,
        data_dir: Option<PathBuf>,
    ) -> Self {
        let source = DataSource::new(provider);
        let coordinator = TransactionCoordinator::new(source.clone())
            .with_default_propagation(config.default_propagation);
        let executor = StatementExecutor::new(source).with_statement_logging(config.log_statements);
        Self {
            config,
            data_dir,
            coordinator,
            executor,
        }
    }

    /// Active configuration
    pub fn config(&self) -> &DataAccessConfig {
        &self.config
    }

    /// Directory the database was opened from, if any
    pub fn data_dir(&self) -> Option<&Path> {
        self.data_dir.as_deref()
    }

    /// The shared connection source
    pub fn source(&self) -> &DataSource {
        self.coordinator.source()
    }

    /// The transaction coordinator
    pub fn coordinator(&self) -> &TransactionCoordinator {
        &self.coordinator
    }

    /// The statement executor
    pub fn executor(&self) -> &StatementExecutor {
        &self.executor
    }

    /// Transaction state of the calling thread
    pub fn current_state(&self) -> TransactionState {
        self.coordinator.current_state()
    }

    /// Transaction counters
    pub fn metrics(&self) -> TransactionMetrics {
        self.coordinator.metrics()
    }

    /// Run `f` under `mode`; see [`TransactionCoordinator::run`]
    pub fn transaction<T, E, F>(&self, mode: Propagation, f: F) -> std::result::Result<T, E>
    where
        F: FnOnce() -> std::result::Result<T, E>,
        E: From<Error>,
    {
        self.coordinator.run(mode, f)
    }

    /// Run `f` under the configured default mode
    pub fn transaction_default<T, E, F>(&self, f: F) -> std::result::Result<T, E>
    where
        F: FnOnce() -> std::result::Result<T, E>,
        E: From<Error>,
    {
        self.coordinator.run_default(f)
    }

    /// See [`StatementExecutor::execute`]
    pub fn execute(&self, command: &str, params: &[SqlValue]) -> Result<u64> {
        self.executor.execute(command, params)
    }

    /// See [`StatementExecutor::execute_batch`]
    pub fn execute_batch(&self, command: &str, rows: &[Vec<SqlValue>]) -> Result<Vec<u64>> {
        self.executor.execute_batch(command, rows)
    }

    /// See [`StatementExecutor::query`]
    pub fn query<T, F>(&self, command: &str, mapper: F, params: &[SqlValue]) -> Result<Vec<T>>
    where
        F: Fn(&dyn Row) -> Result<T>,
    {
        self.executor.query(command, mapper, params)
    }

    /// See [`StatementExecutor::query_one`]
    pub fn query_one<T, F>(&self, command: &str, mapper: F, params: &[SqlValue]) -> Result<Option<T>>
    where
        F: Fn(&dyn Row) -> Result<T>,
    {
        self.executor.query_one(command, mapper, params)
    }

    /// See [`StatementExecutor::query_scalar`]
    pub fn query_scalar<T: FromSql>(&self, command: &str, params: &[SqlValue]) -> Result<Option<T>> {
        self.executor.query_scalar(command, params)
    }
}

#[cfg(feature = "sqlite")]
fn create_dir(path: &Path) -> Result<()> {
    std::fs::create_dir_all(path).map_err(|e| {
        Error::config(format!(
            "failed to create database directory '{}': {}",
            path.display(),
            e
        ))
    })
}
