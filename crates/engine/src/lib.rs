//! Transactional data access for txflow
//!
//! This crate ties the lower layers together:
//! - StatementExecutor: parameterized commands and row mapping
//! - TransactionCoordinator: propagation-aware units of work
//! - Database: one handle bundling both over a configured source
//! - Providers: SQLite (feature `sqlite`) and an in-memory test provider
//!   (feature `test-util`)
//!
//! The executor and the coordinator never talk to each other directly.
//! They meet in the thread-local connection registry: the coordinator binds
//! a connection for the duration of a unit of work and the executor picks
//! up whatever is bound for its source.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod coordinator;
pub mod database;
pub mod executor;
pub mod mapper;
#[cfg(feature = "sqlite")]
pub mod sqlite;
#[cfg(any(test, feature = "test-util"))]
pub mod testing;

pub use config::{DataAccessConfig, SqliteConfig, CONFIG_FILE_NAME};
pub use coordinator::{TransactionCoordinator, TransactionMetrics};
pub use database::Database;
pub use executor::StatementExecutor;
pub use mapper::{column, single_column, values, FromRow};
#[cfg(feature = "sqlite")]
pub use sqlite::SqliteProvider;

pub use txflow_concurrency::{Propagation, ResourceRegistry, TransactionState};
pub use txflow_core::{
    params, BoxError, ColumnIndex, Connection, ConnectionProvider, DataSource, Error, FromSql,
    PreparedCommand, Result, ResultCursor, Row, SourceId, SqlValue, ValueRow,
};
