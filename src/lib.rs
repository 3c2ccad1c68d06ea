//! txflow - transactional data access
//!
//! Run parameterized commands through a [`StatementExecutor`] and group
//! them into units of work with a [`TransactionCoordinator`]. Seven
//! [`Propagation`] modes decide whether a unit of work joins, suspends,
//! nests inside or refuses the caller's transaction.
//!
//! # Quick Start
//!
//! ```ignore
//! use txflow::{params, Database, Propagation};
//!
//! let db = Database::in_memory()?;
//! db.execute("CREATE TABLE users (id INTEGER PRIMARY KEY, account TEXT, active INTEGER)", &[])?;
//!
//! db.transaction(Propagation::Required, || -> txflow::Result<()> {
//!     db.execute("INSERT INTO users (account, active) VALUES (?, ?)", &params!["gugu", true])?;
//!     Ok(())
//! })?;
//!
//! let account: Option<String> = db.query_scalar("SELECT account FROM users", &[])?;
//! ```
//!
//! # Architecture
//!
//! - `txflow-core`: error type, values, rows and the provider traits
//! - `txflow-concurrency`: propagation resolution and the thread-local
//!   connection registry
//! - `txflow-engine`: executor, coordinator, configuration and providers

pub use txflow_engine::*;
