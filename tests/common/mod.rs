//! Shared test utilities for all integration test suites.
//!
//! Import via `#[path = "../common/mod.rs"] mod common;` from a suite's main.rs.

#![allow(dead_code)]
#![allow(unused_imports)]

use std::sync::{Arc, Once};

pub use txflow::{
    params, Database, DataAccessConfig, Error, FromRow, Propagation, ResourceRegistry, Row,
    SqlValue, TransactionState,
};
pub use txflow_engine::testing::{MemoryEvent, MemoryProvider};

// ============================================================================
// Initialization
// ============================================================================

static INIT_TRACING: Once = Once::new();

/// Route `tracing` output through the test harness; filter with RUST_LOG.
pub fn init_tracing() {
    INIT_TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

// ============================================================================
// MemoryDb - Database over the in-memory provider
// ============================================================================

/// Database over a [`MemoryProvider`] with `users` and `audit` tables.
pub struct MemoryDb {
    pub provider: Arc<MemoryProvider>,
    pub db: Arc<Database>,
}

impl MemoryDb {
    /// Provider with savepoint support.
    pub fn new() -> Self {
        Self::with_savepoints(true)
    }

    /// Provider whose connections report `supports_savepoints() == savepoints`.
    pub fn with_savepoints(savepoints: bool) -> Self {
        init_tracing();
        let provider = Arc::new(MemoryProvider::with_savepoints(savepoints));
        provider.create_table("users", &["id", "account", "active"]);
        provider.create_table("audit", &["id", "message"]);
        let db = Database::with_provider(provider.clone(), DataAccessConfig::default());
        MemoryDb { provider, db }
    }

    pub fn begins(&self) -> usize {
        self.provider
            .count(|e| matches!(e, MemoryEvent::Begin { .. }))
    }

    pub fn commits(&self) -> usize {
        self.provider
            .count(|e| matches!(e, MemoryEvent::Commit { .. }))
    }

    pub fn rollbacks(&self) -> usize {
        self.provider
            .count(|e| matches!(e, MemoryEvent::Rollback { .. }))
    }

    pub fn acquires(&self) -> usize {
        self.provider
            .count(|e| matches!(e, MemoryEvent::Acquire { .. }))
    }

    /// Committed user ids, in insertion order.
    pub fn user_ids(&self) -> Vec<i64> {
        self.provider
            .rows("users")
            .into_iter()
            .filter_map(|row| row.first().and_then(SqlValue::as_int))
            .collect()
    }

    /// Committed audit ids, in insertion order.
    pub fn audit_ids(&self) -> Vec<i64> {
        self.provider
            .rows("audit")
            .into_iter()
            .filter_map(|row| row.first().and_then(SqlValue::as_int))
            .collect()
    }

    /// Nothing leaked: no open connections, no registry state on this thread.
    pub fn assert_clean(&self) {
        assert_eq!(self.provider.open_connections(), 0, "connection leaked");
        assert_eq!(ResourceRegistry::entry_count(), 0, "registry not empty");
        assert_eq!(self.db.metrics().active_count, 0, "transaction still active");
    }
}

// ============================================================================
// Domain helpers
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct User {
    pub id: i64,
    pub account: String,
    pub active: bool,
}

impl FromRow for User {
    fn from_row(row: &dyn Row) -> txflow::Result<Self> {
        Ok(User {
            id: row.get("id")?,
            account: row.get("account")?,
            active: row.get("active")?,
        })
    }
}

pub fn insert_user(db: &Database, id: i64, account: &str) -> txflow::Result<u64> {
    db.execute("INSERT INTO users VALUES (?, ?, ?)", &params![id, account, true])
}

pub fn insert_audit(db: &Database, id: i64, message: &str) -> txflow::Result<u64> {
    db.execute("INSERT INTO audit VALUES (?, ?)", &params![id, message])
}

/// Id of the connection the calling thread has bound for `db`, if any.
pub fn bound_transaction(db: &Database) -> Option<uuid::Uuid> {
    ResourceRegistry::get(db.source().id()).map(|holder| holder.transaction_id())
}
