//! Transaction coordinator
//!
//! Runs units of work under a [`Propagation`] mode. The coordinator reads
//! the calling thread's state for its source from the registry, resolves
//! the mode to an action, and then:
//!
//! - **start new**: acquires a connection, disables auto-commit, binds it,
//!   runs the unit, commits on `Ok` or rolls back on `Err`, then unbinds,
//!   restores auto-commit and releases the connection
//! - **join**: runs the unit directly; the owning frame decides the outcome
//! - **suspend**: parks the bound connection for the duration of the call
//!   and re-binds it afterwards
//! - **savepoint**: brackets the unit with a savepoint on the bound
//!   connection (NESTED inside an active transaction)
//!
//! Every step that must happen on exit lives in a guard's `Drop`, so a
//! panicking unit of work still rolls back, releases its connection and
//! restores any suspended transaction.
//!
//! # Errors and the unit of work
//!
//! A unit of work returns `Result<T, E>` for any `E: From<Error>`.
//! Application errors pass through unchanged after the rollback; failures
//! of the coordinator itself are converted into `E`.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use tracing::{debug, error, info, warn};
use txflow_concurrency::{
    resolve, BoundResource, ConnectionHolder, Propagation, PropagationAction, ResourceRegistry,
    SuspendedResources, TransactionState,
};
use txflow_core::{DataSource, Error, Result};
use uuid::Uuid;

/// Propagation-aware transaction runner for one [`DataSource`]
///
/// # Memory Ordering
///
/// The metric counters are observational only and use `Relaxed` ordering.
/// They do not synchronize any other memory operation.
#[derive(Debug)]
pub struct TransactionCoordinator {
    source: DataSource,
    default_propagation: Propagation,
    active_count: AtomicU64,
    total_started: AtomicU64,
    total_committed: AtomicU64,
    total_rolled_back: AtomicU64,
    total_joined: AtomicU64,
    total_suspended: AtomicU64,
    total_savepoints: AtomicU64,
}

impl TransactionCoordinator {
    /// Coordinator for `source` with `REQUIRED` as the default mode
    pub fn new(source: DataSource) -> Self {
        Self {
            source,
            default_propagation: Propagation::default(),
            active_count: AtomicU64::new(0),
            total_started: AtomicU64::new(0),
            total_committed: AtomicU64::new(0),
            total_rolled_back: AtomicU64::new(0),
            total_joined: AtomicU64::new(0),
            total_suspended: AtomicU64::new(0),
            total_savepoints: AtomicU64::new(0),
        }
    }

    /// Mode used by [`run_default`](Self::run_default)
    pub fn with_default_propagation(mut self, propagation: Propagation) -> Self {
        self.default_propagation = propagation;
        self
    }

    /// The source this coordinator manages
    pub fn source(&self) -> &DataSource {
        &self.source
    }

    /// The configured default mode
    pub fn default_propagation(&self) -> Propagation {
        self.default_propagation
    }

    /// Transaction state of the calling thread for this source
    pub fn current_state(&self) -> TransactionState {
        ResourceRegistry::state(self.source.id())
    }

    /// True if the calling thread has a transaction bound for this source
    pub fn is_transaction_active(&self) -> bool {
        self.current_state().has_active()
    }

    /// Run `unit_of_work` under the default propagation mode
    pub fn run_default<T, E, F>(&self, unit_of_work: F) -> std::result::Result<T, E>
    where
        F: FnOnce() -> std::result::Result<T, E>,
        E: From<Error>,
    {
        self.run(self.default_propagation, unit_of_work)
    }

    /// Run `unit_of_work` under `mode`
    ///
    /// # Errors
    ///
    /// - `IllegalTransactionState` for MANDATORY without a transaction or
    ///   NEVER with one; the unit of work does not run
    /// - `NestedTransactionNotSupported` for NESTED inside a transaction
    ///   whose connection has no savepoints; the unit of work does not run
    /// - `ConnectionUnavailable` if a new transaction cannot get a connection
    /// - `DataAccess` if begin or commit fails
    /// - the unit of work's own error, unchanged
    pub fn run<T, E, F>(&self, mode: Propagation, unit_of_work: F) -> std::result::Result<T, E>
    where
        F: FnOnce() -> std::result::Result<T, E>,
        E: From<Error>,
    {
        let state = self.current_state();
        let action = resolve(mode, state);
        debug!(
            target: "txflow::txn",
            source = %self.source.id(),
            propagation = %mode,
            ?state,
            ?action,
            "Resolved propagation"
        );

        match action {
            PropagationAction::Join => {
                self.total_joined.fetch_add(1, Ordering::Relaxed);
                unit_of_work()
            }
            PropagationAction::StartNew => self.run_in_new_transaction(mode, unit_of_work),
            PropagationAction::SuspendAndStartNew => {
                let suspended = self.suspend()?;
                let result = self.run_in_new_transaction(mode, unit_of_work);
                finish_suspended(suspended, result)
            }
            PropagationAction::SuspendAndRunWithout => {
                let suspended = self.suspend()?;
                let result = unit_of_work();
                finish_suspended(suspended, result)
            }
            PropagationAction::RunWithout => unit_of_work(),
            PropagationAction::Savepoint => self.run_in_savepoint(unit_of_work),
            PropagationAction::Reject { reason } => {
                warn!(
                    target: "txflow::txn",
                    source = %self.source.id(),
                    propagation = %mode,
                    reason,
                    "Unit of work rejected"
                );
                Err(Error::illegal_transaction_state(mode, reason).into())
            }
        }
    }

    fn suspend(&self) -> Result<SuspendedResources> {
        let suspended = SuspendedResources::suspend(self.source.id())?;
        self.total_suspended.fetch_add(1, Ordering::Relaxed);
        Ok(suspended)
    }

    fn run_in_new_transaction<T, E, F>(
        &self,
        mode: Propagation,
        unit_of_work: F,
    ) -> std::result::Result<T, E>
    where
        F: FnOnce() -> std::result::Result<T, E>,
        E: From<Error>,
    {
        let scope = TransactionScope::begin(self, mode)?;
        match unit_of_work() {
            Ok(value) => {
                scope.commit()?;
                Ok(value)
            }
            Err(e) => {
                scope.rollback("unit of work failed");
                Err(e)
            }
        }
    }

    fn run_in_savepoint<T, E, F>(&self, unit_of_work: F) -> std::result::Result<T, E>
    where
        F: FnOnce() -> std::result::Result<T, E>,
        E: From<Error>,
    {
        let holder = ResourceRegistry::get(self.source.id()).ok_or_else(|| {
            Error::illegal_state(format!("no transaction bound for {}", self.source.id()))
        })?;

        let supported = holder.with_connection(|conn| Ok(conn.supports_savepoints()))?;
        if !supported {
            warn!(
                target: "txflow::txn",
                txn_id = %holder.transaction_id(),
                "NESTED requested but the connection has no savepoints"
            );
            return Err(Error::nested_not_supported(format!(
                "connection of transaction {} does not support savepoints",
                holder.transaction_id()
            ))
            .into());
        }

        let scope = SavepointScope::create(holder)?;
        self.total_savepoints.fetch_add(1, Ordering::Relaxed);
        match unit_of_work() {
            Ok(value) => {
                scope.release()?;
                Ok(value)
            }
            Err(e) => {
                scope.rollback();
                Err(e)
            }
        }
    }

    fn record_start(&self) {
        self.active_count.fetch_add(1, Ordering::Relaxed);
        self.total_started.fetch_add(1, Ordering::Relaxed);
    }

    fn record_commit(&self) {
        // Saturating decrement so a stray record never underflows
        let _ = self
            .active_count
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |x| {
                Some(x.saturating_sub(1))
            });
        self.total_committed.fetch_add(1, Ordering::Relaxed);
    }

    fn record_rollback(&self) {
        let _ = self
            .active_count
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |x| {
                Some(x.saturating_sub(1))
            });
        self.total_rolled_back.fetch_add(1, Ordering::Relaxed);
    }

    /// Snapshot of the transaction counters
    pub fn metrics(&self) -> TransactionMetrics {
        let started = self.total_started.load(Ordering::Relaxed);
        let committed = self.total_committed.load(Ordering::Relaxed);

        TransactionMetrics {
            active_count: self.active_count.load(Ordering::Relaxed),
            total_started: started,
            total_committed: committed,
            total_rolled_back: self.total_rolled_back.load(Ordering::Relaxed),
            total_joined: self.total_joined.load(Ordering::Relaxed),
            total_suspended: self.total_suspended.load(Ordering::Relaxed),
            total_savepoints: self.total_savepoints.load(Ordering::Relaxed),
            commit_rate: if started > 0 {
                committed as f64 / started as f64
            } else {
                0.0
            },
        }
    }
}

/// Re-bind a suspended transaction and merge the outcomes
///
/// The inner result wins; a resume failure only surfaces when the inner
/// part succeeded.
fn finish_suspended<T, E: From<Error>>(
    suspended: SuspendedResources,
    result: std::result::Result<T, E>,
) -> std::result::Result<T, E> {
    let resumed = suspended.resume();
    match (result, resumed) {
        (Err(e), _) => Err(e),
        (Ok(_), Err(e)) => Err(e.into()),
        (Ok(value), Ok(())) => Ok(value),
    }
}

// ============================================================================
// Scopes
// ============================================================================

/// A physical transaction owned by one `run` frame
///
/// Dropped without [`commit`](Self::commit) or [`rollback`](Self::rollback)
/// (a panicking unit of work) it rolls back.
struct TransactionScope<'a> {
    coordinator: &'a TransactionCoordinator,
    binding: Option<BoundResource>,
    txn_id: Uuid,
    started_at: Instant,
}

impl<'a> TransactionScope<'a> {
    fn begin(coordinator: &'a TransactionCoordinator, mode: Propagation) -> Result<Self> {
        let source = &coordinator.source;
        let mut connection = source.get_connection()?;
        if let Err(e) = connection.set_auto_commit(false) {
            source.release_connection(connection);
            return Err(Error::data_access("failed to begin transaction", e));
        }

        let txn_id = Uuid::new_v4();
        let binding = BoundResource::bind(source.id(), ConnectionHolder::new(connection, txn_id))?;

        coordinator.record_start();
        debug!(
            target: "txflow::txn",
            source = %source.id(),
            txn_id = %txn_id,
            propagation = %mode,
            "Transaction started"
        );

        Ok(Self {
            coordinator,
            binding: Some(binding),
            txn_id,
            started_at: Instant::now(),
        })
    }

    fn commit(mut self) -> Result<()> {
        let Some(binding) = self.binding.take() else {
            return Err(Error::illegal_state("transaction already completed"));
        };

        match binding.holder().with_connection(|conn| {
            conn.commit()
                .map_err(|e| Error::data_access("commit failed", e))
        }) {
            Ok(()) => {
                self.coordinator.record_commit();
                info!(
                    target: "txflow::txn",
                    txn_id = %self.txn_id,
                    elapsed_us = self.started_at.elapsed().as_micros() as u64,
                    "Transaction committed"
                );
                self.finish(binding);
                Ok(())
            }
            Err(e) => {
                warn!(target: "txflow::txn", txn_id = %self.txn_id, error = %e, "Commit failed, rolling back");
                self.rollback_binding(binding, "commit failed");
                Err(e)
            }
        }
    }

    fn rollback(mut self, reason: &'static str) {
        if let Some(binding) = self.binding.take() {
            self.rollback_binding(binding, reason);
        }
    }

    fn rollback_binding(&self, binding: BoundResource, reason: &'static str) {
        let rolled_back = binding.holder().with_connection(|conn| {
            conn.rollback()
                .map_err(|e| Error::data_access("rollback failed", e))
        });
        self.coordinator.record_rollback();
        match rolled_back {
            Ok(()) => {
                info!(
                    target: "txflow::txn",
                    txn_id = %self.txn_id,
                    reason,
                    elapsed_us = self.started_at.elapsed().as_micros() as u64,
                    "Transaction rolled back"
                );
                self.finish(binding);
            }
            Err(e) => {
                error!(target: "txflow::txn", txn_id = %self.txn_id, reason, error = %e, "Rollback failed");
                self.discard(binding);
            }
        }
    }

    /// Unbind, restore auto-commit and hand the connection back
    fn finish(&self, binding: BoundResource) {
        let Some(holder) = self.unbind(binding) else {
            return;
        };

        if let Err(e) = holder.with_connection(|conn| {
            conn.set_auto_commit(true)
                .map_err(|e| Error::data_access("restoring auto-commit failed", e))
        }) {
            warn!(target: "txflow::txn", txn_id = %self.txn_id, error = %e, "Could not restore auto-commit");
        }

        match holder.into_connection() {
            Some(connection) => self.coordinator.source.release_connection(connection),
            None => warn!(
                target: "txflow::txn",
                txn_id = %self.txn_id,
                "Connection still referenced after transaction end; dropping it with the last reference"
            ),
        }
    }

    /// Unbind and close a connection whose transaction state is unknown
    ///
    /// Auto-commit is left off and the connection is dropped instead of
    /// being returned to the provider.
    fn discard(&self, binding: BoundResource) {
        if let Some(holder) = self.unbind(binding) {
            warn!(target: "txflow::txn", txn_id = %self.txn_id, "Closing connection after failed rollback");
            drop(holder);
        }
    }

    fn unbind(&self, binding: BoundResource) -> Option<ConnectionHolder> {
        match binding.release() {
            Ok(holder) => Some(holder),
            Err(e) => {
                error!(target: "txflow::txn", txn_id = %self.txn_id, error = %e, "Unbind failed");
                None
            }
        }
    }
}

impl Drop for TransactionScope<'_> {
    fn drop(&mut self) {
        if let Some(binding) = self.binding.take() {
            warn!(target: "txflow::txn", txn_id = %self.txn_id, "Transaction abandoned, rolling back");
            self.rollback_binding(binding, "abandoned");
        }
    }
}

/// A savepoint inside the bound transaction
///
/// Dropped without [`release`](Self::release) or
/// [`rollback`](Self::rollback) it rolls back to the savepoint.
struct SavepointScope {
    holder: ConnectionHolder,
    name: String,
    done: bool,
}

impl SavepointScope {
    fn create(holder: ConnectionHolder) -> Result<Self> {
        let name = holder.next_savepoint_name();
        holder.with_connection(|conn| {
            conn.savepoint(&name)
                .map_err(|e| Error::data_access(format!("creating savepoint {}", name), e))
        })?;
        debug!(target: "txflow::txn", txn_id = %holder.transaction_id(), savepoint = %name, "Savepoint created");
        Ok(Self {
            holder,
            name,
            done: false,
        })
    }

    fn release(mut self) -> Result<()> {
        self.done = true;
        let name = &self.name;
        self.holder.with_connection(|conn| {
            conn.release_savepoint(name)
                .map_err(|e| Error::data_access(format!("releasing savepoint {}", name), e))
        })?;
        debug!(target: "txflow::txn", txn_id = %self.holder.transaction_id(), savepoint = %name, "Savepoint released");
        Ok(())
    }

    fn rollback(mut self) {
        self.done = true;
        self.rollback_to();
    }

    fn rollback_to(&self) {
        let name = &self.name;
        let outcome = self.holder.with_connection(|conn| {
            conn.rollback_to_savepoint(name)
                .and_then(|_| conn.release_savepoint(name))
                .map_err(|e| Error::data_access(format!("rolling back to savepoint {}", name), e))
        });
        match outcome {
            Ok(()) => info!(
                target: "txflow::txn",
                txn_id = %self.holder.transaction_id(),
                savepoint = %name,
                "Rolled back to savepoint"
            ),
            Err(e) => error!(
                target: "txflow::txn",
                txn_id = %self.holder.transaction_id(),
                savepoint = %name,
                error = %e,
                "Savepoint rollback failed"
            ),
        }
    }
}

impl Drop for SavepointScope {
    fn drop(&mut self) {
        if !self.done {
            self.rollback_to();
        }
    }
}

/// Transaction counters
#[derive(Debug, Clone)]
pub struct TransactionMetrics {
    /// Physical transactions currently open
    pub active_count: u64,
    /// Physical transactions started
    pub total_started: u64,
    /// Physical transactions committed
    pub total_committed: u64,
    /// Physical transactions rolled back
    pub total_rolled_back: u64,
    /// Units of work that joined an existing transaction
    pub total_joined: u64,
    /// Suspensions of an active transaction
    pub total_suspended: u64,
    /// Savepoints created for NESTED units
    pub total_savepoints: u64,
    /// Commit success rate (committed / started)
    pub commit_rate: f64,
}

impl TransactionMetrics {
    /// Transactions that finished either way
    pub fn total_completed(&self) -> u64 {
        self.total_committed + self.total_rolled_back
    }

    /// Rollback rate (rolled back / started)
    pub fn rollback_rate(&self) -> f64 {
        if self.total_started > 0 {
            self.total_rolled_back as f64 / self.total_started as f64
        } else {
            0.0
        }
    }
}
