//! Thread-scoped connection registry
//!
//! Maps a [`SourceId`] to the connection the calling thread's active unit of
//! work owns, plus a stack of suspended connections for that source.
//!
//! # Architecture
//!
//! The registry uses thread-local storage like the transaction pool it grew
//! out of: no locks, no cross-thread visibility. Holders are reference
//! counted with `Rc`, which makes them `!Send`; a bound connection cannot be
//! moved to another thread by construction.
//!
//! Entries are created lazily on the first bind and removed as soon as both
//! the binding and the suspension stack are empty, so an idle thread carries
//! no state between unrelated calls.
//!
//! # Scoped use
//!
//! Prefer [`BoundResource`] and [`SuspendedResources`] over the raw
//! `bind`/`unbind`/`suspend`/`resume` calls. Their `Drop` restores the
//! previous registry state even if the unit of work panics.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

use tracing::{debug, error};
use txflow_core::{Connection, Error, Result, SourceId};
use uuid::Uuid;

use crate::propagation::TransactionState;

thread_local! {
    /// Per-thread bound and suspended connections, keyed by source
    static RESOURCES: RefCell<HashMap<SourceId, ThreadResources>> = RefCell::new(HashMap::new());
}

#[derive(Default)]
struct ThreadResources {
    bound: Option<ConnectionHolder>,
    suspended: Vec<ConnectionHolder>,
}

impl ThreadResources {
    fn is_empty(&self) -> bool {
        self.bound.is_none() && self.suspended.is_empty()
    }
}

// ============================================================================
// ConnectionHolder
// ============================================================================

/// A connection owned by one logical transaction on this thread
///
/// Cloning shares the same connection. The holder also carries the
/// transaction id used in log events and the savepoint counter for
/// NESTED units running on it.
#[derive(Clone)]
pub struct ConnectionHolder {
    inner: Rc<HolderInner>,
}

struct HolderInner {
    connection: RefCell<Box<dyn Connection>>,
    transaction_id: Uuid,
    savepoints: Cell<u32>,
}

impl ConnectionHolder {
    /// Wrap a connection for transaction `transaction_id`
    pub fn new(connection: Box<dyn Connection>, transaction_id: Uuid) -> Self {
        Self {
            inner: Rc::new(HolderInner {
                connection: RefCell::new(connection),
                transaction_id,
                savepoints: Cell::new(0),
            }),
        }
    }

    /// Id of the logical transaction that owns this connection
    pub fn transaction_id(&self) -> Uuid {
        self.inner.transaction_id
    }

    /// Run `f` with exclusive access to the connection
    ///
    /// # Errors
    ///
    /// `IllegalState` if the connection is already in use further up this
    /// thread's stack (for example a row mapper issuing its own command).
    pub fn with_connection<R>(&self, f: impl FnOnce(&mut dyn Connection) -> Result<R>) -> Result<R> {
        let mut conn = self.inner.connection.try_borrow_mut().map_err(|_| {
            Error::illegal_state(format!(
                "connection of transaction {} is already in use on this thread",
                self.inner.transaction_id
            ))
        })?;
        f(&mut **conn)
    }

    /// Allocate the next savepoint name on this connection
    pub fn next_savepoint_name(&self) -> String {
        let n = self.inner.savepoints.get() + 1;
        self.inner.savepoints.set(n);
        format!("txflow_sp_{}", n)
    }

    /// True if both holders share one connection
    pub fn ptr_eq(&self, other: &ConnectionHolder) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    /// Take the connection back out
    ///
    /// Returns `None` if other clones of the holder are still alive.
    pub fn into_connection(self) -> Option<Box<dyn Connection>> {
        Rc::try_unwrap(self.inner)
            .ok()
            .map(|inner| inner.connection.into_inner())
    }
}

impl fmt::Debug for ConnectionHolder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionHolder")
            .field("transaction_id", &self.inner.transaction_id)
            .finish()
    }
}

// ============================================================================
// ResourceRegistry
// ============================================================================

/// Registry operations on the calling thread's resources
///
/// All operations are confined to thread-local state; none blocks and none
/// performs I/O.
pub struct ResourceRegistry;

impl ResourceRegistry {
    /// Bind `holder` as the active connection for `source`
    ///
    /// # Errors
    ///
    /// `IllegalState` if a connection is already bound for `source`.
    pub fn bind(source: SourceId, holder: ConnectionHolder) -> Result<()> {
        RESOURCES.with(|resources| {
            let mut resources = resources.borrow_mut();
            let entry = resources.entry(source).or_default();
            if let Some(existing) = &entry.bound {
                return Err(Error::illegal_state(format!(
                    "{} already has connection of transaction {} bound on this thread",
                    source,
                    existing.transaction_id()
                )));
            }
            debug!(target: "txflow::registry", %source, txn = %holder.transaction_id(), "bind");
            entry.bound = Some(holder);
            Ok(())
        })
    }

    /// The connection bound for `source`, if any
    pub fn get(source: SourceId) -> Option<ConnectionHolder> {
        RESOURCES.with(|resources| {
            resources
                .borrow()
                .get(&source)
                .and_then(|entry| entry.bound.clone())
        })
    }

    /// Remove and return the connection bound for `source`
    ///
    /// # Errors
    ///
    /// `IllegalState` if nothing is bound.
    pub fn unbind(source: SourceId) -> Result<ConnectionHolder> {
        RESOURCES.with(|resources| {
            let mut resources = resources.borrow_mut();
            let holder = resources
                .get_mut(&source)
                .and_then(|entry| entry.bound.take())
                .ok_or_else(|| {
                    Error::illegal_state(format!("no connection bound for {} on this thread", source))
                })?;
            if resources.get(&source).map_or(false, ThreadResources::is_empty) {
                resources.remove(&source);
            }
            debug!(target: "txflow::registry", %source, txn = %holder.transaction_id(), "unbind");
            Ok(holder)
        })
    }

    /// True if this thread has any connection bound, for any source
    pub fn is_active() -> bool {
        RESOURCES.with(|resources| {
            resources
                .borrow()
                .values()
                .any(|entry| entry.bound.is_some())
        })
    }

    /// True if this thread has a connection bound for `source`
    pub fn is_bound(source: SourceId) -> bool {
        RESOURCES.with(|resources| {
            resources
                .borrow()
                .get(&source)
                .map_or(false, |entry| entry.bound.is_some())
        })
    }

    /// Transaction state of this thread for `source`
    pub fn state(source: SourceId) -> TransactionState {
        RESOURCES.with(|resources| match resources.borrow().get(&source) {
            Some(entry) if entry.bound.is_some() => TransactionState::Active,
            Some(entry) if !entry.suspended.is_empty() => TransactionState::Suspended,
            _ => TransactionState::NoTransaction,
        })
    }

    /// Unbind the active connection for `source` and park it on the stack
    ///
    /// # Errors
    ///
    /// `IllegalState` if nothing is bound.
    pub fn suspend(source: SourceId) -> Result<()> {
        RESOURCES.with(|resources| {
            let mut resources = resources.borrow_mut();
            let entry = resources.get_mut(&source).ok_or_else(|| {
                Error::illegal_state(format!("nothing to suspend for {} on this thread", source))
            })?;
            let holder = entry.bound.take().ok_or_else(|| {
                Error::illegal_state(format!("nothing to suspend for {} on this thread", source))
            })?;
            debug!(
                target: "txflow::registry",
                %source,
                txn = %holder.transaction_id(),
                depth = entry.suspended.len() + 1,
                "suspend"
            );
            entry.suspended.push(holder);
            Ok(())
        })
    }

    /// Pop the most recently suspended connection and bind it again
    ///
    /// # Errors
    ///
    /// `IllegalState` if a connection is still bound for `source` or the
    /// stack is empty.
    pub fn resume(source: SourceId) -> Result<()> {
        RESOURCES.with(|resources| {
            let mut resources = resources.borrow_mut();
            let entry = resources.get_mut(&source).ok_or_else(|| {
                Error::illegal_state(format!("nothing suspended for {} on this thread", source))
            })?;
            if entry.bound.is_some() {
                return Err(Error::illegal_state(format!(
                    "cannot resume {} while another connection is bound",
                    source
                )));
            }
            let holder = entry.suspended.pop().ok_or_else(|| {
                Error::illegal_state(format!("nothing suspended for {} on this thread", source))
            })?;
            debug!(
                target: "txflow::registry",
                %source,
                txn = %holder.transaction_id(),
                depth = entry.suspended.len(),
                "resume"
            );
            entry.bound = Some(holder);
            Ok(())
        })
    }

    /// Number of suspended connections for `source` on this thread
    pub fn suspended_depth(source: SourceId) -> usize {
        RESOURCES.with(|resources| {
            resources
                .borrow()
                .get(&source)
                .map_or(0, |entry| entry.suspended.len())
        })
    }

    /// Number of sources with registry state on this thread
    ///
    /// Zero once every outermost unit of work has finished.
    pub fn entry_count() -> usize {
        RESOURCES.with(|resources| resources.borrow().len())
    }
}

// ============================================================================
// Scoped guards
// ============================================================================

/// A binding that is undone when the guard goes out of scope
#[must_use = "dropping the guard unbinds the connection immediately"]
pub struct BoundResource {
    source: SourceId,
    holder: ConnectionHolder,
    unbound: bool,
}

impl BoundResource {
    /// Bind `holder` for `source` until the guard is dropped or released
    ///
    /// # Errors
    ///
    /// `IllegalState` if a connection is already bound for `source`.
    pub fn bind(source: SourceId, holder: ConnectionHolder) -> Result<Self> {
        ResourceRegistry::bind(source, holder.clone())?;
        Ok(Self {
            source,
            holder,
            unbound: false,
        })
    }

    /// The bound holder
    pub fn holder(&self) -> &ConnectionHolder {
        &self.holder
    }

    /// Unbind now and hand the holder back
    ///
    /// # Errors
    ///
    /// `IllegalState` if something else already unbound the source.
    pub fn release(mut self) -> Result<ConnectionHolder> {
        self.unbound = true;
        let bound = ResourceRegistry::unbind(self.source)?;
        if !bound.ptr_eq(&self.holder) {
            return Err(Error::illegal_state(format!(
                "{} was rebound to transaction {} while transaction {} owned it",
                self.source,
                bound.transaction_id(),
                self.holder.transaction_id()
            )));
        }
        drop(bound);
        Ok(self.holder.clone())
    }
}

impl Drop for BoundResource {
    fn drop(&mut self) {
        if !self.unbound {
            if let Err(e) = ResourceRegistry::unbind(self.source) {
                error!(target: "txflow::registry", source = %self.source, error = %e, "unbind on drop failed");
            }
        }
    }
}

/// A suspension that is resumed when the guard goes out of scope
#[must_use = "dropping the guard resumes the suspended connection immediately"]
pub struct SuspendedResources {
    source: SourceId,
    resumed: bool,
}

impl SuspendedResources {
    /// Park the active connection for `source`
    ///
    /// # Errors
    ///
    /// `IllegalState` if nothing is bound.
    pub fn suspend(source: SourceId) -> Result<Self> {
        ResourceRegistry::suspend(source)?;
        Ok(Self {
            source,
            resumed: false,
        })
    }

    /// Resume now
    ///
    /// # Errors
    ///
    /// `IllegalState` if another connection is still bound for the source.
    pub fn resume(mut self) -> Result<()> {
        self.resumed = true;
        ResourceRegistry::resume(self.source)
    }
}

impl Drop for SuspendedResources {
    fn drop(&mut self) {
        if !self.resumed {
            if let Err(e) = ResourceRegistry::resume(self.source) {
                error!(target: "txflow::registry", source = %self.source, error = %e, "resume on drop failed");
            }
        }
    }
}
