//! Propagation modes
//!
//! A propagation mode tells the coordinator what to do with a unit of work
//! when the calling thread may or may not already be inside a transaction.
//! The decision is a pure function of the mode and the thread's
//! [`TransactionState`]:
//!
//! | mode | ACTIVE | NO_TRANSACTION / SUSPENDED |
//! |---|---|---|
//! | REQUIRED | join | start new |
//! | REQUIRES_NEW | suspend, start new | start new |
//! | SUPPORTS | join | run without |
//! | MANDATORY | join | reject |
//! | NOT_SUPPORTED | suspend, run without | run without |
//! | NEVER | reject | run without |
//! | NESTED | savepoint | start new |
//!
//! A thread whose transaction is suspended has no active transaction, so
//! `Suspended` resolves exactly like `NoTransaction`.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// How a unit of work relates to an enclosing transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Propagation {
    /// Join the current transaction, or start one
    #[default]
    Required,
    /// Always start a fresh transaction, suspending the current one
    RequiresNew,
    /// Join if present, otherwise run without a transaction
    Supports,
    /// Join; fail if there is no transaction
    Mandatory,
    /// Run without a transaction, suspending the current one
    NotSupported,
    /// Run without a transaction; fail if there is one
    Never,
    /// Run inside a savepoint of the current transaction, or start one
    Nested,
}

impl Propagation {
    /// Every mode, in declaration order
    pub const ALL: [Propagation; 7] = [
        Propagation::Required,
        Propagation::RequiresNew,
        Propagation::Supports,
        Propagation::Mandatory,
        Propagation::NotSupported,
        Propagation::Never,
        Propagation::Nested,
    ];

    /// Canonical upper-case name
    pub fn as_str(&self) -> &'static str {
        match self {
            Propagation::Required => "REQUIRED",
            Propagation::RequiresNew => "REQUIRES_NEW",
            Propagation::Supports => "SUPPORTS",
            Propagation::Mandatory => "MANDATORY",
            Propagation::NotSupported => "NOT_SUPPORTED",
            Propagation::Never => "NEVER",
            Propagation::Nested => "NESTED",
        }
    }
}

impl fmt::Display for Propagation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Propagation {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Propagation::ALL
            .iter()
            .copied()
            .find(|p| p.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| format!("unknown propagation mode '{}'", s))
    }
}

/// Transaction state of the calling thread for one source
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    /// Nothing bound, nothing suspended
    NoTransaction,
    /// A connection is bound and a transaction is running on it
    Active,
    /// Nothing bound, but an outer transaction is parked on the stack
    Suspended,
}

impl TransactionState {
    /// True if a unit of work could join a transaction right now
    pub fn has_active(&self) -> bool {
        matches!(self, TransactionState::Active)
    }
}

/// What the coordinator must do for one call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PropagationAction {
    /// Run on the bound connection; commit/rollback belongs to the owner
    Join,
    /// Acquire a connection and own a new transaction
    StartNew,
    /// Park the current transaction, then own a new one
    SuspendAndStartNew,
    /// Park the current transaction, then run without one
    SuspendAndRunWithout,
    /// Run without any transaction
    RunWithout,
    /// Run inside a savepoint on the bound connection
    Savepoint,
    /// Refuse with `IllegalTransactionState`
    Reject {
        /// Why the precondition failed
        reason: &'static str,
    },
}

/// Decide the action for `mode` given the thread's `state`
pub fn resolve(mode: Propagation, state: TransactionState) -> PropagationAction {
    use PropagationAction::*;

    if state.has_active() {
        match mode {
            Propagation::Required | Propagation::Supports | Propagation::Mandatory => Join,
            Propagation::RequiresNew => SuspendAndStartNew,
            Propagation::NotSupported => SuspendAndRunWithout,
            Propagation::Never => Reject {
                reason: "existing transaction found for a unit of work marked NEVER",
            },
            Propagation::Nested => Savepoint,
        }
    } else {
        match mode {
            Propagation::Required | Propagation::RequiresNew | Propagation::Nested => StartNew,
            Propagation::Supports | Propagation::NotSupported | Propagation::Never => RunWithout,
            Propagation::Mandatory => Reject {
                reason: "no existing transaction found for a unit of work marked MANDATORY",
            },
        }
    }
}
