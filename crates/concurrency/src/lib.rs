//! Concurrency layer for txflow
//!
//! This crate holds the per-thread side of transaction management:
//! - ResourceRegistry: thread-scoped table of bound connections, keyed by
//!   SourceId, with a suspension stack per source
//! - BoundResource / SuspendedResources: scoped guards that undo a bind or
//!   a suspension on every exit path
//! - Propagation: the seven propagation modes and the pure `resolve`
//!   function that turns (mode, thread state) into an action

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod propagation;
pub mod registry;

pub use propagation::{resolve, Propagation, PropagationAction, TransactionState};
pub use registry::{BoundResource, ConnectionHolder, ResourceRegistry, SuspendedResources};
