//! Connection sources
//!
//! A [`DataSource`] pairs a [`ConnectionProvider`] with a process-unique
//! [`SourceId`]. The registry keys thread-bound connections by that id, so
//! every clone of one `DataSource` sees the same transaction while two
//! independently created sources never do, even over the same provider type.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::traits::{Connection, ConnectionProvider};

static NEXT_SOURCE_ID: AtomicU64 = AtomicU64::new(1);

/// Identity of a connection source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SourceId(u64);

impl SourceId {
    /// Allocate a fresh id
    pub fn next() -> Self {
        SourceId(NEXT_SOURCE_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Raw numeric id
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "source-{}", self.0)
    }
}

/// A connection provider with a registry identity
#[derive(Clone)]
pub struct DataSource {
    id: SourceId,
    provider: Arc<dyn ConnectionProvider>,
}

impl DataSource {
    /// Wrap a provider under a fresh [`SourceId`]
    pub fn new(provider: Arc<dyn ConnectionProvider>) -> Self {
        Self {
            id: SourceId::next(),
            provider,
        }
    }

    /// Registry key for this source
    pub fn id(&self) -> SourceId {
        self.id
    }

    /// Obtain a connection from the provider
    ///
    /// # Errors
    ///
    /// `ConnectionUnavailable` wrapping the provider's error.
    pub fn get_connection(&self) -> Result<Box<dyn Connection>> {
        self.provider
            .get_connection()
            .map_err(Error::connection_unavailable)
    }

    /// Hand a connection back to the provider
    pub fn release_connection(&self, connection: Box<dyn Connection>) {
        self.provider.release_connection(connection);
    }
}

impl fmt::Debug for DataSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DataSource").field("id", &self.id).finish()
    }
}
