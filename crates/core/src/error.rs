//! Error types for the data-access layer
//!
//! Every failure that crosses the core boundary is one of the [`Error`]
//! variants below. Provider-specific errors (SQLite, test doubles, ...) are
//! never exposed directly: they are boxed into the `source` of a
//! [`Error::DataAccess`] or [`Error::ConnectionUnavailable`] and remain
//! reachable only through [`std::error::Error::source`].
//!
//! We use `thiserror` for the `Display` and `Error` implementations.

use std::fmt::Display;
use thiserror::Error;

/// Boxed error returned by provider implementations
///
/// Connection providers report their own error types through this alias;
/// the core wraps them before handing them to callers.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Result type alias for data-access operations
pub type Result<T> = std::result::Result<T, Error>;

/// Data-access errors
///
/// # Categories
///
/// | Category | Variants | Description |
/// |----------|----------|-------------|
/// | Provider | `ConnectionUnavailable` | No connection could be obtained |
/// | Execution | `DataAccess` | Prepare, bind, execute or row mapping failed |
/// | Cardinality | `TooManyResults` | Single-result query matched 2+ rows |
/// | Propagation | `IllegalTransactionState`, `NestedTransactionNotSupported` | Mode precondition violated |
/// | Registry | `IllegalState` | Bind/unbind misuse |
/// | Setup | `Config` | Configuration could not be loaded |
/// | Application | `UnitOfWork` | Wrapped failure raised by a unit of work |
#[derive(Debug, Error)]
pub enum Error {
    /// The connection provider could not supply a connection
    #[error("connection unavailable: {message}")]
    ConnectionUnavailable {
        /// What was being attempted
        message: String,
        /// Provider error, if any
        #[source]
        source: Option<BoxError>,
    },

    /// Command preparation, execution or row mapping failed
    #[error("data access failure: {message}")]
    DataAccess {
        /// Description of the failed step
        message: String,
        /// Underlying provider error, if any
        #[source]
        source: Option<BoxError>,
    },

    /// A single-result query matched more than one row
    #[error("too many results for '{command}': expected at most 1 row, got at least {actual}")]
    TooManyResults {
        /// Command text that produced the rows
        command: String,
        /// Rows read before the query was abandoned
        actual: usize,
    },

    /// A propagation precondition was violated
    #[error("illegal transaction state for propagation {propagation}: {reason}")]
    IllegalTransactionState {
        /// Requested propagation mode
        propagation: String,
        /// Why the mode could not be honored
        reason: String,
    },

    /// NESTED was requested but the connection cannot create savepoints
    #[error("nested transactions are not supported: {reason}")]
    NestedTransactionNotSupported {
        /// Why no savepoint could be created
        reason: String,
    },

    /// Registry misuse (double bind, unbind with nothing bound, ...)
    #[error("illegal state: {reason}")]
    IllegalState {
        /// Description of the violated precondition
        reason: String,
    },

    /// Configuration could not be read or parsed
    #[error("configuration error: {reason}")]
    Config {
        /// What went wrong
        reason: String,
    },

    /// Failure raised by application code inside a unit of work
    #[error("unit of work failed: {source}")]
    UnitOfWork {
        /// Application error
        source: BoxError,
    },
}

impl Error {
    /// Wrap a provider failure that happened while doing `message`
    pub fn data_access(message: impl Into<String>, source: impl Into<BoxError>) -> Self {
        Error::DataAccess {
            message: message.into(),
            source: Some(source.into()),
        }
    }

    /// Data-access failure detected by the core itself (no provider cause)
    pub fn data_access_msg(message: impl Into<String>) -> Self {
        Error::DataAccess {
            message: message.into(),
            source: None,
        }
    }

    /// Wrap a provider failure to supply a connection
    pub fn connection_unavailable(source: impl Into<BoxError>) -> Self {
        Error::ConnectionUnavailable {
            message: "failed to obtain connection from provider".to_string(),
            source: Some(source.into()),
        }
    }

    /// Propagation precondition violation
    pub fn illegal_transaction_state(propagation: impl Display, reason: impl Into<String>) -> Self {
        Error::IllegalTransactionState {
            propagation: propagation.to_string(),
            reason: reason.into(),
        }
    }

    /// Savepoint-based nesting is unavailable
    pub fn nested_not_supported(reason: impl Into<String>) -> Self {
        Error::NestedTransactionNotSupported {
            reason: reason.into(),
        }
    }

    /// Registry misuse
    pub fn illegal_state(reason: impl Into<String>) -> Self {
        Error::IllegalState {
            reason: reason.into(),
        }
    }

    /// Configuration failure
    pub fn config(reason: impl Into<String>) -> Self {
        Error::Config {
            reason: reason.into(),
        }
    }

    /// Wrap an application error raised inside a unit of work
    pub fn unit_of_work(source: impl Into<BoxError>) -> Self {
        Error::UnitOfWork {
            source: source.into(),
        }
    }

    /// Stable identifier for the variant
    pub fn error_code(&self) -> &'static str {
        match self {
            Error::ConnectionUnavailable { .. } => "ConnectionUnavailable",
            Error::DataAccess { .. } => "DataAccess",
            Error::TooManyResults { .. } => "TooManyResults",
            Error::IllegalTransactionState { .. } => "IllegalTransactionState",
            Error::NestedTransactionNotSupported { .. } => "NestedTransactionNotSupported",
            Error::IllegalState { .. } => "IllegalState",
            Error::Config { .. } => "Config",
            Error::UnitOfWork { .. } => "UnitOfWork",
        }
    }

    /// True for failures of the statement/connection layer
    pub fn is_data_access(&self) -> bool {
        matches!(self, Error::DataAccess { .. })
    }
}
