//! Core types and traits for txflow
//!
//! This crate defines the foundational types shared by every layer:
//! - Error: the data-access error taxonomy
//! - SqlValue: typed positional parameter values
//! - Row / FromSql / ColumnIndex: reading columns off a result row
//! - Traits: the connection provider contract (ConnectionProvider,
//!   Connection, PreparedCommand, ResultCursor)
//! - DataSource: a provider paired with the SourceId the registry keys on

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod row;
pub mod source;
pub mod traits;
pub mod value;

pub use error::{BoxError, Error, Result};
pub use row::{ColumnIndex, FromSql, Row, ValueRow};
pub use source::{DataSource, SourceId};
pub use traits::{Connection, ConnectionProvider, PreparedCommand, ResultCursor};
pub use value::SqlValue;
