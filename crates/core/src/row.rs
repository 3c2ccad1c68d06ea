//! Result row access
//!
//! A [`Row`] is the cursor's current row as seen by a row mapper. Mappers
//! read columns by position (0-based) or by name and convert them with
//! [`FromSql`]:
//!
//! ```ignore
//! let user = |row: &dyn Row| -> Result<User> {
//!     Ok(User {
//!         id: row.get("id")?,
//!         account: row.get("account")?,
//!         active: row.get(2usize)?,
//!     })
//! };
//! ```
//!
//! A missing column or an incompatible type is a [`Error::DataAccess`].

use chrono::{DateTime, Utc};
use std::sync::Arc;

use crate::error::{BoxError, Error, Result};
use crate::value::SqlValue;

/// The current row of a result cursor
///
/// Implemented by providers. Rows are only valid while the cursor sits on
/// them; mappers must copy out what they need.
pub trait Row {
    /// Number of columns in the result
    fn column_count(&self) -> usize;

    /// Name of the column at `index`, if the provider knows it
    fn column_name(&self, index: usize) -> Option<&str>;

    /// Raw value of the column at `index`
    ///
    /// # Errors
    ///
    /// Returns the provider error if the value cannot be read.
    fn value(&self, index: usize) -> std::result::Result<SqlValue, BoxError>;
}

impl<'r> dyn Row + 'r {
    /// Read and convert a column
    ///
    /// # Errors
    ///
    /// `DataAccess` if the column does not exist or its value does not
    /// convert into `T`.
    pub fn get<T: FromSql, I: ColumnIndex>(&self, column: I) -> Result<T> {
        let index = column.resolve(self)?;
        let value = self
            .value(index)
            .map_err(|e| Error::data_access(format!("reading column {}", column.describe()), e))?;
        T::from_sql(value).map_err(|reason| {
            Error::data_access_msg(format!("column {}: {}", column.describe(), reason))
        })
    }

    /// Position of the column called `name` (case-insensitive)
    pub fn column_index(&self, name: &str) -> Option<usize> {
        (0..self.column_count())
            .find(|&i| matches!(self.column_name(i), Some(n) if n.eq_ignore_ascii_case(name)))
    }
}

/// A fully materialized row: shared column names plus owned values
///
/// Providers whose native row type cannot implement [`Row`] directly copy
/// the current row into a `ValueRow` and hand out a reference to it.
#[derive(Debug, Clone, PartialEq)]
pub struct ValueRow {
    columns: Arc<[String]>,
    values: Vec<SqlValue>,
}

impl ValueRow {
    /// Build a row; `values` must line up with `columns`
    pub fn new(columns: Arc<[String]>, values: Vec<SqlValue>) -> Self {
        Self { columns, values }
    }

    /// The row's values in column order
    pub fn values(&self) -> &[SqlValue] {
        &self.values
    }
}

impl Row for ValueRow {
    fn column_count(&self) -> usize {
        self.values.len()
    }

    fn column_name(&self, index: usize) -> Option<&str> {
        self.columns.get(index).map(String::as_str)
    }

    fn value(&self, index: usize) -> std::result::Result<SqlValue, BoxError> {
        self.values
            .get(index)
            .cloned()
            .ok_or_else(|| format!("column index {} out of range", index).into())
    }
}

/// Something that identifies a column: a 0-based position or a name
pub trait ColumnIndex: Copy {
    /// Resolve to a 0-based position within `row`
    ///
    /// # Errors
    ///
    /// `DataAccess` if the row has no such column.
    fn resolve(self, row: &dyn Row) -> Result<usize>;

    /// Human-readable form for error messages
    fn describe(self) -> String;
}

impl ColumnIndex for usize {
    fn resolve(self, row: &dyn Row) -> Result<usize> {
        if self < row.column_count() {
            Ok(self)
        } else {
            Err(Error::data_access_msg(format!(
                "column index {} out of range (row has {} columns)",
                self,
                row.column_count()
            )))
        }
    }

    fn describe(self) -> String {
        format!("#{}", self)
    }
}

impl ColumnIndex for &str {
    fn resolve(self, row: &dyn Row) -> Result<usize> {
        row.column_index(self)
            .ok_or_else(|| Error::data_access_msg(format!("column '{}' not found", self)))
    }

    fn describe(self) -> String {
        format!("'{}'", self)
    }
}

/// Conversion from a column value into a Rust type
///
/// The error string describes the mismatch; the caller attaches the column.
pub trait FromSql: Sized {
    /// Convert `value`
    ///
    /// # Errors
    ///
    /// Returns a description of the type mismatch.
    fn from_sql(value: SqlValue) -> std::result::Result<Self, String>;
}

fn mismatch(expected: &str, actual: &SqlValue) -> String {
    format!(
        "incompatible type: expected {}, got {}",
        expected,
        actual.type_name()
    )
}

impl FromSql for SqlValue {
    fn from_sql(value: SqlValue) -> std::result::Result<Self, String> {
        Ok(value)
    }
}

impl FromSql for String {
    fn from_sql(value: SqlValue) -> std::result::Result<Self, String> {
        match value {
            SqlValue::Text(s) => Ok(s),
            other => Err(mismatch("Text", &other)),
        }
    }
}

impl FromSql for i64 {
    fn from_sql(value: SqlValue) -> std::result::Result<Self, String> {
        match value {
            SqlValue::Int(i) => Ok(i),
            other => Err(mismatch("Int", &other)),
        }
    }
}

impl FromSql for i32 {
    fn from_sql(value: SqlValue) -> std::result::Result<Self, String> {
        match value {
            SqlValue::Int(i) => {
                i32::try_from(i).map_err(|_| format!("integer {} out of range for i32", i))
            }
            other => Err(mismatch("Int", &other)),
        }
    }
}

impl FromSql for f64 {
    fn from_sql(value: SqlValue) -> std::result::Result<Self, String> {
        match value {
            SqlValue::Float(f) => Ok(f),
            // Integral REAL values come back as integers from some providers
            SqlValue::Int(i) => Ok(i as f64),
            other => Err(mismatch("Float", &other)),
        }
    }
}

impl FromSql for bool {
    fn from_sql(value: SqlValue) -> std::result::Result<Self, String> {
        match value {
            SqlValue::Bool(b) => Ok(b),
            // Providers without a boolean storage class store 0/1
            SqlValue::Int(0) => Ok(false),
            SqlValue::Int(1) => Ok(true),
            other => Err(mismatch("Bool", &other)),
        }
    }
}

impl FromSql for Vec<u8> {
    fn from_sql(value: SqlValue) -> std::result::Result<Self, String> {
        match value {
            SqlValue::Bytes(b) => Ok(b),
            other => Err(mismatch("Bytes", &other)),
        }
    }
}

impl FromSql for DateTime<Utc> {
    fn from_sql(value: SqlValue) -> std::result::Result<Self, String> {
        match value {
            SqlValue::Timestamp(ts) => Ok(ts),
            SqlValue::Text(s) => DateTime::parse_from_rfc3339(&s)
                .map(|ts| ts.with_timezone(&Utc))
                .map_err(|e| format!("invalid timestamp '{}': {}", s, e)),
            other => Err(mismatch("Timestamp", &other)),
        }
    }
}

impl<T: FromSql> FromSql for Option<T> {
    fn from_sql(value: SqlValue) -> std::result::Result<Self, String> {
        match value {
            SqlValue::Null => Ok(None),
            other => T::from_sql(other).map(Some),
        }
    }
}
