//! Row mappers
//!
//! A row mapper is any `Fn(&dyn Row) -> Result<T>`. The executor advances
//! the cursor and calls the mapper once per row; the mapper only reads.
//!
//! Types that always map the same way implement [`FromRow`] and pass
//! `T::from_row` where a mapper is expected:
//!
//! ```ignore
//! impl FromRow for User {
//!     fn from_row(row: &dyn Row) -> Result<Self> {
//!         Ok(User { id: row.get("id")?, account: row.get("account")? })
//!     }
//! }
//!
//! let users = executor.query("SELECT id, account FROM users", User::from_row, &[])?;
//! ```

use txflow_core::{FromSql, Result, Row, SqlValue};

/// A type that can be built from one result row
pub trait FromRow: Sized {
    /// Map the current row
    ///
    /// # Errors
    ///
    /// `DataAccess` if a column is missing or has an incompatible type.
    fn from_row(row: &dyn Row) -> Result<Self>;
}

/// Mapper reading the column at a 0-based position
pub fn single_column<T: FromSql>(index: usize) -> impl Fn(&dyn Row) -> Result<T> {
    move |row: &dyn Row| row.get(index)
}

/// Mapper reading the column called `name`
pub fn column<T: FromSql>(name: impl Into<String>) -> impl Fn(&dyn Row) -> Result<T> {
    let name = name.into();
    move |row: &dyn Row| row.get(name.as_str())
}

/// Mapper copying every column of the row, in order
pub fn values() -> impl Fn(&dyn Row) -> Result<Vec<SqlValue>> {
    |row: &dyn Row| {
        (0..row.column_count())
            .map(|index| row.get::<SqlValue, _>(index))
            .collect()
    }
}
