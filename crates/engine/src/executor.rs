//! Statement executor
//!
//! Runs parameterized commands against a [`DataSource`]. If the calling
//! thread has a transaction bound for the source, the command runs on that
//! connection; otherwise a fresh auto-commit connection is checked out for
//! the single call and handed back before returning.
//!
//! Parameters bind left to right starting at index 1, each through the
//! provider's native setter for its [`SqlValue`] variant. The number of
//! parameters must match the number of placeholders exactly.
//!
//! Every provider failure leaves as [`Error::DataAccess`] with the original
//! error as its source.

use tracing::{debug, info};
use txflow_concurrency::ResourceRegistry;
use txflow_core::{
    Connection, DataSource, Error, FromSql, PreparedCommand, Result, Row, SqlValue,
};

use crate::mapper::single_column;

/// Executes commands and queries on behalf of callers
#[derive(Debug, Clone)]
pub struct StatementExecutor {
    source: DataSource,
    log_statements: bool,
}

impl StatementExecutor {
    /// Executor over `source`
    pub fn new(source: DataSource) -> Self {
        Self {
            source,
            log_statements: false,
        }
    }

    /// Log statement text at `info` instead of `debug`
    pub fn with_statement_logging(mut self, enabled: bool) -> Self {
        self.log_statements = enabled;
        self
    }

    /// The source commands run against
    pub fn source(&self) -> &DataSource {
        &self.source
    }

    /// Run a mutation and return the number of affected rows
    ///
    /// # Errors
    ///
    /// `ConnectionUnavailable` if no connection can be obtained, otherwise
    /// `DataAccess` for any preparation, binding or execution failure.
    pub fn execute(&self, command: &str, params: &[SqlValue]) -> Result<u64> {
        self.log_statement("execute", command, params.len());
        self.with_connection(|conn| {
            let mut stmt = prepare(conn, command)?;
            bind_parameters(stmt.as_mut(), command, params)?;
            stmt.execute_update()
                .map_err(|e| Error::data_access(format!("executing '{}'", command), e))
        })
    }

    /// Run the same mutation once per parameter row
    ///
    /// The command is prepared once. Returns the affected row count of each
    /// execution, in order. Inside a transaction a failure leaves earlier
    /// rows to the transaction's outcome; outside one they stay applied.
    ///
    /// # Errors
    ///
    /// As for [`execute`](Self::execute); the first failing row stops the batch.
    pub fn execute_batch(&self, command: &str, rows: &[Vec<SqlValue>]) -> Result<Vec<u64>> {
        self.log_statement("execute_batch", command, rows.len());
        self.with_connection(|conn| {
            let mut stmt = prepare(conn, command)?;
            let mut counts = Vec::with_capacity(rows.len());
            for params in rows {
                bind_parameters(stmt.as_mut(), command, params)?;
                let count = stmt
                    .execute_update()
                    .map_err(|e| Error::data_access(format!("executing '{}'", command), e))?;
                counts.push(count);
            }
            Ok(counts)
        })
    }

    /// Run a query and map every row, in result order
    ///
    /// # Errors
    ///
    /// As for [`execute`](Self::execute), plus any error returned by `mapper`.
    pub fn query<T, F>(&self, command: &str, mapper: F, params: &[SqlValue]) -> Result<Vec<T>>
    where
        F: Fn(&dyn Row) -> Result<T>,
    {
        self.log_statement("query", command, params.len());
        self.with_connection(|conn| {
            let mut stmt = prepare(conn, command)?;
            bind_parameters(stmt.as_mut(), command, params)?;
            let mut cursor = stmt
                .execute_query()
                .map_err(|e| Error::data_access(format!("querying '{}'", command), e))?;
            let mut results = Vec::new();
            while let Some(row) = cursor.next_row().map_err(|e| cursor_error(command, e))? {
                results.push(mapper(row)?);
            }
            Ok(results)
        })
    }

    /// Run a query expected to return at most one row
    ///
    /// # Errors
    ///
    /// `TooManyResults` if the query produces two or more rows, otherwise as
    /// for [`query`](Self::query). Reading stops at the second row, so the
    /// rest of the result set is never produced.
    pub fn query_one<T, F>(&self, command: &str, mapper: F, params: &[SqlValue]) -> Result<Option<T>>
    where
        F: Fn(&dyn Row) -> Result<T>,
    {
        self.log_statement("query_one", command, params.len());
        self.with_connection(|conn| {
            let mut stmt = prepare(conn, command)?;
            bind_parameters(stmt.as_mut(), command, params)?;
            let mut cursor = stmt
                .execute_query()
                .map_err(|e| Error::data_access(format!("querying '{}'", command), e))?;

            let first = match cursor.next_row().map_err(|e| cursor_error(command, e))? {
                None => return Ok(None),
                Some(row) => mapper(row)?,
            };

            if cursor
                .next_row()
                .map_err(|e| cursor_error(command, e))?
                .is_some()
            {
                return Err(Error::TooManyResults {
                    command: command.to_string(),
                    actual: 2,
                });
            }
            Ok(Some(first))
        })
    }

    /// Run a single-row query and read its first column
    ///
    /// # Errors
    ///
    /// As for [`query_one`](Self::query_one).
    pub fn query_scalar<T: FromSql>(&self, command: &str, params: &[SqlValue]) -> Result<Option<T>> {
        self.query_one(command, single_column(0), params)
    }

    /// Run `f` on the bound connection, or on a connection checked out for
    /// this call only
    fn with_connection<R>(&self, f: impl FnOnce(&mut dyn Connection) -> Result<R>) -> Result<R> {
        if let Some(holder) = ResourceRegistry::get(self.source.id()) {
            return holder.with_connection(f);
        }
        let mut scoped = ScopedConnection::acquire(&self.source)?;
        match scoped.connection.as_mut() {
            Some(connection) => f(connection.as_mut()),
            None => Err(Error::illegal_state("scoped connection already released")),
        }
    }

    fn log_statement(&self, operation: &'static str, command: &str, params: usize) {
        if self.log_statements {
            info!(target: "txflow::sql", source = %self.source.id(), operation, params, "{}", command);
        } else {
            debug!(target: "txflow::sql", source = %self.source.id(), operation, params, "{}", command);
        }
    }
}

/// A non-transactional connection returned to its provider on drop
struct ScopedConnection<'a> {
    source: &'a DataSource,
    connection: Option<Box<dyn Connection>>,
}

impl<'a> ScopedConnection<'a> {
    fn acquire(source: &'a DataSource) -> Result<Self> {
        let connection = source.get_connection()?;
        Ok(Self {
            source,
            connection: Some(connection),
        })
    }
}

impl Drop for ScopedConnection<'_> {
    fn drop(&mut self) {
        if let Some(connection) = self.connection.take() {
            self.source.release_connection(connection);
        }
    }
}

fn prepare<'c>(
    conn: &'c mut dyn Connection,
    command: &str,
) -> Result<Box<dyn PreparedCommand + 'c>> {
    conn.prepare(command)
        .map_err(|e| Error::data_access(format!("preparing '{}'", command), e))
}

fn cursor_error(command: &str, e: txflow_core::BoxError) -> Error {
    Error::data_access(format!("reading results of '{}'", command), e)
}

/// Bind `params` in order, index 1 first
fn bind_parameters(
    stmt: &mut (dyn PreparedCommand + '_),
    command: &str,
    params: &[SqlValue],
) -> Result<()> {
    let expected = stmt.parameter_count();
    if params.len() != expected {
        return Err(Error::data_access_msg(format!(
            "'{}' has {} placeholder(s) but {} parameter(s) were supplied",
            command,
            expected,
            params.len()
        )));
    }

    for (offset, value) in params.iter().enumerate() {
        let index = offset + 1;
        let bound = match value {
            SqlValue::Null => stmt.bind_null(index),
            SqlValue::Bool(b) => stmt.bind_bool(index, *b),
            SqlValue::Int(i) => stmt.bind_int(index, *i),
            SqlValue::Float(f) => stmt.bind_float(index, *f),
            SqlValue::Text(s) => stmt.bind_text(index, s),
            SqlValue::Bytes(b) => stmt.bind_bytes(index, b),
            SqlValue::Timestamp(ts) => stmt.bind_timestamp(index, ts),
        };
        bound.map_err(|e| {
            Error::data_access(
                format!("binding {} parameter {} of '{}'", value.type_name(), index, command),
                e,
            )
        })?;
    }
    Ok(())
}
