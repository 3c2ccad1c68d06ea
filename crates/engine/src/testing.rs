//! In-process provider for tests
//!
//! [`MemoryProvider`] keeps tables in memory and gives every connection its
//! own pending write list, so uncommitted work is invisible to other
//! connections and disappears on rollback. Every physical operation is
//! appended to an event log that tests assert against.
//!
//! Only a handful of command shapes are understood:
//!
//! - `INSERT INTO t VALUES (?, ...)` with one placeholder per column
//! - `DELETE FROM t [WHERE col = ?]`
//! - `SELECT * | COUNT(*) | a, b FROM t [WHERE col = ?]`
//!
//! Anything else fails at prepare time, which is how tests simulate a
//! malformed command.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use txflow_core::{
    BoxError, Connection, ConnectionProvider, PreparedCommand, ResultCursor, Row, SqlValue,
    ValueRow,
};

/// A physical operation observed by the provider
#[derive(Debug, Clone, PartialEq)]
#[allow(missing_docs)]
pub enum MemoryEvent {
    /// A connection was handed out
    Acquire { connection: u64 },
    /// A connection was closed
    Release { connection: u64 },
    /// Auto-commit was switched off
    Begin { connection: u64 },
    /// Pending writes were applied
    Commit { connection: u64 },
    /// Pending writes were discarded
    Rollback { connection: u64 },
    /// A savepoint was created
    Savepoint { connection: u64, name: String },
    /// A savepoint was released
    ReleaseSavepoint { connection: u64, name: String },
    /// Writes since a savepoint were discarded
    RollbackToSavepoint { connection: u64, name: String },
    /// A command was executed with these bound parameters
    Statement {
        connection: u64,
        command: String,
        params: Vec<SqlValue>,
    },
}

impl MemoryEvent {
    /// Connection the event happened on
    pub fn connection(&self) -> u64 {
        match self {
            MemoryEvent::Acquire { connection }
            | MemoryEvent::Release { connection }
            | MemoryEvent::Begin { connection }
            | MemoryEvent::Commit { connection }
            | MemoryEvent::Rollback { connection }
            | MemoryEvent::Savepoint { connection, .. }
            | MemoryEvent::ReleaseSavepoint { connection, .. }
            | MemoryEvent::RollbackToSavepoint { connection, .. }
            | MemoryEvent::Statement { connection, .. } => *connection,
        }
    }
}

struct Table {
    columns: Arc<[String]>,
    rows: Vec<Vec<SqlValue>>,
}

impl Table {
    fn column(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.eq_ignore_ascii_case(name))
    }
}

#[derive(Debug, Clone)]
enum Write {
    Insert {
        table: String,
        row: Vec<SqlValue>,
    },
    Delete {
        table: String,
        filter: Option<(usize, SqlValue)>,
    },
}

impl Write {
    fn table(&self) -> &str {
        match self {
            Write::Insert { table, .. } | Write::Delete { table, .. } => table,
        }
    }

    fn apply(&self, rows: &mut Vec<Vec<SqlValue>>) {
        match self {
            Write::Insert { row, .. } => rows.push(row.clone()),
            Write::Delete { filter, .. } => rows.retain(|row| !matches_filter(row, filter)),
        }
    }
}

fn matches_filter(row: &[SqlValue], filter: &Option<(usize, SqlValue)>) -> bool {
    match filter {
        None => true,
        Some((index, value)) => row.get(*index) == Some(value),
    }
}

#[derive(Default)]
struct MemoryState {
    tables: BTreeMap<String, Table>,
    events: Vec<MemoryEvent>,
    next_connection: u64,
    open_connections: usize,
    unavailable: bool,
    fail_commits: bool,
    fail_rollbacks: bool,
}

/// In-memory connection provider with an event log
pub struct MemoryProvider {
    state: Arc<Mutex<MemoryState>>,
    savepoints: bool,
}

impl Default for MemoryProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryProvider {
    /// Empty database whose connections support savepoints
    pub fn new() -> Self {
        Self::with_savepoints(true)
    }

    /// Empty database; `savepoints` controls `supports_savepoints()`
    pub fn with_savepoints(savepoints: bool) -> Self {
        Self {
            state: Arc::new(Mutex::new(MemoryState::default())),
            savepoints,
        }
    }

    /// Create (or replace) a table
    pub fn create_table(&self, name: &str, columns: &[&str]) {
        let columns: Arc<[String]> = columns.iter().map(|c| c.to_string()).collect();
        self.state.lock().tables.insert(
            name.to_ascii_lowercase(),
            Table {
                columns,
                rows: Vec::new(),
            },
        );
    }

    /// Committed rows of `table`
    pub fn rows(&self, table: &str) -> Vec<Vec<SqlValue>> {
        self.state
            .lock()
            .tables
            .get(&table.to_ascii_lowercase())
            .map(|t| t.rows.clone())
            .unwrap_or_default()
    }

    /// Make `get_connection` fail
    pub fn set_unavailable(&self, unavailable: bool) {
        self.state.lock().unavailable = unavailable;
    }

    /// Make every `commit` fail
    pub fn set_fail_commits(&self, fail: bool) {
        self.state.lock().fail_commits = fail;
    }

    /// Make every `rollback` fail, leaving pending writes in place
    pub fn set_fail_rollbacks(&self, fail: bool) {
        self.state.lock().fail_rollbacks = fail;
    }

    /// Connections handed out and not yet closed
    pub fn open_connections(&self) -> usize {
        self.state.lock().open_connections
    }

    /// Snapshot of the event log
    pub fn events(&self) -> Vec<MemoryEvent> {
        self.state.lock().events.clone()
    }

    /// Number of events matching `predicate`
    pub fn count(&self, predicate: impl Fn(&MemoryEvent) -> bool) -> usize {
        self.state.lock().events.iter().filter(|e| predicate(e)).count()
    }

    /// Executed commands with their bound parameters, in order
    pub fn statements(&self) -> Vec<(String, Vec<SqlValue>)> {
        self.state
            .lock()
            .events
            .iter()
            .filter_map(|e| match e {
                MemoryEvent::Statement {
                    command, params, ..
                } => Some((command.clone(), params.clone())),
                _ => None,
            })
            .collect()
    }

    /// Forget all events recorded so far
    pub fn clear_events(&self) {
        self.state.lock().events.clear();
    }
}

impl ConnectionProvider for MemoryProvider {
    fn get_connection(&self) -> Result<Box<dyn Connection>, BoxError> {
        let mut state = self.state.lock();
        if state.unavailable {
            return Err("memory database is unavailable".into());
        }
        state.next_connection += 1;
        state.open_connections += 1;
        let id = state.next_connection;
        state.events.push(MemoryEvent::Acquire { connection: id });
        Ok(Box::new(MemoryConnection {
            id,
            state: Arc::clone(&self.state),
            savepoints_supported: self.savepoints,
            auto_commit: true,
            pending: Vec::new(),
            savepoints: Vec::new(),
        }))
    }
}

struct MemoryConnection {
    id: u64,
    state: Arc<Mutex<MemoryState>>,
    savepoints_supported: bool,
    auto_commit: bool,
    pending: Vec<Write>,
    /// Savepoint name and the pending length when it was taken
    savepoints: Vec<(String, usize)>,
}

impl MemoryConnection {
    fn record(&self, event: MemoryEvent) {
        self.state.lock().events.push(event);
    }

    fn write(&mut self, write: Write) {
        if self.auto_commit {
            let mut state = self.state.lock();
            if let Some(table) = state.tables.get_mut(write.table()) {
                write.apply(&mut table.rows);
            }
        } else {
            self.pending.push(write);
        }
    }

    /// Committed rows plus this connection's own pending writes
    fn view(&self, table: &str) -> Vec<Vec<SqlValue>> {
        let mut rows = self
            .state
            .lock()
            .tables
            .get(table)
            .map(|t| t.rows.clone())
            .unwrap_or_default();
        for write in self.pending.iter().filter(|w| w.table() == table) {
            write.apply(&mut rows);
        }
        rows
    }

    fn apply_pending(&mut self) {
        let mut state = self.state.lock();
        for write in self.pending.drain(..) {
            if let Some(table) = state.tables.get_mut(write.table()) {
                write.apply(&mut table.rows);
            }
        }
        self.savepoints.clear();
    }

    fn savepoint_position(&self, name: &str) -> Result<usize, BoxError> {
        self.savepoints
            .iter()
            .rposition(|(n, _)| n == name)
            .ok_or_else(|| format!("no such savepoint: {}", name).into())
    }
}

impl Connection for MemoryConnection {
    fn set_auto_commit(&mut self, auto_commit: bool) -> Result<(), BoxError> {
        if auto_commit == self.auto_commit {
            return Ok(());
        }
        if auto_commit {
            if !self.pending.is_empty() {
                self.apply_pending();
                self.record(MemoryEvent::Commit {
                    connection: self.id,
                });
            }
        } else {
            self.record(MemoryEvent::Begin {
                connection: self.id,
            });
        }
        self.auto_commit = auto_commit;
        Ok(())
    }

    fn auto_commit(&self) -> bool {
        self.auto_commit
    }

    fn commit(&mut self) -> Result<(), BoxError> {
        if self.auto_commit {
            return Err("commit called in auto-commit mode".into());
        }
        if self.state.lock().fail_commits {
            return Err("simulated commit failure".into());
        }
        self.apply_pending();
        self.record(MemoryEvent::Commit {
            connection: self.id,
        });
        Ok(())
    }

    fn rollback(&mut self) -> Result<(), BoxError> {
        if self.auto_commit {
            return Err("rollback called in auto-commit mode".into());
        }
        if self.state.lock().fail_rollbacks {
            return Err("simulated rollback failure".into());
        }
        self.pending.clear();
        self.savepoints.clear();
        self.record(MemoryEvent::Rollback {
            connection: self.id,
        });
        Ok(())
    }

    fn supports_savepoints(&self) -> bool {
        self.savepoints_supported
    }

    fn savepoint(&mut self, name: &str) -> Result<(), BoxError> {
        if !self.savepoints_supported {
            return Err("savepoints are disabled".into());
        }
        if self.auto_commit {
            return Err("savepoint requires an open transaction".into());
        }
        self.savepoints.push((name.to_string(), self.pending.len()));
        self.record(MemoryEvent::Savepoint {
            connection: self.id,
            name: name.to_string(),
        });
        Ok(())
    }

    fn release_savepoint(&mut self, name: &str) -> Result<(), BoxError> {
        let position = self.savepoint_position(name)?;
        self.savepoints.truncate(position);
        self.record(MemoryEvent::ReleaseSavepoint {
            connection: self.id,
            name: name.to_string(),
        });
        Ok(())
    }

    fn rollback_to_savepoint(&mut self, name: &str) -> Result<(), BoxError> {
        let position = self.savepoint_position(name)?;
        let mark = self.savepoints[position].1;
        self.pending.truncate(mark);
        self.savepoints.truncate(position + 1);
        self.record(MemoryEvent::RollbackToSavepoint {
            connection: self.id,
            name: name.to_string(),
        });
        Ok(())
    }

    fn prepare<'c>(&'c mut self, command: &str) -> Result<Box<dyn PreparedCommand + 'c>, BoxError> {
        let plan = self.plan(command)?;
        let placeholders = command.matches('?').count();
        Ok(Box::new(MemoryCommand {
            connection: self,
            command: command.to_string(),
            plan,
            params: vec![None; placeholders],
        }))
    }
}

impl Drop for MemoryConnection {
    fn drop(&mut self) {
        let mut state = self.state.lock();
        state.open_connections = state.open_connections.saturating_sub(1);
        state.events.push(MemoryEvent::Release {
            connection: self.id,
        });
    }
}

// ============================================================================
// Command planning
// ============================================================================

#[derive(Debug, Clone)]
enum Plan {
    Insert {
        table: String,
    },
    Delete {
        table: String,
        filter: Option<usize>,
    },
    Select {
        table: String,
        columns: Arc<[String]>,
        projection: Projection,
        filter: Option<usize>,
    },
}

#[derive(Debug, Clone)]
enum Projection {
    Count,
    Columns(Vec<usize>),
}

impl MemoryConnection {
    fn plan(&self, command: &str) -> Result<Plan, BoxError> {
        let normalized = command.trim().trim_end_matches(';').to_ascii_lowercase();
        let words: Vec<&str> = normalized.split_whitespace().collect();
        let placeholders = command.matches('?').count();
        let state = self.state.lock();
        let lookup = |name: &str| lookup_table(&state.tables, name);

        match words.as_slice() {
            ["insert", "into", table, ..] => {
                let (table, def) = lookup(table)?;
                if placeholders != def.columns.len() {
                    return Err(format!(
                        "table {} has {} columns but {} values were given",
                        table,
                        def.columns.len(),
                        placeholders
                    )
                    .into());
                }
                Ok(Plan::Insert { table })
            }
            ["delete", "from", table, rest @ ..] => {
                let (table, def) = lookup(table)?;
                let filter = parse_filter(rest, def)?;
                Ok(Plan::Delete { table, filter })
            }
            ["select", ..] => {
                let from = words
                    .iter()
                    .position(|w| *w == "from")
                    .ok_or("SELECT without FROM")?;
                let table = words.get(from + 1).ok_or("SELECT without a table")?;
                let (table, def) = lookup(table)?;
                let rest = words.get(from + 2..).unwrap_or(&[]);
                let filter = parse_filter(rest, def)?;
                let wanted = words[1..from].join(" ");
                let (projection, columns) = match wanted.as_str() {
                    "count(*)" => (Projection::Count, Arc::from(vec!["count".to_string()])),
                    "*" => (
                        Projection::Columns((0..def.columns.len()).collect()),
                        Arc::clone(&def.columns),
                    ),
                    list => {
                        let mut indexes = Vec::new();
                        let mut names = Vec::new();
                        for name in list.split(',').map(str::trim).filter(|n| !n.is_empty()) {
                            let index = def
                                .column(name)
                                .ok_or_else(|| format!("no such column: {}", name))?;
                            indexes.push(index);
                            names.push(def.columns[index].clone());
                        }
                        if indexes.is_empty() {
                            return Err("SELECT without columns".into());
                        }
                        (Projection::Columns(indexes), Arc::from(names))
                    }
                };
                Ok(Plan::Select {
                    table,
                    columns,
                    projection,
                    filter,
                })
            }
            _ => Err(format!("unsupported command: {}", command).into()),
        }
    }
}

fn lookup_table<'t>(
    tables: &'t BTreeMap<String, Table>,
    name: &str,
) -> Result<(String, &'t Table), BoxError> {
    let name = name.split('(').next().unwrap_or(name).to_string();
    match tables.get(&name) {
        Some(table) => Ok((name, table)),
        None => Err(format!("no such table: {}", name).into()),
    }
}

/// `WHERE col = ?`, in either spacing
fn parse_filter(words: &[&str], table: &Table) -> Result<Option<usize>, BoxError> {
    let column = match words {
        [] => return Ok(None),
        ["where", column, "=", "?"] => *column,
        ["where", condition] => condition
            .strip_suffix("=?")
            .ok_or_else(|| format!("unsupported WHERE clause: {}", condition))?,
        other => return Err(format!("unsupported clause: {}", other.join(" ")).into()),
    };
    table
        .column(column)
        .map(Some)
        .ok_or_else(|| format!("no such column: {}", column).into())
}

// ============================================================================
// Prepared commands and cursors
// ============================================================================

struct MemoryCommand<'c> {
    connection: &'c mut MemoryConnection,
    command: String,
    plan: Plan,
    params: Vec<Option<SqlValue>>,
}

impl MemoryCommand<'_> {
    fn bind(&mut self, index: usize, value: SqlValue) -> Result<(), BoxError> {
        match index.checked_sub(1).and_then(|i| self.params.get_mut(i)) {
            Some(slot) => {
                *slot = Some(value);
                Ok(())
            }
            None => Err(format!(
                "parameter index {} out of range (1..={})",
                index,
                self.params.len()
            )
            .into()),
        }
    }

    fn bound_params(&self) -> Result<Vec<SqlValue>, BoxError> {
        self.params
            .iter()
            .enumerate()
            .map(|(i, p)| {
                p.clone()
                    .ok_or_else(|| BoxError::from(format!("parameter {} is not bound", i + 1)))
            })
            .collect()
    }

    fn record_statement(&self, params: &[SqlValue]) {
        self.connection.record(MemoryEvent::Statement {
            connection: self.connection.id,
            command: self.command.clone(),
            params: params.to_vec(),
        });
    }

    fn filter(filter: Option<usize>, params: &[SqlValue]) -> Option<(usize, SqlValue)> {
        filter.zip(params.last().cloned())
    }
}

impl PreparedCommand for MemoryCommand<'_> {
    fn parameter_count(&self) -> usize {
        self.params.len()
    }

    fn bind_null(&mut self, index: usize) -> Result<(), BoxError> {
        self.bind(index, SqlValue::Null)
    }

    fn bind_bool(&mut self, index: usize, value: bool) -> Result<(), BoxError> {
        self.bind(index, SqlValue::Bool(value))
    }

    fn bind_int(&mut self, index: usize, value: i64) -> Result<(), BoxError> {
        self.bind(index, SqlValue::Int(value))
    }

    fn bind_float(&mut self, index: usize, value: f64) -> Result<(), BoxError> {
        self.bind(index, SqlValue::Float(value))
    }

    fn bind_text(&mut self, index: usize, value: &str) -> Result<(), BoxError> {
        self.bind(index, SqlValue::Text(value.to_string()))
    }

    fn bind_bytes(&mut self, index: usize, value: &[u8]) -> Result<(), BoxError> {
        self.bind(index, SqlValue::Bytes(value.to_vec()))
    }

    fn bind_timestamp(&mut self, index: usize, value: &DateTime<Utc>) -> Result<(), BoxError> {
        self.bind(index, SqlValue::Timestamp(*value))
    }

    fn execute_update(&mut self) -> Result<u64, BoxError> {
        let params = self.bound_params()?;
        self.record_statement(&params);
        match self.plan.clone() {
            Plan::Insert { table } => {
                self.connection.write(Write::Insert { table, row: params });
                Ok(1)
            }
            Plan::Delete { table, filter } => {
                let filter = Self::filter(filter, &params);
                let affected = self
                    .connection
                    .view(&table)
                    .iter()
                    .filter(|row| matches_filter(row, &filter))
                    .count();
                self.connection.write(Write::Delete { table, filter });
                Ok(affected as u64)
            }
            Plan::Select { .. } => Err("SELECT cannot run as an update".into()),
        }
    }

    fn execute_query<'s>(&'s mut self) -> Result<Box<dyn ResultCursor + 's>, BoxError> {
        let params = self.bound_params()?;
        self.record_statement(&params);
        let Plan::Select {
            table,
            columns,
            projection,
            filter,
        } = self.plan.clone()
        else {
            return Err("only SELECT can run as a query".into());
        };

        let filter = Self::filter(filter, &params);
        let matching: Vec<Vec<SqlValue>> = self
            .connection
            .view(&table)
            .into_iter()
            .filter(|row| matches_filter(row, &filter))
            .collect();
        let rows = match projection {
            Projection::Count => vec![vec![SqlValue::Int(matching.len() as i64)]],
            Projection::Columns(indexes) => matching
                .into_iter()
                .map(|row| indexes.iter().map(|&i| row[i].clone()).collect())
                .collect(),
        };
        Ok(Box::new(MemoryCursor {
            columns,
            rows: rows.into_iter(),
            current: None,
        }))
    }
}

struct MemoryCursor {
    columns: Arc<[String]>,
    rows: std::vec::IntoIter<Vec<SqlValue>>,
    current: Option<ValueRow>,
}

impl ResultCursor for MemoryCursor {
    fn next_row(&mut self) -> Result<Option<&dyn Row>, BoxError> {
        self.current = self
            .rows
            .next()
            .map(|values| ValueRow::new(Arc::clone(&self.columns), values));
        Ok(self.current.as_ref().map(|row| row as &dyn Row))
    }
}
