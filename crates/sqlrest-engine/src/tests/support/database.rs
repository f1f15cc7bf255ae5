//! In-memory database shared by every fake session of a scenario.
//!
//! Queries, procedure outputs and failures are registered against the exact
//! driver SQL the engine sends, i.e. after placeholder parsing.

use std::collections::HashMap;
use std::sync::mpsc::{self, Receiver, SyncSender};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::session::{SessionError, Statement};
use crate::value::Value;

/// Canned result set for one query.
#[derive(Debug, Clone, Default)]
pub struct Table {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
}

/// Test-side handle of a paused statement.
#[derive(Debug)]
pub struct Gate {
    /// Signalled once the statement is about to run.
    pub entered: Receiver<()>,
    /// Send to let the statement run.
    pub proceed: SyncSender<()>,
}

#[derive(Debug)]
struct Hold {
    entered: SyncSender<()>,
    proceed: Receiver<()>,
}

#[derive(Debug, Default)]
struct DatabaseState {
    gates: HashMap<String, Hold>,
    queries: HashMap<String, Table>,
    updates: HashMap<String, u64>,
    calls: HashMap<String, Vec<(String, Value)>>,
    failures: HashMap<String, SessionError>,
    executed: Vec<Statement>,
    fail_savepoints: bool,
    decline_releases: bool,
    fail_disconnect: bool,
    savepoints_opened: usize,
    savepoints_released: usize,
    savepoints_rolled_back: usize,
    commits: usize,
    rollbacks: usize,
}

/// Shared handle to the fake database.
#[derive(Debug, Clone, Default)]
pub struct FakeDatabase {
    state: Arc<Mutex<DatabaseState>>,
}

impl FakeDatabase {
    fn state(&self) -> MutexGuard<'_, DatabaseState> {
        self.state.lock().expect("fake database mutex poisoned")
    }

    /// Registers the result of a query.
    pub fn with_query(&self, sql: &str, columns: &[&str], rows: Vec<Vec<Value>>) {
        self.state().queries.insert(
            sql.to_owned(),
            Table {
                columns: columns.iter().map(|column| (*column).to_owned()).collect(),
                rows,
            },
        );
    }

    /// Registers the affected-row count of a DML statement.
    pub fn with_update(&self, sql: &str, rows: u64) {
        self.state().updates.insert(sql.to_owned(), rows);
    }

    /// Registers the named outputs of a procedure call.
    pub fn with_call(&self, sql: &str, outputs: Vec<(&str, Value)>) {
        self.state().calls.insert(
            sql.to_owned(),
            outputs
                .into_iter()
                .map(|(name, value)| (name.to_owned(), value))
                .collect(),
        );
    }

    /// Makes `sql` fail with `error`.
    pub fn fail_on(&self, sql: &str, error: SessionError) {
        self.state().failures.insert(sql.to_owned(), error);
    }

    /// Makes every savepoint request fail.
    pub fn fail_savepoints(&self) {
        self.state().fail_savepoints = true;
    }

    /// Makes the database refuse to release savepoints; rollbacks still
    /// succeed.
    pub fn decline_releases(&self) {
        self.state().decline_releases = true;
    }

    /// Makes every disconnect fail.
    pub fn fail_disconnect(&self) {
        self.state().fail_disconnect = true;
    }

    pub fn savepoints_opened(&self) -> usize {
        self.state().savepoints_opened
    }

    pub fn savepoints_released(&self) -> usize {
        self.state().savepoints_released
    }

    pub fn savepoints_rolled_back(&self) -> usize {
        self.state().savepoints_rolled_back
    }

    pub fn commits(&self) -> usize {
        self.state().commits
    }

    pub fn rollbacks(&self) -> usize {
        self.state().rollbacks
    }

    /// SQL text of every statement executed so far, in order.
    pub fn executed_sql(&self) -> Vec<String> {
        self.state()
            .executed
            .iter()
            .map(|statement| statement.sql.clone())
            .collect()
    }

    /// Statements executed so far, in order.
    pub fn executed(&self) -> Vec<Statement> {
        self.state().executed.clone()
    }

    /// Pauses the next execution of `sql` until the returned gate opens.
    pub fn pause_on(&self, sql: &str) -> Gate {
        let (entered_tx, entered) = mpsc::sync_channel(1);
        let (proceed, proceed_rx) = mpsc::sync_channel(1);
        self.state().gates.insert(
            sql.to_owned(),
            Hold {
                entered: entered_tx,
                proceed: proceed_rx,
            },
        );
        Gate { entered, proceed }
    }

    pub(super) fn record(&self, statement: &Statement) -> Result<(), SessionError> {
        let hold = self.state().gates.remove(&statement.sql);
        if let Some(hold) = hold {
            hold.entered.send(()).expect("gate owner dropped");
            hold.proceed.recv().expect("gate owner dropped");
        }

        let mut state = self.state();
        state.executed.push(statement.clone());
        match state.failures.get(&statement.sql) {
            Some(error) => Err(error.clone()),
            None => Ok(()),
        }
    }

    pub(super) fn query(&self, sql: &str) -> Result<Table, SessionError> {
        self.state()
            .queries
            .get(sql)
            .cloned()
            .ok_or_else(|| SessionError::database(format!("table or view does not exist: {sql}")))
    }

    pub(super) fn update_count(&self, sql: &str) -> u64 {
        self.state().updates.get(sql).copied().unwrap_or(1)
    }

    pub(super) fn call_outputs(&self, sql: &str) -> Vec<(String, Value)> {
        self.state().calls.get(sql).cloned().unwrap_or_default()
    }

    pub(super) fn open_savepoint(&self) -> Result<usize, SessionError> {
        let mut state = self.state();
        if state.fail_savepoints {
            return Err(SessionError::database("savepoints are not available"));
        }
        state.savepoints_opened += 1;
        Ok(state.savepoints_opened)
    }

    /// Returns `false` when the release was declined.
    pub(super) fn close_savepoint(&self, rollback: bool) -> bool {
        let mut state = self.state();
        if rollback {
            state.savepoints_rolled_back += 1;
        } else if state.decline_releases {
            return false;
        } else {
            state.savepoints_released += 1;
        }
        true
    }

    pub(super) fn disconnect(&self) -> Result<(), SessionError> {
        if self.state().fail_disconnect {
            return Err(SessionError::connection_lost("disconnect failed"));
        }
        Ok(())
    }

    pub(super) fn commit(&self) {
        self.state().commits += 1;
    }

    pub(super) fn rollback(&self) {
        self.state().rollbacks += 1;
    }
}
