//! Session and factory doubles backed by [`FakeDatabase`].

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use super::database::{FakeDatabase, Table};
use crate::session::{
    AuthMethod, ConnectRequest, Cursor, CursorOptions, Savepoint, Session, SessionError,
    SessionFactory, SessionLock, Statement,
};
use crate::value::Value;

#[derive(Debug)]
struct OpenCursor {
    cursor: Cursor,
    table: Table,
}

#[derive(Debug, Default)]
struct CursorTable {
    next_id: u64,
    open: HashMap<u64, OpenCursor>,
}

/// Session double that keeps cursors in memory.
#[derive(Debug)]
pub struct FakeSession {
    guid: String,
    dedicated: bool,
    method: AuthMethod,
    lock: SessionLock,
    database: FakeDatabase,
    cursors: Mutex<CursorTable>,
    touches: AtomicUsize,
    connected: AtomicBool,
    nested_connect: AtomicBool,
}

impl FakeSession {
    pub fn new(guid: &str, dedicated: bool, database: FakeDatabase) -> Self {
        Self::with_method(guid, dedicated, AuthMethod::Database, database)
    }

    pub fn with_method(
        guid: &str,
        dedicated: bool,
        method: AuthMethod,
        database: FakeDatabase,
    ) -> Self {
        Self {
            guid: guid.to_owned(),
            dedicated,
            method,
            lock: SessionLock::new(),
            database,
            cursors: Mutex::new(CursorTable::default()),
            touches: AtomicUsize::new(0),
            connected: AtomicBool::new(false),
            nested_connect: AtomicBool::new(false),
        }
    }

    pub fn touches(&self) -> usize {
        self.touches.load(Ordering::SeqCst)
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Whether the last `connect` ran inside a batch or script.
    pub fn connected_nested(&self) -> bool {
        self.nested_connect.load(Ordering::SeqCst)
    }

    pub fn open_cursors(&self) -> usize {
        self.cursors().open.len()
    }

    fn cursors(&self) -> MutexGuard<'_, CursorTable> {
        self.cursors.lock().expect("cursor table mutex poisoned")
    }
}

impl Session for FakeSession {
    fn guid(&self) -> &str {
        &self.guid
    }

    fn dedicated(&self) -> bool {
        self.dedicated
    }

    fn auth_method(&self) -> AuthMethod {
        self.method
    }

    fn lock(&self) -> &SessionLock {
        &self.lock
    }

    fn touch(&self) {
        self.touches.fetch_add(1, Ordering::SeqCst);
    }

    fn connect(&self, nested: bool) -> Result<(), SessionError> {
        self.connected.store(true, Ordering::SeqCst);
        self.nested_connect.store(nested, Ordering::SeqCst);
        Ok(())
    }

    fn disconnect(&self) -> Result<(), SessionError> {
        self.database.disconnect()?;
        self.cursors().open.clear();
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn ensure(&self) -> Result<(), SessionError> {
        if self.is_connected() {
            Ok(())
        } else {
            Err(SessionError::Closed)
        }
    }

    fn release(&self) {}

    fn release_failed(&self, error: &SessionError) -> bool {
        let fatal = matches!(error, SessionError::ConnectionLost { .. });
        if fatal {
            self.connected.store(false, Ordering::SeqCst);
        }
        fatal
    }

    fn commit(&self) -> Result<(), SessionError> {
        self.database.commit();
        Ok(())
    }

    fn rollback(&self) -> Result<(), SessionError> {
        self.database.rollback();
        Ok(())
    }

    fn set_savepoint(&self) -> Result<Savepoint, SessionError> {
        let number = self.database.open_savepoint()?;
        Ok(Savepoint::new(format!("sp_{number}")))
    }

    fn release_savepoint(&self, _savepoint: &Savepoint, rollback: bool) -> Result<bool, SessionError> {
        Ok(self.database.close_savepoint(rollback))
    }

    fn execute(&self, sql: &str) -> Result<bool, SessionError> {
        self.database.record(&Statement::new(sql, Vec::new()))?;
        Ok(false)
    }

    fn execute_update(&self, statement: &Statement) -> Result<u64, SessionError> {
        self.database.record(statement)?;
        Ok(self.database.update_count(&statement.sql))
    }

    fn execute_query(&self, statement: &Statement, options: CursorOptions) -> Result<Cursor, SessionError> {
        self.database.record(statement)?;
        let table = self.database.query(&statement.sql)?;
        let mut cursors = self.cursors();
        cursors.next_id += 1;
        let cursor = Cursor::new(cursors.next_id, options);
        cursors.open.insert(
            cursor.id,
            OpenCursor {
                cursor: cursor.clone(),
                table,
            },
        );
        Ok(cursor)
    }

    fn execute_call(
        &self,
        statement: &Statement,
        _date_conversion: Option<&str>,
    ) -> Result<Vec<(String, Value)>, SessionError> {
        self.database.record(statement)?;
        Ok(self.database.call_outputs(&statement.sql))
    }

    fn column_names(&self, cursor: &Cursor) -> Result<Vec<String>, SessionError> {
        self.cursors()
            .open
            .get(&cursor.id)
            .map(|open| open.table.columns.clone())
            .ok_or_else(|| SessionError::database("cursor is closed"))
    }

    fn fetch(&self, cursor: &mut Cursor, skip: usize) -> Result<Vec<Vec<Value>>, SessionError> {
        let mut cursors = self.cursors();
        let open = cursors
            .open
            .get_mut(&cursor.id)
            .ok_or_else(|| SessionError::database("cursor is closed"))?;

        let total = open.table.rows.len();
        let start = (open.cursor.offset + skip).min(total);
        let end = match open.cursor.options.rows {
            0 => total,
            rows => (start + rows).min(total),
        };
        let page = open.table.rows[start..end].to_vec();
        open.cursor.offset = end;
        open.cursor.closed = end >= total;
        *cursor = open.cursor.clone();
        Ok(page)
    }

    fn cursor(&self, name: &str) -> Option<Cursor> {
        self.cursors()
            .open
            .values()
            .find(|open| open.cursor.name() == Some(name))
            .map(|open| open.cursor.clone())
    }

    fn close_cursor(&self, cursor: &Cursor) -> Result<(), SessionError> {
        self.cursors().open.remove(&cursor.id);
        Ok(())
    }
}

/// Factory recording every connect request.
///
/// Sessions authenticated with database credentials are dedicated; pooled
/// sessions are not.
#[derive(Debug, Clone, Default)]
pub struct FakeSessionFactory {
    database: FakeDatabase,
    requests: Arc<Mutex<Vec<ConnectRequest>>>,
    sessions: Arc<Mutex<Vec<Arc<FakeSession>>>>,
    opened: Arc<AtomicU64>,
}

impl FakeSessionFactory {
    pub fn new(database: FakeDatabase) -> Self {
        Self {
            database,
            ..Self::default()
        }
    }

    pub fn requests(&self) -> Vec<ConnectRequest> {
        self.requests
            .lock()
            .expect("factory request log poisoned")
            .clone()
    }

    /// Most recently opened session.
    pub fn last_session(&self) -> Option<Arc<FakeSession>> {
        self.sessions
            .lock()
            .expect("factory session log poisoned")
            .last()
            .cloned()
    }
}

impl SessionFactory for FakeSessionFactory {
    fn open(&self, request: &ConnectRequest) -> Result<Arc<dyn Session>, SessionError> {
        self.requests
            .lock()
            .expect("factory request log poisoned")
            .push(request.clone());
        let number = self.opened.fetch_add(1, Ordering::SeqCst) + 1;
        let session = Arc::new(FakeSession::with_method(
            &format!("session-{number}"),
            request.pool.is_none(),
            request.method,
            self.database.clone(),
        ));
        self.sessions
            .lock()
            .expect("factory session log poisoned")
            .push(Arc::clone(&session));
        let session: Arc<dyn Session> = session;
        Ok(session)
    }
}
