//! Database sessions as seen by the engine.
//!
//! The engine never talks to a driver directly. Vendor adapters implement
//! [`Session`] and [`SessionFactory`]; the engine drives them through the
//! nesting, savepoint and locking protocol in [`state`], and keeps connected
//! sessions in a [`SessionRegistry`] keyed by GUID.

pub mod lock;
mod registry;
pub mod state;

use std::fmt;
use std::sync::Arc;

use sqlrest_config::PoolSettings;
use thiserror::Error;

use crate::binding::BindValueDef;
use crate::value::Value;

pub use lock::{LockError, SessionLock};
pub use registry::SessionRegistry;
pub use state::SessionState;

/// How a client authenticated on `connect`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthMethod {
    /// Secret exchanged for a user name by an OAuth provider.
    OAuth,
    /// Database user name and password.
    Database,
    /// Pool connect token.
    PoolToken,
}

impl AuthMethod {
    /// Parses a method name (case-insensitive).
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "oauth" => Some(Self::OAuth),
            "database" => Some(Self::Database),
            "token" => Some(Self::PoolToken),
            _ => None,
        }
    }

    /// Returns the canonical string representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::OAuth => "oauth",
            Self::Database => "database",
            Self::PoolToken => "token",
        }
    }
}

impl fmt::Display for AuthMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors reported by session adapters.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SessionError {
    /// The database rejected a statement or transaction operation.
    #[error("{message}")]
    Database {
        /// Driver message.
        message: String,
        /// Vendor error code, when known.
        code: Option<i32>,
    },
    /// The physical connection was lost.
    #[error("connection lost: {message}")]
    ConnectionLost {
        /// Driver message.
        message: String,
    },
    /// The session was already disconnected.
    #[error("session is closed")]
    Closed,
}

impl SessionError {
    /// Creates a database error without a vendor code.
    pub fn database(message: impl Into<String>) -> Self {
        Self::Database {
            message: message.into(),
            code: None,
        }
    }

    /// Creates a connection-lost error.
    pub fn connection_lost(message: impl Into<String>) -> Self {
        Self::ConnectionLost {
            message: message.into(),
        }
    }
}

/// Opaque savepoint handle issued by a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Savepoint {
    name: String,
}

impl Savepoint {
    /// Wraps an adapter-specific savepoint name.
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    /// Adapter-specific name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }
}

/// SQL text with its bind values in placeholder order.
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    /// Driver-ready SQL.
    pub sql: String,
    /// Bind values in the order the placeholders appear.
    pub binds: Vec<BindValueDef>,
}

impl Statement {
    /// Creates a statement.
    pub fn new(sql: impl Into<String>, binds: Vec<BindValueDef>) -> Self {
        Self {
            sql: sql.into(),
            binds,
        }
    }
}

/// Page settings requested for a cursor.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CursorOptions {
    /// Cursor name; `None` for an anonymous, single-fetch cursor.
    pub name: Option<String>,
    /// Rows per fetch; `0` fetches everything.
    pub rows: usize,
    /// Render pages as column list plus matrix.
    pub compact: bool,
    /// Date format forwarded to the adapter.
    pub date_format: Option<String>,
}

/// An open server-side result set.
///
/// Adapters keep named cursors between calls; [`Session::fetch`] advances
/// `offset` and sets `closed` once the result is exhausted, and the adapter
/// retains that state for the next [`Session::cursor`] lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cursor {
    /// Adapter-assigned handle.
    pub id: u64,
    /// Page settings fixed at `select`.
    pub options: CursorOptions,
    /// Rows consumed so far.
    pub offset: usize,
    /// Whether the result set is exhausted or closed.
    pub closed: bool,
}

impl Cursor {
    /// Creates an open cursor at offset zero.
    #[must_use]
    pub const fn new(id: u64, options: CursorOptions) -> Self {
        Self {
            id,
            options,
            offset: 0,
            closed: false,
        }
    }

    /// Cursor name, if it outlives the request.
    #[must_use]
    pub fn name(&self) -> Option<&str> {
        self.options.name.as_deref()
    }
}

/// Everything a [`SessionFactory`] needs to open a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectRequest {
    /// Authentication method.
    pub method: AuthMethod,
    /// Pool to draw connections from; `None` for database credentials.
    pub pool: Option<PoolSettings>,
    /// Client-supplied scope.
    pub scope: Option<String>,
    /// End user, if known.
    pub username: Option<String>,
    /// Password or token.
    pub secret: Option<String>,
}

/// Opens sessions for `connect`.
pub trait SessionFactory: Send + Sync {
    /// Creates a session; the engine then calls [`Session::connect`].
    ///
    /// # Errors
    ///
    /// Returns [`SessionError`] when the session cannot be created.
    fn open(&self, request: &ConnectRequest) -> Result<Arc<dyn Session>, SessionError>;
}

/// One logical database session.
///
/// Implementations must be safe to share between worker threads; the engine
/// serialises mutation through [`Session::lock`].
pub trait Session: Send + Sync {
    /// Stable identifier used in tokens and the registry.
    fn guid(&self) -> &str;

    /// Whether the session owns one physical connection for its lifetime.
    /// Only dedicated sessions support named cursors.
    fn dedicated(&self) -> bool;

    /// Method the session authenticated with.
    fn auth_method(&self) -> AuthMethod;

    /// Lock serialising statement execution against this session.
    fn lock(&self) -> &SessionLock;

    /// Refreshes the liveness timestamp.
    fn touch(&self);

    /// Establishes the session. `nested` is true inside a batch or script,
    /// where a connection should be bound eagerly.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError`] when the database refuses the connection.
    fn connect(&self, nested: bool) -> Result<(), SessionError>;

    /// Closes the session and every cursor on it.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError`] when the close fails.
    fn disconnect(&self) -> Result<(), SessionError>;

    /// Binds a physical connection before statement work.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError`] when no connection can be obtained.
    fn ensure(&self) -> Result<(), SessionError>;

    /// Ends a successful unit of work, returning pooled connections.
    fn release(&self);

    /// Ends a failed unit of work and reports whether the error left the
    /// session unusable.
    fn release_failed(&self, error: &SessionError) -> bool;

    /// Commits the current transaction.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError`] on failure.
    fn commit(&self) -> Result<(), SessionError>;

    /// Rolls back the current transaction.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError`] on failure.
    fn rollback(&self) -> Result<(), SessionError>;

    /// Opens a savepoint.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError`] on failure.
    fn set_savepoint(&self) -> Result<Savepoint, SessionError>;

    /// Releases a savepoint, rolling back to it first when `rollback` is set.
    /// Returns `false` when the database declined.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError`] on failure.
    fn release_savepoint(&self, savepoint: &Savepoint, rollback: bool) -> Result<bool, SessionError>;

    /// Executes a statement that returns no rows.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError`] on failure.
    fn execute(&self, sql: &str) -> Result<bool, SessionError>;

    /// Executes a DML statement and returns the affected row count.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError`] on failure.
    fn execute_update(&self, statement: &Statement) -> Result<u64, SessionError>;

    /// Opens a cursor over a query.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError`] on failure.
    fn execute_query(&self, statement: &Statement, options: CursorOptions) -> Result<Cursor, SessionError>;

    /// Calls a stored procedure and returns its named outputs.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError`] on failure.
    fn execute_call(
        &self,
        statement: &Statement,
        date_conversion: Option<&str>,
    ) -> Result<Vec<(String, Value)>, SessionError>;

    /// Column names of a cursor's result set.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError`] on failure.
    fn column_names(&self, cursor: &Cursor) -> Result<Vec<String>, SessionError>;

    /// Fetches the next page after skipping `skip` rows.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError`] on failure.
    fn fetch(&self, cursor: &mut Cursor, skip: usize) -> Result<Vec<Vec<Value>>, SessionError>;

    /// Looks up a named cursor.
    fn cursor(&self, name: &str) -> Option<Cursor>;

    /// Closes a cursor; closing an unknown cursor is not an error.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError`] on failure.
    fn close_cursor(&self, cursor: &Cursor) -> Result<(), SessionError>;
}
