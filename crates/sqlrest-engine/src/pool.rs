//! Bounded blocking connection pool for session adapters.
//!
//! Adapters that serve token or OAuth sessions draw physical connections
//! from a [`Pool`] built from the configured [`PoolSettings`]. A checkout
//! blocks while `max` connections are in use until another thread checks
//! one back in; there is no timeout at this layer.

use std::sync::{Condvar, Mutex, MutexGuard};

use sqlrest_config::{PoolSettings, PoolSettingsError};
use thiserror::Error;
use tracing::{debug, warn};

const POOL_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::pool");

/// Opens, checks and closes physical connections for a [`Pool`].
pub trait Connector: Send + Sync {
    /// Connection type handed out by the pool.
    type Connection: Send;

    /// Opens a new connection.
    ///
    /// # Errors
    ///
    /// Returns [`PoolError::Connect`] when the database refuses.
    fn connect(&self, settings: &PoolSettings) -> Result<Self::Connection, PoolError>;

    /// Whether an idle connection is still usable.
    fn is_valid(&self, connection: &Self::Connection) -> bool;

    /// Closes a connection.
    fn disconnect(&self, connection: Self::Connection);
}

/// Errors raised by [`Pool`].
#[derive(Debug, Error)]
pub enum PoolError {
    /// The pool settings are inconsistent.
    #[error(transparent)]
    Settings(#[from] PoolSettingsError),
    /// The caller presented the wrong connect token.
    #[error("invalid connect token")]
    InvalidToken,
    /// The pool has been closed.
    #[error("connection pool '{name}' is closed")]
    Closed {
        /// Pool name.
        name: String,
    },
    /// Opening a connection failed.
    #[error("failed to connect to '{name}': {message}")]
    Connect {
        /// Pool name.
        name: String,
        /// Driver message.
        message: String,
    },
    /// The pool's internal mutex is poisoned.
    #[error("connection pool poisoned")]
    Poisoned,
}

struct PoolState<T> {
    idle: Vec<T>,
    size: usize,
    closed: bool,
}

/// Bounded pool of physical connections.
pub struct Pool<C: Connector> {
    settings: PoolSettings,
    connector: C,
    state: Mutex<PoolState<C::Connection>>,
    available: Condvar,
}

impl<C: Connector> Pool<C> {
    /// Creates a pool and opens `min` connections up front.
    ///
    /// # Errors
    ///
    /// Returns [`PoolError`] when the settings are invalid or an initial
    /// connection fails.
    pub fn new(settings: PoolSettings, connector: C) -> Result<Self, PoolError> {
        settings.validate()?;
        let mut idle = Vec::with_capacity(settings.max);
        for _ in 0..settings.min {
            idle.push(connector.connect(&settings)?);
        }
        debug!(target: POOL_TARGET, pool = %settings, opened = idle.len(), "pool created");
        let size = idle.len();
        Ok(Self {
            settings,
            connector,
            state: Mutex::new(PoolState {
                idle,
                size,
                closed: false,
            }),
            available: Condvar::new(),
        })
    }

    /// Settings the pool was built from.
    #[must_use]
    pub const fn settings(&self) -> &PoolSettings {
        &self.settings
    }

    /// Takes a connection, blocking while the pool is exhausted.
    ///
    /// When the pool is configured with a token, `token` must match it.
    ///
    /// # Errors
    ///
    /// Returns [`PoolError`] on a token mismatch, after [`Pool::close`], or
    /// when a new connection cannot be opened.
    pub fn checkout(&self, token: Option<&str>) -> Result<C::Connection, PoolError> {
        if let Some(expected) = self.settings.token.as_deref()
            && token != Some(expected)
        {
            return Err(PoolError::InvalidToken);
        }

        let mut state = self.state()?;
        loop {
            if state.closed {
                return Err(self.closed());
            }
            if let Some(connection) = state.idle.pop() {
                return Ok(connection);
            }
            if state.size < self.settings.max {
                state.size = state.size.saturating_add(1);
                drop(state);
                return self.open();
            }
            debug!(target: POOL_TARGET, pool = %self.settings.name, "waiting for a connection");
            state = self
                .available
                .wait(state)
                .map_err(|_| PoolError::Poisoned)?;
        }
    }

    /// Returns a connection to the pool and wakes one waiter.
    pub fn checkin(&self, connection: C::Connection) {
        match self.state.lock() {
            Ok(mut state) if !state.closed => {
                state.idle.push(connection);
                drop(state);
                self.available.notify_one();
            }
            Ok(mut state) => {
                state.size = state.size.saturating_sub(1);
                drop(state);
                self.connector.disconnect(connection);
            }
            Err(_) => self.connector.disconnect(connection),
        }
    }

    /// Drops a broken connection, freeing its slot.
    pub fn discard(&self, connection: C::Connection) {
        self.connector.disconnect(connection);
        if let Ok(mut state) = self.state.lock() {
            state.size = state.size.saturating_sub(1);
        }
        self.available.notify_one();
    }

    /// Closes idle connections that fail validation.
    ///
    /// # Errors
    ///
    /// Returns [`PoolError::Poisoned`] if the internal mutex is poisoned.
    pub fn validate(&self) -> Result<usize, PoolError> {
        let mut state = self.state()?;
        let idle = std::mem::take(&mut state.idle);
        let (valid, invalid): (Vec<_>, Vec<_>) = idle
            .into_iter()
            .partition(|connection| self.connector.is_valid(connection));
        state.idle = valid;
        state.size = state.size.saturating_sub(invalid.len());
        drop(state);

        let dropped = invalid.len();
        for connection in invalid {
            self.connector.disconnect(connection);
        }
        if dropped > 0 {
            warn!(target: POOL_TARGET, pool = %self.settings.name, dropped, "dropped invalid connections");
            self.available.notify_all();
        }
        Ok(dropped)
    }

    /// Closes idle connections and rejects further checkouts. Connections
    /// still checked out are closed when they come back.
    pub fn close(&self) {
        let idle = match self.state.lock() {
            Ok(mut state) => {
                state.closed = true;
                let idle = std::mem::take(&mut state.idle);
                state.size = state.size.saturating_sub(idle.len());
                idle
            }
            Err(_) => Vec::new(),
        };
        for connection in idle {
            self.connector.disconnect(connection);
        }
        self.available.notify_all();
    }

    /// Connections currently open, idle or checked out.
    #[must_use]
    pub fn size(&self) -> usize {
        self.state.lock().map_or(0, |state| state.size)
    }

    /// Idle connections.
    #[must_use]
    pub fn idle(&self) -> usize {
        self.state.lock().map_or(0, |state| state.idle.len())
    }

    fn open(&self) -> Result<C::Connection, PoolError> {
        match self.connector.connect(&self.settings) {
            Ok(connection) => Ok(connection),
            Err(error) => {
                if let Ok(mut state) = self.state.lock() {
                    state.size = state.size.saturating_sub(1);
                }
                self.available.notify_one();
                Err(error)
            }
        }
    }

    fn closed(&self) -> PoolError {
        PoolError::Closed {
            name: self.settings.name.clone(),
        }
    }

    fn state(&self) -> Result<MutexGuard<'_, PoolState<C::Connection>>, PoolError> {
        self.state.lock().map_err(|_| PoolError::Poisoned)
    }
}
