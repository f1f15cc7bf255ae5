//! Shared/exclusive lock guarding one database session.
//!
//! Engine calls acquire and release the lock at different points of a
//! request (a savepoint scope opens in one sub-request and closes after the
//! last), so the lock hands out no guards. Callers pair [`SessionLock::lock`]
//! with [`SessionLock::release`] themselves, or drop everything they hold with
//! [`SessionLock::release_all`].
//!
//! The exclusive holder may also take shared locks: statements executed
//! inside a savepoint scope run on the thread that opened it.

use std::sync::{Condvar, Mutex, MutexGuard};
use std::thread::{self, ThreadId};

use thiserror::Error;

/// Errors reported by [`SessionLock`].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum LockError {
    /// A thread panicked while holding the lock's internal mutex.
    #[error("session lock poisoned")]
    Poisoned,
    /// The caller released a lock it does not hold.
    #[error("cannot release {kind} lock not obtained")]
    NotHeld {
        /// `"shared"` or `"exclusive"`.
        kind: &'static str,
    },
}

#[derive(Debug, Default)]
struct LockState {
    shared: usize,
    exclusive: Option<ThreadId>,
}

impl LockState {
    fn admits_shared(&self, thread: ThreadId) -> bool {
        self.exclusive.is_none_or(|owner| owner == thread)
    }

    const fn admits_exclusive(&self) -> bool {
        self.shared == 0 && self.exclusive.is_none()
    }
}

/// Counting reader/writer lock without guards.
#[derive(Debug, Default)]
pub struct SessionLock {
    state: Mutex<LockState>,
    released: Condvar,
}

impl SessionLock {
    /// Creates an unlocked lock.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Blocks until the requested lock is held by the calling thread.
    ///
    /// # Errors
    ///
    /// Returns [`LockError::Poisoned`] if the internal mutex is poisoned.
    pub fn lock(&self, exclusive: bool) -> Result<(), LockError> {
        let thread = thread::current().id();
        let mut state = self.state()?;
        if exclusive {
            while !state.admits_exclusive() {
                state = self.released.wait(state).map_err(|_| LockError::Poisoned)?;
            }
            state.exclusive = Some(thread);
        } else {
            while !state.admits_shared(thread) {
                state = self.released.wait(state).map_err(|_| LockError::Poisoned)?;
            }
            state.shared = state.shared.saturating_add(1);
        }
        Ok(())
    }

    /// Releases one shared lock, or the exclusive lock.
    ///
    /// # Errors
    ///
    /// Returns [`LockError::NotHeld`] when no such lock is held.
    pub fn release(&self, exclusive: bool) -> Result<(), LockError> {
        let mut state = self.state()?;
        if exclusive {
            if state.exclusive != Some(thread::current().id()) {
                return Err(LockError::NotHeld { kind: "exclusive" });
            }
            state.exclusive = None;
        } else {
            state.shared = state
                .shared
                .checked_sub(1)
                .ok_or(LockError::NotHeld { kind: "shared" })?;
        }
        drop(state);
        self.released.notify_all();
        Ok(())
    }

    /// Drops `shared` shared locks and, when asked, the exclusive lock.
    ///
    /// Over-counting is clamped; this is the error-path cleanup and must not
    /// fail because an earlier step already released something.
    ///
    /// # Errors
    ///
    /// Returns [`LockError::Poisoned`] if the internal mutex is poisoned.
    pub fn release_all(&self, exclusive: bool, shared: usize) -> Result<(), LockError> {
        let mut state = self.state()?;
        state.shared = state.shared.saturating_sub(shared);
        if exclusive {
            state.exclusive = None;
        }
        drop(state);
        self.released.notify_all();
        Ok(())
    }

    /// Number of shared locks currently held.
    #[must_use]
    pub fn shared_count(&self) -> usize {
        self.state.lock().map_or(0, |state| state.shared)
    }

    /// Whether any thread holds the exclusive lock.
    #[must_use]
    pub fn is_exclusive(&self) -> bool {
        self.state
            .lock()
            .map_or(false, |state| state.exclusive.is_some())
    }

    fn state(&self) -> Result<MutexGuard<'_, LockState>, LockError> {
        self.state.lock().map_err(|_| LockError::Poisoned)
    }
}
