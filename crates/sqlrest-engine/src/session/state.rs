//! Nesting, savepoint and lock bookkeeping for one top-level request.
//!
//! Batches and scripts re-enter the command executor once per sub-request,
//! so every handler brackets its work with [`SessionState::prepare`] and
//! [`SessionState::release`]. Only the outermost bracket (depth 0 to 1 and
//! back) opens and releases a savepoint under the session's exclusive lock;
//! inner brackets just count. Each statement additionally runs under a shared
//! lock taken with [`SessionState::lock`].
//!
//! When anything inside a bracket fails, [`SessionState::release_on_error`]
//! closes that bracket instead: it rolls back to the savepoint, drops every
//! lock this request holds and asks the session whether it survived.

use std::sync::Arc;

use serde_json::Value as Json;
use tracing::{debug, warn};

use super::{Savepoint, Session};
use crate::dispatch::EngineError;

/// Tracing target for session state transitions.
pub(crate) const SESSION_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::session");

/// Per-request session scope tracker.
#[derive(Default)]
pub struct SessionState {
    session: Option<Arc<dyn Session>>,
    depth: usize,
    shared: usize,
    exclusive: bool,
    savepoint: Option<Savepoint>,
}

impl SessionState {
    /// Creates a tracker bound to `session`, if any.
    #[must_use]
    pub fn new(session: Option<Arc<dyn Session>>) -> Self {
        Self {
            session,
            ..Self::default()
        }
    }

    /// Bound session, or [`EngineError::NotConnected`].
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::NotConnected`] when no session is bound.
    pub fn session(&self) -> Result<Arc<dyn Session>, EngineError> {
        self.session.clone().ok_or(EngineError::NotConnected)
    }

    /// Whether a session is bound.
    #[must_use]
    pub const fn is_connected(&self) -> bool {
        self.session.is_some()
    }

    /// Binds a different session, e.g. after `connect` inside a batch.
    pub fn bind(&mut self, session: Option<Arc<dyn Session>>) {
        self.session = session;
    }

    /// Current nesting depth.
    #[must_use]
    pub const fn depth(&self) -> usize {
        self.depth
    }

    /// Whether the caller runs inside a batch or script.
    #[must_use]
    pub const fn is_nested(&self) -> bool {
        self.depth > 0
    }

    /// Shared locks held by this request.
    #[must_use]
    pub const fn shared_locks(&self) -> usize {
        self.shared
    }

    /// Whether this request holds the exclusive lock.
    #[must_use]
    pub const fn holds_exclusive(&self) -> bool {
        self.exclusive
    }

    /// Whether a savepoint is open.
    #[must_use]
    pub const fn has_savepoint(&self) -> bool {
        self.savepoint.is_some()
    }

    /// Asks the session to bind a physical connection.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::NotConnected`] without a session, or the
    /// session's error.
    pub fn ensure(&self) -> Result<(), EngineError> {
        self.session()?.ensure().map_err(EngineError::from)
    }

    /// Opens a bracket.
    ///
    /// At depth 0 the effective savepoint policy is the payload's
    /// `savepoint` flag, else `savepoint_default`; when enabled the exclusive
    /// lock is taken and a savepoint opened for the whole bracket.
    ///
    /// # Errors
    ///
    /// Returns an error when the lock or savepoint cannot be obtained; the
    /// depth is then unchanged and nothing stays locked.
    pub fn prepare(&mut self, payload: Option<&Json>, savepoint_default: bool) -> Result<(), EngineError> {
        if self.depth == 0 && let Some(session) = self.session.clone() {
            let wanted = payload
                .and_then(|payload| payload.get("savepoint"))
                .and_then(Json::as_bool)
                .unwrap_or(savepoint_default);
            if wanted {
                self.open_savepoint(session.as_ref())?;
            }
        }
        self.depth = self.depth.saturating_add(1);
        debug!(target: SESSION_TARGET, depth = self.depth, "scope prepared");
        Ok(())
    }

    /// Closes a bracket.
    ///
    /// Only the outermost close releases the savepoint and the exclusive
    /// lock, then ends the session's unit of work.
    ///
    /// # Errors
    ///
    /// Returns an error when the savepoint cannot be released or the
    /// exclusive lock cannot be dropped; the savepoint is then rolled back and
    /// the scope cleaned up as by [`SessionState::release_on_error`].
    pub fn release(&mut self) -> Result<(), EngineError> {
        self.depth = self.depth.saturating_sub(1);
        debug!(target: SESSION_TARGET, depth = self.depth, "scope released");
        if self.depth > 0 {
            return Ok(());
        }
        let Some(session) = self.session.clone() else {
            return Ok(());
        };

        if let Some(savepoint) = self.savepoint.clone() {
            let released = match session.release_savepoint(&savepoint, false) {
                Ok(true) => Ok(()),
                Ok(false) => Err(EngineError::internal("could not release savepoint")),
                Err(source) => Err(EngineError::from(source)),
            };
            if let Err(error) = released {
                return Err(self.abandon(session.as_ref(), error));
            }
            // Kept until here so a failed release still rolls back.
            self.savepoint = None;
            if let Err(error) = self.unlock_exclusive(session.as_ref()) {
                return Err(self.abandon(session.as_ref(), error));
            }
        }

        session.release();
        Ok(())
    }

    /// Closes a bracket after `error`, returning the error with the
    /// session's fatality verdict applied.
    ///
    /// Rolls back to the open savepoint (best effort), drops every lock this
    /// request holds regardless of depth, and ends the unit of work.
    #[must_use]
    pub fn release_on_error(&mut self, error: EngineError) -> EngineError {
        self.depth = self.depth.saturating_sub(1);
        self.fail(error)
    }

    /// Cleans up after `error` raised outside any bracket (commit, rollback,
    /// or statement setup before [`SessionState::prepare`]). The depth is
    /// left unchanged.
    #[must_use]
    pub fn fail(&mut self, error: EngineError) -> EngineError {
        match self.session.clone() {
            Some(session) => self.abandon(session.as_ref(), error),
            None => error,
        }
    }

    /// Takes a shared lock around one statement.
    ///
    /// # Errors
    ///
    /// Returns an error without a session or when the lock is poisoned.
    pub fn lock(&mut self) -> Result<(), EngineError> {
        self.session()?.lock().lock(false)?;
        self.shared = self.shared.saturating_add(1);
        Ok(())
    }

    /// Releases a shared lock taken with [`SessionState::lock`].
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Internal`] when no shared lock is held.
    pub fn unlock(&mut self) -> Result<(), EngineError> {
        let Some(remaining) = self.shared.checked_sub(1) else {
            return Err(EngineError::internal(
                "cannot release shared lock not obtained",
            ));
        };
        self.session()?.lock().release(false)?;
        self.shared = remaining;
        Ok(())
    }

    /// Unbinds the session after it was closed or lost, dropping every lock
    /// and forgetting the savepoint. The depth is left unchanged so open
    /// brackets still balance.
    pub fn detach(&mut self) -> Option<Arc<dyn Session>> {
        self.release_all();
        self.savepoint = None;
        self.session.take()
    }

    /// Drops every lock this request holds.
    pub fn release_all(&mut self) {
        let Some(session) = self.session.clone() else {
            self.shared = 0;
            self.exclusive = false;
            return;
        };
        if let Err(error) = session.lock().release_all(self.exclusive, self.shared) {
            warn!(target: SESSION_TARGET, %error, "failed to release session locks");
        }
        self.shared = 0;
        self.exclusive = false;
    }

    fn open_savepoint(&mut self, session: &dyn Session) -> Result<(), EngineError> {
        session.lock().lock(true)?;
        self.exclusive = true;
        match session.set_savepoint() {
            Ok(savepoint) => {
                debug!(target: SESSION_TARGET, savepoint = savepoint.name(), "savepoint opened");
                self.savepoint = Some(savepoint);
                Ok(())
            }
            Err(source) => {
                self.unlock_exclusive(session)?;
                Err(EngineError::from(source))
            }
        }
    }

    fn unlock_exclusive(&mut self, session: &dyn Session) -> Result<(), EngineError> {
        session.lock().release(true)?;
        self.exclusive = false;
        Ok(())
    }

    fn abandon(&mut self, session: &dyn Session, error: EngineError) -> EngineError {
        if let Some(savepoint) = self.savepoint.take() {
            match session.release_savepoint(&savepoint, true) {
                Ok(true) => debug!(target: SESSION_TARGET, "rolled back to savepoint"),
                Ok(false) => warn!(target: SESSION_TARGET, "savepoint rollback declined"),
                Err(rollback) => warn!(
                    target: SESSION_TARGET,
                    error = %rollback,
                    "savepoint rollback failed"
                ),
            }
        }
        self.release_all();

        let fatal = match &error {
            EngineError::Statement { source, .. } => session.release_failed(source),
            _ => {
                session.release();
                false
            }
        };
        if fatal {
            warn!(target: SESSION_TARGET, guid = session.guid(), %error, "session lost");
        }
        error.with_fatal(fatal)
    }
}

#[cfg(test)]
mod tests {
    use rstest::{fixture, rstest};
    use serde_json::json;

    use super::*;
    use crate::session::SessionError;
    use crate::tests::support::{FakeDatabase, FakeSession};

    struct Harness {
        database: FakeDatabase,
        session: Arc<FakeSession>,
    }

    impl Harness {
        fn state(&self) -> SessionState {
            let session: Arc<dyn Session> = self.session.clone();
            SessionState::new(Some(session))
        }
    }

    #[fixture]
    fn harness() -> Harness {
        let database = FakeDatabase::default();
        let session = Arc::new(FakeSession::new("guid-1", true, database.clone()));
        Harness { database, session }
    }

    #[rstest]
    fn outermost_bracket_owns_the_savepoint(harness: Harness) {
        let mut state = harness.state();
        state.prepare(None, true).expect("outer prepare");
        assert!(state.has_savepoint());
        assert!(state.holds_exclusive());

        state.prepare(None, true).expect("inner prepare");
        state.release().expect("inner release");
        assert!(state.has_savepoint(), "inner release kept the savepoint");
        assert_eq!(harness.database.savepoints_opened(), 1);

        state.release().expect("outer release");
        assert!(!state.has_savepoint());
        assert!(!state.holds_exclusive());
        assert_eq!(harness.database.savepoints_released(), 1);
        assert!(!harness.session.lock().is_exclusive());
    }

    #[rstest]
    #[case::payload_enables(json!({"savepoint": true}), false, true)]
    #[case::payload_disables(json!({"savepoint": false}), true, false)]
    #[case::default_applies(json!({}), true, true)]
    #[case::non_boolean_ignored(json!({"savepoint": "yes"}), false, false)]
    fn payload_overrides_savepoint_default(
        harness: Harness,
        #[case] payload: Json,
        #[case] default: bool,
        #[case] expected: bool,
    ) {
        let mut state = harness.state();
        state.prepare(Some(&payload), default).expect("prepare");
        assert_eq!(state.has_savepoint(), expected);
        state.release().expect("release");
    }

    #[rstest]
    fn brackets_returning_to_depth_zero_hold_no_locks(harness: Harness) {
        let mut state = harness.state();
        let plan = [
            (true, true),
            (true, false),
            (false, false),
            (true, true),
            (false, false),
            (false, false),
        ];
        for (open, with_statement) in plan {
            if open {
                state.prepare(None, true).expect("prepare");
                if with_statement {
                    state.lock().expect("lock");
                    state.unlock().expect("unlock");
                }
            } else {
                state.release().expect("release");
            }
        }
        assert_eq!(state.depth(), 0);
        assert_eq!(state.shared_locks(), 0);
        assert!(!state.holds_exclusive());
        assert_eq!(harness.session.lock().shared_count(), 0);
        assert!(!harness.session.lock().is_exclusive());
    }

    #[rstest]
    fn unlock_without_lock_is_internal_error(harness: Harness) {
        let mut state = harness.state();
        let error = state.unlock().expect_err("unbalanced unlock");
        assert!(matches!(error, EngineError::Internal { .. }));
    }

    #[rstest]
    fn errors_roll_back_and_release_everything(harness: Harness) {
        let mut state = harness.state();
        state.prepare(None, true).expect("outer prepare");
        state.prepare(None, true).expect("inner prepare");
        state.lock().expect("statement lock");

        let error = state.release_on_error(EngineError::from(SessionError::database("boom")));
        assert!(!error.is_fatal());
        assert_eq!(state.shared_locks(), 0);
        assert!(!state.holds_exclusive());
        assert!(!state.has_savepoint());
        assert_eq!(harness.database.savepoints_rolled_back(), 1);

        state.release().expect("outer release after failure");
        assert_eq!(state.depth(), 0);
        assert_eq!(harness.session.lock().shared_count(), 0);
        assert!(!harness.session.lock().is_exclusive());
    }

    #[rstest]
    fn declined_release_rolls_the_savepoint_back(harness: Harness) {
        harness.database.decline_releases();
        let mut state = harness.state();
        state.prepare(None, true).expect("prepare");

        let error = state.release().expect_err("release declined");
        assert!(matches!(error, EngineError::Internal { .. }));
        assert_eq!(state.depth(), 0);
        assert!(!state.has_savepoint());
        assert!(!state.holds_exclusive());
        assert_eq!(harness.database.savepoints_released(), 0);
        assert_eq!(harness.database.savepoints_rolled_back(), 1);
        assert!(!harness.session.lock().is_exclusive());
    }

    #[rstest]
    fn session_decides_fatality(harness: Harness) {
        let mut state = harness.state();
        state.prepare(None, false).expect("prepare");
        let error =
            state.release_on_error(EngineError::from(SessionError::connection_lost("reset")));
        assert!(error.is_fatal());
    }

    #[rstest]
    fn savepoint_failure_leaves_nothing_locked(harness: Harness) {
        harness.database.fail_savepoints();
        let mut state = harness.state();
        let error = state.prepare(None, true).expect_err("savepoint fails");
        assert!(matches!(error, EngineError::Statement { .. }));
        assert_eq!(state.depth(), 0);
        assert!(!state.holds_exclusive());
        assert!(!harness.session.lock().is_exclusive());
    }

    #[test]
    fn detached_state_reports_not_connected() {
        let mut state = SessionState::default();
        assert!(matches!(state.ensure(), Err(EngineError::NotConnected)));
        state.prepare(None, true).expect("prepare without session");
        assert!(!state.has_savepoint());
        state.release().expect("release without session");
    }
}
