//! Connected sessions keyed by GUID.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use super::Session;

/// Concurrent map from session GUID to session.
#[derive(Default)]
pub struct SessionRegistry {
    sessions: RwLock<HashMap<String, Arc<dyn Session>>>,
}

impl SessionRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a session under its GUID, replacing any previous entry.
    pub fn register(&self, session: Arc<dyn Session>) {
        if let Ok(mut sessions) = self.sessions.write() {
            sessions.insert(session.guid().to_owned(), session);
        }
    }

    /// Looks up a session.
    #[must_use]
    pub fn get(&self, guid: &str) -> Option<Arc<dyn Session>> {
        self.sessions
            .read()
            .ok()
            .and_then(|sessions| sessions.get(guid).cloned())
    }

    /// Removes a session, returning it if it was registered.
    pub fn remove(&self, guid: &str) -> Option<Arc<dyn Session>> {
        self.sessions
            .write()
            .ok()
            .and_then(|mut sessions| sessions.remove(guid))
    }

    /// Number of registered sessions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.sessions.read().map_or(0, |sessions| sessions.len())
    }

    /// Whether no sessions are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
