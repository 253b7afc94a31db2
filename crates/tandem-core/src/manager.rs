//! Session Manager - handles session lifecycle and garbage collection

use crate::error::{Error, Result};
use crate::session::{Session, SessionId, Subscription};
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Session manager holds every live session, independent of each other
pub struct SessionManager {
    /// All sessions indexed by ID
    sessions: DashMap<String, Arc<Session>>,
}

impl SessionManager {
    /// Create a new session manager
    pub fn new() -> Self {
        Self {
            sessions: DashMap::new(),
        }
    }

    /// Get an existing session
    pub fn get(&self, id: &SessionId) -> Result<Arc<Session>> {
        self.sessions
            .get(id.as_str())
            .map(|r| r.value().clone())
            .ok_or_else(|| Error::SessionNotFound(id.to_string()))
    }

    /// Get or create a session
    pub fn get_or_create(&self, id: SessionId) -> Arc<Session> {
        let key = id.as_str().to_string();

        self.sessions
            .entry(key)
            .or_insert_with(|| {
                info!(session = %id, "Creating session");
                Arc::new(Session::new(id))
            })
            .value()
            .clone()
    }

    /// Get or create a session and join it in one step
    ///
    /// The join happens while the map entry is held, so `gc` cannot remove
    /// the session between lookup and registration.
    pub fn join(&self, id: SessionId) -> (Arc<Session>, Subscription) {
        let key = id.as_str().to_string();

        let entry = self.sessions.entry(key).or_insert_with(|| {
            info!(session = %id, "Creating session");
            Arc::new(Session::new(id))
        });
        let session = entry.value().clone();
        let subscription = session.join();
        drop(entry);

        (session, subscription)
    }

    /// Remove a session
    pub fn remove(&self, id: &SessionId) -> Result<()> {
        self.sessions
            .remove(id.as_str())
            .map(|_| ())
            .ok_or_else(|| Error::SessionNotFound(id.to_string()))
    }

    /// IDs of all live sessions
    pub fn list(&self) -> Vec<SessionId> {
        self.sessions
            .iter()
            .map(|entry| entry.value().id().clone())
            .collect()
    }

    /// Run garbage collection - removes sessions nobody is connected to
    /// that have been idle longer than `expiry`
    /// Returns the number of sessions removed
    pub fn gc(&self, expiry: Duration) -> usize {
        let before = self.sessions.len();

        self.sessions.retain(|_, session| {
            session.connection_count() > 0 || session.idle_for() <= expiry
        });

        before.saturating_sub(self.sessions.len())
    }

    /// Get statistics
    pub fn stats(&self) -> ManagerStats {
        ManagerStats {
            session_count: self.sessions.len(),
            connection_count: self
                .sessions
                .iter()
                .map(|entry| entry.value().connection_count())
                .sum(),
        }
    }
}

impl Default for SessionManager {
    fn default() -> Self {
        Self::new()
    }
}

/// Manager statistics
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManagerStats {
    pub session_count: usize,
    pub connection_count: usize,
}
