//! Authoritative sessions: the canonical document, its history, and fan-out

use crate::document::{checksum, Document};
use crate::error::{Error, Result};
use crate::operation::Operation;
use crate::presence::{CursorData, Participant, PresenceTracker, UserInfo};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::broadcast;
use tracing::{debug, info};

/// Maximum document length in characters
pub const MAX_DOCUMENT_CHARS: usize = 16 * 1024 * 1024;

/// Capacity of the per-session event channel
const EVENT_CHANNEL_CAPACITY: usize = 10_000;

/// Session identifier - UTF-8 string, max 512 bytes
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(String);

impl SessionId {
    /// Create a new session ID, validating the format
    pub fn new(id: impl Into<String>) -> Result<Self> {
        let id = id.into();

        if id.is_empty() {
            return Err(Error::InvalidSessionId("Session ID cannot be empty".into()));
        }

        if id.len() > 512 {
            return Err(Error::InvalidSessionId("Session ID exceeds 512 bytes".into()));
        }

        if !id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == ':' || c == '_' || c == '-')
        {
            return Err(Error::InvalidSessionId(
                "Session ID must match pattern [a-zA-Z0-9:_-]+".into(),
            ));
        }

        Ok(Self(id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// An accepted operation together with the revision it produced
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryEntry {
    pub revision: u64,
    pub author: u64,
    pub operation: Operation,
    /// Checksum of the document right after this entry, when known
    pub checksum: Option<String>,
}

/// Something every connection of a session should hear about
#[derive(Debug, Clone)]
pub enum SessionEvent {
    History(HistoryEntry),
    Language { language: String, author: u64 },
    UserInfo { id: u64, info: Option<UserInfo> },
    Cursor { id: u64, data: CursorData },
}

/// State a newly joined connection needs to catch up
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub history: Vec<HistoryEntry>,
    /// Current language and the participant who set it
    pub language: Option<(String, u64)>,
    pub participants: Vec<Participant>,
}

/// Result of joining a session
pub struct Subscription {
    /// Connection id assigned to the joiner
    pub id: u64,
    /// Everything published after the snapshot was taken
    pub events: broadcast::Receiver<SessionEvent>,
    pub snapshot: Snapshot,
}

#[derive(Debug)]
struct Accepted {
    author: u64,
    operation: Operation,
}

#[derive(Debug, Default)]
struct State {
    document: Document,
    history: Vec<Accepted>,
    language: Option<(String, u64)>,
    presence: PresenceTracker,
}

/// One shared document and the connections editing it
///
/// Every mutation happens under the state write lock and publishes its event
/// before releasing it, so all connections observe one total order.
pub struct Session {
    id: SessionId,
    state: RwLock<State>,
    next_client: AtomicU64,
    connections: AtomicUsize,
    last_accessed: Mutex<Instant>,
    events: broadcast::Sender<SessionEvent>,
}

impl Session {
    /// Create an empty session at revision 0
    pub fn new(id: SessionId) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        Self {
            id,
            state: RwLock::new(State::default()),
            next_client: AtomicU64::new(0),
            connections: AtomicUsize::new(0),
            last_accessed: Mutex::new(Instant::now()),
            events,
        }
    }

    pub fn id(&self) -> &SessionId {
        &self.id
    }

    /// Current canonical text
    pub fn text(&self) -> String {
        self.state.read().document.text().to_string()
    }

    pub fn revision(&self) -> u64 {
        self.state.read().document.revision()
    }

    pub fn language(&self) -> Option<String> {
        self.state.read().language.as_ref().map(|(language, _)| language.clone())
    }

    pub fn checksum(&self) -> String {
        self.state.read().document.checksum()
    }

    pub fn connection_count(&self) -> usize {
        self.connections.load(Ordering::Relaxed)
    }

    /// Time since the last join, leave, or accepted edit
    pub fn idle_for(&self) -> Duration {
        self.last_accessed.lock().elapsed()
    }

    /// Register a new connection
    ///
    /// The id, the event subscription and the snapshot are taken under one
    /// read lock, so the joiner sees every accepted edit exactly once.
    pub fn join(&self) -> Subscription {
        let state = self.state.read();
        let id = self.next_client.fetch_add(1, Ordering::Relaxed);
        let events = self.events.subscribe();

        let last = state.history.len();
        let history = state
            .history
            .iter()
            .enumerate()
            .map(|(index, accepted)| HistoryEntry {
                revision: index as u64 + 1,
                author: accepted.author,
                operation: accepted.operation.clone(),
                checksum: (index + 1 == last).then(|| state.document.checksum()),
            })
            .collect();

        let snapshot = Snapshot {
            history,
            language: state.language.clone(),
            participants: state.presence.participants().cloned().collect(),
        };
        drop(state);

        self.connections.fetch_add(1, Ordering::Relaxed);
        self.touch();
        info!(session = %self.id, client = id, "Client joined session");

        Subscription {
            id,
            events,
            snapshot,
        }
    }

    /// Unregister a connection and tell everyone else it left
    pub fn leave(&self, id: u64) {
        let mut state = self.state.write();
        state.presence.remove(id);
        let _ = self.events.send(SessionEvent::UserInfo { id, info: None });
        drop(state);

        self.connections.fetch_sub(1, Ordering::Relaxed);
        self.touch();
        info!(session = %self.id, client = id, "Client left session");
    }

    /// Accept an edit made against `revision` into the global order
    ///
    /// An edit based on an older revision is transformed through every entry
    /// accepted since then; no edit is ever rejected for being behind.
    pub fn apply_edit(&self, author: u64, revision: u64, operation: Operation) -> Result<HistoryEntry> {
        self.apply_edit_checked(author, revision, operation, |_| Ok(()))
    }

    /// Like [`Session::apply_edit`], but `check` may veto the resulting entry
    ///
    /// `check` runs under the write lock before anything is committed or
    /// broadcast. A rejected edit leaves the session untouched.
    pub fn apply_edit_checked<F>(
        &self,
        author: u64,
        revision: u64,
        operation: Operation,
        check: F,
    ) -> Result<HistoryEntry>
    where
        F: FnOnce(&HistoryEntry) -> Result<()>,
    {
        let mut guard = self.state.write();
        let state = &mut *guard;

        let current = state.document.revision();
        if revision > current {
            return Err(Error::RevisionAhead { revision, current });
        }

        let mut operation = operation;
        for accepted in &state.history[revision as usize..] {
            let (_, transformed) = accepted.operation.transform(&operation)?;
            operation = transformed;
        }

        if operation.target_len() > MAX_DOCUMENT_CHARS {
            return Err(Error::DocumentTooLarge {
                size: operation.target_len(),
                limit: MAX_DOCUMENT_CHARS,
            });
        }

        let text = operation.apply(state.document.text())?;
        let entry = HistoryEntry {
            revision: current + 1,
            author,
            checksum: Some(checksum(&text)),
            operation,
        };
        check(&entry)?;

        state.document.commit(text);
        state.presence.transform_cursors(&entry.operation);
        state.history.push(Accepted {
            author,
            operation: entry.operation.clone(),
        });
        let _ = self.events.send(SessionEvent::History(entry.clone()));
        drop(guard);

        debug!(
            session = %self.id,
            author = author,
            based_on = revision,
            revision = entry.revision,
            "Accepted edit"
        );
        self.touch();
        Ok(entry)
    }

    /// Set the document language and rebroadcast it
    pub fn set_language(&self, author: u64, language: String) {
        let mut state = self.state.write();
        state.language = Some((language.clone(), author));
        let _ = self.events.send(SessionEvent::Language { language, author });
    }

    /// Record a participant's display metadata and rebroadcast it
    pub fn set_info(&self, id: u64, info: UserInfo) {
        let info = UserInfo::new(info.name, info.hue);
        let mut state = self.state.write();
        state.presence.update_info(id, info.clone());
        let _ = self.events.send(SessionEvent::UserInfo {
            id,
            info: Some(info),
        });
    }

    /// Record a participant's cursor and rebroadcast it
    pub fn set_cursor(&self, id: u64, data: CursorData) {
        let mut state = self.state.write();
        state.presence.update_cursor(id, data.clone());
        let _ = self.events.send(SessionEvent::Cursor { id, data });
    }

    /// Current participants ordered by id
    pub fn participants(&self) -> Vec<Participant> {
        self.state.read().presence.participants().cloned().collect()
    }

    fn touch(&self) {
        *self.last_accessed.lock() = Instant::now();
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("revision", &self.revision())
            .field("connections", &self.connection_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session() -> Session {
        Session::new(SessionId::new("test:1").unwrap())
    }

    fn insert_at(len: usize, at: usize, text: &str) -> Operation {
        let mut op = Operation::new();
        op.retain(at).insert(text).retain(len - at);
        op
    }

    #[test]
    fn test_session_id_valid() {
        assert!(SessionId::new("pad:123").is_ok());
        assert!(SessionId::new("notes_2024-01").is_ok());
    }

    #[test]
    fn test_session_id_invalid() {
        assert!(SessionId::new("").is_err());
        assert!(SessionId::new("pad/123").is_err());
        assert!(SessionId::new("a".repeat(513)).is_err());
    }

    #[test]
    fn test_basic_insert() {
        let session = session();
        let alice = session.join();

        let entry = session.apply_edit(alice.id, 0, insert_at(0, 0, "hi")).unwrap();

        assert_eq!(entry.revision, 1);
        assert_eq!(entry.author, alice.id);
        assert_eq!(entry.operation, insert_at(0, 0, "hi"));
        assert_eq!(session.text(), "hi");
        assert_eq!(session.revision(), 1);
    }

    #[test]
    fn test_concurrent_inserts_converge() {
        let session = session();
        let seed = session.join();
        session.apply_edit(seed.id, 0, insert_at(0, 0, "ab")).unwrap();

        let alice = session.join();
        let bob = session.join();
        let based_on = session.revision();

        session.apply_edit(alice.id, based_on, insert_at(2, 0, "X")).unwrap();
        let entry = session.apply_edit(bob.id, based_on, insert_at(2, 2, "Y")).unwrap();

        assert_eq!(entry.operation, insert_at(3, 3, "Y"));
        assert_eq!(entry.revision, based_on + 2);
        assert_eq!(session.text(), "XabY");
    }

    #[test]
    fn test_lagging_client_catch_up() {
        let session = session();
        let fast = session.join();
        let slow = session.join();

        for i in 0..6 {
            session.apply_edit(fast.id, i, insert_at(i as usize, i as usize, "a")).unwrap();
        }
        assert_eq!(session.revision(), 6);

        // Slow client saw "aaa" (revision 3) and inserted at the front
        let entry = session.apply_edit(slow.id, 3, insert_at(3, 0, "S")).unwrap();

        assert_eq!(entry.revision, 7);
        assert_eq!(session.text(), "Saaaaaa");
    }

    #[test]
    fn test_tie_goes_to_accepted_edit() {
        let session = session();
        let alice = session.join();
        let bob = session.join();

        session.apply_edit(alice.id, 0, insert_at(0, 0, "A")).unwrap();
        session.apply_edit(bob.id, 0, insert_at(0, 0, "B")).unwrap();

        assert_eq!(session.text(), "AB");
    }

    #[test]
    fn test_revision_ahead_is_rejected() {
        let session = session();
        let alice = session.join();

        let err = session.apply_edit(alice.id, 4, insert_at(0, 0, "x")).unwrap_err();
        assert_eq!(err, Error::RevisionAhead { revision: 4, current: 0 });
        assert_eq!(session.revision(), 0);
    }

    #[test]
    fn test_length_mismatch_is_rejected() {
        let session = session();
        let alice = session.join();

        let err = session.apply_edit(alice.id, 0, insert_at(5, 0, "x")).unwrap_err();
        assert!(matches!(err, Error::LengthMismatch { .. }));
        assert_eq!(session.revision(), 0);
    }

    #[test]
    fn test_vetoed_edit_leaves_session_untouched() {
        let session = session();
        let alice = session.join();
        let mut events = alice.events;

        let err = session
            .apply_edit_checked(alice.id, 0, insert_at(0, 0, "big"), |entry| {
                assert_eq!(entry.revision, 1);
                assert_eq!(entry.checksum, Some(checksum("big")));
                Err(Error::EntryTooLarge { size: 10, limit: 5 })
            })
            .unwrap_err();

        assert_eq!(err, Error::EntryTooLarge { size: 10, limit: 5 });
        assert_eq!(session.revision(), 0);
        assert_eq!(session.text(), "");
        assert!(events.try_recv().is_err());

        // The next edit still lands at revision 1
        let entry = session.apply_edit(alice.id, 0, insert_at(0, 0, "ok")).unwrap();
        assert_eq!(entry.revision, 1);
    }

    #[test]
    fn test_oversized_counts_do_not_poison_history() {
        let session = session();
        let alice = session.join();
        session.apply_edit(alice.id, 0, insert_at(0, 0, "ab")).unwrap();

        let huge: Operation = serde_json::from_str("[9223372036854775807,\"x\"]").unwrap();
        assert!(session.apply_edit(alice.id, 1, huge.clone()).is_err());
        assert!(session.apply_edit(alice.id, 0, huge).is_err());
        assert_eq!(session.revision(), 1);

        // A lagging honest edit still transforms through the history
        let entry = session.apply_edit(alice.id, 0, insert_at(0, 0, "X")).unwrap();
        assert_eq!(entry.revision, 2);
        assert_eq!(session.text(), "Xab");
    }

    #[test]
    fn test_join_snapshot() {
        let session = session();
        let alice = session.join();
        session.apply_edit(alice.id, 0, insert_at(0, 0, "one")).unwrap();
        session.apply_edit(alice.id, 1, insert_at(3, 3, " two")).unwrap();
        session.set_language(alice.id, "rust".into());
        session.set_info(alice.id, UserInfo::new("Alice", 120));

        let bob = session.join();
        let history = &bob.snapshot.history;

        assert_ne!(alice.id, bob.id);
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].revision, 1);
        assert_eq!(history[0].checksum, None);
        assert_eq!(history[1].checksum, Some(session.checksum()));
        assert_eq!(bob.snapshot.language, Some(("rust".to_string(), alice.id)));
        assert_eq!(bob.snapshot.participants.len(), 1);
        assert_eq!(session.connection_count(), 2);
    }

    #[tokio::test]
    async fn test_events_are_broadcast_in_order() {
        let session = session();
        let alice = session.join();
        let mut bob = session.join();

        session.apply_edit(alice.id, 0, insert_at(0, 0, "x")).unwrap();
        session.set_cursor(alice.id, CursorData::at(1));
        session.leave(alice.id);

        match bob.events.recv().await.unwrap() {
            SessionEvent::History(entry) => {
                assert_eq!(entry.revision, 1);
                assert_eq!(entry.checksum, Some(session.checksum()));
            }
            other => panic!("unexpected event: {:?}", other),
        }
        assert!(matches!(
            bob.events.recv().await.unwrap(),
            SessionEvent::Cursor { id, .. } if id == alice.id
        ));
        assert!(matches!(
            bob.events.recv().await.unwrap(),
            SessionEvent::UserInfo { id, info: None } if id == alice.id
        ));
        assert_eq!(session.connection_count(), 1);
    }

    #[test]
    fn test_accepted_edits_move_cursors() {
        let session = session();
        let alice = session.join();
        let bob = session.join();
        session.apply_edit(alice.id, 0, insert_at(0, 0, "abc")).unwrap();
        session.set_cursor(bob.id, CursorData::at(2));

        session.apply_edit(alice.id, 1, insert_at(3, 0, "__")).unwrap();

        let participants = session.participants();
        let cursor = participants[0].cursor.clone().unwrap();
        assert_eq!(cursor.cursors, vec![4]);
    }
}
