//! Client synchronization state machine
//!
//! [`Client`] performs no I/O. Feed it local edits and server messages; it
//! returns the messages to send and publishes [`ClientEvent`]s to subscribers.

use crate::error::ClientError;
use crate::event::ClientEvent;
use crate::outbox::{Ack, Outbox};
use tandem_core::{
    CursorData, Document, Operation, Participant, PresenceTracker, TextEdit, UserInfo,
};
use tandem_protocol::{ClientMsg, ServerMsg};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// Lifecycle of a client connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Waiting for the server to assign an identity
    Connecting,
    Connected,
    /// The transport closed; local edits are kept but not sent
    Disconnected,
    /// The local mirror cannot be trusted anymore; terminal
    Desynchronized,
}

impl ConnectionState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ConnectionState::Disconnected | ConnectionState::Desynchronized
        )
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Desynchronized => "desynchronized",
        };
        f.write_str(s)
    }
}

/// Local mirror of one session
pub struct Client {
    info: UserInfo,
    state: ConnectionState,
    id: Option<u64>,
    /// Local text, at the last revision received from the server
    document: Document,
    outbox: Outbox,
    presence: PresenceTracker,
    language: Option<String>,
    /// Cursor update held back while an edit is in flight
    pending_cursor: Option<CursorData>,
    events: broadcast::Sender<ClientEvent>,
}

impl Client {
    /// Create a client in the `Connecting` state with an empty document
    pub fn new(info: UserInfo) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        Self {
            info,
            state: ConnectionState::Connecting,
            id: None,
            document: Document::new(),
            outbox: Outbox::default(),
            presence: PresenceTracker::new(),
            language: None,
            pending_cursor: None,
            events,
        }
    }

    /// A fresh client for reconnecting with the same identity info
    ///
    /// Nothing carries over: the new connection replays the full history.
    pub fn restart(&self) -> Self {
        Self::new(self.info.clone())
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ClientEvent> {
        self.events.subscribe()
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Connection id assigned by the server
    pub fn id(&self) -> Option<u64> {
        self.id
    }

    pub fn text(&self) -> &str {
        self.document.text()
    }

    /// Last revision received from the server
    pub fn revision(&self) -> u64 {
        self.document.revision()
    }

    pub fn language(&self) -> Option<&str> {
        self.language.as_deref()
    }

    pub fn info(&self) -> &UserInfo {
        &self.info
    }

    pub fn outbox(&self) -> &Outbox {
        &self.outbox
    }

    pub fn participants(&self) -> impl Iterator<Item = &Participant> {
        self.presence.participants()
    }

    pub fn participant(&self, id: u64) -> Option<&Participant> {
        self.presence.get(id)
    }

    /// Apply an edit made in the local editor
    ///
    /// The local text changes immediately. An edit that does not fit the local
    /// text is rejected without touching any state.
    pub fn local_edit(&mut self, op: Operation) -> Result<Vec<ClientMsg>, ClientError> {
        self.document.apply_local(&op)?;
        if op.is_noop() {
            return Ok(Vec::new());
        }

        self.presence.transform_cursors(&op);
        self.emit(ClientEvent::DocumentChanged {
            operation: op.clone(),
            remote: false,
        });

        if self.state == ConnectionState::Desynchronized {
            return Ok(Vec::new());
        }

        if let Err(e) = self.outbox.push(op) {
            return Err(self.desynchronize(format!("pending edits do not compose: {e}")));
        }
        Ok(self.flush())
    }

    /// Apply editor-style range replacements to the current local text
    pub fn replace(&mut self, edits: &[TextEdit]) -> Result<Vec<ClientMsg>, ClientError> {
        let op = Operation::from_edits(self.document.len(), edits)?;
        self.local_edit(op)
    }

    /// Process one message from the server
    pub fn handle_message(&mut self, msg: ServerMsg) -> Result<Vec<ClientMsg>, ClientError> {
        match self.state {
            ConnectionState::Desynchronized => {
                return Err(ClientError::Desynchronized(
                    "message received after desynchronization".into(),
                ))
            }
            ConnectionState::Disconnected => return Ok(Vec::new()),
            ConnectionState::Connecting | ConnectionState::Connected => {}
        }

        match msg {
            ServerMsg::Identity(id) => self.on_identity(id),
            ServerMsg::History {
                revision,
                operation,
                author,
                checksum,
            } => self.on_history(revision, operation, author, checksum),
            ServerMsg::Language { language, .. } => {
                self.language = Some(language.clone());
                self.emit(ClientEvent::LanguageChanged(language));
                Ok(Vec::new())
            }
            ServerMsg::UserInfo { id, info } => {
                if self.id != Some(id) {
                    match info {
                        Some(info) => self.presence.update_info(id, info),
                        None => {
                            self.presence.remove(id);
                        }
                    }
                    self.emit(ClientEvent::PresenceChanged { id });
                }
                Ok(Vec::new())
            }
            ServerMsg::UserCursor { id, data } => {
                if self.id != Some(id) {
                    self.presence.update_cursor(id, data);
                    self.emit(ClientEvent::PresenceChanged { id });
                }
                Ok(Vec::new())
            }
        }
    }

    /// Announce new display metadata
    pub fn set_info(&mut self, info: UserInfo) -> Vec<ClientMsg> {
        self.info = UserInfo::new(info.name, info.hue);
        if self.state == ConnectionState::Connected {
            vec![ClientMsg::ClientInfo(self.info.clone())]
        } else {
            Vec::new()
        }
    }

    /// Change the session's language
    pub fn set_language(&mut self, language: impl Into<String>) -> Vec<ClientMsg> {
        let language = language.into();
        self.language = Some(language.clone());
        self.emit(ClientEvent::LanguageChanged(language.clone()));

        if self.state == ConnectionState::Connected {
            vec![ClientMsg::SetLanguage(language)]
        } else {
            Vec::new()
        }
    }

    /// Report the local cursor
    ///
    /// Positions refer to the local text. Only the latest update is kept while
    /// an edit is in flight; it is sent once the outbox drains.
    pub fn set_cursor(&mut self, data: CursorData) -> Vec<ClientMsg> {
        if self.state == ConnectionState::Connected && self.outbox.is_idle() {
            vec![ClientMsg::CursorData(data)]
        } else {
            self.pending_cursor = Some(data);
            Vec::new()
        }
    }

    /// The transport closed
    pub fn on_disconnect(&mut self) {
        if !self.state.is_terminal() {
            debug!(revision = self.revision(), "Disconnected");
            self.set_state(ConnectionState::Disconnected);
        }
    }

    /// Give up on the session after a failure outside the state machine,
    /// such as an undecodable frame
    pub fn abort(&mut self, reason: impl Into<String>) -> ClientError {
        self.desynchronize(reason.into())
    }

    fn on_identity(&mut self, id: u64) -> Result<Vec<ClientMsg>, ClientError> {
        if self.id.is_some() {
            return Err(self.desynchronize("identity assigned twice".into()));
        }

        debug!(id, "Identity assigned");
        self.id = Some(id);
        self.set_state(ConnectionState::Connected);

        let mut outgoing = vec![ClientMsg::ClientInfo(self.info.clone())];
        outgoing.extend(self.flush());
        if self.outbox.is_idle() {
            outgoing.extend(self.pending_cursor.take().map(ClientMsg::CursorData));
        }
        Ok(outgoing)
    }

    fn on_history(
        &mut self,
        revision: u64,
        operation: Operation,
        author: u64,
        checksum: Option<String>,
    ) -> Result<Vec<ClientMsg>, ClientError> {
        let expected = self.document.revision() + 1;
        if revision != expected {
            return Err(self.desynchronize(format!(
                "expected revision {expected}, received {revision}"
            )));
        }

        let mut outgoing = Vec::new();

        if self.id == Some(author) {
            match self.outbox.ack() {
                Ack::CaughtUp => {}
                Ack::SendNext(op) => outgoing.push(ClientMsg::Edit {
                    revision,
                    operation: op,
                }),
                Ack::NothingInFlight => {
                    return Err(self.desynchronize(format!(
                        "acknowledgement for revision {revision} with nothing in flight"
                    )));
                }
            }
            self.document.advance_revision();
        } else {
            let remote = match self.outbox.transform(&operation) {
                Ok(op) => op,
                Err(e) => {
                    return Err(
                        self.desynchronize(format!("cannot rebase revision {revision}: {e}"))
                    )
                }
            };
            if let Err(e) = self.document.apply(&remote) {
                return Err(self.desynchronize(format!("cannot apply revision {revision}: {e}")));
            }
            self.presence.transform_cursors(&remote);
            self.emit(ClientEvent::DocumentChanged {
                operation: remote,
                remote: true,
            });
        }

        if self.outbox.is_idle() {
            if let Some(expected) = checksum {
                if expected != self.document.checksum() {
                    return Err(
                        self.desynchronize(format!("checksum mismatch at revision {revision}"))
                    );
                }
            }
            if self.state == ConnectionState::Connected {
                if let Some(cursor) = self.pending_cursor.take() {
                    outgoing.push(ClientMsg::CursorData(cursor));
                }
            }
        }

        Ok(outgoing)
    }

    fn flush(&mut self) -> Vec<ClientMsg> {
        if self.state != ConnectionState::Connected {
            return Vec::new();
        }

        match self.outbox.flush() {
            Some(operation) => vec![ClientMsg::Edit {
                revision: self.document.revision(),
                operation,
            }],
            None => Vec::new(),
        }
    }

    fn desynchronize(&mut self, reason: String) -> ClientError {
        if self.state != ConnectionState::Desynchronized {
            warn!(revision = self.revision(), %reason, "Desynchronized");
            self.set_state(ConnectionState::Desynchronized);
            self.emit(ClientEvent::Desynchronized {
                reason: reason.clone(),
            });
        }
        ClientError::Desynchronized(reason)
    }

    fn set_state(&mut self, state: ConnectionState) {
        info!(from = %self.state, to = %state, "Connection state changed");
        self.state = state;
        self.emit(ClientEvent::StateChanged(state));
    }

    fn emit(&self, event: ClientEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("id", &self.id)
            .field("state", &self.state)
            .field("revision", &self.document.revision())
            .field("outbox", &self.outbox)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tandem_core::document::checksum;

    fn insert_at(base_len: usize, pos: usize, text: &str) -> Operation {
        let mut op = Operation::new();
        op.retain(pos).insert(text).retain(base_len - pos);
        op
    }

    fn history(revision: u64, author: u64, operation: Operation) -> ServerMsg {
        ServerMsg::History {
            revision,
            operation,
            author,
            checksum: None,
        }
    }

    fn connected(id: u64) -> Client {
        let mut client = Client::new(UserInfo::new("Alice", 120));
        let out = client.handle_message(ServerMsg::Identity(id)).unwrap();
        assert_eq!(out, vec![ClientMsg::ClientInfo(UserInfo::new("Alice", 120))]);
        client
    }

    #[test]
    fn test_identity_connects() {
        let client = connected(4);
        assert_eq!(client.state(), ConnectionState::Connected);
        assert_eq!(client.id(), Some(4));
    }

    #[test]
    fn test_single_inflight_operation() {
        let mut client = connected(0);

        let out = client.local_edit(insert_at(0, 0, "a")).unwrap();
        assert_eq!(
            out,
            vec![ClientMsg::Edit {
                revision: 0,
                operation: insert_at(0, 0, "a"),
            }]
        );

        // Further edits are buffered until the ack arrives
        assert!(client.local_edit(insert_at(1, 1, "b")).unwrap().is_empty());
        assert!(client.local_edit(insert_at(2, 2, "c")).unwrap().is_empty());
        assert_eq!(client.text(), "abc");

        let out = client
            .handle_message(history(1, 0, insert_at(0, 0, "a")))
            .unwrap();
        assert_eq!(
            out,
            vec![ClientMsg::Edit {
                revision: 1,
                operation: insert_at(1, 1, "bc"),
            }]
        );
        assert_eq!(client.revision(), 1);

        let out = client
            .handle_message(history(2, 0, insert_at(1, 1, "bc")))
            .unwrap();
        assert!(out.is_empty());
        assert!(client.outbox().is_idle());
        assert_eq!(client.revision(), 2);
        assert_eq!(client.text(), "abc");
    }

    #[test]
    fn test_remote_edit_is_rebased() {
        let mut client = connected(1);
        client.local_edit(insert_at(0, 0, "b")).unwrap();

        // Another client's "a" was accepted first and wins the tie
        client
            .handle_message(history(1, 0, insert_at(0, 0, "a")))
            .unwrap();
        assert_eq!(client.text(), "ab");
        assert_eq!(client.outbox().inflight(), Some(&insert_at(1, 1, "b")));

        client
            .handle_message(history(2, 1, insert_at(1, 1, "b")))
            .unwrap();
        assert_eq!(client.text(), "ab");
        assert_eq!(client.revision(), 2);
        assert!(client.outbox().is_idle());
    }

    #[test]
    fn test_revision_gap_desynchronizes() {
        let mut client = connected(0);
        let mut events = client.subscribe();

        let err = client
            .handle_message(history(2, 5, insert_at(0, 0, "x")))
            .unwrap_err();
        assert!(matches!(err, ClientError::Desynchronized(_)));
        assert_eq!(client.state(), ConnectionState::Desynchronized);

        assert_eq!(
            events.try_recv().unwrap(),
            ClientEvent::StateChanged(ConnectionState::Desynchronized)
        );
        assert!(matches!(
            events.try_recv().unwrap(),
            ClientEvent::Desynchronized { .. }
        ));

        // Edits stay local from now on
        let out = client.local_edit(insert_at(0, 0, "kept")).unwrap();
        assert!(out.is_empty());
        assert_eq!(client.text(), "kept");
        assert!(client
            .handle_message(history(1, 5, insert_at(0, 0, "x")))
            .is_err());
    }

    #[test]
    fn test_unexpected_ack_desynchronizes() {
        let mut client = connected(3);
        let err = client
            .handle_message(history(1, 3, insert_at(0, 0, "x")))
            .unwrap_err();
        assert!(matches!(err, ClientError::Desynchronized(_)));
    }

    #[test]
    fn test_checksum_verified_when_idle() {
        let mut client = connected(0);
        client
            .handle_message(ServerMsg::History {
                revision: 1,
                operation: insert_at(0, 0, "hi"),
                author: 9,
                checksum: Some(checksum("hi")),
            })
            .unwrap();

        let err = client
            .handle_message(ServerMsg::History {
                revision: 2,
                operation: insert_at(2, 2, "!"),
                author: 9,
                checksum: Some(checksum("something else")),
            })
            .unwrap_err();
        assert!(matches!(err, ClientError::Desynchronized(_)));
    }

    #[test]
    fn test_checksum_skipped_with_pending_edits() {
        let mut client = connected(0);
        client.local_edit(insert_at(0, 0, "mine")).unwrap();

        client
            .handle_message(ServerMsg::History {
                revision: 1,
                operation: insert_at(0, 0, "theirs"),
                author: 9,
                checksum: Some(checksum("theirs")),
            })
            .unwrap();
        assert_eq!(client.state(), ConnectionState::Connected);
        assert_eq!(client.text(), "theirsmine");
    }

    #[test]
    fn test_edits_before_identity_are_queued() {
        let mut client = Client::new(UserInfo::new("Bob", 30));
        assert!(client.local_edit(insert_at(0, 0, "early")).unwrap().is_empty());

        let out = client.handle_message(ServerMsg::Identity(2)).unwrap();
        assert_eq!(
            out,
            vec![
                ClientMsg::ClientInfo(UserInfo::new("Bob", 30)),
                ClientMsg::Edit {
                    revision: 0,
                    operation: insert_at(0, 0, "early"),
                },
            ]
        );

        // History replay lands before the ack
        client
            .handle_message(history(1, 0, insert_at(0, 0, "old ")))
            .unwrap();
        assert_eq!(client.text(), "old early");
        client
            .handle_message(history(2, 2, insert_at(4, 4, "early")))
            .unwrap();
        assert!(client.outbox().is_idle());
    }

    #[test]
    fn test_replace_ranges() {
        let mut client = connected(0);
        client.replace(&[TextEdit::new(0..0, "hello world")]).unwrap();
        client
            .handle_message(history(1, 0, insert_at(0, 0, "hello world")))
            .unwrap();

        let out = client
            .replace(&[TextEdit::new(0..5, "HELLO"), TextEdit::new(11..11, "!")])
            .unwrap();
        assert_eq!(client.text(), "HELLO world!");
        assert!(matches!(out.as_slice(), [ClientMsg::Edit { revision: 1, .. }]));

        assert!(client.replace(&[TextEdit::new(20..21, "x")]).is_err());
        assert_eq!(client.text(), "HELLO world!");
    }

    #[test]
    fn test_bad_local_edit_is_rejected() {
        let mut client = connected(0);
        let err = client.local_edit(insert_at(5, 0, "x")).unwrap_err();
        assert!(matches!(err, ClientError::Core(_)));
        assert_eq!(client.state(), ConnectionState::Connected);
        assert_eq!(client.text(), "");
    }

    #[test]
    fn test_cursor_held_while_in_flight() {
        let mut client = connected(0);
        client.local_edit(insert_at(0, 0, "ab")).unwrap();

        assert!(client.set_cursor(CursorData::at(1)).is_empty());
        assert!(client.set_cursor(CursorData::at(2)).is_empty());

        let out = client
            .handle_message(history(1, 0, insert_at(0, 0, "ab")))
            .unwrap();
        assert_eq!(out, vec![ClientMsg::CursorData(CursorData::at(2))]);

        assert_eq!(
            client.set_cursor(CursorData::at(0)),
            vec![ClientMsg::CursorData(CursorData::at(0))]
        );
    }

    #[test]
    fn test_presence_updates() {
        let mut client = connected(0);
        client
            .handle_message(ServerMsg::UserInfo {
                id: 5,
                info: Some(UserInfo::new("Eve", 300)),
            })
            .unwrap();
        client
            .handle_message(ServerMsg::UserCursor {
                id: 5,
                data: CursorData::at(0),
            })
            .unwrap();

        // Remote edits move remote cursors
        client
            .handle_message(history(1, 7, insert_at(0, 0, "xyz")))
            .unwrap();
        let eve = client.participant(5).unwrap();
        assert_eq!(eve.cursor, Some(CursorData::at(3)));

        // Own presence echoes are ignored
        client
            .handle_message(ServerMsg::UserInfo {
                id: 0,
                info: Some(UserInfo::new("Alice", 120)),
            })
            .unwrap();
        assert_eq!(client.participants().count(), 1);

        client
            .handle_message(ServerMsg::UserInfo { id: 5, info: None })
            .unwrap();
        assert!(client.participant(5).is_none());
    }

    #[test]
    fn test_language_and_info() {
        let mut client = Client::new(UserInfo::new("Alice", 0));
        assert!(client.set_language("rust").is_empty());
        assert_eq!(client.language(), Some("rust"));

        client.handle_message(ServerMsg::Identity(0)).unwrap();
        assert_eq!(
            client.set_language("python"),
            vec![ClientMsg::SetLanguage("python".into())]
        );
        assert_eq!(
            client.set_info(UserInfo {
                name: "Al".into(),
                hue: 400,
            }),
            vec![ClientMsg::ClientInfo(UserInfo::new("Al", 40))]
        );

        client
            .handle_message(ServerMsg::Language {
                language: "go".into(),
                author: 3,
            })
            .unwrap();
        assert_eq!(client.language(), Some("go"));
    }

    #[test]
    fn test_disconnect_and_restart() {
        let mut client = connected(0);
        client.local_edit(insert_at(0, 0, "x")).unwrap();
        client.on_disconnect();
        assert_eq!(client.state(), ConnectionState::Disconnected);

        // Messages after the transport closed are ignored
        assert!(client.handle_message(ServerMsg::Identity(1)).unwrap().is_empty());

        let fresh = client.restart();
        assert_eq!(fresh.state(), ConnectionState::Connecting);
        assert_eq!(fresh.text(), "");
        assert_eq!(fresh.info(), &UserInfo::new("Alice", 120));
    }
}
