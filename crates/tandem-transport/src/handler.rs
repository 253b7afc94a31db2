//! Connection handler - binds one client connection to a session

use std::sync::Arc;
use tandem_core::{HistoryEntry, Session, SessionEvent, SessionId, SessionManager};
use tandem_protocol::{check_frame_size, ClientMsg, Parser, ProtocolError, ServerMsg};
use tokio::sync::broadcast;
use tracing::{debug, info};

use crate::error::{TransportError, TransportResult};

struct Member {
    session: Arc<Session>,
    id: u64,
}

/// Handles a single client connection, independent of the transport
pub struct ConnectionHandler {
    /// Label used in logs, e.g. `tcp:127.0.0.1:5000:3`
    pub client_label: String,
    manager: Arc<SessionManager>,
    parser: Parser,
    member: Option<Member>,
}

impl ConnectionHandler {
    pub fn new(client_label: String, manager: Arc<SessionManager>) -> Self {
        Self {
            client_label,
            manager,
            parser: Parser::new(),
            member: None,
        }
    }

    /// Connection id within the joined session
    pub fn client_id(&self) -> Option<u64> {
        self.member.as_ref().map(|m| m.id)
    }

    /// Join a session, creating it if needed
    ///
    /// Returns the frames that bring the client up to date (identity, full
    /// history, language, presence) and the receiver for everything after.
    pub fn join(
        &mut self,
        session_id: &str,
    ) -> TransportResult<(Vec<ServerMsg>, broadcast::Receiver<SessionEvent>)> {
        if self.member.is_some() {
            return Err(ProtocolError::Unexpected("session already joined".into()).into());
        }

        let id = SessionId::new(session_id)?;
        let (session, subscription) = self.manager.join(id);
        let snapshot = subscription.snapshot;

        let mut initial = Vec::with_capacity(snapshot.history.len() + 2);
        initial.push(ServerMsg::Identity(subscription.id));
        initial.extend(snapshot.history.into_iter().map(ServerMsg::history));
        if let Some((language, author)) = snapshot.language {
            initial.push(ServerMsg::Language { language, author });
        }
        for participant in snapshot.participants {
            if let Some(info) = participant.info {
                initial.push(ServerMsg::UserInfo {
                    id: participant.id,
                    info: Some(info),
                });
            }
            if let Some(data) = participant.cursor {
                initial.push(ServerMsg::UserCursor {
                    id: participant.id,
                    data,
                });
            }
        }

        info!(
            client = %self.client_label,
            session = %session.id(),
            id = subscription.id,
            "Client joined"
        );
        self.member = Some(Member {
            session,
            id: subscription.id,
        });

        Ok((initial, subscription.events))
    }

    /// Decode every complete frame in `data`
    pub fn feed(&mut self, data: &[u8]) -> Result<Vec<ClientMsg>, ProtocolError> {
        self.parser.feed(data)?;

        let mut messages = Vec::new();
        while let Some(msg) = self.parser.parse()? {
            messages.push(msg);
        }
        Ok(messages)
    }

    /// Apply one message from a joined client to its session
    pub fn handle(&mut self, msg: ClientMsg) -> TransportResult<()> {
        let member = self.member.as_ref().ok_or(TransportError::NotJoined)?;

        match msg {
            ClientMsg::Join(_) => {
                return Err(ProtocolError::Unexpected("Join after joining".into()).into())
            }
            ClientMsg::Edit {
                revision,
                operation,
            } => {
                debug!(client = %self.client_label, revision, "Edit received");
                member
                    .session
                    .apply_edit_checked(member.id, revision, operation, history_fits)?;
            }
            ClientMsg::SetLanguage(language) => {
                check_frame_size(&ServerMsg::Language {
                    language: language.clone(),
                    author: member.id,
                })?;
                member.session.set_language(member.id, language);
            }
            ClientMsg::ClientInfo(info) => {
                check_frame_size(&ServerMsg::UserInfo {
                    id: member.id,
                    info: Some(info.clone()),
                })?;
                member.session.set_info(member.id, info);
            }
            ClientMsg::CursorData(data) => {
                check_frame_size(&ServerMsg::UserCursor {
                    id: member.id,
                    data: data.clone(),
                })?;
                member.session.set_cursor(member.id, data);
            }
        }
        Ok(())
    }

    /// The frame to forward for a session event, if this client should see it
    ///
    /// History is forwarded to everyone, the author included as its
    /// acknowledgement. Presence and language echoes are not.
    pub fn outgoing(&self, event: SessionEvent) -> Option<ServerMsg> {
        let own = self.client_id();
        let echo = match &event {
            SessionEvent::History(_) => false,
            SessionEvent::Language { author, .. } => own == Some(*author),
            SessionEvent::UserInfo { id, .. } | SessionEvent::Cursor { id, .. } => {
                own == Some(*id)
            }
        };
        (!echo).then(|| event.into())
    }

    /// Leave the joined session, if any
    pub fn cleanup(&mut self) {
        if let Some(member) = self.member.take() {
            member.session.leave(member.id);
            info!(client = %self.client_label, session = %member.session.id(), "Client left");
        }
    }
}

/// Refuse an entry whose `History` frame peers could not parse
fn history_fits(entry: &HistoryEntry) -> tandem_core::Result<()> {
    match check_frame_size(&ServerMsg::history(entry.clone())) {
        Ok(_) => Ok(()),
        Err(ProtocolError::MessageTooLarge { size, max }) => {
            Err(tandem_core::Error::EntryTooLarge { size, limit: max })
        }
        Err(e) => Err(tandem_core::Error::MalformedOperation(e.to_string())),
    }
}

impl Drop for ConnectionHandler {
    fn drop(&mut self) {
        self.cleanup();
    }
}
