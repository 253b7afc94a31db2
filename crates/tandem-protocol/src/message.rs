//! Tandem message types

use serde::{Deserialize, Serialize};
use tandem_core::{CursorData, HistoryEntry, Operation, SessionEvent, UserInfo};

/// Messages sent from a client to the server
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClientMsg {
    /// Select the session to edit; only valid as the first frame on raw TCP
    Join(String),

    /// An operation well-formed against `revision`
    Edit { revision: u64, operation: Operation },

    SetLanguage(String),

    ClientInfo(UserInfo),

    CursorData(CursorData),
}

/// Messages sent from the server to clients
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ServerMsg {
    /// Connection id assigned to the receiving client, sent once
    Identity(u64),

    /// The operation accepted as `revision` in the global order
    History {
        revision: u64,
        operation: Operation,
        author: u64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        checksum: Option<String>,
    },

    Language { language: String, author: u64 },

    /// Presence of a participant; `None` means it left
    UserInfo { id: u64, info: Option<UserInfo> },

    UserCursor { id: u64, data: CursorData },
}

impl ServerMsg {
    pub fn history(entry: HistoryEntry) -> Self {
        ServerMsg::History {
            revision: entry.revision,
            operation: entry.operation,
            author: entry.author,
            checksum: entry.checksum,
        }
    }
}

impl From<SessionEvent> for ServerMsg {
    fn from(event: SessionEvent) -> Self {
        match event {
            SessionEvent::History(entry) => ServerMsg::history(entry),
            SessionEvent::Language { language, author } => ServerMsg::Language { language, author },
            SessionEvent::UserInfo { id, info } => ServerMsg::UserInfo { id, info },
            SessionEvent::Cursor { id, data } => ServerMsg::UserCursor { id, data },
        }
    }
}
