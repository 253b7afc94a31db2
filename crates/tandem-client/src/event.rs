//! Events published to client subscribers

use crate::client::ConnectionState;
use tandem_core::Operation;

/// A change observers of a [`Client`](crate::Client) may want to react to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    StateChanged(ConnectionState),

    /// The local document changed; `remote` edits must be applied to the editor
    DocumentChanged { operation: Operation, remote: bool },

    /// A participant's name, color or cursor changed, or it left
    PresenceChanged { id: u64 },

    LanguageChanged(String),

    /// Terminal: further edits stay local and will never reach the server
    Desynchronized { reason: String },
}
