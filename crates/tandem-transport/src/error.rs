//! Transport error types

use tandem_protocol::ProtocolError;
use thiserror::Error;

/// Reasons a single connection is dropped; never fatal to the server
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[cfg(feature = "websocket")]
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// The session refused what the client sent
    #[error("Rejected: {0}")]
    Rejected(#[from] tandem_core::Error),

    #[error("Message received before joining a session")]
    NotJoined,

    /// Events were dropped for this connection; its history has a gap
    #[error("Connection fell behind by {0} events")]
    Lagged(u64),
}

pub type TransportResult<T> = std::result::Result<T, TransportError>;
