//! Client error types

use thiserror::Error;

/// Errors surfaced by the client state machine and its driver
#[derive(Error, Debug)]
pub enum ClientError {
    /// The local mirror no longer matches the server; terminal
    #[error("Session desynchronized: {0}")]
    Desynchronized(String),

    /// A local edit did not fit the local document
    #[error("Rejected local edit: {0}")]
    Core(#[from] tandem_core::Error),

    #[error("Protocol error: {0}")]
    Protocol(#[from] tandem_protocol::ProtocolError),

    #[error("Transport error: {0}")]
    Transport(#[from] std::io::Error),
}
