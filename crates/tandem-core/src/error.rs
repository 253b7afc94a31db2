//! Error types for tandem core

use thiserror::Error;

/// Core error types
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("Malformed operation: {0}")]
    MalformedOperation(String),

    #[error("Length mismatch: operation expects {expected} characters, document has {actual}")]
    LengthMismatch { expected: usize, actual: usize },

    #[error("Invalid session ID: {0}")]
    InvalidSessionId(String),

    #[error("Session not found: {0}")]
    SessionNotFound(String),

    #[error("Document size exceeds limit: {size} > {limit} characters")]
    DocumentTooLarge { size: usize, limit: usize },

    /// The history entry for an edit would not fit in one frame
    #[error("History entry too large: {size} > {limit} bytes")]
    EntryTooLarge { size: usize, limit: usize },

    #[error("Revision {revision} is ahead of the current revision {current}")]
    RevisionAhead { revision: u64, current: u64 },
}

/// Result type alias for tandem core operations
pub type Result<T> = std::result::Result<T, Error>;
