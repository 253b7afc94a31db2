//! Tandem Core - Operational Transformation Engine
//!
//! This crate provides the core functionality for tandem:
//! - Retain/insert/delete operations and their algebra (compose, transform, invert)
//! - Revisioned documents with checksums
//! - Presence tracking for remote participants
//! - The authoritative server-side session and its manager

pub mod document;
pub mod error;
pub mod manager;
pub mod operation;
pub mod presence;
pub mod session;

pub use document::Document;
pub use error::{Error, Result};
pub use manager::{ManagerStats, SessionManager};
pub use operation::{Component, Operation, TextEdit};
pub use presence::{CursorData, Participant, PresenceTracker, UserInfo};
pub use session::{HistoryEntry, Session, SessionEvent, SessionId, Snapshot, Subscription};
