//! Tandem Client
//!
//! The client half of the synchronization engine:
//! - [`Client`]: a sans-I/O state machine that owns the local document mirror,
//!   the in-flight/buffered edit discipline and the connection lifecycle
//! - [`Connection`]: drives a [`Client`] over a TCP connection
//! - [`ClientEvent`]: what subscribers (editor views, CLIs) are told

pub mod client;
pub mod connection;
pub mod error;
pub mod event;
pub mod outbox;

pub use client::{Client, ConnectionState};
pub use connection::Connection;
pub use error::ClientError;
pub use event::ClientEvent;
pub use outbox::{Ack, Outbox};
