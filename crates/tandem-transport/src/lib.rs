//! Tandem Transport Layer
//!
//! Serves sessions over the network:
//! - TCP: newline-delimited JSON, the first frame names the session
//! - WebSocket: one JSON message per frame, session taken from `/api/socket/<id>`

pub mod error;
pub mod handler;
pub mod tcp;
#[cfg(feature = "websocket")]
pub mod websocket;

pub use error::TransportError;
pub use handler::ConnectionHandler;
pub use tcp::TcpServer;
#[cfg(feature = "websocket")]
pub use websocket::WebSocketServer;
