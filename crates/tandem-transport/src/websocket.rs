//! WebSocket transport for tandem
//!
//! Clients connect to `/api/socket/<session id>`; each text frame carries one
//! JSON message.

use futures_util::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tandem_core::SessionManager;
use tandem_protocol::{encode, ServerMsg};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tokio_tungstenite::{accept_hdr_async, tungstenite::Message};
use tracing::{debug, error, info, warn};

use crate::error::{TransportError, TransportResult};
use crate::handler::ConnectionHandler;

const SOCKET_PATH_PREFIX: &str = "/api/socket/";

/// WebSocket Server for tandem
pub struct WebSocketServer {
    manager: Arc<SessionManager>,
    addr: SocketAddr,
    client_counter: AtomicU64,
}

impl WebSocketServer {
    pub fn new(manager: Arc<SessionManager>, addr: SocketAddr) -> Self {
        Self {
            manager,
            addr,
            client_counter: AtomicU64::new(0),
        }
    }

    /// Bind the configured address and serve until the task is cancelled
    pub async fn run(&self) -> TransportResult<()> {
        let listener = TcpListener::bind(self.addr).await?;
        self.serve(listener).await
    }

    /// Serve connections from an already bound listener
    pub async fn serve(&self, listener: TcpListener) -> TransportResult<()> {
        info!(addr = %listener.local_addr()?, "tandem WebSocket server listening");

        loop {
            match listener.accept().await {
                Ok((stream, peer_addr)) => {
                    let client_label = format!(
                        "ws:{}:{}",
                        peer_addr,
                        self.client_counter.fetch_add(1, Ordering::Relaxed)
                    );
                    let manager = self.manager.clone();

                    tokio::spawn(async move {
                        if let Err(e) =
                            Self::handle_connection(stream, client_label.clone(), manager).await
                        {
                            warn!(client = %client_label, error = %e, "WebSocket connection dropped");
                        }
                    });
                }
                Err(e) => {
                    error!(error = %e, "Failed to accept connection");
                }
            }
        }
    }

    async fn handle_connection(
        stream: TcpStream,
        client_label: String,
        manager: Arc<SessionManager>,
    ) -> TransportResult<()> {
        let mut session = None;
        let ws_stream = accept_hdr_async(stream, |req: &Request, resp: Response| {
            match session_from_path(req.uri().path()) {
                Some(id) => {
                    session = Some(id.to_owned());
                    Ok(resp)
                }
                None => {
                    let mut err = ErrorResponse::new(Some(format!(
                        "expected {SOCKET_PATH_PREFIX}<session id>"
                    )));
                    *err.status_mut() = StatusCode::NOT_FOUND;
                    Err(err)
                }
            }
        })
        .await?;
        let session = session.ok_or(TransportError::NotJoined)?;
        let (mut write, mut read) = ws_stream.split();

        info!(client = %client_label, "WebSocket client connected");

        let mut handler = ConnectionHandler::new(client_label.clone(), manager);
        let (initial, mut events) = handler.join(&session)?;
        for msg in &initial {
            write.send(text_frame(msg)?).await?;
        }

        loop {
            tokio::select! {
                msg = read.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => {
                            let mut data = text.into_bytes();
                            // Ensure line ending for parser
                            if !data.ends_with(b"\n") {
                                data.push(b'\n');
                            }
                            for msg in handler.feed(&data)? {
                                handler.handle(msg)?;
                            }
                        }
                        Some(Ok(Message::Ping(data))) => {
                            write.send(Message::Pong(data)).await?;
                        }
                        Some(Ok(Message::Close(_))) | None => {
                            info!(client = %client_label, "WebSocket client disconnected");
                            break;
                        }
                        Some(Ok(_)) => {
                            // Binary and pong frames carry nothing for us
                        }
                        Some(Err(e)) => return Err(e.into()),
                    }
                }

                result = events.recv() => {
                    match result {
                        Ok(event) => {
                            if let Some(msg) = handler.outgoing(event) {
                                write.send(text_frame(&msg)?).await?;
                            }
                        }
                        Err(broadcast::error::RecvError::Lagged(n)) => {
                            return Err(TransportError::Lagged(n));
                        }
                        Err(broadcast::error::RecvError::Closed) => {
                            debug!(client = %client_label, "Session closed");
                            break;
                        }
                    }
                }
            }
        }

        handler.cleanup();
        Ok(())
    }
}

/// Session id named by a socket request path
fn session_from_path(path: &str) -> Option<&str> {
    path.strip_prefix(SOCKET_PATH_PREFIX)
        .filter(|id| !id.is_empty())
}

fn text_frame(msg: &ServerMsg) -> TransportResult<Message> {
    let encoded = encode(msg)?;
    let text = String::from_utf8_lossy(&encoded).trim_end().to_string();
    Ok(Message::Text(text))
}
