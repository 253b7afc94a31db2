//! TCP transport for tandem

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tandem_core::SessionManager;
use tandem_protocol::{encode, ClientMsg, ProtocolError, ServerMsg};
use tokio::io::{AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use crate::error::{TransportError, TransportResult};
use crate::handler::ConnectionHandler;

/// TCP Server for tandem
pub struct TcpServer {
    manager: Arc<SessionManager>,
    addr: SocketAddr,
    client_counter: AtomicU64,
}

impl TcpServer {
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
        info!(addr = %listener.local_addr()?, "tandem TCP server listening");

        loop {
            match listener.accept().await {
                Ok((stream, peer_addr)) => {
                    let client_label = format!(
                        "tcp:{}:{}",
                        peer_addr,
                        self.client_counter.fetch_add(1, Ordering::Relaxed)
                    );
                    let manager = self.manager.clone();

                    tokio::spawn(async move {
                        if let Err(e) =
                            Self::handle_connection(stream, client_label.clone(), manager).await
                        {
                            warn!(client = %client_label, error = %e, "Connection dropped");
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
        mut stream: TcpStream,
        client_label: String,
        manager: Arc<SessionManager>,
    ) -> TransportResult<()> {
        info!(client = %client_label, "Client connected");
        stream.set_nodelay(true)?;

        let mut handler = ConnectionHandler::new(client_label.clone(), manager);
        let mut buf = vec![0u8; 8192];

        // The first frame names the session
        let mut events = loop {
            let n = stream.read(&mut buf).await?;
            if n == 0 {
                info!(client = %client_label, "Client disconnected before joining");
                return Ok(());
            }

            let mut messages = handler.feed(&buf[..n])?.into_iter();
            let Some(first) = messages.next() else {
                continue;
            };
            let ClientMsg::Join(session) = first else {
                return Err(ProtocolError::Unexpected("first frame must be Join".into()).into());
            };

            let (initial, events) = handler.join(&session)?;
            for msg in &initial {
                send(&mut stream, msg).await?;
            }
            for msg in messages {
                handler.handle(msg)?;
            }
            break events;
        };

        loop {
            tokio::select! {
                result = stream.read(&mut buf) => {
                    let n = result?;
                    if n == 0 {
                        info!(client = %client_label, "Client disconnected");
                        break;
                    }
                    for msg in handler.feed(&buf[..n])? {
                        handler.handle(msg)?;
                    }
                }

                result = events.recv() => {
                    match result {
                        Ok(event) => {
                            if let Some(msg) = handler.outgoing(event) {
                                send(&mut stream, &msg).await?;
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

async fn send<W: AsyncWrite + Unpin>(writer: &mut W, msg: &ServerMsg) -> TransportResult<()> {
    let frame = encode(msg)?;
    writer.write_all(&frame).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tandem_core::Operation;
    use tandem_protocol::decode;
    use tokio::io::{AsyncBufReadExt, BufReader};
    use tokio::net::tcp::OwnedReadHalf;

    async fn spawn_server() -> (SocketAddr, Arc<SessionManager>) {
        let manager = Arc::new(SessionManager::new());
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = TcpServer::new(manager.clone(), addr);
        tokio::spawn(async move { server.serve(listener).await });
        (addr, manager)
    }

    async fn next(reader: &mut BufReader<OwnedReadHalf>) -> ServerMsg {
        let mut line = String::new();
        tokio::time::timeout(Duration::from_secs(5), reader.read_line(&mut line))
            .await
            .unwrap()
            .unwrap();
        decode(&line).unwrap()
    }

    #[tokio::test]
    async fn test_join_and_edit() {
        let (addr, manager) = spawn_server().await;
        let stream = TcpStream::connect(addr).await.unwrap();
        let (read_half, mut write_half) = stream.into_split();
        let mut reader = BufReader::new(read_half);

        write_half
            .write_all(b"{\"Join\":\"pad:tcp\"}\n{\"Edit\":{\"revision\":0,\"operation\":[\"hi\"]}}\n")
            .await
            .unwrap();

        assert_eq!(next(&mut reader).await, ServerMsg::Identity(0));

        let mut op = Operation::new();
        op.insert("hi");
        match next(&mut reader).await {
            ServerMsg::History {
                revision,
                operation,
                author,
                checksum,
            } => {
                assert_eq!(revision, 1);
                assert_eq!(operation, op);
                assert_eq!(author, 0);
                assert!(checksum.is_some());
            }
            other => panic!("unexpected message: {other:?}"),
        }

        let session = manager
            .get(&tandem_core::SessionId::new("pad:tcp").unwrap())
            .unwrap();
        assert_eq!(session.text(), "hi");
    }

    #[tokio::test]
    async fn test_first_frame_must_be_join() {
        let (addr, manager) = spawn_server().await;
        let mut stream = TcpStream::connect(addr).await.unwrap();

        stream
            .write_all(b"{\"SetLanguage\":\"rust\"}\n")
            .await
            .unwrap();

        let mut buf = [0u8; 16];
        let n = tokio::time::timeout(Duration::from_secs(5), stream.read(&mut buf))
            .await
            .unwrap()
            .unwrap_or(0);
        assert_eq!(n, 0);
        assert!(manager.list().is_empty());
    }

    #[tokio::test]
    async fn test_revision_ahead_drops_connection() {
        let (addr, manager) = spawn_server().await;
        let stream = TcpStream::connect(addr).await.unwrap();
        let (read_half, mut write_half) = stream.into_split();
        let mut reader = BufReader::new(read_half);

        write_half
            .write_all(b"{\"Join\":\"pad:ahead\"}\n")
            .await
            .unwrap();
        assert_eq!(next(&mut reader).await, ServerMsg::Identity(0));

        write_half
            .write_all(b"{\"Edit\":{\"revision\":9,\"operation\":[\"x\"]}}\n")
            .await
            .unwrap();

        let mut line = String::new();
        let n = tokio::time::timeout(Duration::from_secs(5), reader.read_line(&mut line))
            .await
            .unwrap()
            .unwrap_or(0);
        assert_eq!(n, 0);

        // The server itself keeps running
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(manager.stats().connection_count, 0);
        assert!(TcpStream::connect(addr).await.is_ok());
    }
}
