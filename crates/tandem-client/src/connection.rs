//! TCP driver for a [`Client`]
//!
//! A reader task feeds server frames into the state machine; a writer task
//! drains outgoing messages. Local edits go through [`Connection`] methods
//! and never wait on the network.

use crate::client::{Client, ConnectionState};
use crate::error::ClientError;
use crate::event::ClientEvent;
use parking_lot::Mutex;
use std::sync::Arc;
use tandem_core::{CursorData, Operation, Participant, SessionId, TextEdit, UserInfo};
use tandem_protocol::{encode, ClientMsg, Parser, ServerMsg};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpStream, ToSocketAddrs};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

type Outgoing = mpsc::UnboundedSender<ClientMsg>;

/// A live connection to one session on a tandem server
pub struct Connection {
    client: Arc<Mutex<Client>>,
    outgoing: Outgoing,
    reader: JoinHandle<()>,
    writer: JoinHandle<()>,
}

impl Connection {
    /// Connect to `addr` and join `session`
    pub async fn connect(
        addr: impl ToSocketAddrs,
        session: &SessionId,
        info: UserInfo,
    ) -> Result<Self, ClientError> {
        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;
        Ok(Self::start(stream, session, Client::new(info)))
    }

    /// Drive `client` over an established stream
    ///
    /// Edits already made on `client` are sent once the server assigns an
    /// identity.
    pub fn start(stream: TcpStream, session: &SessionId, client: Client) -> Self {
        let (read_half, write_half) = stream.into_split();
        let (outgoing, rx) = mpsc::unbounded_channel();
        let client = Arc::new(Mutex::new(client));

        // Join has to be the first frame
        let _ = outgoing.send(ClientMsg::Join(session.to_string()));

        let writer = tokio::spawn(write_loop(write_half, rx));
        let reader = tokio::spawn(read_loop(read_half, client.clone(), outgoing.clone()));

        Self {
            client,
            outgoing,
            reader,
            writer,
        }
    }

    /// Apply a local edit and send it when the outbox allows
    pub fn edit(&self, op: Operation) -> Result<(), ClientError> {
        let mut client = self.client.lock();
        let msgs = client.local_edit(op)?;
        send_all(&self.outgoing, msgs);
        Ok(())
    }

    /// Apply range replacements against the current local text
    pub fn replace(&self, edits: &[TextEdit]) -> Result<(), ClientError> {
        let mut client = self.client.lock();
        let msgs = client.replace(edits)?;
        send_all(&self.outgoing, msgs);
        Ok(())
    }

    /// Build replacements from the local state and apply them under one lock
    ///
    /// No remote edit can land between reading the text and applying `f`'s
    /// ranges.
    pub fn replace_with(&self, f: impl FnOnce(&Client) -> Vec<TextEdit>) -> Result<(), ClientError> {
        let mut client = self.client.lock();
        let edits = f(&client);
        let msgs = client.replace(&edits)?;
        send_all(&self.outgoing, msgs);
        Ok(())
    }

    pub fn set_cursor(&self, data: CursorData) {
        let mut client = self.client.lock();
        let msgs = client.set_cursor(data);
        send_all(&self.outgoing, msgs);
    }

    pub fn set_info(&self, info: UserInfo) {
        let mut client = self.client.lock();
        let msgs = client.set_info(info);
        send_all(&self.outgoing, msgs);
    }

    pub fn set_language(&self, language: impl Into<String>) {
        let mut client = self.client.lock();
        let msgs = client.set_language(language);
        send_all(&self.outgoing, msgs);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ClientEvent> {
        self.client.lock().subscribe()
    }

    pub fn state(&self) -> ConnectionState {
        self.client.lock().state()
    }

    pub fn text(&self) -> String {
        self.client.lock().text().to_owned()
    }

    pub fn revision(&self) -> u64 {
        self.client.lock().revision()
    }

    pub fn language(&self) -> Option<String> {
        self.client.lock().language().map(str::to_owned)
    }

    pub fn participants(&self) -> Vec<Participant> {
        self.client.lock().participants().cloned().collect()
    }

    /// Run `f` against the client state while holding its lock
    pub fn with_client<R>(&self, f: impl FnOnce(&Client) -> R) -> R {
        f(&*self.client.lock())
    }

    /// Close the connection, leaving the client state readable
    pub fn close(&self) {
        self.reader.abort();
        self.writer.abort();
        self.client.lock().on_disconnect();
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.reader.abort();
        self.writer.abort();
    }
}

/// Queue messages in order; a closed writer means the connection is gone
fn send_all(outgoing: &Outgoing, msgs: Vec<ClientMsg>) {
    for msg in msgs {
        if outgoing.send(msg).is_err() {
            break;
        }
    }
}

async fn write_loop(mut stream: OwnedWriteHalf, mut rx: mpsc::UnboundedReceiver<ClientMsg>) {
    while let Some(msg) = rx.recv().await {
        let frame = match encode(&msg) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(error = %e, "Failed to encode message");
                continue;
            }
        };
        if let Err(e) = stream.write_all(&frame).await {
            debug!(error = %e, "Write failed");
            break;
        }
    }
}

async fn read_loop(mut stream: OwnedReadHalf, client: Arc<Mutex<Client>>, outgoing: Outgoing) {
    let mut parser = Parser::new();
    let mut buf = vec![0u8; 8192];

    loop {
        let n = match stream.read(&mut buf).await {
            Ok(0) => {
                debug!("Server closed the connection");
                client.lock().on_disconnect();
                return;
            }
            Ok(n) => n,
            Err(e) => {
                debug!(error = %e, "Read failed");
                client.lock().on_disconnect();
                return;
            }
        };

        if let Err(e) = parser.feed(&buf[..n]) {
            client.lock().abort(format!("bad frame from server: {e}"));
            return;
        }

        loop {
            match parser.parse::<ServerMsg>() {
                Ok(Some(msg)) => {
                    let mut client = client.lock();
                    match client.handle_message(msg) {
                        Ok(msgs) => send_all(&outgoing, msgs),
                        // Already published to subscribers
                        Err(_) => return,
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    client.lock().abort(format!("undecodable server message: {e}"));
                    return;
                }
            }
        }
    }
}
