//! The tcpchat client.
//!
//! `ChatClient` registers a username, then runs a background reader task that
//! turns incoming envelopes into [`ClientEvent`]s. Outgoing messages are
//! written directly on the caller's task.

use crate::event::ClientEvent;
use std::time::Duration;
use tcpchat_core::{ChatError, ChatResult, Envelope, FrameReader, FrameWriter, MsgType};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time;
use tracing::{debug, info, warn};

/// How long to wait for the server to answer the registration request.
const REGISTRATION_TIMEOUT: Duration = Duration::from_secs(10);

/// How long `disconnect` waits for the server to close its side.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

/// A registered connection to a tcpchat server.
pub struct ChatClient {
    username: String,
    writer: FrameWriter<OwnedWriteHalf>,
    events: mpsc::UnboundedReceiver<ClientEvent>,
    reader_handle: JoinHandle<()>,
    users: Vec<String>,
}

impl ChatClient {
    /// Connect to `addr` and register as `username`.
    ///
    /// Fails with [`ChatError::InvalidUsername`] carrying the server's reason
    /// if the name is refused.
    pub async fn connect(addr: &str, username: &str) -> ChatResult<Self> {
        let stream = TcpStream::connect(addr)
            .await
            .map_err(|e| ChatError::Transport(format!("connect to {addr} failed: {e}")))?;
        if let Err(e) = stream.set_nodelay(true) {
            debug!(error = %e, "set_nodelay failed");
        }
        let (rd, wr) = stream.into_split();
        let mut reader = FrameReader::new(rd);
        let mut writer = FrameWriter::new(wr);

        writer
            .write_envelope(&Envelope::connect_request(username))
            .await?;

        let reply = match time::timeout(REGISTRATION_TIMEOUT, reader.read_envelope()).await {
            Ok(result) => result?,
            Err(_) => {
                return Err(ChatError::Transport(
                    "timed out waiting for registration reply".into(),
                ))
            }
        };

        match reply {
            Some(env) if env.msg_type() == MsgType::Connection => {
                info!(username, addr, "registered");
            }
            Some(env) if env.msg_type() == MsgType::InvalidUsername => {
                return Err(ChatError::InvalidUsername(env.body().to_string()));
            }
            Some(env) => {
                return Err(ChatError::Protocol(format!(
                    "unexpected {} reply to registration",
                    env.msg_type()
                )));
            }
            None => {
                return Err(ChatError::Transport(
                    "server closed the connection during registration".into(),
                ));
            }
        }

        let (tx, events) = mpsc::unbounded_channel();
        let reader_handle = tokio::spawn(read_loop(reader, tx));

        Ok(Self {
            username: username.to_string(),
            writer,
            events,
            reader_handle,
            users: Vec::new(),
        })
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    /// The most recent user list pushed by the server.
    pub fn users(&self) -> &[String] {
        &self.users
    }

    pub async fn send_chat(&mut self, body: &str) -> ChatResult<()> {
        self.writer
            .write_envelope(&Envelope::chat(&self.username, body))
            .await
    }

    pub async fn whisper(&mut self, to: &str, body: &str) -> ChatResult<()> {
        self.writer
            .write_envelope(&Envelope::whisper(&self.username, to, body))
            .await
    }

    /// Ask for the user list. Servers only answer when configured to.
    pub async fn request_users(&mut self) -> ChatResult<()> {
        self.writer.write_envelope(&Envelope::users_request()).await
    }

    /// Next event from the server, or `None` once the connection is closed.
    pub async fn next_event(&mut self) -> Option<ClientEvent> {
        let event = self.events.recv().await?;
        if let ClientEvent::Users(users) = &event {
            self.users = users.clone();
        }
        Some(event)
    }

    /// Close the connection and wait for the server to finish with it.
    pub async fn disconnect(mut self) -> ChatResult<()> {
        self.writer.shutdown().await?;
        if time::timeout(CLOSE_TIMEOUT, &mut self.reader_handle)
            .await
            .is_err()
        {
            warn!("server did not close the connection, aborting reader");
            self.reader_handle.abort();
        }
        info!(username = %self.username, "disconnected");
        Ok(())
    }
}

async fn read_loop(
    mut reader: FrameReader<OwnedReadHalf>,
    tx: mpsc::UnboundedSender<ClientEvent>,
) {
    loop {
        match reader.read_envelope().await {
            Ok(Some(env)) => {
                if tx.send(ClientEvent::from_envelope(&env)).is_err() {
                    // Client dropped.
                    return;
                }
            }
            Ok(None) => {
                debug!("server closed connection");
                return;
            }
            Err(e) if !e.is_fatal_to_connection() => {
                warn!(error = %e, "skipping malformed message");
            }
            Err(e) => {
                warn!(error = %e, "connection lost");
                return;
            }
        }
    }
}
