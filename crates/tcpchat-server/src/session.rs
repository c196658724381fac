//! Per-connection session.
//!
//! A session owns one client connection. It reads the registration request,
//! then loops reading envelopes and handing them to the [`Router`] until the
//! peer goes away, and finally tears itself down. Writes go through an
//! outbound queue drained by a dedicated writer task, so a slow peer only
//! ever stalls its own writer.

use crate::routing::{Router, SessionHandle};
use std::net::SocketAddr;
use std::sync::Arc;
use tcpchat_core::{Envelope, FrameReader, FrameWriter, MsgType};
use tokio::io::{AsyncRead, AsyncWrite, ReadHalf, WriteHalf};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// A registered chat participant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    pub username: String,
    pub peer_addr: SocketAddr,
}

impl User {
    pub fn new(username: impl Into<String>, peer_addr: SocketAddr) -> Self {
        Self {
            username: username.into(),
            peer_addr,
        }
    }
}

/// Lifecycle of a session. `Disconnected` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Unregistered,
    Registered,
    Disconnected,
}

/// Server side of one client connection.
pub struct Session {
    conn_id: u64,
    peer_addr: SocketAddr,
    state: SessionState,
    router: Arc<Router>,
    /// Own outbound queue; dropped on teardown so the writer can finish.
    outbound: Option<mpsc::UnboundedSender<Envelope>>,
    /// Set once registration succeeds.
    handle: Option<SessionHandle>,
}

impl Session {
    pub fn new(conn_id: u64, peer_addr: SocketAddr, router: Arc<Router>) -> Self {
        Self {
            conn_id,
            peer_addr,
            state: SessionState::Unregistered,
            router,
            outbound: None,
            handle: None,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Drive the connection to completion.
    ///
    /// Never returns an error: every failure ends in teardown of this
    /// session only.
    pub async fn run<S>(mut self, stream: S)
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (read_half, write_half) = tokio::io::split(stream);
        let (tx, rx) = mpsc::unbounded_channel::<Envelope>();
        self.outbound = Some(tx);

        let mut writer = tokio::spawn(write_loop(
            FrameWriter::new(write_half),
            rx,
            self.conn_id,
        ));

        let mut reader = FrameReader::new(read_half);
        let mut writer_done = false;
        if self.register(&mut reader).await {
            writer_done = self.receive_loop(&mut reader, &mut writer).await;
        }
        self.teardown().await;

        // Let queued replies (e.g. INVALID_USERNAME) reach the peer.
        if !writer_done {
            if let Err(e) = writer.await {
                warn!(conn_id = self.conn_id, error = %e, "writer task failed");
            }
        }
        debug!(conn_id = self.conn_id, remote = %self.peer_addr, "session finished");
    }

    /// One-shot username negotiation. Returns whether the session is now
    /// registered.
    async fn register<S: AsyncRead>(&mut self, reader: &mut FrameReader<ReadHalf<S>>) -> bool {
        let request = match reader.read_envelope().await {
            Ok(Some(env)) => env,
            Ok(None) => {
                debug!(conn_id = self.conn_id, "peer closed before registering");
                return false;
            }
            Err(e) if !e.is_fatal_to_connection() => {
                warn!(conn_id = self.conn_id, error = %e, "malformed registration message");
                self.send_own(Envelope::invalid_username("Malformed registration message"));
                return false;
            }
            Err(e) => {
                debug!(conn_id = self.conn_id, error = %e, "read failed before registering");
                return false;
            }
        };

        if request.msg_type() != MsgType::Connection {
            warn!(
                conn_id = self.conn_id,
                msg_type = %request.msg_type(),
                "first message was not a registration request"
            );
            self.send_own(Envelope::invalid_username(
                "Expected a CONNECTION message with a username",
            ));
            return false;
        }

        let Some(tx) = self.outbound.clone() else {
            return false;
        };
        let user = User::new(request.body(), self.peer_addr);
        match self.router.register(user, self.conn_id, tx).await {
            Ok(handle) => {
                self.state = SessionState::Registered;
                self.handle = Some(handle);
                true
            }
            Err(reason) => {
                info!(
                    conn_id = self.conn_id,
                    remote = %self.peer_addr,
                    requested = %request.body(),
                    reason = %reason,
                    "registration refused"
                );
                self.send_own(Envelope::invalid_username(reason.to_string()));
                false
            }
        }
    }

    /// Dispatch inbound envelopes until the peer goes away or the writer
    /// task stops. Returns whether the writer has already finished.
    async fn receive_loop<S: AsyncRead>(
        &mut self,
        reader: &mut FrameReader<ReadHalf<S>>,
        writer: &mut JoinHandle<()>,
    ) -> bool {
        let Some(handle) = self.handle.clone() else {
            return false;
        };
        loop {
            let received = tokio::select! {
                received = reader.read_envelope() => received,
                joined = &mut *writer => {
                    if let Err(e) = joined {
                        warn!(username = %handle.username(), error = %e, "writer task failed");
                    }
                    debug!(username = %handle.username(), "writer stopped, closing session");
                    return true;
                }
            };
            match received {
                Ok(Some(envelope)) => {
                    let outcome = self.router.dispatch(&handle, envelope).await;
                    debug!(username = %handle.username(), ?outcome, "dispatched");
                }
                Ok(None) => {
                    debug!(username = %handle.username(), "peer closed connection");
                    return false;
                }
                Err(e) if !e.is_fatal_to_connection() => {
                    warn!(username = %handle.username(), error = %e, "dropping malformed message");
                }
                Err(e) => {
                    debug!(username = %handle.username(), error = %e, "receive failed");
                    return false;
                }
            }
        }
    }

    /// Move to `Disconnected`: release the connection, leave the registry and
    /// announce the departure. Repeated calls do nothing.
    async fn teardown(&mut self) {
        if self.state == SessionState::Disconnected {
            return;
        }
        let was_registered = self.state == SessionState::Registered;
        self.state = SessionState::Disconnected;

        // The writer ends once every sender is gone: ours here, the
        // registry's copy when the user is removed below.
        self.outbound = None;
        if let Some(handle) = self.handle.take() {
            if was_registered {
                self.router.depart(handle.username()).await;
            }
        }
        debug!(conn_id = self.conn_id, remote = %self.peer_addr, "session torn down");
    }

    fn send_own(&self, envelope: Envelope) {
        if let Some(tx) = &self.outbound {
            if tx.send(envelope).is_err() {
                debug!(conn_id = self.conn_id, "outbound queue already closed");
            }
        }
    }
}

/// Drain the outbound queue onto the socket until every sender is dropped
/// or a write fails.
async fn write_loop<W: AsyncWrite>(
    mut writer: FrameWriter<WriteHalf<W>>,
    mut rx: mpsc::UnboundedReceiver<Envelope>,
    conn_id: u64,
) {
    while let Some(envelope) = rx.recv().await {
        if let Err(e) = writer.write_envelope(&envelope).await {
            debug!(conn_id, error = %e, "write failed, closing writer");
            return;
        }
    }
    if let Err(e) = writer.shutdown().await {
        debug!(conn_id, error = %e, "shutdown failed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routing::Registry;
    use std::io;
    use std::pin::Pin;
    use std::task::{Context, Poll};
    use tcpchat_core::{frame_encode, MAX_FRAME_LEN};
    use tokio::io::{AsyncWriteExt, DuplexStream, ReadBuf};

    struct Peer {
        reader: FrameReader<ReadHalf<DuplexStream>>,
        writer: WriteHalf<DuplexStream>,
    }

    impl Peer {
        async fn send(&mut self, env: Envelope) {
            let frame = frame_encode(&env).unwrap();
            self.writer.write_all(&frame).await.unwrap();
        }

        async fn recv(&mut self) -> Option<Envelope> {
            self.reader.read_envelope().await.unwrap()
        }

        async fn recv_type(&mut self) -> MsgType {
            self.recv().await.unwrap().msg_type()
        }

        async fn register(&mut self, name: &str) {
            self.send(Envelope::connect_request(name)).await;
            assert_eq!(self.recv_type().await, MsgType::Connection);
            assert_eq!(self.recv_type().await, MsgType::NewUser);
            assert_eq!(self.recv_type().await, MsgType::Users);
        }
    }

    fn spawn_session(router: &Arc<Router>, conn_id: u64) -> (Peer, tokio::task::JoinHandle<()>) {
        let (client, server) = tokio::io::duplex(4096);
        let session = Session::new(conn_id, "127.0.0.1:40000".parse().unwrap(), router.clone());
        let task = tokio::spawn(session.run(server));
        let (rd, wr) = tokio::io::split(client);
        let peer = Peer {
            reader: FrameReader::new(rd),
            writer: wr,
        };
        (peer, task)
    }

    fn router() -> Arc<Router> {
        Arc::new(Router::new(Arc::new(Registry::new()), false))
    }

    #[tokio::test]
    async fn registers_and_receives_announcements() {
        let router = router();
        let (mut peer, _task) = spawn_session(&router, 1);
        peer.send(Envelope::connect_request("alice")).await;

        let ack = peer.recv().await.unwrap();
        assert_eq!(ack.msg_type(), MsgType::Connection);
        assert_eq!(ack.receiver(), Some("alice"));
        assert_eq!(peer.recv_type().await, MsgType::NewUser);
        let users = peer.recv().await.unwrap();
        assert_eq!(users.user_list(), vec!["alice"]);
        assert!(router.registry().contains("alice").await);
    }

    #[tokio::test]
    async fn invalid_username_is_reported_then_closed() {
        let router = router();
        let (mut peer, task) = spawn_session(&router, 1);
        peer.send(Envelope::connect_request("AB")).await;

        let reply = peer.recv().await.unwrap();
        assert_eq!(reply.msg_type(), MsgType::InvalidUsername);
        assert!(reply.body().contains("lowercase"));
        assert!(peer.recv().await.is_none());
        task.await.unwrap();
        assert!(router.registry().is_empty().await);
    }

    #[tokio::test]
    async fn non_connection_first_message_is_refused() {
        let router = router();
        let (mut peer, task) = spawn_session(&router, 1);
        peer.send(Envelope::chat("alice", "hi")).await;

        assert_eq!(peer.recv_type().await, MsgType::InvalidUsername);
        assert!(peer.recv().await.is_none());
        task.await.unwrap();
    }

    #[tokio::test]
    async fn malformed_message_keeps_session_alive() {
        let router = router();
        let (mut peer, _task) = spawn_session(&router, 1);
        peer.register("alice").await;

        // Well framed, but not an envelope.
        let garbage = [0xffu8, 0xff, 0xff];
        peer.writer
            .write_all(&(garbage.len() as u32).to_be_bytes())
            .await
            .unwrap();
        peer.writer.write_all(&garbage).await.unwrap();
        peer.send(Envelope::chat("alice", "after garbage")).await;

        let echoed = peer.recv().await.unwrap();
        assert_eq!(echoed.body(), "after garbage");
        assert!(router.registry().contains("alice").await);
    }

    #[tokio::test]
    async fn disconnect_cleans_up_and_notifies() {
        let router = router();
        let (mut alice, alice_task) = spawn_session(&router, 1);
        alice.register("alice").await;
        let (mut bob, _bob_task) = spawn_session(&router, 2);
        bob.register("bob").await;

        // alice hears about bob.
        assert_eq!(alice.recv_type().await, MsgType::NewUser);
        assert_eq!(alice.recv_type().await, MsgType::Users);

        alice.writer.shutdown().await.unwrap();
        drop(alice);
        alice_task.await.unwrap();

        assert!(!router.registry().contains("alice").await);
        let notice = bob.recv().await.unwrap();
        assert_eq!(notice.msg_type(), MsgType::Disconnection);
        assert_eq!(notice.body(), "alice");
        let users = bob.recv().await.unwrap();
        assert_eq!(users.user_list(), vec!["bob"]);
    }

    #[tokio::test]
    async fn teardown_is_idempotent() {
        let router = router();
        let (tx, _rx) = mpsc::unbounded_channel();
        let user = User::new("alice", "127.0.0.1:1".parse().unwrap());
        let handle = router.register(user, 7, tx.clone()).await.unwrap();

        let mut session = Session::new(7, "127.0.0.1:1".parse().unwrap(), router.clone());
        session.outbound = Some(tx);
        session.handle = Some(handle);
        session.state = SessionState::Registered;

        session.teardown().await;
        assert_eq!(session.state(), SessionState::Disconnected);
        assert!(!router.registry().contains("alice").await);

        // A newcomer takes the name; a second teardown must not evict them.
        let (tx2, _rx2) = mpsc::unbounded_channel();
        let user = User::new("alice", "127.0.0.1:2".parse().unwrap());
        router.register(user, 8, tx2).await.unwrap();
        session.teardown().await;
        assert!(router.registry().contains("alice").await);
    }

    fn oversize_prefix() -> [u8; 4] {
        (MAX_FRAME_LEN as u32 + 1).to_be_bytes()
    }

    #[tokio::test]
    async fn frames_ahead_of_a_bad_frame_are_still_handled() {
        let router = router();
        let (mut peer, task) = spawn_session(&router, 1);

        let mut bytes = frame_encode(&Envelope::connect_request("alice")).unwrap();
        bytes.extend(frame_encode(&Envelope::chat("alice", "before")).unwrap());
        bytes.extend_from_slice(&oversize_prefix());
        peer.writer.write_all(&bytes).await.unwrap();

        assert_eq!(peer.recv_type().await, MsgType::Connection);
        assert_eq!(peer.recv_type().await, MsgType::NewUser);
        assert_eq!(peer.recv_type().await, MsgType::Users);
        assert_eq!(peer.recv().await.unwrap().body(), "before");
        assert!(peer.recv().await.is_none());
        task.await.unwrap();
        assert!(router.registry().is_empty().await);
    }

    #[tokio::test]
    async fn bad_frame_tears_down_and_notifies_others() {
        let router = router();
        let (mut alice, alice_task) = spawn_session(&router, 1);
        alice.register("alice").await;
        let (mut bob, _bob_task) = spawn_session(&router, 2);
        bob.register("bob").await;

        // alice's write side stays open; only the frame is bad.
        let mut bytes = frame_encode(&Envelope::chat("alice", "last words")).unwrap();
        bytes.extend_from_slice(&oversize_prefix());
        alice.writer.write_all(&bytes).await.unwrap();
        alice_task.await.unwrap();

        assert!(!router.registry().contains("alice").await);
        assert_eq!(bob.recv().await.unwrap().body(), "last words");
        let notice = bob.recv().await.unwrap();
        assert_eq!(notice.msg_type(), MsgType::Disconnection);
        assert_eq!(notice.body(), "alice");
        let users = bob.recv().await.unwrap();
        assert_eq!(users.msg_type(), MsgType::Users);
        assert_eq!(users.user_list(), vec!["bob"]);
    }

    /// Reads from a pipe; every write fails.
    struct WriteFails(DuplexStream);

    impl AsyncRead for WriteFails {
        fn poll_read(
            mut self: Pin<&mut Self>,
            cx: &mut Context<'_>,
            buf: &mut ReadBuf<'_>,
        ) -> Poll<io::Result<()>> {
            Pin::new(&mut self.0).poll_read(cx, buf)
        }
    }

    impl AsyncWrite for WriteFails {
        fn poll_write(
            self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            _buf: &[u8],
        ) -> Poll<io::Result<usize>> {
            Poll::Ready(Err(io::ErrorKind::BrokenPipe.into()))
        }

        fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }

        fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }
    }

    #[tokio::test]
    async fn write_failure_ends_the_session() {
        let router = router();
        let (mut client, server) = tokio::io::duplex(4096);
        let session = Session::new(1, "127.0.0.1:40000".parse().unwrap(), router.clone());
        let task = tokio::spawn(session.run(WriteFails(server)));

        let frame = frame_encode(&Envelope::connect_request("alice")).unwrap();
        client.write_all(&frame).await.unwrap();

        // The client never closes; the failed ack write must end the session.
        tokio::time::timeout(std::time::Duration::from_secs(5), task)
            .await
            .expect("session should end after its writer fails")
            .unwrap();
        assert!(!router.registry().contains("alice").await);
    }
}
