//! Registry of connected users.
//!
//! Maps each registered username to the outbound queue of the session that
//! owns it. A single lock covers the whole table: membership is small and
//! every operation under the lock only enqueues, it never touches a socket.

use crate::session::User;
use std::collections::BTreeMap;
use tcpchat_core::{ChatError, ChatResult, Envelope};
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info, warn};

/// Handle through which the router reaches one registered session.
///
/// Sending only enqueues onto the session's outbound queue; that session's
/// writer task owns the socket.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    user: User,
    conn_id: u64,
    tx: mpsc::UnboundedSender<Envelope>,
}

impl SessionHandle {
    pub fn new(user: User, conn_id: u64, tx: mpsc::UnboundedSender<Envelope>) -> Self {
        Self { user, conn_id, tx }
    }

    pub fn username(&self) -> &str {
        &self.user.username
    }

    pub fn user(&self) -> &User {
        &self.user
    }

    pub fn conn_id(&self) -> u64 {
        self.conn_id
    }

    /// Queue an envelope for this session.
    ///
    /// Fails only once the session's writer has gone away.
    pub fn send(&self, envelope: Envelope) -> ChatResult<()> {
        self.tx.send(envelope).map_err(|_| {
            ChatError::Transport(format!(
                "outbound queue closed for {} (conn {})",
                self.user.username, self.conn_id
            ))
        })
    }
}

/// The table of registered sessions, keyed by username.
pub struct Registry {
    sessions: Mutex<BTreeMap<String, SessionHandle>>,
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl Registry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self {
            sessions: Mutex::new(BTreeMap::new()),
        }
    }

    /// Insert a session under its username unless the name is taken.
    ///
    /// This is the only admission path: the check and the insert happen
    /// under one lock, so two sessions racing for the same name cannot both
    /// win. Returns `false` without touching the table if the name exists.
    pub async fn insert(&self, session: SessionHandle) -> bool {
        let mut sessions = self.sessions.lock().await;
        Self::insert_locked(&mut sessions, session)
    }

    /// Like [`Registry::insert`], but queue `ack` to the session before it
    /// becomes visible to any broadcast.
    ///
    /// The new member therefore always sees its acknowledgement first.
    pub async fn admit(&self, session: SessionHandle, ack: Envelope) -> bool {
        let mut sessions = self.sessions.lock().await;
        if sessions.contains_key(session.username()) {
            return false;
        }
        if let Err(e) = session.send(ack) {
            debug!(username = %session.username(), error = %e, "ack not queued");
        }
        Self::insert_locked(&mut sessions, session)
    }

    fn insert_locked(
        sessions: &mut BTreeMap<String, SessionHandle>,
        session: SessionHandle,
    ) -> bool {
        if sessions.contains_key(session.username()) {
            return false;
        }
        info!(
            username = %session.username(),
            conn_id = session.conn_id(),
            remote = %session.user().peer_addr,
            "user registered"
        );
        sessions.insert(session.username().to_string(), session);
        true
    }

    /// Remove a username. Removing an absent name is a no-op.
    ///
    /// Returns whether an entry was removed.
    pub async fn remove(&self, username: &str) -> bool {
        let mut sessions = self.sessions.lock().await;
        let removed = sessions.remove(username).is_some();
        if removed {
            debug!(username, remaining = sessions.len(), "user unregistered");
        }
        removed
    }

    pub async fn contains(&self, username: &str) -> bool {
        self.sessions.lock().await.contains_key(username)
    }

    /// Point-in-time copy of the registered usernames, sorted.
    pub async fn snapshot(&self) -> Vec<String> {
        self.sessions.lock().await.keys().cloned().collect()
    }

    /// Deliver `envelope` to every registered session.
    ///
    /// A session whose queue is gone is logged and skipped; the remaining
    /// sessions still receive their copy. Returns the number of sessions the
    /// envelope was queued for.
    pub async fn broadcast(&self, envelope: &Envelope) -> usize {
        let sessions = self.sessions.lock().await;
        Self::broadcast_locked(&sessions, envelope)
    }

    /// Deliver `notice` followed by a `USERS` list to every session.
    ///
    /// The list is taken under the same lock as the fan-out, so the last
    /// list each member receives always reflects the current table.
    pub async fn broadcast_membership(&self, notice: &Envelope) -> usize {
        let sessions = self.sessions.lock().await;
        let users = Envelope::users(sessions.keys());
        let delivered = Self::broadcast_locked(&sessions, notice);
        Self::broadcast_locked(&sessions, &users);
        delivered
    }

    fn broadcast_locked(sessions: &BTreeMap<String, SessionHandle>, envelope: &Envelope) -> usize {
        let mut delivered = 0;
        for session in sessions.values() {
            match session.send(envelope.clone()) {
                Ok(()) => delivered += 1,
                Err(e) => {
                    warn!(username = %session.username(), error = %e, "broadcast delivery failed")
                }
            }
        }
        delivered
    }

    /// Send directly to one user.
    ///
    /// Returns `false` if the user is not registered (or disconnected
    /// between lookup and send).
    pub async fn send_to(&self, username: &str, envelope: Envelope) -> bool {
        let sessions = self.sessions.lock().await;
        match sessions.get(username) {
            Some(session) => match session.send(envelope) {
                Ok(()) => true,
                Err(e) => {
                    warn!(username, error = %e, "direct delivery failed");
                    false
                }
            },
            None => false,
        }
    }

    /// Number of registered users.
    pub async fn len(&self) -> usize {
        self.sessions.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.lock().await.is_empty()
    }
}
