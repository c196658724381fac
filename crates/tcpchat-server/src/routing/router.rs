//! Dispatch rules for registered sessions.
//!
//! The router decides, for each envelope a registered session sends, who
//! receives what: chat is broadcast, whispers go to one receiver with an
//! echo to the sender, and joins and departures are announced to everyone
//! together with a fresh user list.

use super::registry::{Registry, SessionHandle};
use crate::session::User;
use std::sync::Arc;
use tcpchat_core::{validate_username, Envelope, MsgType, UsernameError};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// What the router did with one inbound envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dispatch {
    /// Broadcast to this many sessions.
    Broadcast(usize),
    /// Delivered to the receiver and echoed to the sender.
    Whispered,
    /// Answered only to the sender with an envelope of this type.
    Replied(MsgType),
    /// Dropped without reply.
    Ignored,
}

/// Routing policy layered on top of the [`Registry`].
pub struct Router {
    registry: Arc<Registry>,
    users_on_request: bool,
}

impl Router {
    /// Create a router over `registry`.
    ///
    /// With `users_on_request` set, registered clients may ask for the
    /// user list with a `USERS` envelope; otherwise lists are push-only.
    pub fn new(registry: Arc<Registry>, users_on_request: bool) -> Self {
        Self {
            registry,
            users_on_request,
        }
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Validate and admit a username.
    ///
    /// On success the `CONNECTION` acknowledgement is already queued on
    /// `tx`, the user is in the registry, and every member (the new one
    /// included) has been sent `NEW_USER` followed by `USERS`. On failure
    /// nothing is queued; the caller replies with the error text.
    pub async fn register(
        &self,
        user: User,
        conn_id: u64,
        tx: mpsc::UnboundedSender<Envelope>,
    ) -> Result<SessionHandle, UsernameError> {
        validate_username(&user.username)?;

        let handle = SessionHandle::new(user, conn_id, tx);
        let ack = Envelope::connection_ok(handle.username());
        if !self.registry.admit(handle.clone(), ack).await {
            return Err(UsernameError::Taken);
        }

        let delivered = self
            .registry
            .broadcast_membership(&Envelope::new_user(handle.username()))
            .await;
        debug!(username = %handle.username(), delivered, "announced new user");
        Ok(handle)
    }

    /// Route one envelope received from a registered session.
    pub async fn dispatch(&self, from: &SessionHandle, envelope: Envelope) -> Dispatch {
        match envelope.msg_type() {
            MsgType::Chat => self.chat(from, envelope).await,
            MsgType::Whisper => self.whisper(from, envelope).await,
            MsgType::Users if self.users_on_request => {
                let users = Envelope::users(self.registry.snapshot().await);
                reply(from, users)
            }
            other => {
                debug!(
                    username = %from.username(),
                    msg_type = %other,
                    "ignoring unexpected message type"
                );
                Dispatch::Ignored
            }
        }
    }

    async fn chat(&self, from: &SessionHandle, envelope: Envelope) -> Dispatch {
        if envelope.body().is_empty() {
            debug!(username = %from.username(), "ignoring empty chat message");
            return Dispatch::Ignored;
        }
        if envelope.sender() != Some(from.username()) {
            warn!(
                username = %from.username(),
                claimed = envelope.sender().unwrap_or("-"),
                "ignoring chat with mismatched sender"
            );
            return Dispatch::Ignored;
        }
        Dispatch::Broadcast(self.registry.broadcast(&envelope).await)
    }

    async fn whisper(&self, from: &SessionHandle, envelope: Envelope) -> Dispatch {
        if envelope.sender() != Some(from.username()) {
            return reply(
                from,
                Envelope::invalid_message("Sender does not match your username"),
            );
        }

        let Some(receiver) = envelope.receiver().map(str::to_string) else {
            return reply(from, Envelope::invalid_message("No receiver was specified"));
        };

        if !self.registry.contains(&receiver).await {
            return reply(
                from,
                Envelope::nonexistent_user(format!("User {receiver} does not exist")),
            );
        }

        if receiver == from.username() {
            return reply(from, Envelope::invalid_message("Cannot whisper to yourself"));
        }

        // The receiver may have left since the check above.
        if !self.registry.send_to(&receiver, envelope.clone()).await {
            return reply(
                from,
                Envelope::nonexistent_user(format!("User {receiver} does not exist")),
            );
        }

        if let Err(e) = from.send(envelope) {
            debug!(username = %from.username(), error = %e, "whisper echo not queued");
        }
        Dispatch::Whispered
    }

    /// Remove `username` and tell everyone left.
    ///
    /// Safe to call repeatedly: only the call that actually removed the
    /// entry announces the departure.
    pub async fn depart(&self, username: &str) -> bool {
        if !self.registry.remove(username).await {
            return false;
        }
        let delivered = self
            .registry
            .broadcast_membership(&Envelope::disconnection(username))
            .await;
        info!(username, notified = delivered, "user disconnected");
        true
    }
}

fn reply(to: &SessionHandle, envelope: Envelope) -> Dispatch {
    let msg_type = envelope.msg_type();
    match to.send(envelope) {
        Ok(()) => Dispatch::Replied(msg_type),
        Err(e) => {
            debug!(username = %to.username(), error = %e, "reply not queued");
            Dispatch::Ignored
        }
    }
}
