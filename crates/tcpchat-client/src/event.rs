//! Events surfaced to client applications.

use std::fmt;
use tcpchat_core::{Envelope, MsgType};

/// One server message, interpreted from the client's point of view.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    /// Public chat line (including our own, echoed back).
    Chat { from: String, body: String },
    /// Private message, either to us or our own echoed back.
    Whisper {
        from: String,
        to: String,
        body: String,
    },
    /// A user registered.
    Joined(String),
    /// A user left.
    Left(String),
    /// Full list of registered users.
    Users(Vec<String>),
    /// The server refused a message we sent.
    InvalidMessage(String),
    /// A whisper target does not exist.
    NonexistentUser(String),
    /// Registration was refused after the fact; not normally seen once
    /// connected.
    Rejected(String),
    /// Anything this client does not interpret.
    Unknown(MsgType),
}

impl ClientEvent {
    pub fn from_envelope(env: &Envelope) -> Self {
        let body = env.body().to_string();
        match env.msg_type() {
            MsgType::Chat => Self::Chat {
                from: env.sender().unwrap_or_default().to_string(),
                body,
            },
            MsgType::Whisper => Self::Whisper {
                from: env.sender().unwrap_or_default().to_string(),
                to: env.receiver().unwrap_or_default().to_string(),
                body,
            },
            MsgType::NewUser => Self::Joined(env.sender().map(str::to_string).unwrap_or(body)),
            MsgType::Disconnection => Self::Left(body),
            MsgType::Users => Self::Users(env.user_list()),
            MsgType::InvalidMessage => Self::InvalidMessage(body),
            MsgType::NonexistentUser => Self::NonexistentUser(body),
            MsgType::InvalidUsername => Self::Rejected(body),
            other => Self::Unknown(other),
        }
    }
}

impl fmt::Display for ClientEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Chat { from, body } => write!(f, "[{from}] {body}"),
            Self::Whisper { from, to, body } => write!(f, "[{from} -> {to}] {body}"),
            Self::Joined(user) => write!(f, "* {user} joined"),
            Self::Left(user) => write!(f, "* {user} left"),
            Self::Users(users) => write!(f, "* online: {}", users.join(", ")),
            Self::InvalidMessage(reason) => write!(f, "! {reason}"),
            Self::NonexistentUser(reason) => write!(f, "! {reason}"),
            Self::Rejected(reason) => write!(f, "! rejected: {reason}"),
            Self::Unknown(t) => write!(f, "? unexpected {t} message"),
        }
    }
}
