//! tcpchat message envelope and type tags.
//!
//! Every frame on the wire carries exactly one [`Envelope`]. The envelope is
//! immutable once built; use the typed constructors rather than assembling
//! fields by hand.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Separator used in the body of a `USERS` envelope.
///
/// Never valid inside a username, see [`crate::username`].
pub const USERS_DELIMITER: char = ',';

/// Numeric message type tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
#[repr(u8)]
pub enum MsgType {
    Connection = 0x01,
    Disconnection = 0x02,
    NewUser = 0x03,
    Users = 0x04,

    Chat = 0x10,
    Whisper = 0x11,

    InvalidUsername = 0x20,
    InvalidMessage = 0x21,
    NonexistentUser = 0x22,
}

impl From<MsgType> for u8 {
    fn from(m: MsgType) -> u8 {
        m as u8
    }
}

impl TryFrom<u8> for MsgType {
    type Error = String;
    fn try_from(v: u8) -> Result<Self, String> {
        match v {
            0x01 => Ok(Self::Connection),
            0x02 => Ok(Self::Disconnection),
            0x03 => Ok(Self::NewUser),
            0x04 => Ok(Self::Users),
            0x10 => Ok(Self::Chat),
            0x11 => Ok(Self::Whisper),
            0x20 => Ok(Self::InvalidUsername),
            0x21 => Ok(Self::InvalidMessage),
            0x22 => Ok(Self::NonexistentUser),
            _ => Err(format!("unknown message type: 0x{v:02x}")),
        }
    }
}

impl fmt::Display for MsgType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Connection => "CONNECTION",
            Self::Disconnection => "DISCONNECTION",
            Self::NewUser => "NEW_USER",
            Self::Users => "USERS",
            Self::Chat => "CHAT",
            Self::Whisper => "WHISPER",
            Self::InvalidUsername => "INVALID_USERNAME",
            Self::InvalidMessage => "INVALID_MESSAGE",
            Self::NonexistentUser => "NONEXISTENT_USER",
        };
        f.write_str(name)
    }
}

/// A single chat protocol message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    msg_type: MsgType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    sender: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    receiver: Option<String>,
    #[serde(default)]
    body: String,
}

impl Envelope {
    pub fn new(
        msg_type: MsgType,
        sender: Option<String>,
        receiver: Option<String>,
        body: impl Into<String>,
    ) -> Self {
        Self {
            msg_type,
            sender,
            receiver,
            body: body.into(),
        }
    }

    // ── Client → server ───────────────────────────────────────────────

    /// Registration request: the body is the requested username.
    pub fn connect_request(username: impl Into<String>) -> Self {
        Self::new(MsgType::Connection, None, None, username)
    }

    pub fn chat(sender: impl Into<String>, body: impl Into<String>) -> Self {
        Self::new(MsgType::Chat, Some(sender.into()), None, body)
    }

    pub fn whisper(
        sender: impl Into<String>,
        receiver: impl Into<String>,
        body: impl Into<String>,
    ) -> Self {
        Self::new(
            MsgType::Whisper,
            Some(sender.into()),
            Some(receiver.into()),
            body,
        )
    }

    /// Ask the server for the current user list (pull extension).
    pub fn users_request() -> Self {
        Self::new(MsgType::Users, None, None, "")
    }

    // ── Server → client ───────────────────────────────────────────────

    /// Registration accepted for `username`.
    pub fn connection_ok(username: impl Into<String>) -> Self {
        Self::new(
            MsgType::Connection,
            None,
            Some(username.into()),
            "Connected to server",
        )
    }

    pub fn new_user(username: &str) -> Self {
        Self::new(
            MsgType::NewUser,
            Some(username.to_string()),
            None,
            format!("User '{username}' connected"),
        )
    }

    /// Departure notice; the body is the departed username.
    pub fn disconnection(username: &str) -> Self {
        Self::new(MsgType::Disconnection, None, None, username)
    }

    pub fn users<I, S>(usernames: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let body = usernames
            .into_iter()
            .map(|u| u.as_ref().to_string())
            .collect::<Vec<_>>()
            .join(&USERS_DELIMITER.to_string());
        Self::new(MsgType::Users, None, None, body)
    }

    pub fn invalid_username(reason: impl Into<String>) -> Self {
        Self::new(MsgType::InvalidUsername, None, None, reason)
    }

    pub fn invalid_message(reason: impl Into<String>) -> Self {
        Self::new(MsgType::InvalidMessage, None, None, reason)
    }

    pub fn nonexistent_user(reason: impl Into<String>) -> Self {
        Self::new(MsgType::NonexistentUser, None, None, reason)
    }

    // ── Accessors ─────────────────────────────────────────────────────

    pub fn msg_type(&self) -> MsgType {
        self.msg_type
    }

    /// Sender username, treating an empty string as absent.
    pub fn sender(&self) -> Option<&str> {
        self.sender.as_deref().filter(|s| !s.is_empty())
    }

    /// Receiver username, treating an empty string as absent.
    pub fn receiver(&self) -> Option<&str> {
        self.receiver.as_deref().filter(|r| !r.is_empty())
    }

    pub fn body(&self) -> &str {
        &self.body
    }

    /// Split the body of a `USERS` envelope into usernames.
    pub fn user_list(&self) -> Vec<String> {
        self.body
            .split(USERS_DELIMITER)
            .filter(|u| !u.is_empty())
            .map(str::to_string)
            .collect()
    }
}

impl fmt::Display for Envelope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} from={} to={} body={:?}",
            self.msg_type,
            self.sender().unwrap_or("-"),
            self.receiver().unwrap_or("-"),
            self.body
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::cbor_decode;

    #[test]
    fn msg_type_tags_are_stable() {
        assert_eq!(u8::from(MsgType::Connection), 0x01);
        assert_eq!(u8::from(MsgType::Whisper), 0x11);
        assert_eq!(MsgType::try_from(0x22).unwrap(), MsgType::NonexistentUser);
        assert!(MsgType::try_from(0x99).is_err());
    }

    #[test]
    fn users_body_is_comma_joined() {
        let env = Envelope::users(["alice", "bob"]);
        assert_eq!(env.msg_type(), MsgType::Users);
        assert_eq!(env.body(), "alice,bob");
        assert_eq!(env.user_list(), vec!["alice", "bob"]);
    }

    #[test]
    fn empty_users_list() {
        let env = Envelope::users(Vec::<String>::new());
        assert_eq!(env.body(), "");
        assert!(env.user_list().is_empty());
    }

    #[test]
    fn empty_receiver_reads_as_absent() {
        let env = Envelope::whisper("alice", "", "hi");
        assert_eq!(env.sender(), Some("alice"));
        assert_eq!(env.receiver(), None);
    }

    #[test]
    fn unknown_tag_fails_to_decode() {
        #[derive(Serialize)]
        struct Raw {
            #[serde(rename = "type")]
            msg_type: u8,
            body: String,
        }
        let mut bytes = Vec::new();
        ciborium::into_writer(
            &Raw {
                msg_type: 0x7f,
                body: "x".into(),
            },
            &mut bytes,
        )
        .unwrap();
        assert!(cbor_decode::<Envelope>(&bytes).is_err());
    }

    #[test]
    fn missing_optional_fields_decode() {
        #[derive(Serialize)]
        struct Raw {
            #[serde(rename = "type")]
            msg_type: u8,
        }
        let mut bytes = Vec::new();
        ciborium::into_writer(&Raw { msg_type: 0x04 }, &mut bytes).unwrap();
        let env: Envelope = cbor_decode(&bytes).unwrap();
        assert_eq!(env.msg_type(), MsgType::Users);
        assert_eq!(env.sender(), None);
        assert_eq!(env.body(), "");
    }
}
