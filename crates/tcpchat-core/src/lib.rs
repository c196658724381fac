//! tcpchat-core: Shared protocol library for tcpchat.
//!
//! Provides the message envelope, username rules, length-prefixed CBOR
//! framing and async frame reader/writer used by both server and client.

pub mod codec;
pub mod error;
pub mod messages;
pub mod transport;
pub mod username;

// Re-export commonly used items at crate root.
pub use codec::{cbor_decode, frame_encode, FrameDecoder, MAX_FRAME_LEN};
pub use error::{ChatError, ChatResult};
pub use messages::{Envelope, MsgType, USERS_DELIMITER};
pub use transport::{FrameReader, FrameWriter};
pub use username::{validate_username, UsernameError, MIN_USERNAME_LEN};
