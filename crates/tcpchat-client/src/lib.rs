//! tcpchat-client: async client library for tcpchat.
//!
//! ```no_run
//! use tcpchat_client::ChatClient;
//!
//! # async fn example() -> tcpchat_core::ChatResult<()> {
//! let mut client = ChatClient::connect("127.0.0.1:5000", "alice").await?;
//! client.send_chat("hello").await?;
//! while let Some(event) = client.next_event().await {
//!     println!("{event}");
//! }
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod event;

pub use client::ChatClient;
pub use event::ClientEvent;

pub use tcpchat_core::{ChatError, ChatResult};
