//! tcpchat-server: multi-user text chat over TCP.
//!
//! An acceptor spawns a session per connection; sessions register a unique
//! username and hand every inbound envelope to the router, which fans it out
//! through the shared registry.

pub mod config;
pub mod routing;
pub mod server;
pub mod session;

pub use config::ServerConfig;
pub use routing::{Dispatch, Registry, Router, SessionHandle};
pub use server::ChatServer;
pub use session::{Session, SessionState, User};
