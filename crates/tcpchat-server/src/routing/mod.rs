//! User registry and message routing.

pub mod registry;
pub mod router;

pub use registry::{Registry, SessionHandle};
pub use router::{Dispatch, Router};
