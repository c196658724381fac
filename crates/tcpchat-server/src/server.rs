//! Acceptor: owns the listener and spawns one [`Session`] per connection.
//!
//! The accept loop never waits on a session. Sessions run as independent
//! tasks, so a slow or failing peer cannot hold up later accepts.

use crate::config::ServerConfig;
use crate::routing::{Registry, Router};
use crate::session::Session;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tcpchat_core::{ChatError, ChatResult};
use tokio::net::TcpListener;
use tracing::{debug, error, info, warn};

/// Accept errors in a row after which the listener is considered broken.
pub const MAX_CONSECUTIVE_ACCEPT_FAILURES: u32 = 64;

/// Pause after a failed accept (e.g. out of file descriptors).
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// The tcpchat server instance.
pub struct ChatServer {
    config: ServerConfig,
    router: Arc<Router>,
    next_conn_id: AtomicU64,
}

impl ChatServer {
    pub fn new(config: ServerConfig) -> Self {
        let registry = Arc::new(Registry::new());
        let router = Arc::new(Router::new(registry, config.users_on_request));
        Self {
            config,
            router,
            next_conn_id: AtomicU64::new(1),
        }
    }

    /// Shared router; exposes the registry for inspection.
    pub fn router(&self) -> &Arc<Router> {
        &self.router
    }

    /// Bind the configured address.
    pub async fn bind(&self) -> ChatResult<TcpListener> {
        let addr = self.config.listen_addr();
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|e| ChatError::Transport(format!("bind {addr} failed: {e}")))?;
        info!(addr = %listener.local_addr()?, "listener started");
        Ok(listener)
    }

    /// Accept connections on `listener` until `shutdown` resolves.
    ///
    /// Returns an error only when the listener itself keeps failing.
    pub async fn run<F>(self, listener: TcpListener, shutdown: F) -> ChatResult<()>
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        let mut failures = 0u32;

        loop {
            tokio::select! {
                accepted = listener.accept() => match accepted {
                    Ok((stream, remote)) => {
                        failures = 0;
                        if let Err(e) = stream.set_nodelay(true) {
                            debug!(remote = %remote, error = %e, "set_nodelay failed");
                        }
                        let conn_id = self.next_conn_id.fetch_add(1, Ordering::Relaxed);
                        info!(conn_id, remote = %remote, "connection accepted");
                        let session = Session::new(conn_id, remote, self.router.clone());
                        tokio::spawn(session.run(stream));
                    }
                    Err(e) => {
                        failures += 1;
                        if failures >= MAX_CONSECUTIVE_ACCEPT_FAILURES {
                            error!(error = %e, failures, "listener keeps failing, giving up");
                            return Err(ChatError::Transport(format!("accept failed: {e}")));
                        }
                        warn!(error = %e, failures, "accept failed");
                        tokio::time::sleep(ACCEPT_BACKOFF).await;
                    }
                },
                _ = &mut shutdown => {
                    let users = self.router.registry().len().await;
                    info!(users, "acceptor shutting down");
                    return Ok(());
                }
            }
        }
    }
}
