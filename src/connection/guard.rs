// src/connection/guard.rs

//! Defines `ConnectionGuard`, an RAII guard for connection resource accounting.

use crate::core::metrics;
use tracing::debug;

/// Tracks one open backend socket. Created when a connect succeeds and carried
/// alongside the socket halves; dropping it (on close, on error, or when the
/// owning channel is dropped) releases the accounting exactly once.
#[derive(Debug)]
pub struct ConnectionGuard {
    /// The diagnostic description of the remote endpoint.
    pub(crate) endpoint: String,
}

impl ConnectionGuard {
    pub(crate) fn new(endpoint: String) -> Self {
        metrics::OPEN_CONNECTIONS.inc();
        debug!("Opened backend connection to {}", endpoint);
        Self { endpoint }
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        metrics::OPEN_CONNECTIONS.dec();
        debug!(
            "ConnectionGuard dropping, released connection to {}",
            self.endpoint
        );
    }
}
