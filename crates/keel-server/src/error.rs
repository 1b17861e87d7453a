//! Server error types.

use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use thiserror::Error;

/// Errors returned while configuring or running a [`Server`](crate::Server).
#[derive(Debug, Error)]
pub enum ServerError {
    /// The configuration was rejected before serving started.
    #[error("invalid server configuration: {0}")]
    Config(String),

    /// The listener could not be bound.
    #[error("failed to bind to {addr}: {source}")]
    Bind {
        /// Address that was requested.
        addr: String,
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },

    /// The accept loop failed with a non-transient error.
    #[error("accept failed on {addr}: {source}")]
    Accept {
        /// Local address of the listener.
        addr: SocketAddr,
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },

    /// The TLS certificate or key could not be loaded.
    #[error("failed to load TLS material: {0}")]
    Tls(String),

    /// In-flight connections did not finish within the shutdown timeout.
    #[error("graceful shutdown timed out after {timeout:?} with {active} connection(s) still open")]
    ShutdownTimeout {
        /// The configured shutdown timeout.
        timeout: Duration,
        /// Connections still open when the timeout expired.
        active: usize,
    },

    /// The server address is empty or cannot be resolved.
    #[error("invalid server address: {0:?}")]
    InvalidAddress(String),
}

impl ServerError {
    /// Returns `true` for errors raised before any connection was accepted.
    #[must_use]
    pub fn is_startup(&self) -> bool {
        matches!(
            self,
            Self::Config(_) | Self::Bind { .. } | Self::Tls(_) | Self::InvalidAddress(_)
        )
    }
}
