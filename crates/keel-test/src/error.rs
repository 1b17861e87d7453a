//! Test error types.

use thiserror::Error;

/// Errors that can occur during testing.
#[derive(Debug, Error)]
pub enum TestError {
    /// Request building failed
    #[error("Request build error: {0}")]
    RequestBuild(String),

    /// Connecting to the server failed
    #[error("Connect error: {0}")]
    Connect(#[from] std::io::Error),

    /// The HTTP exchange failed
    #[error("HTTP error: {0}")]
    Http(#[from] hyper::Error),

    /// Response body reading failed
    #[error("Body read error: {0}")]
    BodyRead(String),

    /// The background connection task failed
    #[error("Connection task failed: {0}")]
    Task(String),
}
