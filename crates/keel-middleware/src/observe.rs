//! Observation of a finished response.
//!
//! Logging and metrics both need the final status and the number of body
//! bytes of a response. Responses are produced as values, so observing them
//! is a read of the returned response rather than a wrapped writer.

use http::StatusCode;
use http_body::Body;

use crate::types::Response;

/// Status and body size of a finished response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ObservedResponse {
    /// Final status code.
    pub status: StatusCode,
    /// Body length in bytes.
    pub bytes_written: u64,
}

impl ObservedResponse {
    /// Observes `response`.
    #[must_use]
    pub fn of(response: &Response) -> Self {
        let hint = response.body().size_hint();
        Self {
            status: response.status(),
            bytes_written: hint.exact().unwrap_or_else(|| hint.lower()),
        }
    }

    /// Returns `true` for 4xx and 5xx statuses.
    #[must_use]
    pub fn is_failure(&self) -> bool {
        self.status.is_client_error() || self.status.is_server_error()
    }
}
