//! Response helpers for handlers.
//!
//! Every helper that sees an error also writes it into the request's
//! [`ErrorHook`](keel_core::ErrorHook), so the access log can report it.
//! Error bodies never carry the error text; they contain only the reason
//! phrase of the mapped status.
//!
//! # Error Mapping
//!
//! Checked in order, first match wins. Kinds are matched through the whole
//! source chain (see [`Error::is`]):
//!
//! | Kind | Status |
//! |------|--------|
//! | `AlreadyExists` | 409 |
//! | `NotFound` | 404 |
//! | `Unauthenticated` | 401 |
//! | `Unauthorized` | 403 |
//! | `InvalidArgument` | 400 |
//! | `Unavailable` | 503 |
//! | anything else | 500 |
//!
//! The table can be replaced once per process with
//! [`set_error_responder`].
//!
//! # Example
//!
//! ```rust
//! use keel_core::Error;
//! use keel_middleware::{Request, Response};
//! use keel_server::respond;
//! use http::StatusCode;
//!
//! async fn get_user(request: Request) -> Response {
//!     match request.uri().path() {
//!         "/users/1" => respond::json(&request, StatusCode::OK, &serde_json::json!({"id": 1})),
//!         _ => respond::error(&request, Error::not_found("no such user")),
//!     }
//! }
//! ```

use std::sync::OnceLock;

use bytes::Bytes;
use http::header::CONTENT_TYPE;
use http::{HeaderValue, StatusCode};
use http_body_util::Full;
use keel_core::{Error, ErrorKind, RequestExt};
use keel_middleware::{empty_response, Response};
use serde::Serialize;

/// Maps an error to the status written by [`error`].
pub type ErrorResponder = dyn Fn(&Error) -> StatusCode + Send + Sync;

static ERROR_RESPONDER: OnceLock<Box<ErrorResponder>> = OnceLock::new();

const STATUS_TABLE: [(ErrorKind, StatusCode); 6] = [
    (ErrorKind::AlreadyExists, StatusCode::CONFLICT),
    (ErrorKind::NotFound, StatusCode::NOT_FOUND),
    (ErrorKind::Unauthenticated, StatusCode::UNAUTHORIZED),
    (ErrorKind::Unauthorized, StatusCode::FORBIDDEN),
    (ErrorKind::InvalidArgument, StatusCode::BAD_REQUEST),
    (ErrorKind::Unavailable, StatusCode::SERVICE_UNAVAILABLE),
];

const TEXT_PLAIN: &str = "text/plain; charset=utf-8";
const APPLICATION_JSON: &str = "application/json; charset=utf-8";

/// Replaces the default error to status mapping for the whole process.
///
/// Only the first call has an effect. Returns `false` if a responder was
/// already installed.
pub fn set_error_responder<F>(responder: F) -> bool
where
    F: Fn(&Error) -> StatusCode + Send + Sync + 'static,
{
    ERROR_RESPONDER.set(Box::new(responder)).is_ok()
}

/// Returns the status the default table assigns to `err`.
#[must_use]
pub fn default_status_for(err: &Error) -> StatusCode {
    STATUS_TABLE
        .iter()
        .find(|(kind, _)| err.is(*kind))
        .map_or(StatusCode::INTERNAL_SERVER_ERROR, |(_, status)| *status)
}

/// Returns the status [`error`] would write for `err`.
#[must_use]
pub fn status_for(err: &Error) -> StatusCode {
    match ERROR_RESPONDER.get() {
        Some(responder) => responder(err),
        None => default_status_for(err),
    }
}

/// Writes `err` into the error hook and answers with the mapped status.
///
/// The body is the status reason phrase.
pub fn error(request: &impl RequestExt, err: Error) -> Response {
    let status = status_for(&err);
    request.report_to_hook(err);
    reason(status)
}

/// Serializes `value` as the JSON body of a `status` response.
///
/// If serialization fails the error is written into the error hook and the
/// response keeps `status` with an empty body. The status line is decided
/// before the body, so a failed encode never turns into a different status.
pub fn json<T>(request: &impl RequestExt, status: StatusCode, value: &T) -> Response
where
    T: Serialize + ?Sized,
{
    let body = match serde_json::to_vec(value) {
        Ok(body) => Bytes::from(body),
        Err(err) => {
            request.report_to_hook(
                Error::internal("failed to encode response body").with_source(err),
            );
            Bytes::new()
        }
    };
    with_content_type(status, body, APPLICATION_JSON)
}

/// Answers `status` with a `text/plain` body. An empty body is allowed.
pub fn text(_request: &impl RequestExt, status: StatusCode, body: impl Into<Bytes>) -> Response {
    with_content_type(status, body.into(), TEXT_PLAIN)
}

/// Answers a bare `status` with an empty body.
#[must_use]
pub fn status(status: StatusCode) -> Response {
    empty_response(status)
}

/// Answers `status` with its reason phrase as a `text/plain` body.
#[must_use]
pub fn reason(status: StatusCode) -> Response {
    let phrase = status.canonical_reason().unwrap_or_default();
    with_content_type(status, Bytes::from_static(phrase.as_bytes()), TEXT_PLAIN)
}

fn with_content_type(status: StatusCode, body: Bytes, content_type: &'static str) -> Response {
    let mut response = Response::new(Full::new(body));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
    response
}
