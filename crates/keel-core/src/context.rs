//! Request-scoped context.
//!
//! Keel keeps per-request state in the request's typed extension map
//! ([`http::Extensions`]). Values inserted there are moved along with the
//! request through every middleware layer, so nested code can reach them
//! without changing any intermediate signature.
//!
//! [`RequestExt`] provides typed accessors for the values Keel itself stores:
//!
//! - [`RequestId`] - set once by the request-id middleware
//! - [`ErrorHook`] - installed by the logging middleware before calling downstream
//! - [`RoutePattern`] - the matched route template, set by the router
//! - [`RemoteAddr`] - the peer address of the connection

use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::Error;

/// A unique identifier for a request.
///
/// Generated identifiers are UUID v7, which are time-ordered and sort
/// lexically by creation time. Identifiers taken from an inbound header are
/// kept verbatim as opaque strings.
///
/// # Example
///
/// ```
/// use keel_core::RequestId;
///
/// let id = RequestId::new();
/// assert_eq!(id.as_str().len(), 36);
///
/// let propagated = RequestId::from_header("abc-123");
/// assert_eq!(propagated.as_str(), "abc-123");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(Arc<str>);

impl RequestId {
    /// Creates a new unique request ID using UUID v7.
    #[must_use]
    pub fn new() -> Self {
        Self::from_uuid(Uuid::now_v7())
    }

    /// Creates a `RequestId` from an existing UUID.
    #[must_use]
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(Arc::from(uuid.hyphenated().to_string()))
    }

    /// Wraps a value received in a request header.
    #[must_use]
    pub fn from_header(value: impl AsRef<str>) -> Self {
        Self(Arc::from(value.as_ref()))
    }

    /// Returns the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<Uuid> for RequestId {
    fn from(uuid: Uuid) -> Self {
        Self::from_uuid(uuid)
    }
}

/// Request-scoped, single-slot mailbox for the terminal error of a request.
///
/// The logging middleware installs a hook into the request before calling
/// downstream and keeps a clone for itself. Clones share the same slot, so
/// anything nested under it (handlers, respond helpers, recovery) writes into
/// the cell the logger reads once the downstream call returns.
///
/// Later writes overwrite earlier ones. Writes from background work that
/// outlives the request are not observed by anyone.
#[derive(Debug, Clone, Default)]
pub struct ErrorHook(Arc<Mutex<Option<Error>>>);

impl ErrorHook {
    /// Creates an empty hook.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores an error, replacing any previous one.
    pub fn set(&self, err: Error) {
        *self.0.lock() = Some(err);
    }

    /// Returns `true` if an error has been stored.
    #[must_use]
    pub fn is_set(&self) -> bool {
        self.0.lock().is_some()
    }

    /// Returns the rendered message of the stored error, if any.
    #[must_use]
    pub fn message(&self) -> Option<String> {
        self.0.lock().as_ref().map(ToString::to_string)
    }

    /// Removes and returns the stored error.
    pub fn take(&self) -> Option<Error> {
        self.0.lock().take()
    }
}

/// The matched route template of a request, e.g. `/users/{id}`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RoutePattern(Arc<str>);

impl RoutePattern {
    /// Label used for requests that matched no route.
    pub const UNMATCHED: &'static str = "unmatched";

    /// Creates a route pattern.
    #[must_use]
    pub fn new(pattern: impl AsRef<str>) -> Self {
        Self(Arc::from(pattern.as_ref()))
    }

    /// Returns the pattern.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RoutePattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Peer address of the connection a request arrived on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RemoteAddr(pub SocketAddr);

/// Typed accessors for the request-scoped values Keel stores in extensions.
pub trait RequestExt {
    /// Returns the request's extension map.
    fn keel_extensions(&self) -> &http::Extensions;

    /// Returns the request ID, if the request-id middleware ran.
    fn request_id(&self) -> Option<&RequestId> {
        self.keel_extensions().get::<RequestId>()
    }

    /// Returns the error hook, if the logging middleware installed one.
    fn error_hook(&self) -> Option<&ErrorHook> {
        self.keel_extensions().get::<ErrorHook>()
    }

    /// Returns the matched route pattern, or `None` when no route matched.
    fn route_pattern(&self) -> Option<&RoutePattern> {
        self.keel_extensions().get::<RoutePattern>()
    }

    /// Returns the matched route pattern, or [`RoutePattern::UNMATCHED`].
    fn route_label(&self) -> &str {
        self.route_pattern()
            .map_or(RoutePattern::UNMATCHED, RoutePattern::as_str)
    }

    /// Returns the peer address of the connection.
    fn remote_addr(&self) -> Option<SocketAddr> {
        self.keel_extensions().get::<RemoteAddr>().map(|addr| addr.0)
    }

    /// Writes `err` into the error hook. Does nothing when no hook is installed.
    fn report_to_hook(&self, err: Error) {
        if let Some(hook) = self.error_hook() {
            hook.set(err);
        }
    }
}

impl<B> RequestExt for http::Request<B> {
    fn keel_extensions(&self) -> &http::Extensions {
        self.extensions()
    }
}

impl RequestExt for http::request::Parts {
    fn keel_extensions(&self) -> &http::Extensions {
        &self.extensions
    }
}
