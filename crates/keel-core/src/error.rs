//! Error types for Keel.
//!
//! This module provides the [`Error`] type, the single error value that flows
//! through the error hook, the respond helpers and the error reporter.
//!
//! # Kinds
//!
//! Every error carries an [`ErrorKind`]. Kinds nest: an error may wrap another
//! [`Error`] as its source, and [`Error::is`] walks the whole source chain.
//! This is what makes the ordered status table used by the respond helpers
//! meaningful: the first kind in the table that appears anywhere in the chain
//! decides the status.
//!
//! | `ErrorKind` | Status |
//! |---|---|
//! | `AlreadyExists` | 409 |
//! | `NotFound` | 404 |
//! | `Unauthenticated` | 401 |
//! | `Unauthorized` | 403 |
//! | `InvalidArgument` | 400 |
//! | `Unavailable` | 503 |
//! | `Internal` | 500 |

use std::fmt;

use thiserror::Error;

/// Result type alias using [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// Boxed source error.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Categories of errors for classification and status mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// The requested resource does not exist.
    NotFound,
    /// The resource being created already exists.
    AlreadyExists,
    /// The caller is not authenticated.
    Unauthenticated,
    /// The caller is authenticated but not allowed to perform the action.
    Unauthorized,
    /// The request is malformed or fails validation.
    InvalidArgument,
    /// A dependency is temporarily unavailable. Retryable.
    Unavailable,
    /// Anything else.
    Internal,
}

impl ErrorKind {
    /// Returns a short, stable name for this kind.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::NotFound => "not_found",
            Self::AlreadyExists => "already_exists",
            Self::Unauthenticated => "unauthenticated",
            Self::Unauthorized => "unauthorized",
            Self::InvalidArgument => "invalid_argument",
            Self::Unavailable => "unavailable",
            Self::Internal => "internal",
        }
    }

    /// Returns `true` if an operation failing with this kind may be retried.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Unavailable)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Standard error type for Keel.
///
/// # Example
///
/// ```
/// use keel_core::{Error, ErrorKind};
///
/// fn find_user(id: &str) -> Result<(), Error> {
///     Err(Error::not_found(format!("user {id} does not exist")))
/// }
///
/// let err = find_user("42").unwrap_err();
/// assert!(err.is(ErrorKind::NotFound));
/// ```
#[derive(Error, Debug)]
#[error("{message}")]
pub struct Error {
    kind: ErrorKind,
    message: String,
    #[source]
    source: Option<BoxError>,
}

impl Error {
    /// Creates an error of the given kind.
    #[must_use]
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            source: None,
        }
    }

    /// Creates a not-found error.
    #[must_use]
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, message)
    }

    /// Creates an already-exists error.
    #[must_use]
    pub fn already_exists(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::AlreadyExists, message)
    }

    /// Creates an unauthenticated error.
    #[must_use]
    pub fn unauthenticated(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Unauthenticated, message)
    }

    /// Creates an unauthorized error.
    #[must_use]
    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Unauthorized, message)
    }

    /// Creates an invalid-argument error.
    #[must_use]
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidArgument, message)
    }

    /// Creates an unavailable error.
    #[must_use]
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Unavailable, message)
    }

    /// Creates an internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal, message)
    }

    /// Attaches an underlying cause.
    ///
    /// If the cause is itself an [`Error`], its kind participates in
    /// [`Error::is`] checks on this error.
    #[must_use]
    pub fn with_source(mut self, source: impl Into<BoxError>) -> Self {
        self.source = Some(source.into());
        self
    }

    /// Returns the kind of this error (not of its sources).
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Returns the message of this error.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Returns `true` if this error or any [`Error`] in its source chain has
    /// the given kind.
    #[must_use]
    pub fn is(&self, kind: ErrorKind) -> bool {
        let mut current: Option<&(dyn std::error::Error + 'static)> = Some(self);
        while let Some(err) = current {
            if let Some(keel) = err.downcast_ref::<Self>() {
                if keel.kind == kind {
                    return true;
                }
            }
            current = err.source();
        }
        false
    }

    /// Messages of the source chain joined by `": "`, or `None` when this
    /// error has no source.
    #[must_use]
    pub fn cause_chain(&self) -> Option<String> {
        let mut current = std::error::Error::source(self);
        let mut chain: Option<String> = None;
        while let Some(err) = current {
            match chain.as_mut() {
                Some(chain) => {
                    chain.push_str(": ");
                    chain.push_str(&err.to_string());
                }
                None => chain = Some(err.to_string()),
            }
            current = err.source();
        }
        chain
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        let kind = match err.kind() {
            std::io::ErrorKind::NotFound => ErrorKind::NotFound,
            std::io::ErrorKind::AlreadyExists => ErrorKind::AlreadyExists,
            std::io::ErrorKind::PermissionDenied => ErrorKind::Unauthorized,
            std::io::ErrorKind::InvalidInput | std::io::ErrorKind::InvalidData => {
                ErrorKind::InvalidArgument
            }
            std::io::ErrorKind::TimedOut
            | std::io::ErrorKind::ConnectionRefused
            | std::io::ErrorKind::ConnectionReset => ErrorKind::Unavailable,
            _ => ErrorKind::Internal,
        };
        Self::new(kind, err.to_string()).with_source(err)
    }
}

/// Marker value raised with [`std::panic::panic_any`] to drop the current
/// connection without writing a response.
///
/// The recovery middleware re-raises it unchanged instead of answering 500.
/// It is never an [`Error`] and never visible to clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AbortConnection;

impl AbortConnection {
    /// Aborts the current request by unwinding with the sentinel.
    pub fn raise() -> ! {
        std::panic::panic_any(Self)
    }
}

impl fmt::Display for AbortConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("connection aborted by handler")
    }
}
