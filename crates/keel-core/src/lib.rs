//! # Keel Core
//!
//! Core types shared by every Keel crate.
//!
//! - [`Error`] / [`ErrorKind`] - error taxonomy with kind matching across source chains
//! - [`ErrorHook`] - request-scoped mailbox for the terminal error of a request
//! - [`RequestExt`] - typed accessors for request-scoped values
//! - [`RequestId`] - time-ordered request identifier
//! - [`HealthChecker`] - health capability consumed by the health endpoint
//! - [`ErrorReporter`] - process-wide, single-assignment error reporter
//! - [`AbortConnection`] - panic sentinel that drops a connection without a response

#![doc(html_root_url = "https://docs.rs/keel-core/0.1.0")]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

pub mod context;
mod error;
mod health;
pub mod reporter;

pub use context::{ErrorHook, RemoteAddr, RequestExt, RequestId, RoutePattern};
pub use error::{AbortConnection, BoxError, Error, ErrorKind, Result};
pub use health::{BoxFuture, HealthChecker, NopChecker};
pub use reporter::{register_reporter, report, ErrorReporter, GlobalReporter};
