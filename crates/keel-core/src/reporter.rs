//! Process-wide error reporter registry.
//!
//! Errors that reach the access log with a failing status, and recovered
//! panics, are forwarded to a single [`ErrorReporter`]. The registry is
//! single-assignment: the first call to [`register_reporter`] wins and later
//! calls are no-ops. Until a reporter is registered, [`report`] only emits a
//! debug event.

use std::sync::OnceLock;

use crate::error::Error;

/// Destination for errors that should be surfaced outside the process.
///
/// Implemented for any `Fn(&Error)` closure.
pub trait ErrorReporter: Send + Sync + 'static {
    /// Reports a single error.
    fn report(&self, err: &Error);
}

impl<F> ErrorReporter for F
where
    F: Fn(&Error) + Send + Sync + 'static,
{
    fn report(&self, err: &Error) {
        self(err);
    }
}

static REPORTER: OnceLock<Box<dyn ErrorReporter>> = OnceLock::new();

/// Registers the process-wide reporter.
///
/// Returns `true` if this call installed the reporter, `false` if one was
/// already registered (the existing reporter is kept).
pub fn register_reporter(reporter: impl ErrorReporter) -> bool {
    let installed = REPORTER.set(Box::new(reporter)).is_ok();
    if !installed {
        tracing::debug!("error reporter already registered, ignoring");
    }
    installed
}

/// Returns `true` once a reporter has been registered.
pub fn reporter_registered() -> bool {
    REPORTER.get().is_some()
}

/// Forwards `err` to the registered reporter.
pub fn report(err: &Error) {
    match REPORTER.get() {
        Some(reporter) => reporter.report(err),
        None => tracing::debug!(error = %err, "no error reporter registered"),
    }
}

/// [`ErrorReporter`] that forwards to the process-wide registry.
///
/// Middleware that reports errors defaults to this and accepts any other
/// reporter in its place.
#[derive(Debug, Clone, Copy, Default)]
pub struct GlobalReporter;

impl ErrorReporter for GlobalReporter {
    fn report(&self, err: &Error) {
        report(err);
    }
}
