//! Health checking capability.

use std::future::Future;
use std::pin::Pin;

use crate::error::Error;

/// A boxed, sendable future.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Reports whether the service can serve traffic.
///
/// The health endpoint answers 200 when the check succeeds and maps the
/// returned [`Error`] to a status otherwise.
///
/// # Example
///
/// ```
/// use keel_core::{BoxFuture, Error, HealthChecker};
///
/// struct Database {
///     connected: bool,
/// }
///
/// impl HealthChecker for Database {
///     fn health(&self) -> BoxFuture<'_, Result<(), Error>> {
///         Box::pin(async move {
///             if self.connected {
///                 Ok(())
///             } else {
///                 Err(Error::unavailable("database disconnected"))
///             }
///         })
///     }
/// }
/// ```
pub trait HealthChecker: Send + Sync + 'static {
    /// Runs the health check.
    fn health(&self) -> BoxFuture<'_, Result<(), Error>>;
}

/// Health checker that always succeeds.
#[derive(Debug, Clone, Copy, Default)]
pub struct NopChecker;

impl HealthChecker for NopChecker {
    fn health(&self) -> BoxFuture<'_, Result<(), Error>> {
        Box::pin(async { Ok(()) })
    }
}
