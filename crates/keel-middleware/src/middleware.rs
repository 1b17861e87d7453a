//! Core middleware trait and types.
//!
//! This module defines the [`Middleware`] trait that all interceptors
//! implement. A middleware receives the request and a [`Next`] handle to the
//! rest of the chain; it may act before and after calling downstream, or
//! answer on its own without calling it at all.
//!
//! Request-scoped state travels in the request's extensions (see
//! [`keel_core::RequestExt`]), so middleware signatures never change when a
//! new piece of context is added.
//!
//! # Example
//!
//! ```
//! use keel_middleware::{BoxFuture, Middleware, Next, Request, Response};
//!
//! struct Timing;
//!
//! impl Middleware for Timing {
//!     fn name(&self) -> &'static str {
//!         "timing"
//!     }
//!
//!     fn process<'a>(&'a self, request: Request, next: Next<'a>) -> BoxFuture<'a, Response> {
//!         Box::pin(async move {
//!             let start = std::time::Instant::now();
//!             let response = next.run(request).await;
//!             tracing::debug!(elapsed = ?start.elapsed(), "downstream finished");
//!             response
//!         })
//!     }
//! }
//! ```

use crate::types::{Request, Response};

pub use keel_core::BoxFuture;

/// The core middleware trait.
///
/// # Invariants
///
/// - Middleware MUST call `next.run()` at most once
/// - Middleware SHOULD NOT swallow responses from downstream
pub trait Middleware: Send + Sync + 'static {
    /// Returns the name of this middleware, used in logs and diagnostics.
    fn name(&self) -> &'static str;

    /// Process the request through this middleware.
    ///
    /// # Arguments
    ///
    /// * `request` - The incoming HTTP request
    /// * `next` - Callback to invoke the rest of the chain
    fn process<'a>(&'a self, request: Request, next: Next<'a>) -> BoxFuture<'a, Response>;
}

/// Callback to invoke the next middleware in the chain.
///
/// Consumed by [`Next::run`], so it can be called at most once. If it is
/// never called the middleware short-circuits the chain.
pub struct Next<'a> {
    inner: NextInner<'a>,
}

enum NextInner<'a> {
    Chain {
        middleware: &'a dyn Middleware,
        next: Box<Next<'a>>,
    },
    Handler(Box<dyn FnOnce(Request) -> BoxFuture<'static, Response> + Send + 'a>),
}

impl<'a> Next<'a> {
    /// Creates a `Next` that will invoke `middleware`, then `next`.
    pub(crate) fn new(middleware: &'a dyn Middleware, next: Next<'a>) -> Self {
        Self {
            inner: NextInner::Chain {
                middleware,
                next: Box::new(next),
            },
        }
    }

    /// Creates a terminal `Next` that invokes the handler.
    pub(crate) fn handler<F>(f: F) -> Self
    where
        F: FnOnce(Request) -> BoxFuture<'static, Response> + Send + 'a,
    {
        Self {
            inner: NextInner::Handler(Box::new(f)),
        }
    }

    /// Invokes the next middleware or handler in the chain.
    pub async fn run(self, request: Request) -> Response {
        match self.inner {
            NextInner::Chain { middleware, next } => middleware.process(request, *next).await,
            NextInner::Handler(handler) => handler(request).await,
        }
    }
}

/// A middleware built from a closure.
///
/// # Example
///
/// ```
/// use keel_middleware::FnMiddleware;
///
/// let middleware = FnMiddleware::new("tag", |request, next| {
///     Box::pin(async move {
///         let mut response = next.run(request).await;
///         response.headers_mut().insert("x-served-by", "keel".parse().unwrap());
///         response
///     })
/// });
/// ```
pub struct FnMiddleware<F> {
    name: &'static str,
    func: F,
}

impl<F> FnMiddleware<F> {
    /// Creates a new function-based middleware.
    pub const fn new(name: &'static str, func: F) -> Self
    where
        F: for<'a> Fn(Request, Next<'a>) -> BoxFuture<'a, Response> + Send + Sync + 'static,
    {
        Self { name, func }
    }
}

impl<F> Middleware for FnMiddleware<F>
where
    F: for<'a> Fn(Request, Next<'a>) -> BoxFuture<'a, Response> + Send + Sync + 'static,
{
    fn name(&self) -> &'static str {
        self.name
    }

    fn process<'a>(&'a self, request: Request, next: Next<'a>) -> BoxFuture<'a, Response> {
        (self.func)(request, next)
    }
}
