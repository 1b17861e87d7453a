//! Ordered middleware pipeline.
//!
//! A [`Pipeline`] is an ordered list of middleware. Composition order is
//! declaration order, outer to inner: the first middleware sees the request
//! first and the response last.
//!
//! ```text
//! request  → [0] → [1] → ... → [n-1] → handler
//! response ← [0] ← [1] ← ... ← [n-1] ←───┘
//! ```
//!
//! A pipeline is immutable once built and is shared between connections
//! behind an `Arc`.

use crate::middleware::{BoxFuture, Middleware, Next};
use crate::types::{Handler, Request, Response};
use std::sync::Arc;

/// A type-erased middleware that can be stored in a vector.
pub type BoxedMiddleware = Arc<dyn Middleware>;

/// An ordered middleware chain.
///
/// # Example
///
/// ```
/// use keel_middleware::pipeline::Pipeline;
/// use keel_middleware::stages::{LoggingMiddleware, RecoveryMiddleware, RequestIdMiddleware};
///
/// let pipeline = Pipeline::builder()
///     .with(RecoveryMiddleware::new())
///     .with(RequestIdMiddleware::new())
///     .with(LoggingMiddleware::new())
///     .build();
///
/// assert_eq!(pipeline.stage_names(), ["recovery", "request_id", "logging"]);
/// ```
#[derive(Clone, Default)]
pub struct Pipeline {
    stages: Vec<BoxedMiddleware>,
}

impl Pipeline {
    /// Creates a pipeline from already boxed middleware, in order.
    #[must_use]
    pub fn new(stages: Vec<BoxedMiddleware>) -> Self {
        Self { stages }
    }

    /// Creates a new pipeline builder.
    #[must_use]
    pub fn builder() -> PipelineBuilder {
        PipelineBuilder::new()
    }

    /// Processes a request through every stage, then `handler`.
    pub async fn process<H>(&self, request: Request, handler: H) -> Response
    where
        H: FnOnce(Request) -> BoxFuture<'static, Response> + Send,
    {
        let next = self.build_chain(handler);
        next.run(request).await
    }

    /// Wraps `handler` so that every call runs through this pipeline.
    ///
    /// An empty pipeline returns the handler unchanged.
    #[must_use]
    pub fn wrap(self: Arc<Self>, handler: Arc<dyn Handler>) -> Arc<dyn Handler> {
        if self.is_empty() {
            return handler;
        }
        Arc::new(Wrapped {
            pipeline: self,
            handler,
        })
    }

    fn build_chain<'a, H>(&'a self, handler: H) -> Next<'a>
    where
        H: FnOnce(Request) -> BoxFuture<'static, Response> + Send + 'a,
    {
        let mut next = Next::handler(handler);

        for middleware in self.stages.iter().rev() {
            next = Next::new(middleware.as_ref(), next);
        }

        next
    }

    /// Returns the names of all middleware stages in order.
    #[must_use]
    pub fn stage_names(&self) -> Vec<&'static str> {
        self.stages.iter().map(|mw| mw.name()).collect()
    }

    /// Returns the number of middleware stages.
    #[must_use]
    pub fn stage_count(&self) -> usize {
        self.stages.len()
    }

    /// Returns `true` if the pipeline has no stages.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("stages", &self.stage_names())
            .finish()
    }
}

struct Wrapped {
    pipeline: Arc<Pipeline>,
    handler: Arc<dyn Handler>,
}

impl Handler for Wrapped {
    fn call(&self, request: Request) -> BoxFuture<'static, Response> {
        let pipeline = Arc::clone(&self.pipeline);
        let handler = Arc::clone(&self.handler);
        Box::pin(async move {
            pipeline
                .process(request, move |request| handler.call(request))
                .await
        })
    }
}

/// Builder for constructing a [`Pipeline`].
#[derive(Default)]
pub struct PipelineBuilder {
    stages: Vec<BoxedMiddleware>,
}

impl PipelineBuilder {
    /// Creates an empty builder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a middleware. Later stages run inside earlier ones.
    #[must_use]
    pub fn with(mut self, middleware: impl Middleware) -> Self {
        self.stages.push(Arc::new(middleware));
        self
    }

    /// Appends an already shared middleware.
    #[must_use]
    pub fn with_shared(mut self, middleware: BoxedMiddleware) -> Self {
        self.stages.push(middleware);
        self
    }

    /// Builds the pipeline.
    #[must_use]
    pub fn build(self) -> Pipeline {
        Pipeline {
            stages: self.stages,
        }
    }
}
