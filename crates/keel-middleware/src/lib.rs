//! # Keel Middleware
//!
//! Composable middleware for the Keel server runtime.
//!
//! A [`Pipeline`] is an ordered list of [`Middleware`]. Each middleware
//! receives the request and a [`Next`] handle to the rest of the chain, so it
//! can act before and after the handler or answer on its own.
//!
//! ```text
//! Request → Recovery → RequestId → Logging → Metrics → Handler
//!                                                         ↓
//! Response ← Recovery ← RequestId ← Logging ← Metrics ←───┘
//! ```
//!
//! Request-scoped values (request ID, error hook, matched route) travel in
//! the request's extensions and are read with [`keel_core::RequestExt`].
//!
//! ## Example
//!
//! ```
//! use keel_middleware::stages::{
//!     LoggingMiddleware, MetricsMiddleware, RecoveryMiddleware, RequestIdMiddleware,
//! };
//! use keel_middleware::Pipeline;
//!
//! let pipeline = Pipeline::builder()
//!     .with(RecoveryMiddleware::new())
//!     .with(RequestIdMiddleware::new())
//!     .with(LoggingMiddleware::new())
//!     .with(MetricsMiddleware::new())
//!     .build();
//!
//! assert_eq!(pipeline.stage_count(), 4);
//! ```

#![doc(html_root_url = "https://docs.rs/keel-middleware/0.1.0")]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

pub mod middleware;
pub mod observe;
pub mod pipeline;
pub mod stages;
pub mod types;

pub use middleware::{BoxFuture, FnMiddleware, Middleware, Next};
pub use observe::ObservedResponse;
pub use pipeline::{BoxedMiddleware, Pipeline, PipelineBuilder};
pub use types::{empty_response, text_response, Handler, Request, Response};
