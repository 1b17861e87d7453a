//! # Keel
//!
//! HTTP server runtime with a composable middleware pipeline.
//!
//! - Listener lifecycle: bind, serve, graceful shutdown bounded by a timeout
//! - Middleware: request ID, access log, metrics and panic recovery
//! - Built-in health, metrics and profiler endpoints
//! - A request-scoped error hook that carries a handler's error to the access log
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use keel::prelude::*;
//!
//! async fn get_user(request: Request) -> Response {
//!     match request.extensions().get::<PathParams>().and_then(|p| p.get("id")) {
//!         Some("1") => respond::json(&request, StatusCode::OK, &"alice"),
//!         _ => respond::error(&request, Error::not_found("no such user")),
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     keel::telemetry::init_telemetry(&LogConfig::production())?;
//!
//!     let config = ServerConfig::builder()
//!         .middleware(RecoveryMiddleware::new())
//!         .middleware(RequestIdMiddleware::from_headers(["x-request-id"]))
//!         .middleware(LoggingMiddleware::new())
//!         .middleware(MetricsMiddleware::new())
//!         .health(HealthEndpoint::new())
//!         .metrics(MetricsEndpoint::new())
//!         .build();
//!
//!     let mut server = Server::new("0.0.0.0:8080", config)?;
//!     server.mount("/users", Router::new().get("/{id}", get_user), Vec::new())?;
//!
//!     server.serve(ShutdownSignal::with_os_signals()).await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! Global middleware runs outer to inner in declaration order. Recovery
//! belongs first so it wraps every other stage:
//!
//! ```text
//! Request → Recovery → RequestId → Logging → Metrics → [mount middleware] → Handler
//!                                                                              ↓
//! Response ←──────────────────────────────────────────────────────────────────┘
//! ```

#![doc(html_root_url = "https://docs.rs/keel/0.1.0")]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

// Re-export core types
pub use keel_core as core;

// Re-export server types
pub use keel_server as server;

// Re-export middleware types
pub use keel_middleware as middleware;

// Re-export telemetry setup
pub use keel_telemetry as telemetry;

/// Prelude module for convenient imports.
///
/// # Example
///
/// ```rust
/// use keel::prelude::*;
///
/// let config = ServerConfig::builder()
///     .middleware(RecoveryMiddleware::new())
///     .health(HealthEndpoint::new())
///     .build();
/// assert!(config.metrics_endpoint().is_none());
/// ```
pub mod prelude {
    pub use keel_core::{
        register_reporter, AbortConnection, Error, ErrorHook, ErrorKind, ErrorReporter,
        HealthChecker, RequestExt, RequestId,
    };

    pub use keel_middleware::stages::{
        ForceHttpsMiddleware, LoggingMiddleware, MetricsMiddleware, RecoveryMiddleware,
        RequestIdMiddleware,
    };
    pub use keel_middleware::{Handler, Middleware, Next, Pipeline, Request, Response};

    pub use keel_server::{
        respond, HealthEndpoint, MetricsEndpoint, PathParams, ProfilerEndpoint, Router, Server,
        ServerConfig, ServerError, ShutdownSignal,
    };

    pub use keel_telemetry::{LogConfig, LogFormat};

    pub use http::StatusCode;
}
