//! Server configuration types.
//!
//! Configuration is assembled with [`ServerConfig::builder()`]. Builder
//! methods are applied in call order and the last call for a field wins.
//! The finished [`ServerConfig`] is immutable.
//!
//! # Example
//!
//! ```rust
//! use keel_server::config::{HealthEndpoint, MetricsEndpoint, ServerConfig};
//! use keel_middleware::stages::{LoggingMiddleware, RecoveryMiddleware};
//! use std::time::Duration;
//!
//! let config = ServerConfig::builder()
//!     .shutdown_timeout(Duration::from_secs(10))
//!     .middleware(RecoveryMiddleware::new())
//!     .middleware(LoggingMiddleware::new())
//!     .health(HealthEndpoint::new().access_log(true))
//!     .metrics(MetricsEndpoint::new())
//!     .build();
//!
//! assert_eq!(config.shutdown_timeout(), Duration::from_secs(10));
//! assert_eq!(config.health_endpoint().unwrap().route_path(), "/health");
//! ```

use std::sync::Arc;
use std::time::Duration;

use keel_core::HealthChecker;
use keel_middleware::pipeline::BoxedMiddleware;
use keel_middleware::{Middleware, Pipeline};

use crate::error::ServerError;

/// Default read timeout (request body collection).
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(10);

/// Default read-header timeout.
pub const DEFAULT_READ_HEADER_TIMEOUT: Duration = Duration::from_secs(5);

/// Default write timeout (producing the response).
pub const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(10);

/// Default keep-alive idle timeout.
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(90);

/// Default graceful shutdown timeout.
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Default health endpoint route.
pub const DEFAULT_HEALTH_ROUTE: &str = "/health";

/// Default metrics endpoint route.
pub const DEFAULT_METRICS_ROUTE: &str = "/metrics";

/// Default profiler route prefix.
pub const DEFAULT_PROFILER_ROUTE: &str = "/debug/pprof";

/// Settings shared by the built-in endpoints.
#[derive(Debug, Clone, PartialEq, Eq)]
struct EndpointOptions {
    route: String,
    access_log: bool,
    metrics: bool,
}

impl EndpointOptions {
    fn new(route: &str) -> Self {
        Self {
            route: route.to_string(),
            access_log: false,
            metrics: false,
        }
    }

    fn validate(&self, endpoint: &str) -> Result<(), ServerError> {
        validate_route(endpoint, &self.route)
    }
}

/// Checks that `route` is a usable route for `what`.
pub(crate) fn validate_route(what: &str, route: &str) -> Result<(), ServerError> {
    if route.is_empty() {
        return Err(ServerError::Config(format!(
            "invalid {what} route: {route:?} (should not be empty)"
        )));
    }
    if !route.starts_with('/') {
        return Err(ServerError::Config(format!(
            "invalid {what} route: {route} (route should start with '/' slash)"
        )));
    }
    Ok(())
}

macro_rules! endpoint_options {
    ($ty:ident) => {
        impl $ty {
            /// Sets the route the endpoint is served on.
            #[must_use]
            pub fn route(mut self, route: impl Into<String>) -> Self {
                self.options.route = route.into();
                self
            }

            /// Enables or disables access logging for this endpoint.
            #[must_use]
            pub fn access_log(mut self, enabled: bool) -> Self {
                self.options.access_log = enabled;
                self
            }

            /// Enables or disables request metrics for this endpoint.
            #[must_use]
            pub fn metrics(mut self, enabled: bool) -> Self {
                self.options.metrics = enabled;
                self
            }

            /// Returns the configured route.
            #[must_use]
            pub fn route_path(&self) -> &str {
                &self.options.route
            }

            /// Returns `true` if access logging is enabled.
            #[must_use]
            pub fn access_log_enabled(&self) -> bool {
                self.options.access_log
            }

            /// Returns `true` if request metrics are enabled.
            #[must_use]
            pub fn metrics_enabled(&self) -> bool {
                self.options.metrics
            }

            /// Builds the endpoint-local pipeline from the flags.
            pub(crate) fn local_pipeline(&self) -> Pipeline {
                endpoint_pipeline(&self.options)
            }
        }
    };
}

fn endpoint_pipeline(options: &EndpointOptions) -> Pipeline {
    let mut builder = Pipeline::builder();
    if options.access_log {
        builder = builder.with(keel_middleware::stages::LoggingMiddleware::new());
    }
    if options.metrics {
        builder = builder.with(keel_middleware::stages::MetricsMiddleware::new());
    }
    builder.build()
}

/// Health check endpoint configuration.
///
/// Answers `GET` with `200` and an empty body when the checker reports
/// healthy, and with the mapped error status otherwise.
#[derive(Clone)]
pub struct HealthEndpoint {
    options: EndpointOptions,
    checker: Option<Arc<dyn HealthChecker>>,
}

impl HealthEndpoint {
    /// Creates a health endpoint on [`DEFAULT_HEALTH_ROUTE`] with a checker
    /// that always reports healthy.
    #[must_use]
    pub fn new() -> Self {
        Self {
            options: EndpointOptions::new(DEFAULT_HEALTH_ROUTE),
            checker: None,
        }
    }

    /// Sets the health checker. Passing `None` keeps the current one.
    #[must_use]
    pub fn checker(mut self, checker: Option<Arc<dyn HealthChecker>>) -> Self {
        if let Some(checker) = checker {
            self.checker = Some(checker);
        }
        self
    }

    pub(crate) fn health_checker(&self) -> Option<Arc<dyn HealthChecker>> {
        self.checker.clone()
    }
}

endpoint_options!(HealthEndpoint);

impl Default for HealthEndpoint {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for HealthEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HealthEndpoint")
            .field("options", &self.options)
            .field("custom_checker", &self.checker.is_some())
            .finish()
    }
}

/// Prometheus metrics endpoint configuration.
#[derive(Debug, Clone)]
pub struct MetricsEndpoint {
    options: EndpointOptions,
}

impl MetricsEndpoint {
    /// Creates a metrics endpoint on [`DEFAULT_METRICS_ROUTE`].
    #[must_use]
    pub fn new() -> Self {
        Self {
            options: EndpointOptions::new(DEFAULT_METRICS_ROUTE),
        }
    }
}

endpoint_options!(MetricsEndpoint);

impl Default for MetricsEndpoint {
    fn default() -> Self {
        Self::new()
    }
}

/// Diagnostics endpoint configuration.
///
/// Serves `index`, `cmdline`, `profile`, `symbol` and `trace` under the
/// configured prefix.
#[derive(Debug, Clone)]
pub struct ProfilerEndpoint {
    options: EndpointOptions,
}

impl ProfilerEndpoint {
    /// Creates a profiler endpoint under [`DEFAULT_PROFILER_ROUTE`].
    #[must_use]
    pub fn new() -> Self {
        Self {
            options: EndpointOptions::new(DEFAULT_PROFILER_ROUTE),
        }
    }
}

endpoint_options!(ProfilerEndpoint);

impl Default for ProfilerEndpoint {
    fn default() -> Self {
        Self::new()
    }
}

/// Server configuration.
///
/// Use [`ServerConfig::builder()`] to construct instances.
#[derive(Clone)]
pub struct ServerConfig {
    read_timeout: Duration,
    read_header_timeout: Duration,
    write_timeout: Duration,
    idle_timeout: Duration,
    shutdown_timeout: Duration,
    middlewares: Vec<BoxedMiddleware>,
    health: Option<HealthEndpoint>,
    metrics: Option<MetricsEndpoint>,
    profiler: Option<ProfilerEndpoint>,
}

impl ServerConfig {
    /// Creates a new server configuration builder.
    #[must_use]
    pub fn builder() -> ServerConfigBuilder {
        ServerConfigBuilder::default()
    }

    /// Returns the deadline for collecting a request body.
    #[must_use]
    pub fn read_timeout(&self) -> Duration {
        self.read_timeout
    }

    /// Returns the deadline for receiving request headers.
    #[must_use]
    pub fn read_header_timeout(&self) -> Duration {
        self.read_header_timeout
    }

    /// Returns the deadline for producing a response.
    #[must_use]
    pub fn write_timeout(&self) -> Duration {
        self.write_timeout
    }

    /// Returns how long a keep-alive connection may sit without a request.
    #[must_use]
    pub fn idle_timeout(&self) -> Duration {
        self.idle_timeout
    }

    /// Returns how long shutdown waits for in-flight connections.
    #[must_use]
    pub fn shutdown_timeout(&self) -> Duration {
        self.shutdown_timeout
    }

    /// Returns the global middleware in declaration order.
    #[must_use]
    pub fn middlewares(&self) -> &[BoxedMiddleware] {
        &self.middlewares
    }

    /// Returns the health endpoint, if enabled.
    #[must_use]
    pub fn health_endpoint(&self) -> Option<&HealthEndpoint> {
        self.health.as_ref()
    }

    /// Returns the metrics endpoint, if enabled.
    #[must_use]
    pub fn metrics_endpoint(&self) -> Option<&MetricsEndpoint> {
        self.metrics.as_ref()
    }

    /// Returns the profiler endpoint, if enabled.
    #[must_use]
    pub fn profiler_endpoint(&self) -> Option<&ProfilerEndpoint> {
        self.profiler.as_ref()
    }

    /// Checks the routes of every enabled endpoint.
    ///
    /// # Errors
    ///
    /// Returns `ServerError::Config` for an empty route or one that does not
    /// start with `/`.
    pub fn validate(&self) -> Result<(), ServerError> {
        if let Some(health) = &self.health {
            health.options.validate("health-check")?;
        }
        if let Some(metrics) = &self.metrics {
            metrics.options.validate("metrics")?;
        }
        if let Some(profiler) = &self.profiler {
            profiler.options.validate("profiler")?;
        }
        Ok(())
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl std::fmt::Debug for ServerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let middlewares: Vec<_> = self.middlewares.iter().map(|mw| mw.name()).collect();
        f.debug_struct("ServerConfig")
            .field("read_timeout", &self.read_timeout)
            .field("read_header_timeout", &self.read_header_timeout)
            .field("write_timeout", &self.write_timeout)
            .field("idle_timeout", &self.idle_timeout)
            .field("shutdown_timeout", &self.shutdown_timeout)
            .field("middlewares", &middlewares)
            .field("health", &self.health)
            .field("metrics", &self.metrics)
            .field("profiler", &self.profiler)
            .finish()
    }
}

/// Builder for [`ServerConfig`].
#[derive(Clone)]
pub struct ServerConfigBuilder {
    config: ServerConfig,
}

impl Default for ServerConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ServerConfigBuilder {
    /// Creates a new builder with default values.
    #[must_use]
    pub fn new() -> Self {
        Self {
            config: ServerConfig {
                read_timeout: DEFAULT_READ_TIMEOUT,
                read_header_timeout: DEFAULT_READ_HEADER_TIMEOUT,
                write_timeout: DEFAULT_WRITE_TIMEOUT,
                idle_timeout: DEFAULT_IDLE_TIMEOUT,
                shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
                middlewares: Vec::new(),
                health: None,
                metrics: None,
                profiler: None,
            },
        }
    }

    /// Sets the deadline for collecting a request body.
    #[must_use]
    pub fn read_timeout(mut self, timeout: Duration) -> Self {
        self.config.read_timeout = timeout;
        self
    }

    /// Sets the deadline for receiving request headers.
    #[must_use]
    pub fn read_header_timeout(mut self, timeout: Duration) -> Self {
        self.config.read_header_timeout = timeout;
        self
    }

    /// Sets the deadline for producing a response. Exceeding it answers `503`.
    #[must_use]
    pub fn write_timeout(mut self, timeout: Duration) -> Self {
        self.config.write_timeout = timeout;
        self
    }

    /// Sets how long a keep-alive connection may wait for its next request.
    #[must_use]
    pub fn idle_timeout(mut self, timeout: Duration) -> Self {
        self.config.idle_timeout = timeout;
        self
    }

    /// Sets how long shutdown waits for in-flight connections.
    #[must_use]
    pub fn shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.config.shutdown_timeout = timeout;
        self
    }

    /// Appends a global middleware. Declaration order is outer to inner.
    #[must_use]
    pub fn middleware(mut self, middleware: impl Middleware) -> Self {
        self.config.middlewares.push(Arc::new(middleware));
        self
    }

    /// Appends already shared global middleware.
    #[must_use]
    pub fn middlewares(mut self, middlewares: impl IntoIterator<Item = BoxedMiddleware>) -> Self {
        self.config.middlewares.extend(middlewares);
        self
    }

    /// Enables the health endpoint.
    #[must_use]
    pub fn health(mut self, endpoint: HealthEndpoint) -> Self {
        self.config.health = Some(endpoint);
        self
    }

    /// Enables the metrics endpoint.
    #[must_use]
    pub fn metrics(mut self, endpoint: MetricsEndpoint) -> Self {
        self.config.metrics = Some(endpoint);
        self
    }

    /// Enables the profiler endpoint.
    #[must_use]
    pub fn profiler(mut self, endpoint: ProfilerEndpoint) -> Self {
        self.config.profiler = Some(endpoint);
        self
    }

    /// Builds the configuration.
    #[must_use]
    pub fn build(self) -> ServerConfig {
        self.config
    }
}
