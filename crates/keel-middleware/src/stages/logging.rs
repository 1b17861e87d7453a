//! Access logging middleware.
//!
//! Emits exactly one event per request, after the downstream call returns,
//! under the [`ACCESS_LOG_TARGET`] target:
//!
//! | Final status | Error hook | Level | `error` field | Reported |
//! |--------------|------------|-------|---------------|----------|
//! | ≥ 400 | set | `ERROR` | yes | yes |
//! | ≥ 400 | empty | `ERROR` | no | no |
//! | < 400 | any | `INFO` | no | no |
//!
//! The source chain of a logged error goes into a separate `cause` field.
//!
//! Before calling downstream the middleware installs a fresh [`ErrorHook`]
//! into the request's extensions. Handlers and respond helpers write the
//! terminal error of the request there; this middleware reads it once the
//! response is back.
//!
//! A panic unwinding through this middleware is not logged here. Place a
//! [`RecoveryMiddleware`](super::RecoveryMiddleware) outside of it.

use std::sync::Arc;
use std::time::Instant;

use keel_core::{ErrorHook, ErrorReporter, GlobalReporter, RequestExt};
use tracing::field::display;

use crate::middleware::{BoxFuture, Middleware, Next};
use crate::observe::ObservedResponse;
use crate::types::{Request, Response};

pub use keel_telemetry::logging::ACCESS_LOG_TARGET;

/// Middleware that writes the access log.
///
/// # Example
///
/// ```
/// use keel_middleware::stages::LoggingMiddleware;
///
/// let logging = LoggingMiddleware::new();
/// ```
#[derive(Clone)]
pub struct LoggingMiddleware {
    reporter: Arc<dyn ErrorReporter>,
}

impl Default for LoggingMiddleware {
    fn default() -> Self {
        Self::new()
    }
}

impl LoggingMiddleware {
    /// Creates a logging middleware that reports to the process-wide reporter.
    #[must_use]
    pub fn new() -> Self {
        Self::with_reporter(Arc::new(GlobalReporter))
    }

    /// Creates a logging middleware that reports to `reporter`.
    #[must_use]
    pub fn with_reporter(reporter: Arc<dyn ErrorReporter>) -> Self {
        Self { reporter }
    }
}

impl std::fmt::Debug for LoggingMiddleware {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoggingMiddleware").finish_non_exhaustive()
    }
}

impl Middleware for LoggingMiddleware {
    fn name(&self) -> &'static str {
        "logging"
    }

    fn process<'a>(&'a self, mut request: Request, next: Next<'a>) -> BoxFuture<'a, Response> {
        Box::pin(async move {
            let start = Instant::now();
            let method = request.method().clone();
            let uri = request.uri().clone();
            let remote_addr = request.remote_addr();
            let request_id = request.request_id().cloned();

            let hook = ErrorHook::new();
            request.extensions_mut().insert(hook.clone());

            let response = next.run(request).await;

            let observed = ObservedResponse::of(&response);
            let duration_ms = start.elapsed().as_secs_f64() * 1000.0;
            let status = observed.status.as_u16();
            let remote_addr = remote_addr.map(display);
            let request_id = request_id.as_ref().map(|id| id.as_str());

            if !observed.is_failure() {
                tracing::info!(
                    target: ACCESS_LOG_TARGET,
                    method = %method,
                    status,
                    uri = %uri,
                    remote_addr,
                    duration_ms,
                    bytes = observed.bytes_written,
                    request_id,
                    "request completed"
                );
            } else if let Some(err) = hook.take() {
                let cause = err.cause_chain();
                tracing::error!(
                    target: ACCESS_LOG_TARGET,
                    method = %method,
                    status,
                    uri = %uri,
                    remote_addr,
                    duration_ms,
                    bytes = observed.bytes_written,
                    request_id,
                    error = %err,
                    cause = cause.as_deref(),
                    "request completed"
                );
                self.reporter.report(&err);
            } else {
                tracing::error!(
                    target: ACCESS_LOG_TARGET,
                    method = %method,
                    status,
                    uri = %uri,
                    remote_addr,
                    duration_ms,
                    bytes = observed.bytes_written,
                    request_id,
                    "request completed"
                );
            }

            response
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{empty_response, text_response};
    use http::StatusCode;
    use keel_core::{Error, RemoteAddr, RequestId};
    use keel_test::{get, LogCapture, RecordingReporter};
    use tracing::Level;

    async fn run<F>(request: Request, handler: F) -> (Vec<keel_test::CapturedEvent>, RecordingReporter)
    where
        F: FnOnce(Request) -> BoxFuture<'static, Response> + Send + 'static,
    {
        let capture = LogCapture::new();
        let _guard = capture.install();
        let reporter = RecordingReporter::new();
        let middleware = LoggingMiddleware::with_reporter(reporter.shared());

        middleware.process(request, Next::handler(handler)).await;

        (capture.for_target(ACCESS_LOG_TARGET), reporter)
    }

    #[tokio::test]
    async fn test_success_logs_info() {
        let mut request = get("/users/7");
        request
            .extensions_mut()
            .insert(RemoteAddr("192.0.2.1:5000".parse().unwrap()));
        request.extensions_mut().insert(RequestId::from_header("req-1"));

        let (events, reporter) = run(request, |_req| {
            Box::pin(async { text_response(StatusCode::OK, "hello") })
        })
        .await;

        assert_eq!(events.len(), 1);
        let event = &events[0];
        assert_eq!(event.level, Level::INFO);
        assert_eq!(event.field("method"), Some("GET"));
        assert_eq!(event.field("status"), Some("200"));
        assert_eq!(event.field("uri"), Some("/users/7"));
        assert_eq!(event.field("remote_addr"), Some("192.0.2.1:5000"));
        assert_eq!(event.field("request_id"), Some("req-1"));
        assert_eq!(event.field("bytes"), Some("5"));
        assert!(event.field("duration_ms").is_some());
        assert!(event.field("error").is_none());
        assert_eq!(reporter.count(), 0);
    }

    #[tokio::test]
    async fn test_failure_with_hooked_error_logs_and_reports() {
        let (events, reporter) = run(get("/db"), |req| {
            req.report_to_hook(Error::unavailable("db down"));
            Box::pin(async { empty_response(StatusCode::SERVICE_UNAVAILABLE) })
        })
        .await;

        assert_eq!(events.len(), 1);
        assert_eq!(events[0].level, Level::ERROR);
        assert_eq!(events[0].field("status"), Some("503"));
        assert_eq!(events[0].field("error"), Some("db down"));
        assert_eq!(reporter.messages(), ["db down".to_string()]);
    }

    #[tokio::test]
    async fn test_hooked_error_logs_cause_chain() {
        let (events, _) = run(get("/orders"), |req| {
            let parse = "x".parse::<u32>().unwrap_err();
            req.report_to_hook(Error::internal("failed to encode response body").with_source(parse));
            Box::pin(async { empty_response(StatusCode::INTERNAL_SERVER_ERROR) })
        })
        .await;

        assert_eq!(events[0].field("error"), Some("failed to encode response body"));
        assert_eq!(events[0].field("cause"), Some("invalid digit found in string"));
    }

    #[tokio::test]
    async fn test_failure_without_hook_logs_error_without_detail() {
        let (events, reporter) = run(get("/missing"), |_req| {
            Box::pin(async { empty_response(StatusCode::NOT_FOUND) })
        })
        .await;

        assert_eq!(events.len(), 1);
        assert_eq!(events[0].level, Level::ERROR);
        assert!(events[0].field("error").is_none());
        assert!(events[0].field("cause").is_none());
        assert_eq!(reporter.count(), 0);
    }

    #[tokio::test]
    async fn test_hooked_error_ignored_on_success() {
        let (events, reporter) = run(get("/"), |req| {
            req.report_to_hook(Error::internal("handled"));
            Box::pin(async { empty_response(StatusCode::OK) })
        })
        .await;

        assert_eq!(events.len(), 1);
        assert_eq!(events[0].level, Level::INFO);
        assert_eq!(reporter.count(), 0);
    }

    #[tokio::test]
    async fn test_last_hook_write_wins() {
        let (events, _) = run(get("/"), |req| {
            req.report_to_hook(Error::internal("first"));
            req.report_to_hook(Error::internal("second"));
            Box::pin(async { empty_response(StatusCode::INTERNAL_SERVER_ERROR) })
        })
        .await;

        assert_eq!(events[0].field("error"), Some("second"));
    }

    #[test]
    fn test_middleware_name() {
        assert_eq!(LoggingMiddleware::new().name(), "logging");
    }
}
