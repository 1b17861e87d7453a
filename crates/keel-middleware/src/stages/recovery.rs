//! Panic recovery middleware.
//!
//! Catches panics raised anywhere downstream and turns them into a bare
//! `500 Internal Server Error`. For every recovered panic the middleware:
//!
//! 1. logs one `ERROR` event with the method, route and panic message
//! 2. increments `server_panics_total{method, route}`
//! 3. hands the error to the error reporter
//! 4. writes the error into the request's [`ErrorHook`](keel_core::ErrorHook),
//!    when an outer logging middleware installed one
//!
//! A panic whose payload is [`AbortConnection`] is not recovered. It is
//! resumed so that the connection is dropped without a response.
//!
//! Recovery belongs at the outermost position of the global pipeline. Inner
//! logging then never sees the panic, and the recovery event is the only
//! error line for the request.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures_util::FutureExt;
use http::StatusCode;
use keel_core::{AbortConnection, Error, ErrorReporter, GlobalReporter, RequestExt};

use crate::middleware::{BoxFuture, Middleware, Next};
use crate::types::{empty_response, Request, Response};

/// Middleware that recovers from handler panics.
#[derive(Clone)]
pub struct RecoveryMiddleware {
    reporter: Arc<dyn ErrorReporter>,
}

impl Default for RecoveryMiddleware {
    fn default() -> Self {
        Self::new()
    }
}

impl RecoveryMiddleware {
    /// Creates a recovery middleware that reports to the process-wide reporter.
    #[must_use]
    pub fn new() -> Self {
        Self::with_reporter(Arc::new(GlobalReporter))
    }

    /// Creates a recovery middleware that reports to `reporter`.
    #[must_use]
    pub fn with_reporter(reporter: Arc<dyn ErrorReporter>) -> Self {
        Self { reporter }
    }
}

impl std::fmt::Debug for RecoveryMiddleware {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecoveryMiddleware").finish_non_exhaustive()
    }
}

enum Recovered {
    AbortConnection(Box<dyn Any + Send>),
    Recoverable(Error),
}

impl Recovered {
    fn classify(payload: Box<dyn Any + Send>) -> Self {
        if payload.is::<AbortConnection>() {
            return Self::AbortConnection(payload);
        }

        let payload = match payload.downcast::<Error>() {
            Ok(err) => return Self::Recoverable(*err),
            Err(payload) => payload,
        };

        let message = payload
            .downcast_ref::<&'static str>()
            .map(|s| (*s).to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "non-string panic payload".to_string());

        Self::Recoverable(Error::internal(format!("recovered from panic: {message}")))
    }
}

impl Middleware for RecoveryMiddleware {
    fn name(&self) -> &'static str {
        "recovery"
    }

    fn process<'a>(&'a self, request: Request, next: Next<'a>) -> BoxFuture<'a, Response> {
        Box::pin(async move {
            let method = request.method().clone();
            let route = request.route_label().to_owned();
            let hook = request.error_hook().cloned();

            let payload = match AssertUnwindSafe(next.run(request)).catch_unwind().await {
                Ok(response) => return response,
                Err(payload) => payload,
            };

            let err = match Recovered::classify(payload) {
                Recovered::AbortConnection(payload) => std::panic::resume_unwind(payload),
                Recovered::Recoverable(err) => err,
            };

            tracing::error!(
                method = %method,
                route = %route,
                error = %err,
                "recovered from panic"
            );
            keel_telemetry::record_panic(method.as_str(), &route);
            self.reporter.report(&err);
            if let Some(hook) = hook {
                hook.set(err);
            }

            empty_response(StatusCode::INTERNAL_SERVER_ERROR)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use keel_core::{ErrorHook, RoutePattern};
    use keel_test::{get, metric_value, LogCapture, RecordingReporter};
    use tracing::Level;

    fn panicking(message: &'static str) -> Next<'static> {
        Next::handler(move |_req| -> BoxFuture<'static, Response> { panic!("{message}") })
    }

    #[tokio::test]
    async fn test_recovers_string_panic() {
        keel_telemetry::init_metrics().unwrap();
        let capture = LogCapture::new();
        let _guard = capture.install();
        let reporter = RecordingReporter::new();
        let middleware = RecoveryMiddleware::with_reporter(reporter.shared());

        let mut request = get("/recovery/boom");
        request
            .extensions_mut()
            .insert(RoutePattern::new("/recovery/boom"));

        let response = middleware.process(request, panicking("x")).await;

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let errors = capture.at_level(Level::ERROR);
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("x"));
        assert_eq!(errors[0].field("route"), Some("/recovery/boom"));
        assert_eq!(reporter.messages(), ["recovered from panic: x".to_string()]);
        assert_eq!(
            metric_value(
                "server_panics_total",
                &[("method", "GET"), ("route", "/recovery/boom")]
            ),
            Some(1.0)
        );
    }

    #[tokio::test]
    async fn test_panic_inside_future_is_recovered() {
        let middleware = RecoveryMiddleware::with_reporter(RecordingReporter::new().shared());
        let next = Next::handler(|_req| {
            Box::pin(async {
                tokio::task::yield_now().await;
                panic!("late")
            })
        });

        let response = middleware.process(get("/late"), next).await;
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn test_error_payload_kept_and_written_to_hook() {
        let reporter = RecordingReporter::new();
        let middleware = RecoveryMiddleware::with_reporter(reporter.shared());
        let hook = ErrorHook::new();
        let mut request = get("/typed");
        request.extensions_mut().insert(hook.clone());

        let next = Next::handler(|_req| -> BoxFuture<'static, Response> {
            std::panic::panic_any(Error::unavailable("pool exhausted"))
        });
        let response = middleware.process(request, next).await;

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(hook.message().as_deref(), Some("pool exhausted"));
        assert_eq!(reporter.count(), 1);
    }

    #[tokio::test]
    async fn test_passes_through_without_panic() {
        let reporter = RecordingReporter::new();
        let middleware = RecoveryMiddleware::with_reporter(reporter.shared());
        let next = Next::handler(|_req| Box::pin(async { empty_response(StatusCode::NO_CONTENT) }));

        let response = middleware.process(get("/"), next).await;

        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        assert_eq!(reporter.count(), 0);
    }

    #[tokio::test]
    async fn test_abort_connection_is_resumed() {
        let reporter = RecordingReporter::new();
        let middleware = RecoveryMiddleware::with_reporter(reporter.shared());
        let next = Next::handler(|_req| -> BoxFuture<'static, Response> { AbortConnection::raise() });

        let outcome = AssertUnwindSafe(middleware.process(get("/abort"), next))
            .catch_unwind()
            .await;

        let payload = outcome.unwrap_err();
        assert!(payload.is::<AbortConnection>());
        assert_eq!(reporter.count(), 0);
    }

    #[test]
    fn test_middleware_name() {
        assert_eq!(RecoveryMiddleware::new().name(), "recovery");
    }
}
