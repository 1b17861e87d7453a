//! Request metrics middleware.
//!
//! Records `http_request_duration_seconds` and `http_requests_total` for
//! every request, labeled by method, matched route pattern and final status.
//! The route label comes from the router (see
//! [`RequestExt::route_label`]); requests that matched no route are counted
//! under `unmatched`, so the label set stays bounded no matter what paths
//! clients send.

use std::time::Instant;

use keel_core::RequestExt;

use crate::middleware::{BoxFuture, Middleware, Next};
use crate::observe::ObservedResponse;
use crate::types::{Request, Response};

/// Middleware that records request latency and counts.
#[derive(Debug, Clone, Copy, Default)]
pub struct MetricsMiddleware;

impl MetricsMiddleware {
    /// Creates the middleware.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl Middleware for MetricsMiddleware {
    fn name(&self) -> &'static str {
        "metrics"
    }

    fn process<'a>(&'a self, request: Request, next: Next<'a>) -> BoxFuture<'a, Response> {
        Box::pin(async move {
            let start = Instant::now();
            let method = request.method().clone();
            let route = request.route_label().to_owned();

            let response = next.run(request).await;

            let observed = ObservedResponse::of(&response);
            keel_telemetry::record_request(
                method.as_str(),
                &route,
                observed.status.as_u16(),
                start.elapsed(),
            );

            response
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::empty_response;
    use http::StatusCode;
    use keel_core::RoutePattern;
    use keel_test::{get, metric_value};

    #[tokio::test]
    async fn test_records_by_route_pattern() {
        keel_telemetry::init_metrics().unwrap();
        let middleware = MetricsMiddleware::new();

        for id in ["1", "2"] {
            let mut request = get(&format!("/metrics-stage/items/{id}"));
            request
                .extensions_mut()
                .insert(RoutePattern::new("/metrics-stage/items/{id}"));
            let next = Next::handler(|_req| Box::pin(async { empty_response(StatusCode::CREATED) }));
            middleware.process(request, next).await;
        }

        let count = metric_value(
            "http_requests_total",
            &[
                ("method", "GET"),
                ("route", "/metrics-stage/items/{id}"),
                ("code", "201"),
            ],
        );
        assert_eq!(count, Some(2.0));
    }

    #[tokio::test]
    async fn test_unmatched_label() {
        keel_telemetry::init_metrics().unwrap();
        let middleware = MetricsMiddleware::new();

        let next = Next::handler(|_req| Box::pin(async { empty_response(StatusCode::IM_A_TEAPOT) }));
        middleware
            .process(keel_test::request(http::Method::PATCH, "/nowhere"), next)
            .await;

        let count = metric_value(
            "http_requests_total",
            &[("method", "PATCH"), ("route", "unmatched"), ("code", "418")],
        );
        assert_eq!(count, Some(1.0));
    }

    #[test]
    fn test_middleware_name() {
        assert_eq!(MetricsMiddleware::new().name(), "metrics");
    }
}
