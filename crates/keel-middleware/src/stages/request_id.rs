//! Request ID middleware.
//!
//! Assigns every request an identifier used to correlate log lines.
//!
//! ## Request ID Sources
//!
//! 1. **Configured headers**: scanned in order, the first present value wins
//! 2. **Generated UUID v7**: if no configured header is present (or none
//!    are configured)
//!
//! An ID already present in the request's extensions is reused, so the ID
//! never changes within one pass through the pipeline.
//!
//! ## Response Header
//!
//! The chosen ID is echoed on the response under the first configured header
//! name (`x-request-id` by default) unless the handler already set it.

use crate::middleware::{BoxFuture, Middleware, Next};
use crate::types::{Request, Response};
use http::{HeaderName, HeaderValue};
use keel_core::{RequestExt, RequestId};

/// The default header name for request ID propagation.
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Middleware that propagates or generates request IDs.
///
/// # Example
///
/// ```
/// use keel_middleware::stages::RequestIdMiddleware;
///
/// // Always generate.
/// let generating = RequestIdMiddleware::new();
///
/// // Trust IDs set by an upstream proxy.
/// let propagating = RequestIdMiddleware::from_headers(["x-request-id", "x-amzn-trace-id"]);
/// assert_eq!(propagating.headers().len(), 2);
/// ```
#[derive(Debug, Clone)]
pub struct RequestIdMiddleware {
    headers: Vec<HeaderName>,
    response_header: HeaderName,
}

impl Default for RequestIdMiddleware {
    fn default() -> Self {
        Self::new()
    }
}

impl RequestIdMiddleware {
    /// Creates a middleware that ignores inbound headers and always
    /// generates a new ID.
    #[must_use]
    pub fn new() -> Self {
        Self {
            headers: Vec::new(),
            response_header: HeaderName::from_static(REQUEST_ID_HEADER),
        }
    }

    /// Creates a middleware that takes the ID from the first of `headers`
    /// present on the request.
    ///
    /// Names that are not valid header names are skipped.
    #[must_use]
    pub fn from_headers<I, S>(headers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let headers: Vec<HeaderName> = headers
            .into_iter()
            .filter_map(|name| HeaderName::try_from(name.as_ref()).ok())
            .collect();
        let response_header = headers
            .first()
            .cloned()
            .unwrap_or_else(|| HeaderName::from_static(REQUEST_ID_HEADER));

        Self {
            headers,
            response_header,
        }
    }

    /// Returns the inbound headers scanned for an ID, in order.
    #[must_use]
    pub fn headers(&self) -> &[HeaderName] {
        &self.headers
    }

    fn resolve(&self, request: &Request) -> RequestId {
        if let Some(existing) = request.request_id() {
            return existing.clone();
        }

        self.headers
            .iter()
            .filter_map(|name| request.headers().get(name))
            .filter_map(|value| value.to_str().ok())
            .find(|value| !value.is_empty())
            .map_or_else(RequestId::new, RequestId::from_header)
    }
}

impl Middleware for RequestIdMiddleware {
    fn name(&self) -> &'static str {
        "request_id"
    }

    fn process<'a>(&'a self, mut request: Request, next: Next<'a>) -> BoxFuture<'a, Response> {
        Box::pin(async move {
            let request_id = self.resolve(&request);
            request.extensions_mut().insert(request_id.clone());

            let mut response = next.run(request).await;

            if !response.headers().contains_key(&self.response_header) {
                if let Ok(value) = HeaderValue::from_str(request_id.as_str()) {
                    response
                        .headers_mut()
                        .insert(self.response_header.clone(), value);
                }
            }

            response
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::empty_response;
    use http::StatusCode;
    use keel_test::get;
    use std::sync::{Arc, Mutex};

    /// Hyphenated UUID with version nibble 7.
    fn is_uuid_v7(value: &str) -> bool {
        value.len() == 36 && value.as_bytes()[14] == b'7'
    }

    fn create_request_with_header(name: &str, value: &str) -> Request {
        let mut request = get("/test");
        request
            .headers_mut()
            .insert(HeaderName::try_from(name).unwrap(), value.parse().unwrap());
        request
    }

    /// Runs the middleware, returning the response and the IDs seen downstream.
    async fn run(middleware: &RequestIdMiddleware, request: Request) -> (Response, Vec<String>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let next = Next::handler(move |req: Request| {
            // Read twice: the ID must be stable within one pass.
            for _ in 0..2 {
                sink.lock()
                    .unwrap()
                    .push(req.request_id().unwrap().as_str().to_string());
            }
            Box::pin(async { empty_response(StatusCode::OK) })
        });

        let response = middleware.process(request, next).await;
        let seen = seen.lock().unwrap().clone();
        (response, seen)
    }

    #[tokio::test]
    async fn test_generates_request_id_when_no_headers_configured() {
        let middleware = RequestIdMiddleware::new();
        let request = create_request_with_header(REQUEST_ID_HEADER, "incoming");

        let (response, seen) = run(&middleware, request).await;

        let header_id = response.headers().get(REQUEST_ID_HEADER).unwrap().to_str().unwrap();
        assert_ne!(header_id, "incoming");
        assert!(is_uuid_v7(header_id));
        assert_eq!(seen, [header_id, header_id]);
    }

    #[tokio::test]
    async fn test_uses_first_present_configured_header() {
        let middleware = RequestIdMiddleware::from_headers(["x-correlation-id", "x-request-id"]);
        let request = create_request_with_header("x-request-id", "from-second");

        let (response, seen) = run(&middleware, request).await;

        assert_eq!(seen, ["from-second", "from-second"]);
        // Echoed under the first configured name.
        assert_eq!(
            response.headers().get("x-correlation-id").unwrap(),
            "from-second"
        );
    }

    #[tokio::test]
    async fn test_header_order_decides() {
        let middleware = RequestIdMiddleware::from_headers(["x-first", "x-second"]);
        let mut request = create_request_with_header("x-second", "second");
        request
            .headers_mut()
            .insert("x-first", "first".parse().unwrap());

        let (_, seen) = run(&middleware, request).await;
        assert_eq!(seen[0], "first");
    }

    #[tokio::test]
    async fn test_generates_when_configured_header_missing() {
        let middleware = RequestIdMiddleware::from_headers(["x-request-id"]);
        let (response, seen) = run(&middleware, get("/test")).await;

        assert!(is_uuid_v7(&seen[0]));
        assert_eq!(
            response.headers().get(REQUEST_ID_HEADER).unwrap().to_str().unwrap(),
            seen[0]
        );
    }

    #[tokio::test]
    async fn test_existing_id_is_not_regenerated() {
        let middleware = RequestIdMiddleware::new();
        let mut request = get("/test");
        request
            .extensions_mut()
            .insert(RequestId::from_header("already-set"));

        let (_, seen) = run(&middleware, request).await;
        assert_eq!(seen, ["already-set", "already-set"]);
    }

    #[tokio::test]
    async fn test_does_not_overwrite_handler_header() {
        let middleware = RequestIdMiddleware::new();
        let next = Next::handler(|_req| {
            Box::pin(async {
                let mut response = empty_response(StatusCode::OK);
                response
                    .headers_mut()
                    .insert(REQUEST_ID_HEADER, "handler-set".parse().unwrap());
                response
            })
        });

        let response = middleware.process(get("/test"), next).await;
        assert_eq!(response.headers().get(REQUEST_ID_HEADER).unwrap(), "handler-set");
    }

    #[test]
    fn test_invalid_header_names_are_skipped() {
        let middleware = RequestIdMiddleware::from_headers(["bad header", "x-request-id"]);
        assert_eq!(middleware.headers(), [HeaderName::from_static("x-request-id")]);
    }

    #[test]
    fn test_middleware_name() {
        assert_eq!(RequestIdMiddleware::new().name(), "request_id");
    }
}
