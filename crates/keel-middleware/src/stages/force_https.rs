//! Redirect to HTTPS.

use http::header::LOCATION;
use http::{HeaderValue, StatusCode};

use crate::middleware::{BoxFuture, Middleware, Next};
use crate::types::{empty_response, Request, Response};

/// Middleware that answers every request with a permanent redirect to the
/// same path on `https://{addr}`.
///
/// Only the path is carried over; the query string is dropped. Typically
/// mounted alone on a plain-HTTP listener next to a TLS one.
///
/// # Example
///
/// ```
/// use keel_middleware::stages::ForceHttpsMiddleware;
///
/// let redirect = ForceHttpsMiddleware::new("example.com:8443");
/// assert_eq!(redirect.target_for("/login"), "https://example.com:8443/login");
/// ```
#[derive(Debug, Clone)]
pub struct ForceHttpsMiddleware {
    addr: String,
}

impl ForceHttpsMiddleware {
    /// Creates a redirecting middleware for the HTTPS authority `addr`.
    #[must_use]
    pub fn new(addr: impl Into<String>) -> Self {
        Self { addr: addr.into() }
    }

    /// Returns the redirect target for `path`.
    #[must_use]
    pub fn target_for(&self, path: &str) -> String {
        format!("https://{}{}", self.addr, path)
    }
}

impl Middleware for ForceHttpsMiddleware {
    fn name(&self) -> &'static str {
        "force_https"
    }

    fn process<'a>(&'a self, request: Request, _next: Next<'a>) -> BoxFuture<'a, Response> {
        Box::pin(async move {
            let target = self.target_for(request.uri().path());
            let mut response = empty_response(StatusCode::MOVED_PERMANENTLY);
            match HeaderValue::try_from(target) {
                Ok(location) => {
                    response.headers_mut().insert(LOCATION, location);
                }
                Err(err) => {
                    tracing::warn!(error = %err, addr = %self.addr, "invalid https redirect target");
                    *response.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
                }
            }
            response
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use keel_test::get;

    #[tokio::test]
    async fn test_redirects_with_path() {
        let middleware = ForceHttpsMiddleware::new("secure.local:443");
        let next = Next::handler(|_req| -> BoxFuture<'static, Response> {
            unreachable!("redirect must not call downstream")
        });

        let response = middleware.process(get("/a/b?q=1"), next).await;

        assert_eq!(response.status(), StatusCode::MOVED_PERMANENTLY);
        assert_eq!(
            response.headers().get(LOCATION).unwrap(),
            "https://secure.local:443/a/b"
        );
    }

    #[tokio::test]
    async fn test_invalid_authority_is_a_server_error() {
        let middleware = ForceHttpsMiddleware::new("bad\nhost");
        let next = Next::handler(|_req| -> BoxFuture<'static, Response> { unreachable!() });

        let response = middleware.process(get("/"), next).await;
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
