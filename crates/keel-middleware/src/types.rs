//! Common types used throughout the middleware pipeline.

use std::future::Future;

use bytes::Bytes;
use http::StatusCode;
use http_body_util::Full;

use crate::middleware::BoxFuture;

/// The HTTP request type used in the middleware pipeline.
///
/// This is a standard `http::Request` with a `Full<Bytes>` body.
pub type Request = http::Request<Full<Bytes>>;

/// The HTTP response type used in the middleware pipeline.
///
/// This is a standard `http::Response` with a `Full<Bytes>` body.
pub type Response = http::Response<Full<Bytes>>;

/// Terminal request handler.
///
/// Implemented for every `Fn(Request) -> impl Future<Output = Response>`
/// closure or async function.
///
/// # Example
///
/// ```
/// use keel_middleware::{Handler, Request, Response};
/// use keel_middleware::types::text_response;
/// use http::StatusCode;
///
/// async fn hello(_request: Request) -> Response {
///     text_response(StatusCode::OK, "hello")
/// }
///
/// fn assert_handler<H: Handler>(_: H) {}
/// assert_handler(hello);
/// ```
pub trait Handler: Send + Sync + 'static {
    /// Produces the response for `request`.
    fn call(&self, request: Request) -> BoxFuture<'static, Response>;
}

impl<F, Fut> Handler for F
where
    F: Fn(Request) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Response> + Send + 'static,
{
    fn call(&self, request: Request) -> BoxFuture<'static, Response> {
        Box::pin(self(request))
    }
}

/// Builds a response with the given status and an empty body.
#[must_use]
pub fn empty_response(status: StatusCode) -> Response {
    let mut response = Response::new(Full::new(Bytes::new()));
    *response.status_mut() = status;
    response
}

/// Builds a `text/plain` response.
#[must_use]
pub fn text_response(status: StatusCode, body: impl Into<Bytes>) -> Response {
    let mut response = Response::new(Full::new(body.into()));
    *response.status_mut() = status;
    response.headers_mut().insert(
        http::header::CONTENT_TYPE,
        http::HeaderValue::from_static("text/plain; charset=utf-8"),
    );
    response
}
