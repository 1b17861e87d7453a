//! Test request building.

use crate::error::TestError;
use bytes::Bytes;
use http::{header, HeaderMap, HeaderName, HeaderValue, Method};
use http_body_util::Full;

/// Request type accepted by Keel middleware and handlers.
pub type Request = http::Request<Full<Bytes>>;

/// Builds an in-memory GET request with an empty body.
///
/// # Panics
///
/// Panics if `uri` is not a valid URI.
pub fn get(uri: impl AsRef<str>) -> Request {
    request(Method::GET, uri)
}

/// Builds an in-memory request with an empty body.
///
/// # Panics
///
/// Panics if `uri` is not a valid URI.
pub fn request(method: Method, uri: impl AsRef<str>) -> Request {
    http::Request::builder()
        .method(method)
        .uri(uri.as_ref())
        .body(Full::new(Bytes::new()))
        .expect("valid test request")
}

/// A request to be sent over a real connection by a
/// [`TestClient`](crate::TestClient).
#[derive(Debug, Clone)]
pub struct TestRequest {
    /// HTTP method
    pub method: Method,
    /// Request path and query
    pub path: String,
    /// Request headers
    pub headers: HeaderMap,
    /// Request body
    pub body: Bytes,
}

impl TestRequest {
    /// Creates a new GET request.
    pub fn get(path: impl AsRef<str>) -> TestRequestBuilder {
        TestRequestBuilder::new(Method::GET, path)
    }

    /// Creates a new POST request.
    pub fn post(path: impl AsRef<str>) -> TestRequestBuilder {
        TestRequestBuilder::new(Method::POST, path)
    }

    /// Creates a new HEAD request.
    pub fn head(path: impl AsRef<str>) -> TestRequestBuilder {
        TestRequestBuilder::new(Method::HEAD, path)
    }

    /// Converts this request to an HTTP request addressed to `authority`.
    pub(crate) fn into_http(self, authority: &str) -> Result<Request, TestError> {
        let mut builder = http::Request::builder()
            .method(self.method)
            .uri(self.path)
            .header(header::HOST, authority);

        for (name, value) in &self.headers {
            builder = builder.header(name, value);
        }

        builder
            .body(Full::new(self.body))
            .map_err(|e| TestError::RequestBuild(e.to_string()))
    }
}

/// Builder for constructing test requests.
#[must_use]
#[derive(Debug)]
pub struct TestRequestBuilder {
    method: Method,
    path: String,
    headers: HeaderMap,
    body: Option<Bytes>,
    error: Option<String>,
}

impl TestRequestBuilder {
    /// Creates a new request builder.
    pub fn new(method: Method, path: impl AsRef<str>) -> Self {
        Self {
            method,
            path: path.as_ref().to_string(),
            headers: HeaderMap::new(),
            body: None,
            error: None,
        }
    }

    /// Sets a header on the request.
    ///
    /// Invalid names or values are reported by [`build`](Self::build).
    pub fn header(mut self, name: impl AsRef<str>, value: impl AsRef<str>) -> Self {
        match (
            HeaderName::try_from(name.as_ref()),
            HeaderValue::try_from(value.as_ref()),
        ) {
            (Ok(name), Ok(value)) => {
                self.headers.insert(name, value);
            }
            _ => {
                self.error = Some(format!("invalid header: {}", name.as_ref()));
            }
        }
        self
    }

    /// Sets the raw request body.
    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Builds the test request.
    pub fn build(self) -> Result<TestRequest, TestError> {
        if let Some(error) = self.error {
            return Err(TestError::RequestBuild(error));
        }

        Ok(TestRequest {
            method: self.method,
            path: self.path,
            headers: self.headers,
            body: self.body.unwrap_or_default(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_helper() {
        let req = get("/users?page=2");
        assert_eq!(req.method(), Method::GET);
        assert_eq!(req.uri().path(), "/users");
        assert_eq!(req.uri().query(), Some("page=2"));
    }

    #[test]
    fn test_builder_with_headers_and_body() {
        let request = TestRequest::post("/items")
            .header("x-request-id", "abc")
            .body("widget")
            .build()
            .unwrap();

        assert_eq!(request.method, Method::POST);
        assert_eq!(request.headers.get("x-request-id").unwrap(), "abc");
        assert_eq!(request.body, Bytes::from("widget"));
    }

    #[test]
    fn test_invalid_header_fails_build() {
        let result = TestRequest::get("/").header("bad header", "x").build();
        assert!(matches!(result, Err(TestError::RequestBuild(_))));
    }

    #[test]
    fn test_into_http_request_sets_host() {
        let request = TestRequest::get("/health").build().unwrap();
        let http = request.into_http("127.0.0.1:8080").unwrap();
        assert_eq!(http.headers().get(header::HOST).unwrap(), "127.0.0.1:8080");
        assert_eq!(http.uri().path(), "/health");
    }
}
