//! HTTP/1.1 test client for servers bound to a real socket.

use crate::error::TestError;
use crate::request::{TestRequest, TestRequestBuilder};
use crate::response::TestResponse;
use bytes::Bytes;
use http::Method;
use http_body_util::Full;
use hyper::client::conn::http1::SendRequest;
use hyper_util::rt::TokioIo;
use std::net::SocketAddr;
use tokio::net::TcpStream;
use tokio::task::JoinHandle;

/// A test client that talks to a running server over TCP.
///
/// Every request sent through [`TestClientRequest::send`] uses a fresh
/// connection. Use [`TestClient::connect`] to keep one connection alive
/// across several requests.
///
/// # Example
///
/// ```ignore
/// use keel_test::TestClient;
///
/// let client = TestClient::new(addr);
/// let response = client.get("/health").send().await;
/// assert_eq!(response.status(), StatusCode::OK);
/// ```
#[derive(Debug, Clone)]
#[must_use]
pub struct TestClient {
    addr: SocketAddr,
}

impl TestClient {
    /// Creates a client for the server listening on `addr`.
    pub fn new(addr: SocketAddr) -> Self {
        Self { addr }
    }

    /// Returns the server address.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Starts a GET request.
    pub fn get(&self, path: impl AsRef<str>) -> TestClientRequest<'_> {
        self.request(Method::GET, path)
    }

    /// Starts a HEAD request.
    pub fn head(&self, path: impl AsRef<str>) -> TestClientRequest<'_> {
        self.request(Method::HEAD, path)
    }

    /// Starts a POST request.
    pub fn post(&self, path: impl AsRef<str>) -> TestClientRequest<'_> {
        self.request(Method::POST, path)
    }

    /// Starts a request with an arbitrary method.
    pub fn request(&self, method: Method, path: impl AsRef<str>) -> TestClientRequest<'_> {
        TestClientRequest {
            client: self,
            builder: TestRequestBuilder::new(method, path),
        }
    }

    /// Opens a keep-alive connection to the server.
    pub async fn connect(&self) -> Result<TestConnection, TestError> {
        let stream = TcpStream::connect(self.addr).await?;
        let (sender, conn) = hyper::client::conn::http1::handshake(TokioIo::new(stream)).await?;
        let task = tokio::spawn(conn);

        Ok(TestConnection {
            sender,
            authority: self.addr.to_string(),
            task,
        })
    }
}

/// A single HTTP/1.1 connection to the server.
pub struct TestConnection {
    sender: SendRequest<Full<Bytes>>,
    authority: String,
    task: JoinHandle<Result<(), hyper::Error>>,
}

impl TestConnection {
    /// Sends a request on this connection and collects the response.
    pub async fn send(&mut self, request: TestRequest) -> Result<TestResponse, TestError> {
        self.sender.ready().await?;
        let request = request.into_http(&self.authority)?;
        let response = self.sender.send_request(request).await?;
        TestResponse::from_http(response).await
    }

    /// Waits until the server closes the connection.
    pub async fn closed(self) -> Result<(), TestError> {
        let Self { sender, task, .. } = self;
        let result = task.await.map_err(|e| TestError::Task(e.to_string()))?;
        drop(sender);
        result.map_err(TestError::from)
    }
}

/// A request builder bound to a test client.
#[must_use]
pub struct TestClientRequest<'a> {
    client: &'a TestClient,
    builder: TestRequestBuilder,
}

impl TestClientRequest<'_> {
    /// Sets a header on the request.
    pub fn header(mut self, name: impl AsRef<str>, value: impl AsRef<str>) -> Self {
        self.builder = self.builder.header(name, value);
        self
    }

    /// Sets the raw request body.
    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.builder = self.builder.body(body);
        self
    }

    /// Sends the request and returns the response.
    ///
    /// # Panics
    ///
    /// Panics if the request cannot be built or the exchange fails.
    pub async fn send(self) -> TestResponse {
        match self.try_send().await {
            Ok(response) => response,
            Err(e) => panic!("request should succeed: {e}"),
        }
    }

    /// Sends the request on a new connection and returns a Result.
    pub async fn try_send(self) -> Result<TestResponse, TestError> {
        let request = self.builder.build()?;
        let mut connection = self.client.connect().await?;
        connection.send(request).await
    }
}
