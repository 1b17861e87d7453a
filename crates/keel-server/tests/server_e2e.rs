//! End-to-end tests against a server bound to a real socket.

use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use http::{Method, StatusCode};
use http_body_util::{BodyExt, Full};
use hyper_util::rt::TokioIo;
use keel_core::{AbortConnection, BoxFuture, Error, HealthChecker, RequestExt};
use keel_middleware::stages::{
    LoggingMiddleware, MetricsMiddleware, RecoveryMiddleware, RequestIdMiddleware,
    ACCESS_LOG_TARGET, REQUEST_ID_HEADER,
};
use keel_middleware::pipeline::BoxedMiddleware;
use keel_middleware::{text_response, FnMiddleware, Request, Response};
use keel_server::config::{HealthEndpoint, MetricsEndpoint, ProfilerEndpoint, ServerConfig};
use keel_server::{respond, PathParams, Router, Server, ServerError, ShutdownSignal};
use keel_test::{metric_value, LogCapture, RecordingReporter, TestClient, TestRequest};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio_rustls::rustls;
use tracing::Level;

struct Running {
    client: TestClient,
    shutdown: ShutdownSignal,
    handle: JoinHandle<Result<(), ServerError>>,
}

impl Running {
    async fn stop(self) -> Result<(), ServerError> {
        self.shutdown.trigger();
        self.handle.await.unwrap()
    }
}

async fn start(server: Server) -> Running {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let client = TestClient::new(listener.local_addr().unwrap());
    let shutdown = ShutdownSignal::new();
    let handle = tokio::spawn(server.serve_on(listener, shutdown.clone()));

    Running {
        client,
        shutdown,
        handle,
    }
}

struct Healthy;

impl HealthChecker for Healthy {
    fn health(&self) -> BoxFuture<'_, Result<(), Error>> {
        Box::pin(async { Ok(()) })
    }
}

struct Unhealthy;

impl HealthChecker for Unhealthy {
    fn health(&self) -> BoxFuture<'_, Result<(), Error>> {
        Box::pin(async { Err(Error::unavailable("database unreachable")) })
    }
}

async fn ok(_request: Request) -> Response {
    text_response(StatusCode::OK, "ok")
}

async fn boom(_request: Request) -> Response {
    panic!("x")
}

async fn abort(_request: Request) -> Response {
    AbortConnection::raise()
}

#[tokio::test]
async fn test_invalid_endpoint_route_fails_before_serving() {
    let config = ServerConfig::builder()
        .metrics(MetricsEndpoint::new().route("metrics"))
        .build();

    let err = Server::new("127.0.0.1:0", config).unwrap_err();
    assert!(err.is_startup());
    assert!(err.to_string().contains("invalid metrics route"));
}

#[tokio::test]
async fn test_health_without_metrics_is_quiet() {
    let capture = LogCapture::new();
    let _guard = capture.install();
    let reporter = RecordingReporter::new();

    let config = ServerConfig::builder()
        .middleware(RecoveryMiddleware::with_reporter(reporter.shared()))
        .health(HealthEndpoint::new().checker(Some(Arc::new(Healthy))))
        .build();
    let running = start(Server::new("127.0.0.1:0", config).unwrap()).await;

    let response = running.client.get("/health").send().await;

    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.body().is_empty());
    assert_eq!(reporter.count(), 0);
    assert!(capture.at_level(Level::ERROR).is_empty());
    assert_eq!(
        metric_value(
            "http_requests_total",
            &[("method", "GET"), ("route", "/health"), ("code", "200")]
        ),
        None
    );

    running.stop().await.unwrap();
}

#[tokio::test]
async fn test_unhealthy_checker_maps_to_503() {
    let capture = LogCapture::new();
    let _guard = capture.install();

    let config = ServerConfig::builder()
        .health(
            HealthEndpoint::new()
                .route("/ready")
                .access_log(true)
                .checker(Some(Arc::new(Unhealthy))),
        )
        .build();
    let running = start(Server::new("127.0.0.1:0", config).unwrap()).await;

    let response = running.client.get("/ready").send().await;

    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(response.text().unwrap(), "Service Unavailable");

    let access = capture.for_target(ACCESS_LOG_TARGET);
    assert_eq!(access.len(), 1);
    assert_eq!(access[0].level, Level::ERROR);
    assert_eq!(access[0].field("error"), Some("database unreachable"));

    running.stop().await.unwrap();
}

#[tokio::test]
async fn test_panicking_handler_behind_standard_stack() {
    let capture = LogCapture::new();
    let _guard = capture.install();
    let reporter = RecordingReporter::new();

    let config = ServerConfig::builder()
        .middleware(RecoveryMiddleware::with_reporter(reporter.shared()))
        .middleware(LoggingMiddleware::with_reporter(reporter.shared()))
        .middleware(MetricsMiddleware::new())
        .build();
    let mut server = Server::new("127.0.0.1:0", config).unwrap();
    server
        .mount(
            "/",
            Router::new().get("/boom", boom),
            Vec::new(),
        )
        .unwrap();
    let running = start(server).await;

    let response = running.client.get("/boom").send().await;

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let errors = capture.at_level(Level::ERROR);
    assert_eq!(errors.len(), 1);
    assert!(errors[0].contains("x"));
    assert_eq!(reporter.count(), 1);
    assert_eq!(
        metric_value(
            "server_panics_total",
            &[("method", "GET"), ("route", "/boom")]
        ),
        Some(1.0)
    );

    running.stop().await.unwrap();
}

#[tokio::test]
async fn test_abort_drops_connection_without_response() {
    let reporter = RecordingReporter::new();
    let config = ServerConfig::builder()
        .middleware(RecoveryMiddleware::with_reporter(reporter.shared()))
        .middleware(LoggingMiddleware::with_reporter(reporter.shared()))
        .build();
    let mut server = Server::new("127.0.0.1:0", config).unwrap();
    server
        .mount(
            "/",
            Router::new().get("/abort", abort),
            Vec::new(),
        )
        .unwrap();
    let running = start(server).await;

    let result = running.client.get("/abort").try_send().await;

    assert!(result.is_err());
    assert_eq!(reporter.count(), 0);
    assert_eq!(
        metric_value(
            "server_panics_total",
            &[("method", "GET"), ("route", "/abort")]
        ),
        None
    );

    running.stop().await.unwrap();
}

#[tokio::test]
async fn test_hooked_error_logs_once() {
    let capture = LogCapture::new();
    let _guard = capture.install();
    let reporter = RecordingReporter::new();

    let config = ServerConfig::builder()
        .middleware(LoggingMiddleware::with_reporter(reporter.shared()))
        .build();
    let mut server = Server::new("127.0.0.1:0", config).unwrap();
    server
        .mount(
            "/",
            Router::new()
                .get("/orders/{id}", |request: Request| async move {
                    respond::error(&request, Error::unavailable("orders db down"))
                })
                .get("/fine", ok),
            Vec::new(),
        )
        .unwrap();
    let running = start(server).await;

    let response = running.client.get("/orders/7").send().await;
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(response.text().unwrap(), "Service Unavailable");

    let errors = capture.at_level(Level::ERROR);
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].field("error"), Some("orders db down"));
    assert_eq!(reporter.messages(), ["orders db down"]);

    capture.clear();
    let response = running.client.get("/fine").send().await;
    assert_eq!(response.status(), StatusCode::OK);

    let access = capture.for_target(ACCESS_LOG_TARGET);
    assert_eq!(access.len(), 1);
    assert_eq!(access[0].level, Level::INFO);
    assert_eq!(reporter.count(), 1);

    running.stop().await.unwrap();
}

#[tokio::test]
async fn test_method_not_allowed_and_not_found() {
    let config = ServerConfig::builder()
        .middleware(MetricsMiddleware::new())
        .build();
    let mut server = Server::new("127.0.0.1:0", config).unwrap();
    server
        .mount("/catalog", Router::new().get("/items", ok), Vec::new())
        .unwrap();
    let running = start(server).await;

    let response = running.client.post("/catalog/items").send().await;
    assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
    assert_eq!(response.text().unwrap(), "Method Not Allowed");

    let response = running.client.get("/catalog/missing").send().await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    assert_eq!(
        metric_value(
            "http_requests_total",
            &[("method", "POST"), ("route", "unmatched"), ("code", "405")]
        ),
        Some(1.0)
    );

    running.stop().await.unwrap();
}

#[tokio::test]
async fn test_path_params_and_local_middleware() {
    let tag = FnMiddleware::new("tag", |request, next| {
        Box::pin(async move {
            let mut response = next.run(request).await;
            response
                .headers_mut()
                .insert("x-mounted", http::HeaderValue::from_static("users"));
            response
        })
    });

    let mut server = Server::new("127.0.0.1:0", ServerConfig::default()).unwrap();
    server
        .mount(
            "/users",
            Router::new().get("/{id}", |request: Request| async move {
                let id = request
                    .extensions()
                    .get::<PathParams>()
                    .and_then(|params| params.get("id"))
                    .unwrap_or_default()
                    .to_string();
                text_response(StatusCode::OK, id)
            }),
            vec![Arc::new(tag) as BoxedMiddleware],
        )
        .unwrap();
    let running = start(server).await;

    let response = running.client.get("/users/42").send().await;
    assert_eq!(response.text().unwrap(), "42");
    assert_eq!(response.header_str("x-mounted"), Some("users"));

    running.stop().await.unwrap();
}

#[tokio::test]
async fn test_request_id_is_stable_within_a_request() {
    let config = ServerConfig::builder()
        .middleware(RequestIdMiddleware::from_headers([REQUEST_ID_HEADER]))
        .middleware(RequestIdMiddleware::new())
        .build();
    let mut server = Server::new("127.0.0.1:0", config).unwrap();
    server
        .mount(
            "/",
            Router::new().get("/whoami", |request: Request| async move {
                let id = request
                    .request_id()
                    .map(|id| id.as_str().to_string())
                    .unwrap_or_default();
                text_response(StatusCode::OK, id)
            }),
            Vec::new(),
        )
        .unwrap();
    let running = start(server).await;

    let response = running
        .client
        .get("/whoami")
        .header(REQUEST_ID_HEADER, "trace-7")
        .send()
        .await;
    assert_eq!(response.text().unwrap(), "trace-7");
    assert_eq!(response.header_str(REQUEST_ID_HEADER), Some("trace-7"));

    let response = running.client.get("/whoami").send().await;
    let generated = response.text().unwrap();
    assert_eq!(generated.len(), 36);
    assert_eq!(response.header_str(REQUEST_ID_HEADER), Some(generated.as_str()));

    running.stop().await.unwrap();
}

#[tokio::test]
async fn test_metrics_and_profiler_endpoints() {
    let config = ServerConfig::builder()
        .metrics(MetricsEndpoint::new().metrics(true))
        .profiler(ProfilerEndpoint::new())
        .build();
    let running = start(Server::new("127.0.0.1:0", config).unwrap()).await;

    let _ = running.client.get("/metrics").send().await;
    let response = running.client.get("/metrics").send().await;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(response
        .text()
        .unwrap()
        .contains("http_requests_total{method=\"GET\",route=\"/metrics\",code=\"200\"}"));

    let response = running.client.get("/debug/pprof/cmdline").send().await;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(!response.body().is_empty());

    let response = running.client.head("/debug/pprof").send().await;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.body().is_empty());

    let response = running
        .client
        .request(Method::DELETE, "/debug/pprof/symbol")
        .send()
        .await;
    assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);

    running.stop().await.unwrap();
}

#[tokio::test]
async fn test_write_timeout_answers_503_through_pipeline() {
    let capture = LogCapture::new();
    let _guard = capture.install();

    let config = ServerConfig::builder()
        .middleware(LoggingMiddleware::new())
        .middleware(MetricsMiddleware::new())
        .write_timeout(Duration::from_millis(50))
        .build();
    let mut server = Server::new("127.0.0.1:0", config).unwrap();
    server
        .mount(
            "/",
            Router::new().get("/stuck", |_request: Request| async move {
                tokio::time::sleep(Duration::from_secs(30)).await;
                text_response(StatusCode::OK, "late")
            }),
            Vec::new(),
        )
        .unwrap();
    let running = start(server).await;

    let response = running.client.get("/stuck").send().await;
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

    let access = capture.for_target(ACCESS_LOG_TARGET);
    assert_eq!(access.len(), 1);
    assert_eq!(access[0].level, Level::ERROR);
    assert_eq!(
        metric_value(
            "http_requests_total",
            &[("method", "GET"), ("route", "/stuck"), ("code", "503")]
        ),
        Some(1.0)
    );

    running.stop().await.unwrap();
}

#[tokio::test]
async fn test_read_timeout_answers_408_through_pipeline() {
    let capture = LogCapture::new();
    let _guard = capture.install();

    let config = ServerConfig::builder()
        .middleware(LoggingMiddleware::new())
        .middleware(MetricsMiddleware::new())
        .read_timeout(Duration::from_millis(100))
        .build();
    let mut server = Server::new("127.0.0.1:0", config).unwrap();
    server
        .mount("/", Router::new().post("/upload", ok), Vec::new())
        .unwrap();
    let running = start(server).await;

    let mut stream = TcpStream::connect(running.client.addr()).await.unwrap();
    stream
        .write_all(b"POST /upload HTTP/1.1\r\nhost: localhost\r\ncontent-length: 64\r\n\r\npartial")
        .await
        .unwrap();

    let head = tokio::time::timeout(Duration::from_secs(2), async {
        let mut received = Vec::new();
        let mut buf = [0_u8; 1024];
        while !received.windows(4).any(|w| w == b"\r\n\r\n") {
            let n = stream.read(&mut buf).await.unwrap();
            if n == 0 {
                break;
            }
            received.extend_from_slice(&buf[..n]);
        }
        String::from_utf8_lossy(&received).into_owned()
    })
    .await
    .expect("server should answer before the body arrives");
    assert!(head.starts_with("HTTP/1.1 408"), "unexpected response: {head}");

    let access = capture.for_target(ACCESS_LOG_TARGET);
    assert_eq!(access.len(), 1);
    assert_eq!(access[0].level, Level::ERROR);
    assert_eq!(
        metric_value(
            "http_requests_total",
            &[("method", "POST"), ("route", "/upload"), ("code", "408")]
        ),
        Some(1.0)
    );

    drop(stream);
    running.stop().await.unwrap();
}

#[tokio::test]
async fn test_shutdown_closes_idle_keep_alive_connections() {
    let mut server = Server::new("127.0.0.1:0", ServerConfig::default()).unwrap();
    server
        .mount("/", Router::new().get("/ping", ok), Vec::new())
        .unwrap();
    let running = start(server).await;

    let mut connection = running.client.connect().await.unwrap();
    let request = TestRequest::get("/ping").build().unwrap();
    let response = connection.send(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    running.shutdown.trigger();
    let _ = tokio::time::timeout(Duration::from_secs(2), connection.closed())
        .await
        .expect("connection should close on shutdown");

    running.handle.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_idle_timeout_closes_connection() {
    let config = ServerConfig::builder()
        .idle_timeout(Duration::from_millis(100))
        .build();
    let mut server = Server::new("127.0.0.1:0", config).unwrap();
    server
        .mount("/", Router::new().get("/ping", ok), Vec::new())
        .unwrap();
    let running = start(server).await;

    let mut connection = running.client.connect().await.unwrap();
    let request = TestRequest::get("/ping").build().unwrap();
    connection.send(request).await.unwrap();

    let _ = tokio::time::timeout(Duration::from_secs(2), connection.closed())
        .await
        .expect("idle connection should be closed");

    running.stop().await.unwrap();
}

#[tokio::test]
async fn test_shutdown_returns_within_timeout_despite_slow_request() {
    let started = Arc::new(Notify::new());
    let signal = Arc::clone(&started);

    let config = ServerConfig::builder()
        .shutdown_timeout(Duration::from_millis(200))
        .write_timeout(Duration::from_secs(60))
        .build();
    let mut server = Server::new("127.0.0.1:0", config).unwrap();
    server
        .mount(
            "/",
            Router::new().get("/slow", move |_request: Request| {
                let signal = Arc::clone(&signal);
                async move {
                    signal.notify_one();
                    tokio::time::sleep(Duration::from_secs(30)).await;
                    text_response(StatusCode::OK, "late")
                }
            }),
            Vec::new(),
        )
        .unwrap();
    let running = start(server).await;

    let client = running.client.clone();
    let _in_flight = tokio::spawn(async move { client.get("/slow").try_send().await });
    started.notified().await;

    let begin = Instant::now();
    let result = running.stop().await;

    assert!(begin.elapsed() < Duration::from_secs(2));
    match result {
        Err(ServerError::ShutdownTimeout { timeout, active }) => {
            assert_eq!(timeout, Duration::from_millis(200));
            assert_eq!(active, 1);
        }
        other => panic!("expected shutdown timeout, got {other:?}"),
    }
}

#[tokio::test]
async fn test_serve_tls_rejects_missing_certificate() {
    let server = Server::new("127.0.0.1:0", ServerConfig::default()).unwrap();

    let err = server
        .serve_tls(
            ShutdownSignal::new(),
            "/nonexistent/cert.pem",
            "/nonexistent/key.pem",
        )
        .await
        .unwrap_err();

    assert!(matches!(err, ServerError::Tls(_)));
    assert!(err.is_startup());
}

#[tokio::test]
async fn test_serve_tls_completes_handshake_and_request() {
    let rcgen::CertifiedKey { cert, key_pair } =
        rcgen::generate_simple_self_signed(vec!["localhost".to_string()]).unwrap();
    let dir = tempfile::tempdir().unwrap();
    let cert_path = dir.path().join("cert.pem");
    let key_path = dir.path().join("key.pem");
    std::fs::write(&cert_path, cert.pem()).unwrap();
    std::fs::write(&key_path, key_pair.serialize_pem()).unwrap();

    let addr = {
        let reserved = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        reserved.local_addr().unwrap()
    };
    let mut server = Server::new(addr.to_string(), ServerConfig::default()).unwrap();
    server
        .mount("/", Router::new().get("/secure", ok), Vec::new())
        .unwrap();
    let shutdown = ShutdownSignal::new();
    let handle = tokio::spawn(server.serve_tls(shutdown.clone(), cert_path, key_path));

    let mut roots = rustls::RootCertStore::empty();
    roots.add(cert.der().clone()).unwrap();
    let client_config = rustls::ClientConfig::builder()
        .with_root_certificates(roots)
        .with_no_client_auth();
    let connector = tokio_rustls::TlsConnector::from(Arc::new(client_config));

    let stream = connect_when_listening(addr).await;
    let server_name = rustls::pki_types::ServerName::try_from("localhost").unwrap();
    let tls = connector.connect(server_name, stream).await.unwrap();

    let (mut sender, conn) = hyper::client::conn::http1::handshake(TokioIo::new(tls))
        .await
        .unwrap();
    tokio::spawn(conn);
    let request = http::Request::builder()
        .uri("/secure")
        .header(http::header::HOST, "localhost")
        .body(Full::new(Bytes::new()))
        .unwrap();
    let response = sender.send_request(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = response.into_body().collect().await.unwrap().to_bytes();
    assert_eq!(body, Bytes::from("ok"));

    drop(sender);
    shutdown.trigger();
    handle.await.unwrap().unwrap();
}

async fn connect_when_listening(addr: std::net::SocketAddr) -> TcpStream {
    for _ in 0..50 {
        if let Ok(stream) = TcpStream::connect(addr).await {
            return stream;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("server did not start listening on {addr}");
}
