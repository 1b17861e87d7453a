//! HTTP server implementation.
//!
//! A [`Server`] owns the router, the global middleware pipeline and the
//! listener. [`Server::serve`] consumes it: the accept loop runs until the
//! [`ShutdownSignal`] fires, then open connections are drained for at most
//! the configured shutdown timeout.
//!
//! # Example
//!
//! ```rust,no_run
//! use keel_middleware::stages::{LoggingMiddleware, MetricsMiddleware, RecoveryMiddleware};
//! use keel_middleware::{text_response, Request, Response};
//! use keel_server::config::{HealthEndpoint, ServerConfig};
//! use keel_server::{Router, Server, ShutdownSignal};
//! use http::StatusCode;
//!
//! async fn hello(_request: Request) -> Response {
//!     text_response(StatusCode::OK, "hello")
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ServerConfig::builder()
//!         .middleware(RecoveryMiddleware::new())
//!         .middleware(LoggingMiddleware::new())
//!         .middleware(MetricsMiddleware::new())
//!         .health(HealthEndpoint::new())
//!         .build();
//!
//!     let mut server = Server::new("0.0.0.0:8080", config)?;
//!     server.mount("/", Router::new().get("/hello", hello), Vec::new())?;
//!
//!     server.serve(ShutdownSignal::with_os_signals()).await?;
//!     Ok(())
//! }
//! ```

use std::io;
use std::net::SocketAddr;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures_util::FutureExt;
use http::StatusCode;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::{TokioIo, TokioTimer};
use keel_core::{AbortConnection, RemoteAddr};
use keel_middleware::pipeline::BoxedMiddleware;
use keel_middleware::{Handler, Pipeline, Request, Response};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio_rustls::TlsAcceptor;

use crate::config::{validate_route, ServerConfig};
use crate::endpoints;
use crate::error::ServerError;
use crate::respond;
use crate::router::{Lookup, Router};
use crate::shutdown::{ConnectionTracker, ShutdownSignal, ShutdownState};
use crate::tls;

/// The Keel HTTP server.
pub struct Server {
    addr: String,
    config: ServerConfig,
    router: Router,
}

impl Server {
    /// Creates a server for `addr` and mounts the enabled built-in endpoints.
    ///
    /// Nothing is bound until [`serve`](Self::serve) is called.
    ///
    /// # Errors
    ///
    /// Returns `ServerError::Config` if an endpoint route is invalid or the
    /// metrics recorder cannot be installed.
    pub fn new(addr: impl Into<String>, config: ServerConfig) -> Result<Self, ServerError> {
        config.validate()?;
        keel_telemetry::init_metrics().map_err(|e| ServerError::Config(e.to_string()))?;

        let mut router = Router::new();
        endpoints::mount(&mut router, &config);

        Ok(Self {
            addr: addr.into(),
            config,
            router,
        })
    }

    /// Attaches every route of `router` under `prefix`.
    ///
    /// `middlewares` apply to these routes only, inside the global
    /// middleware configured on [`ServerConfig`].
    ///
    /// # Errors
    ///
    /// Returns `ServerError::Config` if `prefix` is empty or does not start
    /// with `/`.
    pub fn mount(
        &mut self,
        prefix: &str,
        router: Router,
        middlewares: Vec<BoxedMiddleware>,
    ) -> Result<(), ServerError> {
        validate_route("mount", prefix)?;
        tracing::debug!(prefix, routes = router.route_count(), "mounting routes");
        self.router.nest(prefix, router, Arc::new(Pipeline::new(middlewares)));
        Ok(())
    }

    /// Returns the address passed to [`Server::new`].
    #[must_use]
    pub fn addr(&self) -> &str {
        &self.addr
    }

    /// Returns the server configuration.
    #[must_use]
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Returns the router with every mounted route.
    #[must_use]
    pub fn router(&self) -> &Router {
        &self.router
    }

    /// Binds the configured address and serves until `shutdown` fires.
    ///
    /// # Errors
    ///
    /// - `InvalidAddress` if the address is empty
    /// - `Bind` if the listener cannot be bound
    /// - `Accept` if the accept loop fails
    /// - `ShutdownTimeout` if connections outlive the shutdown timeout
    pub async fn serve(self, shutdown: ShutdownSignal) -> Result<(), ServerError> {
        let listener = self.bind().await?;
        self.run(listener, shutdown, None).await
    }

    /// Serves on an already bound listener until `shutdown` fires.
    pub async fn serve_on(
        self,
        listener: TcpListener,
        shutdown: ShutdownSignal,
    ) -> Result<(), ServerError> {
        self.run(listener, shutdown, None).await
    }

    /// Like [`serve`](Self::serve), with a TLS handshake on every connection.
    ///
    /// `cert` and `key` are PEM files.
    ///
    /// # Errors
    ///
    /// Same as [`serve`](Self::serve), plus `Tls` if the certificate or key
    /// cannot be loaded.
    pub async fn serve_tls(
        self,
        shutdown: ShutdownSignal,
        cert: impl AsRef<std::path::Path>,
        key: impl AsRef<std::path::Path>,
    ) -> Result<(), ServerError> {
        if self.addr.is_empty() {
            return Err(ServerError::InvalidAddress(self.addr));
        }
        let acceptor = tls::load_acceptor(cert, key)?;
        let listener = self.bind().await?;
        self.run(listener, shutdown, Some(acceptor)).await
    }

    async fn bind(&self) -> Result<TcpListener, ServerError> {
        if self.addr.is_empty() {
            return Err(ServerError::InvalidAddress(self.addr.clone()));
        }
        TcpListener::bind(&self.addr)
            .await
            .map_err(|source| ServerError::Bind {
                addr: self.addr.clone(),
                source,
            })
    }

    async fn run(
        self,
        listener: TcpListener,
        shutdown: ShutdownSignal,
        tls: Option<TlsAcceptor>,
    ) -> Result<(), ServerError> {
        let local_addr = listener
            .local_addr()
            .map_err(|source| ServerError::Bind {
                addr: self.addr.clone(),
                source,
            })?;
        let shutdown_timeout = self.config.shutdown_timeout();
        let connections = Arc::new(ConnectionSettings::new(&self.config));
        let service = Arc::new(ServiceState::new(self.router, &self.config));
        let tracker = ConnectionTracker::new();
        let mut state = ShutdownState::Serving;
        let mut backoff: Option<Duration> = None;

        tracing::info!(addr = %local_addr, tls = tls.is_some(), "server listening");

        loop {
            tokio::select! {
                accepted = listener.accept() => {
                    let (stream, remote_addr) = match accepted {
                        Ok(accepted) => {
                            backoff = None;
                            accepted
                        }
                        Err(err) => match classify_accept_error(&err) {
                            AcceptFailure::Connection => {
                                tracing::debug!(error = %err, "skipping failed connection");
                                continue;
                            }
                            AcceptFailure::Exhausted => {
                                let delay = next_backoff(backoff);
                                backoff = Some(delay);
                                tracing::warn!(
                                    error = %err,
                                    retry_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                                    "accept failed, retrying"
                                );
                                let stopped = tokio::select! {
                                    () = tokio::time::sleep(delay) => false,
                                    () = shutdown.recv() => true,
                                };
                                if stopped {
                                    break;
                                }
                                continue;
                            }
                            AcceptFailure::Fatal => {
                                tracing::error!(addr = %local_addr, error = %err, "accept loop failed");
                                return Err(ServerError::Accept { addr: local_addr, source: err });
                            }
                        },
                    };

                    let token = tracker.acquire();
                    let connection = Connection {
                        remote_addr,
                        settings: Arc::clone(&connections),
                        service: Arc::clone(&service),
                        shutdown: shutdown.clone(),
                    };
                    let tls = tls.clone();

                    tokio::spawn(async move {
                        connection.accept(stream, tls).await;
                        drop(token);
                    });
                }
                () = shutdown.recv() => break,
            }
        }

        drop(listener);
        state.advance(ShutdownState::Draining);
        tracing::info!(
            active = tracker.active_connections(),
            timeout_ms = u64::try_from(shutdown_timeout.as_millis()).unwrap_or(u64::MAX),
            "shutdown requested, draining connections"
        );

        state.advance(tracker.drain(shutdown_timeout).await);
        match state {
            ShutdownState::TimedOut => {
                let active = tracker.active_connections();
                tracing::warn!(active, "shutdown timed out, abandoning open connections");
                Err(ServerError::ShutdownTimeout {
                    timeout: shutdown_timeout,
                    active,
                })
            }
            _ => {
                tracing::info!("server stopped");
                Ok(())
            }
        }
    }
}

impl std::fmt::Debug for Server {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Server")
            .field("addr", &self.addr)
            .field("config", &self.config)
            .field("router", &self.router)
            .finish()
    }
}

/// First pause after the process runs out of descriptors or memory.
const ACCEPT_BACKOFF_START: Duration = Duration::from_millis(5);

/// Longest pause between two failed accepts.
const ACCEPT_BACKOFF_MAX: Duration = Duration::from_secs(1);

/// How the accept loop reacts to a failed `accept`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AcceptFailure {
    /// Concerns one connection only.
    Connection,
    /// Out of descriptors, buffers or memory. Retried after a pause.
    Exhausted,
    /// The listener is unusable.
    Fatal,
}

fn classify_accept_error(err: &io::Error) -> AcceptFailure {
    match err.kind() {
        io::ErrorKind::ConnectionAborted
        | io::ErrorKind::ConnectionReset
        | io::ErrorKind::Interrupted
        | io::ErrorKind::WouldBlock
        | io::ErrorKind::TimedOut => AcceptFailure::Connection,
        io::ErrorKind::OutOfMemory => AcceptFailure::Exhausted,
        _ if is_resource_exhaustion(err) => AcceptFailure::Exhausted,
        _ => AcceptFailure::Fatal,
    }
}

#[cfg(unix)]
fn is_resource_exhaustion(err: &io::Error) -> bool {
    matches!(
        err.raw_os_error(),
        Some(libc::EMFILE | libc::ENFILE | libc::ENOBUFS | libc::ENOMEM)
    )
}

#[cfg(not(unix))]
fn is_resource_exhaustion(_err: &io::Error) -> bool {
    false
}

/// Doubles the previous pause, starting at [`ACCEPT_BACKOFF_START`].
fn next_backoff(previous: Option<Duration>) -> Duration {
    previous.map_or(ACCEPT_BACKOFF_START, |delay| {
        (delay * 2).min(ACCEPT_BACKOFF_MAX)
    })
}

/// Transport settings shared by every connection.
struct ConnectionSettings {
    read_header_timeout: Duration,
    idle_timeout: Duration,
}

impl ConnectionSettings {
    fn new(config: &ServerConfig) -> Self {
        Self {
            read_header_timeout: config.read_header_timeout(),
            idle_timeout: config.idle_timeout(),
        }
    }
}

struct Connection {
    remote_addr: SocketAddr,
    settings: Arc<ConnectionSettings>,
    service: Arc<ServiceState>,
    shutdown: ShutdownSignal,
}

impl Connection {
    async fn accept(self, stream: TcpStream, tls: Option<TlsAcceptor>) {
        let Some(acceptor) = tls else {
            self.serve(stream).await;
            return;
        };

        let handshake = tokio::time::timeout(
            self.settings.read_header_timeout,
            acceptor.accept(stream),
        );
        match handshake.await {
            Ok(Ok(stream)) => self.serve(stream).await,
            Ok(Err(err)) => {
                tracing::debug!(remote_addr = %self.remote_addr, error = %err, "TLS handshake failed");
            }
            Err(_) => {
                tracing::debug!(remote_addr = %self.remote_addr, "TLS handshake timed out");
            }
        }
    }

    async fn serve<I>(self, io: I)
    where
        I: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let Self {
            remote_addr,
            settings,
            service,
            shutdown,
        } = self;
        let activity = Activity::new();

        let requests = activity.clone();
        let handler = service_fn(move |request: hyper::Request<Incoming>| {
            let service = Arc::clone(&service);
            let busy = requests.begin();
            async move {
                let response = service.handle(request, remote_addr).await;
                drop(busy);
                response
            }
        });

        let conn = http1::Builder::new()
            .timer(TokioTimer::new())
            .header_read_timeout(settings.read_header_timeout)
            .keep_alive(true)
            .serve_connection(TokioIo::new(io), handler);
        tokio::pin!(conn);

        let mut closing = false;
        loop {
            tokio::select! {
                result = conn.as_mut() => {
                    if let Err(err) = result {
                        tracing::debug!(%remote_addr, error = %err, "connection closed with error");
                    }
                    break;
                }
                () = shutdown.recv(), if !closing => {
                    closing = true;
                    conn.as_mut().graceful_shutdown();
                }
                () = activity.idle_for(settings.idle_timeout), if !closing => {
                    tracing::debug!(%remote_addr, "closing idle connection");
                    closing = true;
                    conn.as_mut().graceful_shutdown();
                }
            }
        }
    }
}

/// Number of requests in flight on one connection.
#[derive(Clone)]
struct Activity {
    in_flight: Arc<watch::Sender<usize>>,
}

impl Activity {
    fn new() -> Self {
        let (sender, _) = watch::channel(0);
        Self {
            in_flight: Arc::new(sender),
        }
    }

    fn begin(&self) -> Busy {
        self.in_flight.send_modify(|count| *count += 1);
        Busy {
            in_flight: Arc::clone(&self.in_flight),
        }
    }

    /// Completes once no request has been in flight for `timeout`.
    async fn idle_for(&self, timeout: Duration) {
        let mut changes = self.in_flight.subscribe();
        loop {
            let idle = *changes.borrow_and_update() == 0;
            if idle {
                tokio::select! {
                    () = tokio::time::sleep(timeout) => return,
                    _ = changes.changed() => {}
                }
            } else {
                let _ = changes.changed().await;
            }
        }
    }
}

struct Busy {
    in_flight: Arc<watch::Sender<usize>>,
}

impl Drop for Busy {
    fn drop(&mut self) {
        self.in_flight
            .send_modify(|count| *count = count.saturating_sub(1));
    }
}

/// Returned to hyper so the connection is dropped without a response.
#[derive(Debug, thiserror::Error)]
#[error("request aborted, dropping connection")]
struct Aborted;

/// Routing and per-request deadlines.
struct ServiceState {
    router: Router,
    pipeline: Pipeline,
    read_timeout: Duration,
    write_timeout: Duration,
    not_found: Arc<dyn Handler>,
    method_not_allowed: Arc<dyn Handler>,
}

impl ServiceState {
    fn new(router: Router, config: &ServerConfig) -> Self {
        Self {
            router,
            pipeline: Pipeline::new(config.middlewares().to_vec()),
            read_timeout: config.read_timeout(),
            write_timeout: config.write_timeout(),
            not_found: reason_handler(StatusCode::NOT_FOUND),
            method_not_allowed: reason_handler(StatusCode::METHOD_NOT_ALLOWED),
        }
    }

    /// Routes the request and runs it through the global pipeline.
    ///
    /// Body read failures and the write deadline are answered by the
    /// terminal handler, so the global stages still observe them.
    async fn handle(
        &self,
        request: hyper::Request<Incoming>,
        remote_addr: SocketAddr,
    ) -> Result<Response, Aborted> {
        let (mut parts, body) = request.into_parts();

        parts.extensions.insert(RemoteAddr(remote_addr));
        let handler = match self.router.lookup(&parts.method, parts.uri.path()) {
            Lookup::Found(found) => {
                parts.extensions.insert(found.pattern);
                parts.extensions.insert(found.params);
                found.handler
            }
            Lookup::MethodNotAllowed => Arc::clone(&self.method_not_allowed),
            Lookup::NotFound => Arc::clone(&self.not_found),
        };

        let (handler, body) = match tokio::time::timeout(self.read_timeout, body.collect()).await {
            Ok(Ok(collected)) => (handler, collected.to_bytes()),
            Ok(Err(err)) => {
                tracing::debug!(%remote_addr, error = %err, "failed to read request body");
                (reason_handler(StatusCode::BAD_REQUEST), Bytes::new())
            }
            Err(_) => {
                tracing::warn!(%remote_addr, uri = %parts.uri, "request body not received within read timeout");
                (reason_handler(StatusCode::REQUEST_TIMEOUT), Bytes::new())
            }
        };

        let method = parts.method.clone();
        let uri = parts.uri.clone();
        let request = Request::from_parts(parts, Full::new(body));
        let write_timeout = self.write_timeout;
        let (deadline_method, deadline_uri) = (method.clone(), uri.clone());
        let work = self.pipeline.process(request, move |request| {
            Box::pin(async move {
                match tokio::time::timeout(write_timeout, handler.call(request)).await {
                    Ok(response) => response,
                    Err(_) => {
                        tracing::warn!(
                            method = %deadline_method,
                            uri = %deadline_uri,
                            timeout_ms = u64::try_from(write_timeout.as_millis()).unwrap_or(u64::MAX),
                            "response not produced within write timeout"
                        );
                        respond::reason(StatusCode::SERVICE_UNAVAILABLE)
                    }
                }
            })
        });

        match AssertUnwindSafe(work).catch_unwind().await {
            Ok(response) => Ok(response),
            Err(payload) => {
                if payload.is::<AbortConnection>() {
                    tracing::debug!(%method, %uri, "handler aborted the connection");
                } else {
                    tracing::error!(%method, %uri, "unrecovered panic while serving request");
                }
                Err(Aborted)
            }
        }
    }
}

fn reason_handler(status: StatusCode) -> Arc<dyn Handler> {
    Arc::new(move |_request: Request| async move { respond::reason(status) })
}
