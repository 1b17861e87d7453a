//! Built-in health, metrics and profiler endpoints.
//!
//! Each enabled endpoint is registered on the root router with its own
//! local pipeline: a logging stage when `access_log` is set and a metrics
//! stage when `metrics` is set. Global middleware still applies on top.
//!
//! The profiler serves CPU profiles in the pprof protobuf format, so the
//! output can be read with `go tool pprof` or any pprof viewer.

use std::ffi::c_void;
use std::fmt::Write as _;
use std::sync::Arc;
use std::time::Duration;

use http::{header, HeaderValue, Method, StatusCode};
use http_body_util::BodyExt;
use keel_core::{Error, HealthChecker};
use keel_middleware::{Handler, Request, Response};
use pprof::protos::Message;

use crate::config::ServerConfig;
use crate::respond;
use crate::router::Router;

/// Content type of the Prometheus text exposition format.
pub const PROMETHEUS_CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";

/// Sub-routes served under the profiler prefix.
pub const PROFILER_ROUTES: [&str; 5] = ["/", "/cmdline", "/profile", "/symbol", "/trace"];

/// Profile duration when the request carries no usable `seconds` parameter.
pub const DEFAULT_PROFILE_DURATION: Duration = Duration::from_secs(30);

/// Sampling frequency of the CPU profiler, in hertz.
pub const PROFILE_FREQUENCY: i32 = 100;

/// Libraries whose frames are skipped while sampling.
const PROFILE_BLOCKLIST: [&str; 4] = ["libc", "libgcc", "pthread", "vdso"];

/// Registers every endpoint enabled in `config` on `router`.
pub(crate) fn mount(router: &mut Router, config: &ServerConfig) {
    if let Some(health) = config.health_endpoint() {
        let endpoint = Router::new().get("/", health_handler(health.health_checker()));
        router.nest(
            health.route_path(),
            endpoint,
            Arc::new(health.local_pipeline()),
        );
        tracing::debug!(route = health.route_path(), "health endpoint mounted");
    }

    if let Some(metrics) = config.metrics_endpoint() {
        let endpoint = Router::new().get("/", metrics_handler);
        router.nest(
            metrics.route_path(),
            endpoint,
            Arc::new(metrics.local_pipeline()),
        );
        tracing::debug!(route = metrics.route_path(), "metrics endpoint mounted");
    }

    if let Some(profiler) = config.profiler_endpoint() {
        router.nest(
            profiler.route_path(),
            profiler_router(profiler.route_path(), config.write_timeout()),
            Arc::new(profiler.local_pipeline()),
        );
        tracing::debug!(route = profiler.route_path(), "profiler endpoint mounted");
    }
}

/// Answers `200` with an empty body when `checker` is absent or healthy.
pub fn health_handler(checker: Option<Arc<dyn HealthChecker>>) -> impl Handler {
    move |request: Request| {
        let checker = checker.clone();
        async move {
            let Some(checker) = checker else {
                return respond::status(StatusCode::OK);
            };
            match checker.health().await {
                Ok(()) => respond::status(StatusCode::OK),
                Err(err) => respond::error(&request, err),
            }
        }
    }
}

/// Renders the process-wide metrics registry.
pub async fn metrics_handler(request: Request) -> Response {
    match keel_telemetry::render_metrics() {
        Some(body) => {
            let mut response = respond::text(&request, StatusCode::OK, body);
            response.headers_mut().insert(
                http::header::CONTENT_TYPE,
                http::HeaderValue::from_static(PROMETHEUS_CONTENT_TYPE),
            );
            response
        }
        None => respond::error(
            &request,
            Error::unavailable("metrics recorder is not installed"),
        ),
    }
}

fn profiler_router(prefix: &str, write_timeout: Duration) -> Router {
    let index = index_handler(prefix.trim_end_matches('/').to_string());
    let profile = move |request: Request| profile_handler(request, write_timeout);
    let mut router = Router::new();
    for method in [Method::GET, Method::HEAD] {
        router.add_route(method.clone(), "/", Arc::new(index.clone()));
        router.add_route(method.clone(), "/cmdline", Arc::new(cmdline_handler));
        router.add_route(method.clone(), "/profile", Arc::new(profile));
        router.add_route(method.clone(), "/symbol", Arc::new(symbol_handler));
        router.add_route(method, "/trace", Arc::new(trace_handler));
    }
    router.add_route(Method::POST, "/symbol", Arc::new(symbol_handler));
    router
}

#[derive(Clone)]
struct IndexHandler {
    prefix: Arc<str>,
}

fn index_handler(prefix: String) -> IndexHandler {
    IndexHandler {
        prefix: Arc::from(prefix),
    }
}

impl Handler for IndexHandler {
    fn call(&self, request: Request) -> keel_middleware::BoxFuture<'static, Response> {
        let prefix = Arc::clone(&self.prefix);
        Box::pin(async move {
            let mut body = String::from("keel diagnostics\n\n");
            for route in PROFILER_ROUTES.iter().skip(1) {
                body.push_str(&prefix);
                body.push_str(route);
                body.push('\n');
            }
            let _ = writeln!(body, "\npid: {}", std::process::id());
            if let Ok(runtime) = tokio::runtime::Handle::try_current() {
                let _ = writeln!(body, "runtime workers: {}", runtime.metrics().num_workers());
            }
            respond::text(&request, StatusCode::OK, body)
        })
    }
}

/// Command line of the running process, arguments separated by NUL bytes.
async fn cmdline_handler(request: Request) -> Response {
    let args: Vec<String> = std::env::args().collect();
    respond::text(&request, StatusCode::OK, args.join("\0"))
}

/// Samples the CPU for `?seconds=N` and answers with a pprof protobuf.
///
/// A missing, unparsable or zero duration falls back to
/// [`DEFAULT_PROFILE_DURATION`]. The duration must stay below the server's
/// write timeout, otherwise the response could never be delivered.
async fn profile_handler(request: Request, write_timeout: Duration) -> Response {
    let duration = query_param(&request, "seconds")
        .and_then(|value| value.parse::<u64>().ok())
        .filter(|&seconds| seconds > 0)
        .map_or(DEFAULT_PROFILE_DURATION, Duration::from_secs);

    if duration >= write_timeout {
        return respond::error(
            &request,
            Error::invalid_argument(format!(
                "profile duration {}s exceeds the server write timeout of {}s",
                duration.as_secs(),
                write_timeout.as_secs_f64()
            )),
        );
    }

    tracing::info!(seconds = duration.as_secs(), "collecting CPU profile");
    let collected = tokio::task::spawn_blocking(move || collect_profile(duration)).await;
    let body = match collected {
        Ok(Ok(body)) => body,
        Ok(Err(err)) => return respond::error(&request, err),
        Err(err) => {
            return respond::error(
                &request,
                Error::internal("profiler task failed").with_source(err),
            )
        }
    };

    let mut response = respond::text(&request, StatusCode::OK, body);
    let headers = response.headers_mut();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/octet-stream"),
    );
    headers.insert(
        header::CONTENT_DISPOSITION,
        HeaderValue::from_static("attachment; filename=\"profile\""),
    );
    response
}

/// Runs the sampler on the calling thread for `duration`.
fn collect_profile(duration: Duration) -> Result<Vec<u8>, Error> {
    let guard = pprof::ProfilerGuardBuilder::default()
        .frequency(PROFILE_FREQUENCY)
        .blocklist(&PROFILE_BLOCKLIST)
        .build()
        .map_err(|e| Error::unavailable(format!("could not enable CPU profiling: {e}")))?;

    std::thread::sleep(duration);

    let profile = guard
        .report()
        .build()
        .and_then(|report| report.pprof())
        .map_err(|e| Error::internal(format!("could not build CPU profile: {e}")))?;
    Ok(profile.encode_to_vec())
}

/// Resolves program counters to function names.
///
/// Addresses are hex values joined by `+`, read from the body of a POST or
/// the query string of a GET. The first line always reports that a symbol
/// table is available.
async fn symbol_handler(request: Request) -> Response {
    let input = if request.method() == Method::POST {
        let bytes = request
            .body()
            .clone()
            .collect()
            .await
            .map(|collected| collected.to_bytes())
            .unwrap_or_default();
        String::from_utf8_lossy(&bytes).into_owned()
    } else {
        request.uri().query().unwrap_or_default().to_string()
    };

    let mut body = String::from("num_symbols: 1\n");
    for word in input.split('+') {
        let Some(addr) = parse_address(word) else {
            continue;
        };
        if let Some(name) = resolve_symbol(addr) {
            let _ = writeln!(body, "{addr:#x} {name}");
        }
    }
    respond::text(&request, StatusCode::OK, body)
}

fn parse_address(word: &str) -> Option<usize> {
    let word = word.trim();
    let digits = word
        .strip_prefix("0x")
        .or_else(|| word.strip_prefix("0X"))
        .unwrap_or(word);
    usize::from_str_radix(digits, 16).ok()
}

fn resolve_symbol(addr: usize) -> Option<String> {
    let mut name = None;
    backtrace::resolve(addr as *mut c_void, |symbol| {
        if name.is_none() {
            name = symbol.name().map(|n| n.to_string());
        }
    });
    name
}

/// Execution tracing has no runtime-level equivalent to hand out.
async fn trace_handler(_request: Request) -> Response {
    respond::reason(StatusCode::NOT_IMPLEMENTED)
}

fn query_param<'a>(request: &'a Request, name: &str) -> Option<&'a str> {
    request
        .uri()
        .query()?
        .split('&')
        .filter_map(|pair| pair.split_once('='))
        .find_map(|(key, value)| (key == name).then_some(value))
}
