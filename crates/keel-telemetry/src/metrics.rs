//! Process-wide Prometheus metrics.
//!
//! A single Prometheus recorder is installed per process by [`init_metrics`].
//! Installation is idempotent: the first call installs the recorder, later
//! calls return immediately. Recording functions are no-ops until then.
//!
//! # Standard Metrics
//!
//! | Metric | Type | Labels | Description |
//! |--------|------|--------|-------------|
//! | `http_request_duration_seconds` | Summary (p95, p99) | `method`, `route`, `code` | Request latency |
//! | `http_requests_total` | Counter | `method`, `route`, `code` | Total requests |
//! | `server_panics_total` | Counter | `method`, `route` | Recovered handler panics |
//!
//! The `route` label is always the matched route pattern (or `unmatched`),
//! never the raw request path.
//!
//! # Example
//!
//! ```rust
//! use std::time::Duration;
//! use keel_telemetry::metrics::{init_metrics, record_request, render_metrics};
//!
//! init_metrics().unwrap();
//! record_request("GET", "/users/{id}", 200, Duration::from_millis(12));
//!
//! let text = render_metrics().unwrap();
//! assert!(text.contains("http_requests_total"));
//! ```

use std::sync::OnceLock;
use std::time::Duration;

use metrics::{counter, describe_counter, describe_histogram, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use parking_lot::Mutex;

use crate::error::TelemetryError;
use crate::TelemetryResult;

/// Metric names emitted by Keel.
pub mod names {
    /// Request latency summary.
    pub const REQUEST_DURATION: &str = "http_request_duration_seconds";

    /// Request counter.
    pub const REQUESTS_TOTAL: &str = "http_requests_total";

    /// Recovered panic counter.
    pub const PANICS_TOTAL: &str = "server_panics_total";
}

/// Quantiles exported for every summary.
pub const SUMMARY_QUANTILES: &[f64] = &[0.95, 0.99];

/// Global metrics handle for rendering.
static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Serializes recorder installation.
static INIT_LOCK: Mutex<()> = parking_lot::const_mutex(());

/// Installs the process-wide Prometheus recorder.
///
/// Safe to call any number of times from any thread.
///
/// # Errors
///
/// Returns `TelemetryError::MetricsInit` if another global recorder was
/// installed outside of Keel.
pub fn init_metrics() -> TelemetryResult<()> {
    if METRICS_HANDLE.get().is_some() {
        return Ok(());
    }

    let _guard = INIT_LOCK.lock();
    if METRICS_HANDLE.get().is_some() {
        return Ok(());
    }

    let recorder = PrometheusBuilder::new()
        .set_quantiles(SUMMARY_QUANTILES)
        .map_err(|e| TelemetryError::MetricsInit(e.to_string()))?
        .build_recorder();
    let handle = recorder.handle();

    metrics::set_global_recorder(recorder).map_err(|_| {
        TelemetryError::MetricsInit("a global metrics recorder is already installed".to_string())
    })?;

    let _ = METRICS_HANDLE.set(handle);
    register_metric_descriptions();

    tracing::debug!("prometheus recorder installed");
    Ok(())
}

/// Returns the global metrics handle if initialized.
pub fn metrics_handle() -> Option<&'static PrometheusHandle> {
    METRICS_HANDLE.get()
}

/// Renders metrics in Prometheus text exposition format.
///
/// Returns `None` if metrics are not initialized.
#[must_use]
pub fn render_metrics() -> Option<String> {
    METRICS_HANDLE.get().map(PrometheusHandle::render)
}

fn register_metric_descriptions() {
    describe_histogram!(names::REQUEST_DURATION, "HTTP request duration in seconds");
    describe_counter!(names::REQUESTS_TOTAL, "Total number of HTTP requests");
    describe_counter!(
        names::PANICS_TOTAL,
        "Total number of panics recovered while serving requests"
    );
}

/// Records a completed request.
///
/// # Arguments
///
/// * `method` - HTTP method
/// * `route` - Matched route pattern (e.g. `/users/{id}`)
/// * `status_code` - Final HTTP status code
/// * `duration` - Time spent producing the response
pub fn record_request(method: &str, route: &str, status_code: u16, duration: Duration) {
    let code = status_code.to_string();

    histogram!(
        names::REQUEST_DURATION,
        "method" => method.to_string(),
        "route" => route.to_string(),
        "code" => code.clone()
    )
    .record(duration.as_secs_f64());

    counter!(
        names::REQUESTS_TOTAL,
        "method" => method.to_string(),
        "route" => route.to_string(),
        "code" => code
    )
    .increment(1);
}

/// Records a panic recovered while serving `method` on `route`.
pub fn record_panic(method: &str, route: &str) {
    counter!(
        names::PANICS_TOTAL,
        "method" => method.to_string(),
        "route" => route.to_string()
    )
    .increment(1);
}
