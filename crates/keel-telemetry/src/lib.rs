//! Metrics and structured logging for Keel.
//!
//! - **Metrics**: a process-wide Prometheus recorder via the `metrics` crate
//! - **Logging**: a `tracing-subscriber` registry with JSON or pretty output
//!
//! # Example
//!
//! ```rust,ignore
//! use keel_telemetry::{init_telemetry, LogConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     init_telemetry(&LogConfig::production())?;
//!     // ...
//!     Ok(())
//! }
//! ```
//!
//! # Metrics Endpoint
//!
//! The metrics endpoint renders the registry in Prometheus text format:
//!
//! ```text
//! # TYPE http_requests_total counter
//! http_requests_total{method="GET",route="/users/{id}",code="200"} 1234
//!
//! # TYPE http_request_duration_seconds summary
//! http_request_duration_seconds{method="GET",route="/users/{id}",code="200",quantile="0.95"} 0.012
//! http_request_duration_seconds{method="GET",route="/users/{id}",code="200",quantile="0.99"} 0.031
//! ```

#![warn(missing_docs)]

pub mod error;
pub mod logging;
pub mod metrics;

pub use error::TelemetryError;
pub use logging::{init_logging, LogConfig, LogFormat, ACCESS_LOG_TARGET};
pub use metrics::{init_metrics, record_panic, record_request, render_metrics};

/// Result type for telemetry operations.
pub type TelemetryResult<T> = Result<T, TelemetryError>;

/// Initializes logging and metrics.
///
/// # Errors
///
/// Returns `TelemetryError` if either subsystem fails to initialize.
pub fn init_telemetry(logging: &LogConfig) -> TelemetryResult<()> {
    init_logging(logging)?;
    init_metrics()?;
    Ok(())
}
