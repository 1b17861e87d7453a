//! Structured logging for Keel.
//!
//! Keel logs through the `tracing` facade. Request outcomes are written by
//! the logging middleware as one event per request under
//! [`ACCESS_LOG_TARGET`]; everything else (listener lifecycle, recovered
//! panics, failed handshakes) uses the emitting module as target.
//!
//! [`init_logging`] installs a `tracing-subscriber` registry with an
//! [`EnvFilter`] built from [`LogConfig::directives`].
//!
//! # Example
//!
//! ```rust,ignore
//! use keel_telemetry::logging::{init_logging, LogConfig, LogFormat};
//!
//! // JSON lines at info, without the per-request access log.
//! init_logging(&LogConfig::production().without_access_log())?;
//!
//! // Human-readable output for local runs.
//! init_logging(&LogConfig::development().with_format(LogFormat::Compact))?;
//! ```

use crate::error::TelemetryError;
use crate::TelemetryResult;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, Registry};

/// Target of the access log event written once per request.
pub const ACCESS_LOG_TARGET: &str = "keel::access";

/// Output format of the installed subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// One JSON object per line with the event fields flattened to the top
    /// level, so `status` or `request_id` can be queried directly.
    Json,
    /// Multi-line human-readable output.
    Pretty,
    /// Single-line human-readable output.
    Compact,
}

/// Logging configuration.
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Filter directive (e.g. "info", "keel_server=debug,hyper=warn").
    pub filter: String,

    /// Output format.
    pub format: LogFormat,

    /// Whether access log events are emitted.
    pub access_log: bool,

    /// Whether events carry the source file and line.
    pub source_location: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self::production()
    }
}

impl LogConfig {
    /// Debug level, pretty output with source locations.
    #[must_use]
    pub fn development() -> Self {
        Self {
            filter: "debug".to_string(),
            format: LogFormat::Pretty,
            access_log: true,
            source_location: true,
        }
    }

    /// Info level, JSON output.
    #[must_use]
    pub fn production() -> Self {
        Self {
            filter: "info".to_string(),
            format: LogFormat::Json,
            access_log: true,
            source_location: false,
        }
    }

    /// Sets the filter directive.
    #[must_use]
    pub fn with_filter(mut self, filter: impl Into<String>) -> Self {
        self.filter = filter.into();
        self
    }

    /// Sets the output format.
    #[must_use]
    pub fn with_format(mut self, format: LogFormat) -> Self {
        self.format = format;
        self
    }

    /// Drops access log events, keeping every other event.
    #[must_use]
    pub fn without_access_log(mut self) -> Self {
        self.access_log = false;
        self
    }

    /// The full filter directive, including the access log switch.
    #[must_use]
    pub fn directives(&self) -> String {
        if self.access_log {
            self.filter.clone()
        } else if self.filter.is_empty() {
            format!("{ACCESS_LOG_TARGET}=off")
        } else {
            format!("{},{ACCESS_LOG_TARGET}=off", self.filter)
        }
    }
}

/// Initializes the global `tracing` subscriber.
///
/// # Errors
///
/// Returns `TelemetryError::LoggingInit` if the filter is invalid or a global
/// subscriber is already set.
pub fn init_logging(config: &LogConfig) -> TelemetryResult<()> {
    let filter = create_env_filter(&config.directives())?;
    let location = config.source_location;

    let layer: Box<dyn Layer<Registry> + Send + Sync> = match config.format {
        LogFormat::Json => tracing_subscriber::fmt::layer()
            .json()
            .flatten_event(true)
            .with_file(location)
            .with_line_number(location)
            .with_filter(filter)
            .boxed(),
        LogFormat::Pretty => tracing_subscriber::fmt::layer()
            .pretty()
            .with_file(location)
            .with_line_number(location)
            .with_filter(filter)
            .boxed(),
        LogFormat::Compact => tracing_subscriber::fmt::layer()
            .compact()
            .with_file(location)
            .with_line_number(location)
            .with_filter(filter)
            .boxed(),
    };

    tracing_subscriber::registry()
        .with(layer)
        .try_init()
        .map_err(|e| TelemetryError::LoggingInit(e.to_string()))
}

/// Creates an env filter from a directive string.
///
/// # Errors
///
/// Returns error if the directive is invalid.
pub fn create_env_filter(filter: &str) -> TelemetryResult<EnvFilter> {
    EnvFilter::try_new(filter)
        .map_err(|e| TelemetryError::LoggingInit(format!("Invalid log filter: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_production() {
        let config = LogConfig::default();
        assert_eq!(config.format, LogFormat::Json);
        assert!(config.access_log);
        assert_eq!(config.directives(), "info");
    }

    #[test]
    fn test_development_config() {
        let config = LogConfig::development();
        assert_eq!(config.format, LogFormat::Pretty);
        assert!(config.source_location);
        assert_eq!(config.filter, "debug");
    }

    #[test]
    fn test_without_access_log_turns_target_off() {
        let config = LogConfig::production()
            .with_filter("keel_server=debug")
            .without_access_log();
        assert_eq!(config.directives(), "keel_server=debug,keel::access=off");

        let config = LogConfig::production().with_filter("").without_access_log();
        assert_eq!(config.directives(), "keel::access=off");
    }

    #[test]
    fn test_create_env_filter() {
        assert!(create_env_filter("info,keel_middleware=debug").is_ok());
        assert!(create_env_filter(&LogConfig::production().without_access_log().directives()).is_ok());
        assert!(create_env_filter("keel=notalevel").is_err());
    }

    #[test]
    fn test_invalid_filter_fails_init() {
        let config = LogConfig::production().with_filter("keel=notalevel");
        let err = init_logging(&config).unwrap_err();
        assert!(err.to_string().contains("Invalid log filter"));
    }
}
