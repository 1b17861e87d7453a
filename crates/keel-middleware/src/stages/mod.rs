//! Built-in middleware stages.
//!
//! | Stage | Name | Purpose |
//! |-------|------|---------|
//! | [`RecoveryMiddleware`] | `recovery` | Turn downstream panics into `500` |
//! | [`RequestIdMiddleware`] | `request_id` | Propagate or generate the request ID |
//! | [`LoggingMiddleware`] | `logging` | One access log event per request |
//! | [`MetricsMiddleware`] | `metrics` | Latency and request counts by route |
//! | [`ForceHttpsMiddleware`] | `force_https` | Permanent redirect to HTTPS |
//!
//! The usual global order is recovery, request ID, logging, metrics.

pub mod force_https;
pub mod logging;
pub mod metrics;
pub mod recovery;
pub mod request_id;

pub use force_https::ForceHttpsMiddleware;
pub use logging::{LoggingMiddleware, ACCESS_LOG_TARGET};
pub use metrics::MetricsMiddleware;
pub use recovery::RecoveryMiddleware;
pub use request_id::{RequestIdMiddleware, REQUEST_ID_HEADER};
