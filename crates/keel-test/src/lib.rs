//! # Keel Test
//!
//! Test utilities for Keel services.
//!
//! - [`LogCapture`] - records `tracing` events (access log, recovery) for assertions
//! - [`RecordingReporter`] - an error reporter that remembers what it was given
//! - [`get`] / [`request`] - in-memory requests for driving middleware directly
//! - [`TestClient`] - a real HTTP/1.1 client for servers bound to a socket
//! - [`metric_value`] - reads a sample back from the Prometheus registry
//!
//! ## Example
//!
//! ```ignore
//! use http::StatusCode;
//! use keel_test::{LogCapture, TestClient};
//! use tracing::Level;
//!
//! #[tokio::test]
//! async fn test_health() {
//!     let capture = LogCapture::new();
//!     let _guard = capture.install();
//!
//!     let client = TestClient::new(addr);
//!     let response = client.get("/health").send().await;
//!
//!     assert_eq!(response.status(), StatusCode::OK);
//!     assert!(capture.at_level(Level::ERROR).is_empty());
//! }
//! ```

#![doc(html_root_url = "https://docs.rs/keel-test/0.1.0")]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

mod client;
mod error;
mod logs;
mod metrics;
mod reporter;
mod request;
mod response;

pub use client::{TestClient, TestClientRequest, TestConnection};
pub use error::TestError;
pub use logs::{CapturedEvent, LogCapture};
pub use metrics::{metric_value, sample_value};
pub use reporter::RecordingReporter;
pub use request::{get, request, Request, TestRequest, TestRequestBuilder};
pub use response::{collect, TestResponse};
