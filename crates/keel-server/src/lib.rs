//! # Keel Server
//!
//! HTTP/1.1 server runtime for Keel.
//!
//! - [`Server`] binds a listener and serves until a [`ShutdownSignal`] fires
//! - [`ServerConfig`] holds timeouts, global middleware and the built-in
//!   health, metrics and profiler endpoints
//! - [`Router`] maps method and path to handlers
//! - [`respond`] writes error, JSON and text responses and feeds the error hook
//!
//! ## Example
//!
//! ```rust,no_run
//! use keel_server::config::{HealthEndpoint, MetricsEndpoint, ServerConfig};
//! use keel_server::{Server, ShutdownSignal};
//! use keel_middleware::stages::RecoveryMiddleware;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), keel_server::ServerError> {
//!     let config = ServerConfig::builder()
//!         .middleware(RecoveryMiddleware::new())
//!         .health(HealthEndpoint::new())
//!         .metrics(MetricsEndpoint::new())
//!         .build();
//!
//!     Server::new("0.0.0.0:8080", config)?
//!         .serve(ShutdownSignal::with_os_signals())
//!         .await
//! }
//! ```

#![doc(html_root_url = "https://docs.rs/keel-server/0.1.0")]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

pub mod config;
pub mod endpoints;
mod error;
pub mod respond;
pub mod router;
mod server;
pub mod shutdown;
pub mod tls;

pub use config::{
    HealthEndpoint, MetricsEndpoint, ProfilerEndpoint, ServerConfig, ServerConfigBuilder,
};
pub use error::ServerError;
pub use router::{PathParams, Router};
pub use server::Server;
pub use shutdown::{ShutdownSignal, ShutdownState};
