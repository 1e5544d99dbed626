//! # Gridgate - a client-side request gateway
//!
//! Gridgate sits between application code and one or more HTTP backends. Every
//! request goes through one pipeline that rate-limits locally, serves GETs from
//! a TTL cache, picks a healthy backend (falling back to a simulated one when
//! none is reachable), retries transient failures with backoff, refreshes
//! expired or rejected credentials exactly once, and records per-request
//! metrics.
//!
//! ## Quick Start
//!
//! ```no_run
//! use gridgate::{Client, Gateway};
//! use serde::Deserialize;
//! use std::time::Duration;
//!
//! #[derive(Deserialize)]
//! struct Site {
//!     id: u64,
//!     name: String,
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), gridgate::ApiError> {
//!     let gateway = Gateway::builder()
//!         .base_url("https://primary.example.com")?
//!         .base_url("https://backup.example.com")?
//!         .timeout(Duration::from_secs(10))
//!         .build()?;
//!     let client = Client::new(gateway);
//!
//!     let user = client.login("operator@example.com", "hunter2").await?;
//!     println!("Signed in as {}", user.display_name);
//!
//!     // Authenticated and cached for five minutes.
//!     let sites = client.get::<Vec<Site>>("/sites").await?;
//!     for site in &sites.data {
//!         println!("{}: {}", site.id, site.name);
//!     }
//!     println!("Request took {:?} ({:?})", sites.latency, sites.source);
//!
//!     Ok(())
//! }
//! ```
//!
//! ## Error Handling
//!
//! The gateway returns [`Error`], which keeps raw bodies and headers. The typed
//! [`Client`] converts it into an [`ApiError`] with a stable code:
//!
//! ```no_run
//! use gridgate::{Client, ErrorCode};
//!
//! # async fn example(client: Client) {
//! match client.get::<serde_json::Value>("/sites/404").await {
//!     Ok(response) => println!("{}", response.data),
//!     Err(e) if e.code == ErrorCode::AuthenticationFailed => {
//!         eprintln!("Session ended, please sign in again");
//!     }
//!     Err(e) => eprintln!("{} ({:?}): {}", e.code, e.status, e.message),
//! }
//! # }
//! ```
//!
//! ## Configuration
//!
//! Settings can come from the environment (see [`GatewayConfig::from_env`]):
//!
//! ```no_run
//! use gridgate::{Gateway, GatewayConfig};
//!
//! # fn example() -> Result<(), gridgate::Error> {
//! let gateway = Gateway::builder()
//!     .config(GatewayConfig::from_env()?)
//!     .build()?;
//! # Ok(())
//! # }
//! ```

mod auth;
pub mod cache;
pub mod client;
mod config;
pub mod credentials;
mod error;
mod gateway;
pub mod metrics;
pub mod rate_limit;
mod request;
pub mod resolver;
mod response;
pub mod retry;
pub mod simulated;
pub mod transport;

pub use client::{Client, RequestOptions};
pub use config::{GatewayConfig, HealthCheckConfig};
pub use credentials::{
    AuthenticatedUser, CredentialStore, Credentials, FileCredentialStore, MemoryCredentialStore,
};
pub use error::{ApiError, Error, ErrorCode, Result};
pub use gateway::{Gateway, GatewayBuilder};
pub use rate_limit::{RateLimitConfig, RateLimiter};
pub use request::ApiRequest;
pub use response::{Response, ResponseSource};
pub use retry::RetryStrategy;
