//! Credentialed HTTP transport.
//!
//! ```text
//! caller ── execute(ApiRequest) ──> CredentialedTransport
//!                                      │  Bearer <access>
//!                                      v
//!                                  HttpBackend (ReqwestBackend)
//!                                      │  401?
//!                                      v
//!                                  RefreshCoordinator ── POST refresh_path ──> server
//!                                      │  (single flight, updates CredentialStore)
//!                                      v
//!                                  one retry with the new access value
//! ```

pub mod backend;
pub mod client;
mod refresh;
pub mod request;

use std::time::Duration;

pub use backend::{HttpBackend, ReqwestBackend};
pub use client::CredentialedTransport;
pub use request::{ApiRequest, ApiResponse, Attempt, Method};

/// Default path of the refresh exchange.
pub const DEFAULT_REFRESH_PATH: &str = "/api/auth/token/refresh/";

/// Settings for [`CredentialedTransport::from_config`].
#[derive(Debug, Clone, PartialEq)]
pub struct TransportConfig {
    pub base_url: String,
    pub refresh_path: String,
    pub request_timeout: Duration,
}

impl TransportConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            refresh_path: DEFAULT_REFRESH_PATH.to_string(),
            request_timeout: Duration::from_secs(30),
        }
    }
}
