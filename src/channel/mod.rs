//! Self-healing realtime channel.
//!
//! ## Module Map
//!
//! - `state`: the connection state machine and published snapshots
//! - `message`: inbound envelope parsing and the `on_connect` outbox
//! - `handlers`: caller callbacks and routing by message type
//! - `connector`: duplex stream establishment (tokio-tungstenite)
//! - `resilient`: the `ResilientChannel` handle and its owning task
//!
//! A channel connects only while the credential store holds an access value,
//! embedding it as the `token` query parameter of the endpoint. Failures are
//! retried after a fixed delay up to a bounded number of consecutive attempts.

pub mod connector;
pub mod handlers;
pub mod message;
pub mod resilient;
pub mod state;

use std::time::Duration;

use reqwest::Url;

use crate::errors::ChannelError;

pub use connector::{Connector, Frame, Link, WsConnector};
pub use handlers::{ChannelHandlers, DisconnectReason};
pub use message::{InboundMessage, Outbox};
pub use resilient::ResilientChannel;
pub use state::{ChannelStatus, ConnectionSnapshot};

pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_millis(3000);
pub const DEFAULT_MAX_RECONNECT_ATTEMPTS: u32 = 10;

/// Where and how persistently a channel connects.
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelConfig {
    endpoint: Url,
    reconnect_delay: Duration,
    max_reconnect_attempts: u32,
}

impl ChannelConfig {
    /// Validate a `ws://` or `wss://` endpoint and apply the default retry
    /// settings.
    pub fn new(endpoint: &str) -> Result<Self, ChannelError> {
        let url = Url::parse(endpoint).map_err(|e| ChannelError::InvalidEndpoint {
            endpoint: endpoint.to_string(),
            message: e.to_string(),
        })?;
        Self::from_url(url)
    }

    pub fn from_url(endpoint: Url) -> Result<Self, ChannelError> {
        if !matches!(endpoint.scheme(), "ws" | "wss") {
            return Err(ChannelError::InvalidEndpoint {
                endpoint: endpoint.to_string(),
                message: format!("unsupported scheme '{}'", endpoint.scheme()),
            });
        }
        Ok(Self {
            endpoint,
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
            max_reconnect_attempts: DEFAULT_MAX_RECONNECT_ATTEMPTS,
        })
    }

    pub fn with_reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }

    pub fn with_max_reconnect_attempts(mut self, attempts: u32) -> Self {
        self.max_reconnect_attempts = attempts;
        self
    }

    /// The endpoint without credentials. Safe to log.
    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    pub fn reconnect_delay(&self) -> Duration {
        self.reconnect_delay
    }

    pub fn max_reconnect_attempts(&self) -> u32 {
        self.max_reconnect_attempts
    }

    /// The endpoint with `access` appended as the `token` query parameter.
    pub fn connection_url(&self, access: &str) -> Url {
        let mut url = self.endpoint.clone();
        url.query_pairs_mut().append_pair("token", access);
        url
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ChannelConfig::new("wss://api.example.com/ws/dashboard/").unwrap();
        assert_eq!(config.reconnect_delay(), Duration::from_millis(3000));
        assert_eq!(config.max_reconnect_attempts(), 10);
    }

    #[test]
    fn test_rejects_non_websocket_scheme() {
        let err = ChannelConfig::new("https://api.example.com/ws/").unwrap_err();
        match err {
            ChannelError::InvalidEndpoint { message, .. } => {
                assert!(message.contains("https"))
            }
            other => panic!("Expected InvalidEndpoint, got {:?}", other),
        }
        assert!(ChannelConfig::new("not a url").is_err());
    }

    #[test]
    fn test_connection_url_appends_token() {
        let config = ChannelConfig::new("ws://localhost:8000/ws/automations/").unwrap();
        assert_eq!(
            config.connection_url("abc").as_str(),
            "ws://localhost:8000/ws/automations/?token=abc"
        );
        // The configured endpoint is left untouched
        assert!(config.endpoint().query().is_none());
    }

    #[test]
    fn test_connection_url_keeps_existing_query() {
        let config = ChannelConfig::new("ws://localhost/ws/?client=cli").unwrap();
        assert_eq!(
            config.connection_url("a+b").as_str(),
            "ws://localhost/ws/?client=cli&token=a%2Bb"
        );
    }
}
