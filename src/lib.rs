//! Realtime session layer for the automation dashboard: a credentialed HTTP
//! transport that refreshes expired access values on its own, and a
//! self-healing WebSocket channel gated on the same credentials.

pub mod auth;
pub mod channel;
pub mod config;
pub mod credentials;
pub mod dashboard;
pub mod errors;
pub mod logging;
pub mod transport;
