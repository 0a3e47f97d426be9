//! Credential storage shared by the transport and the realtime channel.
//!
//! [`CredentialStore`] owns the current access/refresh pair. Both
//! [`crate::transport::CredentialedTransport`] and
//! [`crate::channel::ResilientChannel`] take it as an `Arc` at construction
//! and only read from it; the refresh procedure and the session operations in
//! [`crate::auth`] are the only writers.
//!
//! Observers subscribe to [`SessionState`] changes through a `watch` channel.
//! Durable storage is optional and plugged in through [`CredentialPersistence`].

pub mod persist;
pub mod store;

pub use persist::{CredentialPersistence, TokenFile};
pub use store::{CredentialPair, CredentialStore, SessionState};
