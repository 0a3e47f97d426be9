//! CLI command implementations.
//!
//! | Module    | Commands handled                            |
//! |-----------|---------------------------------------------|
//! | `auth`    | `Login`, `Register`, `Logout`, `Whoami`     |
//! | `request` | `Request`                                   |
//! | `watch`   | `Watch`                                     |
//! | `config`  | `Config`                                    |

pub mod auth;
pub mod config;
pub mod request;
pub mod watch;

pub use auth::{cmd_login, cmd_logout, cmd_register, cmd_whoami};
pub use config::cmd_config;
pub use request::cmd_request;
pub use watch::cmd_watch;

use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::warn;

use dashlink::auth::AuthClient;
use dashlink::config::ClientConfig;
use dashlink::credentials::{CredentialStore, TokenFile};
use dashlink::transport::CredentialedTransport;

/// The persisted credential store plus a transport over it.
pub struct Session {
    pub store: Arc<CredentialStore>,
    pub transport: Arc<CredentialedTransport>,
}

impl Session {
    pub fn open(config: &ClientConfig) -> Result<Self> {
        let store = match config.credentials_path() {
            Some(path) => CredentialStore::with_persistence(TokenFile::new(path)),
            None => {
                warn!("No config directory available; credentials will not be saved");
                CredentialStore::new()
            }
        };
        let store = Arc::new(store);
        let transport =
            CredentialedTransport::from_config(&config.transport_config(), Arc::clone(&store))
                .context("Failed to build HTTP client")?;

        Ok(Self {
            store,
            transport: Arc::new(transport),
        })
    }

    pub fn auth(&self) -> AuthClient {
        AuthClient::new(Arc::clone(&self.transport))
    }

    pub fn require_signed_in(&self) -> Result<()> {
        if !self.store.is_authenticated() {
            anyhow::bail!("Not signed in. Run 'dashlink login' first.");
        }
        Ok(())
    }
}
