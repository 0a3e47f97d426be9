//! Session operations against the dashboard API: sign in, register, sign out
//! and fetch the current profile.
//!
//! Sign-in and registration are the only calls that write a fresh credential
//! pair into the store; sign-out is the only caller path that clears it.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{info, warn};

use crate::errors::TransportError;
use crate::transport::{ApiRequest, CredentialedTransport};

pub const LOGIN_PATH: &str = "/api/auth/login/";
pub const REGISTER_PATH: &str = "/api/auth/register/";
pub const LOGOUT_PATH: &str = "/api/auth/logout/";
pub const PROFILE_PATH: &str = "/api/auth/profile/";

/// A dashboard account as returned by the auth endpoints.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub email: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
    #[serde(default)]
    pub plan: Option<String>,
    #[serde(default)]
    pub subscription_end_date: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub instagram_accounts: Vec<Value>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

impl User {
    pub fn display_name(&self) -> String {
        let full = format!("{} {}", self.first_name, self.last_name);
        let full = full.trim();
        if !full.is_empty() {
            full.to_string()
        } else if !self.username.is_empty() {
            self.username.clone()
        } else {
            self.email.clone()
        }
    }
}

#[derive(Clone, Serialize)]
pub struct RegisterRequest {
    pub email: String,
    pub username: String,
    pub password: String,
    pub password_confirm: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub first_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_name: Option<String>,
}

impl RegisterRequest {
    pub fn new(
        email: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        let password = password.into();
        Self {
            email: email.into(),
            username: username.into(),
            password_confirm: password.clone(),
            password,
            first_name: None,
            last_name: None,
        }
    }

    pub fn with_name(mut self, first: impl Into<String>, last: impl Into<String>) -> Self {
        self.first_name = Some(first.into());
        self.last_name = Some(last.into());
        self
    }
}

impl std::fmt::Debug for RegisterRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegisterRequest")
            .field("email", &self.email)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish_non_exhaustive()
    }
}

#[derive(Deserialize)]
struct IssuedTokens {
    access: String,
    refresh: String,
}

#[derive(Deserialize)]
struct AuthResponse {
    user: User,
    tokens: IssuedTokens,
}

/// Account operations over a shared [`CredentialedTransport`].
#[derive(Clone)]
pub struct AuthClient {
    transport: Arc<CredentialedTransport>,
}

impl AuthClient {
    pub fn new(transport: Arc<CredentialedTransport>) -> Self {
        Self { transport }
    }

    pub fn transport(&self) -> &Arc<CredentialedTransport> {
        &self.transport
    }

    /// Exchange email and password for a credential pair and store it.
    pub async fn login(&self, email: &str, password: &str) -> Result<User, TransportError> {
        let request = ApiRequest::post(
            LOGIN_PATH,
            json!({ "email": email, "password": password }),
        );
        self.issue(&request).await
    }

    /// Create an account; the server signs the new account in directly.
    pub async fn register(&self, registration: &RegisterRequest) -> Result<User, TransportError> {
        let body = serde_json::to_value(registration).map_err(TransportError::Decode)?;
        self.issue(&ApiRequest::post(REGISTER_PATH, body)).await
    }

    /// Revoke the refresh value server-side, then clear the store. The local
    /// session ends even when the server call fails.
    pub async fn logout(&self) {
        let store = self.transport.store();
        if let Some(refresh) = store.refresh_value() {
            let request = ApiRequest::post(LOGOUT_PATH, json!({ "refresh_token": refresh }));
            match self.transport.execute(&request).await {
                Ok(_) => info!("Server session revoked"),
                Err(e) => warn!(error = %e, "Server-side logout failed; clearing local session"),
            }
        }
        store.clear();
    }

    pub async fn profile(&self) -> Result<User, TransportError> {
        self.transport.get_json(PROFILE_PATH).await
    }

    async fn issue(&self, request: &ApiRequest) -> Result<User, TransportError> {
        let response: AuthResponse = self.transport.execute_anonymous(request).await?.json()?;
        self.transport
            .store()
            .set_pair(response.tokens.access, response.tokens.refresh);
        info!(user_id = %response.user.id, "Signed in");
        Ok(response.user)
    }
}
