use serde::Serialize;
use serde::de::DeserializeOwned;
use std::sync::Arc;
use tracing::{debug, warn};

use super::TransportConfig;
use super::backend::{HttpBackend, ReqwestBackend};
use super::refresh::RefreshCoordinator;
use super::request::{ApiRequest, ApiResponse, Attempt};
use crate::credentials::CredentialStore;
use crate::errors::TransportError;

/// Request/response exchange that carries the current access value and
/// heals itself once when the server rejects it.
///
/// On a 401 the request's attempt advances from `Initial` to `Retry`, the
/// refresh procedure runs (coalesced with any refresh already in flight on
/// this transport) and the same request descriptor is sent again with the new
/// access value. A 401 on the retry, or a failed refresh, clears the store
/// and yields [`TransportError::SessionExpired`]; a pair written since the
/// retry went out is left in place. Every other failure is returned as-is on
/// the first attempt.
pub struct CredentialedTransport {
    backend: Arc<dyn HttpBackend>,
    store: Arc<CredentialStore>,
    refresher: RefreshCoordinator,
}

impl CredentialedTransport {
    pub fn new(
        backend: Arc<dyn HttpBackend>,
        store: Arc<CredentialStore>,
        refresh_path: impl Into<String>,
    ) -> Self {
        let refresher =
            RefreshCoordinator::new(Arc::clone(&backend), Arc::clone(&store), refresh_path.into());
        Self {
            backend,
            store,
            refresher,
        }
    }

    /// Transport over [`ReqwestBackend`] using `config`.
    pub fn from_config(
        config: &TransportConfig,
        store: Arc<CredentialStore>,
    ) -> Result<Self, TransportError> {
        let backend = ReqwestBackend::new(&config.base_url, config.request_timeout)?;
        Ok(Self::new(
            Arc::new(backend),
            store,
            config.refresh_path.clone(),
        ))
    }

    pub fn store(&self) -> &Arc<CredentialStore> {
        &self.store
    }

    /// Number of refresh exchanges this transport has issued.
    pub fn refresh_count(&self) -> u64 {
        self.refresher.calls()
    }

    pub async fn execute(&self, request: &ApiRequest) -> Result<ApiResponse, TransportError> {
        let mut attempt = Attempt::Initial;
        let mut access = self.store.access();
        // Refresh value of the pair the retry was sent under
        let mut retried_under: Option<String> = None;

        loop {
            debug!(
                method = %request.method(),
                path = request.path(),
                ?attempt,
                "Sending request"
            );
            let response = self.backend.exchange(request, access.as_deref()).await?;
            if !response.is_unauthorized() {
                return response.into_result();
            }

            let Some(next) = attempt.next() else {
                warn!(path = request.path(), "Retried request rejected again; ending session");
                // Leaves a pair written since the retry went out alone
                if let Some(refresh) = &retried_under {
                    self.store.revoke(refresh);
                }
                return Err(TransportError::SessionExpired {
                    reason: "credential rejected after refresh".to_string(),
                });
            };

            let pair = self.refresher.recover(access.as_deref()).await?;
            access = Some(pair.access);
            retried_under = Some(pair.refresh);
            attempt = next;
        }
    }

    /// Send without a credential and without refresh handling. Used for the
    /// endpoints that hand out credentials in the first place.
    pub async fn execute_anonymous(
        &self,
        request: &ApiRequest,
    ) -> Result<ApiResponse, TransportError> {
        self.backend.exchange(request, None).await?.into_result()
    }

    pub async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, TransportError> {
        self.execute(&ApiRequest::get(path)).await?.json()
    }

    pub async fn post_json<B: Serialize, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, TransportError> {
        let body = serde_json::to_value(body).map_err(TransportError::Decode)?;
        self.execute(&ApiRequest::post(path, body)).await?.json()
    }
}
