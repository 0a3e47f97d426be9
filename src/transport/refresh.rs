//! Single-flight refresh of the access value.
//!
//! The first request that sees its credential rejected starts the refresh
//! exchange and parks a shared handle to it in the coordinator's slot. Every
//! other rejected request that arrives while it runs awaits that same handle,
//! so a burst of failures costs one refresh call. The refresh future clears
//! the slot itself when it finishes, whichever way it finishes.

use futures::future::{BoxFuture, FutureExt, Shared};
use serde::Deserialize;
use serde_json::json;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{info, warn};

use super::backend::HttpBackend;
use super::request::ApiRequest;
use crate::credentials::{CredentialPair, CredentialStore};
use crate::errors::TransportError;

/// The pair now in the store, or the reason the refresh failed.
type RefreshOutcome = Result<CredentialPair, String>;
type InFlight = Shared<BoxFuture<'static, RefreshOutcome>>;

#[derive(Debug, Deserialize)]
struct RefreshResponse {
    access: String,
    /// Present only when the server rotates refresh values.
    #[serde(default)]
    refresh: Option<String>,
}

pub(crate) struct RefreshCoordinator {
    backend: Arc<dyn HttpBackend>,
    store: Arc<CredentialStore>,
    refresh_path: String,
    inflight: Arc<Mutex<Option<InFlight>>>,
    calls: AtomicU64,
}

fn lock(slot: &Mutex<Option<InFlight>>) -> MutexGuard<'_, Option<InFlight>> {
    slot.lock().unwrap_or_else(PoisonError::into_inner)
}

impl RefreshCoordinator {
    pub(crate) fn new(
        backend: Arc<dyn HttpBackend>,
        store: Arc<CredentialStore>,
        refresh_path: String,
    ) -> Self {
        Self {
            backend,
            store,
            refresh_path,
            inflight: Arc::new(Mutex::new(None)),
            calls: AtomicU64::new(0),
        }
    }

    /// Number of refresh exchanges started so far.
    pub(crate) fn calls(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }

    /// Obtain a usable pair after the access value `rejected` was refused.
    ///
    /// Joins a refresh already in flight; reuses the stored pair when
    /// another caller has refreshed since `rejected` was sent; otherwise
    /// starts a new refresh.
    pub(crate) async fn recover(
        &self,
        rejected: Option<&str>,
    ) -> Result<CredentialPair, TransportError> {
        let flight = {
            let mut slot = lock(&self.inflight);
            let joined = (*slot).clone();
            match joined {
                Some(flight) => flight,
                None => match self.store.pair() {
                    None => {
                        return Err(TransportError::SessionExpired {
                            reason: "no refresh value available".to_string(),
                        });
                    }
                    Some(pair) if rejected != Some(pair.access.as_str()) => {
                        return Ok(pair);
                    }
                    Some(pair) => {
                        let flight = self.start(pair.refresh);
                        *slot = Some(flight.clone());
                        flight
                    }
                },
            }
        };

        flight
            .await
            .map_err(|reason| TransportError::SessionExpired { reason })
    }

    fn start(&self, refresh: String) -> InFlight {
        self.calls.fetch_add(1, Ordering::SeqCst);
        info!("Access value rejected; refreshing session");

        let backend = Arc::clone(&self.backend);
        let store = Arc::clone(&self.store);
        let slot = Arc::clone(&self.inflight);
        let path = self.refresh_path.clone();

        async move {
            let outcome = match exchange_refresh(backend.as_ref(), &path, &refresh).await {
                Ok(tokens) => {
                    let next = CredentialPair::new(
                        tokens.access,
                        tokens.refresh.unwrap_or_else(|| refresh.clone()),
                    );
                    if store.rotate(&refresh, next.clone()) {
                        info!("Session refreshed");
                        Ok(next)
                    } else {
                        Err("session ended while refreshing".to_string())
                    }
                }
                Err(reason) => {
                    warn!(%reason, "Refresh failed; ending session");
                    store.revoke(&refresh);
                    Err(reason)
                }
            };
            *lock(&slot) = None;
            outcome
        }
        .boxed()
        .shared()
    }
}

/// POST the refresh value to the dedicated endpoint. No retry of its own.
async fn exchange_refresh(
    backend: &dyn HttpBackend,
    path: &str,
    refresh: &str,
) -> Result<RefreshResponse, String> {
    let request = ApiRequest::post(path, json!({ "refresh": refresh }));
    let response = backend
        .exchange(&request, None)
        .await
        .map_err(|e| format!("refresh request failed: {e}"))?;

    if !response.is_success() {
        return Err(format!("refresh rejected with status {}", response.status));
    }
    response
        .json::<RefreshResponse>()
        .map_err(|e| format!("unreadable refresh response: {e}"))
}
