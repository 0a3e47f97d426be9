//! The raw request/response exchange underneath the credentialed transport.

use async_trait::async_trait;
use reqwest::Url;
use std::time::Duration;
use tracing::debug;

use super::request::{ApiRequest, ApiResponse, Method};
use crate::errors::TransportError;

/// One HTTP exchange. Implementations never retry and never interpret
/// statuses; a response with any status is `Ok`, only failing to reach the
/// server is an error.
#[async_trait]
pub trait HttpBackend: Send + Sync {
    async fn exchange(
        &self,
        request: &ApiRequest,
        bearer: Option<&str>,
    ) -> Result<ApiResponse, TransportError>;
}

/// [`HttpBackend`] over `reqwest`, resolving request paths against a base URL.
#[derive(Debug, Clone)]
pub struct ReqwestBackend {
    client: reqwest::Client,
    base_url: Url,
}

impl ReqwestBackend {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, TransportError> {
        let mut base_url = Url::parse(base_url).map_err(|e| TransportError::InvalidTarget {
            target: base_url.to_string(),
            message: e.to_string(),
        })?;
        // Url::join drops the last segment of a base without a trailing slash.
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("dashlink/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| TransportError::Network(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self { client, base_url })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Resolve a request path (`/api/x/`, `api/x/` or an absolute URL).
    pub fn resolve(&self, path: &str) -> Result<Url, TransportError> {
        self.base_url
            .join(path.trim_start_matches('/'))
            .map_err(|e| TransportError::InvalidTarget {
                target: path.to_string(),
                message: e.to_string(),
            })
    }
}

fn to_reqwest(method: Method) -> reqwest::Method {
    match method {
        Method::Get => reqwest::Method::GET,
        Method::Post => reqwest::Method::POST,
        Method::Put => reqwest::Method::PUT,
        Method::Patch => reqwest::Method::PATCH,
        Method::Delete => reqwest::Method::DELETE,
    }
}

#[async_trait]
impl HttpBackend for ReqwestBackend {
    async fn exchange(
        &self,
        request: &ApiRequest,
        bearer: Option<&str>,
    ) -> Result<ApiResponse, TransportError> {
        let url = self.resolve(request.path())?;
        let mut builder = self
            .client
            .request(to_reqwest(request.method()), url)
            .header("Accept", "application/json");
        if let Some(token) = bearer {
            builder = builder.bearer_auth(token);
        }
        if let Some(body) = request.body() {
            builder = builder.json(body);
        }

        let resp = builder
            .send()
            .await
            .map_err(|e| TransportError::Network(e.to_string()))?;
        let status = resp.status().as_u16();
        let bytes = resp
            .bytes()
            .await
            .map_err(|e| TransportError::Network(e.to_string()))?;

        debug!(method = %request.method(), path = request.path(), status, "HTTP exchange completed");
        Ok(ApiResponse::from_bytes(status, &bytes))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backend(base: &str) -> ReqwestBackend {
        ReqwestBackend::new(base, Duration::from_secs(5)).unwrap()
    }

    #[test]
    fn test_resolve_with_and_without_trailing_slash() {
        let a = backend("http://localhost:8000");
        assert_eq!(
            a.resolve("/api/auth/profile/").unwrap().as_str(),
            "http://localhost:8000/api/auth/profile/"
        );

        let b = backend("http://localhost:8000/v2");
        assert_eq!(
            b.resolve("api/automations/").unwrap().as_str(),
            "http://localhost:8000/v2/api/automations/"
        );
    }

    #[test]
    fn test_resolve_keeps_absolute_urls() {
        let a = backend("http://localhost:8000/");
        assert_eq!(
            a.resolve("https://graph.example.com/me").unwrap().as_str(),
            "https://graph.example.com/me"
        );
    }

    #[test]
    fn test_invalid_base_url_is_rejected() {
        let err = ReqwestBackend::new("not a url", Duration::from_secs(1)).unwrap_err();
        assert!(matches!(err, TransportError::InvalidTarget { .. }));
    }
}
