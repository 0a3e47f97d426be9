use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::errors::TransportError;

/// HTTP methods the dashboard API uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Patch => "PATCH",
            Method::Delete => "DELETE",
        }
    }
}

impl std::fmt::Display for Method {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Method {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "GET" => Ok(Method::Get),
            "POST" => Ok(Method::Post),
            "PUT" => Ok(Method::Put),
            "PATCH" => Ok(Method::Patch),
            "DELETE" => Ok(Method::Delete),
            _ => Err(format!(
                "Invalid method '{}'. Valid values: GET, POST, PUT, PATCH, DELETE",
                s
            )),
        }
    }
}

/// Immutable description of one logical request.
///
/// The same descriptor is sent on the initial attempt and, at most once, on
/// the retry after a refresh; only the attached credential differs.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiRequest {
    method: Method,
    path: String,
    body: Option<Value>,
}

impl ApiRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            body: None,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::Get, path)
    }

    pub fn post(path: impl Into<String>, body: Value) -> Self {
        Self::new(Method::Post, path).with_body(body)
    }

    pub fn put(path: impl Into<String>, body: Value) -> Self {
        Self::new(Method::Put, path).with_body(body)
    }

    pub fn patch(path: impl Into<String>, body: Value) -> Self {
        Self::new(Method::Patch, path).with_body(body)
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::Delete, path)
    }

    pub fn with_body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    pub fn method(&self) -> Method {
        self.method
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn body(&self) -> Option<&Value> {
        self.body.as_ref()
    }
}

/// Which send of a logical request is in progress.
///
/// Only `Initial` has a successor, so a request that was already retried has
/// no way to start another refresh.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Attempt {
    Initial,
    Retry,
}

impl Attempt {
    pub fn next(self) -> Option<Attempt> {
        match self {
            Attempt::Initial => Some(Attempt::Retry),
            Attempt::Retry => None,
        }
    }
}

/// A response as seen by callers: status plus JSON body.
///
/// An empty body is `Value::Null`; a body that is not JSON is kept as a
/// `Value::String`.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiResponse {
    pub status: u16,
    pub body: Value,
}

impl ApiResponse {
    pub fn new(status: u16, body: Value) -> Self {
        Self { status, body }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// The server rejected the credential.
    pub fn is_unauthorized(&self) -> bool {
        self.status == 401
    }

    pub fn json<T: DeserializeOwned>(&self) -> Result<T, TransportError> {
        T::deserialize(&self.body).map_err(TransportError::Decode)
    }

    /// Map non-success statuses to their error kind.
    ///
    /// 401 is classified as a validation failure here; the transport handles
    /// it before this point.
    pub fn into_result(self) -> Result<Self, TransportError> {
        match self.status {
            s if s < 400 => Ok(self),
            s if s < 500 => Err(TransportError::Validation {
                status: s,
                body: self.body,
            }),
            s => Err(TransportError::Server {
                status: s,
                body: self.body,
            }),
        }
    }

    pub(crate) fn from_bytes(status: u16, bytes: &[u8]) -> Self {
        let body = if bytes.iter().all(u8::is_ascii_whitespace) {
            Value::Null
        } else {
            serde_json::from_slice(bytes)
                .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(bytes).into_owned()))
        };
        Self { status, body }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_method_from_str() {
        assert_eq!("get".parse::<Method>().unwrap(), Method::Get);
        assert_eq!("PATCH".parse::<Method>().unwrap(), Method::Patch);
        assert!("TRACE".parse::<Method>().is_err());
    }

    #[test]
    fn test_builders_set_body() {
        let req = ApiRequest::post("/api/automations/", json!({"name": "welcome"}));
        assert_eq!(req.method(), Method::Post);
        assert_eq!(req.path(), "/api/automations/");
        assert_eq!(req.body().unwrap()["name"], "welcome");
        assert!(ApiRequest::get("/x").body().is_none());
    }

    #[test]
    fn test_attempt_has_exactly_one_successor() {
        assert_eq!(Attempt::Initial.next(), Some(Attempt::Retry));
        assert_eq!(Attempt::Retry.next(), None);
    }

    #[test]
    fn test_into_result_classifies_statuses() {
        assert!(ApiResponse::new(204, Value::Null).into_result().is_ok());
        assert!(matches!(
            ApiResponse::new(400, json!({"detail": "bad"})).into_result(),
            Err(TransportError::Validation { status: 400, .. })
        ));
        assert!(matches!(
            ApiResponse::new(503, Value::Null).into_result(),
            Err(TransportError::Server { status: 503, .. })
        ));
    }

    #[test]
    fn test_from_bytes_handles_empty_and_plain_text() {
        assert_eq!(ApiResponse::from_bytes(204, b"").body, Value::Null);
        assert_eq!(ApiResponse::from_bytes(200, b"{\"ok\":true}").body, json!({"ok": true}));
        assert_eq!(
            ApiResponse::from_bytes(502, b"Bad Gateway").body,
            Value::String("Bad Gateway".to_string())
        );
    }

    #[test]
    fn test_json_decodes_body() {
        #[derive(serde::Deserialize)]
        struct Flag {
            ok: bool,
        }
        let response = ApiResponse::new(200, json!({"ok": true}));
        assert!(response.json::<Flag>().unwrap().ok);
        assert!(matches!(
            response.json::<Vec<String>>(),
            Err(TransportError::Decode(_))
        ));
    }
}
