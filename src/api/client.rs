//! Transport abstraction for the dnsdist HTTP API.
//!
//! Coordinators and the control plane talk to a source through
//! [`DnsdistApi`], so tests can swap the network for canned responses.

use async_trait::async_trait;
use http::Method;
use serde_json::Value;
use thiserror::Error;

/// Statistics counters.
pub const STATISTICS_PATH: &str = "/api/v1/servers/localhost/statistics";
/// Server description carrying the filtering rules.
pub const FILTERING_RULES_PATH: &str = "/api/v1/servers/localhost";
/// Dynamic block list, keyed by network.
pub const DYNAMIC_RULES_PATH: &str = "/jsonstat?command=dynblocklist";

/// Header carrying the API key.
pub const API_KEY_HEADER: &str = "X-API-Key";

/// Contract for issuing requests against one dnsdist instance.
///
/// `path` is absolute (may carry a query string) and is resolved against the
/// implementation's base URL.
#[async_trait]
pub trait DnsdistApi: Send + Sync {
    async fn request(
        &self,
        method: &Method,
        path: &str,
        body: Option<&Value>,
    ) -> Result<ApiResponse, ApiClientError>;

    async fn get(&self, path: &str) -> Result<ApiResponse, ApiClientError> {
        self.request(&Method::GET, path, None).await
    }
}

/// Minimal response representation returned by the transport abstraction.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

impl ApiResponse {
    pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    /// Convenience constructor for a JSON body.
    pub fn json_body(status: u16, value: &Value) -> Self {
        Self::new(status, value.to_string())
    }

    pub fn is_not_found(&self) -> bool {
        self.status == 404
    }

    /// Decodes the body as JSON.
    pub fn json(&self) -> Result<Value, ApiClientError> {
        Ok(serde_json::from_slice(&self.body)?)
    }

    /// Lossy UTF-8 view of the body, for log messages.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

#[derive(Debug, Error)]
pub enum ApiClientError {
    #[error("http transport error: {0}")]
    Transport(String),
    #[error("request timed out after {0:?}")]
    Timeout(std::time::Duration),
    #[error("unexpected HTTP status {0}")]
    Status(u16),
    #[error("malformed JSON body: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("invalid base url: {0}")]
    Url(#[from] url::ParseError),
    #[error("invalid header value: {0}")]
    InvalidHeader(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn decodes_json_bodies() {
        let response = ApiResponse::json_body(200, &json!([{"name": "queries", "value": 1}]));
        assert_eq!(response.json().unwrap()[0]["value"], 1);
        assert!(!response.is_not_found());

        let broken = ApiResponse::new(200, "<html>");
        assert!(matches!(broken.json(), Err(ApiClientError::Decode(_))));
        assert_eq!(broken.text(), "<html>");
    }
}
