//! Reqwest-based implementation of the [`DnsdistApi`] trait.

use async_trait::async_trait;
use http::Method;
use reqwest::Client;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use serde_json::Value;
use url::Url;

use super::client::{API_KEY_HEADER, ApiClientError, ApiResponse, DnsdistApi};
use crate::config::SourceConfig;

/// Reqwest-backed client bound to one source's base URL.
pub struct ReqwestDnsdistClient {
    client: Client,
    base_url: Url,
}

impl ReqwestDnsdistClient {
    /// Builds a client for `base_url`, sending `api_key` on every request.
    /// Certificate verification is skipped when `verify_ssl` is false.
    pub fn new(base_url: Url, api_key: Option<&str>, verify_ssl: bool) -> Result<Self, ApiClientError> {
        let mut headers = HeaderMap::new();
        if let Some(key) = api_key.filter(|key| !key.is_empty()) {
            let value = HeaderValue::from_str(key)
                .map_err(|err| ApiClientError::InvalidHeader(err.to_string()))?;
            let name = HeaderName::from_bytes(API_KEY_HEADER.as_bytes())
                .map_err(|err| ApiClientError::InvalidHeader(err.to_string()))?;
            headers.insert(name, value);
        }

        let client = Client::builder()
            .default_headers(headers)
            .danger_accept_invalid_certs(!verify_ssl)
            .build()
            .map_err(|err| ApiClientError::Transport(err.to_string()))?;

        Ok(Self { client, base_url })
    }

    /// Client for a configured source.
    pub fn from_source(config: &SourceConfig) -> Result<Self, ApiClientError> {
        Self::new(config.base_url()?, config.api_key.as_deref(), config.verify_ssl)
    }

    /// Wrap an existing reqwest client. It must already carry the
    /// `X-API-Key` header if the source needs one.
    pub fn from_client(client: Client, base_url: Url) -> Self {
        Self { client, base_url }
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }
}

#[async_trait]
impl DnsdistApi for ReqwestDnsdistClient {
    async fn request(
        &self,
        method: &Method,
        path: &str,
        body: Option<&Value>,
    ) -> Result<ApiResponse, ApiClientError> {
        let url = self.base_url.join(path)?;
        let mut builder = self.client.request(method.clone(), url);
        if let Some(body) = body {
            builder = builder.json(body);
        }

        let response = builder
            .send()
            .await
            .map_err(|err| ApiClientError::Transport(err.to_string()))?;
        let status = response.status().as_u16();
        let body = response
            .bytes()
            .await
            .map_err(|err| ApiClientError::Transport(err.to_string()))?
            .to_vec();

        Ok(ApiResponse { status, body })
    }
}
