//! Control-plane commands sent to a source.

use std::time::{Duration, Instant};

use http::Method;
use serde::Serialize;
use serde_json::{Value, json};
use thiserror::Error;

use super::client::DnsdistApi;

/// Administrative action against one dnsdist instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlCommand {
    ClearCache,
    EnableBackend(String),
    DisableBackend(String),
    Reload,
    ListBackends,
    /// Runtime console command, e.g. `showServers()`.
    Console(String),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ControlError {
    #[error("{0} requires a backend name")]
    MissingBackend(&'static str),
    #[error("invalid backend name '{0}'")]
    InvalidBackend(String),
    #[error("console command must not be empty")]
    EmptyCommand,
}

impl ControlCommand {
    pub fn name(&self) -> &'static str {
        match self {
            Self::ClearCache => "clear_cache",
            Self::EnableBackend(_) => "enable_server",
            Self::DisableBackend(_) => "disable_server",
            Self::Reload => "reload_config",
            Self::ListBackends => "get_backends",
            Self::Console(_) => "runtime_command",
        }
    }

    pub fn method(&self) -> Method {
        match self {
            Self::ClearCache | Self::Reload | Self::Console(_) => Method::POST,
            Self::EnableBackend(_) | Self::DisableBackend(_) => Method::PUT,
            Self::ListBackends => Method::GET,
        }
    }

    pub fn path(&self) -> String {
        match self {
            Self::ClearCache => "/api/v1/clearCache".to_string(),
            Self::EnableBackend(backend) => format!("/api/v1/servers/{}/enable", backend.trim()),
            Self::DisableBackend(backend) => format!("/api/v1/servers/{}/disable", backend.trim()),
            Self::Reload => "/api/v1/reload".to_string(),
            Self::ListBackends => "/api/v1/servers".to_string(),
            Self::Console(_) => "/api/v1/console".to_string(),
        }
    }

    pub fn body(&self) -> Option<Value> {
        match self {
            Self::Console(command) => Some(json!({ "command": command })),
            _ => None,
        }
    }

    /// Checks the arguments before anything is sent.
    pub fn validate(&self) -> Result<(), ControlError> {
        match self {
            Self::EnableBackend(backend) | Self::DisableBackend(backend) => {
                let backend = backend.trim();
                if backend.is_empty() {
                    return Err(ControlError::MissingBackend(self.name()));
                }
                if backend
                    .chars()
                    .any(|c| c.is_whitespace() || matches!(c, '/' | '?' | '#' | '%'))
                {
                    return Err(ControlError::InvalidBackend(backend.to_string()));
                }
                Ok(())
            }
            Self::Console(command) if command.trim().is_empty() => Err(ControlError::EmptyCommand),
            _ => Ok(()),
        }
    }
}

/// Result of sending one command to one source.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ControlOutcome {
    pub source: String,
    pub command: &'static str,
    pub success: bool,
    pub status: Option<u16>,
    /// Decoded response body, kept for commands that return data.
    pub data: Option<Value>,
    pub error: Option<String>,
    #[serde(skip)]
    pub latency: Duration,
}

/// Sends `command` and classifies the answer; 200 and 204 count as success.
/// Never fails: transport problems end up in [`ControlOutcome::error`].
pub async fn send_command(
    api: &dyn DnsdistApi,
    source: &str,
    command: &ControlCommand,
    timeout: Duration,
) -> ControlOutcome {
    let started = Instant::now();
    let method = command.method();
    let path = command.path();
    let body = command.body();
    let request = api.request(&method, &path, body.as_ref());

    let mut outcome = ControlOutcome {
        source: source.to_string(),
        command: command.name(),
        success: false,
        status: None,
        data: None,
        error: None,
        latency: Duration::ZERO,
    };

    match tokio::time::timeout(timeout, request).await {
        Ok(Ok(response)) => {
            outcome.status = Some(response.status);
            outcome.success = matches!(response.status, 200 | 204);
            if outcome.success {
                if matches!(command, ControlCommand::ListBackends) {
                    match response.json() {
                        Ok(value) => outcome.data = Some(value),
                        Err(err) => outcome.error = Some(err.to_string()),
                    }
                }
            } else {
                outcome.error = Some(format!("HTTP {}: {}", response.status, response.text().trim()));
            }
        }
        Ok(Err(err)) => outcome.error = Some(err.to_string()),
        Err(_) => outcome.error = Some(format!("request timed out after {timeout:?}")),
    }

    outcome.latency = started.elapsed();
    outcome
}
