//! Settings and configuration module
//!
//! Provides:
//! - Source, group and monitor settings with fluent builders
//! - JSON loading
//! - Host and interval validation

pub mod settings;
pub mod validate;

use thiserror::Error;

pub use settings::{
    DEFAULT_FETCH_TIMEOUT_SECS, DEFAULT_PORT, DEFAULT_UPDATE_INTERVAL_SECS, GroupConfig,
    MAX_UPDATE_INTERVAL_SECS, MIN_UPDATE_INTERVAL_SECS, MonitorConfig, SourceConfig,
};
pub use validate::validate_host;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Host must be a non-empty string")]
    EmptyHost,
    #[error(
        "Invalid IPv4 address format: '{0}'. IPv4 addresses must have exactly 4 octets (0-255) separated by dots"
    )]
    InvalidIpv4(String),
    #[error("Invalid host format: '{0}'. Must be a valid hostname, IPv4 address, or IPv6 address")]
    InvalidHost(String),
    #[error("name must not be empty")]
    EmptyName,
    #[error("{0}: port must be between 1 and 65535")]
    InvalidPort(String),
    #[error("{name}: update interval {secs}s outside 10-600s")]
    IntervalOutOfRange { name: String, secs: u64 },
    #[error("duplicate coordinator name '{0}'")]
    DuplicateName(String),
    #[error("'{name}' and '{other}' would share the history record '{key}'")]
    HistoryKeyCollision { name: String, other: String, key: String },
    #[error("group '{0}' has no members")]
    EmptyGroup(String),
    #[error("failed to read configuration: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse configuration: {0}")]
    Parse(#[from] serde_json::Error),
}
