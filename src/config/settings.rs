//! Source, group and monitor settings.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use url::Url;

use super::ConfigError;
use super::validate::validate_host;
use crate::coordinator::{group_history_key, source_history_key};

pub const DEFAULT_PORT: u16 = 8083;
pub const DEFAULT_UPDATE_INTERVAL_SECS: u64 = 30;
pub const MIN_UPDATE_INTERVAL_SECS: u64 = 10;
pub const MAX_UPDATE_INTERVAL_SECS: u64 = 600;
pub const DEFAULT_FETCH_TIMEOUT_SECS: u64 = 10;

const REDACTED: &str = "**REDACTED**";

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_interval() -> u64 {
    DEFAULT_UPDATE_INTERVAL_SECS
}

fn default_fetch_timeout() -> u64 {
    DEFAULT_FETCH_TIMEOUT_SECS
}

fn enabled() -> bool {
    true
}

fn check_interval(name: &str, secs: u64) -> Result<(), ConfigError> {
    if (MIN_UPDATE_INTERVAL_SECS..=MAX_UPDATE_INTERVAL_SECS).contains(&secs) {
        Ok(())
    } else {
        Err(ConfigError::IntervalOutOfRange {
            name: name.to_string(),
            secs,
        })
    }
}

/// One monitored dnsdist instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceConfig {
    pub name: String,
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub use_https: bool,
    #[serde(default = "enabled")]
    pub verify_ssl: bool,
    /// Refresh interval in seconds.
    #[serde(default = "default_interval")]
    pub update_interval: u64,
    #[serde(default = "enabled")]
    pub include_filtering_rules: bool,
    #[serde(default = "enabled")]
    pub include_dynamic_rules: bool,
}

impl SourceConfig {
    pub fn new(name: impl Into<String>, host: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            host: host.into(),
            port: DEFAULT_PORT,
            api_key: None,
            use_https: false,
            verify_ssl: true,
            update_interval: DEFAULT_UPDATE_INTERVAL_SECS,
            include_filtering_rules: true,
            include_dynamic_rules: true,
        }
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    pub fn with_https(mut self, use_https: bool) -> Self {
        self.use_https = use_https;
        self
    }

    pub fn with_verify_ssl(mut self, verify_ssl: bool) -> Self {
        self.verify_ssl = verify_ssl;
        self
    }

    pub fn with_update_interval(mut self, secs: u64) -> Self {
        self.update_interval = secs;
        self
    }

    pub fn with_filtering_rules(mut self, include: bool) -> Self {
        self.include_filtering_rules = include;
        self
    }

    pub fn with_dynamic_rules(mut self, include: bool) -> Self {
        self.include_dynamic_rules = include;
        self
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.update_interval)
    }

    pub fn scheme(&self) -> &'static str {
        if self.use_https { "https" } else { "http" }
    }

    /// `scheme://host:port`, bracketing bare IPv6 literals.
    pub fn base_url(&self) -> Result<Url, url::ParseError> {
        let host = self.host.trim();
        let host = if host.contains(':') && !host.starts_with('[') {
            format!("[{host}]")
        } else {
            host.to_string()
        };
        Url::parse(&format!("{}://{}:{}", self.scheme(), host, self.port))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.name.trim().is_empty() {
            return Err(ConfigError::EmptyName);
        }
        validate_host(&self.host)?;
        if self.port == 0 {
            return Err(ConfigError::InvalidPort(self.name.clone()));
        }
        check_interval(&self.name, self.update_interval)
    }

    /// Serialized form with the API key masked, for diagnostics.
    pub fn redacted(&self) -> Value {
        let mut value = serde_json::to_value(self).unwrap_or(Value::Null);
        if self.api_key.is_some()
            && let Some(map) = value.as_object_mut()
        {
            map.insert("api_key".to_string(), Value::String(REDACTED.to_string()));
        }
        value
    }
}

/// A virtual aggregate over named sources.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupConfig {
    pub name: String,
    pub members: Vec<String>,
    #[serde(default = "default_interval")]
    pub update_interval: u64,
}

impl GroupConfig {
    pub fn new<I, S>(name: impl Into<String>, members: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            members: members.into_iter().map(Into::into).collect(),
            update_interval: DEFAULT_UPDATE_INTERVAL_SECS,
        }
    }

    pub fn with_update_interval(mut self, secs: u64) -> Self {
        self.update_interval = secs;
        self
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.update_interval)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.name.trim().is_empty() {
            return Err(ConfigError::EmptyName);
        }
        if self.members.iter().all(|member| member.trim().is_empty()) {
            return Err(ConfigError::EmptyGroup(self.name.clone()));
        }
        check_interval(&self.name, self.update_interval)
    }

    pub fn redacted(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

/// Everything a [`crate::DnsdistMonitor`] needs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitorConfig {
    #[serde(default)]
    pub sources: Vec<SourceConfig>,
    #[serde(default)]
    pub groups: Vec<GroupConfig>,
    /// redb file for sample histories; histories stay in memory when unset.
    #[serde(default)]
    pub storage_path: Option<PathBuf>,
    #[serde(default = "default_fetch_timeout")]
    pub fetch_timeout_secs: u64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            sources: Vec::new(),
            groups: Vec::new(),
            storage_path: None,
            fetch_timeout_secs: DEFAULT_FETCH_TIMEOUT_SECS,
        }
    }
}

impl MonitorConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_json_str(raw: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json_str(&raw)
    }

    pub fn with_source(mut self, source: SourceConfig) -> Self {
        self.sources.push(source);
        self
    }

    pub fn with_group(mut self, group: GroupConfig) -> Self {
        self.groups.push(group);
        self
    }

    pub fn with_storage_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.storage_path = Some(path.into());
        self
    }

    pub fn with_fetch_timeout(mut self, timeout: Duration) -> Self {
        self.fetch_timeout_secs = timeout.as_secs().max(1);
        self
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs.max(1))
    }

    /// Validates every entry, name uniqueness across sources and groups, and
    /// that no two entries map to the same persisted history record. Group
    /// members without a matching source only produce a warning since
    /// membership may be changed at runtime.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut names = HashSet::new();
        let mut keys: HashMap<String, &str> = HashMap::new();
        let entries = self
            .sources
            .iter()
            .map(|source| (source.validate(), source.name.as_str(), source_history_key(&source.name)))
            .chain(
                self.groups
                    .iter()
                    .map(|group| (group.validate(), group.name.as_str(), group_history_key(&group.name))),
            );

        for (valid, name, key) in entries {
            valid?;
            if !names.insert(name) {
                return Err(ConfigError::DuplicateName(name.to_string()));
            }
            if let Some(other) = keys.insert(key.clone(), name) {
                return Err(ConfigError::HistoryKeyCollision {
                    name: name.to_string(),
                    other: other.to_string(),
                    key,
                });
            }
        }

        for group in &self.groups {
            for member in &group.members {
                if !self.sources.iter().any(|source| &source.name == member) {
                    log::warn!("group {} references unknown source {}", group.name, member);
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn source_defaults_and_base_url() {
        let source = SourceConfig::new("edge", "dns.example.com");
        assert_eq!(source.port, 8083);
        assert!(source.verify_ssl);
        assert_eq!(source.interval(), Duration::from_secs(30));
        assert_eq!(source.base_url().unwrap().as_str(), "http://dns.example.com:8083/");

        let v6 = SourceConfig::new("v6", "2001:db8::1").with_https(true).with_port(443);
        assert_eq!(v6.base_url().unwrap().as_str(), "https://[2001:db8::1]/");
    }

    #[test]
    fn rejects_out_of_range_intervals() {
        let source = SourceConfig::new("edge", "10.0.0.1").with_update_interval(5);
        assert!(matches!(source.validate(), Err(ConfigError::IntervalOutOfRange { secs: 5, .. })));
        assert!(source.clone().with_update_interval(600).validate().is_ok());
        assert!(source.with_update_interval(601).validate().is_err());
    }

    #[test]
    fn loads_json_with_defaults() {
        let config = MonitorConfig::from_json_str(
            r#"{
                "sources": [
                    {"name": "A", "host": "10.0.0.1", "api_key": "secret"},
                    {"name": "B", "host": "10.0.0.2", "port": 8084, "include_dynamic_rules": false}
                ],
                "groups": [{"name": "All", "members": ["A", "B"], "update_interval": 60}]
            }"#,
        )
        .unwrap();

        assert_eq!(config.sources[0].port, 8083);
        assert!(config.sources[0].include_filtering_rules);
        assert!(!config.sources[1].include_dynamic_rules);
        assert_eq!(config.groups[0].interval(), Duration::from_secs(60));
        assert_eq!(config.fetch_timeout(), Duration::from_secs(10));
        assert!(config.storage_path.is_none());
    }

    #[test]
    fn rejects_duplicate_names_and_empty_groups() {
        let duplicate = MonitorConfig::new()
            .with_source(SourceConfig::new("A", "10.0.0.1"))
            .with_group(GroupConfig::new("A", ["A"]));
        assert!(matches!(duplicate.validate(), Err(ConfigError::DuplicateName(name)) if name == "A"));

        let empty = MonitorConfig::new().with_group(GroupConfig::new("G", Vec::<String>::new()));
        assert!(matches!(empty.validate(), Err(ConfigError::EmptyGroup(_))));

        assert!(matches!(
            MonitorConfig::from_json_str("{\"sources\": 3}"),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn rejects_names_sharing_a_history_record() {
        let clash = MonitorConfig::new()
            .with_source(SourceConfig::new("Edge A", "10.0.0.1"))
            .with_source(SourceConfig::new("edge-a", "10.0.0.2"));
        match clash.validate() {
            Err(ConfigError::HistoryKeyCollision { name, other, key }) => {
                assert_eq!(name, "edge-a");
                assert_eq!(other, "Edge A");
                assert_eq!(key, "history:host:edge-a");
            }
            other => panic!("expected a history key collision, got {other:?}"),
        }

        let groups = MonitorConfig::new()
            .with_group(GroupConfig::new("Core", ["x"]))
            .with_group(GroupConfig::new("core!", ["x"]));
        assert!(matches!(groups.validate(), Err(ConfigError::HistoryKeyCollision { .. })));

        // sources and groups persist under different prefixes
        let mixed = MonitorConfig::new()
            .with_source(SourceConfig::new("edge", "10.0.0.1"))
            .with_group(GroupConfig::new("Edge!", ["edge"]));
        assert!(mixed.validate().is_ok());
    }

    #[test]
    fn redacts_api_key() {
        let source = SourceConfig::new("edge", "10.0.0.1").with_api_key("secret");
        let redacted = source.redacted();
        assert_eq!(redacted["api_key"], "**REDACTED**");
        assert_eq!(redacted["host"], "10.0.0.1");
        assert!(SourceConfig::new("edge", "10.0.0.1").redacted()["api_key"].is_null());
    }
}
