//! Canonical metrics record.
//!
//! The single output shape shared by host and group coordinators. Every field
//! is always populated so consumers never have to deal with missing keys.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

/// Security status reported by dnsdist (`security-status` statistic).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SecurityStatus {
    #[default]
    Unknown,
    Ok,
    Warning,
    Critical,
}

impl SecurityStatus {
    /// Maps the numeric code exposed by the statistics endpoint.
    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            0 => Some(Self::Unknown),
            1 => Some(Self::Ok),
            2 => Some(Self::Warning),
            3 => Some(Self::Critical),
            _ => None,
        }
    }

    /// Parses a textual status. `secure` is accepted as an alias for `ok`;
    /// anything unrecognised is `unknown`.
    pub fn parse(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "ok" | "secure" => Self::Ok,
            "warning" => Self::Warning,
            "critical" => Self::Critical,
            _ => Self::Unknown,
        }
    }

    /// Ordinal used when picking the worst status across group members.
    pub fn severity(self) -> u8 {
        match self {
            Self::Unknown => 0,
            Self::Ok => 1,
            Self::Warning => 2,
            Self::Critical => 3,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Unknown => "unknown",
            Self::Ok => "ok",
            Self::Warning => "warning",
            Self::Critical => "critical",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Unknown => "Unknown",
            Self::Ok => "OK",
            Self::Warning => "Upgrade Recommended",
            Self::Critical => "Upgrade Required",
        }
    }
}

impl fmt::Display for SecurityStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Static filtering rule with its cumulative match count.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct FilteringRule {
    pub name: String,
    pub matches: u64,
    /// Per-host share of `matches`, only set on group records.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sources: Option<BTreeMap<String, u64>>,
    #[serde(default)]
    pub id: Option<Value>,
    #[serde(default)]
    pub uuid: Option<String>,
    #[serde(default)]
    pub action: Option<String>,
    #[serde(default)]
    pub rule: Option<String>,
    #[serde(default, rename = "type")]
    pub rule_type: Option<String>,
    #[serde(default)]
    pub enabled: Option<bool>,
    #[serde(default)]
    pub bypass: Option<bool>,
}

/// Dynamic (time-limited) network block.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct DynamicRule {
    pub network: String,
    pub blocks: u64,
    /// Remaining lifetime of the block in seconds.
    pub seconds: u64,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub action: Option<String>,
    #[serde(default)]
    pub ebpf: bool,
    #[serde(default)]
    pub warning: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sources: Option<BTreeMap<String, u64>>,
}

/// Normalised statistics for one host or one group.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct MetricsRecord {
    pub queries: u64,
    pub responses: u64,
    pub drops: u64,
    pub rule_drop: u64,
    pub downstream_errors: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    #[serde(rename = "cacheHit")]
    pub cache_hit_ratio: f64,
    pub cpu: f64,
    pub uptime: u64,
    pub security_status: SecurityStatus,
    pub req_per_hour: u64,
    pub req_per_day: u64,
    pub filtering_rules: BTreeMap<String, FilteringRule>,
    pub dynamic_rules: BTreeMap<String, DynamicRule>,
}

impl MetricsRecord {
    /// All-zero record used before the first successful refresh.
    pub fn zeroed() -> Self {
        Self::default()
    }

    /// Recomputes `cache_hit_ratio` from the current hit/miss counters.
    pub fn refresh_cache_hit_ratio(&mut self) {
        self.cache_hit_ratio = cache_hit_ratio(self.cache_hits, self.cache_misses);
    }
}

/// `hits / (hits + misses) * 100`, two decimals, `0.0` when nothing was seen.
pub fn cache_hit_ratio(hits: u64, misses: u64) -> f64 {
    let total = hits.saturating_add(misses);
    if total == 0 {
        return 0.0;
    }
    round2(hits as f64 / total as f64 * 100.0)
}

pub(crate) fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cache_hit_ratio_handles_empty_counters() {
        assert_eq!(cache_hit_ratio(80, 20), 80.0);
        assert_eq!(cache_hit_ratio(0, 0), 0.0);
        assert_eq!(cache_hit_ratio(1, 2), 33.33);
    }

    #[test]
    fn security_status_codes_and_aliases() {
        assert_eq!(SecurityStatus::from_code(3), Some(SecurityStatus::Critical));
        assert_eq!(SecurityStatus::from_code(7), None);
        assert_eq!(SecurityStatus::parse("secure"), SecurityStatus::Ok);
        assert_eq!(SecurityStatus::parse("bogus"), SecurityStatus::Unknown);
        assert!(SecurityStatus::Critical.severity() > SecurityStatus::Warning.severity());
    }

    #[test]
    fn zeroed_record_serializes_every_key() {
        let value = serde_json::to_value(MetricsRecord::zeroed()).unwrap();
        let object = value.as_object().unwrap();
        for key in [
            "queries",
            "responses",
            "drops",
            "rule_drop",
            "downstream_errors",
            "cache_hits",
            "cache_misses",
            "cacheHit",
            "cpu",
            "uptime",
            "security_status",
            "req_per_hour",
            "req_per_day",
            "filtering_rules",
            "dynamic_rules",
        ] {
            assert!(object.contains_key(key), "missing {key}");
        }
        assert_eq!(object["security_status"], "unknown");
    }
}
