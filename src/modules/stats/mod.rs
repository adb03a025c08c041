//! Statistics normalisation.
//!
//! Decodes the `/statistics` payload into a [`MetricsRecord`] and derives the
//! CPU percentage from the `cpu-user-msec` counter.

use std::time::Instant;

use serde_json::Value;

use crate::modules::metrics::{MetricsRecord, SecurityStatus, round2};

/// Shapes accepted from the statistics endpoint.
#[derive(Debug, Clone, PartialEq)]
pub enum StatsPayload {
    /// Bare `[{"name": ..., "value": ...}, ...]` list.
    Entries(Vec<Value>),
    /// Object carrying the list under `statistics`.
    Wrapped(Vec<Value>),
}

impl StatsPayload {
    /// Classifies a decoded JSON body. Objects without a usable `statistics`
    /// list decode to an empty list; scalars are rejected.
    pub fn decode(value: Value) -> Option<Self> {
        match value {
            Value::Array(entries) => Some(Self::Entries(entries)),
            Value::Object(mut map) => match map.remove("statistics") {
                Some(Value::Array(entries)) => Some(Self::Wrapped(entries)),
                _ => Some(Self::Wrapped(Vec::new())),
            },
            _ => None,
        }
    }

    pub fn entries(&self) -> &[Value] {
        match self {
            Self::Entries(entries) | Self::Wrapped(entries) => entries,
        }
    }
}

/// Output of [`normalize`]: the record plus the raw CPU counter, which is an
/// input to [`CpuTracker`] rather than a published metric.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct NormalizedStats {
    pub record: MetricsRecord,
    pub cpu_user_msec: Option<u64>,
}

/// Integer reading of a loosely typed JSON value.
///
/// Booleans map to 0/1, floats and numeric strings are truncated toward zero.
pub fn parse_int(value: &Value) -> Option<i64> {
    match value {
        Value::Bool(flag) => Some(i64::from(*flag)),
        Value::Number(number) => number
            .as_i64()
            .or_else(|| number.as_u64().map(|n| n.min(i64::MAX as u64) as i64))
            .or_else(|| number.as_f64().filter(|f| f.is_finite()).map(|f| f.trunc() as i64)),
        Value::String(text) => {
            let text = text.trim();
            text.parse::<i64>().ok().or_else(|| {
                text.parse::<f64>()
                    .ok()
                    .filter(|f| f.is_finite())
                    .map(|f| f.trunc() as i64)
            })
        }
        _ => None,
    }
}

/// Like [`parse_int`] but never fails: anything unusable is `0`.
pub fn coerce_int(value: &Value) -> i64 {
    parse_int(value).unwrap_or(0)
}

/// Non-negative counter reading; negative inputs clamp to zero.
pub fn coerce_counter(value: &Value) -> u64 {
    coerce_int(value).max(0) as u64
}

fn parse_counter(value: &Value) -> Option<u64> {
    parse_int(value).map(|n| n.max(0) as u64)
}

/// Maps a statistics payload onto the canonical record.
///
/// Recognised names accept both dashed and underscored spellings; unknown
/// names are ignored and an entry with an unusable value is skipped without
/// affecting the others. The cache hit ratio is recomputed from this payload.
pub fn normalize(payload: &StatsPayload) -> NormalizedStats {
    let mut out = NormalizedStats::default();
    let record = &mut out.record;

    for entry in payload.entries() {
        let Some(name) = entry.get("name").and_then(Value::as_str) else {
            continue;
        };
        let Some(value) = entry.get("value") else {
            continue;
        };

        let slot = match name {
            "queries" => &mut record.queries,
            "responses" => &mut record.responses,
            "drops" => &mut record.drops,
            "rule-drop" | "rule_drop" => &mut record.rule_drop,
            "downstream-send-errors" | "downstream_errors" => &mut record.downstream_errors,
            "cache-hits" | "cache_hits" => &mut record.cache_hits,
            "cache-misses" | "cache_misses" => &mut record.cache_misses,
            "uptime" => &mut record.uptime,
            "cpu-user-msec" | "cpu_user_msec" => {
                if let Some(msec) = parse_counter(value) {
                    out.cpu_user_msec = Some(msec);
                }
                continue;
            }
            "security-status" | "security_status" => {
                if let Some(status) = parse_int(value).and_then(SecurityStatus::from_code) {
                    record.security_status = status;
                }
                continue;
            }
            _ => continue,
        };

        match parse_counter(value) {
            Some(counter) => *slot = counter,
            None => log::debug!("skipping malformed statistic {name}: {value}"),
        }
    }

    record.refresh_cache_hit_ratio();
    out
}

/// Derives CPU utilisation from successive `cpu-user-msec` readings.
#[derive(Debug, Clone, Default)]
pub struct CpuTracker {
    last: Option<(u64, Instant)>,
}

impl CpuTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds one reading taken at monotonic time `at`.
    ///
    /// Returns the utilisation since the previous reading, clamped to
    /// `[0, 100]` with two decimals. The first reading, a non-positive
    /// elapsed time, or a counter that went backwards yield `None`.
    pub fn observe(&mut self, cpu_msec: u64, at: Instant) -> Option<f64> {
        let previous = self.last.replace((cpu_msec, at));
        let (last_msec, last_at) = previous?;

        let elapsed = at.checked_duration_since(last_at)?.as_secs_f64();
        if elapsed <= 0.0 || cpu_msec < last_msec {
            return None;
        }

        let cpu_secs = (cpu_msec - last_msec) as f64 / 1000.0;
        let percent = cpu_secs / elapsed * 100.0;
        Some(round2(percent.clamp(0.0, 100.0)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;

    #[test]
    fn coerce_int_is_tolerant() {
        assert_eq!(coerce_int(&json!(42)), 42);
        assert_eq!(coerce_int(&json!(coerce_int(&json!(42)))), 42);
        assert_eq!(coerce_int(&json!(-5)), -5);
        assert_eq!(coerce_int(&json!(3.99)), 3);
        assert_eq!(coerce_int(&json!(-2.5)), -2);
        assert_eq!(coerce_int(&json!("123")), 123);
        assert_eq!(coerce_int(&json!("45.67")), 45);
        assert_eq!(coerce_int(&json!(true)), 1);
        assert_eq!(coerce_int(&json!(false)), 0);
        assert_eq!(coerce_int(&json!(null)), 0);
        assert_eq!(coerce_int(&json!("not a number")), 0);
        assert_eq!(coerce_int(&json!("")), 0);
        assert_eq!(coerce_int(&json!([])), 0);
        assert_eq!(coerce_int(&json!({})), 0);
    }

    #[test]
    fn normalizes_list_and_wrapped_payloads() {
        let entries = json!([
            {"name": "queries", "value": 1000},
            {"name": "responses", "value": "990"},
            {"name": "rule-drop", "value": 3},
            {"name": "downstream_errors", "value": 2},
            {"name": "cache-hits", "value": 80},
            {"name": "cache-misses", "value": 20},
            {"name": "uptime", "value": 3600},
            {"name": "cpu-user-msec", "value": 1500},
            {"name": "security-status", "value": 2},
            {"name": "latency-avg100", "value": 12.5}
        ]);

        let list = normalize(&StatsPayload::decode(entries.clone()).unwrap());
        let wrapped = normalize(&StatsPayload::decode(json!({"statistics": entries})).unwrap());
        assert_eq!(list, wrapped);

        let record = &list.record;
        assert_eq!(record.queries, 1000);
        assert_eq!(record.responses, 990);
        assert_eq!(record.rule_drop, 3);
        assert_eq!(record.downstream_errors, 2);
        assert_eq!(record.cache_hit_ratio, 80.0);
        assert_eq!(record.uptime, 3600);
        assert_eq!(record.security_status, SecurityStatus::Warning);
        assert_eq!(list.cpu_user_msec, Some(1500));
    }

    #[test]
    fn malformed_entries_do_not_abort_normalisation() {
        let payload = StatsPayload::decode(json!([
            {"name": "queries", "value": "garbage"},
            "not an object",
            {"value": 5},
            {"name": "drops", "value": 7},
            {"name": "security-status", "value": 9},
            {"name": "cache-hits", "value": 0},
            {"name": "cache-misses", "value": 0}
        ]))
        .unwrap();

        let record = normalize(&payload).record;
        assert_eq!(record.queries, 0);
        assert_eq!(record.drops, 7);
        assert_eq!(record.security_status, SecurityStatus::Unknown);
        assert_eq!(record.cache_hit_ratio, 0.0);
    }

    #[test]
    fn decode_rejects_scalars_and_tolerates_missing_statistics() {
        assert!(StatsPayload::decode(json!("oops")).is_none());
        let payload = StatsPayload::decode(json!({"version": "1.9"})).unwrap();
        assert!(payload.entries().is_empty());
    }

    #[test]
    fn cpu_percentage_needs_two_readings() {
        let mut tracker = CpuTracker::new();
        let t0 = Instant::now();
        assert_eq!(tracker.observe(10_000, t0), None);
        assert_eq!(tracker.observe(15_000, t0 + Duration::from_secs(10)), Some(50.0));
        // saturates at 100%
        assert_eq!(tracker.observe(45_000, t0 + Duration::from_secs(20)), Some(100.0));
        // zero elapsed time
        assert_eq!(tracker.observe(46_000, t0 + Duration::from_secs(20)), None);
        // counter reset after a restart
        assert_eq!(tracker.observe(10, t0 + Duration::from_secs(30)), None);
    }
}
