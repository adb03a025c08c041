//! Filtering-rule and dynamic-block normalisation.
//!
//! Both upstream endpoints come in several historical shapes; each is decoded
//! once into a payload enum, then mapped to slug-keyed rule records.

use std::collections::BTreeMap;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use serde_json::{Map, Value};

use crate::modules::metrics::{DynamicRule, FilteringRule};
use crate::modules::stats::{coerce_counter, parse_int};

static SLUG_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[^a-z0-9]+").expect("invalid slug regex"));

pub const UNNAMED_RULE: &str = "Unnamed Rule";

const MATCH_KEYS: [&str; 6] = ["matches", "numMatches", "hits", "num_hits", "hitCount", "count"];
const BLOCK_KEYS: [&str; 4] = ["blocks", "count", "hits", "nmBlocks"];
const TTL_KEYS: [&str; 3] = ["seconds", "ttl", "remaining"];

fn slug_base(value: &str) -> String {
    let lowered = value.to_lowercase();
    SLUG_PATTERN
        .replace_all(&lowered, "-")
        .trim_matches('-')
        .to_string()
}

/// Lowercase, hyphen-separated identifier; `fallback` when nothing survives.
pub fn slugify<'a>(value: impl Into<Option<&'a str>>, fallback: &str) -> String {
    let base = slug_base(value.into().unwrap_or_default());
    if base.is_empty() {
        fallback.to_string()
    } else {
        base
    }
}

/// Slug for rule keys. Inputs with no alphanumeric content fall back to a
/// stable `rule-<hex>` placeholder derived from the raw input.
pub fn slugify_rule<'a>(value: impl Into<Option<&'a str>>) -> String {
    let value = value.into();
    let base = slug_base(value.unwrap_or_default());
    if !base.is_empty() {
        return base;
    }

    let mut hasher = DefaultHasher::new();
    value.hash(&mut hasher);
    format!("rule-{:x}", hasher.finish() & 0xFFFF)
}

/// Support state of an optional upstream endpoint on one host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EndpointSupport {
    #[default]
    Unknown,
    Supported,
    /// The host answered 404; the endpoint is not requested again.
    Unsupported,
}

impl EndpointSupport {
    pub fn should_request(self) -> bool {
        self != Self::Unsupported
    }
}

/// Shapes returned by the filtering-rules endpoint.
#[derive(Debug, Clone, PartialEq)]
pub enum FilteringRulesPayload {
    /// The body itself is the rule list.
    List(Vec<Value>),
    /// `{"rules" | "filteringRules" | "filtering_rules": [...]}`.
    Keyed(Vec<Value>),
    /// One level deeper: `{"filteringRules": {"rules" | "filteringRules" | "data": [...]}}`.
    Nested(Vec<Value>),
    /// No recognisable rule list.
    Empty,
}

impl FilteringRulesPayload {
    pub fn decode(value: Value) -> Self {
        let mut map = match value {
            Value::Array(items) => return Self::List(items),
            Value::Object(map) => map,
            _ => return Self::Empty,
        };

        for key in ["rules", "filteringRules", "filtering_rules"] {
            match map.remove(key) {
                Some(Value::Array(items)) => return Self::Keyed(items),
                Some(Value::Object(mut inner)) => {
                    for nested in ["rules", "filteringRules", "data"] {
                        if let Some(Value::Array(items)) = inner.remove(nested)
                            && !items.is_empty()
                        {
                            return Self::Nested(items);
                        }
                    }
                }
                _ => {}
            }
        }
        Self::Empty
    }

    pub fn items(&self) -> &[Value] {
        match self {
            Self::List(items) | Self::Keyed(items) | Self::Nested(items) => items,
            Self::Empty => &[],
        }
    }
}

/// Dynamic block list keyed by network (`/jsonstat?command=dynblocklist`).
#[derive(Debug, Clone, PartialEq, Default)]
pub struct DynamicRulesPayload(Map<String, Value>);

impl DynamicRulesPayload {
    pub fn decode(value: Value) -> Self {
        match value {
            Value::Object(map) => Self(map),
            _ => Self::default(),
        }
    }

    pub fn entries(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }
}

/// Text form of a scalar JSON value; `None` for null, empty, or compound values.
pub(crate) fn value_text(value: Option<&Value>) -> Option<String> {
    let text = match value? {
        Value::String(text) => text.trim().to_string(),
        Value::Number(number) => number.to_string(),
        Value::Bool(flag) => flag.to_string(),
        _ => return None,
    };
    (!text.is_empty()).then_some(text)
}

fn value_flag(value: Option<&Value>) -> Option<bool> {
    match value? {
        Value::Bool(flag) => Some(*flag),
        other => parse_int(other).map(|n| n != 0),
    }
}

fn first_present<'a>(item: &'a Map<String, Value>, keys: &[&str]) -> Option<&'a Value> {
    keys.iter().find_map(|key| item.get(*key))
}

/// Maps one upstream rule object; returns its slug alongside.
pub fn normalize_filtering_rule(item: &Map<String, Value>) -> (String, FilteringRule) {
    let name = ["name", "rule", "uuid", "id"]
        .iter()
        .find_map(|key| value_text(item.get(*key)))
        .unwrap_or_else(|| UNNAMED_RULE.to_string());

    let matches = first_present(item, &MATCH_KEYS).map(coerce_counter).unwrap_or(0);

    let uuid = value_text(item.get("uuid"));
    let id = item.get("id").filter(|value| !value.is_null()).cloned();
    let slug_source = uuid
        .clone()
        .or_else(|| value_text(item.get("id")))
        .unwrap_or_else(|| name.clone());
    let slug = slugify_rule(slug_source.as_str());

    let rule = FilteringRule {
        name,
        matches,
        sources: None,
        id,
        uuid,
        action: value_text(item.get("action")),
        rule: value_text(item.get("rule")),
        rule_type: value_text(item.get("type")),
        enabled: value_flag(item.get("enabled")),
        bypass: value_flag(item.get("bypass")),
    };
    (slug, rule)
}

/// Slug-keyed filtering rules. Non-object list items are ignored; on slug
/// collisions the later rule wins.
pub fn normalize_filtering_rules(payload: &FilteringRulesPayload) -> BTreeMap<String, FilteringRule> {
    payload
        .items()
        .iter()
        .filter_map(Value::as_object)
        .map(normalize_filtering_rule)
        .collect()
}

/// Maps one dynamic block entry.
pub fn normalize_dynamic_rule(network: &str, item: &Map<String, Value>) -> DynamicRule {
    DynamicRule {
        network: network.to_string(),
        blocks: first_present(item, &BLOCK_KEYS).map(coerce_counter).unwrap_or(0),
        seconds: first_present(item, &TTL_KEYS).map(coerce_counter).unwrap_or(0),
        reason: value_text(item.get("reason")),
        action: value_text(item.get("action")),
        ebpf: value_flag(item.get("ebpf")).unwrap_or(false),
        warning: value_flag(item.get("warning")).unwrap_or(false),
        sources: None,
    }
}

/// Slug-keyed dynamic blocks; entries whose value is not an object are skipped.
pub fn normalize_dynamic_rules(payload: &DynamicRulesPayload) -> BTreeMap<String, DynamicRule> {
    payload
        .entries()
        .filter_map(|(network, value)| {
            let item = value.as_object()?;
            Some((slugify_rule(network.as_str()), normalize_dynamic_rule(network, item)))
        })
        .collect()
}
