//! Host validation.

use std::net::Ipv6Addr;

use once_cell::sync::Lazy;
use regex::Regex;

use super::ConfigError;

static IPV4_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?:(?:25[0-5]|2[0-4]\d|1\d\d|[1-9]?\d|0\d{1,2})\.){3}(?:25[0-5]|2[0-4]\d|1\d\d|[1-9]?\d|0\d{1,2})$")
        .expect("invalid ipv4 regex")
});

static NUMERIC_PATTERN: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[\d.]+$").expect("invalid numeric regex"));

static LABEL_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[A-Za-z0-9](?:[A-Za-z0-9-]{0,61}[A-Za-z0-9])?$").expect("invalid hostname label regex")
});

const MAX_HOSTNAME_LEN: usize = 253;

fn is_hostname(host: &str) -> bool {
    host.len() <= MAX_HOSTNAME_LEN && host.split('.').all(|label| LABEL_PATTERN.is_match(label))
}

fn is_ipv6(host: &str) -> bool {
    let unwrapped = host.trim_start_matches('[').trim_end_matches(']');
    unwrapped.contains(':') && unwrapped.parse::<Ipv6Addr>().is_ok()
}

/// Validates a hostname, IPv4 or IPv6 address (optionally bracketed) and
/// returns it trimmed.
///
/// Dotted numeric strings that are not a valid IPv4 address are rejected
/// as such rather than being accepted as hostnames.
pub fn validate_host(host: &str) -> Result<String, ConfigError> {
    if host.is_empty() {
        return Err(ConfigError::EmptyHost);
    }
    let host = host.trim();

    if IPV4_PATTERN.is_match(host) || is_ipv6(host) {
        return Ok(host.to_string());
    }
    if NUMERIC_PATTERN.is_match(host) {
        return Err(ConfigError::InvalidIpv4(host.to_string()));
    }
    if !host.is_empty() && is_hostname(host) {
        return Ok(host.to_string());
    }
    Err(ConfigError::InvalidHost(host.to_string()))
}
