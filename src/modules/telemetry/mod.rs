//! Poll telemetry.
//!
//! Tracks how each source's statistics endpoint behaves: poll counts,
//! failures, and latency percentiles over a bounded window.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

const DEFAULT_WINDOW: usize = 128;
const MIN_WINDOW: usize = 16;

/// Per-source poll statistics snapshot.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SourcePollStats {
    pub source: String,
    pub polls: u64,
    pub successes: u64,
    pub failures: u64,
    pub consecutive_failures: u32,
    pub last_status: Option<u16>,
    pub last_success: Option<DateTime<Utc>>,
    pub average_latency_ms: Option<f64>,
    pub p95_latency_ms: Option<f64>,
}

#[derive(Debug)]
struct SourceAccumulator {
    polls: u64,
    successes: u64,
    failures: u64,
    consecutive_failures: u32,
    last_status: Option<u16>,
    last_success: Option<DateTime<Utc>>,
    latencies: VecDeque<Duration>,
    max_window: usize,
}

impl SourceAccumulator {
    fn new(max_window: usize) -> Self {
        Self {
            polls: 0,
            successes: 0,
            failures: 0,
            consecutive_failures: 0,
            last_status: None,
            last_success: None,
            latencies: VecDeque::with_capacity(max_window),
            max_window,
        }
    }

    fn record(&mut self, success: bool, status: Option<u16>, latency: Duration) {
        self.polls += 1;
        self.last_status = status;

        if success {
            self.successes += 1;
            self.consecutive_failures = 0;
            self.last_success = Some(Utc::now());
        } else {
            self.failures += 1;
            self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        }

        if self.latencies.len() == self.max_window {
            self.latencies.pop_front();
        }
        self.latencies.push_back(latency);
    }

    fn latency_stats(&self) -> (Option<Duration>, Option<Duration>) {
        if self.latencies.is_empty() {
            return (None, None);
        }
        let mut samples: Vec<_> = self.latencies.iter().cloned().collect();
        samples.sort_unstable();
        let avg = samples.iter().map(|d| d.as_secs_f64()).sum::<f64>() / samples.len() as f64;
        let p95_index = ((samples.len() as f64 * 0.95).ceil() as usize).saturating_sub(1);
        (Some(Duration::from_secs_f64(avg)), Some(samples[p95_index]))
    }

    fn snapshot(&self, source: &str) -> SourcePollStats {
        let (avg, p95) = self.latency_stats();
        let millis = |d: Duration| d.as_secs_f64() * 1000.0;
        SourcePollStats {
            source: source.to_string(),
            polls: self.polls,
            successes: self.successes,
            failures: self.failures,
            consecutive_failures: self.consecutive_failures,
            last_status: self.last_status,
            last_success: self.last_success,
            average_latency_ms: avg.map(millis),
            p95_latency_ms: p95.map(millis),
        }
    }
}

#[derive(Debug)]
struct TelemetryState {
    max_window: usize,
    sources: HashMap<String, SourceAccumulator>,
}

impl TelemetryState {
    fn accumulator_mut(&mut self, source: &str) -> &mut SourceAccumulator {
        let max_window = self.max_window;
        self.sources
            .entry(source.to_string())
            .or_insert_with(|| SourceAccumulator::new(max_window))
    }
}

/// Thread-safe poll telemetry shared between the event handler and readers.
#[derive(Clone, Debug)]
pub struct PollTelemetry {
    inner: Arc<Mutex<TelemetryState>>,
}

impl PollTelemetry {
    pub fn new() -> Self {
        Self::with_window(DEFAULT_WINDOW)
    }

    pub fn with_window(window: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(TelemetryState {
                max_window: window.max(MIN_WINDOW),
                sources: HashMap::new(),
            })),
        }
    }

    pub fn record_poll(&self, source: &str, status: u16, latency: Duration) {
        if let Ok(mut guard) = self.inner.lock() {
            guard.accumulator_mut(source).record(true, Some(status), latency);
        }
    }

    pub fn record_failure(&self, source: &str, status: Option<u16>, latency: Duration) {
        if let Ok(mut guard) = self.inner.lock() {
            guard.accumulator_mut(source).record(false, status, latency);
        }
    }

    pub fn source(&self, source: &str) -> Option<SourcePollStats> {
        let guard = self.inner.lock().ok()?;
        guard.sources.get(source).map(|acc| acc.snapshot(source))
    }

    /// All tracked sources, sorted by name.
    pub fn snapshot(&self) -> Vec<SourcePollStats> {
        let Ok(guard) = self.inner.lock() else {
            return Vec::new();
        };
        let mut stats: Vec<_> = guard
            .sources
            .iter()
            .map(|(source, acc)| acc.snapshot(source))
            .collect();
        stats.sort_by(|a, b| a.source.cmp(&b.source));
        stats
    }
}

impl Default for PollTelemetry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_success_and_failure() {
        let telemetry = PollTelemetry::new();
        telemetry.record_poll("edge", 200, Duration::from_millis(100));
        telemetry.record_failure("edge", Some(503), Duration::from_millis(800));
        telemetry.record_failure("edge", None, Duration::from_secs(10));

        let stats = telemetry.source("edge").unwrap();
        assert_eq!(stats.polls, 3);
        assert_eq!(stats.successes, 1);
        assert_eq!(stats.failures, 2);
        assert_eq!(stats.consecutive_failures, 2);
        assert_eq!(stats.last_status, None);
        assert!(stats.last_success.is_some());
        assert_eq!(stats.p95_latency_ms, Some(10_000.0));

        telemetry.record_poll("edge", 200, Duration::from_millis(100));
        assert_eq!(telemetry.source("edge").unwrap().consecutive_failures, 0);
        assert!(telemetry.source("core").is_none());
    }

    #[test]
    fn latency_window_is_bounded() {
        let telemetry = PollTelemetry::with_window(1);
        for ms in 0..40u64 {
            telemetry.record_poll("edge", 200, Duration::from_millis(ms));
        }
        // window clamps to the minimum of 16: samples 24..=39
        let stats = telemetry.source("edge").unwrap();
        assert!((stats.p95_latency_ms.unwrap() - 39.0).abs() < 1e-6);
        assert!((stats.average_latency_ms.unwrap() - 31.5).abs() < 1e-6);
    }
}
