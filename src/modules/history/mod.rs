//! Rolling sample history for rate computation.
//!
//! Keeps `(wallclock, counter)` samples for the last 24 hours, restarts when
//! the counter goes backwards, and persists itself through a
//! [`HistoryStore`] at a throttled pace.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::{Value, json};

use crate::modules::rates::{self, DAY_SECS, RateMode, RateWindows};
use crate::modules::storage::HistoryStore;

/// Samples older than this are evicted.
pub const RETENTION_SECS: f64 = DAY_SECS as f64;
/// Minimum spacing between two persistence writes.
pub const PERSIST_INTERVAL: Duration = Duration::from_secs(30);
/// Schema version written alongside the samples.
pub const STORAGE_VERSION: u64 = 1;
const HISTORY_KEY: &str = "history";

/// One observation of a monotonic counter.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sample {
    /// Seconds since the Unix epoch.
    pub timestamp: f64,
    pub counter: u64,
}

impl Sample {
    pub fn new(timestamp: f64, counter: u64) -> Self {
        Self { timestamp, counter }
    }
}

/// Time-ordered, 24h-bounded buffer of samples.
#[derive(Debug, Clone, Default)]
pub struct SampleHistory {
    samples: VecDeque<Sample>,
}

impl SampleHistory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a sample. A counter lower than the last recorded one means the
    /// target restarted, so everything before it is dropped. Returns `true`
    /// when such a reset happened.
    pub fn record(&mut self, timestamp: f64, counter: u64) -> bool {
        let reset = self
            .samples
            .back()
            .is_some_and(|last| counter < last.counter);
        if reset {
            self.samples.clear();
        }

        self.samples.push_back(Sample::new(timestamp, counter));
        self.evict(timestamp);
        reset
    }

    fn evict(&mut self, now: f64) {
        let cutoff = now - RETENTION_SECS;
        while let Some(front) = self.samples.front() {
            if front.timestamp < cutoff {
                self.samples.pop_front();
            } else {
                break;
            }
        }
    }

    pub fn samples(&self) -> &VecDeque<Sample> {
        &self.samples
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Rates at `now` for the given current counter value.
    pub fn rates(&mut self, now: f64, current_total: u64, mode: RateMode) -> RateWindows {
        rates::compute_rates(self.samples.make_contiguous(), now, current_total, mode)
    }

    /// Parses a persisted payload, skipping malformed entries and anything
    /// older than the retention window. Unusable payloads yield `None`.
    pub fn from_payload(payload: &Value, now: f64) -> Option<Self> {
        let entries = payload.get(HISTORY_KEY)?.as_array()?;
        let cutoff = now - RETENTION_SECS;

        let mut samples: Vec<Sample> = entries
            .iter()
            .filter_map(|entry| {
                let pair = entry.as_array()?;
                let [ts, counter] = pair.as_slice() else {
                    return None;
                };
                Some(Sample::new(ts.as_f64()?, counter.as_u64()?))
            })
            .filter(|sample| sample.timestamp >= cutoff)
            .collect();

        samples.sort_by(|a, b| a.timestamp.total_cmp(&b.timestamp));
        Some(Self {
            samples: samples.into(),
        })
    }

    pub fn to_payload(&self) -> Value {
        let entries: Vec<Value> = self
            .samples
            .iter()
            .map(|sample| json!([sample.timestamp, sample.counter]))
            .collect();
        json!({
            "version": STORAGE_VERSION,
            "history": entries,
        })
    }
}

/// [`SampleHistory`] bound to a persistence key.
pub struct PersistentHistory {
    owner: String,
    key: String,
    store: Arc<dyn HistoryStore>,
    history: SampleHistory,
    loaded: bool,
    dirty: bool,
    last_persist: Option<Instant>,
}

impl PersistentHistory {
    pub fn new(owner: impl Into<String>, key: impl Into<String>, store: Arc<dyn HistoryStore>) -> Self {
        Self {
            owner: owner.into(),
            key: key.into(),
            store,
            history: SampleHistory::new(),
            loaded: false,
            dirty: false,
            last_persist: None,
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn history(&self) -> &SampleHistory {
        &self.history
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Loads persisted samples the first time it is called; later calls are
    /// no-ops. Load failures leave the history empty.
    pub async fn ensure_loaded(&mut self, now: f64) {
        if self.loaded {
            return;
        }
        self.loaded = true;

        let stored = match self.store.load(&self.key).await {
            Ok(stored) => stored,
            Err(err) => {
                log::debug!("[{}] failed to load history: {}", self.owner, err);
                return;
            }
        };

        let Some(payload) = stored else {
            return;
        };

        if let Some(version) = payload.get("version").and_then(Value::as_u64)
            && version > STORAGE_VERSION
        {
            log::debug!(
                "[{}] history written by newer schema v{}, reading best-effort",
                self.owner,
                version
            );
        }

        if let Some(history) = SampleHistory::from_payload(&payload, now)
            && !history.is_empty()
        {
            self.history = history;
        }
        self.dirty = false;
    }

    /// Records a sample and returns the rates for it.
    pub fn record(&mut self, now: f64, counter: u64, mode: RateMode) -> (RateWindows, bool) {
        let reset = self.history.record(now, counter);
        self.dirty = true;
        (self.history.rates(now, counter, mode), reset)
    }

    /// Writes the history if it changed and the throttle window has passed.
    /// Failures are logged and the history stays dirty for the next attempt.
    pub async fn save_if_due(&mut self, now: Instant) {
        if !self.loaded || !self.dirty {
            return;
        }
        if let Some(last) = self.last_persist
            && now.saturating_duration_since(last) < PERSIST_INTERVAL
        {
            return;
        }

        self.write(now).await;
    }

    /// Writes pending samples regardless of the throttle, e.g. on shutdown.
    pub async fn flush(&mut self, now: Instant) {
        if self.loaded && self.dirty {
            self.write(now).await;
        }
    }

    async fn write(&mut self, now: Instant) {
        let payload = self.history.to_payload();
        match self.store.save(&self.key, &payload).await {
            Ok(()) => {
                self.dirty = false;
                self.last_persist = Some(now);
            }
            Err(err) => {
                log::debug!("[{}] failed to save history: {}", self.owner, err);
            }
        }
    }
}
