//! Coordinator for a single dnsdist instance.
//!
//! Each [`SourceCoordinator::refresh`] fetches the statistics, derives CPU
//! and request rates, refreshes the optional rule endpoints and settles on a
//! complete [`MetricsRecord`]. Upstream failures never escape a cycle: the
//! last known-good record is served instead.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use serde_json::Value;

use super::clock::{Clock, SystemClock};
use super::registry::{CoordinatorKind, CoordinatorRegistry};
use crate::api::client::{
    ApiClientError, DYNAMIC_RULES_PATH, DnsdistApi, FILTERING_RULES_PATH, STATISTICS_PATH,
};
use crate::config::{DEFAULT_FETCH_TIMEOUT_SECS, SourceConfig};
use crate::modules::events::{
    Endpoint, EndpointEvent, EventDispatcher, FallbackEvent, FetchEvent, HistoryResetEvent,
    MonitorEvent, RefreshEvent,
};
use crate::modules::history::PersistentHistory;
use crate::modules::metrics::MetricsRecord;
use crate::modules::rates::RateMode;
use crate::modules::rules::{
    DynamicRulesPayload, EndpointSupport, FilteringRulesPayload, normalize_dynamic_rules,
    normalize_filtering_rules, slugify,
};
use crate::modules::stats::{CpuTracker, StatsPayload, normalize};
use crate::modules::storage::HistoryStore;

/// Persistence key of a source's sample history.
pub fn source_history_key(name: &str) -> String {
    format!("history:host:{}", slugify(name, "unknown"))
}

#[derive(Debug)]
enum FetchFailure {
    NotFound,
    Failed(String),
}

impl FetchFailure {
    fn reason(&self) -> &str {
        match self {
            Self::NotFound => "HTTP 404",
            Self::Failed(reason) => reason,
        }
    }
}

pub struct SourceCoordinator {
    config: SourceConfig,
    api: Arc<dyn DnsdistApi>,
    clock: Arc<dyn Clock>,
    events: Arc<EventDispatcher>,
    registry: Option<CoordinatorRegistry>,
    fetch_timeout: Duration,
    history: PersistentHistory,
    cpu: CpuTracker,
    filtering_support: EndpointSupport,
    dynamic_support: EndpointSupport,
    data: Option<MetricsRecord>,
    last_update_success: bool,
    last_fetch_ok: bool,
}

impl SourceCoordinator {
    pub fn new(config: SourceConfig, api: Arc<dyn DnsdistApi>, store: Arc<dyn HistoryStore>) -> Self {
        let history = PersistentHistory::new(config.name.clone(), source_history_key(&config.name), store);
        Self {
            config,
            api,
            clock: Arc::new(SystemClock),
            events: Arc::new(EventDispatcher::with_logging()),
            registry: None,
            fetch_timeout: Duration::from_secs(DEFAULT_FETCH_TIMEOUT_SECS),
            history,
            cpu: CpuTracker::new(),
            filtering_support: EndpointSupport::Unknown,
            dynamic_support: EndpointSupport::Unknown,
            data: None,
            last_update_success: false,
            last_fetch_ok: false,
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_events(mut self, events: Arc<EventDispatcher>) -> Self {
        self.events = events;
        self
    }

    /// Registers this source so groups can read its results.
    pub fn with_registry(mut self, registry: CoordinatorRegistry) -> Self {
        registry.register(&self.config.name, CoordinatorKind::Source);
        self.registry = Some(registry);
        self
    }

    pub fn with_fetch_timeout(mut self, timeout: Duration) -> Self {
        self.fetch_timeout = timeout;
        self
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn config(&self) -> &SourceConfig {
        &self.config
    }

    pub fn api(&self) -> Arc<dyn DnsdistApi> {
        self.api.clone()
    }

    pub fn fetch_timeout(&self) -> Duration {
        self.fetch_timeout
    }

    /// Last record produced, `None` before the first cycle.
    pub fn data(&self) -> Option<&MetricsRecord> {
        self.data.as_ref()
    }

    /// Last record produced, or an all-zero record before the first cycle.
    pub fn snapshot(&self) -> MetricsRecord {
        self.data.clone().unwrap_or_else(MetricsRecord::zeroed)
    }

    /// The published record holds data fetched from the source, in this
    /// cycle or an earlier one. Stays `false` until the first good fetch.
    pub fn last_update_success(&self) -> bool {
        self.last_update_success
    }

    /// Whether the most recent statistics fetch itself succeeded.
    pub fn last_fetch_ok(&self) -> bool {
        self.last_fetch_ok
    }

    pub fn filtering_support(&self) -> EndpointSupport {
        self.filtering_support
    }

    pub fn dynamic_support(&self) -> EndpointSupport {
        self.dynamic_support
    }

    pub fn history(&self) -> &PersistentHistory {
        &self.history
    }

    /// Persists unsaved history immediately.
    pub async fn flush_history(&mut self) {
        self.history.flush(self.clock.monotonic()).await;
    }

    /// Runs one refresh cycle and returns the settled record.
    pub async fn refresh(&mut self) -> MetricsRecord {
        let started = Instant::now();
        let now = self.clock.wallclock();
        self.history.ensure_loaded(now).await;

        let record = match self.fetch_json(Endpoint::Statistics, STATISTICS_PATH).await {
            Ok(body) => {
                self.last_fetch_ok = true;
                self.compose(body, now).await
            }
            Err(failure) => {
                self.last_fetch_ok = false;
                self.events.dispatch(MonitorEvent::Fallback(FallbackEvent {
                    coordinator: self.config.name.clone(),
                    reason: failure.reason().to_string(),
                    timestamp: Utc::now(),
                }));
                self.snapshot()
            }
        };

        self.history.save_if_due(self.clock.monotonic()).await;

        self.last_update_success |= self.last_fetch_ok;
        self.data = Some(record.clone());
        if let Some(registry) = &self.registry {
            registry.publish(&self.config.name, self.last_update_success, &record);
        }

        self.events.dispatch(MonitorEvent::Refresh(RefreshEvent {
            coordinator: self.config.name.clone(),
            fetched: self.last_fetch_ok,
            duration: started.elapsed(),
            timestamp: Utc::now(),
        }));
        record
    }

    async fn compose(&mut self, body: Value, now: f64) -> MetricsRecord {
        let previous = self.data.as_ref();
        let previous_cpu = previous.map(|data| data.cpu).unwrap_or(0.0);

        let Some(payload) = StatsPayload::decode(body) else {
            log::warn!("[{}] unexpected statistics payload, reporting zeroes", self.config.name);
            let mut record = MetricsRecord::zeroed();
            record.cpu = previous_cpu;
            if let Some(previous) = previous {
                record.filtering_rules = previous.filtering_rules.clone();
                record.dynamic_rules = previous.dynamic_rules.clone();
            }
            return record;
        };

        let normalized = normalize(&payload);
        let mut record = normalized.record;

        record.cpu = normalized
            .cpu_user_msec
            .and_then(|msec| self.cpu.observe(msec, self.clock.monotonic()))
            .unwrap_or(previous_cpu);

        if let Some(previous) = previous {
            record.filtering_rules = previous.filtering_rules.clone();
            record.dynamic_rules = previous.dynamic_rules.clone();
        }

        let (rates, reset) = self.history.record(now, record.queries, RateMode::Observed);
        if reset {
            self.events.dispatch(MonitorEvent::HistoryReset(HistoryResetEvent {
                coordinator: self.config.name.clone(),
                counter: record.queries,
                timestamp: Utc::now(),
            }));
        }
        record.req_per_hour = rates.per_hour;
        record.req_per_day = rates.per_day;

        self.refresh_filtering_rules(&mut record).await;
        self.refresh_dynamic_rules(&mut record).await;
        record
    }

    async fn refresh_filtering_rules(&mut self, record: &mut MetricsRecord) {
        if !self.config.include_filtering_rules {
            record.filtering_rules.clear();
            return;
        }
        if !self.filtering_support.should_request() {
            return;
        }

        match self.fetch_json(Endpoint::FilteringRules, FILTERING_RULES_PATH).await {
            Ok(body) => {
                self.set_support(Endpoint::FilteringRules, EndpointSupport::Supported);
                record.filtering_rules = normalize_filtering_rules(&FilteringRulesPayload::decode(body));
            }
            Err(FetchFailure::NotFound) => {
                self.set_support(Endpoint::FilteringRules, EndpointSupport::Unsupported);
            }
            Err(FetchFailure::Failed(_)) => {}
        }
    }

    async fn refresh_dynamic_rules(&mut self, record: &mut MetricsRecord) {
        if !self.config.include_dynamic_rules {
            record.dynamic_rules.clear();
            return;
        }
        if !self.dynamic_support.should_request() {
            return;
        }

        match self.fetch_json(Endpoint::DynamicRules, DYNAMIC_RULES_PATH).await {
            Ok(body) => {
                self.set_support(Endpoint::DynamicRules, EndpointSupport::Supported);
                record.dynamic_rules = normalize_dynamic_rules(&DynamicRulesPayload::decode(body));
            }
            Err(FetchFailure::NotFound) => {
                self.set_support(Endpoint::DynamicRules, EndpointSupport::Unsupported);
            }
            Err(FetchFailure::Failed(_)) => {}
        }
    }

    fn set_support(&mut self, endpoint: Endpoint, support: EndpointSupport) {
        let slot = match endpoint {
            Endpoint::FilteringRules => &mut self.filtering_support,
            Endpoint::DynamicRules => &mut self.dynamic_support,
            Endpoint::Statistics => return,
        };
        if *slot == support {
            return;
        }
        *slot = support;
        self.events.dispatch(MonitorEvent::Endpoint(EndpointEvent {
            source: self.config.name.clone(),
            endpoint,
            support,
            timestamp: Utc::now(),
        }));
    }

    /// GET `path` within the fetch timeout. Anything but a 200 with a JSON
    /// body is a failure; 404 is reported separately.
    async fn fetch_json(&self, endpoint: Endpoint, path: &str) -> Result<Value, FetchFailure> {
        let started = Instant::now();
        let outcome = match tokio::time::timeout(self.fetch_timeout, self.api.get(path)).await {
            Ok(result) => result,
            Err(_) => Err(ApiClientError::Timeout(self.fetch_timeout)),
        };

        let (status, result) = match outcome {
            Ok(response) if response.status == 200 => {
                let decoded = response.json().map_err(|err| FetchFailure::Failed(err.to_string()));
                (Some(response.status), decoded)
            }
            Ok(response) if response.is_not_found() => (Some(404), Err(FetchFailure::NotFound)),
            Ok(response) => (
                Some(response.status),
                Err(FetchFailure::Failed(ApiClientError::Status(response.status).to_string())),
            ),
            Err(err) => (None, Err(FetchFailure::Failed(err.to_string()))),
        };

        self.events.dispatch(MonitorEvent::Fetch(FetchEvent {
            source: self.config.name.clone(),
            endpoint,
            status,
            latency: started.elapsed(),
            success: result.is_ok(),
            error: result.as_ref().err().map(|failure| failure.reason().to_string()),
            timestamp: Utc::now(),
        }));
        result
    }
}
