//! High level monitor orchestration.
//!
//! Wires sources, groups, persistence, events and telemetry together and
//! drives every coordinator on its own refresh interval.

use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use thiserror::Error;
use tokio::time::{Instant, sleep_until};

use crate::api::{
    ApiClientError, ControlCommand, ControlError, ControlOutcome, DnsdistApi, ReqwestDnsdistClient,
    send_command,
};
use crate::config::{ConfigError, GroupConfig, MonitorConfig, SourceConfig};
use crate::coordinator::{
    Clock, Coordinator, CoordinatorDiagnostics, CoordinatorKind, CoordinatorRegistry, GroupCoordinator,
    SourceCoordinator, SystemClock,
};
use crate::modules::events::{
    ControlEvent, EventDispatcher, EventHandler, LoggingHandler, MonitorEvent, TelemetryHandler,
};
use crate::modules::metrics::MetricsRecord;
use crate::modules::storage::{HistoryStore, MemoryHistoryStore, RedbHistoryStore, StoreError};
use crate::modules::telemetry::PollTelemetry;

/// Result alias used across the orchestration layer.
pub type MonitorResult<T> = Result<T, MonitorError>;

/// High-level error surfaced by the monitor.
#[derive(Debug, Error)]
pub enum MonitorError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("history store error: {0}")]
    Store(#[from] StoreError),
    #[error("api client error: {0}")]
    Api(#[from] ApiClientError),
    #[error("invalid command: {0}")]
    Control(#[from] ControlError),
    #[error("no coordinator named '{0}'")]
    UnknownCoordinator(String),
    #[error("'{0}' is a group and cannot receive commands")]
    NotASource(String),
    #[error("'{0}' is not a group")]
    NotAGroup(String),
}

/// Fluent builder for [`DnsdistMonitor`].
pub struct DnsdistMonitorBuilder {
    config: MonitorConfig,
    store: Option<Arc<dyn HistoryStore>>,
    clock: Arc<dyn Clock>,
    transports: HashMap<String, Arc<dyn DnsdistApi>>,
    handlers: Vec<Arc<dyn EventHandler>>,
    telemetry: PollTelemetry,
    logging: bool,
}

impl DnsdistMonitorBuilder {
    pub fn new() -> Self {
        Self {
            config: MonitorConfig::default(),
            store: None,
            clock: Arc::new(SystemClock),
            transports: HashMap::new(),
            handlers: Vec::new(),
            telemetry: PollTelemetry::new(),
            logging: true,
        }
    }

    pub fn with_config(mut self, config: MonitorConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_source(mut self, source: SourceConfig) -> Self {
        self.config.sources.push(source);
        self
    }

    pub fn with_group(mut self, group: GroupConfig) -> Self {
        self.config.groups.push(group);
        self
    }

    /// Overrides the store otherwise derived from `storage_path`.
    pub fn with_store(mut self, store: Arc<dyn HistoryStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Uses `api` for the named source instead of an HTTP client.
    pub fn with_transport(mut self, source: impl Into<String>, api: Arc<dyn DnsdistApi>) -> Self {
        self.transports.insert(source.into(), api);
        self
    }

    pub fn with_event_handler(mut self, handler: Arc<dyn EventHandler>) -> Self {
        self.handlers.push(handler);
        self
    }

    pub fn with_telemetry(mut self, telemetry: PollTelemetry) -> Self {
        self.telemetry = telemetry;
        self
    }

    pub fn disable_logging(mut self) -> Self {
        self.logging = false;
        self
    }

    pub fn build(mut self) -> MonitorResult<DnsdistMonitor> {
        self.config.validate()?;

        let store: Arc<dyn HistoryStore> = match (self.store.take(), &self.config.storage_path) {
            (Some(store), _) => store,
            (None, Some(path)) => Arc::new(RedbHistoryStore::open(path)?),
            (None, None) => Arc::new(MemoryHistoryStore::new()),
        };

        let mut events = EventDispatcher::new();
        if self.logging {
            events.register_handler(Arc::new(LoggingHandler));
        }
        events.register_handler(Arc::new(TelemetryHandler::new(self.telemetry.clone())));
        for handler in self.handlers.drain(..) {
            events.register_handler(handler);
        }
        let events = Arc::new(events);

        let registry = CoordinatorRegistry::new();
        let fetch_timeout = self.config.fetch_timeout();
        let mut coordinators = Vec::with_capacity(self.config.sources.len() + self.config.groups.len());

        for source in &self.config.sources {
            let api: Arc<dyn DnsdistApi> = match self.transports.remove(&source.name) {
                Some(api) => api,
                None => Arc::new(ReqwestDnsdistClient::from_source(source)?),
            };
            let coordinator = SourceCoordinator::new(source.clone(), api, store.clone())
                .with_clock(self.clock.clone())
                .with_events(events.clone())
                .with_fetch_timeout(fetch_timeout)
                .with_registry(registry.clone());
            coordinators.push(Coordinator::from(coordinator));
        }

        for group in &self.config.groups {
            let coordinator = GroupCoordinator::new(group.clone(), Arc::new(registry.clone()), store.clone())
                .with_clock(self.clock.clone())
                .with_events(events.clone())
                .with_registry(registry.clone());
            coordinators.push(Coordinator::from(coordinator));
        }

        log::info!(
            "dnsdist monitor ready: {} source(s), {} group(s)",
            self.config.sources.len(),
            self.config.groups.len()
        );

        Ok(DnsdistMonitor {
            config: self.config,
            coordinators,
            registry,
            telemetry: self.telemetry,
            events,
        })
    }
}

impl Default for DnsdistMonitorBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Owns every coordinator and schedules their refresh cycles.
///
/// Sources are kept ahead of groups so a group refreshing in the same tick
/// sees its members' fresh data. Cycles of one coordinator never overlap.
pub struct DnsdistMonitor {
    config: MonitorConfig,
    coordinators: Vec<Coordinator>,
    registry: CoordinatorRegistry,
    telemetry: PollTelemetry,
    events: Arc<EventDispatcher>,
}

impl DnsdistMonitor {
    pub fn builder() -> DnsdistMonitorBuilder {
        DnsdistMonitorBuilder::new()
    }

    pub fn from_config(config: MonitorConfig) -> MonitorResult<Self> {
        Self::builder().with_config(config).build()
    }

    pub fn config(&self) -> &MonitorConfig {
        &self.config
    }

    pub fn registry(&self) -> &CoordinatorRegistry {
        &self.registry
    }

    pub fn telemetry(&self) -> &PollTelemetry {
        &self.telemetry
    }

    /// Coordinator names in refresh order.
    pub fn names(&self) -> Vec<&str> {
        self.coordinators.iter().map(Coordinator::name).collect()
    }

    pub fn coordinator(&self, name: &str) -> Option<&Coordinator> {
        self.coordinators.iter().find(|coordinator| coordinator.name() == name)
    }

    fn coordinator_mut(&mut self, name: &str) -> MonitorResult<&mut Coordinator> {
        self.coordinators
            .iter_mut()
            .find(|coordinator| coordinator.name() == name)
            .ok_or_else(|| MonitorError::UnknownCoordinator(name.to_string()))
    }

    /// Latest record of `name` without refreshing.
    pub fn snapshot(&self, name: &str) -> MonitorResult<MetricsRecord> {
        self.coordinator(name)
            .map(Coordinator::snapshot)
            .ok_or_else(|| MonitorError::UnknownCoordinator(name.to_string()))
    }

    pub async fn refresh(&mut self, name: &str) -> MonitorResult<MetricsRecord> {
        Ok(self.coordinator_mut(name)?.refresh().await)
    }

    /// One cycle of every coordinator, sources first.
    pub async fn refresh_all(&mut self) -> BTreeMap<String, MetricsRecord> {
        let mut results = BTreeMap::new();
        for coordinator in &mut self.coordinators {
            let record = coordinator.refresh().await;
            results.insert(coordinator.name().to_string(), record);
        }
        results
    }

    /// Replaces a group's members and recomposes it right away.
    pub async fn set_group_members<I, S>(&mut self, group: &str, members: I) -> MonitorResult<MetricsRecord>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let coordinator = self.coordinator_mut(group)?;
        let Some(group_coordinator) = coordinator.as_group_mut() else {
            return Err(MonitorError::NotAGroup(group.to_string()));
        };
        group_coordinator.set_members(members);
        Ok(group_coordinator.refresh().await)
    }

    /// Sends `command` to the named source, or to every source when `target`
    /// is `None`. Groups are never targeted.
    pub async fn execute(&self, target: Option<&str>, command: ControlCommand) -> MonitorResult<Vec<ControlOutcome>> {
        command.validate()?;

        let targets: Vec<&SourceCoordinator> = match target {
            Some(name) => {
                let coordinator = self
                    .coordinator(name)
                    .ok_or_else(|| MonitorError::UnknownCoordinator(name.to_string()))?;
                match coordinator.as_source() {
                    Some(source) => vec![source],
                    None => return Err(MonitorError::NotASource(name.to_string())),
                }
            }
            None => self.coordinators.iter().filter_map(Coordinator::as_source).collect(),
        };

        let mut outcomes = Vec::with_capacity(targets.len());
        for source in targets {
            let api = source.api();
            let outcome = send_command(api.as_ref(), source.name(), &command, source.fetch_timeout()).await;
            self.events.dispatch(MonitorEvent::Control(ControlEvent {
                source: outcome.source.clone(),
                method: command.method(),
                path: command.path(),
                status: outcome.status,
                success: outcome.success,
                timestamp: Utc::now(),
            }));
            outcomes.push(outcome);
        }
        Ok(outcomes)
    }

    pub fn diagnostics_for(&self, name: &str) -> MonitorResult<CoordinatorDiagnostics> {
        self.coordinator(name)
            .map(|coordinator| coordinator.diagnostics(&self.telemetry))
            .ok_or_else(|| MonitorError::UnknownCoordinator(name.to_string()))
    }

    /// Diagnostics of every coordinator, keyed by name.
    pub fn diagnostics(&self) -> BTreeMap<String, CoordinatorDiagnostics> {
        self.coordinators
            .iter()
            .map(|coordinator| (coordinator.name().to_string(), coordinator.diagnostics(&self.telemetry)))
            .collect()
    }

    pub fn kind(&self, name: &str) -> Option<CoordinatorKind> {
        self.coordinator(name).map(Coordinator::kind)
    }

    /// Refreshes every coordinator on its interval until `shutdown` resolves,
    /// then flushes pending history. Every coordinator runs once immediately.
    pub async fn run<F>(&mut self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);

        let start = Instant::now();
        let mut due = vec![start; self.coordinators.len()];

        loop {
            let Some(next) = due.iter().min().copied() else {
                shutdown.as_mut().await;
                break;
            };

            tokio::select! {
                _ = shutdown.as_mut() => break,
                _ = sleep_until(next) => {
                    let now = Instant::now();
                    for (slot, coordinator) in due.iter_mut().zip(self.coordinators.iter_mut()) {
                        if *slot > now {
                            continue;
                        }
                        coordinator.refresh().await;
                        *slot = Instant::now() + coordinator.interval().max(Duration::from_secs(1));
                    }
                }
            }
        }

        log::info!("dnsdist monitor stopping");
        for coordinator in &mut self.coordinators {
            coordinator.flush_history().await;
        }
    }
}
