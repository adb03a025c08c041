//! Event system for refresh cycles.
//!
//! Coordinators describe what happened during a cycle as events; handlers
//! turn them into log lines, poll telemetry, or custom reactions.

use chrono::{DateTime, Utc};
use http::Method;
use std::sync::Arc;
use std::time::Duration;

use super::rules::EndpointSupport;
use super::telemetry::PollTelemetry;

/// Which upstream endpoint a fetch targeted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Endpoint {
    Statistics,
    FilteringRules,
    DynamicRules,
}

impl Endpoint {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Statistics => "statistics",
            Self::FilteringRules => "filtering rules",
            Self::DynamicRules => "dynamic rules",
        }
    }
}

/// Outcome of one upstream fetch.
#[derive(Debug, Clone)]
pub struct FetchEvent {
    pub source: String,
    pub endpoint: Endpoint,
    /// `None` when no HTTP response was received (timeout, connection error).
    pub status: Option<u16>,
    pub latency: Duration,
    pub success: bool,
    pub error: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// Refresh fell back to the last known-good record.
#[derive(Debug, Clone)]
pub struct FallbackEvent {
    pub coordinator: String,
    pub reason: String,
    pub timestamp: DateTime<Utc>,
}

/// An optional endpoint's support state was discovered.
#[derive(Debug, Clone)]
pub struct EndpointEvent {
    pub source: String,
    pub endpoint: Endpoint,
    pub support: EndpointSupport,
    pub timestamp: DateTime<Utc>,
}

/// The tracked counter went backwards and history restarted.
#[derive(Debug, Clone)]
pub struct HistoryResetEvent {
    pub coordinator: String,
    pub counter: u64,
    pub timestamp: DateTime<Utc>,
}

/// A refresh cycle finished.
#[derive(Debug, Clone)]
pub struct RefreshEvent {
    pub coordinator: String,
    pub fetched: bool,
    pub duration: Duration,
    pub timestamp: DateTime<Utc>,
}

/// A control-plane command was sent to a source.
#[derive(Debug, Clone)]
pub struct ControlEvent {
    pub source: String,
    pub method: Method,
    pub path: String,
    pub status: Option<u16>,
    pub success: bool,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub enum MonitorEvent {
    Fetch(FetchEvent),
    Fallback(FallbackEvent),
    Endpoint(EndpointEvent),
    HistoryReset(HistoryResetEvent),
    Refresh(RefreshEvent),
    Control(ControlEvent),
}

/// Trait implemented by event handlers.
pub trait EventHandler: Send + Sync {
    fn handle(&self, event: &MonitorEvent);
}

/// Dispatcher that broadcasts events to registered handlers.
#[derive(Default)]
pub struct EventDispatcher {
    handlers: Vec<Arc<dyn EventHandler>>,
}

impl EventDispatcher {
    pub fn new() -> Self {
        Self { handlers: Vec::new() }
    }

    /// Dispatcher with only the [`LoggingHandler`] registered.
    pub fn with_logging() -> Self {
        let mut dispatcher = Self::new();
        dispatcher.register_handler(Arc::new(LoggingHandler));
        dispatcher
    }

    pub fn register_handler(&mut self, handler: Arc<dyn EventHandler>) {
        self.handlers.push(handler);
    }

    pub fn dispatch(&self, event: MonitorEvent) {
        for handler in &self.handlers {
            handler.handle(&event);
        }
    }
}

/// Logs events using the `log` crate.
#[derive(Debug)]
pub struct LoggingHandler;

impl EventHandler for LoggingHandler {
    fn handle(&self, event: &MonitorEvent) {
        match event {
            MonitorEvent::Fetch(fetch) if fetch.success => {
                log::debug!(
                    "[{}] {} -> {} ({:.2}s)",
                    fetch.source,
                    fetch.endpoint.as_str(),
                    fetch.status.unwrap_or_default(),
                    fetch.latency.as_secs_f64()
                );
            }
            MonitorEvent::Fetch(fetch) => {
                let reason = fetch.error.as_deref().unwrap_or("unexpected response");
                match fetch.endpoint {
                    Endpoint::Statistics => {
                        log::warn!("[{}] {} fetch failed: {}", fetch.source, fetch.endpoint.as_str(), reason)
                    }
                    _ => {
                        log::debug!("[{}] {} fetch failed: {}", fetch.source, fetch.endpoint.as_str(), reason)
                    }
                }
            }
            MonitorEvent::Fallback(fallback) => {
                log::warn!("[{}] keeping last known data: {}", fallback.coordinator, fallback.reason);
            }
            MonitorEvent::Endpoint(endpoint) => {
                log::debug!(
                    "[{}] {} endpoint support: {:?}",
                    endpoint.source,
                    endpoint.endpoint.as_str(),
                    endpoint.support
                );
            }
            MonitorEvent::HistoryReset(reset) => {
                log::info!("[{}] counter went backwards ({}), history restarted", reset.coordinator, reset.counter);
            }
            MonitorEvent::Refresh(refresh) => {
                log::debug!(
                    "[{}] refresh finished in {:.2}s (fetched={})",
                    refresh.coordinator,
                    refresh.duration.as_secs_f64(),
                    refresh.fetched
                );
            }
            MonitorEvent::Control(control) if control.success => {
                log::info!("[{}] {} {} succeeded", control.source, control.method, control.path);
            }
            MonitorEvent::Control(control) => {
                log::warn!(
                    "[{}] {} {} failed (status {:?})",
                    control.source,
                    control.method,
                    control.path,
                    control.status
                );
            }
        }
    }
}

/// Feeds statistics fetches into the poll telemetry.
#[derive(Clone, Debug)]
pub struct TelemetryHandler {
    telemetry: PollTelemetry,
}

impl TelemetryHandler {
    pub fn new(telemetry: PollTelemetry) -> Self {
        Self { telemetry }
    }
}

impl EventHandler for TelemetryHandler {
    fn handle(&self, event: &MonitorEvent) {
        if let MonitorEvent::Fetch(fetch) = event
            && fetch.endpoint == Endpoint::Statistics
        {
            if fetch.success {
                self.telemetry
                    .record_poll(&fetch.source, fetch.status.unwrap_or(200), fetch.latency);
            } else {
                self.telemetry
                    .record_failure(&fetch.source, fetch.status, fetch.latency);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct CountingHandler(std::sync::Mutex<usize>);

    impl EventHandler for CountingHandler {
        fn handle(&self, _event: &MonitorEvent) {
            *self.0.lock().unwrap() += 1;
        }
    }

    fn stats_fetch(success: bool, status: Option<u16>) -> MonitorEvent {
        MonitorEvent::Fetch(FetchEvent {
            source: "edge".into(),
            endpoint: Endpoint::Statistics,
            status,
            latency: Duration::from_millis(40),
            success,
            error: (!success).then(|| "timeout".to_string()),
            timestamp: Utc::now(),
        })
    }

    #[test]
    fn dispatches_to_handlers() {
        let mut dispatcher = EventDispatcher::with_logging();
        let counter = Arc::new(CountingHandler(std::sync::Mutex::new(0)));
        dispatcher.register_handler(counter.clone());
        dispatcher.dispatch(MonitorEvent::Fallback(FallbackEvent {
            coordinator: "edge".into(),
            reason: "timeout".into(),
            timestamp: Utc::now(),
        }));
        dispatcher.dispatch(stats_fetch(true, Some(200)));
        assert_eq!(*counter.0.lock().unwrap(), 2);
    }

    #[test]
    fn telemetry_handler_tracks_statistics_fetches_only() {
        let telemetry = PollTelemetry::new();
        let handler = TelemetryHandler::new(telemetry.clone());
        handler.handle(&stats_fetch(true, Some(200)));
        handler.handle(&stats_fetch(false, None));
        handler.handle(&MonitorEvent::Fetch(FetchEvent {
            source: "edge".into(),
            endpoint: Endpoint::DynamicRules,
            status: Some(404),
            latency: Duration::from_millis(5),
            success: false,
            error: None,
            timestamp: Utc::now(),
        }));

        let stats = telemetry.source("edge").unwrap();
        assert_eq!(stats.polls, 2);
        assert_eq!(stats.failures, 1);
        assert_eq!(stats.consecutive_failures, 1);
    }
}
