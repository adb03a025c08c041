//! # dnsdist-monitor
//!
//! Polls the HTTP API of one or more dnsdist instances and turns the raw
//! counters into ready-to-display metrics.
//!
//! ## Features
//!
//! - Normalized statistics with CPU usage and hourly/daily request rates
//! - Filtering and dynamic block rules, memoized per endpoint support
//! - Groups aggregating several sources into one record
//! - Sample history persisted across restarts
//! - Control commands (cache clear, backend toggles, console)
//!
//! ## Example
//!
//! ```no_run
//! use dnsdist_monitor::{DnsdistMonitor, GroupConfig, SourceConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut monitor = DnsdistMonitor::builder()
//!         .with_source(SourceConfig::new("edge-a", "192.0.2.10").with_api_key("secret"))
//!         .with_source(SourceConfig::new("edge-b", "192.0.2.11").with_api_key("secret"))
//!         .with_group(GroupConfig::new("edge", ["edge-a", "edge-b"]))
//!         .build()?;
//!
//!     for (name, record) in monitor.refresh_all().await {
//!         println!("{name}: {} queries, {} req/h", record.queries, record.req_per_hour);
//!     }
//!     Ok(())
//! }
//! ```

mod monitor;

pub mod api;
pub mod config;
pub mod coordinator;
pub mod modules;

pub use crate::monitor::{DnsdistMonitor, DnsdistMonitorBuilder, MonitorError, MonitorResult};

pub use crate::api::{
    ApiClientError, ApiResponse, ControlCommand, ControlError, ControlOutcome, DnsdistApi,
    ReqwestDnsdistClient,
};

pub use crate::config::{ConfigError, GroupConfig, MonitorConfig, SourceConfig};

pub use crate::coordinator::{
    Clock, Coordinator, CoordinatorDiagnostics, CoordinatorKind, CoordinatorRegistry,
    GroupCoordinator, ManualClock, SourceCoordinator, SystemClock,
};

pub use crate::modules::{
    DynamicRule, EventDispatcher, EventHandler, FilteringRule, HistoryStore, LoggingHandler,
    MemoryHistoryStore, MetricsRecord, MonitorEvent, PollTelemetry, RedbHistoryStore,
    SecurityStatus,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
