//! Cross-cutting services module
//!
//! Statistics and rule normalization, sample history with request rates,
//! persistence, events and poll telemetry.

pub mod events;
pub mod history;
pub mod metrics;
pub mod rates;
pub mod rules;
pub mod stats;
pub mod storage;
pub mod telemetry;

// Re-export commonly used types
pub use events::{
    ControlEvent, Endpoint, EndpointEvent, EventDispatcher, EventHandler, FallbackEvent, FetchEvent,
    HistoryResetEvent, LoggingHandler, MonitorEvent, RefreshEvent, TelemetryHandler,
};
pub use history::{PersistentHistory, Sample, SampleHistory};
pub use metrics::{DynamicRule, FilteringRule, MetricsRecord, SecurityStatus, cache_hit_ratio};
pub use rates::{RateMode, RateWindows, compute_rates};
pub use rules::{EndpointSupport, slugify, slugify_rule};
pub use stats::{CpuTracker, NormalizedStats, StatsPayload, normalize};
pub use storage::{HistoryStore, MemoryHistoryStore, RedbHistoryStore, StoreError};
pub use telemetry::{PollTelemetry, SourcePollStats};
