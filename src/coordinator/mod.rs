//! Refresh coordinators.
//!
//! A [`Coordinator`] is either a single monitored source or a group composed
//! from sources. Both produce the same [`MetricsRecord`] shape.

pub mod clock;
pub mod group;
pub mod registry;
pub mod source;

use std::time::Duration;

use serde::Serialize;
use serde_json::Value;

use crate::modules::metrics::MetricsRecord;
use crate::modules::rules::EndpointSupport;
use crate::modules::telemetry::{PollTelemetry, SourcePollStats};

pub use clock::{Clock, ManualClock, SystemClock};
pub use group::{AggregationError, GroupCoordinator, aggregate, collect_active, group_history_key};
pub use registry::{CoordinatorKind, CoordinatorRegistry, MemberSnapshot, MemberView};
pub use source::{SourceCoordinator, source_history_key};

pub enum Coordinator {
    Source(SourceCoordinator),
    Group(GroupCoordinator),
}

/// Endpoint capability flags of a source.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EndpointDiagnostics {
    pub filtering_rules: EndpointSupport,
    pub dynamic_rules: EndpointSupport,
}

/// Troubleshooting view of one coordinator. The API key is never included.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CoordinatorDiagnostics {
    pub name: String,
    #[serde(rename = "entry_type")]
    pub kind: CoordinatorKind,
    pub config: Value,
    pub last_update_success: bool,
    pub data: MetricsRecord,
    pub history_samples: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub endpoints: Option<EndpointDiagnostics>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub telemetry: Option<SourcePollStats>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub active_members: Option<Vec<String>>,
}

impl Coordinator {
    pub fn name(&self) -> &str {
        match self {
            Self::Source(source) => source.name(),
            Self::Group(group) => group.name(),
        }
    }

    pub fn kind(&self) -> CoordinatorKind {
        match self {
            Self::Source(_) => CoordinatorKind::Source,
            Self::Group(_) => CoordinatorKind::Group,
        }
    }

    pub fn interval(&self) -> Duration {
        match self {
            Self::Source(source) => source.config().interval(),
            Self::Group(group) => group.config().interval(),
        }
    }

    pub async fn refresh(&mut self) -> MetricsRecord {
        match self {
            Self::Source(source) => source.refresh().await,
            Self::Group(group) => group.refresh().await,
        }
    }

    pub async fn flush_history(&mut self) {
        match self {
            Self::Source(source) => source.flush_history().await,
            Self::Group(group) => group.flush_history().await,
        }
    }

    pub fn last_update_success(&self) -> bool {
        match self {
            Self::Source(source) => source.last_update_success(),
            Self::Group(group) => group.last_update_success(),
        }
    }

    pub fn snapshot(&self) -> MetricsRecord {
        match self {
            Self::Source(source) => source.snapshot(),
            Self::Group(group) => group.snapshot(),
        }
    }

    pub fn as_source(&self) -> Option<&SourceCoordinator> {
        match self {
            Self::Source(source) => Some(source),
            Self::Group(_) => None,
        }
    }

    pub fn as_group_mut(&mut self) -> Option<&mut GroupCoordinator> {
        match self {
            Self::Group(group) => Some(group),
            Self::Source(_) => None,
        }
    }

    pub fn diagnostics(&self, telemetry: &PollTelemetry) -> CoordinatorDiagnostics {
        match self {
            Self::Source(source) => CoordinatorDiagnostics {
                name: source.name().to_string(),
                kind: CoordinatorKind::Source,
                config: source.config().redacted(),
                last_update_success: source.last_update_success(),
                data: source.snapshot(),
                history_samples: source.history().history().len(),
                endpoints: Some(EndpointDiagnostics {
                    filtering_rules: source.filtering_support(),
                    dynamic_rules: source.dynamic_support(),
                }),
                telemetry: telemetry.source(source.name()),
                active_members: None,
            },
            Self::Group(group) => CoordinatorDiagnostics {
                name: group.name().to_string(),
                kind: CoordinatorKind::Group,
                config: group.config().redacted(),
                last_update_success: group.last_update_success(),
                data: group.snapshot(),
                history_samples: group.history().history().len(),
                endpoints: None,
                telemetry: None,
                active_members: Some(group.active_members().to_vec()),
            },
        }
    }
}

impl From<SourceCoordinator> for Coordinator {
    fn from(source: SourceCoordinator) -> Self {
        Self::Source(source)
    }
}

impl From<GroupCoordinator> for Coordinator {
    fn from(group: GroupCoordinator) -> Self {
        Self::Group(group)
    }
}
