//! Shared view of every coordinator's latest result.
//!
//! Coordinators publish here after each cycle; groups only ever read, through
//! the [`MemberView`] interface.

use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::modules::metrics::MetricsRecord;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CoordinatorKind {
    #[serde(rename = "host")]
    Source,
    Group,
}

/// What a group sees of one member.
#[derive(Debug, Clone, PartialEq)]
pub struct MemberSnapshot {
    pub last_update_success: bool,
    /// `None` until the member finished its first cycle.
    pub data: Option<Arc<MetricsRecord>>,
}

/// Read-only lookup of source coordinators by configured name.
pub trait MemberView: Send + Sync {
    fn member(&self, name: &str) -> Option<MemberSnapshot>;
}

#[derive(Debug, Clone)]
struct RegistryEntry {
    kind: CoordinatorKind,
    snapshot: MemberSnapshot,
}

/// Name-keyed registry shared between coordinators.
#[derive(Debug, Clone, Default)]
pub struct CoordinatorRegistry {
    inner: Arc<RwLock<HashMap<String, RegistryEntry>>>,
}

impl CoordinatorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `name` with no data yet. Re-registering resets the entry.
    pub fn register(&self, name: &str, kind: CoordinatorKind) {
        if let Ok(mut guard) = self.inner.write() {
            guard.insert(
                name.to_string(),
                RegistryEntry {
                    kind,
                    snapshot: MemberSnapshot {
                        last_update_success: false,
                        data: None,
                    },
                },
            );
        }
    }

    pub fn publish(&self, name: &str, last_update_success: bool, data: &MetricsRecord) {
        if let Ok(mut guard) = self.inner.write()
            && let Some(entry) = guard.get_mut(name)
        {
            entry.snapshot = MemberSnapshot {
                last_update_success,
                data: Some(Arc::new(data.clone())),
            };
        }
    }

    pub fn remove(&self, name: &str) -> bool {
        self.inner
            .write()
            .ok()
            .is_some_and(|mut guard| guard.remove(name).is_some())
    }

    pub fn kind(&self, name: &str) -> Option<CoordinatorKind> {
        self.inner.read().ok()?.get(name).map(|entry| entry.kind)
    }

    pub fn get(&self, name: &str) -> Option<MemberSnapshot> {
        self.inner.read().ok()?.get(name).map(|entry| entry.snapshot.clone())
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .inner
            .read()
            .map(|guard| guard.keys().cloned().collect())
            .unwrap_or_default();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.inner.read().map(|guard| guard.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl MemberView for CoordinatorRegistry {
    /// Only source coordinators are visible as members.
    fn member(&self, name: &str) -> Option<MemberSnapshot> {
        let guard = self.inner.read().ok()?;
        let entry = guard.get(name)?;
        (entry.kind == CoordinatorKind::Source).then(|| entry.snapshot.clone())
    }
}
