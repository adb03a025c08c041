//! Coordinator composing several sources into one virtual instance.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use thiserror::Error;

use super::clock::{Clock, SystemClock};
use super::registry::{CoordinatorKind, CoordinatorRegistry, MemberView};
use crate::config::GroupConfig;
use crate::modules::events::{
    EventDispatcher, FallbackEvent, HistoryResetEvent, MonitorEvent, RefreshEvent,
};
use crate::modules::history::PersistentHistory;
use crate::modules::metrics::{
    DynamicRule, FilteringRule, MetricsRecord, SecurityStatus, cache_hit_ratio, round2,
};
use crate::modules::rates::RateMode;
use crate::modules::rules::{UNNAMED_RULE, slugify, slugify_rule};
use crate::modules::storage::HistoryStore;

/// Persistence key of a group's sample history.
pub fn group_history_key(name: &str) -> String {
    format!("history:group:{}", slugify(name, "unknown"))
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AggregationError {
    #[error("counter '{0}' overflowed while summing members")]
    Overflow(&'static str),
}

fn add(total: u64, value: u64, field: &'static str) -> Result<u64, AggregationError> {
    total.checked_add(value).ok_or(AggregationError::Overflow(field))
}

/// Member records whose last cycle succeeded, in configured order. Duplicate
/// member names count once.
pub fn collect_active(members: &[String], view: &dyn MemberView) -> Vec<(String, Arc<MetricsRecord>)> {
    let mut seen = HashSet::new();
    members
        .iter()
        .filter(|name| seen.insert(name.as_str()))
        .filter_map(|name| {
            let snapshot = view.member(name)?;
            if !snapshot.last_update_success {
                return None;
            }
            Some((name.clone(), snapshot.data?))
        })
        .collect()
}

/// Composes the active members into one record.
///
/// Counters are summed, CPU averaged, uptime maximised and the most severe
/// security status wins. Rules merge by display name with a per-member
/// breakdown; a rule kind no member reports keeps `previous`'s value. Request
/// rates are left at zero for the caller to fill in.
pub fn aggregate(
    active: &[(String, Arc<MetricsRecord>)],
    previous: &MetricsRecord,
) -> Result<MetricsRecord, AggregationError> {
    let mut record = MetricsRecord::zeroed();
    let mut cpu_values = Vec::with_capacity(active.len());

    for (name, member) in active {
        record.queries = add(record.queries, member.queries, "queries")?;
        record.responses = add(record.responses, member.responses, "responses")?;
        record.drops = add(record.drops, member.drops, "drops")?;
        record.rule_drop = add(record.rule_drop, member.rule_drop, "rule_drop")?;
        record.downstream_errors = add(record.downstream_errors, member.downstream_errors, "downstream_errors")?;
        record.cache_hits = add(record.cache_hits, member.cache_hits, "cache_hits")?;
        record.cache_misses = add(record.cache_misses, member.cache_misses, "cache_misses")?;

        if member.cpu.is_finite() {
            cpu_values.push(member.cpu);
        } else {
            log::debug!("skipping invalid CPU value from {}: {}", name, member.cpu);
        }

        record.uptime = record.uptime.max(member.uptime);
        if member.security_status.severity() > record.security_status.severity() {
            record.security_status = member.security_status;
        }
    }

    record.cache_hit_ratio = cache_hit_ratio(record.cache_hits, record.cache_misses);
    if !cpu_values.is_empty() {
        record.cpu = round2(cpu_values.iter().sum::<f64>() / cpu_values.len() as f64);
    }

    record.filtering_rules = merge_filtering_rules(active)?;
    if record.filtering_rules.is_empty() {
        record.filtering_rules = previous.filtering_rules.clone();
    }
    record.dynamic_rules = merge_dynamic_rules(active)?;
    if record.dynamic_rules.is_empty() {
        record.dynamic_rules = previous.dynamic_rules.clone();
    }

    Ok(record)
}

fn fill<T: Clone>(slot: &mut Option<T>, value: &Option<T>) {
    if slot.is_none() {
        slot.clone_from(value);
    }
}

fn merge_filtering_rules(
    active: &[(String, Arc<MetricsRecord>)],
) -> Result<BTreeMap<String, FilteringRule>, AggregationError> {
    let mut merged: BTreeMap<String, FilteringRule> = BTreeMap::new();

    for (source, member) in active {
        for rule in member.filtering_rules.values() {
            let name = match rule.name.trim() {
                "" => UNNAMED_RULE,
                trimmed => trimmed,
            };
            let entry = merged.entry(slugify_rule(name)).or_insert_with(|| FilteringRule {
                name: name.to_string(),
                sources: Some(BTreeMap::new()),
                ..FilteringRule::default()
            });

            entry.matches = add(entry.matches, rule.matches, "matches")?;
            let per_source = entry.sources.get_or_insert_with(BTreeMap::new).entry(source.clone()).or_insert(0);
            *per_source = add(*per_source, rule.matches, "matches")?;

            fill(&mut entry.id, &rule.id);
            fill(&mut entry.uuid, &rule.uuid);
            fill(&mut entry.action, &rule.action);
            fill(&mut entry.rule, &rule.rule);
            fill(&mut entry.rule_type, &rule.rule_type);
            fill(&mut entry.enabled, &rule.enabled);
            fill(&mut entry.bypass, &rule.bypass);
        }
    }
    Ok(merged)
}

fn merge_dynamic_rules(
    active: &[(String, Arc<MetricsRecord>)],
) -> Result<BTreeMap<String, DynamicRule>, AggregationError> {
    let mut merged: BTreeMap<String, DynamicRule> = BTreeMap::new();

    for (source, member) in active {
        for rule in member.dynamic_rules.values() {
            let entry = merged.entry(slugify_rule(rule.network.as_str())).or_insert_with(|| DynamicRule {
                network: rule.network.clone(),
                sources: Some(BTreeMap::new()),
                ..DynamicRule::default()
            });

            entry.blocks = add(entry.blocks, rule.blocks, "blocks")?;
            let per_source = entry.sources.get_or_insert_with(BTreeMap::new).entry(source.clone()).or_insert(0);
            *per_source = add(*per_source, rule.blocks, "blocks")?;

            // the block stays in place until the last member lifts it
            entry.seconds = entry.seconds.max(rule.seconds);
            fill(&mut entry.reason, &rule.reason);
            fill(&mut entry.action, &rule.action);
            entry.ebpf |= rule.ebpf;
            entry.warning |= rule.warning;
        }
    }
    Ok(merged)
}

pub struct GroupCoordinator {
    config: GroupConfig,
    members: Arc<dyn MemberView>,
    clock: Arc<dyn Clock>,
    events: Arc<EventDispatcher>,
    registry: Option<CoordinatorRegistry>,
    history: PersistentHistory,
    data: MetricsRecord,
    active_members: Vec<String>,
    last_update_success: bool,
}

impl GroupCoordinator {
    pub fn new(config: GroupConfig, members: Arc<dyn MemberView>, store: Arc<dyn HistoryStore>) -> Self {
        let history = PersistentHistory::new(config.name.clone(), group_history_key(&config.name), store);
        Self {
            config,
            members,
            clock: Arc::new(SystemClock),
            events: Arc::new(EventDispatcher::with_logging()),
            registry: None,
            history,
            data: MetricsRecord::zeroed(),
            active_members: Vec::new(),
            last_update_success: false,
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

    /// Publishes group results to `registry`. Groups never appear as members.
    pub fn with_registry(mut self, registry: CoordinatorRegistry) -> Self {
        registry.register(&self.config.name, CoordinatorKind::Group);
        self.registry = Some(registry);
        self
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn config(&self) -> &GroupConfig {
        &self.config
    }

    pub fn members(&self) -> &[String] {
        &self.config.members
    }

    /// Replaces the member list; takes effect on the next refresh.
    pub fn set_members<I, S>(&mut self, members: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.members = members.into_iter().map(Into::into).collect();
        log::debug!("[{}] members now: {}", self.config.name, self.config.members.join(", "));
    }

    /// Members that contributed to the last composed record.
    pub fn active_members(&self) -> &[String] {
        &self.active_members
    }

    pub fn snapshot(&self) -> MetricsRecord {
        self.data.clone()
    }

    pub fn last_update_success(&self) -> bool {
        self.last_update_success
    }

    pub fn history(&self) -> &PersistentHistory {
        &self.history
    }

    pub async fn flush_history(&mut self) {
        self.history.flush(self.clock.monotonic()).await;
    }

    /// Runs one aggregation cycle and returns the composed record.
    pub async fn refresh(&mut self) -> MetricsRecord {
        let started = Instant::now();
        let now = self.clock.wallclock();
        self.history.ensure_loaded(now).await;

        let active = collect_active(&self.config.members, self.members.as_ref());
        let mut composed = false;
        if active.is_empty() {
            log::debug!("[{}] no active members yet", self.config.name);
        } else {
            match aggregate(&active, &self.data) {
                Ok(mut record) => {
                    let (rates, reset) = self.history.record(now, record.queries, RateMode::Extrapolated);
                    if reset {
                        self.events.dispatch(MonitorEvent::HistoryReset(HistoryResetEvent {
                            coordinator: self.config.name.clone(),
                            counter: record.queries,
                            timestamp: Utc::now(),
                        }));
                    }
                    record.req_per_hour = rates.per_hour;
                    record.req_per_day = rates.per_day;

                    self.data = record;
                    self.active_members = active.into_iter().map(|(name, _)| name).collect();
                    composed = true;
                }
                Err(err) => {
                    self.events.dispatch(MonitorEvent::Fallback(FallbackEvent {
                        coordinator: self.config.name.clone(),
                        reason: format!("aggregation error: {err}"),
                        timestamp: Utc::now(),
                    }));
                }
            }
        }

        self.history.save_if_due(self.clock.monotonic()).await;

        self.last_update_success = true;
        if let Some(registry) = &self.registry {
            registry.publish(&self.config.name, self.last_update_success, &self.data);
        }
        self.events.dispatch(MonitorEvent::Refresh(RefreshEvent {
            coordinator: self.config.name.clone(),
            fetched: composed,
            duration: started.elapsed(),
            timestamp: Utc::now(),
        }));
        self.data.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    use crate::coordinator::registry::MemberSnapshot;

    struct StaticView(HashMap<String, MemberSnapshot>);

    impl MemberView for StaticView {
        fn member(&self, name: &str) -> Option<MemberSnapshot> {
            self.0.get(name).cloned()
        }
    }

    fn member(queries: u64, cpu: f64, uptime: u64, status: SecurityStatus) -> MetricsRecord {
        MetricsRecord {
            queries,
            cache_hits: queries / 2,
            cache_misses: queries / 2,
            cpu,
            uptime,
            security_status: status,
            ..MetricsRecord::zeroed()
        }
    }

    fn rule(name: &str, matches: u64, uuid: Option<&str>) -> FilteringRule {
        FilteringRule {
            name: name.to_string(),
            matches,
            uuid: uuid.map(str::to_string),
            ..FilteringRule::default()
        }
    }

    fn active(records: Vec<(&str, MetricsRecord)>) -> Vec<(String, Arc<MetricsRecord>)> {
        records
            .into_iter()
            .map(|(name, record)| (name.to_string(), Arc::new(record)))
            .collect()
    }

    #[test]
    fn sums_counters_and_picks_extremes() {
        let members = active(vec![
            ("A", member(100, 40.0, 1000, SecurityStatus::Ok)),
            ("B", member(50, 60.0, 5000, SecurityStatus::Critical)),
        ]);
        let record = aggregate(&members, &MetricsRecord::zeroed()).unwrap();
        assert_eq!(record.queries, 150);
        assert_eq!(record.cpu, 50.0);
        assert_eq!(record.uptime, 5000);
        assert_eq!(record.security_status, SecurityStatus::Critical);
        assert_eq!(record.cache_hit_ratio, 50.0);
    }

    #[test]
    fn non_finite_cpu_is_skipped() {
        let members = active(vec![
            ("A", member(1, f64::NAN, 1, SecurityStatus::Unknown)),
            ("B", member(1, 30.0, 1, SecurityStatus::Warning)),
        ]);
        let record = aggregate(&members, &MetricsRecord::zeroed()).unwrap();
        assert_eq!(record.cpu, 30.0);
        assert_eq!(record.security_status, SecurityStatus::Warning);
    }

    #[test]
    fn merges_rules_by_display_name() {
        let mut a = member(10, 0.0, 0, SecurityStatus::Ok);
        a.filtering_rules.insert("uuid-a".into(), FilteringRule {
            action: Some("Drop".into()),
            ..rule("Block Ads", 10, Some("uuid-a"))
        });
        let mut b = member(10, 0.0, 0, SecurityStatus::Ok);
        b.filtering_rules.insert("7".into(), FilteringRule {
            action: Some("Refused".into()),
            enabled: Some(true),
            ..rule("Block Ads", 5, None)
        });

        let record = aggregate(&active(vec![("A", a), ("B", b)]), &MetricsRecord::zeroed()).unwrap();
        let merged = &record.filtering_rules["block-ads"];
        assert_eq!(merged.matches, 15);
        assert_eq!(
            merged.sources,
            Some(BTreeMap::from([("A".to_string(), 10), ("B".to_string(), 5)]))
        );
        assert_eq!(merged.uuid.as_deref(), Some("uuid-a"));
        assert_eq!(merged.action.as_deref(), Some("Drop"));
        assert_eq!(merged.enabled, Some(true));
    }

    #[test]
    fn merges_dynamic_rules_by_network() {
        let block = |blocks, seconds, warning| DynamicRule {
            network: "192.0.2.0/24".into(),
            blocks,
            seconds,
            reason: Some("Exceeded query rate".into()),
            warning,
            ..DynamicRule::default()
        };
        let mut a = MetricsRecord::zeroed();
        a.dynamic_rules.insert("192-0-2-0-24".into(), block(3, 10, false));
        let mut b = MetricsRecord::zeroed();
        b.dynamic_rules.insert("192-0-2-0-24".into(), block(4, 60, true));

        let record = aggregate(&active(vec![("A", a), ("B", b)]), &MetricsRecord::zeroed()).unwrap();
        let merged = &record.dynamic_rules["192-0-2-0-24"];
        assert_eq!(merged.blocks, 7);
        assert_eq!(merged.seconds, 60);
        assert!(merged.warning);
        assert_eq!(merged.sources.as_ref().unwrap()["B"], 4);
    }

    #[test]
    fn keeps_previous_rules_when_no_member_reports_any() {
        let mut previous = MetricsRecord::zeroed();
        previous.filtering_rules.insert("block-ads".into(), rule("Block Ads", 3, None));
        let record = aggregate(&active(vec![("A", MetricsRecord::zeroed())]), &previous).unwrap();
        assert_eq!(record.filtering_rules, previous.filtering_rules);
    }

    #[test]
    fn overflow_is_an_aggregation_error() {
        let members = active(vec![
            ("A", MetricsRecord { drops: u64::MAX, ..MetricsRecord::zeroed() }),
            ("B", MetricsRecord { drops: 1, ..MetricsRecord::zeroed() }),
        ]);
        assert_eq!(
            aggregate(&members, &MetricsRecord::zeroed()),
            Err(AggregationError::Overflow("drops"))
        );
    }

    #[test]
    fn collects_only_successful_members_in_order() {
        let ok = |queries| MemberSnapshot {
            last_update_success: true,
            data: Some(Arc::new(MetricsRecord { queries, ..MetricsRecord::zeroed() })),
        };
        let view = StaticView(HashMap::from([
            ("A".to_string(), ok(1)),
            ("B".to_string(), MemberSnapshot { last_update_success: false, data: Some(Arc::new(MetricsRecord::zeroed())) }),
            ("C".to_string(), MemberSnapshot { last_update_success: true, data: None }),
            ("D".to_string(), ok(4)),
        ]));
        let members: Vec<String> = ["D", "B", "C", "A", "D", "X"].iter().map(|s| s.to_string()).collect();
        let names: Vec<String> = collect_active(&members, &view).into_iter().map(|(name, _)| name).collect();
        assert_eq!(names, vec!["D".to_string(), "A".to_string()]);
    }

    #[test]
    fn group_history_keys_are_slugged() {
        assert_eq!(group_history_key("All Resolvers"), "history:group:all-resolvers");
    }
}
