//! Fluent, composable query surface over the store.
//!
//! Each category method on [`QueryBuilder`] starts a chain; every builder
//! call returns the updated query by value and terminators (`all`,
//! `count`, `first`, `latest`, the numeric reducers) materialize results
//! without side effects on the store.

use chrono::Utc;

use crate::storage::store::Result;
use crate::storage::{
    ErrorTraceRow, EventTraceRow, IpReputationRow, LogEventRow, NetworkMetricRow, Store,
    SystemMetricRow,
};

/// Default window when a chain sets no time scope: the last 24 hours.
const DEFAULT_WINDOW_SECS: i64 = 86_400;

#[derive(Debug, Clone, Copy, Default)]
struct TimeScope {
    start: Option<i64>,
    end: Option<i64>,
}

impl TimeScope {
    fn last_hours(hours: i64) -> Self {
        let end = Utc::now().timestamp();
        Self { start: Some(end - hours * 3600), end: Some(end) }
    }

    fn last_days(days: i64) -> Self {
        let end = Utc::now().timestamp();
        Self { start: Some(end - days * 86_400), end: Some(end) }
    }

    fn resolve(self) -> (i64, i64) {
        match (self.start, self.end) {
            (Some(start), Some(end)) => (start, end),
            _ => {
                let end = Utc::now().timestamp();
                (end - DEFAULT_WINDOW_SECS, end)
            }
        }
    }
}

/// Entry point for building queries.
pub struct QueryBuilder<'a> {
    store: &'a Store,
}

impl<'a> QueryBuilder<'a> {
    #[must_use]
    pub fn new(store: &'a Store) -> Self {
        Self { store }
    }

    /// Query log events.
    #[must_use]
    pub fn events(&self) -> EventQuery<'a> {
        EventQuery { store: self.store, scope: TimeScope::default(), source: None, level: None, limit: None }
    }

    /// Query metric samples; defaults to the system family.
    #[must_use]
    pub fn metrics(&self) -> MetricQuery<'a> {
        MetricQuery { store: self.store, scope: TimeScope::default(), family: MetricFamily::System, limit: None }
    }

    /// Query event traces.
    #[must_use]
    pub fn traces(&self) -> TraceQuery<'a> {
        TraceQuery { store: self.store, scope: TimeScope::default(), source: None, min_severity: None, limit: None }
    }

    /// Query error traces.
    #[must_use]
    pub fn errors(&self) -> ErrorQuery<'a> {
        ErrorQuery { store: self.store, scope: TimeScope::default(), category: None, limit: None }
    }

    /// Query IP reputation rows.
    #[must_use]
    pub fn ips(&self) -> IpQuery<'a> {
        IpQuery { store: self.store, min_threat: 0, ip: None, limit: None }
    }
}

// ============================================================================
// Events
// ============================================================================

#[derive(Clone)]
pub struct EventQuery<'a> {
    store: &'a Store,
    scope: TimeScope,
    source: Option<String>,
    level: Option<String>,
    limit: Option<i64>,
}

impl EventQuery<'_> {
    #[must_use]
    pub fn in_last_hours(mut self, hours: i64) -> Self {
        self.scope = TimeScope::last_hours(hours);
        self
    }

    #[must_use]
    pub fn in_last_days(mut self, days: i64) -> Self {
        self.scope = TimeScope::last_days(days);
        self
    }

    #[must_use]
    pub fn between(mut self, start: i64, end: i64) -> Self {
        self.scope = TimeScope { start: Some(start), end: Some(end) };
        self
    }

    #[must_use]
    pub fn with_level(mut self, level: &str) -> Self {
        self.level = Some(level.to_uppercase());
        self
    }

    #[must_use]
    pub fn by_source(mut self, source: &str) -> Self {
        self.source = Some(source.to_string());
        self
    }

    #[must_use]
    pub fn errors_only(self) -> Self {
        self.with_level("ERROR")
    }

    #[must_use]
    pub fn warnings_only(self) -> Self {
        self.with_level("WARNING")
    }

    #[must_use]
    pub fn limit(mut self, count: i64) -> Self {
        self.limit = Some(count);
        self
    }

    pub async fn all(self) -> Result<Vec<LogEventRow>> {
        let (start, end) = self.scope.resolve();
        self.store
            .get_log_events(
                start,
                end,
                self.source.as_deref(),
                self.level.as_deref(),
                Some(self.limit.unwrap_or(1000)),
            )
            .await
    }

    pub async fn count(self) -> Result<usize> {
        Ok(self.all().await?.len())
    }

    pub async fn first(self) -> Result<Option<LogEventRow>> {
        Ok(self.limit(1).all().await?.into_iter().next())
    }
}

// ============================================================================
// Metrics
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MetricFamily {
    System,
    Network,
}

#[derive(Clone)]
pub struct MetricQuery<'a> {
    store: &'a Store,
    scope: TimeScope,
    family: MetricFamily,
    limit: Option<i64>,
}

/// Materialized metric rows, preserving the family the chain selected.
pub enum MetricRows {
    System(Vec<SystemMetricRow>),
    Network(Vec<NetworkMetricRow>),
}

impl MetricRows {
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Self::System(rows) => rows.len(),
            Self::Network(rows) => rows.len(),
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Numeric field lookup by name, for the reducers.
    fn values(&self, field: &str) -> Vec<f64> {
        match self {
            Self::System(rows) => rows.iter().filter_map(|r| system_field(r, field)).collect(),
            Self::Network(rows) => rows.iter().filter_map(|r| network_field(r, field)).collect(),
        }
    }
}

fn system_field(row: &SystemMetricRow, field: &str) -> Option<f64> {
    match field {
        "cpu_percent" => row.cpu_percent,
        "memory_percent" => row.memory_percent,
        "disk_percent" => row.disk_percent,
        "memory_total" => row.memory_total.map(|v| v as f64),
        "memory_available" => row.memory_available.map(|v| v as f64),
        "disk_total" => row.disk_total.map(|v| v as f64),
        "disk_used" => row.disk_used.map(|v| v as f64),
        "load_1min" => row.load_1min,
        "load_5min" => row.load_5min,
        "load_15min" => row.load_15min,
        _ => None,
    }
}

fn network_field(row: &NetworkMetricRow, field: &str) -> Option<f64> {
    let value = match field {
        "bytes_sent" => row.bytes_sent,
        "bytes_recv" => row.bytes_recv,
        "packets_sent" => row.packets_sent,
        "packets_recv" => row.packets_recv,
        "errors_in" => row.errors_in,
        "errors_out" => row.errors_out,
        "drops_in" => row.drops_in,
        "drops_out" => row.drops_out,
        "connections_established" => row.connections_established,
        "connections_listen" => row.connections_listen,
        "connections_time_wait" => row.connections_time_wait,
        _ => None,
    };
    value.map(|v| v as f64)
}

impl MetricQuery<'_> {
    #[must_use]
    pub fn system(mut self) -> Self {
        self.family = MetricFamily::System;
        self
    }

    #[must_use]
    pub fn network(mut self) -> Self {
        self.family = MetricFamily::Network;
        self
    }

    #[must_use]
    pub fn in_last_hours(mut self, hours: i64) -> Self {
        self.scope = TimeScope::last_hours(hours);
        self
    }

    #[must_use]
    pub fn in_last_days(mut self, days: i64) -> Self {
        self.scope = TimeScope::last_days(days);
        self
    }

    #[must_use]
    pub fn between(mut self, start: i64, end: i64) -> Self {
        self.scope = TimeScope { start: Some(start), end: Some(end) };
        self
    }

    #[must_use]
    pub fn limit(mut self, count: i64) -> Self {
        self.limit = Some(count);
        self
    }

    pub async fn all(self) -> Result<MetricRows> {
        let (start, end) = self.scope.resolve();
        let limit = Some(self.limit.unwrap_or(1000));
        match self.family {
            MetricFamily::System => {
                Ok(MetricRows::System(self.store.get_system_metrics(start, end, limit).await?))
            }
            MetricFamily::Network => {
                Ok(MetricRows::Network(self.store.get_network_metrics(start, end, limit).await?))
            }
        }
    }

    /// Most recent sample of the selected family.
    pub async fn latest(self) -> Result<MetricRows> {
        self.limit(1).all().await
    }

    pub async fn count(self) -> Result<usize> {
        Ok(self.all().await?.len())
    }

    pub async fn avg(self, field: &str) -> Result<f64> {
        let values = self.all().await?.values(field);
        if values.is_empty() {
            return Ok(0.0);
        }
        Ok(values.iter().sum::<f64>() / values.len() as f64)
    }

    pub async fn max(self, field: &str) -> Result<f64> {
        Ok(self.all().await?.values(field).into_iter().fold(0.0, f64::max))
    }

    pub async fn min(self, field: &str) -> Result<f64> {
        let values = self.all().await?.values(field);
        if values.is_empty() {
            return Ok(0.0);
        }
        Ok(values.into_iter().fold(f64::INFINITY, f64::min))
    }
}

// ============================================================================
// Traces
// ============================================================================

#[derive(Clone)]
pub struct TraceQuery<'a> {
    store: &'a Store,
    scope: TimeScope,
    source: Option<String>,
    min_severity: Option<i64>,
    limit: Option<i64>,
}

impl TraceQuery<'_> {
    #[must_use]
    pub fn in_last_hours(mut self, hours: i64) -> Self {
        self.scope = TimeScope::last_hours(hours);
        self
    }

    #[must_use]
    pub fn in_last_days(mut self, days: i64) -> Self {
        self.scope = TimeScope::last_days(days);
        self
    }

    #[must_use]
    pub fn between(mut self, start: i64, end: i64) -> Self {
        self.scope = TimeScope { start: Some(start), end: Some(end) };
        self
    }

    #[must_use]
    pub fn by_source(mut self, source: &str) -> Self {
        self.source = Some(source.to_string());
        self
    }

    /// Keep traces at or above a severity score.
    #[must_use]
    pub fn with_severity(mut self, min_severity: i64) -> Self {
        self.min_severity = Some(min_severity);
        self
    }

    /// Critical band only (score 80+).
    #[must_use]
    pub fn critical_only(self) -> Self {
        self.with_severity(80)
    }

    /// High band and above (score 60+).
    #[must_use]
    pub fn high_severity(self) -> Self {
        self.with_severity(60)
    }

    #[must_use]
    pub fn limit(mut self, count: i64) -> Self {
        self.limit = Some(count);
        self
    }

    pub async fn all(self) -> Result<Vec<EventTraceRow>> {
        let (start, end) = self.scope.resolve();
        self.store
            .get_traces(
                start,
                end,
                self.source.as_deref(),
                self.min_severity,
                Some(self.limit.unwrap_or(100)),
            )
            .await
    }

    pub async fn count(self) -> Result<usize> {
        Ok(self.all().await?.len())
    }

    pub async fn first(self) -> Result<Option<EventTraceRow>> {
        Ok(self.limit(1).all().await?.into_iter().next())
    }
}

// ============================================================================
// Errors
// ============================================================================

#[derive(Clone)]
pub struct ErrorQuery<'a> {
    store: &'a Store,
    scope: TimeScope,
    category: Option<String>,
    limit: Option<i64>,
}

impl ErrorQuery<'_> {
    #[must_use]
    pub fn in_last_hours(mut self, hours: i64) -> Self {
        self.scope = TimeScope::last_hours(hours);
        self
    }

    #[must_use]
    pub fn in_last_days(mut self, days: i64) -> Self {
        self.scope = TimeScope::last_days(days);
        self
    }

    #[must_use]
    pub fn between(mut self, start: i64, end: i64) -> Self {
        self.scope = TimeScope { start: Some(start), end: Some(end) };
        self
    }

    #[must_use]
    pub fn by_category(mut self, category: &str) -> Self {
        self.category = Some(category.to_string());
        self
    }

    #[must_use]
    pub fn database_errors(self) -> Self {
        self.by_category("database")
    }

    #[must_use]
    pub fn resource_errors(self) -> Self {
        self.by_category("resource")
    }

    #[must_use]
    pub fn network_errors(self) -> Self {
        self.by_category("network")
    }

    #[must_use]
    pub fn limit(mut self, count: i64) -> Self {
        self.limit = Some(count);
        self
    }

    pub async fn all(self) -> Result<Vec<ErrorTraceRow>> {
        let (start, end) = self.scope.resolve();
        self.store
            .get_error_traces(start, end, self.category.as_deref(), self.limit)
            .await
    }

    pub async fn count(self) -> Result<usize> {
        Ok(self.all().await?.len())
    }

    /// Group matching errors by taxonomy type.
    pub async fn by_type(self) -> Result<std::collections::BTreeMap<String, u64>> {
        let mut counts = std::collections::BTreeMap::new();
        for row in self.all().await? {
            let key = row.error_type.unwrap_or_else(|| "unknown".to_string());
            *counts.entry(key).or_default() += 1;
        }
        Ok(counts)
    }
}

// ============================================================================
// IPs
// ============================================================================

#[derive(Clone)]
pub struct IpQuery<'a> {
    store: &'a Store,
    min_threat: i64,
    ip: Option<String>,
    limit: Option<i64>,
}

impl IpQuery<'_> {
    /// Keep addresses whose threat score is at or above `threshold`.
    #[must_use]
    pub fn with_threat_above(mut self, threshold: i64) -> Self {
        self.min_threat = threshold;
        self
    }

    /// High-threat addresses (score 70+).
    #[must_use]
    pub fn high_threat(self) -> Self {
        self.with_threat_above(70)
    }

    /// Restrict to one address.
    #[must_use]
    pub fn for_ip(mut self, ip: &str) -> Self {
        self.ip = Some(ip.to_string());
        self
    }

    #[must_use]
    pub fn limit(mut self, count: i64) -> Self {
        self.limit = Some(count);
        self
    }

    pub async fn all(self) -> Result<Vec<IpReputationRow>> {
        if let Some(ip) = &self.ip {
            return Ok(self.store.get_ip_reputation(ip).await?.into_iter().collect());
        }
        let mut rows = self.store.get_high_threat_ips(self.min_threat).await?;
        if let Some(limit) = self.limit {
            rows.truncate(limit.max(0) as usize);
        }
        Ok(rows)
    }

    pub async fn count(self) -> Result<usize> {
        Ok(self.all().await?.len())
    }

    /// Highest threat first.
    pub async fn sort_by_threat(self) -> Result<Vec<IpReputationRow>> {
        let mut rows = self.all().await?;
        rows.sort_by(|a, b| b.threat_score.cmp(&a.threat_score));
        Ok(rows)
    }

    /// Most active (failed logins + bans) first.
    pub async fn sort_by_activity(self) -> Result<Vec<IpReputationRow>> {
        let mut rows = self.all().await?;
        rows.sort_by_key(|row| std::cmp::Reverse(row.failed_login_count + row.banned_count));
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{IpKind, LogEvent, SystemMetric};
    use tempfile::TempDir;

    async fn scratch() -> (TempDir, Store) {
        let dir = TempDir::new().unwrap();
        let store = Store::open(dir.path()).await.unwrap();
        (dir, store)
    }

    #[tokio::test]
    async fn event_chain_filters_compose() {
        let (_dir, store) = scratch().await;
        let now = Utc::now().timestamp();
        for (source, level) in [("django", "ERROR"), ("django", "INFO"), ("nginx", "ERROR")] {
            let mut event = LogEvent::new(now - 60, source, "line");
            event.level = Some(level.to_string());
            store.insert_log_event(&event).await.unwrap();
        }

        let query = QueryBuilder::new(&store);
        assert_eq!(query.events().in_last_hours(1).count().await.unwrap(), 3);
        assert_eq!(query.events().in_last_hours(1).errors_only().count().await.unwrap(), 2);
        assert_eq!(
            query
                .events()
                .in_last_hours(1)
                .errors_only()
                .by_source("django")
                .count()
                .await
                .unwrap(),
            1
        );
    }

    #[tokio::test]
    async fn default_scope_is_last_day() {
        let (_dir, store) = scratch().await;
        let now = Utc::now().timestamp();
        store.insert_log_event(&LogEvent::new(now - 3600, "app", "recent")).await.unwrap();
        store.insert_log_event(&LogEvent::new(now - 2 * 86_400, "app", "old")).await.unwrap();

        let query = QueryBuilder::new(&store);
        assert_eq!(query.events().count().await.unwrap(), 1);
        assert_eq!(query.events().between(0, now).count().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn metric_reducers_ignore_missing_values() {
        let (_dir, store) = scratch().await;
        let now = Utc::now().timestamp();
        for cpu in [Some(10.0), Some(30.0), None] {
            store
                .insert_system_metric(&SystemMetric { cpu_percent: cpu, ..SystemMetric::at(now - 60) })
                .await
                .unwrap();
        }

        let query = QueryBuilder::new(&store);
        let avg = query.metrics().system().in_last_hours(1).avg("cpu_percent").await.unwrap();
        assert!((avg - 20.0).abs() < 1e-9);
        let max = query.metrics().system().in_last_hours(1).max("cpu_percent").await.unwrap();
        assert!((max - 30.0).abs() < 1e-9);
        let min = query.metrics().system().in_last_hours(1).min("cpu_percent").await.unwrap();
        assert!((min - 10.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn latest_returns_single_newest_row() {
        let (_dir, store) = scratch().await;
        let now = Utc::now().timestamp();
        for i in 0..3 {
            store
                .insert_system_metric(&SystemMetric {
                    cpu_percent: Some(f64::from(i)),
                    ..SystemMetric::at(now - 300 + i64::from(i) * 60)
                })
                .await
                .unwrap();
        }

        let query = QueryBuilder::new(&store);
        let rows = query.metrics().system().in_last_hours(1).latest().await.unwrap();
        match rows {
            MetricRows::System(rows) => {
                assert_eq!(rows.len(), 1);
                assert_eq!(rows[0].cpu_percent, Some(2.0));
            }
            MetricRows::Network(_) => panic!("expected system rows"),
        }
    }

    #[tokio::test]
    async fn ip_chain_sorts_and_filters() {
        let (_dir, store) = scratch().await;
        // Busy address: 3 failed + 2 bans; quiet address: 1 ban.
        for i in 0..3 {
            store
                .record_ip_event("203.0.113.1", IpKind::Public, Some("failed_login"), 100 + i)
                .await
                .unwrap();
        }
        for i in 0..2 {
            store.record_ip_event("203.0.113.1", IpKind::Public, Some("ban"), 200 + i).await.unwrap();
        }
        store.record_ip_event("203.0.113.2", IpKind::Public, Some("ban"), 300).await.unwrap();

        let query = QueryBuilder::new(&store);
        // 10 + 15 + 40 = 65 and 10 + 20 = 30.
        assert_eq!(query.ips().with_threat_above(60).count().await.unwrap(), 1);
        assert_eq!(query.ips().high_threat().count().await.unwrap(), 0);

        let by_activity = query.ips().with_threat_above(0).sort_by_activity().await.unwrap();
        assert_eq!(by_activity[0].ip, "203.0.113.1");

        let one = query.ips().for_ip("203.0.113.2").all().await.unwrap();
        assert_eq!(one.len(), 1);
        assert_eq!(one[0].banned_count, 1);
    }
}
