//! Issue detection over stored data.
//!
//! Every detector is a stateless read: it pulls rows for the requested
//! window, applies its rule, and returns typed [`Issue`] records sorted
//! most severe first. Nothing here writes to the store.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use crate::config::Thresholds;
use crate::storage::store::Result;
use crate::storage::Store;

use super::models::{Issue, IssueDetail, ResourceKind, Window};

/// Row cap for detector scans; matches the widest window any report asks
/// for at one-minute sampling resolution.
const SCAN_LIMIT: i64 = 10_000;

/// Minimum samples for a sustained-usage run.
const MIN_RUN_SAMPLES: usize = 3;

/// Minimum events before the spike detector has enough data.
const MIN_SPIKE_EVENTS: usize = 10;

/// Minimum points before the connection-anomaly detector has enough data.
const MIN_ANOMALY_POINTS: usize = 10;

pub struct IssueDetector<'a> {
    store: &'a Store,
    thresholds: Thresholds,
}

impl<'a> IssueDetector<'a> {
    #[must_use]
    pub fn new(store: &'a Store, thresholds: Thresholds) -> Self {
        Self { store, thresholds }
    }

    #[must_use]
    pub fn thresholds(&self) -> &Thresholds {
        &self.thresholds
    }

    /// Run every detector family over the window, sorted by severity.
    pub async fn detect_all_issues(&self, window: Window) -> Result<Vec<Issue>> {
        let mut issues = Vec::new();
        issues.extend(self.find_brute_force_attempts(window, None).await?);
        issues.extend(self.find_suspicious_ips(None).await?);
        issues.extend(self.find_banned_ips(window).await?);
        issues.extend(self.find_high_cpu_periods(window).await?);
        issues.extend(self.find_high_memory_periods(window).await?);
        issues.extend(self.find_disk_space_issues(window).await?);
        issues.extend(self.find_error_spikes(window).await?);
        issues.extend(self.find_recurring_errors(window, None).await?);
        issues.extend(self.find_critical_errors(window).await?);
        issues.extend(self.find_connection_anomalies(window).await?);
        issues.extend(self.find_network_errors(window).await?);

        issues.sort_by(|a, b| b.severity.cmp(&a.severity));
        Ok(issues)
    }

    // ========================================================================
    // Security
    // ========================================================================

    /// Group failed logins by source IP; one alert per IP at or over the
    /// threshold. A tight burst (span under five minutes) is scored +20.
    pub async fn find_brute_force_attempts(
        &self,
        window: Window,
        threshold: Option<u64>,
    ) -> Result<Vec<Issue>> {
        let threshold = threshold.unwrap_or(self.thresholds.failed_login_threshold);
        let events = self
            .store
            .get_log_events(window.start, window.end, None, None, Some(SCAN_LIMIT))
            .await?;

        struct Attempts {
            count: u64,
            users: BTreeSet<String>,
            first_seen: i64,
            last_seen: i64,
        }

        let mut by_ip: HashMap<String, Attempts> = HashMap::new();
        for event in &events {
            if event.action.as_deref() != Some("failed_login") {
                continue;
            }
            let Some(ip) = &event.ip else {
                continue;
            };
            let user = event.user.clone().unwrap_or_else(|| "unknown".to_string());
            let entry = by_ip.entry(ip.clone()).or_insert(Attempts {
                count: 0,
                users: BTreeSet::new(),
                first_seen: event.ts,
                last_seen: event.ts,
            });
            entry.count += 1;
            entry.users.insert(user);
            entry.first_seen = entry.first_seen.min(event.ts);
            entry.last_seen = entry.last_seen.max(event.ts);
        }

        let mut alerts = Vec::new();
        for (ip, attempts) in by_ip {
            if attempts.count < threshold {
                continue;
            }
            let time_span = attempts.last_seen - attempts.first_seen;
            let mut severity = (50 + 5 * (attempts.count - threshold) as i64).min(100);
            if time_span < 300 {
                severity = (severity + 20).min(100);
            }

            let users: Vec<String> = attempts.users.iter().cloned().collect();
            let target_user = if users.len() == 1 {
                users[0].clone()
            } else {
                format!("{} users", users.len())
            };

            alerts.push(Issue {
                severity,
                title: format!("Brute Force Attack from {ip}"),
                description: format!(
                    "{} failed login attempts from {ip} targeting {} user(s)",
                    attempts.count,
                    users.len()
                ),
                first_seen: attempts.first_seen,
                last_seen: attempts.last_seen,
                occurrence_count: attempts.count,
                affected_resources: users.clone(),
                recommendations: vec![
                    format!("Consider blocking IP {ip}"),
                    "Enable rate limiting on authentication endpoints".to_string(),
                    "Review authentication logs for compromised accounts".to_string(),
                ],
                detail: IssueDetail::BruteForce {
                    ip,
                    target_user,
                    attempt_count: attempts.count,
                    time_span,
                    unique_users: users.len(),
                },
            });
        }

        alerts.sort_by(|a, b| b.severity.cmp(&a.severity));
        Ok(alerts)
    }

    /// IPs whose stored reputation crosses the high-threat line. Severity
    /// equals the threat score.
    pub async fn find_suspicious_ips(&self, threshold: Option<i64>) -> Result<Vec<Issue>> {
        let threshold = threshold.unwrap_or(self.thresholds.threat_score_high);
        let rows = self.store.get_high_threat_ips(threshold).await?;

        let issues = rows
            .into_iter()
            .map(|rep| Issue {
                severity: rep.threat_score.min(100),
                title: format!("High-Threat IP: {}", rep.ip),
                description: format!(
                    "IP {} has a threat score of {}/100",
                    rep.ip, rep.threat_score
                ),
                first_seen: rep.first_seen,
                last_seen: rep.last_seen,
                occurrence_count: (rep.failed_login_count + rep.banned_count).max(0) as u64,
                affected_resources: Vec::new(),
                recommendations: vec![
                    format!("Review all activity from {}", rep.ip),
                    "Consider adding to IP blacklist".to_string(),
                    "Check for successful authentications from this IP".to_string(),
                ],
                detail: IssueDetail::SuspiciousIp {
                    ip: rep.ip,
                    threat_score: rep.threat_score,
                    failed_login_count: rep.failed_login_count,
                    ban_count: rep.banned_count,
                },
            })
            .collect();
        Ok(issues)
    }

    /// Every ban event in the window, at fixed severity 70.
    pub async fn find_banned_ips(&self, window: Window) -> Result<Vec<Issue>> {
        let events = self
            .store
            .get_log_events(window.start, window.end, None, None, Some(SCAN_LIMIT))
            .await?;

        let issues = events
            .into_iter()
            .filter(|event| event.action.as_deref() == Some("ban") && event.ip.is_some())
            .map(|event| {
                let ip = event.ip.clone().unwrap_or_default();
                Issue {
                    severity: 70,
                    title: format!("IP Banned: {ip}"),
                    description: event.message.clone(),
                    first_seen: event.ts,
                    last_seen: event.ts,
                    occurrence_count: 1,
                    affected_resources: Vec::new(),
                    recommendations: vec![
                        "Review ban reason".to_string(),
                        "Ensure ban is legitimate".to_string(),
                        "Monitor for ban evasion attempts".to_string(),
                    ],
                    detail: IssueDetail::BannedIp { ip },
                }
            })
            .collect();
        Ok(issues)
    }

    /// Access-denied keyword scan over auth events.
    pub async fn find_unauthorized_access_attempts(&self, window: Window) -> Result<Vec<Issue>> {
        let events = self
            .store
            .get_log_events(window.start, window.end, Some("auth"), None, Some(SCAN_LIMIT))
            .await?;

        const KEYWORDS: [&str; 4] = ["denied", "unauthorized", "forbidden", "not permitted"];
        let issues = events
            .into_iter()
            .filter(|event| {
                let message = event.message.to_lowercase();
                KEYWORDS.iter().any(|k| message.contains(k))
            })
            .map(|event| Issue {
                severity: 60,
                title: "Unauthorized Access Attempt".to_string(),
                description: event.message.clone(),
                first_seen: event.ts,
                last_seen: event.ts,
                occurrence_count: 1,
                affected_resources: event.user.clone().into_iter().collect(),
                recommendations: vec![
                    "Review access controls".to_string(),
                    "Audit user permissions".to_string(),
                ],
                detail: IssueDetail::UnauthorizedAccess {
                    ip: event.ip.clone(),
                    target_user: event.user.clone(),
                },
            })
            .collect();
        Ok(issues)
    }

    // ========================================================================
    // Performance
    // ========================================================================

    /// Sustained CPU runs at or above the configured threshold.
    pub async fn find_high_cpu_periods(&self, window: Window) -> Result<Vec<Issue>> {
        self.find_high_resource_periods(window, ResourceKind::Cpu).await
    }

    /// Sustained memory runs at or above the configured threshold.
    pub async fn find_high_memory_periods(&self, window: Window) -> Result<Vec<Issue>> {
        self.find_high_resource_periods(window, ResourceKind::Memory).await
    }

    async fn find_high_resource_periods(
        &self,
        window: Window,
        resource: ResourceKind,
    ) -> Result<Vec<Issue>> {
        let (metric_name, threshold) = match resource {
            ResourceKind::Cpu => ("cpu_percent", self.thresholds.high_cpu_percent),
            ResourceKind::Memory => ("memory_percent", self.thresholds.high_memory_percent),
            ResourceKind::Disk => ("disk_percent", self.thresholds.disk_space_critical),
        };
        let min_duration = self.thresholds.sustained_duration_min;

        let mut rows = self
            .store
            .get_system_metrics(window.start, window.end, Some(SCAN_LIMIT))
            .await?;
        rows.sort_by_key(|row| row.ts);

        struct Run {
            start: i64,
            end: i64,
            peak: f64,
            values: Vec<f64>,
        }

        let mut runs: Vec<Run> = Vec::new();
        let mut current: Option<Run> = None;

        for row in &rows {
            let value = match resource {
                ResourceKind::Cpu => row.cpu_percent,
                ResourceKind::Memory => row.memory_percent,
                ResourceKind::Disk => row.disk_percent,
            };
            let Some(value) = value else {
                continue;
            };

            if value >= threshold {
                match &mut current {
                    Some(run) => {
                        run.end = row.ts;
                        run.peak = run.peak.max(value);
                        run.values.push(value);
                    }
                    None => {
                        current =
                            Some(Run { start: row.ts, end: row.ts, peak: value, values: vec![value] });
                    }
                }
            } else if let Some(run) = current.take() {
                runs.push(run);
            }
        }
        if let Some(run) = current.take() {
            runs.push(run);
        }

        let mut issues = Vec::new();
        for run in runs {
            let sustained_duration = run.end - run.start;
            let long_enough = min_duration == 0 || sustained_duration >= min_duration;
            if !long_enough || run.values.len() < MIN_RUN_SAMPLES {
                continue;
            }

            let avg_value = run.values.iter().sum::<f64>() / run.values.len() as f64;
            let severity = (60 + (run.peak - threshold) as i64).min(100);
            let label = resource.as_str().to_uppercase();

            issues.push(Issue {
                severity,
                title: format!("High {label} Usage"),
                description: format!(
                    "{label} usage sustained above {threshold}% for {sustained_duration} seconds"
                ),
                first_seen: run.start,
                last_seen: run.end,
                occurrence_count: run.values.len() as u64,
                affected_resources: Vec::new(),
                recommendations: vec![
                    format!("Investigate {} usage patterns", resource.as_str()),
                    format!("Identify processes consuming high {}", resource.as_str()),
                    format!(
                        "Consider scaling resources if {} usage remains high",
                        resource.as_str()
                    ),
                ],
                detail: IssueDetail::HighUsage {
                    resource,
                    metric_name: metric_name.to_string(),
                    threshold,
                    peak_value: run.peak,
                    avg_value,
                    current_value: run.values.last().copied().unwrap_or(0.0),
                    sustained_duration,
                },
            });
        }

        issues.sort_by(|a, b| b.severity.cmp(&a.severity));
        Ok(issues)
    }

    /// Point-in-time check of the most recent sample against the disk
    /// threshold.
    pub async fn find_disk_space_issues(&self, window: Window) -> Result<Vec<Issue>> {
        let threshold = self.thresholds.disk_space_critical;
        let rows = self.store.get_system_metrics(window.start, window.end, Some(1)).await?;
        let Some(latest) = rows.first() else {
            return Ok(Vec::new());
        };
        let Some(disk_percent) = latest.disk_percent else {
            return Ok(Vec::new());
        };
        if disk_percent < threshold {
            return Ok(Vec::new());
        }

        let severity = (70 + (3.0 * (disk_percent - threshold)) as i64).min(100);
        let disk_total = latest.disk_total.unwrap_or(0);
        let disk_used = latest.disk_used.unwrap_or(0);

        Ok(vec![Issue {
            severity,
            title: "Low Disk Space".to_string(),
            description: format!(
                "Disk usage at {disk_percent:.1}% (threshold: {threshold}%)"
            ),
            first_seen: latest.ts,
            last_seen: latest.ts,
            occurrence_count: 1,
            affected_resources: Vec::new(),
            recommendations: vec![
                "Clean up old log files".to_string(),
                "Remove temporary files".to_string(),
                "Archive or delete old data".to_string(),
                "Consider expanding disk capacity".to_string(),
            ],
            detail: IssueDetail::DiskSpace {
                disk_total,
                disk_used,
                disk_available: disk_total - disk_used,
                usage_percent: disk_percent,
                threshold,
            },
        }])
    }

    // ========================================================================
    // Errors
    // ========================================================================

    /// Bucket error events by (hour, source); a source spikes when its
    /// most recent bucket reaches the configured multiple of the mean of
    /// its prior buckets.
    pub async fn find_error_spikes(&self, window: Window) -> Result<Vec<Issue>> {
        let multiplier = self.thresholds.error_spike_multiplier;
        let events = self
            .store
            .get_log_events(window.start, window.end, None, Some("ERROR"), Some(SCAN_LIMIT))
            .await?;
        if events.len() < MIN_SPIKE_EVENTS {
            return Ok(Vec::new());
        }

        let mut buckets: HashMap<String, BTreeMap<i64, i64>> = HashMap::new();
        for event in &events {
            let hour = event.ts / 3600;
            *buckets.entry(event.source.clone()).or_default().entry(hour).or_default() += 1;
        }

        let mut spikes = Vec::new();
        for (source, hours) in buckets {
            if hours.len() < 2 {
                continue;
            }
            let counts: Vec<i64> = hours.values().copied().collect();
            let latest = *counts.last().expect("non-empty buckets");
            let prior = &counts[..counts.len() - 1];
            let baseline = prior.iter().sum::<i64>() as f64 / prior.len() as f64;
            if baseline <= 0.0 || (latest as f64) < baseline * multiplier {
                continue;
            }

            let spike_factor = latest as f64 / baseline;
            let severity = (60 + ((spike_factor - multiplier) * 10.0) as i64).min(100);
            let sample = events
                .iter()
                .find(|event| event.source == source)
                .map(|event| event.message.clone())
                .unwrap_or_default();
            let first_hour = *hours.keys().next().expect("non-empty buckets");
            let last_hour = *hours.keys().last().expect("non-empty buckets");

            spikes.push(Issue {
                severity,
                title: format!("Error Spike: {source}"),
                description: format!("Error rate increased {spike_factor:.1}x from baseline"),
                first_seen: first_hour * 3600,
                last_seen: last_hour * 3600,
                occurrence_count: latest.max(0) as u64,
                affected_resources: Vec::new(),
                recommendations: vec![
                    format!("Investigate recent changes to {source}"),
                    "Review error logs for root cause".to_string(),
                    "Check for resource constraints".to_string(),
                ],
                detail: IssueDetail::ErrorSpike {
                    source,
                    sample_message: sample,
                    baseline_count: baseline as i64,
                    spike_count: latest,
                    spike_factor,
                },
            });
        }

        spikes.sort_by(|a, b| {
            let fa = match &a.detail {
                IssueDetail::ErrorSpike { spike_factor, .. } => *spike_factor,
                _ => 0.0,
            };
            let fb = match &b.detail {
                IssueDetail::ErrorSpike { spike_factor, .. } => *spike_factor,
                _ => 0.0,
            };
            fb.partial_cmp(&fa).unwrap_or(std::cmp::Ordering::Equal)
        });
        Ok(spikes)
    }

    /// Group error events by `source:action` signature; report signatures
    /// seen at least `min_occurrences` times.
    pub async fn find_recurring_errors(
        &self,
        window: Window,
        min_occurrences: Option<u64>,
    ) -> Result<Vec<Issue>> {
        let min_occurrences = min_occurrences.unwrap_or(5).max(1);
        let events = self
            .store
            .get_log_events(window.start, window.end, None, Some("ERROR"), Some(SCAN_LIMIT))
            .await?;

        let mut counts: BTreeMap<String, u64> = BTreeMap::new();
        let mut samples: HashMap<String, (String, String)> = HashMap::new();
        for event in &events {
            let signature = format!(
                "{}:{}",
                event.source,
                event.action.as_deref().unwrap_or("error")
            );
            *counts.entry(signature.clone()).or_default() += 1;
            samples
                .entry(signature)
                .or_insert_with(|| (event.source.clone(), event.message.clone()));
        }

        let hours = window.hours();
        let mut recurring = Vec::new();
        for (signature, count) in counts {
            if count < min_occurrences {
                continue;
            }
            let severity = (50 + 5 * (count / min_occurrences) as i64).min(100);
            let (source, sample_message) = samples.remove(&signature).unwrap_or_default();

            recurring.push(Issue {
                severity,
                title: format!("Recurring Error: {signature}"),
                description: format!("Error occurred {count} times in {hours} hours"),
                first_seen: window.start,
                last_seen: window.end,
                occurrence_count: count,
                affected_resources: Vec::new(),
                recommendations: vec![
                    "Identify and fix root cause".to_string(),
                    "Add monitoring for this error pattern".to_string(),
                    "Consider implementing retry logic or error handling".to_string(),
                ],
                detail: IssueDetail::RecurringError {
                    source,
                    pattern_signature: signature,
                    sample_message,
                    occurrences_per_hour: count as f64 / hours as f64,
                },
            });
        }

        recurring.sort_by(|a, b| b.occurrence_count.cmp(&a.occurrence_count));
        Ok(recurring)
    }

    /// Event traces whose severity score is in the critical band.
    pub async fn find_critical_errors(&self, window: Window) -> Result<Vec<Issue>> {
        let traces = self
            .store
            .get_traces(window.start, window.end, None, Some(80), Some(100))
            .await?;

        let mut issues: Vec<Issue> = traces
            .into_iter()
            .map(|trace| Issue {
                severity: trace.severity_score.min(100),
                title: format!("Critical Error: {}", trace.source),
                description: trace
                    .message
                    .clone()
                    .unwrap_or_else(|| "Critical error detected".to_string()),
                first_seen: trace.ts,
                last_seen: trace.ts,
                occurrence_count: 1,
                affected_resources: Vec::new(),
                recommendations: vec![
                    "Immediate investigation required".to_string(),
                    "Check system stability".to_string(),
                    "Review error context and causality chain".to_string(),
                ],
                detail: IssueDetail::CriticalError {
                    source: trace.source,
                    error_category: trace.root_cause.unwrap_or_else(|| "unknown".to_string()),
                    sample_message: trace.message.unwrap_or_default(),
                },
            })
            .collect();

        issues.sort_by(|a, b| b.severity.cmp(&a.severity));
        Ok(issues)
    }

    /// Database-category rollups from the persisted error patterns.
    pub async fn find_database_issues(&self, window: Window) -> Result<Vec<Issue>> {
        let patterns = self.store.get_error_patterns(window.start, window.end).await?;

        let mut issues = Vec::new();
        for pattern in patterns
            .by_category
            .iter()
            .filter(|p| p.name.as_deref() == Some("database"))
            .chain(
                patterns
                    .by_type
                    .iter()
                    .filter(|p| p.name.as_deref().is_some_and(|n| n.starts_with("db_"))),
            )
        {
            let error_type = pattern.name.clone().unwrap_or_else(|| "database".to_string());
            issues.push(Issue {
                severity: 70,
                title: format!("Database Errors: {error_type}"),
                description: format!(
                    "Database errors detected: {} occurrences",
                    pattern.count
                ),
                first_seen: window.start,
                last_seen: window.end,
                occurrence_count: pattern.count.max(0) as u64,
                affected_resources: Vec::new(),
                recommendations: vec![
                    "Check database connectivity".to_string(),
                    "Review database logs".to_string(),
                    "Verify database configuration".to_string(),
                    "Check for deadlocks or connection pool exhaustion".to_string(),
                ],
                detail: IssueDetail::DatabaseErrors { error_type },
            });
        }
        Ok(issues)
    }

    // ========================================================================
    // Network
    // ========================================================================

    /// Points more than three standard deviations from the mean
    /// established-connection count.
    pub async fn find_connection_anomalies(&self, window: Window) -> Result<Vec<Issue>> {
        let rows = self
            .store
            .get_network_metrics(window.start, window.end, Some(SCAN_LIMIT))
            .await?;
        if rows.len() < MIN_ANOMALY_POINTS {
            return Ok(Vec::new());
        }

        let counts: Vec<i64> =
            rows.iter().map(|row| row.connections_established.unwrap_or(0)).collect();
        let mean = counts.iter().sum::<i64>() as f64 / counts.len() as f64;
        let variance =
            counts.iter().map(|c| (*c as f64 - mean).powi(2)).sum::<f64>() / counts.len() as f64;
        let std_dev = variance.sqrt();
        if std_dev <= 0.0 {
            return Ok(Vec::new());
        }

        let mut anomalies = Vec::new();
        for row in &rows {
            let connections = row.connections_established.unwrap_or(0);
            let deviation = (connections as f64 - mean).abs();
            if deviation <= 3.0 * std_dev {
                continue;
            }
            let deviation_percent = if mean > 0.0 { deviation / mean * 100.0 } else { 0.0 };

            anomalies.push(Issue {
                severity: (60 + (deviation_percent / 10.0) as i64).min(100),
                title: "Connection Count Anomaly".to_string(),
                description: format!(
                    "Unusual connection count: {connections} (expected ~{mean:.0})"
                ),
                first_seen: row.ts,
                last_seen: row.ts,
                occurrence_count: 1,
                affected_resources: Vec::new(),
                recommendations: vec![
                    "Investigate sudden connection changes".to_string(),
                    "Check for connection leaks".to_string(),
                    "Review network activity logs".to_string(),
                ],
                detail: IssueDetail::ConnectionAnomaly {
                    connection_count: connections,
                    expected_value: mean,
                    actual_value: connections,
                    deviation_percent,
                },
            });
        }
        Ok(anomalies)
    }

    /// Samples whose error+drop rate per packet crosses the threshold.
    pub async fn find_network_errors(&self, window: Window) -> Result<Vec<Issue>> {
        let threshold = self.thresholds.network_error_rate;
        let rows = self
            .store
            .get_network_metrics(window.start, window.end, Some(SCAN_LIMIT))
            .await?;

        let mut issues = Vec::new();
        for row in &rows {
            let errors = row.errors_in.unwrap_or(0) + row.errors_out.unwrap_or(0);
            let drops = row.drops_in.unwrap_or(0) + row.drops_out.unwrap_or(0);
            let packets = row.packets_recv.unwrap_or(0) + row.packets_sent.unwrap_or(0);
            if packets <= 0 {
                continue;
            }

            let error_rate = (errors + drops) as f64 / packets as f64 * 100.0;
            if error_rate < threshold {
                continue;
            }

            issues.push(Issue {
                severity: (60 + error_rate as i64).min(100),
                title: "High Network Error Rate".to_string(),
                description: format!("Network error rate at {error_rate:.2}%"),
                first_seen: row.ts,
                last_seen: row.ts,
                occurrence_count: 1,
                affected_resources: Vec::new(),
                recommendations: vec![
                    "Check network hardware".to_string(),
                    "Review network configuration".to_string(),
                    "Investigate packet loss causes".to_string(),
                ],
                detail: IssueDetail::NetworkErrorRate {
                    connection_count: row.connections_established.unwrap_or(0),
                    error_count: errors + drops,
                    drop_count: drops,
                    error_rate,
                },
            });
        }
        Ok(issues)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{LogEvent, NetworkMetric, SystemMetric};
    use tempfile::TempDir;

    async fn scratch() -> (TempDir, Store) {
        let dir = TempDir::new().unwrap();
        let store = Store::open(dir.path()).await.unwrap();
        (dir, store)
    }

    fn detector(store: &Store) -> IssueDetector<'_> {
        IssueDetector::new(store, Thresholds::default())
    }

    fn failed_login(ts: i64, ip: &str, user: &str) -> LogEvent {
        let mut event = LogEvent::new(ts, "auth", format!("Failed password for {user} from {ip}"));
        event.level = Some("WARNING".to_string());
        event.ip = Some(ip.to_string());
        event.user = Some(user.to_string());
        event.action = Some("failed_login".to_string());
        event
    }

    #[tokio::test]
    async fn brute_force_below_threshold_is_quiet() {
        let (_dir, store) = scratch().await;
        for i in 0..4 {
            store.insert_log_event(&failed_login(1000 + i, "203.0.113.42", "root")).await.unwrap();
        }
        let alerts = detector(&store)
            .find_brute_force_attempts(Window::between(0, 2000), None)
            .await
            .unwrap();
        assert!(alerts.is_empty());
    }

    #[tokio::test]
    async fn brute_force_burst_gets_tight_span_bonus() {
        let (_dir, store) = scratch().await;
        for i in 0..10 {
            let user = if i % 2 == 0 { "root" } else { "admin" };
            store
                .insert_log_event(&failed_login(1000 + i * 2, "203.0.113.42", user))
                .await
                .unwrap();
        }
        let alerts = detector(&store)
            .find_brute_force_attempts(Window::between(0, 2000), None)
            .await
            .unwrap();

        assert_eq!(alerts.len(), 1);
        let alert = &alerts[0];
        // 50 + 5*(10-5) = 75, +20 burst bonus = 95.
        assert_eq!(alert.severity, 95);
        match &alert.detail {
            IssueDetail::BruteForce { attempt_count, unique_users, time_span, .. } => {
                assert_eq!(*attempt_count, 10);
                assert_eq!(*unique_users, 2);
                assert_eq!(*time_span, 18);
            }
            other => panic!("unexpected detail {other:?}"),
        }
    }

    #[tokio::test]
    async fn sustained_cpu_needs_three_samples() {
        let (_dir, store) = scratch().await;
        // Two hot samples, then cool: no run.
        for (i, cpu) in [90.0, 91.0, 50.0].iter().enumerate() {
            store
                .insert_system_metric(&SystemMetric {
                    cpu_percent: Some(*cpu),
                    ..SystemMetric::at(1000 + (i as i64) * 60)
                })
                .await
                .unwrap();
        }
        let issues =
            detector(&store).find_high_cpu_periods(Window::between(0, 10_000)).await.unwrap();
        assert!(issues.is_empty());
    }

    #[tokio::test]
    async fn sustained_cpu_run_is_reported_with_duration() {
        let (_dir, store) = scratch().await;
        for i in 0..10 {
            store
                .insert_system_metric(&SystemMetric {
                    cpu_percent: Some(90.0),
                    ..SystemMetric::at(1000 + i * 60)
                })
                .await
                .unwrap();
        }
        let issues =
            detector(&store).find_high_cpu_periods(Window::between(0, 10_000)).await.unwrap();

        assert_eq!(issues.len(), 1);
        // 60 + (90 - 85) = 65.
        assert_eq!(issues[0].severity, 65);
        match &issues[0].detail {
            IssueDetail::HighUsage { peak_value, sustained_duration, .. } => {
                assert_eq!(*peak_value, 90.0);
                assert_eq!(*sustained_duration, 540);
            }
            other => panic!("unexpected detail {other:?}"),
        }
    }

    #[tokio::test]
    async fn disk_alert_uses_most_recent_sample() {
        let (_dir, store) = scratch().await;
        store
            .insert_system_metric(&SystemMetric {
                disk_percent: Some(95.0),
                disk_total: Some(1000),
                disk_used: Some(950),
                ..SystemMetric::at(1000)
            })
            .await
            .unwrap();
        store
            .insert_system_metric(&SystemMetric { disk_percent: Some(50.0), ..SystemMetric::at(2000) })
            .await
            .unwrap();

        // The newest sample is healthy, so no alert.
        let issues =
            detector(&store).find_disk_space_issues(Window::between(0, 3000)).await.unwrap();
        assert!(issues.is_empty());
    }

    #[tokio::test]
    async fn disk_alert_severity_scales_with_excess() {
        let (_dir, store) = scratch().await;
        store
            .insert_system_metric(&SystemMetric {
                disk_percent: Some(95.0),
                disk_total: Some(1000),
                disk_used: Some(950),
                ..SystemMetric::at(1000)
            })
            .await
            .unwrap();

        let issues =
            detector(&store).find_disk_space_issues(Window::between(0, 3000)).await.unwrap();
        assert_eq!(issues.len(), 1);
        // 70 + 3*(95-90) = 85.
        assert_eq!(issues[0].severity, 85);
    }

    #[tokio::test]
    async fn error_spike_requires_enough_events() {
        let (_dir, store) = scratch().await;
        for i in 0..9 {
            let mut event = LogEvent::new(i * 100, "django", "boom");
            event.level = Some("ERROR".to_string());
            store.insert_log_event(&event).await.unwrap();
        }
        let issues = detector(&store).find_error_spikes(Window::between(0, 10_000)).await.unwrap();
        assert!(issues.is_empty());
    }

    #[tokio::test]
    async fn error_spike_detects_burst_hour() {
        let (_dir, store) = scratch().await;
        // Two quiet hours of 2 errors each, then a 12-error hour.
        for hour in 0..2_i64 {
            for i in 0..2 {
                let mut event = LogEvent::new(hour * 3600 + i * 10, "django", "boom");
                event.level = Some("ERROR".to_string());
                store.insert_log_event(&event).await.unwrap();
            }
        }
        for i in 0..12 {
            let mut event = LogEvent::new(2 * 3600 + i * 10, "django", "boom");
            event.level = Some("ERROR".to_string());
            store.insert_log_event(&event).await.unwrap();
        }

        let issues = detector(&store).find_error_spikes(Window::between(0, 10 * 3600)).await.unwrap();
        assert_eq!(issues.len(), 1);
        match &issues[0].detail {
            IssueDetail::ErrorSpike { spike_factor, spike_count, .. } => {
                assert_eq!(*spike_count, 12);
                assert!((spike_factor - 6.0).abs() < 1e-9);
            }
            other => panic!("unexpected detail {other:?}"),
        }
    }

    #[tokio::test]
    async fn connection_anomaly_requires_ten_points() {
        let (_dir, store) = scratch().await;
        for i in 0..9 {
            store
                .insert_network_metric(&NetworkMetric {
                    connections_established: Some(if i == 8 { 900 } else { 10 }),
                    ..NetworkMetric::at(1000 + i * 60)
                })
                .await
                .unwrap();
        }
        let issues =
            detector(&store).find_connection_anomalies(Window::between(0, 10_000)).await.unwrap();
        assert!(issues.is_empty());
    }

    #[tokio::test]
    async fn connection_anomaly_flags_outlier() {
        let (_dir, store) = scratch().await;
        for i in 0..12 {
            store
                .insert_network_metric(&NetworkMetric {
                    connections_established: Some(if i == 11 { 500 } else { 10 }),
                    ..NetworkMetric::at(1000 + i * 60)
                })
                .await
                .unwrap();
        }
        let issues =
            detector(&store).find_connection_anomalies(Window::between(0, 10_000)).await.unwrap();
        assert_eq!(issues.len(), 1);
        match issues[0].detail {
            IssueDetail::ConnectionAnomaly { actual_value, .. } => assert_eq!(actual_value, 500),
            ref other => panic!("unexpected detail {other:?}"),
        }
    }

    #[tokio::test]
    async fn network_error_rate_threshold() {
        let (_dir, store) = scratch().await;
        // 6% error rate: 60 errors over 1000 packets.
        store
            .insert_network_metric(&NetworkMetric {
                packets_sent: Some(500),
                packets_recv: Some(500),
                errors_in: Some(30),
                errors_out: Some(20),
                drops_in: Some(5),
                drops_out: Some(5),
                ..NetworkMetric::at(1000)
            })
            .await
            .unwrap();
        // 1% error rate: below threshold.
        store
            .insert_network_metric(&NetworkMetric {
                packets_sent: Some(500),
                packets_recv: Some(500),
                errors_in: Some(10),
                ..NetworkMetric::at(1100)
            })
            .await
            .unwrap();

        let issues = detector(&store).find_network_errors(Window::between(0, 2000)).await.unwrap();
        assert_eq!(issues.len(), 1);
        match issues[0].detail {
            IssueDetail::NetworkErrorRate { error_rate, .. } => {
                assert!((error_rate - 6.0).abs() < 1e-9);
            }
            ref other => panic!("unexpected detail {other:?}"),
        }
    }

    #[tokio::test]
    async fn recurring_errors_group_by_signature() {
        let (_dir, store) = scratch().await;
        for i in 0..6 {
            let mut event = LogEvent::new(1000 + i, "django", "db down");
            event.level = Some("ERROR".to_string());
            store.insert_log_event(&event).await.unwrap();
        }
        let issues = detector(&store)
            .find_recurring_errors(Window::between(0, 3600), None)
            .await
            .unwrap();
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].occurrence_count, 6);
        // 50 + 5*floor(6/5) = 55.
        assert_eq!(issues[0].severity, 55);
        match &issues[0].detail {
            IssueDetail::RecurringError { pattern_signature, .. } => {
                assert_eq!(pattern_signature, "django:error");
            }
            other => panic!("unexpected detail {other:?}"),
        }
    }
}
