//! Composite analysis: health and security reports, error trends, and
//! resource usage regression over stored data.

use std::collections::BTreeMap;

use chrono::Utc;

use crate::config::Thresholds;
use crate::storage::store::Result;
use crate::storage::{Store, SystemMetricRow};

use super::detector::IssueDetector;
use super::models::{
    ErrorTrendReport, HealthReport, HealthStatus, Issue, SecurityPosture, SecurityReport,
    SeverityBand, TopThreatIp, Trend, TrendAnomaly, TrendDirection, TrendReport, Window,
};

/// Row cap for analysis scans.
const SCAN_LIMIT: i64 = 10_000;

/// Slope magnitude below which a series counts as stable.
const STABLE_SLOPE: f64 = 0.01;

pub struct AnalysisEngine<'a> {
    store: &'a Store,
    detector: IssueDetector<'a>,
}

impl<'a> AnalysisEngine<'a> {
    #[must_use]
    pub fn new(store: &'a Store, thresholds: Thresholds) -> Self {
        Self { store, detector: IssueDetector::new(store, thresholds) }
    }

    // ========================================================================
    // Health
    // ========================================================================

    /// Run every detector family, bin issues by severity band, and weigh
    /// per-component sub-scores into one health score.
    pub async fn analyze_system_health(&self, hours: i64) -> Result<HealthReport> {
        let window = Window::last_hours(hours);

        let security = self.security_issues(window).await?;
        let performance = self.performance_issues(window).await?;
        let errors = self.error_issues(window).await?;
        let network = self.network_issues(window).await?;

        let security_score = component_score(&security);
        let performance_score = component_score(&performance);
        let error_score = component_score(&errors);
        let network_score = component_score(&network);

        let mut all_issues = security;
        all_issues.extend(performance);
        all_issues.extend(errors);
        all_issues.extend(network);

        let mut critical = 0;
        let mut high = 0;
        let mut medium = 0;
        let mut low = 0;
        for issue in &all_issues {
            match issue.severity_band() {
                SeverityBand::Critical => critical += 1,
                SeverityBand::High => high += 1,
                SeverityBand::Medium => medium += 1,
                SeverityBand::Low => low += 1,
            }
        }

        let health_score = (security_score as f64 * 0.30
            + performance_score as f64 * 0.25
            + error_score as f64 * 0.25
            + network_score as f64 * 0.20)
            .round() as i64;
        let status = if health_score >= 80 {
            HealthStatus::Healthy
        } else if health_score >= 50 {
            HealthStatus::Degraded
        } else {
            HealthStatus::Critical
        };

        let recommendations = health_recommendations(&all_issues, health_score, status);

        all_issues.sort_by(|a, b| b.severity.cmp(&a.severity));
        let total_issues = all_issues.len();
        let top_issues: Vec<Issue> = all_issues.into_iter().take(5).collect();

        Ok(HealthReport {
            timestamp: Utc::now().timestamp(),
            time_window_hours: hours,
            health_score,
            status,
            security_score,
            performance_score,
            error_score,
            network_score,
            total_issues,
            critical_issues: critical,
            high_issues: high,
            medium_issues: medium,
            low_issues: low,
            top_issues,
            recommendations,
        })
    }

    async fn security_issues(&self, window: Window) -> Result<Vec<Issue>> {
        let mut issues = self.detector.find_brute_force_attempts(window, None).await?;
        issues.extend(self.detector.find_suspicious_ips(None).await?);
        issues.extend(self.detector.find_unauthorized_access_attempts(window).await?);
        issues.extend(self.detector.find_banned_ips(window).await?);
        Ok(issues)
    }

    async fn performance_issues(&self, window: Window) -> Result<Vec<Issue>> {
        let mut issues = self.detector.find_high_cpu_periods(window).await?;
        issues.extend(self.detector.find_high_memory_periods(window).await?);
        issues.extend(self.detector.find_disk_space_issues(Window::last_hours(1)).await?);
        Ok(issues)
    }

    async fn error_issues(&self, window: Window) -> Result<Vec<Issue>> {
        let mut issues = self.detector.find_error_spikes(window).await?;
        issues.extend(self.detector.find_recurring_errors(window, None).await?);
        issues.extend(self.detector.find_critical_errors(window).await?);
        issues.extend(self.detector.find_database_issues(window).await?);
        Ok(issues)
    }

    async fn network_issues(&self, window: Window) -> Result<Vec<Issue>> {
        let mut issues = self.detector.find_connection_anomalies(window).await?;
        issues.extend(self.detector.find_network_errors(window).await?);
        Ok(issues)
    }

    // ========================================================================
    // Security posture
    // ========================================================================

    /// Count attack signals over the window and derive the risk score:
    /// `min(100, 10*high_threat_ips + 15*brute_force +
    /// min(30, failed_logins/10))`.
    pub async fn analyze_security_posture(&self, hours: i64) -> Result<SecurityReport> {
        let window = Window::last_hours(hours);
        let timestamp = Utc::now().timestamp();

        let high_threat =
            self.store.get_high_threat_ips(self.detector.thresholds().threat_score_high).await?;
        let events = self
            .store
            .get_log_events(window.start, window.end, None, None, Some(SCAN_LIMIT))
            .await?;
        let failed_logins =
            events.iter().filter(|e| e.action.as_deref() == Some("failed_login")).count();
        let bans = events.iter().filter(|e| e.action.as_deref() == Some("ban")).count();

        let brute_force = self.detector.find_brute_force_attempts(window, None).await?;
        let suspicious = self.detector.find_suspicious_ips(None).await?;

        let top_threat_ips: Vec<TopThreatIp> = high_threat
            .iter()
            .take(5)
            .map(|rep| TopThreatIp {
                ip: rep.ip.clone(),
                threat_score: rep.threat_score,
                failed_logins: rep.failed_login_count,
                bans: rep.banned_count,
            })
            .collect();

        let risk_score = (10 * high_threat.len() as i64
            + 15 * brute_force.len() as i64
            + (failed_logins as i64 / 10).min(30))
        .min(100);
        let posture = SecurityPosture::from_risk(risk_score);

        let mut recommendations = Vec::new();
        if !brute_force.is_empty() {
            recommendations.push("Implement rate limiting to prevent brute force attacks".to_string());
        }
        if high_threat.len() > 5 {
            recommendations.push("Review and update IP blacklist".to_string());
        }
        if failed_logins > 50 {
            recommendations.push("Investigate spike in failed login attempts".to_string());
        }
        if matches!(posture, SecurityPosture::Poor | SecurityPosture::Critical) {
            recommendations.push("Enable two-factor authentication".to_string());
            recommendations.push("Review firewall rules and access controls".to_string());
        }
        if recommendations.is_empty() {
            recommendations.push("Security posture is good - maintain current monitoring".to_string());
        }

        let total_threats = brute_force.len() + suspicious.len();
        let mut recent_attacks = brute_force;
        recent_attacks.extend(suspicious);

        Ok(SecurityReport {
            timestamp,
            time_window_hours: hours,
            total_threats,
            high_threat_ips: high_threat.len(),
            failed_login_attempts: failed_logins,
            successful_bans: bans,
            top_threat_ips,
            recent_attacks,
            risk_score,
            security_posture: posture,
            recommendations,
        })
    }

    // ========================================================================
    // Error trends
    // ========================================================================

    /// Split the window at its midpoint and compare halves:
    /// second/first > 1.2 is worsening, < 0.8 improving, else stable.
    pub async fn analyze_error_trends(&self, days: i64) -> Result<ErrorTrendReport> {
        let window = Window::last_days(days);
        let timestamp = Utc::now().timestamp();

        let events = self
            .store
            .get_log_events(window.start, window.end, None, Some("ERROR"), Some(SCAN_LIMIT))
            .await?;
        let patterns = self.store.get_error_patterns(window.start, window.end).await?;

        let total_errors = events.len();
        let error_rate = if days > 0 { total_errors as f64 / (days * 24) as f64 } else { 0.0 };

        let mut errors_by_source: BTreeMap<String, u64> = BTreeMap::new();
        for event in &events {
            *errors_by_source.entry(event.source.clone()).or_default() += 1;
        }
        let unique_error_types = errors_by_source.len();

        let mut errors_by_category: BTreeMap<String, u64> = BTreeMap::new();
        for pattern in &patterns.by_category {
            let category = pattern.name.clone().unwrap_or_else(|| "unknown".to_string());
            *errors_by_category.entry(category).or_default() += pattern.count.max(0) as u64;
        }

        let recurring = self.detector.find_recurring_errors(window, Some(3)).await?;
        let spikes = self.detector.find_error_spikes(window).await?;
        let critical = self.detector.find_critical_errors(window).await?;
        let recurring_count = recurring.len();
        let critical_count = critical.len();

        let mut top_errors = recurring;
        top_errors.extend(spikes);
        top_errors.extend(critical);
        top_errors.truncate(10);

        let midpoint = window.start + (window.end - window.start) / 2;
        let first_half = events.iter().filter(|e| e.ts < midpoint).count();
        let second_half = events.iter().filter(|e| e.ts >= midpoint).count();
        let trend = if first_half == 0 {
            Trend::Stable
        } else {
            let ratio = second_half as f64 / first_half as f64;
            if ratio > 1.2 {
                Trend::Worsening
            } else if ratio < 0.8 {
                Trend::Improving
            } else {
                Trend::Stable
            }
        };

        let mut recommendations = Vec::new();
        if trend == Trend::Worsening {
            recommendations.push("Error rate is increasing - investigate recent changes".to_string());
        }
        if total_errors > 100 {
            recommendations.push("High error volume - prioritize error resolution".to_string());
        }
        if recurring_count > 0 {
            recommendations.push(format!("Fix {recurring_count} recurring error pattern(s)"));
        }
        if critical_count > 0 {
            recommendations.push(format!("Address {critical_count} critical error(s) immediately"));
        }
        if errors_by_category.get("database").copied().unwrap_or(0) > 10 {
            recommendations
                .push("Database errors detected - check connection pool and queries".to_string());
        }
        if errors_by_category.get("resource").copied().unwrap_or(0) > 10 {
            recommendations
                .push("Resource errors detected - review memory and disk usage".to_string());
        }
        if recommendations.is_empty() {
            recommendations.push("Error rate is acceptable - continue monitoring".to_string());
        }

        Ok(ErrorTrendReport {
            timestamp,
            time_period_days: days,
            total_errors,
            error_rate,
            unique_error_types,
            errors_by_source,
            errors_by_category,
            top_errors,
            trend,
            recommendations,
        })
    }

    // ========================================================================
    // Resource trends
    // ========================================================================

    /// Per-metric descriptive statistics plus least-squares regression
    /// for cpu/memory/disk percent series.
    pub async fn get_resource_usage_trends(
        &self,
        days: i64,
    ) -> Result<BTreeMap<String, TrendReport>> {
        let window = Window::last_days(days);
        let mut rows = self
            .store
            .get_system_metrics(window.start, window.end, Some(SCAN_LIMIT))
            .await?;
        rows.sort_by_key(|row| row.ts);

        let mut trends = BTreeMap::new();
        if rows.is_empty() {
            return Ok(trends);
        }

        for (name, accessor) in [
            ("cpu_percent", (|r| r.cpu_percent) as fn(&SystemMetricRow) -> Option<f64>),
            ("memory_percent", |r| r.memory_percent),
            ("disk_percent", |r| r.disk_percent),
        ] {
            let series: Vec<(i64, f64)> =
                rows.iter().filter_map(|row| accessor(row).map(|v| (row.ts, v))).collect();
            trends.insert(name.to_string(), metric_trend(name, days, &series));
        }

        Ok(trends)
    }
}

/// Component sub-score: each point of issue severity costs a fifth of a
/// point, floored at zero.
fn component_score(issues: &[Issue]) -> i64 {
    if issues.is_empty() {
        return 100;
    }
    let total_severity: i64 = issues.iter().map(|issue| issue.severity).sum();
    (100 - total_severity / 5).max(0)
}

fn health_recommendations(issues: &[Issue], health_score: i64, status: HealthStatus) -> Vec<String> {
    use super::models::IssueClass;

    let mut recommendations = Vec::new();
    if status == HealthStatus::Critical {
        recommendations
            .push("URGENT: System health is critical - immediate action required".to_string());
    }

    let security = issues.iter().filter(|i| i.class() == IssueClass::Security).count();
    let performance = issues.iter().filter(|i| i.class() == IssueClass::Performance).count();
    let errors = issues.iter().filter(|i| i.class() == IssueClass::Error).count();

    if security > 0 {
        recommendations.push(format!(
            "Address {security} security issue(s) - review authentication and access controls"
        ));
    }
    if performance > 0 {
        recommendations.push(format!(
            "Investigate {performance} performance issue(s) - check resource utilization"
        ));
    }
    if errors > 5 {
        recommendations
            .push(format!("High error rate detected ({errors} issues) - review application logs"));
    }
    if health_score < 80 {
        recommendations.push("Schedule maintenance window to address system issues".to_string());
    }
    if recommendations.is_empty() {
        recommendations.push("System is healthy - continue monitoring".to_string());
    }
    recommendations
}

/// Statistics and regression over one (ts, value) series.
fn metric_trend(name: &str, days: i64, series: &[(i64, f64)]) -> TrendReport {
    let values: Vec<f64> = series.iter().map(|(_, v)| *v).collect();
    if values.is_empty() {
        return TrendReport {
            metric_name: name.to_string(),
            time_period_days: days,
            data_points: 0,
            min_value: 0.0,
            max_value: 0.0,
            avg_value: 0.0,
            median_value: 0.0,
            std_deviation: 0.0,
            trend_direction: TrendDirection::Stable,
            trend_strength: 0.0,
            anomaly_count: 0,
            anomalies: Vec::new(),
        };
    }

    let n = values.len();
    let min_value = values.iter().copied().fold(f64::INFINITY, f64::min);
    let max_value = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let avg_value = values.iter().sum::<f64>() / n as f64;

    let mut sorted = values.clone();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let median_value = if n % 2 == 0 {
        (sorted[n / 2 - 1] + sorted[n / 2]) / 2.0
    } else {
        sorted[n / 2]
    };

    let variance = values.iter().map(|v| (v - avg_value).powi(2)).sum::<f64>() / n as f64;
    let std_deviation = variance.sqrt();

    let (trend_direction, trend_strength) = regression(&values);

    let mut anomalies = Vec::new();
    for (i, (ts, value)) in series.iter().enumerate() {
        if (value - avg_value).abs() > 2.0 * std_deviation && std_deviation > 0.0 {
            anomalies.push(TrendAnomaly {
                index: i,
                value: *value,
                deviation: (value - avg_value).abs() / std_deviation,
                timestamp: *ts,
            });
        }
    }
    let anomaly_count = anomalies.len();
    anomalies.truncate(10);

    TrendReport {
        metric_name: name.to_string(),
        time_period_days: days,
        data_points: n,
        min_value,
        max_value,
        avg_value,
        median_value,
        std_deviation,
        trend_direction,
        trend_strength,
        anomaly_count,
        anomalies,
    }
}

/// Least-squares slope over the sample index; strength is sqrt(R^2)
/// bounded to [0, 1].
fn regression(values: &[f64]) -> (TrendDirection, f64) {
    let n = values.len();
    if n < 2 {
        return (TrendDirection::Stable, 0.0);
    }

    let x_mean = (n - 1) as f64 / 2.0;
    let y_mean = values.iter().sum::<f64>() / n as f64;

    let mut numerator = 0.0;
    let mut denominator = 0.0;
    for (i, value) in values.iter().enumerate() {
        let dx = i as f64 - x_mean;
        numerator += dx * (value - y_mean);
        denominator += dx * dx;
    }
    if denominator == 0.0 {
        return (TrendDirection::Stable, 0.0);
    }
    let slope = numerator / denominator;

    let ss_tot: f64 = values.iter().map(|v| (v - y_mean).powi(2)).sum();
    if ss_tot == 0.0 {
        return (TrendDirection::Stable, 0.0);
    }
    let intercept = y_mean - slope * x_mean;
    let ss_res: f64 = values
        .iter()
        .enumerate()
        .map(|(i, v)| (v - (slope * i as f64 + intercept)).powi(2))
        .sum();
    let r_squared = 1.0 - ss_res / ss_tot;
    let strength = r_squared.abs().sqrt().min(1.0);

    let direction = if slope.abs() < STABLE_SLOPE {
        TrendDirection::Stable
    } else if slope > 0.0 {
        TrendDirection::Increasing
    } else {
        TrendDirection::Decreasing
    };

    (direction, strength)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{LogEvent, SystemMetric};
    use tempfile::TempDir;

    async fn scratch() -> (TempDir, Store) {
        let dir = TempDir::new().unwrap();
        let store = Store::open(dir.path()).await.unwrap();
        (dir, store)
    }

    #[test]
    fn component_score_floors_at_zero() {
        assert_eq!(component_score(&[]), 100);
        let issue = |severity| Issue {
            severity,
            title: String::new(),
            description: String::new(),
            first_seen: 0,
            last_seen: 0,
            occurrence_count: 1,
            affected_resources: Vec::new(),
            recommendations: Vec::new(),
            detail: super::super::models::IssueDetail::BannedIp { ip: String::new() },
        };
        assert_eq!(component_score(&[issue(100)]), 80);
        assert_eq!(component_score(&[issue(100), issue(100), issue(100), issue(100), issue(100)]), 0);
    }

    #[test]
    fn regression_detects_direction() {
        let increasing: Vec<f64> = (0..20).map(|i| f64::from(i) * 2.0).collect();
        let (dir, strength) = regression(&increasing);
        assert_eq!(dir, TrendDirection::Increasing);
        assert!((strength - 1.0).abs() < 1e-9);

        let flat = vec![5.0; 20];
        assert_eq!(regression(&flat).0, TrendDirection::Stable);

        let decreasing: Vec<f64> = (0..20).map(|i| 100.0 - f64::from(i)).collect();
        assert_eq!(regression(&decreasing).0, TrendDirection::Decreasing);
    }

    #[test]
    fn metric_trend_flags_two_sigma_outliers() {
        let mut series: Vec<(i64, f64)> = (0..50).map(|i| (i64::from(i), 50.0)).collect();
        series.push((50, 50.0));
        series[25] = (25, 95.0);
        let report = metric_trend("cpu_percent", 7, &series);
        assert_eq!(report.anomaly_count, 1);
        assert_eq!(report.anomalies[0].index, 25);
    }

    #[tokio::test]
    async fn healthy_system_scores_high() {
        let (_dir, store) = scratch().await;
        let engine = AnalysisEngine::new(&store, Thresholds::default());
        let report = engine.analyze_system_health(24).await.unwrap();
        assert_eq!(report.health_score, 100);
        assert_eq!(report.status, HealthStatus::Healthy);
        assert_eq!(report.total_issues, 0);
        assert_eq!(report.recommendations, vec!["System is healthy - continue monitoring"]);
    }

    #[tokio::test]
    async fn security_report_counts_signals() {
        let (_dir, store) = scratch().await;
        let now = Utc::now().timestamp();
        for i in 0..20 {
            let mut event = LogEvent::new(now - 100 + i, "auth", "Failed password");
            event.action = Some("failed_login".to_string());
            event.ip = Some("203.0.113.77".to_string());
            event.user = Some("root".to_string());
            store.insert_log_event(&event).await.unwrap();
        }

        let engine = AnalysisEngine::new(&store, Thresholds::default());
        let report = engine.analyze_security_posture(24).await.unwrap();
        assert_eq!(report.failed_login_attempts, 20);
        assert_eq!(report.total_threats, 1);
        // 15 (one brute-force group) + min(30, 20/10) = 17.
        assert_eq!(report.risk_score, 17);
        assert_eq!(report.security_posture, SecurityPosture::Good);
    }

    #[tokio::test]
    async fn error_trend_worsening_when_second_half_grows() {
        let (_dir, store) = scratch().await;
        let now = Utc::now().timestamp();
        let start = now - 14 * 86_400;
        // Days 0..6: 10 errors total; days 7..13: 30 errors total.
        for i in 0..10 {
            let mut event = LogEvent::new(start + i * 3600, "django", "boom");
            event.level = Some("ERROR".to_string());
            store.insert_log_event(&event).await.unwrap();
        }
        for i in 0..30 {
            let mut event = LogEvent::new(start + 8 * 86_400 + i * 3600, "django", "boom");
            event.level = Some("ERROR".to_string());
            store.insert_log_event(&event).await.unwrap();
        }

        let engine = AnalysisEngine::new(&store, Thresholds::default());
        let report = engine.analyze_error_trends(14).await.unwrap();
        assert_eq!(report.total_errors, 40);
        assert_eq!(report.trend, Trend::Worsening);
    }

    #[tokio::test]
    async fn resource_trends_cover_percent_metrics() {
        let (_dir, store) = scratch().await;
        let now = Utc::now().timestamp();
        for i in 0..10 {
            store
                .insert_system_metric(&SystemMetric {
                    cpu_percent: Some(10.0 + f64::from(i)),
                    memory_percent: Some(50.0),
                    ..SystemMetric::at(now - 1000 + i64::from(i) * 60)
                })
                .await
                .unwrap();
        }

        let engine = AnalysisEngine::new(&store, Thresholds::default());
        let trends = engine.get_resource_usage_trends(7).await.unwrap();
        let cpu = &trends["cpu_percent"];
        assert_eq!(cpu.data_points, 10);
        assert_eq!(cpu.trend_direction, TrendDirection::Increasing);
        assert_eq!(trends["memory_percent"].trend_direction, TrendDirection::Stable);
    }
}
