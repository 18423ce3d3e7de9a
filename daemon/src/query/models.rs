//! Typed results for the issue detector and analysis engine.

use chrono::Utc;
use serde::Serialize;

/// Analysis time range in unix seconds, inclusive.
#[derive(Debug, Clone, Copy)]
pub struct Window {
    pub start: i64,
    pub end: i64,
}

impl Window {
    #[must_use]
    pub fn between(start: i64, end: i64) -> Self {
        Self { start, end }
    }

    #[must_use]
    pub fn last_hours(hours: i64) -> Self {
        let end = Utc::now().timestamp();
        Self { start: end - hours * 3600, end }
    }

    #[must_use]
    pub fn last_days(days: i64) -> Self {
        let end = Utc::now().timestamp();
        Self { start: end - days * 86_400, end }
    }

    /// Whole hours spanned, at least one.
    #[must_use]
    pub fn hours(&self) -> i64 {
        ((self.end - self.start) / 3600).max(1)
    }
}

/// Discretized severity label.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SeverityBand {
    Low,
    Medium,
    High,
    Critical,
}

impl SeverityBand {
    /// Band edges: low [0,30], medium [31,60], high [61,80],
    /// critical [81,100].
    #[must_use]
    pub fn from_score(score: i64) -> Self {
        match score {
            ..=30 => Self::Low,
            31..=60 => Self::Medium,
            61..=80 => Self::High,
            _ => Self::Critical,
        }
    }
}

/// Broad issue family, used for component scoring.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum IssueClass {
    Security,
    Performance,
    Error,
    Network,
}

/// Which resource a sustained-usage issue concerns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceKind {
    Cpu,
    Memory,
    Disk,
}

impl ResourceKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Cpu => "cpu",
            Self::Memory => "memory",
            Self::Disk => "disk",
        }
    }
}

/// One detected issue: the shared fields every detector fills plus a
/// tagged per-kind payload.
#[derive(Debug, Clone, Serialize)]
pub struct Issue {
    pub severity: i64,
    pub title: String,
    pub description: String,
    pub first_seen: i64,
    pub last_seen: i64,
    pub occurrence_count: u64,
    pub affected_resources: Vec<String>,
    pub recommendations: Vec<String>,
    #[serde(flatten)]
    pub detail: IssueDetail,
}

impl Issue {
    #[must_use]
    pub fn severity_band(&self) -> SeverityBand {
        SeverityBand::from_score(self.severity)
    }

    #[must_use]
    pub fn class(&self) -> IssueClass {
        self.detail.class()
    }
}

/// Type-specific issue payloads.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum IssueDetail {
    BruteForce {
        ip: String,
        target_user: String,
        attempt_count: u64,
        time_span: i64,
        unique_users: usize,
    },
    SuspiciousIp {
        ip: String,
        threat_score: i64,
        failed_login_count: i64,
        ban_count: i64,
    },
    BannedIp {
        ip: String,
    },
    UnauthorizedAccess {
        ip: Option<String>,
        target_user: Option<String>,
    },
    HighUsage {
        resource: ResourceKind,
        metric_name: String,
        threshold: f64,
        peak_value: f64,
        avg_value: f64,
        current_value: f64,
        sustained_duration: i64,
    },
    DiskSpace {
        disk_total: i64,
        disk_used: i64,
        disk_available: i64,
        usage_percent: f64,
        threshold: f64,
    },
    ErrorSpike {
        source: String,
        sample_message: String,
        baseline_count: i64,
        spike_count: i64,
        spike_factor: f64,
    },
    RecurringError {
        source: String,
        pattern_signature: String,
        sample_message: String,
        occurrences_per_hour: f64,
    },
    CriticalError {
        source: String,
        error_category: String,
        sample_message: String,
    },
    DatabaseErrors {
        error_type: String,
    },
    ConnectionAnomaly {
        connection_count: i64,
        expected_value: f64,
        actual_value: i64,
        deviation_percent: f64,
    },
    NetworkErrorRate {
        connection_count: i64,
        error_count: i64,
        drop_count: i64,
        error_rate: f64,
    },
}

impl IssueDetail {
    #[must_use]
    pub fn class(&self) -> IssueClass {
        match self {
            Self::BruteForce { .. }
            | Self::SuspiciousIp { .. }
            | Self::BannedIp { .. }
            | Self::UnauthorizedAccess { .. } => IssueClass::Security,
            Self::HighUsage { .. } | Self::DiskSpace { .. } => IssueClass::Performance,
            Self::ErrorSpike { .. }
            | Self::RecurringError { .. }
            | Self::CriticalError { .. }
            | Self::DatabaseErrors { .. } => IssueClass::Error,
            Self::ConnectionAnomaly { .. } | Self::NetworkErrorRate { .. } => IssueClass::Network,
        }
    }
}

/// Overall system status label.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Critical,
}

/// Weighted health assessment across all detector families.
#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub timestamp: i64,
    pub time_window_hours: i64,
    pub health_score: i64,
    pub status: HealthStatus,
    pub security_score: i64,
    pub performance_score: i64,
    pub error_score: i64,
    pub network_score: i64,
    pub total_issues: usize,
    pub critical_issues: usize,
    pub high_issues: usize,
    pub medium_issues: usize,
    pub low_issues: usize,
    pub top_issues: Vec<Issue>,
    pub recommendations: Vec<String>,
}

/// Posture label derived from the risk score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SecurityPosture {
    Good,
    Fair,
    Poor,
    Critical,
}

impl SecurityPosture {
    /// good < 20, fair < 50, poor < 80, critical >= 80.
    #[must_use]
    pub fn from_risk(risk_score: i64) -> Self {
        match risk_score {
            ..=19 => Self::Good,
            20..=49 => Self::Fair,
            50..=79 => Self::Poor,
            _ => Self::Critical,
        }
    }
}

/// One entry in the top-threat list.
#[derive(Debug, Clone, Serialize)]
pub struct TopThreatIp {
    pub ip: String,
    pub threat_score: i64,
    pub failed_logins: i64,
    pub bans: i64,
}

/// Security posture assessment.
#[derive(Debug, Clone, Serialize)]
pub struct SecurityReport {
    pub timestamp: i64,
    pub time_window_hours: i64,
    pub total_threats: usize,
    pub high_threat_ips: usize,
    pub failed_login_attempts: usize,
    pub successful_bans: usize,
    pub top_threat_ips: Vec<TopThreatIp>,
    pub recent_attacks: Vec<Issue>,
    pub risk_score: i64,
    pub security_posture: SecurityPosture,
    pub recommendations: Vec<String>,
}

/// Error volume direction over a window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Trend {
    Improving,
    Stable,
    Worsening,
}

/// Error trend assessment over N days.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorTrendReport {
    pub timestamp: i64,
    pub time_period_days: i64,
    pub total_errors: usize,
    /// Errors per hour across the window.
    pub error_rate: f64,
    pub unique_error_types: usize,
    pub errors_by_source: std::collections::BTreeMap<String, u64>,
    pub errors_by_category: std::collections::BTreeMap<String, u64>,
    pub top_errors: Vec<Issue>,
    pub trend: Trend,
    pub recommendations: Vec<String>,
}

/// Slope direction of a metric series.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TrendDirection {
    Increasing,
    Decreasing,
    Stable,
}

/// A point beyond two standard deviations from the series mean.
#[derive(Debug, Clone, Serialize)]
pub struct TrendAnomaly {
    pub index: usize,
    pub value: f64,
    /// Distance from the mean in standard deviations.
    pub deviation: f64,
    pub timestamp: i64,
}

/// Descriptive statistics and regression for one metric series.
#[derive(Debug, Clone, Serialize)]
pub struct TrendReport {
    pub metric_name: String,
    pub time_period_days: i64,
    pub data_points: usize,
    pub min_value: f64,
    pub max_value: f64,
    pub avg_value: f64,
    pub median_value: f64,
    pub std_deviation: f64,
    pub trend_direction: TrendDirection,
    /// sqrt(R^2), bounded to [0, 1].
    pub trend_strength: f64,
    pub anomaly_count: usize,
    pub anomalies: Vec<TrendAnomaly>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn severity_bands_have_documented_edges() {
        assert_eq!(SeverityBand::from_score(0), SeverityBand::Low);
        assert_eq!(SeverityBand::from_score(30), SeverityBand::Low);
        assert_eq!(SeverityBand::from_score(31), SeverityBand::Medium);
        assert_eq!(SeverityBand::from_score(60), SeverityBand::Medium);
        assert_eq!(SeverityBand::from_score(61), SeverityBand::High);
        assert_eq!(SeverityBand::from_score(80), SeverityBand::High);
        assert_eq!(SeverityBand::from_score(81), SeverityBand::Critical);
        assert_eq!(SeverityBand::from_score(100), SeverityBand::Critical);
    }

    #[test]
    fn posture_bands_have_documented_edges() {
        assert_eq!(SecurityPosture::from_risk(0), SecurityPosture::Good);
        assert_eq!(SecurityPosture::from_risk(19), SecurityPosture::Good);
        assert_eq!(SecurityPosture::from_risk(20), SecurityPosture::Fair);
        assert_eq!(SecurityPosture::from_risk(50), SecurityPosture::Poor);
        assert_eq!(SecurityPosture::from_risk(80), SecurityPosture::Critical);
    }

    #[test]
    fn issue_classes_follow_detail() {
        let issue = Issue {
            severity: 70,
            title: String::new(),
            description: String::new(),
            first_seen: 0,
            last_seen: 0,
            occurrence_count: 1,
            affected_resources: Vec::new(),
            recommendations: Vec::new(),
            detail: IssueDetail::BannedIp { ip: "203.0.113.1".to_string() },
        };
        assert_eq!(issue.class(), IssueClass::Security);
        assert_eq!(issue.severity_band(), SeverityBand::High);
    }

    #[test]
    fn window_hours_rounds_down_but_never_zero() {
        assert_eq!(Window::between(0, 7200).hours(), 2);
        assert_eq!(Window::between(0, 1800).hours(), 1);
    }
}
