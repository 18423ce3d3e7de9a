//! Row and domain types for the Logly store.
//!
//! Each persisted entity has an insert-side struct (no surrogate id, owned
//! by the producing collector or tracer) and a `*Row` struct decoded from
//! queries. Fields are `Option` where a tick may legitimately not have
//! sampled the value.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

// ============================================================================
// Samples
// ============================================================================

/// One system counter sample produced by the system sampler at one tick.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SystemMetric {
    pub ts: i64,
    pub cpu_percent: Option<f64>,
    pub cpu_count: Option<i64>,
    pub memory_total: Option<i64>,
    pub memory_available: Option<i64>,
    pub memory_percent: Option<f64>,
    pub disk_total: Option<i64>,
    pub disk_used: Option<i64>,
    pub disk_percent: Option<f64>,
    pub disk_read_bytes: Option<i64>,
    pub disk_write_bytes: Option<i64>,
    pub load_1min: Option<f64>,
    pub load_5min: Option<f64>,
    pub load_15min: Option<f64>,
}

impl SystemMetric {
    /// An empty sample at `ts`; fields are filled in by the sampler.
    #[must_use]
    pub fn at(ts: i64) -> Self {
        Self { ts, ..Self::default() }
    }
}

/// Stored system metric row.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct SystemMetricRow {
    pub id: i64,
    pub ts: i64,
    pub cpu_percent: Option<f64>,
    pub cpu_count: Option<i64>,
    pub memory_total: Option<i64>,
    pub memory_available: Option<i64>,
    pub memory_percent: Option<f64>,
    pub disk_total: Option<i64>,
    pub disk_used: Option<i64>,
    pub disk_percent: Option<f64>,
    pub disk_read_bytes: Option<i64>,
    pub disk_write_bytes: Option<i64>,
    pub load_1min: Option<f64>,
    pub load_5min: Option<f64>,
    pub load_15min: Option<f64>,
}

/// One network counter sample. Byte/packet counters are cumulative values
/// as read from the interface tables; deltas are computed at aggregation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NetworkMetric {
    pub ts: i64,
    pub bytes_sent: Option<i64>,
    pub bytes_recv: Option<i64>,
    pub packets_sent: Option<i64>,
    pub packets_recv: Option<i64>,
    pub errors_in: Option<i64>,
    pub errors_out: Option<i64>,
    pub drops_in: Option<i64>,
    pub drops_out: Option<i64>,
    pub connections_established: Option<i64>,
    pub connections_listen: Option<i64>,
    pub connections_time_wait: Option<i64>,
}

impl NetworkMetric {
    #[must_use]
    pub fn at(ts: i64) -> Self {
        Self { ts, ..Self::default() }
    }
}

/// Stored network metric row.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct NetworkMetricRow {
    pub id: i64,
    pub ts: i64,
    pub bytes_sent: Option<i64>,
    pub bytes_recv: Option<i64>,
    pub packets_sent: Option<i64>,
    pub packets_recv: Option<i64>,
    pub errors_in: Option<i64>,
    pub errors_out: Option<i64>,
    pub drops_in: Option<i64>,
    pub drops_out: Option<i64>,
    pub connections_established: Option<i64>,
    pub connections_listen: Option<i64>,
    pub connections_time_wait: Option<i64>,
}

// ============================================================================
// Log events
// ============================================================================

/// One parsed log line. `metadata` is an opaque JSON mapping; consumers
/// treat missing keys as absent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEvent {
    pub ts: i64,
    pub source: String,
    pub message: String,
    pub level: Option<String>,
    pub ip: Option<String>,
    pub user: Option<String>,
    pub service: Option<String>,
    pub action: Option<String>,
    pub metadata: Option<serde_json::Value>,
}

impl LogEvent {
    #[must_use]
    pub fn new(ts: i64, source: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            ts,
            source: source.into(),
            message: message.into(),
            level: None,
            ip: None,
            user: None,
            service: None,
            action: None,
            metadata: None,
        }
    }
}

/// Stored log event row. `metadata` is the serialized JSON text blob.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct LogEventRow {
    pub id: i64,
    pub ts: i64,
    pub source: String,
    pub level: Option<String>,
    pub message: String,
    pub ip: Option<String>,
    pub user: Option<String>,
    pub service: Option<String>,
    pub action: Option<String>,
    pub metadata: Option<String>,
}

impl LogEventRow {
    /// Deserialized metadata mapping, `None` when absent or unparseable.
    #[must_use]
    pub fn metadata_json(&self) -> Option<serde_json::Value> {
        self.metadata.as_deref().and_then(|m| serde_json::from_str(m).ok())
    }

    /// Back to the domain event form, for re-processing (enrichment).
    #[must_use]
    pub fn to_event(&self) -> LogEvent {
        LogEvent {
            ts: self.ts,
            source: self.source.clone(),
            message: self.message.clone(),
            level: self.level.clone(),
            ip: self.ip.clone(),
            user: self.user.clone(),
            service: self.service.clone(),
            action: self.action.clone(),
            metadata: self.metadata_json(),
        }
    }
}

// ============================================================================
// Aggregates
// ============================================================================

/// Hourly roll-up row, keyed uniquely by `hour_ts`.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct HourlyAggregateRow {
    pub id: i64,
    pub hour_ts: i64,
    pub avg_cpu_percent: Option<f64>,
    pub max_cpu_percent: Option<f64>,
    pub avg_memory_percent: Option<f64>,
    pub max_memory_percent: Option<f64>,
    pub avg_disk_percent: Option<f64>,
    pub total_bytes_sent: i64,
    pub total_bytes_recv: i64,
    pub total_packets_sent: i64,
    pub total_packets_recv: i64,
    pub total_events: i64,
    pub failed_login_count: i64,
    pub banned_count: i64,
    pub error_count: i64,
    pub warning_count: i64,
}

/// Daily roll-up row, keyed uniquely by `date` (YYYY-MM-DD, UTC).
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct DailyAggregateRow {
    pub id: i64,
    pub date: String,
    pub avg_cpu_percent: Option<f64>,
    pub max_cpu_percent: Option<f64>,
    pub avg_memory_percent: Option<f64>,
    pub max_memory_percent: Option<f64>,
    pub avg_disk_percent: Option<f64>,
    pub total_bytes_sent: i64,
    pub total_bytes_recv: i64,
    pub total_events: i64,
    pub failed_login_count: i64,
    pub banned_count: i64,
    pub error_count: i64,
    pub warning_count: i64,
    pub unique_ips: i64,
    pub unique_users: i64,
}

// ============================================================================
// IP reputation
// ============================================================================

/// Coarse origin classification for an IP address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IpKind {
    Localhost,
    Private,
    Cloud,
    Public,
}

impl IpKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Localhost => "localhost",
            Self::Private => "private",
            Self::Cloud => "cloud",
            Self::Public => "public",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Self {
        match value {
            "localhost" => Self::Localhost,
            "private" => Self::Private,
            "cloud" => Self::Cloud,
            _ => Self::Public,
        }
    }
}

/// Threat score derivation. A pure function of the reputation inputs so the
/// stored value can always be recomputed and compared.
///
/// `base` is 90 for blacklisted addresses, 10 for external (cloud/public)
/// ones, 0 otherwise; whitelisting zeroes the base. Failed logins add 5
/// points each up to 6, bans 20 points each up to 2, clamped to [0, 100].
#[must_use]
pub fn derive_threat_score(
    kind: IpKind,
    is_whitelisted: bool,
    is_blacklisted: bool,
    failed_login_count: i64,
    banned_count: i64,
) -> i64 {
    let base: i64 = if is_blacklisted {
        90
    } else if is_whitelisted {
        0
    } else {
        match kind {
            IpKind::Cloud | IpKind::Public => 10,
            IpKind::Localhost | IpKind::Private => 0,
        }
    };

    let score = base + 5 * failed_login_count.min(6) + 20 * banned_count.min(2);
    score.clamp(0, 100)
}

/// One observation of an IP, produced by the IP tracer and merged
/// monotonically into the reputation table.
#[derive(Debug, Clone)]
pub struct IpObservation {
    pub ip: String,
    pub kind: IpKind,
    pub is_whitelisted: bool,
    pub is_blacklisted: bool,
    pub failed_login_count: i64,
    pub banned_count: i64,
    pub ts: i64,
}

/// Stored reputation row; one per address, mutated in place.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct IpReputationRow {
    pub id: i64,
    pub ip: String,
    pub kind: String,
    pub is_whitelisted: bool,
    pub is_blacklisted: bool,
    pub threat_score: i64,
    pub first_seen: i64,
    pub last_seen: i64,
    pub total_events: i64,
    pub failed_login_count: i64,
    pub banned_count: i64,
    pub updated_at: i64,
}

// ============================================================================
// Traces
// ============================================================================

/// One step in a canned causality chain.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CausalityStep {
    pub step: String,
    pub service: String,
}

/// Causality attached to a recognized event pattern.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Causality {
    pub trigger: String,
    pub root_cause: String,
    pub chain: Vec<CausalityStep>,
}

/// Enrichment produced by the event tracer for a single log event.
#[derive(Debug, Clone, Serialize)]
pub struct EventTrace {
    pub event_id: Option<i64>,
    pub ts: i64,
    pub source: String,
    pub level: Option<String>,
    pub severity_score: i64,
    pub message: Option<String>,
    pub action: Option<String>,
    pub service: Option<String>,
    pub user: Option<String>,
    pub ip: Option<String>,
    pub causality: Option<Causality>,
    pub related_services: Vec<String>,
    pub tracers_used: Vec<String>,
    pub traced_at: i64,
}

/// Process context captured by the process tracer.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ProcessTrace {
    pub pid: i64,
    pub name: Option<String>,
    pub cmdline: Option<String>,
    pub state: Option<String>,
    pub parent_pid: Option<i64>,
    pub memory_rss: i64,
    pub memory_vm: i64,
    pub cpu_utime: i64,
    pub cpu_stime: i64,
    pub threads: i64,
    pub read_bytes: i64,
    pub write_bytes: i64,
    pub read_syscalls: i64,
    pub write_syscalls: i64,
}

/// One TCP connection snapshot captured by the network tracer.
#[derive(Debug, Clone, Serialize)]
pub struct NetworkConnection {
    pub local_ip: Option<String>,
    pub local_port: Option<i64>,
    pub remote_ip: Option<String>,
    pub remote_port: Option<i64>,
    pub state: Option<String>,
    pub protocol: String,
}

/// Error taxonomy match produced by the error tracer.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ErrorTraceInfo {
    pub error_type: Option<String>,
    pub error_category: Option<String>,
    pub exception_type: Option<String>,
    pub severity: i64,
    pub file_path: Option<String>,
    pub line_number: Option<i64>,
    pub error_code: Option<String>,
    pub has_stacktrace: bool,
    pub root_cause_hints: Vec<String>,
    pub recovery_suggestions: Vec<String>,
}

/// A complete enrichment bundle for one event, persisted as one
/// `event_traces` row plus its side-table records and an IP reputation
/// upsert.
#[derive(Debug, Clone)]
pub struct TraceBundle {
    pub trace: EventTrace,
    pub processes: Vec<ProcessTrace>,
    pub connections: Vec<NetworkConnection>,
    pub error: Option<ErrorTraceInfo>,
    pub ip_observation: Option<IpObservation>,
}

/// Stored event trace row. List fields are JSON text blobs.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct EventTraceRow {
    pub id: i64,
    pub event_id: Option<i64>,
    pub ts: i64,
    pub source: String,
    pub level: Option<String>,
    pub severity_score: i64,
    pub message: Option<String>,
    pub action: Option<String>,
    pub service: Option<String>,
    pub user: Option<String>,
    pub ip: Option<String>,
    pub root_cause: Option<String>,
    pub trigger_event: Option<String>,
    pub causality_chain: Option<String>,
    pub related_services: Option<String>,
    pub tracers_used: Option<String>,
    pub traced_at: Option<i64>,
}

/// Stored error trace row.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ErrorTraceRow {
    pub id: i64,
    pub trace_id: i64,
    pub error_type: Option<String>,
    pub error_category: Option<String>,
    pub exception_type: Option<String>,
    pub severity: i64,
    pub file_path: Option<String>,
    pub line_number: Option<i64>,
    pub error_code: Option<String>,
    pub has_stacktrace: bool,
    pub root_cause_hints: Option<String>,
    pub recovery_suggestions: Option<String>,
    pub ts: i64,
}

/// One grouped error pattern count (by type or by category).
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ErrorPatternCount {
    pub name: Option<String>,
    pub count: i64,
}

/// Error pattern statistics for a time range.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ErrorPatterns {
    pub by_type: Vec<ErrorPatternCount>,
    pub by_category: Vec<ErrorPatternCount>,
}
