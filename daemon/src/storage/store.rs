//! Embedded SQLite store: inserts, range queries, roll-ups, retention.
//!
//! All queries are runtime-checked (`sqlx::query` / `sqlx::query_as`) and
//! return materialized rows; no lazy cursor crosses the store boundary.
//! Every insert commits its own transaction. Results are ordered
//! `ts DESC` unless stated otherwise.

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::Utc;
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous,
};
use sqlx::SqlitePool;
use thiserror::Error;

use super::models::{
    derive_threat_score, DailyAggregateRow, ErrorPatternCount, ErrorPatterns, ErrorTraceRow,
    EventTraceRow, HourlyAggregateRow, IpKind, IpObservation, IpReputationRow, LogEvent,
    LogEventRow, NetworkMetric, NetworkMetricRow, SystemMetric, SystemMetricRow, TraceBundle,
};
use super::paths;

const SCHEMA: &str = include_str!("schema.sql");

/// Connection open retry policy: bounded exponential backoff.
const OPEN_ATTEMPTS: u32 = 5;
const OPEN_RETRY_INITIAL: Duration = Duration::from_millis(100);

/// How long a connection waits on a locked database before giving up.
const BUSY_TIMEOUT: Duration = Duration::from_secs(60);

/// Errors produced by the store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error(
        "database path {} is not the pinned location (<data_dir>/{}); \
         the database location is derived from the data directory and cannot be changed",
        .path.display(),
        paths::DB_FILE_NAME
    )]
    PathNotPinned { path: PathBuf },

    #[error("could not create data directory {}: {source}", .path.display())]
    CreateDir {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("integrity violation: {0}")]
    Integrity(String),

    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// Counts and file size reported by the `status` command.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct StoreStats {
    pub system_metrics: i64,
    pub network_metrics: i64,
    pub log_events: i64,
    pub hourly_aggregates: i64,
    pub daily_aggregates: i64,
    pub event_traces: i64,
    pub process_traces: i64,
    pub network_traces: i64,
    pub error_traces: i64,
    pub ip_reputation: i64,
    pub database_size_bytes: u64,
}

/// Handle to the single Logly database file.
#[derive(Debug, Clone)]
pub struct Store {
    pool: SqlitePool,
    path: PathBuf,
}

impl Store {
    /// Opens the store at the pinned location under `data_dir`, creating
    /// the directory and schema as needed.
    pub async fn open(data_dir: &Path) -> Result<Self> {
        let path = paths::db_path(data_dir);
        Self::open_at(&path).await
    }

    /// Opens the store at an explicit path, rejecting anything other than
    /// a pinned location.
    pub async fn open_at(path: &Path) -> Result<Self> {
        if !paths::is_pinned_db_path(path) {
            return Err(StoreError::PathNotPinned { path: path.to_path_buf() });
        }
        Self::open_inner(path).await
    }

    /// Test-mode constructor that bypasses the pinned-path guard.
    pub async fn open_unchecked(path: &Path) -> Result<Self> {
        Self::open_inner(path).await
    }

    async fn open_inner(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|source| StoreError::CreateDir {
                    path: parent.to_path_buf(),
                    source,
                })?;
            }
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(BUSY_TIMEOUT)
            .pragma("cache_size", "10000")
            .pragma("temp_store", "MEMORY")
            .pragma("wal_autocheckpoint", "1000");

        // Transient open failures (the file being provisioned, a checkpoint
        // in flight) get a bounded exponential backoff before surfacing.
        let mut delay = OPEN_RETRY_INITIAL;
        let mut attempt = 1;
        let pool = loop {
            match SqlitePoolOptions::new()
                .max_connections(4)
                .connect_with(options.clone())
                .await
            {
                Ok(pool) => break pool,
                Err(err) if attempt < OPEN_ATTEMPTS => {
                    tracing::debug!(attempt, error = %err, "database open failed, retrying");
                    tokio::time::sleep(delay).await;
                    delay *= 2;
                    attempt += 1;
                }
                Err(err) => return Err(err.into()),
            }
        };

        sqlx::raw_sql(SCHEMA).execute(&pool).await?;

        Ok(Self { pool, path: path.to_path_buf() })
    }

    /// Path of the backing database file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn check_ts(ts: i64) -> Result<()> {
        if ts < 0 {
            return Err(StoreError::Integrity(format!("negative timestamp {ts}")));
        }
        Ok(())
    }

    fn check_severity(score: i64) -> Result<()> {
        if !(0..=100).contains(&score) {
            return Err(StoreError::Integrity(format!(
                "severity score {score} outside [0, 100]"
            )));
        }
        Ok(())
    }

    // ========================================================================
    // Sample inserts
    // ========================================================================

    /// Insert one system metric sample, returning its row id.
    pub async fn insert_system_metric(&self, metric: &SystemMetric) -> Result<i64> {
        Self::check_ts(metric.ts)?;
        let result = sqlx::query(
            "INSERT INTO system_metrics (\
                 ts, cpu_percent, cpu_count, memory_total, memory_available, \
                 memory_percent, disk_total, disk_used, disk_percent, \
                 disk_read_bytes, disk_write_bytes, load_1min, load_5min, load_15min\
             ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(metric.ts)
        .bind(metric.cpu_percent)
        .bind(metric.cpu_count)
        .bind(metric.memory_total)
        .bind(metric.memory_available)
        .bind(metric.memory_percent)
        .bind(metric.disk_total)
        .bind(metric.disk_used)
        .bind(metric.disk_percent)
        .bind(metric.disk_read_bytes)
        .bind(metric.disk_write_bytes)
        .bind(metric.load_1min)
        .bind(metric.load_5min)
        .bind(metric.load_15min)
        .execute(&self.pool)
        .await?;

        Ok(result.last_insert_rowid())
    }

    /// Insert one network metric sample, returning its row id.
    pub async fn insert_network_metric(&self, metric: &NetworkMetric) -> Result<i64> {
        Self::check_ts(metric.ts)?;
        let result = sqlx::query(
            "INSERT INTO network_metrics (\
                 ts, bytes_sent, bytes_recv, packets_sent, packets_recv, \
                 errors_in, errors_out, drops_in, drops_out, \
                 connections_established, connections_listen, connections_time_wait\
             ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(metric.ts)
        .bind(metric.bytes_sent)
        .bind(metric.bytes_recv)
        .bind(metric.packets_sent)
        .bind(metric.packets_recv)
        .bind(metric.errors_in)
        .bind(metric.errors_out)
        .bind(metric.drops_in)
        .bind(metric.drops_out)
        .bind(metric.connections_established)
        .bind(metric.connections_listen)
        .bind(metric.connections_time_wait)
        .execute(&self.pool)
        .await?;

        Ok(result.last_insert_rowid())
    }

    /// Insert one parsed log event, returning its row id.
    pub async fn insert_log_event(&self, event: &LogEvent) -> Result<i64> {
        Self::check_ts(event.ts)?;
        let metadata = event
            .metadata
            .as_ref()
            .map(|m| serde_json::to_string(m).unwrap_or_default());
        let result = sqlx::query(
            "INSERT INTO log_events (\
                 ts, source, level, message, ip, user, service, action, metadata\
             ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(event.ts)
        .bind(&event.source)
        .bind(event.level.as_deref())
        .bind(&event.message)
        .bind(event.ip.as_deref())
        .bind(event.user.as_deref())
        .bind(event.service.as_deref())
        .bind(event.action.as_deref())
        .bind(metadata)
        .execute(&self.pool)
        .await?;

        Ok(result.last_insert_rowid())
    }

    // ========================================================================
    // Range queries
    // ========================================================================

    /// System metric rows in `[start, end]`, newest first.
    pub async fn get_system_metrics(
        &self,
        start: i64,
        end: i64,
        limit: Option<i64>,
    ) -> Result<Vec<SystemMetricRow>> {
        let rows = sqlx::query_as::<_, SystemMetricRow>(
            "SELECT * FROM system_metrics \
             WHERE ts BETWEEN ? AND ? \
             ORDER BY ts DESC \
             LIMIT ?",
        )
        .bind(start)
        .bind(end)
        .bind(limit.unwrap_or(-1))
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    /// Network metric rows in `[start, end]`, newest first.
    pub async fn get_network_metrics(
        &self,
        start: i64,
        end: i64,
        limit: Option<i64>,
    ) -> Result<Vec<NetworkMetricRow>> {
        let rows = sqlx::query_as::<_, NetworkMetricRow>(
            "SELECT * FROM network_metrics \
             WHERE ts BETWEEN ? AND ? \
             ORDER BY ts DESC \
             LIMIT ?",
        )
        .bind(start)
        .bind(end)
        .bind(limit.unwrap_or(-1))
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    /// Log event rows in `[start, end]` with optional source/level filters,
    /// newest first.
    pub async fn get_log_events(
        &self,
        start: i64,
        end: i64,
        source: Option<&str>,
        level: Option<&str>,
        limit: Option<i64>,
    ) -> Result<Vec<LogEventRow>> {
        let rows = sqlx::query_as::<_, LogEventRow>(
            "SELECT * FROM log_events \
             WHERE ts BETWEEN ? AND ? \
               AND (? IS NULL OR source = ?) \
               AND (? IS NULL OR level = ?) \
             ORDER BY ts DESC \
             LIMIT ?",
        )
        .bind(start)
        .bind(end)
        .bind(source)
        .bind(source)
        .bind(level)
        .bind(level)
        .bind(limit.unwrap_or(-1))
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    // ========================================================================
    // Roll-ups
    // ========================================================================

    /// Aggregate raw rows in `[hour_ts, hour_ts + 3600)` into one hourly
    /// row, keyed by `hour_ts` with INSERT-OR-REPLACE semantics. A no-op
    /// when the hour has neither samples nor events.
    ///
    /// Network totals are within-window deltas of the cumulative interface
    /// counters (sum of positive consecutive differences, so a counter
    /// reset contributes zero rather than a negative delta).
    pub async fn compute_hourly_aggregates(&self, hour_ts: i64) -> Result<()> {
        let hour_end = hour_ts + 3600;

        let sys: (Option<f64>, Option<f64>, Option<f64>, Option<f64>, Option<f64>) =
            sqlx::query_as(
                "SELECT AVG(cpu_percent), MAX(cpu_percent), \
                        AVG(memory_percent), MAX(memory_percent), AVG(disk_percent) \
                 FROM system_metrics WHERE ts >= ? AND ts < ?",
            )
            .bind(hour_ts)
            .bind(hour_end)
            .fetch_one(&self.pool)
            .await?;

        let net_rows: Vec<(Option<i64>, Option<i64>, Option<i64>, Option<i64>)> =
            sqlx::query_as(
                "SELECT bytes_sent, bytes_recv, packets_sent, packets_recv \
                 FROM network_metrics WHERE ts >= ? AND ts < ? ORDER BY ts ASC",
            )
            .bind(hour_ts)
            .bind(hour_end)
            .fetch_all(&self.pool)
            .await?;

        let bytes_sent = window_delta(net_rows.iter().filter_map(|r| r.0));
        let bytes_recv = window_delta(net_rows.iter().filter_map(|r| r.1));
        let packets_sent = window_delta(net_rows.iter().filter_map(|r| r.2));
        let packets_recv = window_delta(net_rows.iter().filter_map(|r| r.3));

        let logs: (i64, i64, i64, i64, i64) = sqlx::query_as(
            "SELECT COUNT(*), \
                    COALESCE(SUM(CASE WHEN action = 'failed_login' THEN 1 ELSE 0 END), 0), \
                    COALESCE(SUM(CASE WHEN action = 'ban' THEN 1 ELSE 0 END), 0), \
                    COALESCE(SUM(CASE WHEN level = 'ERROR' THEN 1 ELSE 0 END), 0), \
                    COALESCE(SUM(CASE WHEN level = 'WARNING' THEN 1 ELSE 0 END), 0) \
             FROM log_events WHERE ts >= ? AND ts < ?",
        )
        .bind(hour_ts)
        .bind(hour_end)
        .fetch_one(&self.pool)
        .await?;

        if logs.0 == 0 && sys.0.is_none() && net_rows.is_empty() {
            tracing::debug!(hour_ts, "no data to aggregate for hour");
            return Ok(());
        }

        sqlx::query(
            "INSERT OR REPLACE INTO hourly_aggregates (\
                 hour_ts, avg_cpu_percent, max_cpu_percent, avg_memory_percent, \
                 max_memory_percent, avg_disk_percent, total_bytes_sent, \
                 total_bytes_recv, total_packets_sent, total_packets_recv, \
                 total_events, failed_login_count, banned_count, error_count, \
                 warning_count\
             ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(hour_ts)
        .bind(sys.0)
        .bind(sys.1)
        .bind(sys.2)
        .bind(sys.3)
        .bind(sys.4)
        .bind(bytes_sent)
        .bind(bytes_recv)
        .bind(packets_sent)
        .bind(packets_recv)
        .bind(logs.0)
        .bind(logs.1)
        .bind(logs.2)
        .bind(logs.3)
        .bind(logs.4)
        .execute(&self.pool)
        .await?;

        tracing::debug!(hour_ts, "computed hourly aggregates");
        Ok(())
    }

    /// Aggregate hourly rows for `date` (YYYY-MM-DD, UTC) into one daily
    /// row, plus distinct IP/user counts from the raw events of that day.
    /// INSERT-OR-REPLACE keyed by `date`.
    pub async fn compute_daily_aggregates(&self, date: &str) -> Result<()> {
        let sys: (
            Option<f64>,
            Option<f64>,
            Option<f64>,
            Option<f64>,
            Option<f64>,
            Option<i64>,
            Option<i64>,
        ) = sqlx::query_as(
            "SELECT AVG(avg_cpu_percent), MAX(max_cpu_percent), \
                    AVG(avg_memory_percent), MAX(max_memory_percent), \
                    AVG(avg_disk_percent), SUM(total_bytes_sent), SUM(total_bytes_recv) \
             FROM hourly_aggregates WHERE date(hour_ts, 'unixepoch') = ?",
        )
        .bind(date)
        .fetch_one(&self.pool)
        .await?;

        let logs: (Option<i64>, Option<i64>, Option<i64>, Option<i64>, Option<i64>) =
            sqlx::query_as(
                "SELECT SUM(total_events), SUM(failed_login_count), SUM(banned_count), \
                        SUM(error_count), SUM(warning_count) \
                 FROM hourly_aggregates WHERE date(hour_ts, 'unixepoch') = ?",
            )
            .bind(date)
            .fetch_one(&self.pool)
            .await?;

        let uniques: (i64, i64) = sqlx::query_as(
            "SELECT COUNT(DISTINCT ip), COUNT(DISTINCT user) \
             FROM log_events WHERE date(ts, 'unixepoch') = ?",
        )
        .bind(date)
        .fetch_one(&self.pool)
        .await?;

        sqlx::query(
            "INSERT OR REPLACE INTO daily_aggregates (\
                 date, avg_cpu_percent, max_cpu_percent, avg_memory_percent, \
                 max_memory_percent, avg_disk_percent, total_bytes_sent, \
                 total_bytes_recv, total_events, failed_login_count, banned_count, \
                 error_count, warning_count, unique_ips, unique_users\
             ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(date)
        .bind(sys.0)
        .bind(sys.1)
        .bind(sys.2)
        .bind(sys.3)
        .bind(sys.4)
        .bind(sys.5.unwrap_or(0))
        .bind(sys.6.unwrap_or(0))
        .bind(logs.0.unwrap_or(0))
        .bind(logs.1.unwrap_or(0))
        .bind(logs.2.unwrap_or(0))
        .bind(logs.3.unwrap_or(0))
        .bind(logs.4.unwrap_or(0))
        .bind(uniques.0)
        .bind(uniques.1)
        .execute(&self.pool)
        .await?;

        tracing::debug!(date, "computed daily aggregates");
        Ok(())
    }

    /// Hourly aggregate row for one hour boundary, if present.
    pub async fn get_hourly_aggregate(&self, hour_ts: i64) -> Result<Option<HourlyAggregateRow>> {
        let row = sqlx::query_as::<_, HourlyAggregateRow>(
            "SELECT * FROM hourly_aggregates WHERE hour_ts = ?",
        )
        .bind(hour_ts)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    /// Daily aggregate row for one date (YYYY-MM-DD, UTC), if present.
    pub async fn get_daily_aggregate(&self, date: &str) -> Result<Option<DailyAggregateRow>> {
        let row =
            sqlx::query_as::<_, DailyAggregateRow>("SELECT * FROM daily_aggregates WHERE date = ?")
                .bind(date)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row)
    }

    // ========================================================================
    // Retention
    // ========================================================================

    /// Delete raw samples and events older than `retention_days`.
    /// Aggregates are never deleted. Returns the per-table delete counts.
    pub async fn cleanup_old_data(&self, retention_days: i64) -> Result<(u64, u64, u64)> {
        let cutoff = Utc::now().timestamp() - retention_days * 86_400;

        let sys = sqlx::query("DELETE FROM system_metrics WHERE ts < ?")
            .bind(cutoff)
            .execute(&self.pool)
            .await?
            .rows_affected();
        let net = sqlx::query("DELETE FROM network_metrics WHERE ts < ?")
            .bind(cutoff)
            .execute(&self.pool)
            .await?
            .rows_affected();
        let logs = sqlx::query("DELETE FROM log_events WHERE ts < ?")
            .bind(cutoff)
            .execute(&self.pool)
            .await?
            .rows_affected();

        tracing::info!(
            system_metrics = sys,
            network_metrics = net,
            log_events = logs,
            "cleaned up old data"
        );
        Ok((sys, net, logs))
    }

    /// Row counts per table plus the database file size.
    pub async fn get_stats(&self) -> Result<StoreStats> {
        async fn count(pool: &SqlitePool, table: &str) -> Result<i64> {
            let n: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {table}"))
                .fetch_one(pool)
                .await?;
            Ok(n)
        }

        Ok(StoreStats {
            system_metrics: count(&self.pool, "system_metrics").await?,
            network_metrics: count(&self.pool, "network_metrics").await?,
            log_events: count(&self.pool, "log_events").await?,
            hourly_aggregates: count(&self.pool, "hourly_aggregates").await?,
            daily_aggregates: count(&self.pool, "daily_aggregates").await?,
            event_traces: count(&self.pool, "event_traces").await?,
            process_traces: count(&self.pool, "process_traces").await?,
            network_traces: count(&self.pool, "network_traces").await?,
            error_traces: count(&self.pool, "error_traces").await?,
            ip_reputation: count(&self.pool, "ip_reputation").await?,
            database_size_bytes: std::fs::metadata(&self.path).map(|m| m.len()).unwrap_or(0),
        })
    }

    // ========================================================================
    // Traces
    // ========================================================================

    /// Persist a complete enrichment bundle: the event trace row, its
    /// process/network/error side records, and the IP reputation merge.
    /// All inside one transaction; returns the trace id.
    pub async fn insert_event_trace(&self, bundle: &TraceBundle) -> Result<i64> {
        let trace = &bundle.trace;
        Self::check_ts(trace.ts)?;
        Self::check_severity(trace.severity_score)?;

        let causality_chain = trace
            .causality
            .as_ref()
            .map(|c| serde_json::to_string(&c.chain).unwrap_or_default());
        let related_services = serde_json::to_string(&trace.related_services).unwrap_or_default();
        let tracers_used = serde_json::to_string(&trace.tracers_used).unwrap_or_default();

        let mut tx = self.pool.begin().await?;

        let result = sqlx::query(
            "INSERT INTO event_traces (\
                 event_id, ts, source, level, severity_score, message, action, \
                 service, user, ip, root_cause, trigger_event, causality_chain, \
                 related_services, tracers_used, traced_at\
             ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(trace.event_id)
        .bind(trace.ts)
        .bind(&trace.source)
        .bind(trace.level.as_deref())
        .bind(trace.severity_score)
        .bind(trace.message.as_deref())
        .bind(trace.action.as_deref())
        .bind(trace.service.as_deref())
        .bind(trace.user.as_deref())
        .bind(trace.ip.as_deref())
        .bind(trace.causality.as_ref().map(|c| c.root_cause.as_str()))
        .bind(trace.causality.as_ref().map(|c| c.trigger.as_str()))
        .bind(causality_chain)
        .bind(related_services)
        .bind(tracers_used)
        .bind(trace.traced_at)
        .execute(&mut *tx)
        .await?;
        let trace_id = result.last_insert_rowid();

        for proc in &bundle.processes {
            sqlx::query(
                "INSERT INTO process_traces (\
                     trace_id, pid, name, cmdline, state, parent_pid, memory_rss, \
                     memory_vm, cpu_utime, cpu_stime, threads, read_bytes, \
                     write_bytes, read_syscalls, write_syscalls, ts\
                 ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(trace_id)
            .bind(proc.pid)
            .bind(proc.name.as_deref())
            .bind(proc.cmdline.as_deref())
            .bind(proc.state.as_deref())
            .bind(proc.parent_pid)
            .bind(proc.memory_rss)
            .bind(proc.memory_vm)
            .bind(proc.cpu_utime)
            .bind(proc.cpu_stime)
            .bind(proc.threads)
            .bind(proc.read_bytes)
            .bind(proc.write_bytes)
            .bind(proc.read_syscalls)
            .bind(proc.write_syscalls)
            .bind(trace.ts)
            .execute(&mut *tx)
            .await?;
        }

        for conn in &bundle.connections {
            sqlx::query(
                "INSERT INTO network_traces (\
                     trace_id, local_ip, local_port, remote_ip, remote_port, \
                     state, protocol, ts\
                 ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(trace_id)
            .bind(conn.local_ip.as_deref())
            .bind(conn.local_port)
            .bind(conn.remote_ip.as_deref())
            .bind(conn.remote_port)
            .bind(conn.state.as_deref())
            .bind(&conn.protocol)
            .bind(trace.ts)
            .execute(&mut *tx)
            .await?;
        }

        if let Some(error) = &bundle.error {
            Self::check_severity(error.severity)?;
            sqlx::query(
                "INSERT INTO error_traces (\
                     trace_id, error_type, error_category, exception_type, severity, \
                     file_path, line_number, error_code, has_stacktrace, \
                     root_cause_hints, recovery_suggestions, ts\
                 ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(trace_id)
            .bind(error.error_type.as_deref())
            .bind(error.error_category.as_deref())
            .bind(error.exception_type.as_deref())
            .bind(error.severity)
            .bind(error.file_path.as_deref())
            .bind(error.line_number)
            .bind(error.error_code.as_deref())
            .bind(error.has_stacktrace)
            .bind(serde_json::to_string(&error.root_cause_hints).unwrap_or_default())
            .bind(serde_json::to_string(&error.recovery_suggestions).unwrap_or_default())
            .bind(trace.ts)
            .execute(&mut *tx)
            .await?;
        }

        if let Some(obs) = &bundle.ip_observation {
            merge_ip_observation(&mut tx, obs).await?;
        }

        tx.commit().await?;
        Ok(trace_id)
    }

    /// Record one observed event for an IP at ingestion time: bumps
    /// `total_events`, increments the failed-login/ban counters when the
    /// action warrants it, and rederives the threat score.
    pub async fn record_ip_event(
        &self,
        ip: &str,
        kind: IpKind,
        action: Option<&str>,
        ts: i64,
    ) -> Result<()> {
        Self::check_ts(ts)?;
        let failed_inc = i64::from(action == Some("failed_login"));
        let banned_inc = i64::from(action == Some("ban"));

        let mut tx = self.pool.begin().await?;

        let existing: Option<(i64, i64, bool, bool, String)> = sqlx::query_as(
            "SELECT failed_login_count, banned_count, is_whitelisted, is_blacklisted, kind \
             FROM ip_reputation WHERE ip = ?",
        )
        .bind(ip)
        .fetch_optional(&mut *tx)
        .await?;

        match existing {
            Some((failed, banned, whitelisted, blacklisted, stored_kind)) => {
                let failed = failed + failed_inc;
                let banned = banned + banned_inc;
                let score = derive_threat_score(
                    IpKind::parse(&stored_kind),
                    whitelisted,
                    blacklisted,
                    failed,
                    banned,
                );
                sqlx::query(
                    "UPDATE ip_reputation SET \
                         last_seen = ?, total_events = total_events + 1, \
                         failed_login_count = ?, banned_count = ?, \
                         threat_score = ?, updated_at = ? \
                     WHERE ip = ?",
                )
                .bind(ts)
                .bind(failed)
                .bind(banned)
                .bind(score)
                .bind(ts)
                .bind(ip)
                .execute(&mut *tx)
                .await?;
            }
            None => {
                let score = derive_threat_score(kind, false, false, failed_inc, banned_inc);
                sqlx::query(
                    "INSERT INTO ip_reputation (\
                         ip, kind, is_whitelisted, is_blacklisted, threat_score, \
                         first_seen, last_seen, total_events, failed_login_count, \
                         banned_count, updated_at\
                     ) VALUES (?, ?, 0, 0, ?, ?, ?, 1, ?, ?, ?)",
                )
                .bind(ip)
                .bind(kind.as_str())
                .bind(score)
                .bind(ts)
                .bind(ts)
                .bind(failed_inc)
                .bind(banned_inc)
                .bind(ts)
                .execute(&mut *tx)
                .await?;
            }
        }

        tx.commit().await?;
        Ok(())
    }

    /// Whether an event already has an enrichment trace. Keeps traces
    /// 1:1 with events when enrichment runs more than once over the same
    /// window.
    pub async fn trace_exists_for_event(&self, event_id: i64) -> Result<bool> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM event_traces WHERE event_id = ?")
                .bind(event_id)
                .fetch_one(&self.pool)
                .await?;
        Ok(count > 0)
    }

    /// Event trace rows in `[start, end]` with optional source and minimum
    /// severity filters, newest first.
    pub async fn get_traces(
        &self,
        start: i64,
        end: i64,
        source: Option<&str>,
        min_severity: Option<i64>,
        limit: Option<i64>,
    ) -> Result<Vec<EventTraceRow>> {
        let rows = sqlx::query_as::<_, EventTraceRow>(
            "SELECT * FROM event_traces \
             WHERE ts BETWEEN ? AND ? \
               AND (? IS NULL OR source = ?) \
               AND (? IS NULL OR severity_score >= ?) \
             ORDER BY ts DESC \
             LIMIT ?",
        )
        .bind(start)
        .bind(end)
        .bind(source)
        .bind(source)
        .bind(min_severity)
        .bind(min_severity)
        .bind(limit.unwrap_or(-1))
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    /// Error trace rows in `[start, end]` with an optional category filter,
    /// newest first.
    pub async fn get_error_traces(
        &self,
        start: i64,
        end: i64,
        category: Option<&str>,
        limit: Option<i64>,
    ) -> Result<Vec<ErrorTraceRow>> {
        let rows = sqlx::query_as::<_, ErrorTraceRow>(
            "SELECT * FROM error_traces \
             WHERE ts BETWEEN ? AND ? \
               AND (? IS NULL OR error_category = ?) \
             ORDER BY ts DESC \
             LIMIT ?",
        )
        .bind(start)
        .bind(end)
        .bind(category)
        .bind(category)
        .bind(limit.unwrap_or(-1))
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    /// Error pattern statistics: counts grouped by type and by category.
    pub async fn get_error_patterns(&self, start: i64, end: i64) -> Result<ErrorPatterns> {
        let by_type = sqlx::query_as::<_, ErrorPatternCount>(
            "SELECT error_type AS name, COUNT(*) AS count FROM error_traces \
             WHERE ts BETWEEN ? AND ? \
             GROUP BY error_type ORDER BY count DESC",
        )
        .bind(start)
        .bind(end)
        .fetch_all(&self.pool)
        .await?;

        let by_category = sqlx::query_as::<_, ErrorPatternCount>(
            "SELECT error_category AS name, COUNT(*) AS count FROM error_traces \
             WHERE ts BETWEEN ? AND ? \
             GROUP BY error_category ORDER BY count DESC",
        )
        .bind(start)
        .bind(end)
        .fetch_all(&self.pool)
        .await?;

        Ok(ErrorPatterns { by_type, by_category })
    }

    /// Reputation rows at or above `threshold`, highest threat first.
    pub async fn get_high_threat_ips(&self, threshold: i64) -> Result<Vec<IpReputationRow>> {
        let rows = sqlx::query_as::<_, IpReputationRow>(
            "SELECT * FROM ip_reputation \
             WHERE threat_score >= ? \
             ORDER BY threat_score DESC, last_seen DESC",
        )
        .bind(threshold)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    /// The reputation row for one address, if known.
    pub async fn get_ip_reputation(&self, ip: &str) -> Result<Option<IpReputationRow>> {
        let row = sqlx::query_as::<_, IpReputationRow>("SELECT * FROM ip_reputation WHERE ip = ?")
            .bind(ip)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }
}

/// Merge a tracer-side IP observation into the reputation table.
///
/// Counters are merged monotonically (`MAX` of stored and observed) so a
/// tracer cache that lags behind the table can never regress a count.
async fn merge_ip_observation(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    obs: &IpObservation,
) -> Result<()> {
    let existing: Option<(i64, i64, bool, bool, String)> = sqlx::query_as(
        "SELECT failed_login_count, banned_count, is_whitelisted, is_blacklisted, kind \
         FROM ip_reputation WHERE ip = ?",
    )
    .bind(&obs.ip)
    .fetch_optional(&mut **tx)
    .await?;

    match existing {
        Some((failed, banned, whitelisted, blacklisted, stored_kind)) => {
            let failed = failed.max(obs.failed_login_count);
            let banned = banned.max(obs.banned_count);
            let whitelisted = whitelisted || obs.is_whitelisted;
            let blacklisted = blacklisted || obs.is_blacklisted;
            let score = derive_threat_score(
                IpKind::parse(&stored_kind),
                whitelisted,
                blacklisted,
                failed,
                banned,
            );
            sqlx::query(
                "UPDATE ip_reputation SET \
                     is_whitelisted = ?, is_blacklisted = ?, threat_score = ?, \
                     last_seen = ?, total_events = total_events + 1, \
                     failed_login_count = ?, banned_count = ?, updated_at = ? \
                 WHERE ip = ?",
            )
            .bind(whitelisted)
            .bind(blacklisted)
            .bind(score)
            .bind(obs.ts)
            .bind(failed)
            .bind(banned)
            .bind(obs.ts)
            .bind(&obs.ip)
            .execute(&mut **tx)
            .await?;
        }
        None => {
            let score = derive_threat_score(
                obs.kind,
                obs.is_whitelisted,
                obs.is_blacklisted,
                obs.failed_login_count,
                obs.banned_count,
            );
            sqlx::query(
                "INSERT INTO ip_reputation (\
                     ip, kind, is_whitelisted, is_blacklisted, threat_score, \
                     first_seen, last_seen, total_events, failed_login_count, \
                     banned_count, updated_at\
                 ) VALUES (?, ?, ?, ?, ?, ?, ?, 1, ?, ?, ?)",
            )
            .bind(&obs.ip)
            .bind(obs.kind.as_str())
            .bind(obs.is_whitelisted)
            .bind(obs.is_blacklisted)
            .bind(score)
            .bind(obs.ts)
            .bind(obs.ts)
            .bind(obs.failed_login_count)
            .bind(obs.banned_count)
            .bind(obs.ts)
            .execute(&mut **tx)
            .await?;
        }
    }

    Ok(())
}

/// Sum of positive consecutive differences over a cumulative counter
/// series. Equal to `last - first` while the counter is monotonic; a reset
/// (decrease) contributes zero.
fn window_delta(values: impl Iterator<Item = i64>) -> i64 {
    let mut total = 0;
    let mut prev: Option<i64> = None;
    for value in values {
        if let Some(p) = prev {
            total += (value - p).max(0);
        }
        prev = Some(value);
    }
    total
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn scratch_store() -> (TempDir, Store) {
        let dir = TempDir::new().expect("tempdir");
        let store = Store::open(dir.path()).await.expect("open store");
        (dir, store)
    }

    #[test]
    fn window_delta_monotonic_is_last_minus_first() {
        assert_eq!(window_delta([100, 150, 400].into_iter()), 300);
    }

    #[test]
    fn window_delta_reset_clamps_to_zero() {
        // Counter resets between the second and third sample.
        assert_eq!(window_delta([100, 150, 20, 70].into_iter()), 100);
        assert_eq!(window_delta([500, 10].into_iter()), 0);
    }

    #[test]
    fn window_delta_degenerate_inputs() {
        assert_eq!(window_delta(std::iter::empty()), 0);
        assert_eq!(window_delta([42].into_iter()), 0);
    }

    #[tokio::test]
    async fn open_rejects_unpinned_path() {
        let dir = TempDir::new().unwrap();
        let err = Store::open_at(&dir.path().join("elsewhere.db")).await.unwrap_err();
        assert!(matches!(err, StoreError::PathNotPinned { .. }));
    }

    #[tokio::test]
    async fn open_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let store = Store::open(dir.path()).await.unwrap();
        store
            .insert_system_metric(&SystemMetric { cpu_percent: Some(12.5), ..SystemMetric::at(1000) })
            .await
            .unwrap();
        drop(store);

        // Re-opening must not touch existing rows.
        let store = Store::open(dir.path()).await.unwrap();
        let rows = store.get_system_metrics(0, 2000, None).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].cpu_percent, Some(12.5));
    }

    #[tokio::test]
    async fn insert_rejects_negative_timestamp() {
        let (_dir, store) = scratch_store().await;
        let err = store.insert_system_metric(&SystemMetric::at(-5)).await.unwrap_err();
        assert!(matches!(err, StoreError::Integrity(_)));
        assert_eq!(store.get_stats().await.unwrap().system_metrics, 0);
    }

    #[tokio::test]
    async fn log_event_filters_apply() {
        let (_dir, store) = scratch_store().await;
        for (source, level) in [("auth", "WARNING"), ("auth", "INFO"), ("nginx", "ERROR")] {
            let mut event = LogEvent::new(100, source, "line");
            event.level = Some(level.to_string());
            store.insert_log_event(&event).await.unwrap();
        }

        assert_eq!(store.get_log_events(0, 200, None, None, None).await.unwrap().len(), 3);
        assert_eq!(store.get_log_events(0, 200, Some("auth"), None, None).await.unwrap().len(), 2);
        assert_eq!(
            store
                .get_log_events(0, 200, Some("auth"), Some("INFO"), None)
                .await
                .unwrap()
                .len(),
            1
        );
        assert_eq!(store.get_log_events(0, 200, None, None, Some(1)).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn hourly_aggregates_are_idempotent() {
        let (_dir, store) = scratch_store().await;
        let hour = 1_700_000_400 - 1_700_000_400 % 3600;
        for (i, cpu) in [30.0, 40.0, 50.0, 60.0, 70.0, 80.0].iter().enumerate() {
            let metric = SystemMetric {
                cpu_percent: Some(*cpu),
                ..SystemMetric::at(hour + (i as i64) * 60)
            };
            store.insert_system_metric(&metric).await.unwrap();
        }

        store.compute_hourly_aggregates(hour).await.unwrap();
        store.compute_hourly_aggregates(hour).await.unwrap();

        let row = store.get_hourly_aggregate(hour).await.unwrap().expect("aggregate row");
        assert_eq!(row.avg_cpu_percent, Some(55.0));
        assert_eq!(row.max_cpu_percent, Some(80.0));
        assert_eq!(store.get_stats().await.unwrap().hourly_aggregates, 1);
    }

    #[tokio::test]
    async fn hourly_aggregates_skip_empty_hours() {
        let (_dir, store) = scratch_store().await;
        store.compute_hourly_aggregates(3600).await.unwrap();
        assert!(store.get_hourly_aggregate(3600).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn hourly_network_totals_are_window_deltas() {
        let (_dir, store) = scratch_store().await;
        let hour = 7200;
        // Cumulative counters with a reset before the last sample.
        for (i, sent) in [1000_i64, 1500, 2500, 100].iter().enumerate() {
            let metric = NetworkMetric {
                bytes_sent: Some(*sent),
                bytes_recv: Some(sent * 2),
                packets_sent: Some(10 * (i as i64 + 1)),
                packets_recv: Some(20 * (i as i64 + 1)),
                ..NetworkMetric::at(hour + (i as i64) * 60)
            };
            store.insert_network_metric(&metric).await.unwrap();
        }

        store.compute_hourly_aggregates(hour).await.unwrap();
        let row = store.get_hourly_aggregate(hour).await.unwrap().unwrap();
        assert_eq!(row.total_bytes_sent, 1500);
        assert_eq!(row.total_bytes_recv, 3000);
        assert_eq!(row.total_packets_sent, 30);
    }

    #[tokio::test]
    async fn daily_aggregates_roll_up_hourly_rows() {
        let (_dir, store) = scratch_store().await;
        // Two hours of 2023-11-14 UTC (1_700_000_000 falls on that date).
        let base = 1_699_999_200;
        for (offset, cpu) in [(0_i64, 40.0), (3600, 60.0)] {
            for i in 0..2 {
                let metric = SystemMetric {
                    cpu_percent: Some(cpu),
                    ..SystemMetric::at(base + offset + i * 60)
                };
                store.insert_system_metric(&metric).await.unwrap();
            }
            let mut event = LogEvent::new(base + offset, "auth", "Failed password");
            event.action = Some("failed_login".to_string());
            event.ip = Some("203.0.113.8".to_string());
            event.user = Some("root".to_string());
            store.insert_log_event(&event).await.unwrap();
            store.compute_hourly_aggregates(base + offset).await.unwrap();
        }

        store.compute_daily_aggregates("2023-11-14").await.unwrap();
        store.compute_daily_aggregates("2023-11-14").await.unwrap();

        let row = store.get_daily_aggregate("2023-11-14").await.unwrap().unwrap();
        assert_eq!(row.avg_cpu_percent, Some(50.0));
        assert_eq!(row.max_cpu_percent, Some(60.0));
        assert_eq!(row.total_events, 2);
        assert_eq!(row.failed_login_count, 2);
        assert_eq!(row.unique_ips, 1);
        assert_eq!(row.unique_users, 1);
        assert_eq!(store.get_stats().await.unwrap().daily_aggregates, 1);
    }

    #[tokio::test]
    async fn retention_deletes_only_old_rows() {
        let (_dir, store) = scratch_store().await;
        let now = Utc::now().timestamp();
        store.insert_system_metric(&SystemMetric::at(now - 100 * 86_400)).await.unwrap();
        store.insert_system_metric(&SystemMetric::at(now - 10 * 86_400)).await.unwrap();

        let (deleted, _, _) = store.cleanup_old_data(30).await.unwrap();
        assert_eq!(deleted, 1);

        let rows = store.get_system_metrics(0, now, None).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].ts, now - 10 * 86_400);

        // A horizon longer than the newest row's age deletes nothing...
        let (deleted, _, _) = store.cleanup_old_data(365).await.unwrap();
        assert_eq!(deleted, 0);

        // ...and a zero-day horizon deletes everything older than now.
        let (deleted, _, _) = store.cleanup_old_data(0).await.unwrap();
        assert_eq!(deleted, 1);
        assert!(store.get_system_metrics(0, now, None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn ip_event_counters_are_monotonic() {
        let (_dir, store) = scratch_store().await;
        for i in 0..3 {
            store
                .record_ip_event("203.0.113.9", IpKind::Public, Some("failed_login"), 100 + i)
                .await
                .unwrap();
        }
        store.record_ip_event("203.0.113.9", IpKind::Public, Some("ban"), 200).await.unwrap();

        let rep = store.get_ip_reputation("203.0.113.9").await.unwrap().unwrap();
        assert_eq!(rep.failed_login_count, 3);
        assert_eq!(rep.banned_count, 1);
        assert_eq!(rep.total_events, 4);
        // 10 (public) + 3*5 + 1*20
        assert_eq!(rep.threat_score, 45);
        assert_eq!(
            rep.threat_score,
            derive_threat_score(
                IpKind::parse(&rep.kind),
                rep.is_whitelisted,
                rep.is_blacklisted,
                rep.failed_login_count,
                rep.banned_count,
            )
        );
    }

    #[tokio::test]
    async fn concurrent_inserts_all_land() {
        let (_dir, store) = scratch_store().await;
        let mut handles = Vec::new();
        for i in 0..8 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                for j in 0..5 {
                    store.insert_system_metric(&SystemMetric::at(1000 + i * 10 + j)).await.unwrap();
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(store.get_stats().await.unwrap().system_metrics, 40);
    }
}
