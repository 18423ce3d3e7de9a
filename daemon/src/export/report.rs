//! Templated ASCII summary report: store totals, health, security
//! posture, error trends, and resource usage in one operator-readable
//! file.

use std::fmt::Write as _;
use std::path::Path;

use crate::config::Thresholds;
use crate::query::{AnalysisEngine, Window};
use crate::storage::Store;
use crate::tracers::TracerCollector;

use super::format_timestamp;

const RULE: &str =
    "================================================================================";

/// How many recent error events one report run will enrich.
const TRACE_BATCH_LIMIT: i64 = 25;

pub struct ReportGenerator<'a> {
    store: &'a Store,
    thresholds: Thresholds,
    tracer: Option<&'a TracerCollector>,
}

impl<'a> ReportGenerator<'a> {
    #[must_use]
    pub fn new(store: &'a Store, thresholds: Thresholds) -> Self {
        Self { store, thresholds, tracer: None }
    }

    /// Enrich recent error events through the tracer ensemble before
    /// rendering, so the error sections draw on fresh traces.
    #[must_use]
    pub fn with_tracer(mut self, tracer: &'a TracerCollector) -> Self {
        self.tracer = Some(tracer);
        self
    }

    /// Render the full summary for the last `hours` and write it to
    /// `output`. Returns the rendered text so callers can also print it.
    pub async fn generate_summary_report(
        &self,
        output: &Path,
        hours: i64,
    ) -> anyhow::Result<String> {
        self.enrich_recent_errors(Window::last_hours(hours)).await?;
        let text = self.render(hours).await?;
        std::fs::write(output, &text)?;
        tracing::info!(path = %output.display(), "report generated");
        Ok(text)
    }

    /// Trace the newest error events of the window that have no trace
    /// yet, persisting the bundles. A no-op without a tracer.
    async fn enrich_recent_errors(&self, window: Window) -> anyhow::Result<()> {
        let Some(tracer) = self.tracer else {
            return Ok(());
        };

        let rows = self
            .store
            .get_log_events(window.start, window.end, None, Some("ERROR"), Some(TRACE_BATCH_LIMIT))
            .await?;
        for row in &rows {
            if self.store.trace_exists_for_event(row.id).await? {
                continue;
            }
            let mut bundle = tracer.trace_event(&row.to_event());
            bundle.trace.event_id = Some(row.id);
            self.store.insert_event_trace(&bundle).await?;
        }
        Ok(())
    }

    async fn render(&self, hours: i64) -> anyhow::Result<String> {
        let engine = AnalysisEngine::new(self.store, self.thresholds.clone());
        let stats = self.store.get_stats().await?;
        let health = engine.analyze_system_health(hours).await?;
        let security = engine.analyze_security_posture(hours).await?;
        let trends = engine.analyze_error_trends((hours / 24).max(1)).await?;
        let usage = engine.get_resource_usage_trends((hours / 24).max(1)).await?;

        let mut out = String::new();
        writeln!(out, "{RULE}")?;
        writeln!(out, "LOGLY SUMMARY REPORT")?;
        writeln!(out, "Generated: {}", format_timestamp(health.timestamp, "%Y-%m-%d %H:%M:%S"))?;
        writeln!(out, "Window:    last {hours} hour(s)")?;
        writeln!(out, "{RULE}")?;

        writeln!(out, "\nSTORE")?;
        writeln!(out, "  System metrics:    {:>10}", stats.system_metrics)?;
        writeln!(out, "  Network metrics:   {:>10}", stats.network_metrics)?;
        writeln!(out, "  Log events:        {:>10}", stats.log_events)?;
        writeln!(out, "  Event traces:      {:>10}", stats.event_traces)?;
        writeln!(out, "  Hourly aggregates: {:>10}", stats.hourly_aggregates)?;
        writeln!(out, "  Daily aggregates:  {:>10}", stats.daily_aggregates)?;
        writeln!(
            out,
            "  Database size:     {:>10}",
            crate::util::format_size(stats.database_size_bytes)
        )?;

        writeln!(out, "\nHEALTH  [{:?}]  score {}/100", health.status, health.health_score)?;
        writeln!(
            out,
            "  security {} | performance {} | errors {} | network {}",
            health.security_score, health.performance_score, health.error_score, health.network_score
        )?;
        writeln!(
            out,
            "  issues: {} total ({} critical, {} high, {} medium, {} low)",
            health.total_issues,
            health.critical_issues,
            health.high_issues,
            health.medium_issues,
            health.low_issues
        )?;
        for issue in &health.top_issues {
            writeln!(out, "  [{:>3}] {}", issue.severity, issue.title)?;
        }

        writeln!(
            out,
            "\nSECURITY  [{:?}]  risk {}/100",
            security.security_posture, security.risk_score
        )?;
        writeln!(
            out,
            "  threats {} | high-threat IPs {} | failed logins {} | bans {}",
            security.total_threats,
            security.high_threat_ips,
            security.failed_login_attempts,
            security.successful_bans
        )?;
        for ip in &security.top_threat_ips {
            writeln!(
                out,
                "  {:<16} score {:>3}  failed {:>4}  bans {:>3}",
                ip.ip, ip.threat_score, ip.failed_logins, ip.bans
            )?;
        }

        writeln!(out, "\nERRORS  [{:?}]", trends.trend)?;
        writeln!(
            out,
            "  total {} | {:.2}/hour | {} distinct sources",
            trends.total_errors, trends.error_rate, trends.unique_error_types
        )?;
        for (source, count) in trends.errors_by_source.iter().take(5) {
            writeln!(out, "  {source:<20} {count:>6}")?;
        }

        writeln!(out, "\nRESOURCE TRENDS")?;
        for (name, trend) in &usage {
            writeln!(
                out,
                "  {:<16} avg {:>6.1}  max {:>6.1}  {:?} (strength {:.2}, {} anomalies)",
                name,
                trend.avg_value,
                trend.max_value,
                trend.trend_direction,
                trend.trend_strength,
                trend.anomaly_count
            )?;
        }

        writeln!(out, "\nRECOMMENDATIONS")?;
        for recommendation in health.recommendations.iter().chain(&security.recommendations) {
            writeln!(out, "  - {recommendation}")?;
        }
        writeln!(out, "{RULE}")?;

        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::StubPlatform;
    use crate::storage::{LogEvent, SystemMetric};
    use crate::tracers::TracerSwitches;
    use std::sync::Arc;
    use tempfile::TempDir;

    #[tokio::test]
    async fn report_enriches_errors_once() {
        let dir = TempDir::new().unwrap();
        let store = Store::open(dir.path()).await.unwrap();
        let now = chrono::Utc::now().timestamp();
        let mut event = LogEvent::new(now - 60, "django", "connection to database failed");
        event.level = Some("ERROR".to_string());
        store.insert_log_event(&event).await.unwrap();

        let tracer = TracerCollector::new(Arc::new(StubPlatform::default()), TracerSwitches::default());
        let generator =
            ReportGenerator::new(&store, Thresholds::default()).with_tracer(&tracer);

        let output = dir.path().join("report.txt");
        generator.generate_summary_report(&output, 24).await.unwrap();
        // A second run must not duplicate the trace.
        generator.generate_summary_report(&output, 24).await.unwrap();

        let stats = store.get_stats().await.unwrap();
        assert_eq!(stats.event_traces, 1);
        assert_eq!(stats.error_traces, 1);

        let patterns = store.get_error_patterns(0, now + 10).await.unwrap();
        assert_eq!(patterns.by_category[0].name.as_deref(), Some("database"));
    }

    #[tokio::test]
    async fn report_renders_and_writes() {
        let dir = TempDir::new().unwrap();
        let store = Store::open(dir.path()).await.unwrap();
        let now = chrono::Utc::now().timestamp();
        store
            .insert_system_metric(&SystemMetric {
                cpu_percent: Some(20.0),
                ..SystemMetric::at(now - 60)
            })
            .await
            .unwrap();

        let output = dir.path().join("report.txt");
        let generator = ReportGenerator::new(&store, Thresholds::default());
        let text = generator.generate_summary_report(&output, 24).await.unwrap();

        assert!(text.contains("LOGLY SUMMARY REPORT"));
        assert!(text.contains("HEALTH"));
        assert!(text.contains("SECURITY"));
        assert_eq!(std::fs::read_to_string(&output).unwrap(), text);
    }
}
