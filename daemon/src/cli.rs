//! Command-line interface: argument types and command handlers.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use chrono::Utc;
use clap::{Parser, Subcommand, ValueEnum};

use crate::config::LoglyConfig;
use crate::export::{CsvExporter, JsonExporter, ReportGenerator};
use crate::query::{AnalysisEngine, IssueDetector, QueryBuilder, Window};
use crate::scheduler::Scheduler;
use crate::storage::{paths, Store};
use crate::util::format_size;

#[derive(Debug, Parser)]
#[command(name = "logly", version, about = "Single-host observability daemon")]
pub struct Cli {
    /// Path to a YAML config file merged over the built-in defaults.
    #[arg(short = 'c', long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the daemon until interrupted.
    Start,
    /// Execute each enabled collector once and exit.
    Collect,
    /// Print database row counts and file size.
    Status,
    /// Print the database file size.
    DbSize,
    /// Export rows to CSV or JSON.
    Export {
        /// Which table to export.
        #[arg(value_enum)]
        kind: ExportKind,
        /// Output file path.
        output: PathBuf,
        /// Output format; defaults to the configured export format.
        #[arg(short = 'f', long, value_enum)]
        format: Option<ExportFormat>,
        /// Window in hours (mutually exclusive with --days).
        #[arg(long, conflicts_with = "days")]
        hours: Option<i64>,
        /// Window in days.
        #[arg(long)]
        days: Option<i64>,
        /// Log source filter (logs export only).
        #[arg(long)]
        source: Option<String>,
        /// Log level filter (logs export only).
        #[arg(long)]
        level: Option<String>,
    },
    /// Write the summary report.
    Report {
        /// Output file path.
        output: PathBuf,
        /// Window in hours (mutually exclusive with --days).
        #[arg(long, conflicts_with = "days")]
        hours: Option<i64>,
        /// Window in days.
        #[arg(long)]
        days: Option<i64>,
        /// Also print the report to stdout.
        #[arg(short = 'p', long)]
        print: bool,
    },
    /// Run an issue or analysis query and print the result.
    Query {
        /// Which analysis to run.
        #[arg(value_enum)]
        query_type: QueryKind,
        /// Window in hours.
        #[arg(long)]
        hours: Option<i64>,
        /// Threat score threshold (ips query only).
        #[arg(long)]
        threshold: Option<i64>,
        /// Also dump the full result as JSON to this path.
        #[arg(short = 'o', long)]
        output: Option<PathBuf>,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum ExportKind {
    System,
    Network,
    Logs,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum ExportFormat {
    Csv,
    Json,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum QueryKind {
    Security,
    Performance,
    Errors,
    Health,
    Ips,
}

/// Dispatch a parsed invocation. Errors propagate to `main` and produce
/// exit code 1.
pub async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = LoglyConfig::load(cli.config.as_deref())?;

    match cli.command {
        Command::Start => cmd_start(&config).await,
        Command::Collect => cmd_collect(&config).await,
        Command::Status => cmd_status(&config).await,
        Command::DbSize => cmd_db_size(&config),
        Command::Export { kind, output, format, hours, days, source, level } => {
            cmd_export(&config, kind, &output, format, hours, days, source, level).await
        }
        Command::Report { output, hours, days, print } => {
            cmd_report(&config, &output, hours, days, print).await
        }
        Command::Query { query_type, hours, threshold, output } => {
            cmd_query(&config, query_type, hours, threshold, output.as_deref()).await
        }
    }
}

fn init_logging(config: &LoglyConfig) -> anyhow::Result<crate::logging::LogGuard> {
    let log_dir = paths::logs_dir(config.data_dir());
    crate::logging::init(&config.logging, &log_dir)
}

async fn open_store(config: &LoglyConfig) -> anyhow::Result<Arc<Store>> {
    let store = Store::open_at(&config.database.path)
        .await
        .with_context(|| format!("opening database at {}", config.database.path.display()))?;
    Ok(Arc::new(store))
}

/// Window in unix seconds from the --hours/--days flags, defaulting to
/// the last 24 hours.
fn resolve_window(hours: Option<i64>, days: Option<i64>) -> (i64, i64) {
    let end = Utc::now().timestamp();
    let span = hours
        .map(|h| h * 3600)
        .or_else(|| days.map(|d| d * 86_400))
        .unwrap_or(86_400);
    (end - span, end)
}

async fn cmd_start(config: &LoglyConfig) -> anyhow::Result<()> {
    let _log_guard = init_logging(config)?;
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "starting logly daemon");

    let store = open_store(config).await?;
    let platform = crate::platform::detect();
    let mut scheduler = Scheduler::new(config, store, platform);
    scheduler.prime_log_cursors();
    let handle = scheduler.start();

    tracing::info!("daemon started; waiting for interrupt");
    wait_for_shutdown().await;

    handle.stop().await;
    tracing::info!("daemon shutdown complete");
    Ok(())
}

async fn wait_for_shutdown() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        let mut terminate =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                .expect("install SIGTERM handler");
        tokio::select! {
            _ = ctrl_c => tracing::info!("received interrupt"),
            _ = terminate.recv() => tracing::info!("received terminate"),
        }
    }

    #[cfg(not(unix))]
    {
        let _ = ctrl_c.await;
        tracing::info!("received interrupt");
    }
}

async fn cmd_collect(config: &LoglyConfig) -> anyhow::Result<()> {
    let _log_guard = init_logging(config)?;
    let store = open_store(config).await?;
    let platform = crate::platform::detect();
    let mut scheduler = Scheduler::new(config, store, platform);
    scheduler.run_once().await
}

async fn cmd_status(config: &LoglyConfig) -> anyhow::Result<()> {
    let store = open_store(config).await?;
    let stats = store.get_stats().await?;

    println!();
    println!("{}", "=".repeat(60));
    println!("LOGLY STATUS");
    println!("{}", "=".repeat(60));
    println!("Database Path:      {}", config.database.path.display());
    println!("Database Size:      {}", format_size(stats.database_size_bytes));
    println!("System Metrics:     {} records", stats.system_metrics);
    println!("Network Metrics:    {} records", stats.network_metrics);
    println!("Log Events:         {} records", stats.log_events);
    println!("Event Traces:       {} records", stats.event_traces);
    println!("IP Reputation:      {} records", stats.ip_reputation);
    println!("Hourly Aggregates:  {} records", stats.hourly_aggregates);
    println!("Daily Aggregates:   {} records", stats.daily_aggregates);
    println!("{}", "=".repeat(60));
    println!();
    Ok(())
}

fn cmd_db_size(config: &LoglyConfig) -> anyhow::Result<()> {
    let path = &config.database.path;
    let size = std::fs::metadata(path).map(|m| m.len()).ok();

    println!();
    println!("{}", "=".repeat(60));
    println!("DATABASE SIZE REPORT");
    println!("{}", "=".repeat(60));
    println!("Database Path:  {}", path.display());
    match size {
        Some(bytes) => {
            println!("Exists:         Yes");
            println!("Size (bytes):   {bytes}");
            println!("Formatted:      {}", format_size(bytes));
        }
        None => {
            println!("Exists:         No");
            println!("Database file does not exist yet.");
        }
    }
    println!("{}", "=".repeat(60));
    println!();
    Ok(())
}

#[allow(clippy::too_many_arguments)]
async fn cmd_export(
    config: &LoglyConfig,
    kind: ExportKind,
    output: &std::path::Path,
    format: Option<ExportFormat>,
    hours: Option<i64>,
    days: Option<i64>,
    source: Option<String>,
    level: Option<String>,
) -> anyhow::Result<()> {
    let _log_guard = init_logging(config)?;
    let store = open_store(config).await?;
    let (start, end) = resolve_window(hours, days);

    let format = format.unwrap_or_else(|| {
        if config.export.default_format.eq_ignore_ascii_case("json") {
            ExportFormat::Json
        } else {
            ExportFormat::Csv
        }
    });
    let ts_format = config.export.timestamp_format.clone();

    let count = match format {
        ExportFormat::Csv => {
            let exporter = CsvExporter::new(&store, ts_format);
            match kind {
                ExportKind::System => exporter.export_system_metrics(output, start, end).await?,
                ExportKind::Network => exporter.export_network_metrics(output, start, end).await?,
                ExportKind::Logs => {
                    exporter
                        .export_log_events(output, start, end, source.as_deref(), level.as_deref())
                        .await?
                }
            }
        }
        ExportFormat::Json => {
            let exporter = JsonExporter::new(&store, ts_format);
            match kind {
                ExportKind::System => exporter.export_system_metrics(output, start, end).await?,
                ExportKind::Network => exporter.export_network_metrics(output, start, end).await?,
                ExportKind::Logs => {
                    exporter
                        .export_log_events(output, start, end, source.as_deref(), level.as_deref())
                        .await?
                }
            }
        }
    };

    println!("Exported {count} records to {}", output.display());
    Ok(())
}

async fn cmd_report(
    config: &LoglyConfig,
    output: &std::path::Path,
    hours: Option<i64>,
    days: Option<i64>,
    print: bool,
) -> anyhow::Result<()> {
    let _log_guard = init_logging(config)?;
    let store = open_store(config).await?;
    let hours = hours.or_else(|| days.map(|d| d * 24)).unwrap_or(24);

    let tracer =
        crate::tracers::TracerCollector::new(crate::platform::detect(), Default::default());
    let generator =
        ReportGenerator::new(&store, config.query.thresholds.clone()).with_tracer(&tracer);
    let text = generator.generate_summary_report(output, hours).await?;

    if print {
        println!("{text}");
    } else {
        println!("Report generated at {}", output.display());
    }
    Ok(())
}

async fn cmd_query(
    config: &LoglyConfig,
    kind: QueryKind,
    hours: Option<i64>,
    threshold: Option<i64>,
    output: Option<&std::path::Path>,
) -> anyhow::Result<()> {
    let _log_guard = init_logging(config)?;
    let store = open_store(config).await?;
    let hours = hours.unwrap_or(config.query.default_time_window);
    let thresholds = config.query.thresholds.clone();

    let dump = match kind {
        QueryKind::Security => {
            let engine = AnalysisEngine::new(&store, thresholds);
            let report = engine.analyze_security_posture(hours).await?;
            println!(
                "Security posture: {:?} (risk {}/100)",
                report.security_posture, report.risk_score
            );
            println!(
                "  threats {} | high-threat IPs {} | failed logins {} | bans {}",
                report.total_threats,
                report.high_threat_ips,
                report.failed_login_attempts,
                report.successful_bans
            );
            for recommendation in &report.recommendations {
                println!("  - {recommendation}");
            }
            serde_json::to_value(&report)?
        }
        QueryKind::Performance => {
            let detector = IssueDetector::new(&store, thresholds);
            let window = Window::last_hours(hours);
            let mut issues = detector.find_high_cpu_periods(window).await?;
            issues.extend(detector.find_high_memory_periods(window).await?);
            issues.extend(detector.find_disk_space_issues(window).await?);
            println!("{} performance issue(s) in the last {hours}h", issues.len());
            for issue in &issues {
                println!("  [{:>3}] {}: {}", issue.severity, issue.title, issue.description);
            }
            serde_json::to_value(&issues)?
        }
        QueryKind::Errors => {
            let engine = AnalysisEngine::new(&store, thresholds);
            let report = engine.analyze_error_trends((hours / 24).max(1)).await?;
            println!(
                "Error trend: {:?} ({} errors, {:.2}/hour)",
                report.trend, report.total_errors, report.error_rate
            );
            for recommendation in &report.recommendations {
                println!("  - {recommendation}");
            }
            serde_json::to_value(&report)?
        }
        QueryKind::Health => {
            let engine = AnalysisEngine::new(&store, thresholds);
            let report = engine.analyze_system_health(hours).await?;
            println!("Health: {:?} (score {}/100)", report.status, report.health_score);
            println!(
                "  security {} | performance {} | errors {} | network {}",
                report.security_score,
                report.performance_score,
                report.error_score,
                report.network_score
            );
            for issue in &report.top_issues {
                println!("  [{:>3}] {}", issue.severity, issue.title);
            }
            serde_json::to_value(&report)?
        }
        QueryKind::Ips => {
            let query = QueryBuilder::new(&store);
            let threshold = threshold.unwrap_or(config.query.thresholds.threat_score_high);
            let rows = query.ips().with_threat_above(threshold).sort_by_threat().await?;
            println!("{} IP(s) with threat score >= {threshold}", rows.len());
            for row in &rows {
                println!(
                    "  {:<16} score {:>3}  failed {:>4}  bans {:>3}",
                    row.ip, row.threat_score, row.failed_login_count, row.banned_count
                );
            }
            serde_json::to_value(&rows)?
        }
    };

    if let Some(path) = output {
        std::fs::write(path, serde_json::to_string_pretty(&dump)?)?;
        println!("Full result written to {}", path.display());
    }
    Ok(())
}
