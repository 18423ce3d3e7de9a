//! Periodic task dispatch.
//!
//! One cooperative loop runs every enabled task sequentially: collectors
//! at their configured intervals, the roll-up dispatcher at the top of
//! each hour, the retention sweep daily. Every task body runs at t=0
//! once on start, is caught-and-logged on failure, and re-enqueues
//! normally afterwards. Writes serialize on a process-wide store mutex;
//! reads never take it.
//!
//! Interrupt/terminate handling lives in the CLI foreground (the only
//! place a signal handler can be installed); `stop()` just clears the
//! running flag and the loop exits within one 1-second yield, letting an
//! in-flight task body run to completion.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{Timelike, Utc};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use crate::aggregator::Aggregator;
use crate::collectors::{LogTailer, NetworkSampler, SystemSampler};
use crate::config::LoglyConfig;
use crate::platform::Platform;
use crate::storage::Store;
use crate::tracers::ip::classify_ip;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TaskKind {
    SystemMetrics,
    NetworkMetrics,
    LogParsing,
    Aggregation,
    Cleanup,
}

struct TaskSlot {
    kind: TaskKind,
    name: &'static str,
    interval: i64,
    next_due: i64,
}

pub struct Scheduler {
    store: Arc<Store>,
    db_lock: Arc<Mutex<()>>,
    system: Option<SystemSampler>,
    network: Option<NetworkSampler>,
    tailer: Option<LogTailer>,
    aggregator: Aggregator,
    retention_days: i64,
    tasks: Vec<TaskSlot>,
}

/// Control handle for a started scheduler.
pub struct SchedulerHandle {
    running: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

impl SchedulerHandle {
    /// Clear the running flag and wait for the loop to drain. The task
    /// body in flight (if any) completes before the loop exits.
    pub async fn stop(self) {
        tracing::info!("stopping scheduler");
        self.running.store(false, Ordering::Relaxed);
        if let Err(err) = self.handle.await {
            tracing::error!(error = %err, "scheduler loop join failed");
        }
        tracing::info!("scheduler stopped");
    }
}

impl Scheduler {
    #[must_use]
    pub fn new(config: &LoglyConfig, store: Arc<Store>, platform: Arc<dyn Platform>) -> Self {
        let system = config
            .system
            .enabled
            .then(|| SystemSampler::new(&config.system, Arc::clone(&platform)));
        let network = config
            .network
            .enabled
            .then(|| NetworkSampler::new(&config.network, Arc::clone(&platform)));
        let tailer = config.logs.enabled.then(|| LogTailer::new(&config.logs));

        let mut tasks = Vec::new();
        if system.is_some() {
            tasks.push(TaskSlot {
                kind: TaskKind::SystemMetrics,
                name: "system metrics collection",
                interval: config.collection.system_metrics as i64,
                next_due: 0,
            });
        }
        if network.is_some() {
            tasks.push(TaskSlot {
                kind: TaskKind::NetworkMetrics,
                name: "network metrics collection",
                interval: config.collection.network_metrics as i64,
                next_due: 0,
            });
        }
        if tailer.is_some() {
            tasks.push(TaskSlot {
                kind: TaskKind::LogParsing,
                name: "log parsing",
                interval: config.collection.log_parsing as i64,
                next_due: 0,
            });
        }
        tasks.push(TaskSlot {
            kind: TaskKind::Aggregation,
            name: "aggregations",
            interval: 3600,
            next_due: 0,
        });
        tasks.push(TaskSlot {
            kind: TaskKind::Cleanup,
            name: "data cleanup",
            interval: 86_400,
            next_due: 0,
        });

        for task in &tasks {
            tracing::info!(task = task.name, interval_secs = task.interval, "scheduled task");
        }

        let aggregator = Aggregator::new(Arc::clone(&store), &config.aggregation);
        Self {
            store,
            db_lock: Arc::new(Mutex::new(())),
            system,
            network,
            tailer,
            aggregator,
            retention_days: config.database.retention_days,
            tasks,
        }
    }

    /// Seek every log cursor to end-of-file. The daemon entry point calls
    /// this so a restart does not re-ingest pre-existing log content.
    pub fn prime_log_cursors(&mut self) {
        if let Some(tailer) = &mut self.tailer {
            tailer.prime_to_eof();
        }
    }

    /// Spawn the run loop on the runtime and return its control handle.
    #[must_use]
    pub fn start(mut self) -> SchedulerHandle {
        tracing::info!("starting scheduler");
        let running = Arc::new(AtomicBool::new(true));
        let loop_flag = Arc::clone(&running);

        let handle = tokio::spawn(async move {
            while loop_flag.load(Ordering::Relaxed) {
                let now = Utc::now().timestamp();
                let due: Vec<TaskKind> = self
                    .tasks
                    .iter()
                    .filter(|task| now >= task.next_due)
                    .map(|task| task.kind)
                    .collect();

                for kind in due {
                    if !loop_flag.load(Ordering::Relaxed) {
                        return;
                    }
                    let name = self.task_name(kind);
                    if let Err(err) = self.run_task(kind).await {
                        tracing::error!(task = name, error = %err, "error in scheduled task");
                    }
                    self.reschedule(kind);
                }

                tokio::time::sleep(std::time::Duration::from_secs(1)).await;
            }
        });

        SchedulerHandle { running, handle }
    }

    /// Execute every enabled collector body once, in declaration order.
    /// Unlike the daemon loop, errors propagate so one-shot `collect`
    /// runs exit non-zero.
    pub async fn run_once(&mut self) -> anyhow::Result<()> {
        tracing::info!("running collection tasks once");
        if self.system.is_some() {
            self.collect_system().await?;
        }
        if self.network.is_some() {
            self.collect_network().await?;
        }
        if self.tailer.is_some() {
            self.collect_logs().await?;
        }
        tracing::info!("collection tasks completed");
        Ok(())
    }

    fn task_name(&self, kind: TaskKind) -> &'static str {
        self.tasks
            .iter()
            .find(|task| task.kind == kind)
            .map_or("unknown", |task| task.name)
    }

    fn reschedule(&mut self, kind: TaskKind) {
        let now = Utc::now().timestamp();
        if let Some(slot) = self.tasks.iter_mut().find(|task| task.kind == kind) {
            slot.next_due = match kind {
                // The roll-up dispatcher aligns to hour boundaries so it
                // actually fires at the top of each hour.
                TaskKind::Aggregation => (now / 3600 + 1) * 3600,
                _ => now + slot.interval,
            };
        }
    }

    async fn run_task(&mut self, kind: TaskKind) -> anyhow::Result<()> {
        match kind {
            TaskKind::SystemMetrics => self.collect_system().await,
            TaskKind::NetworkMetrics => self.collect_network().await,
            TaskKind::LogParsing => self.collect_logs().await,
            TaskKind::Aggregation => self.run_aggregations().await,
            TaskKind::Cleanup => self.cleanup().await,
        }
    }

    async fn collect_system(&mut self) -> anyhow::Result<()> {
        let Some(sampler) = &mut self.system else {
            return Ok(());
        };
        let metric = sampler.collect(Utc::now().timestamp());
        tracing::debug!(probe = sampler.probe_method(), "collected system metrics");

        let _guard = self.db_lock.lock().await;
        self.store.insert_system_metric(&metric).await?;
        Ok(())
    }

    async fn collect_network(&mut self) -> anyhow::Result<()> {
        let Some(sampler) = &mut self.network else {
            return Ok(());
        };
        let metric = sampler.collect(Utc::now().timestamp());
        tracing::debug!(probe = sampler.probe_method(), "collected network metrics");

        let _guard = self.db_lock.lock().await;
        self.store.insert_network_metric(&metric).await?;
        Ok(())
    }

    async fn collect_logs(&mut self) -> anyhow::Result<()> {
        let Some(tailer) = &mut self.tailer else {
            return Ok(());
        };
        let events = tailer.collect_events(Utc::now().timestamp());
        if events.is_empty() {
            return Ok(());
        }
        tracing::debug!(count = events.len(), "parsed log events");

        let _guard = self.db_lock.lock().await;
        for event in &events {
            self.store.insert_log_event(event).await?;

            // Security-relevant actions accrue reputation at ingestion so
            // a ban is reflected in the reputation table as soon as the
            // batch commits.
            if let (Some(ip), Some(action)) = (&event.ip, &event.action) {
                if matches!(action.as_str(), "ban" | "failed_login") {
                    self.store
                        .record_ip_event(ip, classify_ip(ip), Some(action), event.ts)
                        .await?;
                }
            }
        }
        Ok(())
    }

    async fn run_aggregations(&mut self) -> anyhow::Result<()> {
        let local = chrono::Local::now();
        if local.minute() != 0 {
            return Ok(());
        }

        {
            let _guard = self.db_lock.lock().await;
            self.aggregator.run_hourly().await?;
        }
        if local.hour() == 0 {
            let _guard = self.db_lock.lock().await;
            self.aggregator.run_daily().await?;
        }
        Ok(())
    }

    async fn cleanup(&mut self) -> anyhow::Result<()> {
        let _guard = self.db_lock.lock().await;
        self.store.cleanup_old_data(self.retention_days).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LoglyConfig;
    use crate::platform::StubPlatform;
    use std::io::Write;
    use tempfile::TempDir;

    fn test_config(dir: &TempDir) -> LoglyConfig {
        let mut config = LoglyConfig::default();
        config.logs.sources.clear();
        config.logs.sources.insert(
            "auth".to_string(),
            crate::config::LogSourceConfig { path: dir.path().join("auth.log"), enabled: true },
        );
        config
    }

    fn stub_platform() -> Arc<dyn Platform> {
        Arc::new(StubPlatform {
            cpu_stat: Some("cpu  100 0 100 700 50 25 25 0 0 0\n".to_string()),
            meminfo: Some("MemTotal: 1000 kB\nMemAvailable: 500 kB\n".to_string()),
            cpu_count: 2,
            ..StubPlatform::default()
        })
    }

    #[tokio::test]
    async fn run_once_collects_all_enabled() {
        let dir = TempDir::new().unwrap();
        let mut file = std::fs::File::create(dir.path().join("auth.log")).unwrap();
        writeln!(file, "Failed password for root from 203.0.113.5 port 22").unwrap();

        let store = Arc::new(Store::open(dir.path()).await.unwrap());
        let config = test_config(&dir);
        let mut scheduler = Scheduler::new(&config, Arc::clone(&store), stub_platform());
        scheduler.run_once().await.unwrap();

        let stats = store.get_stats().await.unwrap();
        assert_eq!(stats.system_metrics, 1);
        assert_eq!(stats.network_metrics, 1);
        assert_eq!(stats.log_events, 1);
        // failed_login accrued reputation at ingestion.
        let rep = store.get_ip_reputation("203.0.113.5").await.unwrap().unwrap();
        assert_eq!(rep.failed_login_count, 1);
    }

    #[tokio::test]
    async fn start_runs_immediately_and_stop_drains() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(Store::open(dir.path()).await.unwrap());
        let config = test_config(&dir);
        let scheduler = Scheduler::new(&config, Arc::clone(&store), stub_platform());

        let handle = scheduler.start();
        // Immediate t=0 run lands within a couple of loop iterations.
        tokio::time::sleep(std::time::Duration::from_millis(300)).await;
        handle.stop().await;

        let stats = store.get_stats().await.unwrap();
        assert!(stats.system_metrics >= 1);
        assert!(stats.network_metrics >= 1);
    }

    #[tokio::test]
    async fn disabled_collectors_are_skipped() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(Store::open(dir.path()).await.unwrap());
        let mut config = test_config(&dir);
        config.system.enabled = false;
        config.network.enabled = false;
        config.logs.enabled = false;

        let mut scheduler = Scheduler::new(&config, Arc::clone(&store), stub_platform());
        scheduler.run_once().await.unwrap();

        let stats = store.get_stats().await.unwrap();
        assert_eq!(stats.system_metrics, 0);
        assert_eq!(stats.network_metrics, 0);
    }
}
