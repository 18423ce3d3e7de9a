//! System counter sampler: CPU, memory, disk, load average.
//!
//! CPU percent is derived from consecutive cumulative jiffy counters, so
//! the first sample after startup reports `None`. Every probe failure
//! degrades to missing fields; the sampler itself never errors on an
//! absent source.

use std::path::Path;
use std::sync::Arc;

use crate::config::SystemConfig;
use crate::platform::Platform;
use crate::storage::SystemMetric;

use super::{Collector, Sample};

/// Cumulative jiffy counters from the aggregate `cpu` line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CpuTimes {
    pub idle: u64,
    pub total: u64,
}

pub struct SystemSampler {
    platform: Arc<dyn Platform>,
    enabled: bool,
    metrics: Vec<String>,
    last_cpu: Option<CpuTimes>,
}

impl SystemSampler {
    #[must_use]
    pub fn new(config: &SystemConfig, platform: Arc<dyn Platform>) -> Self {
        Self {
            platform,
            enabled: config.enabled,
            metrics: config.metrics.clone(),
            last_cpu: None,
        }
    }

    fn wants(&self, metric: &str) -> bool {
        self.metrics.iter().any(|m| m == metric)
    }

    fn wants_prefix(&self, prefix: &str) -> bool {
        self.metrics.iter().any(|m| m.starts_with(prefix))
    }

    /// Collect one sample at `ts`.
    pub fn collect(&mut self, ts: i64) -> SystemMetric {
        let mut metric = SystemMetric::at(ts);

        if self.wants("cpu_percent") || self.wants("cpu_count") {
            match self.platform.cpu_stat().map(|text| parse_cpu_times(&text)) {
                Ok(Some(times)) => {
                    if self.wants("cpu_percent") {
                        metric.cpu_percent = cpu_percent(self.last_cpu, times);
                    }
                    self.last_cpu = Some(times);
                }
                Ok(None) => tracing::debug!("malformed cpu stat probe"),
                Err(err) => tracing::debug!(error = %err, "cpu stat probe failed"),
            }
            if self.wants("cpu_count") {
                metric.cpu_count = Some(self.platform.cpu_count());
            }
        }

        if self.wants_prefix("memory_") {
            match self.platform.meminfo() {
                Ok(text) => {
                    let mem = parse_meminfo(&text);
                    if self.wants("memory_total") {
                        metric.memory_total = Some(mem.total);
                    }
                    if self.wants("memory_available") {
                        metric.memory_available = Some(mem.available);
                    }
                    if self.wants("memory_percent") {
                        metric.memory_percent = Some(mem.percent);
                    }
                }
                Err(err) => tracing::debug!(error = %err, "meminfo probe failed"),
            }
        }

        if self.wants("disk_percent") || self.wants("disk_usage") {
            match self.platform.disk_usage(Path::new("/")) {
                Ok(usage) => {
                    metric.disk_total = Some(usage.total as i64);
                    metric.disk_used = Some(usage.used as i64);
                    metric.disk_percent = Some(if usage.total > 0 {
                        round2(100.0 * usage.used as f64 / usage.total as f64)
                    } else {
                        0.0
                    });
                }
                Err(err) => tracing::debug!(error = %err, "disk usage probe failed"),
            }
        }

        if self.wants("disk_io") {
            match self.platform.diskstats() {
                Ok(text) => {
                    let (read_bytes, write_bytes) = parse_diskstats(&text);
                    metric.disk_read_bytes = Some(read_bytes);
                    metric.disk_write_bytes = Some(write_bytes);
                }
                Err(err) => tracing::debug!(error = %err, "diskstats probe failed"),
            }
        }

        if self.wants("load_average") {
            match self.platform.loadavg().map(|text| parse_loadavg(&text)) {
                Ok(Some((one, five, fifteen))) => {
                    metric.load_1min = Some(one);
                    metric.load_5min = Some(five);
                    metric.load_15min = Some(fifteen);
                }
                Ok(None) => tracing::debug!("malformed loadavg probe"),
                Err(err) => tracing::debug!(error = %err, "loadavg probe failed"),
            }
        }

        metric
    }

    /// Probe mechanism in use; debug output only, never persisted.
    #[must_use]
    pub fn probe_method(&self) -> &'static str {
        self.platform.name()
    }
}

impl Collector for SystemSampler {
    fn name(&self) -> &'static str {
        "system-metrics"
    }

    fn enabled(&self) -> bool {
        self.enabled
    }

    fn validate(&self) -> bool {
        self.platform.cpu_stat().is_ok() && self.platform.meminfo().is_ok()
    }

    fn sample(&mut self, now: i64) -> anyhow::Result<Sample> {
        Ok(Sample::System(self.collect(now)))
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Parse the aggregate `cpu` line of `/proc/stat` into idle/total jiffies.
/// Uses the first seven time fields (user, nice, system, idle, iowait,
/// irq, softirq).
#[must_use]
pub fn parse_cpu_times(stat: &str) -> Option<CpuTimes> {
    let line = stat.lines().next()?;
    let mut fields = line.split_whitespace();
    if fields.next()? != "cpu" {
        return None;
    }
    let times: Vec<u64> = fields.take(7).map_while(|f| f.parse().ok()).collect();
    if times.len() < 7 {
        return None;
    }
    Some(CpuTimes { idle: times[3], total: times.iter().sum() })
}

/// Busy percentage between two cumulative readings; `None` on the first
/// call or when the counters did not advance.
#[must_use]
pub fn cpu_percent(last: Option<CpuTimes>, current: CpuTimes) -> Option<f64> {
    let last = last?;
    let total_diff = current.total.checked_sub(last.total)?;
    let idle_diff = current.idle.checked_sub(last.idle)?;
    if total_diff == 0 {
        return None;
    }
    Some(round2(100.0 * (total_diff - idle_diff) as f64 / total_diff as f64))
}

/// Memory counters in bytes, with the pre-`MemAvailable` fallback of
/// free + buffers + cached.
#[derive(Debug, Clone, Copy, Default)]
pub struct MemoryStats {
    pub total: i64,
    pub available: i64,
    pub percent: f64,
}

#[must_use]
pub fn parse_meminfo(meminfo: &str) -> MemoryStats {
    let mut total = 0_i64;
    let mut available = 0_i64;
    let mut free = 0_i64;
    let mut buffers = 0_i64;
    let mut cached = 0_i64;

    for line in meminfo.lines() {
        let mut parts = line.split_whitespace();
        let (Some(key), Some(value)) = (parts.next(), parts.next()) else {
            continue;
        };
        let Ok(kib) = value.parse::<i64>() else {
            continue;
        };
        let bytes = kib * 1024;
        match key.trim_end_matches(':') {
            "MemTotal" => total = bytes,
            "MemAvailable" => available = bytes,
            "MemFree" => free = bytes,
            "Buffers" => buffers = bytes,
            "Cached" => cached = bytes,
            _ => {}
        }
    }

    if available == 0 {
        available = free + buffers + cached;
    }

    let percent = if total > 0 {
        round2(100.0 * (1.0 - available as f64 / total as f64))
    } else {
        0.0
    };

    MemoryStats { total, available, percent }
}

/// Cumulative read/write bytes across whole-disk devices in
/// `/proc/diskstats` (sectors are 512 bytes). Partitions are skipped so
/// traffic is not double counted.
#[must_use]
pub fn parse_diskstats(diskstats: &str) -> (i64, i64) {
    let mut read_sectors = 0_i64;
    let mut write_sectors = 0_i64;

    for line in diskstats.lines() {
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() < 14 {
            continue;
        }
        let device = fields[2];
        if !is_whole_disk(device) {
            continue;
        }
        if let (Ok(read), Ok(write)) = (fields[5].parse::<i64>(), fields[9].parse::<i64>()) {
            read_sectors += read;
            write_sectors += write;
        }
    }

    (read_sectors * 512, write_sectors * 512)
}

/// Whole-disk device names: `sdX`/`vdX`/`hdX` without a partition digit,
/// or `nvmeXnY` without a `pZ` partition suffix.
fn is_whole_disk(device: &str) -> bool {
    if let Some(rest) = device.strip_prefix("nvme") {
        return rest.contains('n') && !rest.contains('p');
    }
    (device.starts_with("sd") || device.starts_with("vd") || device.starts_with("hd"))
        && device.chars().last().is_some_and(|c| c.is_ascii_alphabetic())
}

/// First three fields of `/proc/loadavg`.
#[must_use]
pub fn parse_loadavg(loadavg: &str) -> Option<(f64, f64, f64)> {
    let mut fields = loadavg.split_whitespace();
    let one = fields.next()?.parse().ok()?;
    let five = fields.next()?.parse().ok()?;
    let fifteen = fields.next()?.parse().ok()?;
    Some((one, five, fifteen))
}
