//! Narrow platform probe seam.
//!
//! Samplers and tracers read host counters exclusively through [`Platform`]
//! so the probing mechanism is selected once at startup and tests can feed
//! fixture text instead of live `/proc` contents. Probe failures surface as
//! `io::Error` and degrade to missing fields upstream, never to a failed
//! tick.

pub mod linux;

use std::io;
use std::path::Path;
use std::sync::Arc;

pub use linux::LinuxPlatform;

/// Hard budget for any external probe command.
pub const PROBE_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(2);

/// Filesystem usage for one mount point.
#[derive(Debug, Clone, Copy, Default)]
pub struct DiskUsage {
    pub total: u64,
    pub used: u64,
}

/// Host counter probes. Implementations must be cheap to call once per
/// tick and must never block past [`PROBE_TIMEOUT`].
pub trait Platform: Send + Sync {
    /// Probe mechanism identifier, reported in debug output only.
    fn name(&self) -> &'static str;

    /// Aggregate CPU time counters (`/proc/stat` format).
    fn cpu_stat(&self) -> io::Result<String>;

    /// Memory counters (`/proc/meminfo` format).
    fn meminfo(&self) -> io::Result<String>;

    /// Load averages (`/proc/loadavg` format).
    fn loadavg(&self) -> io::Result<String>;

    /// Block device I/O counters (`/proc/diskstats` format).
    fn diskstats(&self) -> io::Result<String>;

    /// Usage of the filesystem mounted at `mount`.
    fn disk_usage(&self, mount: &Path) -> io::Result<DiskUsage>;

    /// Interface byte/packet/error counters (`/proc/net/dev` format).
    fn net_dev(&self) -> io::Result<String>;

    /// TCP connection tables (`/proc/net/tcp` and `/proc/net/tcp6`
    /// contents); missing tables are simply absent from the result.
    fn tcp_tables(&self) -> Vec<String>;

    /// Number of logical CPUs.
    fn cpu_count(&self) -> i64;

    /// Live process ids.
    fn pids(&self) -> io::Result<Vec<i64>>;

    /// One file from a process's proc directory (`status`, `stat`, `io`,
    /// `cmdline`, `comm`).
    fn process_file(&self, pid: i64, file: &str) -> io::Result<String>;
}

/// Select the platform implementation for this host.
#[must_use]
pub fn detect() -> Arc<dyn Platform> {
    Arc::new(LinuxPlatform::new())
}

/// Fixture-backed platform for tests.
#[cfg(test)]
#[derive(Debug, Default, Clone)]
pub struct StubPlatform {
    pub cpu_stat: Option<String>,
    pub meminfo: Option<String>,
    pub loadavg: Option<String>,
    pub diskstats: Option<String>,
    pub disk_usage: Option<DiskUsage>,
    pub net_dev: Option<String>,
    pub tcp_tables: Vec<String>,
    pub cpu_count: i64,
    pub pids: Vec<i64>,
    pub process_files: std::collections::HashMap<(i64, &'static str), String>,
}

#[cfg(test)]
fn stub_read(field: Option<&String>) -> io::Result<String> {
    field
        .cloned()
        .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "probe not stubbed"))
}

#[cfg(test)]
impl Platform for StubPlatform {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn cpu_stat(&self) -> io::Result<String> {
        stub_read(self.cpu_stat.as_ref())
    }

    fn meminfo(&self) -> io::Result<String> {
        stub_read(self.meminfo.as_ref())
    }

    fn loadavg(&self) -> io::Result<String> {
        stub_read(self.loadavg.as_ref())
    }

    fn diskstats(&self) -> io::Result<String> {
        stub_read(self.diskstats.as_ref())
    }

    fn disk_usage(&self, _mount: &Path) -> io::Result<DiskUsage> {
        self.disk_usage
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "probe not stubbed"))
    }

    fn net_dev(&self) -> io::Result<String> {
        stub_read(self.net_dev.as_ref())
    }

    fn tcp_tables(&self) -> Vec<String> {
        self.tcp_tables.clone()
    }

    fn cpu_count(&self) -> i64 {
        self.cpu_count
    }

    fn pids(&self) -> io::Result<Vec<i64>> {
        Ok(self.pids.clone())
    }

    fn process_file(&self, pid: i64, file: &str) -> io::Result<String> {
        self.process_files
            .iter()
            .find(|((p, f), _)| *p == pid && *f == file)
            .map(|(_, content)| content.clone())
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "probe not stubbed"))
    }
}
