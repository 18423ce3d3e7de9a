//! Process tracer: resolve service names to live processes and capture
//! their resource usage from the platform process tables.

use std::sync::Arc;

use crate::platform::Platform;
use crate::storage::ProcessTrace;

/// Aggregated usage across a set of processes.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct ResourceSummary {
    pub process_count: usize,
    pub total_memory_rss: i64,
    pub total_memory_vm: i64,
    pub total_threads: i64,
    pub total_read_bytes: i64,
    pub total_write_bytes: i64,
}

pub struct ProcessTracer {
    platform: Arc<dyn Platform>,
}

impl ProcessTracer {
    #[must_use]
    pub fn new(platform: Arc<dyn Platform>) -> Self {
        Self { platform }
    }

    /// Trace one process; `None` when it is gone or unreadable.
    #[must_use]
    pub fn trace_process(&self, pid: i64) -> Option<ProcessTrace> {
        let status = self.platform.process_file(pid, "status").ok()?;

        let mut trace = ProcessTrace { pid, ..ProcessTrace::default() };
        parse_status(&status, &mut trace);

        if let Ok(cmdline) = self.platform.process_file(pid, "cmdline") {
            let cleaned = cmdline.replace('\0', " ").trim().to_string();
            if !cleaned.is_empty() {
                trace.cmdline = Some(cleaned);
            }
        }
        if let Ok(stat) = self.platform.process_file(pid, "stat") {
            if let Some((utime, stime)) = parse_stat_times(&stat) {
                trace.cpu_utime = utime;
                trace.cpu_stime = stime;
            }
        }
        if let Ok(io) = self.platform.process_file(pid, "io") {
            parse_io(&io, &mut trace);
        }

        Some(trace)
    }

    /// All processes whose name contains `service` (case-insensitive).
    #[must_use]
    pub fn trace_by_name(&self, service: &str) -> Vec<ProcessTrace> {
        let needle = service.to_lowercase();
        let Ok(pids) = self.platform.pids() else {
            return Vec::new();
        };

        pids.into_iter()
            .filter_map(|pid| self.trace_process(pid))
            .filter(|trace| {
                trace.name.as_deref().is_some_and(|name| name.to_lowercase().contains(&needle))
            })
            .collect()
    }

    /// Every live pid the platform reports.
    #[must_use]
    pub fn all_pids(&self) -> Vec<i64> {
        self.platform.pids().unwrap_or_default()
    }

    /// Aggregate usage across the given traces.
    #[must_use]
    pub fn resource_summary(traces: &[ProcessTrace]) -> ResourceSummary {
        let mut summary = ResourceSummary { process_count: traces.len(), ..Default::default() };
        for trace in traces {
            summary.total_memory_rss += trace.memory_rss;
            summary.total_memory_vm += trace.memory_vm;
            summary.total_threads += trace.threads;
            summary.total_read_bytes += trace.read_bytes;
            summary.total_write_bytes += trace.write_bytes;
        }
        summary
    }
}

/// Fill name/state/ppid/memory/threads from a `status` file. VmSize and
/// VmRSS are reported in KiB.
fn parse_status(status: &str, trace: &mut ProcessTrace) {
    for line in status.lines() {
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let value = value.trim();
        match key {
            "Name" => trace.name = Some(value.to_string()),
            "State" => {
                trace.state = value.split_whitespace().next().map(ToString::to_string);
            }
            "PPid" => trace.parent_pid = value.parse().ok(),
            "VmSize" => {
                trace.memory_vm =
                    value.split_whitespace().next().and_then(|v| v.parse().ok()).unwrap_or(0) * 1024;
            }
            "VmRSS" => {
                trace.memory_rss =
                    value.split_whitespace().next().and_then(|v| v.parse().ok()).unwrap_or(0) * 1024;
            }
            "Threads" => trace.threads = value.parse().unwrap_or(0),
            _ => {}
        }
    }
}

/// utime/stime (fields 14 and 15) from a `stat` line. The comm field may
/// contain spaces, so parsing starts after the closing paren.
fn parse_stat_times(stat: &str) -> Option<(i64, i64)> {
    let after_comm = &stat[stat.rfind(')')? + 1..];
    let fields: Vec<&str> = after_comm.split_whitespace().collect();
    // after_comm starts at field 3 (state), so utime/stime are at 11/12.
    let utime = fields.get(11)?.parse().ok()?;
    let stime = fields.get(12)?.parse().ok()?;
    Some((utime, stime))
}

/// read/write byte and syscall counters from an `io` file.
fn parse_io(io: &str, trace: &mut ProcessTrace) {
    for line in io.lines() {
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let Ok(value) = value.trim().parse::<i64>() else {
            continue;
        };
        match key {
            "read_bytes" => trace.read_bytes = value,
            "write_bytes" => trace.write_bytes = value,
            "syscr" => trace.read_syscalls = value,
            "syscw" => trace.write_syscalls = value,
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::StubPlatform;
    use std::collections::HashMap;

    const STATUS: &str = "Name:\tnginx\nState:\tS (sleeping)\nPPid:\t1\n\
                          VmSize:\t  20000 kB\nVmRSS:\t   5000 kB\nThreads:\t4\n";
    const STAT: &str = "42 (nginx: worker) S 1 42 42 0 -1 4194624 100 0 0 0 150 75 0 0 20 0 4 0 100 0 0";
    const IO: &str = "rchar: 999\nwchar: 888\nsyscr: 10\nsyscw: 20\nread_bytes: 4096\nwrite_bytes: 8192\n";

    fn stub() -> StubPlatform {
        let mut files = HashMap::new();
        files.insert((42_i64, "status"), STATUS.to_string());
        files.insert((42_i64, "stat"), STAT.to_string());
        files.insert((42_i64, "io"), IO.to_string());
        files.insert((42_i64, "cmdline"), "nginx\0-g\0daemon off;\0".to_string());
        StubPlatform { pids: vec![42], process_files: files, ..StubPlatform::default() }
    }

    #[test]
    fn trace_process_fills_all_sections() {
        let tracer = ProcessTracer::new(std::sync::Arc::new(stub()));
        let trace = tracer.trace_process(42).unwrap();
        assert_eq!(trace.name.as_deref(), Some("nginx"));
        assert_eq!(trace.state.as_deref(), Some("S"));
        assert_eq!(trace.parent_pid, Some(1));
        assert_eq!(trace.memory_vm, 20000 * 1024);
        assert_eq!(trace.memory_rss, 5000 * 1024);
        assert_eq!(trace.threads, 4);
        assert_eq!(trace.cpu_utime, 150);
        assert_eq!(trace.cpu_stime, 75);
        assert_eq!(trace.read_bytes, 4096);
        assert_eq!(trace.write_syscalls, 20);
        assert_eq!(trace.cmdline.as_deref(), Some("nginx -g daemon off;"));
    }

    #[test]
    fn stat_times_survive_spaces_in_comm() {
        assert_eq!(parse_stat_times(STAT), Some((150, 75)));
    }

    #[test]
    fn trace_by_name_matches_case_insensitively() {
        let tracer = ProcessTracer::new(std::sync::Arc::new(stub()));
        assert_eq!(tracer.trace_by_name("NGINX").len(), 1);
        assert!(tracer.trace_by_name("postgres").is_empty());
    }

    #[test]
    fn gone_process_is_none() {
        let tracer = ProcessTracer::new(std::sync::Arc::new(stub()));
        assert!(tracer.trace_process(7777).is_none());
    }

    #[test]
    fn summary_sums_resources() {
        let tracer = ProcessTracer::new(std::sync::Arc::new(stub()));
        let traces = tracer.trace_by_name("nginx");
        let summary = ProcessTracer::resource_summary(&traces);
        assert_eq!(summary.process_count, 1);
        assert_eq!(summary.total_memory_rss, 5000 * 1024);
        assert_eq!(summary.total_threads, 4);
    }
}
