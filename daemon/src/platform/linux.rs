//! Linux probe implementation backed by `/proc` and a `df` subprocess for
//! filesystem usage.

use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::Instant;

use super::{DiskUsage, Platform, PROBE_TIMEOUT};

/// `/proc`-backed probes.
#[derive(Debug, Clone)]
pub struct LinuxPlatform {
    proc_root: PathBuf,
}

impl LinuxPlatform {
    #[must_use]
    pub fn new() -> Self {
        Self { proc_root: PathBuf::from("/proc") }
    }

    fn read(&self, rel: &str) -> io::Result<String> {
        std::fs::read_to_string(self.proc_root.join(rel))
    }
}

impl Default for LinuxPlatform {
    fn default() -> Self {
        Self::new()
    }
}

impl Platform for LinuxPlatform {
    fn name(&self) -> &'static str {
        "procfs"
    }

    fn cpu_stat(&self) -> io::Result<String> {
        self.read("stat")
    }

    fn meminfo(&self) -> io::Result<String> {
        self.read("meminfo")
    }

    fn loadavg(&self) -> io::Result<String> {
        self.read("loadavg")
    }

    fn diskstats(&self) -> io::Result<String> {
        self.read("diskstats")
    }

    fn disk_usage(&self, mount: &Path) -> io::Result<DiskUsage> {
        let output = run_probe(Command::new("df").arg("-kP").arg(mount))?;
        parse_df(&output)
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidData, "unparseable df output"))
    }

    fn net_dev(&self) -> io::Result<String> {
        self.read("net/dev")
    }

    fn tcp_tables(&self) -> Vec<String> {
        ["net/tcp", "net/tcp6"]
            .iter()
            .filter_map(|rel| self.read(rel).ok())
            .collect()
    }

    fn cpu_count(&self) -> i64 {
        std::thread::available_parallelism().map_or(1, |n| n.get() as i64)
    }

    fn pids(&self) -> io::Result<Vec<i64>> {
        let mut pids = Vec::new();
        for entry in std::fs::read_dir(&self.proc_root)? {
            let entry = entry?;
            if let Some(pid) = entry.file_name().to_str().and_then(|name| name.parse().ok()) {
                pids.push(pid);
            }
        }
        pids.sort_unstable();
        Ok(pids)
    }

    fn process_file(&self, pid: i64, file: &str) -> io::Result<String> {
        self.read(&format!("{pid}/{file}"))
    }
}

/// Run a probe command, killing it when it overruns [`PROBE_TIMEOUT`].
fn run_probe(command: &mut Command) -> io::Result<String> {
    let mut child = command
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .stdin(Stdio::null())
        .spawn()?;

    let deadline = Instant::now() + PROBE_TIMEOUT;
    loop {
        match child.try_wait()? {
            Some(status) if status.success() => break,
            Some(status) => {
                return Err(io::Error::other(format!("probe exited with {status}")));
            }
            None if Instant::now() >= deadline => {
                let _ = child.kill();
                let _ = child.wait();
                return Err(io::Error::new(io::ErrorKind::TimedOut, "probe timed out"));
            }
            None => std::thread::sleep(std::time::Duration::from_millis(25)),
        }
    }

    let mut output = String::new();
    if let Some(mut stdout) = child.stdout.take() {
        stdout.read_to_string(&mut output)?;
    }
    Ok(output)
}

/// Parse POSIX `df -kP` output: one header line, then
/// `filesystem 1024-blocks used available capacity mount`.
fn parse_df(output: &str) -> Option<DiskUsage> {
    let line = output.lines().nth(1)?;
    let fields: Vec<&str> = line.split_whitespace().collect();
    if fields.len() < 4 {
        return None;
    }
    let total_kib: u64 = fields[1].parse().ok()?;
    let used_kib: u64 = fields[2].parse().ok()?;
    Some(DiskUsage { total: total_kib * 1024, used: used_kib * 1024 })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_df_extracts_totals() {
        let output = "Filesystem     1024-blocks      Used Available Capacity Mounted on\n\
                      /dev/vda1         41152736  19246164  21890188      47% /\n";
        let usage = parse_df(output).unwrap();
        assert_eq!(usage.total, 41_152_736 * 1024);
        assert_eq!(usage.used, 19_246_164 * 1024);
    }

    #[test]
    fn parse_df_rejects_truncated_output() {
        assert!(parse_df("Filesystem\n").is_none());
        assert!(parse_df("").is_none());
    }

    #[test]
    fn probe_timeout_kills_stalled_command() {
        let err = run_probe(Command::new("sleep").arg("30")).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::TimedOut);
    }

    #[test]
    fn probe_captures_stdout() {
        let out = run_probe(Command::new("echo").arg("ok")).unwrap();
        assert_eq!(out.trim(), "ok");
    }
}
