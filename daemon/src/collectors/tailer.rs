//! Incremental log tailer.
//!
//! One instance serves every configured source. Per-source state is a
//! byte cursor, held in memory only: it is not persisted across process
//! restarts. Rotation is detected by size regression (the file shrank
//! below the cursor) and resets the cursor to zero.

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use crate::config::LogsConfig;
use crate::storage::LogEvent;

use super::parsers;
use super::{Collector, Sample};

struct TailSource {
    name: String,
    path: PathBuf,
    enabled: bool,
}

pub struct LogTailer {
    enabled: bool,
    sources: Vec<TailSource>,
    cursors: HashMap<PathBuf, u64>,
    unmatched: HashMap<String, u64>,
}

impl LogTailer {
    #[must_use]
    pub fn new(config: &LogsConfig) -> Self {
        let sources = config
            .sources
            .iter()
            .map(|(name, source)| TailSource {
                name: name.clone(),
                path: source.path.clone(),
                enabled: source.enabled,
            })
            .collect();
        Self {
            enabled: config.enabled,
            sources,
            cursors: HashMap::new(),
            unmatched: HashMap::new(),
        }
    }

    /// Move every cursor to the current end of file. Called once at daemon
    /// startup so a restart does not re-ingest content that predates it;
    /// lines written while the daemon was down are lost by design.
    pub fn prime_to_eof(&mut self) {
        for source in &self.sources {
            if let Ok(meta) = std::fs::metadata(&source.path) {
                self.cursors.insert(source.path.clone(), meta.len());
            }
        }
    }

    /// Tail every enabled source once, returning the newly parsed events.
    /// A failure on one source never aborts the batch.
    pub fn collect_events(&mut self, now: i64) -> Vec<LogEvent> {
        let mut events = Vec::new();

        for i in 0..self.sources.len() {
            let (name, path, enabled) = {
                let s = &self.sources[i];
                (s.name.clone(), s.path.clone(), s.enabled)
            };
            if !enabled || !path.exists() {
                continue;
            }

            match self.tail_file(&name, &path, now) {
                Ok(mut batch) => events.append(&mut batch),
                Err(err) => {
                    tracing::warn!(source = %name, path = %path.display(), error = %err, "error tailing log file");
                }
            }
        }

        events
    }

    /// Read whole lines from the cursor to EOF, parse them, and commit the
    /// new cursor. A trailing partial line (no newline yet) is left for
    /// the next tick and does not advance the cursor.
    fn tail_file(&mut self, source: &str, path: &Path, now: i64) -> std::io::Result<Vec<LogEvent>> {
        let size = std::fs::metadata(path)?.len();
        let mut pos = self.cursors.get(path).copied().unwrap_or(0);

        if size < pos {
            tracing::info!(path = %path.display(), "log file rotated, starting from beginning");
            pos = 0;
        }

        let mut file = File::open(path)?;
        file.seek(SeekFrom::Start(pos))?;
        let mut reader = BufReader::new(file);

        let mut events = Vec::new();
        let mut line = String::new();
        loop {
            line.clear();
            let read = reader.read_line(&mut line)?;
            if read == 0 {
                break;
            }
            if !line.ends_with('\n') {
                // Partial write in progress; re-read it next tick.
                break;
            }
            pos += read as u64;

            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            match parsers::parse_line(source, trimmed, now) {
                Some(event) => events.push(event),
                None => {
                    *self.unmatched.entry(source.to_string()).or_default() += 1;
                    tracing::debug!(source, "unmatched log line dropped");
                }
            }
        }

        self.cursors.insert(path.to_path_buf(), pos);
        Ok(events)
    }

    /// Lines a source's parser could not match, since startup.
    #[must_use]
    pub fn unmatched_count(&self, source: &str) -> u64 {
        self.unmatched.get(source).copied().unwrap_or(0)
    }
}

impl Collector for LogTailer {
    fn name(&self) -> &'static str {
        "log-tailer"
    }

    fn enabled(&self) -> bool {
        self.enabled
    }

    fn validate(&self) -> bool {
        self.sources.iter().any(|s| s.enabled && s.path.exists())
    }

    fn sample(&mut self, now: i64) -> anyhow::Result<Sample> {
        Ok(Sample::Events(self.collect_events(now)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{LogSourceConfig, LogsConfig};
    use std::io::Write;
    use tempfile::TempDir;

    fn tailer_for(dir: &TempDir, name: &str, file: &str) -> LogTailer {
        let mut config = LogsConfig { enabled: true, sources: std::collections::BTreeMap::new() };
        config.sources.insert(
            name.to_string(),
            LogSourceConfig { path: dir.path().join(file), enabled: true },
        );
        LogTailer::new(&config)
    }

    fn append(path: &Path, text: &str) {
        let mut f = std::fs::OpenOptions::new().create(true).append(true).open(path).unwrap();
        f.write_all(text.as_bytes()).unwrap();
    }

    #[test]
    fn tails_only_new_lines() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("app.log");
        let mut tailer = tailer_for(&dir, "app", "app.log");

        append(&path, "error one\nerror two\n");
        assert_eq!(tailer.collect_events(1).len(), 2);

        // Nothing new, nothing returned.
        assert_eq!(tailer.collect_events(2).len(), 0);

        append(&path, "error three\n");
        let events = tailer.collect_events(3);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].message, "error three");
    }

    #[test]
    fn rotation_resets_cursor() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("auth.log");
        let mut tailer = tailer_for(&dir, "auth", "auth.log");

        append(
            &path,
            "noise line one with plenty of padding to make the original file long\n\
             noise line two with plenty of padding to make the original file long\n\
             noise line three with plenty of padding to make the original file long\n",
        );
        tailer.collect_events(1);

        // Truncate (rotate) and write fresh content, shorter than the old.
        std::fs::write(&path, "").unwrap();
        append(&path, "junk\nFailed password for root from 203.0.113.42 port 22\njunk2\n");

        let events = tailer.collect_events(2);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].action.as_deref(), Some("failed_login"));
    }

    #[test]
    fn partial_line_does_not_advance_cursor() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("app.log");
        let mut tailer = tailer_for(&dir, "app", "app.log");

        append(&path, "complete error line\nincomplete err");
        assert_eq!(tailer.collect_events(1).len(), 1);

        // Completing the line yields it exactly once.
        append(&path, "or tail\n");
        let events = tailer.collect_events(2);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].message, "incomplete error tail");
    }

    #[test]
    fn prime_to_eof_skips_existing_content() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("app.log");
        let mut tailer = tailer_for(&dir, "app", "app.log");

        append(&path, "old error 1\nold error 2\n");
        tailer.prime_to_eof();
        assert_eq!(tailer.collect_events(1).len(), 0);

        append(&path, "new error\n");
        assert_eq!(tailer.collect_events(2).len(), 1);
    }

    #[test]
    fn unmatched_lines_are_counted_not_fatal() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("f2b.log");
        let mut tailer = tailer_for(&dir, "fail2ban", "f2b.log");

        append(&path, "server started\nNOTICE [sshd] Ban 203.0.113.9\nrotating logs\n");
        let events = tailer.collect_events(1);
        assert_eq!(events.len(), 1);
        assert_eq!(tailer.unmatched_count("fail2ban"), 2);
    }

    #[test]
    fn missing_file_is_skipped() {
        let dir = TempDir::new().unwrap();
        let mut tailer = tailer_for(&dir, "app", "never-created.log");
        assert_eq!(tailer.collect_events(1).len(), 0);
        assert!(!tailer.validate());
    }
}
