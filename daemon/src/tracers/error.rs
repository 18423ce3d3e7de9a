//! Error tracer: fixed regex taxonomy over error messages, severity
//! scoring, canned root-cause hints and recovery suggestions.

use std::sync::{LazyLock, Mutex};

use regex::Regex;

use crate::storage::ErrorTraceInfo;

/// Taxonomy patterns in match priority order; the first hit wins.
static ERROR_PATTERNS: LazyLock<Vec<(&'static str, Regex)>> = LazyLock::new(|| {
    [
        ("app_exception", r"(\w+(?:Error|Exception)):\s*(.+)"),
        ("stack_trace", r"Traceback \(most recent call last\)|stack backtrace:"),
        ("db_connection", r"(?i)(?:connection|connect).+(?:refused|failed|timeout)"),
        ("db_query", r"(?i)(?:SQL|query).+(?:error|failed|syntax)"),
        ("db_deadlock", r"(?i)deadlock"),
        ("out_of_memory", r"(?i)(?:out of memory|OOM|MemoryError)"),
        ("memory_leak", r"(?i)memory.+(?:leak|exhausted)"),
        ("disk_full", r"(?i)(?:no space|disk full|ENOSPC)"),
        ("disk_io", r"(?i)(?:I/O error|disk.+error)"),
        ("connection_timeout", r"(?i)connection.+timeout"),
        ("connection_refused", r"(?i)connection.+refused"),
        ("network_unreachable", r"(?i)network.+unreachable"),
        ("permission_denied", r"(?i)(?:permission denied|EACCES)"),
        ("file_not_found", r"(?i)(?:file not found|ENOENT|No such file)"),
        ("too_many_files", r"(?i)(?:too many.+files|EMFILE)"),
        ("resource_unavailable", r"(?i)resource.+(?:unavailable|busy)"),
        ("segmentation_fault", r"(?i)segmentation fault|SIGSEGV"),
        ("assertion_failed", r"(?i)assertion.+failed"),
    ]
    .into_iter()
    .map(|(name, pattern)| (name, Regex::new(pattern).expect("valid regex")))
    .collect()
});

static EXCEPTION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\w+(?:Error|Exception)):\s*(.+)").expect("valid regex"));

static FILE_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)(?:file\s+|at\s+)["']?(?P<path>[/\w.-]+\.\w+)["']?(?:,?\s*line\s+|:)(?P<line>\d+)"#)
        .expect("valid regex")
});

static ERROR_CODE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)(?:error|errno|code)[:\s#]+(\d+)").expect("valid regex"));

/// High-level category for a taxonomy entry.
#[must_use]
pub fn categorize(error_type: &str) -> &'static str {
    match error_type {
        "app_exception" | "stack_trace" | "assertion_failed" => "application",
        "db_connection" | "db_query" | "db_deadlock" => "database",
        "out_of_memory" | "memory_leak" | "disk_full" | "disk_io" | "too_many_files"
        | "resource_unavailable" => "resource",
        "connection_timeout" | "connection_refused" | "network_unreachable" => "network",
        "permission_denied" => "security",
        "file_not_found" => "filesystem",
        "segmentation_fault" => "system",
        _ => "unknown",
    }
}

#[derive(Debug, Default)]
pub struct ErrorTracer {
    history: Mutex<Vec<ErrorTraceInfo>>,
}

impl ErrorTracer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Match a message against the taxonomy and produce the full trace
    /// record. Always succeeds; an unrecognized message simply has no
    /// type or category.
    pub fn trace_error(&self, message: &str, level: Option<&str>) -> ErrorTraceInfo {
        let mut info = ErrorTraceInfo {
            severity: severity(level, message),
            ..ErrorTraceInfo::default()
        };

        for (error_type, pattern) in ERROR_PATTERNS.iter() {
            if pattern.is_match(message) {
                info.error_type = Some((*error_type).to_string());
                info.error_category = Some(categorize(error_type).to_string());
                break;
            }
        }

        if let Some(caps) = EXCEPTION.captures(message) {
            info.exception_type = Some(caps[1].to_string());
        }
        info.has_stacktrace = message.contains("Traceback (most recent call last)")
            || message.contains("stack backtrace:");

        if let Some(caps) = FILE_LINE.captures(message) {
            info.file_path = Some(caps["path"].to_string());
            info.line_number = caps["line"].parse().ok();
        }
        if let Some(caps) = ERROR_CODE.captures(message) {
            info.error_code = Some(caps[1].to_string());
        }

        info.root_cause_hints = root_cause_hints(info.error_type.as_deref());
        info.recovery_suggestions = recovery_suggestions(
            info.error_type.as_deref(),
            info.error_category.as_deref(),
        );

        self.history.lock().expect("history lock").push(info.clone());
        info
    }

    /// All traces recorded since startup (or the last clear), in order.
    #[must_use]
    pub fn history(&self) -> Vec<ErrorTraceInfo> {
        self.history.lock().expect("history lock").clone()
    }

    pub fn clear_history(&self) {
        self.history.lock().expect("history lock").clear();
    }
}

/// Severity in [0, 100]: base from the level, bumped for crash-class
/// keywords and database mentions.
fn severity(level: Option<&str>, message: &str) -> i64 {
    let mut score = match level.map(str::to_uppercase).as_deref() {
        Some("DEBUG") => 0,
        Some("INFO") => 10,
        Some("WARNING") => 30,
        Some("ERROR") => 60,
        Some("CRITICAL") => 90,
        Some("FATAL") => 100,
        _ => 50,
    };

    let lower = message.to_lowercase();
    const CRASH_KEYWORDS: [&str; 8] = [
        "fatal", "critical", "crash", "panic", "segfault", "out of memory", "disk full", "deadlock",
    ];
    if CRASH_KEYWORDS.iter().any(|k| lower.contains(k)) {
        score += 15;
    }
    if ["database", "sql", "query"].iter().any(|k| lower.contains(k)) {
        score += 10;
    }

    score.min(100)
}

fn root_cause_hints(error_type: Option<&str>) -> Vec<String> {
    let hints: &[&str] = match error_type {
        Some("db_connection") => &[
            "Database service may be down or unreachable",
            "Check network connectivity to database server",
            "Verify database credentials and connection string",
        ],
        Some("db_deadlock") => &[
            "Multiple transactions competing for same resources",
            "Review transaction isolation levels",
            "Optimize query order to avoid deadlocks",
        ],
        Some("out_of_memory") | Some("memory_leak") => &[
            "Application consuming too much memory",
            "Check for memory leaks in application code",
            "Consider increasing system memory or swap",
        ],
        Some("disk_full") => &[
            "Filesystem has run out of space",
            "Check for large log files or temporary files",
            "Review log rotation policies",
        ],
        Some("too_many_files") => &[
            "Process has exceeded open file limit",
            "Check ulimit settings",
            "Look for file descriptor leaks",
        ],
        Some("connection_timeout") => &[
            "Remote service not responding in time",
            "Network latency or bandwidth issues",
            "Service may be overloaded",
        ],
        Some("connection_refused") => &[
            "Service not running or not listening on expected port",
            "Firewall may be blocking connection",
            "Check service configuration",
        ],
        Some("permission_denied") => &[
            "Insufficient permissions to access resource",
            "Check file/directory ownership and permissions",
            "Verify process is running with correct user/group",
        ],
        _ => &[],
    };
    hints.iter().map(ToString::to_string).collect()
}

fn recovery_suggestions(error_type: Option<&str>, category: Option<&str>) -> Vec<String> {
    let mut suggestions: Vec<String> = match category {
        Some("database") => [
            "Implement database connection retry logic with exponential backoff",
            "Add database connection pooling",
            "Set up database health checks",
        ]
        .iter()
        .map(ToString::to_string)
        .collect(),
        Some("resource") => match error_type {
            Some("out_of_memory" | "memory_leak") => [
                "Implement memory monitoring and alerting",
                "Add automatic process restart on high memory usage",
                "Profile application to find memory leaks",
            ]
            .iter()
            .map(ToString::to_string)
            .collect(),
            Some("disk_full") => [
                "Implement automatic log rotation",
                "Add disk space monitoring and alerts",
                "Clean up old temporary files regularly",
            ]
            .iter()
            .map(ToString::to_string)
            .collect(),
            _ => Vec::new(),
        },
        Some("network") => [
            "Implement retry logic with circuit breaker pattern",
            "Add connection timeouts to prevent hanging",
            "Set up health check endpoints",
        ]
        .iter()
        .map(ToString::to_string)
        .collect(),
        _ => Vec::new(),
    };

    suggestions.push("Add detailed logging around the error location".to_string());
    suggestions.push("Set up alerting for this error type".to_string());
    suggestions
}
