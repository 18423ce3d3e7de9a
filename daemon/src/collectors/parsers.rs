//! Per-source log line parsers.
//!
//! Each parser is a pure function `line -> Option<LogEvent>`; returning
//! `None` discards the line. Unknown sources fall through to a generic
//! parser that infers a level from error keywords.

use std::sync::LazyLock;

use regex::Regex;
use serde_json::json;

use crate::storage::LogEvent;

static FAIL2BAN_BAN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\[(?P<jail>[\w-]+)\]\s+(?P<action>Ban|Unban)\s+(?P<ip>[\d.]+)").expect("valid regex")
});

static FAIL2BAN_FOUND: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\[(?P<jail>[\w-]+)\]\s+Found\s+(?P<ip>[\d.]+)").expect("valid regex")
});

static AUTH_FAILED: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"Failed password for (?:invalid user )?(?P<user>\w+) from (?P<ip>[\d.]+)")
        .expect("valid regex")
});

static AUTH_ACCEPTED: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"Accepted (?P<method>\w+) for (?P<user>\w+) from (?P<ip>[\d.]+)")
        .expect("valid regex")
});

static SYSLOG_HEADER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?P<ts>\w+\s+\d+\s+[\d:]+)\s+(?P<host>\S+)\s+(?P<service>\S+?)(?:\[\d+\])?\s*:\s*(?P<message>.*)",
    )
    .expect("valid regex")
});

static DJANGO_LEVEL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\[(?P<level>\w+)\]\s+(?P<message>.*)").expect("valid regex"));

static NGINX_ACCESS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"(?P<ip>[\d.]+)\s+-\s+-\s+\[(?P<ts>[^\]]+)\]\s+"(?P<request>[^"]*)"\s+(?P<status>\d+)\s+(?P<size>\d+)"#,
    )
    .expect("valid regex")
});

/// Dispatch one line to its source parser. `ts` is the ingestion time in
/// unix seconds.
#[must_use]
pub fn parse_line(source: &str, line: &str, ts: i64) -> Option<LogEvent> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    match source {
        "fail2ban" => parse_fail2ban(line, ts),
        "auth" => parse_auth(line, ts),
        "syslog" => parse_syslog(line, ts),
        "django" => parse_django(line, ts),
        "nginx" => parse_nginx(line, ts),
        other => parse_generic(other, line, ts),
    }
}

fn parse_fail2ban(line: &str, ts: i64) -> Option<LogEvent> {
    if let Some(caps) = FAIL2BAN_BAN.captures(line) {
        let action = caps["action"].to_lowercase();
        let mut event = LogEvent::new(ts, "fail2ban", line);
        event.level = Some(if action == "ban" { "WARNING" } else { "INFO" }.to_string());
        event.ip = Some(caps["ip"].to_string());
        event.service = Some(caps["jail"].to_string());
        event.metadata = Some(json!({ "jail": &caps["jail"] }));
        event.action = Some(action);
        return Some(event);
    }

    if let Some(caps) = FAIL2BAN_FOUND.captures(line) {
        let mut event = LogEvent::new(ts, "fail2ban", line);
        event.level = Some("INFO".to_string());
        event.ip = Some(caps["ip"].to_string());
        event.service = Some(caps["jail"].to_string());
        event.action = Some("found".to_string());
        event.metadata = Some(json!({ "jail": &caps["jail"] }));
        return Some(event);
    }

    None
}

fn parse_auth(line: &str, ts: i64) -> Option<LogEvent> {
    if let Some(caps) = AUTH_FAILED.captures(line) {
        let mut event = LogEvent::new(ts, "auth", line);
        event.level = Some("WARNING".to_string());
        event.ip = Some(caps["ip"].to_string());
        event.user = Some(caps["user"].to_string());
        event.service = Some("ssh".to_string());
        event.action = Some("failed_login".to_string());
        return Some(event);
    }

    if let Some(caps) = AUTH_ACCEPTED.captures(line) {
        let mut event = LogEvent::new(ts, "auth", line);
        event.level = Some("INFO".to_string());
        event.ip = Some(caps["ip"].to_string());
        event.user = Some(caps["user"].to_string());
        event.service = Some("ssh".to_string());
        event.action = Some("successful_login".to_string());
        event.metadata = Some(json!({ "method": &caps["method"] }));
        return Some(event);
    }

    None
}

fn parse_syslog(line: &str, ts: i64) -> Option<LogEvent> {
    let lower = line.to_lowercase();
    let level = if lower.contains("error") || lower.contains("fail") {
        "ERROR"
    } else if lower.contains("warning") || lower.contains("warn") {
        "WARNING"
    } else {
        "INFO"
    };

    if let Some(caps) = SYSLOG_HEADER.captures(line) {
        let mut event = LogEvent::new(ts, "syslog", &caps["message"]);
        event.level = Some(level.to_string());
        event.service = Some(caps["service"].to_string());
        event.metadata = Some(json!({ "host": &caps["host"], "full_line": line }));
        return Some(event);
    }

    // No header, but the keywords alone are worth capturing.
    if level != "INFO" {
        let mut event = LogEvent::new(ts, "syslog", line);
        event.level = Some(level.to_string());
        return Some(event);
    }

    None
}

fn parse_django(line: &str, ts: i64) -> Option<LogEvent> {
    if let Some(caps) = DJANGO_LEVEL.captures(line) {
        let mut event = LogEvent::new(ts, "django", &caps["message"]);
        event.level = Some(caps["level"].to_uppercase());
        event.service = Some("django".to_string());
        return Some(event);
    }

    let mut event = LogEvent::new(ts, "django", line);
    event.level = Some("INFO".to_string());
    event.service = Some("django".to_string());
    Some(event)
}

fn parse_nginx(line: &str, ts: i64) -> Option<LogEvent> {
    let caps = NGINX_ACCESS.captures(line)?;
    let status: i64 = caps["status"].parse().ok()?;
    let size: i64 = caps["size"].parse().unwrap_or(0);

    let level = if status >= 500 {
        "ERROR"
    } else if status >= 400 {
        "WARNING"
    } else {
        "INFO"
    };

    let mut event = LogEvent::new(ts, "nginx", line);
    event.level = Some(level.to_string());
    event.ip = Some(caps["ip"].to_string());
    event.service = Some("nginx".to_string());
    event.action = Some("http_request".to_string());
    event.metadata = Some(json!({
        "request": &caps["request"],
        "status": status,
        "size": size,
    }));
    Some(event)
}

fn parse_generic(source: &str, line: &str, ts: i64) -> Option<LogEvent> {
    let lower = line.to_lowercase();
    let level = if lower.contains("critical") || lower.contains("fatal") {
        "CRITICAL"
    } else if lower.contains("error") || lower.contains("err") {
        "ERROR"
    } else if lower.contains("warning") || lower.contains("warn") {
        "WARNING"
    } else {
        "INFO"
    };

    let mut event = LogEvent::new(ts, source, line);
    event.level = Some(level.to_string());
    Some(event)
}

#[cfg(test)]
mod tests {
    use super::*;

    const TS: i64 = 1_700_000_000;

    #[test]
    fn fail2ban_ban_line() {
        let event = parse_line(
            "fail2ban",
            "2024-01-01 12:00:00,123 fail2ban.actions [123]: NOTICE [sshd] Ban 203.0.113.42",
            TS,
        )
        .unwrap();
        assert_eq!(event.action.as_deref(), Some("ban"));
        assert_eq!(event.ip.as_deref(), Some("203.0.113.42"));
        assert_eq!(event.service.as_deref(), Some("sshd"));
        assert_eq!(event.level.as_deref(), Some("WARNING"));
    }

    #[test]
    fn fail2ban_unban_is_info() {
        let event = parse_line("fail2ban", "NOTICE [sshd] Unban 203.0.113.42", TS).unwrap();
        assert_eq!(event.action.as_deref(), Some("unban"));
        assert_eq!(event.level.as_deref(), Some("INFO"));
    }

    #[test]
    fn fail2ban_found_line() {
        let event = parse_line("fail2ban", "INFO [nginx-limit] Found 198.51.100.7", TS).unwrap();
        assert_eq!(event.action.as_deref(), Some("found"));
        assert_eq!(event.service.as_deref(), Some("nginx-limit"));
    }

    #[test]
    fn fail2ban_unrelated_line_is_dropped() {
        assert!(parse_line("fail2ban", "fail2ban.server: Server ready", TS).is_none());
    }

    #[test]
    fn auth_failed_password() {
        let event = parse_line(
            "auth",
            "Jan  1 12:00:00 host sshd[999]: Failed password for invalid user admin from 203.0.113.42 port 22 ssh2",
            TS,
        )
        .unwrap();
        assert_eq!(event.action.as_deref(), Some("failed_login"));
        assert_eq!(event.user.as_deref(), Some("admin"));
        assert_eq!(event.ip.as_deref(), Some("203.0.113.42"));
    }

    #[test]
    fn auth_accepted_password() {
        let event = parse_line(
            "auth",
            "Jan  1 12:00:00 host sshd[999]: Accepted publickey for deploy from 192.0.2.10 port 22",
            TS,
        )
        .unwrap();
        assert_eq!(event.action.as_deref(), Some("successful_login"));
        assert_eq!(event.user.as_deref(), Some("deploy"));
        let meta = event.metadata.unwrap();
        assert_eq!(meta["method"], "publickey");
    }

    #[test]
    fn syslog_header_extracts_service() {
        let event = parse_line(
            "syslog",
            "Jan  1 12:00:00 web01 systemd[1]: Failed to start nginx.service",
            TS,
        )
        .unwrap();
        assert_eq!(event.service.as_deref(), Some("systemd"));
        assert_eq!(event.level.as_deref(), Some("ERROR"));
        assert_eq!(event.message, "Failed to start nginx.service");
    }

    #[test]
    fn syslog_plain_info_line_is_dropped() {
        assert!(parse_line("syslog", "just some chatter", TS).is_none());
    }

    #[test]
    fn syslog_keyword_only_line_is_captured() {
        let event = parse_line("syslog", "something went wrong: error 42", TS).unwrap();
        assert_eq!(event.level.as_deref(), Some("ERROR"));
    }

    #[test]
    fn django_level_marker() {
        let event = parse_line("django", "[ERROR] OperationalError: could not connect", TS).unwrap();
        assert_eq!(event.level.as_deref(), Some("ERROR"));
        assert_eq!(event.message, "OperationalError: could not connect");
    }

    #[test]
    fn django_unmarked_line_is_info() {
        let event = parse_line("django", "Watching for file changes", TS).unwrap();
        assert_eq!(event.level.as_deref(), Some("INFO"));
    }

    #[test]
    fn nginx_combined_log() {
        let event = parse_line(
            "nginx",
            r#"198.51.100.7 - - [01/Jan/2024:12:00:00 +0000] "GET /health HTTP/1.1" 502 166 "-" "curl/8.0""#,
            TS,
        )
        .unwrap();
        assert_eq!(event.level.as_deref(), Some("ERROR"));
        assert_eq!(event.action.as_deref(), Some("http_request"));
        let meta = event.metadata.unwrap();
        assert_eq!(meta["status"], 502);
        assert_eq!(meta["request"], "GET /health HTTP/1.1");
    }

    #[test]
    fn nginx_non_access_line_is_dropped() {
        assert!(parse_line("nginx", "worker process exited", TS).is_none());
    }

    #[test]
    fn generic_maps_keywords_to_levels() {
        assert_eq!(
            parse_line("app", "FATAL: out of memory", TS).unwrap().level.as_deref(),
            Some("CRITICAL")
        );
        assert_eq!(
            parse_line("app", "error opening file", TS).unwrap().level.as_deref(),
            Some("ERROR")
        );
        assert_eq!(
            parse_line("app", "warn: disk almost full", TS).unwrap().level.as_deref(),
            Some("WARNING")
        );
        assert_eq!(parse_line("app", "started worker 3", TS).unwrap().level.as_deref(), Some("INFO"));
    }

    #[test]
    fn blank_lines_are_dropped() {
        assert!(parse_line("app", "   ", TS).is_none());
    }
}
