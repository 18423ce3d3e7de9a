//! Event tracer: severity scoring, service adjacency, canned causality
//! chains for recognized event patterns.

use std::collections::HashMap;
use std::sync::LazyLock;

use regex::Regex;

use crate::storage::{Causality, CausalityStep, LogEvent};

/// Regexes that recognize service names inside free-form messages.
static SERVICE_PATTERNS: LazyLock<Vec<(&'static str, Regex)>> = LazyLock::new(|| {
    [
        ("nginx", r"(?i)nginx(?:\[\d+\])?"),
        ("apache", r"(?i)apache2?(?:\[\d+\])?"),
        ("django", r"(?i)(?:django|gunicorn|uwsgi)(?:\[\d+\])?"),
        ("postgresql", r"(?i)postgres(?:ql)?(?:\[\d+\])?"),
        ("mysql", r"(?i)mysql(?:d)?(?:\[\d+\])?"),
        ("redis", r"(?i)redis(?:-server)?(?:\[\d+\])?"),
        ("ssh", r"(?i)sshd?(?:\[\d+\])?"),
        ("fail2ban", r"(?i)fail2ban(?:-server)?(?:\[\d+\])?"),
        ("systemd", r"(?i)systemd(?:\[\d+\])?"),
        ("docker", r"(?i)docker(?:d)?(?:\[\d+\])?"),
    ]
    .into_iter()
    .map(|(name, pattern)| (name, Regex::new(pattern).expect("valid regex")))
    .collect()
});

/// Static adjacency table: which services commonly sit next to a source.
fn service_neighbors(source: &str) -> &'static [&'static str] {
    match source {
        "fail2ban" => &["ssh", "nginx", "apache", "auth"],
        "nginx" => &["django", "gunicorn", "uwsgi", "php-fpm"],
        "apache" => &["django", "php", "wsgi"],
        "django" => &["postgresql", "mysql", "redis", "nginx", "celery"],
        "auth" => &["ssh", "fail2ban", "pam"],
        "postgresql" => &["django", "pgbouncer"],
        "mysql" => &["django", "wordpress"],
        "docker" => &["nginx", "redis", "postgresql"],
        _ => &[],
    }
}

#[derive(Debug, Default)]
pub struct EventTracer;

impl EventTracer {
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Severity score in [0, 100]: base from the log level, bumped for
    /// security-relevant actions and repeated occurrences.
    #[must_use]
    pub fn severity_score(&self, event: &LogEvent) -> i64 {
        let mut score = match event.level.as_deref() {
            Some("DEBUG") => 0,
            Some("WARNING") => 30,
            Some("ERROR") => 60,
            Some("CRITICAL") => 90,
            _ => 10,
        };

        if matches!(event.action.as_deref(), Some("ban" | "failed_login" | "unauthorized")) {
            score += 20;
        }

        let repeat_count = event
            .metadata
            .as_ref()
            .and_then(|m| m.get("count"))
            .and_then(serde_json::Value::as_i64)
            .unwrap_or(1);
        if repeat_count > 5 {
            score += 10;
        }

        score.min(100)
    }

    /// Services adjacent to this event: the source's static neighbors plus
    /// anything the message itself names.
    #[must_use]
    pub fn related_services(&self, event: &LogEvent) -> Vec<String> {
        let mut related: Vec<String> =
            service_neighbors(&event.source).iter().map(ToString::to_string).collect();

        for (name, pattern) in SERVICE_PATTERNS.iter() {
            if pattern.is_match(&event.message) && !related.iter().any(|r| r == name) {
                related.push((*name).to_string());
            }
        }

        related
    }

    /// Canned causality chain for recognized patterns; `None` when the
    /// event doesn't match any.
    #[must_use]
    pub fn trace_causality(&self, event: &LogEvent) -> Option<Causality> {
        let service = event.service.clone().unwrap_or_else(|| "ssh".to_string());
        let message = event.message.to_lowercase();
        let is_error = matches!(event.level.as_deref(), Some("ERROR" | "CRITICAL"));

        if event.action.as_deref() == Some("ban") && event.source == "fail2ban" {
            return Some(Causality {
                trigger: "repeated_failed_logins".to_string(),
                root_cause: "brute_force_attempt".to_string(),
                chain: chain(&[
                    ("initial_failed_authentication", "ssh"),
                    ("repeated_failures_detected", "fail2ban"),
                    ("ip_banned", "fail2ban"),
                ]),
            });
        }

        if event.action.as_deref() == Some("failed_login") {
            return Some(Causality {
                trigger: "authentication_failure".to_string(),
                root_cause: "invalid_credentials".to_string(),
                chain: chain(&[
                    ("connection_established", &service),
                    ("authentication_attempted", &service),
                    ("authentication_failed", &service),
                ]),
            });
        }

        if is_error && message.contains("connection") {
            if message.contains("timeout") {
                return Some(Causality {
                    trigger: "connection_timeout".to_string(),
                    root_cause: "network_latency_or_service_unresponsive".to_string(),
                    chain: chain(&[
                        ("connection_attempt", &service),
                        ("waiting_for_response", &service),
                        ("timeout_reached", &service),
                    ]),
                });
            }
            if message.contains("refused") {
                return Some(Causality {
                    trigger: "connection_refused".to_string(),
                    root_cause: "service_not_listening_or_firewall".to_string(),
                    chain: chain(&[
                        ("connection_attempt", &service),
                        ("connection_refused", &service),
                    ]),
                });
            }
        }

        if is_error {
            if ["memory", "oom", "out of memory"].iter().any(|k| message.contains(k)) {
                return Some(Causality {
                    trigger: "memory_exhaustion".to_string(),
                    root_cause: "memory_leak_or_insufficient_resources".to_string(),
                    chain: chain(&[
                        ("memory_allocation_request", &service),
                        ("insufficient_memory", "system"),
                        ("oom_condition", "system"),
                    ]),
                });
            }
            if ["disk", "no space"].iter().any(|k| message.contains(k)) {
                return Some(Causality {
                    trigger: "disk_space_exhausted".to_string(),
                    root_cause: "disk_space_exhaustion".to_string(),
                    chain: chain(&[
                        ("write_operation_attempted", &service),
                        ("insufficient_disk_space", "system"),
                        ("operation_failed", &service),
                    ]),
                });
            }
        }

        None
    }

    /// Frequency breakdown across a batch of events.
    #[must_use]
    pub fn extract_event_patterns(&self, events: &[LogEvent]) -> EventPatterns {
        let mut patterns = EventPatterns { total_events: events.len(), ..EventPatterns::default() };

        for event in events {
            *patterns.by_source.entry(event.source.clone()).or_default() += 1;
            if let Some(level) = &event.level {
                *patterns.by_level.entry(level.clone()).or_default() += 1;
            }
            if let Some(action) = &event.action {
                *patterns.by_action.entry(action.clone()).or_default() += 1;
            }
            if let Some(ip) = &event.ip {
                *patterns.ip_frequency.entry(ip.clone()).or_default() += 1;
            }
            if let Some(user) = &event.user {
                *patterns.user_frequency.entry(user.clone()).or_default() += 1;
            }
            if let Some(service) = &event.service {
                *patterns.service_frequency.entry(service.clone()).or_default() += 1;
            }
        }

        patterns
    }
}

fn chain(steps: &[(&str, &str)]) -> Vec<CausalityStep> {
    steps
        .iter()
        .map(|(step, service)| CausalityStep {
            step: (*step).to_string(),
            service: (*service).to_string(),
        })
        .collect()
}

/// Counts extracted from a batch of events.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct EventPatterns {
    pub total_events: usize,
    pub by_source: HashMap<String, u64>,
    pub by_level: HashMap<String, u64>,
    pub by_action: HashMap<String, u64>,
    pub ip_frequency: HashMap<String, u64>,
    pub user_frequency: HashMap<String, u64>,
    pub service_frequency: HashMap<String, u64>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn event(level: &str, action: Option<&str>) -> LogEvent {
        let mut event = LogEvent::new(100, "auth", "test message");
        event.level = Some(level.to_string());
        event.action = action.map(ToString::to_string);
        event
    }

    #[test]
    fn severity_from_level_and_action() {
        let tracer = EventTracer::new();
        assert_eq!(tracer.severity_score(&event("INFO", None)), 10);
        assert_eq!(tracer.severity_score(&event("WARNING", None)), 30);
        assert_eq!(tracer.severity_score(&event("WARNING", Some("failed_login"))), 50);
        assert_eq!(tracer.severity_score(&event("CRITICAL", Some("ban"))), 100);
    }

    #[test]
    fn severity_bumps_for_repeats() {
        let tracer = EventTracer::new();
        let mut repeated = event("ERROR", None);
        repeated.metadata = Some(json!({ "count": 9 }));
        assert_eq!(tracer.severity_score(&repeated), 70);
    }

    #[test]
    fn ban_event_gets_brute_force_causality() {
        let tracer = EventTracer::new();
        let mut ban = LogEvent::new(100, "fail2ban", "[sshd] Ban 203.0.113.42");
        ban.action = Some("ban".to_string());
        let causality = tracer.trace_causality(&ban).unwrap();
        assert_eq!(causality.root_cause, "brute_force_attempt");
        assert_eq!(causality.chain.len(), 3);
    }

    #[test]
    fn oom_message_gets_memory_causality() {
        let tracer = EventTracer::new();
        let mut oom = LogEvent::new(100, "syslog", "killed process: Out of memory");
        oom.level = Some("CRITICAL".to_string());
        let causality = tracer.trace_causality(&oom).unwrap();
        assert_eq!(causality.trigger, "memory_exhaustion");
    }

    #[test]
    fn plain_info_has_no_causality() {
        let tracer = EventTracer::new();
        assert!(tracer.trace_causality(&event("INFO", None)).is_none());
    }

    #[test]
    fn related_services_merge_table_and_message() {
        let tracer = EventTracer::new();
        let mut event = LogEvent::new(100, "fail2ban", "nginx rate limit tripped");
        event.level = Some("INFO".to_string());
        let related = tracer.related_services(&event);
        assert!(related.contains(&"ssh".to_string()));
        assert!(related.contains(&"nginx".to_string()));
        // No duplicate for nginx even though both table and message name it.
        assert_eq!(related.iter().filter(|s| *s == "nginx").count(), 1);
    }

    #[test]
    fn batch_patterns_count_fields() {
        let tracer = EventTracer::new();
        let mut a = event("ERROR", Some("failed_login"));
        a.ip = Some("203.0.113.1".to_string());
        let b = event("ERROR", None);
        let patterns = tracer.extract_event_patterns(&[a, b]);
        assert_eq!(patterns.total_events, 2);
        assert_eq!(patterns.by_level["ERROR"], 2);
        assert_eq!(patterns.by_action["failed_login"], 1);
        assert_eq!(patterns.ip_frequency["203.0.113.1"], 1);
    }
}
