//! IP tracer: classification, reputation cache, threat scoring.
//!
//! The cache is owned by the tracer collector; `DashMap` keeps it safe to
//! share behind an `Arc` without an outer lock.

use dashmap::{DashMap, DashSet};

use crate::storage::models::derive_threat_score;
use crate::storage::{IpKind, IpObservation};

/// In-memory reputation record for one address.
#[derive(Debug, Clone)]
pub struct IpTrace {
    pub ip: String,
    pub kind: IpKind,
    pub is_whitelisted: bool,
    pub is_blacklisted: bool,
    pub activity_count: i64,
    pub failed_login_count: i64,
    pub banned_count: i64,
    pub threat_score: i64,
}

/// Classify an address into its coarse origin kind.
#[must_use]
pub fn classify_ip(ip: &str) -> IpKind {
    if is_localhost(ip) {
        IpKind::Localhost
    } else if is_private(ip) {
        IpKind::Private
    } else if is_cloud_provider(ip) {
        IpKind::Cloud
    } else {
        IpKind::Public
    }
}

fn is_localhost(ip: &str) -> bool {
    matches!(ip, "127.0.0.1" | "::1" | "localhost" | "0.0.0.0")
}

fn is_private(ip: &str) -> bool {
    if ip.starts_with("192.168.") || ip.starts_with("10.") {
        return true;
    }
    if let Some(rest) = ip.strip_prefix("172.") {
        if let Some(second) = rest.split('.').next().and_then(|o| o.parse::<u8>().ok()) {
            return (16..=31).contains(&second);
        }
    }
    // IPv6 unique-local and link-local.
    ip.starts_with("fc00:") || ip.starts_with("fd00:") || ip.starts_with("fe80:")
}

/// Cloud ranges need a published-range database; without one every
/// non-private address is treated as plain public.
fn is_cloud_provider(_ip: &str) -> bool {
    false
}

/// Class C subnet of an IPv4 address, `None` for IPv6.
#[must_use]
pub fn subnet_of(ip: &str) -> Option<String> {
    if ip.contains(':') {
        return None;
    }
    let parts: Vec<&str> = ip.split('.').collect();
    if parts.len() < 3 {
        return None;
    }
    Some(format!("{}.{}.{}.0/24", parts[0], parts[1], parts[2]))
}

#[derive(Debug, Default)]
pub struct IpTracer {
    cache: DashMap<String, IpTrace>,
    whitelisted: DashSet<String>,
    blacklisted: DashSet<String>,
}

impl IpTracer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Trace an address, creating and caching a fresh record on first
    /// sight.
    pub fn trace_ip(&self, ip: &str) -> IpTrace {
        if let Some(trace) = self.cache.get(ip) {
            return trace.clone();
        }

        let mut trace = IpTrace {
            ip: ip.to_string(),
            kind: classify_ip(ip),
            is_whitelisted: self.whitelisted.contains(ip),
            is_blacklisted: self.blacklisted.contains(ip),
            activity_count: 0,
            failed_login_count: 0,
            banned_count: 0,
            threat_score: 0,
        };
        trace.threat_score = score_of(&trace);
        self.cache.insert(ip.to_string(), trace.clone());
        trace
    }

    /// Record one observed action for an address and rederive its score.
    /// Crossing the high-threat line marks the address malicious.
    pub fn update_activity(&self, ip: &str, action: &str) {
        if !self.cache.contains_key(ip) {
            self.trace_ip(ip);
        }
        let Some(mut trace) = self.cache.get_mut(ip) else {
            return;
        };

        trace.activity_count += 1;
        match action {
            "failed_login" => trace.failed_login_count += 1,
            "ban" => trace.banned_count += 1,
            _ => {}
        }
        trace.threat_score = score_of(&trace);

        if trace.threat_score >= 70 && !trace.is_blacklisted {
            trace.is_blacklisted = true;
            trace.threat_score = score_of(&trace);
            self.blacklisted.insert(ip.to_string());
        }
    }

    /// Add an address to the whitelist and zero its score.
    pub fn whitelist(&self, ip: &str) {
        self.whitelisted.insert(ip.to_string());
        if let Some(mut trace) = self.cache.get_mut(ip) {
            trace.is_whitelisted = true;
            trace.threat_score = score_of(&trace);
        }
    }

    /// Add an address to the blacklist.
    pub fn blacklist(&self, ip: &str) {
        self.blacklisted.insert(ip.to_string());
        if let Some(mut trace) = self.cache.get_mut(ip) {
            trace.is_blacklisted = true;
            trace.threat_score = score_of(&trace);
        }
    }

    /// Subnets contributing at least `threshold` addresses; a crude sweep
    /// signal.
    #[must_use]
    pub fn detect_sweep(&self, ips: &[String], threshold: usize) -> Vec<String> {
        let mut counts: std::collections::HashMap<String, usize> = std::collections::HashMap::new();
        for ip in ips {
            if let Some(subnet) = subnet_of(ip) {
                *counts.entry(subnet).or_default() += 1;
            }
        }
        let mut sweeps: Vec<String> = counts
            .into_iter()
            .filter(|(_, count)| *count >= threshold)
            .map(|(subnet, _)| subnet)
            .collect();
        sweeps.sort();
        sweeps
    }

    /// Snapshot of the cache as a persistable observation.
    #[must_use]
    pub fn observation_for(&self, ip: &str, ts: i64) -> IpObservation {
        let trace = self.trace_ip(ip);
        IpObservation {
            ip: trace.ip,
            kind: trace.kind,
            is_whitelisted: trace.is_whitelisted,
            is_blacklisted: trace.is_blacklisted,
            failed_login_count: trace.failed_login_count,
            banned_count: trace.banned_count,
            ts,
        }
    }

    /// Number of cached addresses.
    #[must_use]
    pub fn cached_count(&self) -> usize {
        self.cache.len()
    }

    /// Drop the whole cache (list membership survives).
    pub fn clear_cache(&self) {
        self.cache.clear();
    }
}

fn score_of(trace: &IpTrace) -> i64 {
    derive_threat_score(
        trace.kind,
        trace.is_whitelisted,
        trace.is_blacklisted,
        trace.failed_login_count,
        trace.banned_count,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification_covers_ranges() {
        assert_eq!(classify_ip("127.0.0.1"), IpKind::Localhost);
        assert_eq!(classify_ip("192.168.1.10"), IpKind::Private);
        assert_eq!(classify_ip("10.0.0.1"), IpKind::Private);
        assert_eq!(classify_ip("172.16.0.1"), IpKind::Private);
        assert_eq!(classify_ip("172.32.0.1"), IpKind::Public);
        assert_eq!(classify_ip("fd00::1"), IpKind::Private);
        assert_eq!(classify_ip("203.0.113.42"), IpKind::Public);
    }

    #[test]
    fn fresh_public_ip_scores_base_ten() {
        let tracer = IpTracer::new();
        assert_eq!(tracer.trace_ip("203.0.113.42").threat_score, 10);
        assert_eq!(tracer.trace_ip("192.168.0.5").threat_score, 0);
    }

    #[test]
    fn activity_raises_score_and_auto_blacklists() {
        let tracer = IpTracer::new();
        for _ in 0..6 {
            tracer.update_activity("203.0.113.42", "failed_login");
        }
        // 10 + 30 = 40, still below the line.
        assert_eq!(tracer.trace_ip("203.0.113.42").threat_score, 40);

        tracer.update_activity("203.0.113.42", "ban");
        tracer.update_activity("203.0.113.42", "ban");
        // 10 + 30 + 40 = 80 crosses 70, so the address is marked malicious
        // and rescored with the blacklist base.
        let trace = tracer.trace_ip("203.0.113.42");
        assert!(trace.is_blacklisted);
        assert_eq!(trace.threat_score, 100);
    }

    #[test]
    fn whitelist_zeroes_idle_address() {
        let tracer = IpTracer::new();
        tracer.trace_ip("203.0.113.1");
        tracer.whitelist("203.0.113.1");
        assert_eq!(tracer.trace_ip("203.0.113.1").threat_score, 0);
    }

    #[test]
    fn sweep_detection_groups_by_subnet() {
        let tracer = IpTracer::new();
        let ips: Vec<String> = (1..=12).map(|i| format!("203.0.113.{i}")).collect();
        let sweeps = tracer.detect_sweep(&ips, 10);
        assert_eq!(sweeps, vec!["203.0.113.0/24".to_string()]);
        assert!(tracer.detect_sweep(&ips[..5], 10).is_empty());
    }

    #[test]
    fn observation_mirrors_cache_counts() {
        let tracer = IpTracer::new();
        tracer.update_activity("203.0.113.42", "failed_login");
        tracer.update_activity("203.0.113.42", "ban");
        let obs = tracer.observation_for("203.0.113.42", 999);
        assert_eq!(obs.failed_login_count, 1);
        assert_eq!(obs.banned_count, 1);
        assert_eq!(obs.ts, 999);
    }
}
