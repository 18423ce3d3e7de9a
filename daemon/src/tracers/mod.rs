//! On-demand event enrichment.
//!
//! Enrichment is never triggered automatically on ingestion; callers (the
//! issue detector, report generation, the CLI) ask the collector to trace
//! an event or a batch, and persist the returned bundles through the
//! store.

pub mod error;
pub mod event;
pub mod ip;
pub mod network;
pub mod process;

pub use error::ErrorTracer;
pub use event::EventTracer;
pub use ip::IpTracer;
pub use network::NetworkTracer;
pub use process::ProcessTracer;

use std::sync::Arc;

use crate::platform::Platform;
use crate::storage::{EventTrace, LogEvent, TraceBundle};

/// How many connection snapshots one trace carries at most.
const MAX_TRACE_CONNECTIONS: usize = 10;

/// Per-tracer enable switches.
#[derive(Debug, Clone, Copy)]
pub struct TracerSwitches {
    pub processes: bool,
    pub network: bool,
    pub ips: bool,
    pub errors: bool,
}

impl Default for TracerSwitches {
    fn default() -> Self {
        Self { processes: true, network: true, ips: true, errors: true }
    }
}

/// The tracer ensemble: a struct of collaborators composed once at
/// construction. The event tracer always runs; the rest are switchable.
pub struct TracerCollector {
    switches: TracerSwitches,
    event_tracer: EventTracer,
    process_tracer: ProcessTracer,
    network_tracer: NetworkTracer,
    ip_tracer: IpTracer,
    error_tracer: ErrorTracer,
}

impl TracerCollector {
    #[must_use]
    pub fn new(platform: Arc<dyn Platform>, switches: TracerSwitches) -> Self {
        Self {
            switches,
            event_tracer: EventTracer::new(),
            process_tracer: ProcessTracer::new(Arc::clone(&platform)),
            network_tracer: NetworkTracer::new(platform),
            ip_tracer: IpTracer::new(),
            error_tracer: ErrorTracer::new(),
        }
    }

    /// Build the complete enrichment bundle for one event.
    #[must_use]
    pub fn trace_event(&self, event: &LogEvent) -> TraceBundle {
        let severity_score = self.event_tracer.severity_score(event);
        let causality = self.event_tracer.trace_causality(event);
        let related_services = self.event_tracer.related_services(event);

        let processes = match (self.switches.processes, &event.service) {
            (true, Some(service)) => self.process_tracer.trace_by_name(service),
            _ => Vec::new(),
        };

        let connections = match (self.switches.network, &event.ip) {
            (true, Some(ip)) => {
                let mut conns = self.network_tracer.find_connections_by_ip(ip);
                conns.truncate(MAX_TRACE_CONNECTIONS);
                conns
            }
            _ => Vec::new(),
        };

        let ip_observation = match (self.switches.ips, &event.ip) {
            (true, Some(ip)) => {
                if let Some(action) = &event.action {
                    self.ip_tracer.update_activity(ip, action);
                }
                Some(self.ip_tracer.observation_for(ip, event.ts))
            }
            _ => None,
        };

        let is_errorish =
            matches!(event.level.as_deref(), Some("WARNING" | "ERROR" | "CRITICAL"));
        let error = if self.switches.errors && is_errorish {
            Some(self.error_tracer.trace_error(&event.message, event.level.as_deref()))
        } else {
            None
        };

        TraceBundle {
            trace: EventTrace {
                event_id: None,
                ts: event.ts,
                source: event.source.clone(),
                level: event.level.clone(),
                severity_score,
                message: Some(event.message.clone()),
                action: event.action.clone(),
                service: event.service.clone(),
                user: event.user.clone(),
                ip: event.ip.clone(),
                causality,
                related_services,
                tracers_used: self.active_tracers(),
                traced_at: event.ts,
            },
            processes,
            connections,
            error,
            ip_observation,
        }
    }

    /// Trace a batch; one failing event never poisons the rest.
    #[must_use]
    pub fn trace_batch(&self, events: &[LogEvent]) -> Vec<TraceBundle> {
        events.iter().map(|event| self.trace_event(event)).collect()
    }

    /// The IP tracer, for direct reputation queries.
    #[must_use]
    pub fn ip_tracer(&self) -> &IpTracer {
        &self.ip_tracer
    }

    /// The error tracer, for pattern history access.
    #[must_use]
    pub fn error_tracer(&self) -> &ErrorTracer {
        &self.error_tracer
    }

    /// Drop tracer-owned caches (IP reputation cache, error history).
    pub fn clear_caches(&self) {
        self.ip_tracer.clear_cache();
        self.error_tracer.clear_history();
        tracing::info!("cleared tracer caches");
    }

    fn active_tracers(&self) -> Vec<String> {
        let mut active = vec!["event".to_string()];
        if self.switches.processes {
            active.push("process".to_string());
        }
        if self.switches.network {
            active.push("network".to_string());
        }
        if self.switches.ips {
            active.push("ip".to_string());
        }
        if self.switches.errors {
            active.push("error".to_string());
        }
        active
    }
}
