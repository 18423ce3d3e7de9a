//! Persistence layer: the single-file embedded store, its row types, and
//! the pinned-path helper.

pub mod models;
pub mod paths;
pub mod store;

pub use models::{
    Causality, CausalityStep, DailyAggregateRow, ErrorPatternCount, ErrorPatterns, ErrorTraceInfo,
    ErrorTraceRow, EventTrace, EventTraceRow, HourlyAggregateRow, IpKind, IpObservation,
    IpReputationRow, LogEvent, LogEventRow, NetworkConnection, NetworkMetric, NetworkMetricRow,
    ProcessTrace, SystemMetric, SystemMetricRow, TraceBundle,
};
pub use store::{Store, StoreError, StoreStats};
