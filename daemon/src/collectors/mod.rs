//! Collection pipeline: counter samplers and the log tailer.

pub mod network;
pub mod parsers;
pub mod system;
pub mod tailer;

pub use network::NetworkSampler;
pub use system::SystemSampler;
pub use tailer::LogTailer;

use crate::storage::{LogEvent, NetworkMetric, SystemMetric};

/// One collector output.
#[derive(Debug, Clone)]
pub enum Sample {
    System(SystemMetric),
    Network(NetworkMetric),
    Events(Vec<LogEvent>),
}

/// Seam between the scheduler and a concrete collector. `sample` is
/// synchronous with respect to its last call (rate fields derive from the
/// previous tick's counters) and must degrade to missing fields rather
/// than fail when an underlying source is absent.
pub trait Collector {
    fn name(&self) -> &'static str;

    /// Whether the collector is switched on in config.
    fn enabled(&self) -> bool;

    /// Whether the underlying sources are reachable at all.
    fn validate(&self) -> bool;

    /// Produce one sample or batch for the tick at `now`.
    fn sample(&mut self, now: i64) -> anyhow::Result<Sample>;
}
