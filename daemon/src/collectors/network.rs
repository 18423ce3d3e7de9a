//! Network counter sampler: interface I/O totals and TCP connection
//! state counts.
//!
//! Byte and packet counters are cumulative per interface and are stored
//! as read; the aggregator computes deltas. Loopback traffic is excluded.

use std::sync::Arc;

use crate::config::NetworkConfig;
use crate::platform::Platform;
use crate::storage::NetworkMetric;

use super::{Collector, Sample};

/// Summed cumulative interface counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NetIoTotals {
    pub bytes_recv: i64,
    pub bytes_sent: i64,
    pub packets_recv: i64,
    pub packets_sent: i64,
    pub errors_in: i64,
    pub errors_out: i64,
    pub drops_in: i64,
    pub drops_out: i64,
}

/// TCP connection counts by state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConnectionCounts {
    pub established: i64,
    pub listen: i64,
    pub time_wait: i64,
}

pub struct NetworkSampler {
    platform: Arc<dyn Platform>,
    enabled: bool,
    metrics: Vec<String>,
}

impl NetworkSampler {
    #[must_use]
    pub fn new(config: &NetworkConfig, platform: Arc<dyn Platform>) -> Self {
        Self { platform, enabled: config.enabled, metrics: config.metrics.clone() }
    }

    fn wants_io(&self) -> bool {
        self.metrics
            .iter()
            .any(|m| matches!(m.as_str(), "bytes_sent" | "bytes_recv" | "packets_sent" | "packets_recv"))
    }

    fn wants_connections(&self) -> bool {
        self.metrics.iter().any(|m| m == "connections" || m == "listening_ports")
    }

    /// Collect one sample at `ts`.
    pub fn collect(&mut self, ts: i64) -> NetworkMetric {
        let mut metric = NetworkMetric::at(ts);

        if self.wants_io() {
            match self.platform.net_dev() {
                Ok(text) => {
                    let io = parse_net_dev(&text);
                    metric.bytes_sent = Some(io.bytes_sent);
                    metric.bytes_recv = Some(io.bytes_recv);
                    metric.packets_sent = Some(io.packets_sent);
                    metric.packets_recv = Some(io.packets_recv);
                    metric.errors_in = Some(io.errors_in);
                    metric.errors_out = Some(io.errors_out);
                    metric.drops_in = Some(io.drops_in);
                    metric.drops_out = Some(io.drops_out);
                }
                Err(err) => tracing::debug!(error = %err, "net dev probe failed"),
            }
        }

        if self.wants_connections() {
            let tables = self.platform.tcp_tables();
            if tables.is_empty() {
                tracing::debug!("no tcp tables available");
            } else {
                let counts = parse_tcp_states(tables.iter().map(String::as_str));
                metric.connections_established = Some(counts.established);
                metric.connections_listen = Some(counts.listen);
                metric.connections_time_wait = Some(counts.time_wait);
            }
        }

        metric
    }

    /// Probe mechanism in use; debug output only, never persisted.
    #[must_use]
    pub fn probe_method(&self) -> &'static str {
        self.platform.name()
    }
}

impl Collector for NetworkSampler {
    fn name(&self) -> &'static str {
        "network-metrics"
    }

    fn enabled(&self) -> bool {
        self.enabled
    }

    fn validate(&self) -> bool {
        self.platform.net_dev().is_ok()
    }

    fn sample(&mut self, now: i64) -> anyhow::Result<Sample> {
        Ok(Sample::Network(self.collect(now)))
    }
}

/// Sum `/proc/net/dev` counters across interfaces, skipping loopback.
///
/// Per-interface receive fields: bytes, packets, errs, drop; transmit
/// fields start at offset 8: bytes, packets, errs, drop.
#[must_use]
pub fn parse_net_dev(net_dev: &str) -> NetIoTotals {
    let mut totals = NetIoTotals::default();

    for line in net_dev.lines().skip(2) {
        let Some((iface, data)) = line.split_once(':') else {
            continue;
        };
        if iface.trim() == "lo" {
            continue;
        }

        let fields: Vec<i64> = data.split_whitespace().map(|f| f.parse().unwrap_or(0)).collect();
        if fields.len() < 12 {
            continue;
        }

        totals.bytes_recv += fields[0];
        totals.packets_recv += fields[1];
        totals.errors_in += fields[2];
        totals.drops_in += fields[3];
        totals.bytes_sent += fields[8];
        totals.packets_sent += fields[9];
        totals.errors_out += fields[10];
        totals.drops_out += fields[11];
    }

    totals
}

/// Count TCP socket states across `/proc/net/tcp`-format tables.
/// Kernel state codes: 01 ESTABLISHED, 06 TIME_WAIT, 0A LISTEN.
#[must_use]
pub fn parse_tcp_states<'a>(tables: impl Iterator<Item = &'a str>) -> ConnectionCounts {
    let mut counts = ConnectionCounts::default();

    for table in tables {
        for line in table.lines().skip(1) {
            let fields: Vec<&str> = line.split_whitespace().collect();
            if fields.len() < 4 {
                continue;
            }
            match fields[3] {
                "01" => counts.established += 1,
                "06" => counts.time_wait += 1,
                "0A" => counts.listen += 1,
                _ => {}
            }
        }
    }

    counts
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::StubPlatform;

    const NET_DEV: &str = "\
Inter-|   Receive                                                |  Transmit
 face |bytes    packets errs drop fifo frame compressed multicast|bytes    packets errs drop fifo colls carrier compressed
    lo: 9999999    9999    0    0    0     0          0         0  9999999    9999    0    0    0     0       0          0
  eth0: 1000000    5000    2    1    0     0          0         0   500000    2500    1    2    0     0       0          0
  eth1: 2000000   10000    0    0    0     0          0         0  1500000    7500    0    0    0     0       0          0
";

    const TCP: &str = "\
  sl  local_address rem_address   st tx_queue rx_queue tr tm->when retrnsmt   uid  timeout inode
   0: 0100007F:1F90 00000000:0000 0A 00000000:00000000 00:00000000 00000000  1000        0 12345 1 0 100 0 0 0 0
   1: 0100007F:A3D2 5BBD5CC6:01BB 01 00000000:00000000 00:00000000 00000000  1000        0 12346 1 0 100 0 0 0 0
   2: 0100007F:A3D4 5BBD5CC6:01BB 06 00000000:00000000 00:00000000 00000000  1000        0 12347 1 0 100 0 0 0 0
";

    #[test]
    fn net_dev_sums_interfaces_excluding_loopback() {
        let totals = parse_net_dev(NET_DEV);
        assert_eq!(totals.bytes_recv, 3_000_000);
        assert_eq!(totals.bytes_sent, 2_000_000);
        assert_eq!(totals.packets_recv, 15_000);
        assert_eq!(totals.packets_sent, 10_000);
        assert_eq!(totals.errors_in, 2);
        assert_eq!(totals.errors_out, 1);
        assert_eq!(totals.drops_in, 1);
        assert_eq!(totals.drops_out, 2);
    }

    #[test]
    fn tcp_states_counted_by_code() {
        let counts = parse_tcp_states([TCP].into_iter());
        assert_eq!(counts.established, 1);
        assert_eq!(counts.listen, 1);
        assert_eq!(counts.time_wait, 1);
    }

    #[test]
    fn sampler_fills_requested_families() {
        let platform = StubPlatform {
            net_dev: Some(NET_DEV.to_string()),
            tcp_tables: vec![TCP.to_string()],
            ..StubPlatform::default()
        };
        let config = crate::config::NetworkConfig::default();
        let mut sampler = NetworkSampler::new(&config, std::sync::Arc::new(platform));

        let metric = sampler.collect(500);
        assert_eq!(metric.ts, 500);
        assert_eq!(metric.bytes_sent, Some(2_000_000));
        assert_eq!(metric.connections_established, Some(1));
    }

    #[test]
    fn sampler_degrades_when_probe_missing() {
        let config = crate::config::NetworkConfig::default();
        let mut sampler =
            NetworkSampler::new(&config, std::sync::Arc::new(StubPlatform::default()));
        let metric = sampler.collect(500);
        assert_eq!(metric.bytes_sent, None);
        assert_eq!(metric.connections_established, None);
    }
}
