//! Network tracer: snapshot TCP connections from the platform tables,
//! decode kernel hex addressing, and filter by address or port.

use std::collections::HashMap;
use std::net::{Ipv4Addr, Ipv6Addr};
use std::sync::Arc;

use crate::platform::Platform;
use crate::storage::NetworkConnection;

/// Kernel socket state code to name.
#[must_use]
pub fn state_name(code: &str) -> &'static str {
    match code {
        "01" => "ESTABLISHED",
        "02" => "SYN_SENT",
        "03" => "SYN_RECV",
        "04" => "FIN_WAIT1",
        "05" => "FIN_WAIT2",
        "06" => "TIME_WAIT",
        "07" => "CLOSE",
        "08" => "CLOSE_WAIT",
        "09" => "LAST_ACK",
        "0A" => "LISTEN",
        "0B" => "CLOSING",
        _ => "UNKNOWN",
    }
}

pub struct NetworkTracer {
    platform: Arc<dyn Platform>,
}

impl NetworkTracer {
    #[must_use]
    pub fn new(platform: Arc<dyn Platform>) -> Self {
        Self { platform }
    }

    /// Every connection in the current TCP tables.
    #[must_use]
    pub fn all_connections(&self) -> Vec<NetworkConnection> {
        self.platform
            .tcp_tables()
            .iter()
            .flat_map(|table| table.lines().skip(1))
            .filter_map(parse_connection_line)
            .collect()
    }

    /// Connections whose local or remote address equals `ip`.
    #[must_use]
    pub fn find_connections_by_ip(&self, ip: &str) -> Vec<NetworkConnection> {
        self.all_connections()
            .into_iter()
            .filter(|conn| {
                conn.local_ip.as_deref() == Some(ip) || conn.remote_ip.as_deref() == Some(ip)
            })
            .collect()
    }

    /// Connections bound to a local port.
    #[must_use]
    pub fn connections_on_port(&self, port: i64) -> Vec<NetworkConnection> {
        self.all_connections()
            .into_iter()
            .filter(|conn| conn.local_port == Some(port))
            .collect()
    }

    /// Distinct local ports in LISTEN state, sorted.
    #[must_use]
    pub fn listening_ports(&self) -> Vec<i64> {
        let mut ports: Vec<i64> = self
            .all_connections()
            .into_iter()
            .filter(|conn| conn.state.as_deref() == Some("LISTEN"))
            .filter_map(|conn| conn.local_port)
            .collect();
        ports.sort_unstable();
        ports.dedup();
        ports
    }

    /// Connection counts by state name.
    #[must_use]
    pub fn connection_stats(&self) -> HashMap<String, usize> {
        let mut stats = HashMap::new();
        for conn in self.all_connections() {
            let state = conn.state.unwrap_or_else(|| "UNKNOWN".to_string());
            *stats.entry(state).or_default() += 1;
        }
        stats
    }
}

/// Parse one `/proc/net/tcp`-format row into a connection snapshot.
fn parse_connection_line(line: &str) -> Option<NetworkConnection> {
    let fields: Vec<&str> = line.split_whitespace().collect();
    if fields.len() < 4 {
        return None;
    }

    let (local_ip, local_port) = parse_hex_address(fields[1])?;
    let (remote_ip, remote_port) = parse_hex_address(fields[2])?;

    Some(NetworkConnection {
        local_ip: Some(local_ip),
        local_port: Some(local_port),
        remote_ip: Some(remote_ip),
        remote_port: Some(remote_port),
        state: Some(state_name(fields[3]).to_string()),
        protocol: "tcp".to_string(),
    })
}

/// Decode the kernel's `ADDRESS:PORT` hex notation. IPv4 addresses are a
/// little-endian u32; IPv6 addresses are four little-endian u32 groups.
fn parse_hex_address(hex: &str) -> Option<(String, i64)> {
    let (addr, port) = hex.rsplit_once(':')?;
    let port = i64::from_str_radix(port, 16).ok()?;

    let ip = match addr.len() {
        8 => {
            let value = u32::from_str_radix(addr, 16).ok()?;
            let bytes = value.to_le_bytes();
            Ipv4Addr::new(bytes[0], bytes[1], bytes[2], bytes[3]).to_string()
        }
        32 => {
            let mut bytes = [0_u8; 16];
            for (i, chunk) in addr.as_bytes().chunks(8).enumerate() {
                let group = u32::from_str_radix(std::str::from_utf8(chunk).ok()?, 16).ok()?;
                bytes[i * 4..(i + 1) * 4].copy_from_slice(&group.to_le_bytes());
            }
            Ipv6Addr::from(bytes).to_string()
        }
        _ => return None,
    };

    Some((ip, port))
}
