//! Row exporters (CSV, JSON) and the summary report generator.

pub mod csv;
pub mod json;
pub mod report;

pub use csv::CsvExporter;
pub use json::JsonExporter;
pub use report::ReportGenerator;

use chrono::TimeZone;

/// Fixed column orders for exported tables; `timestamp_str` is appended
/// as a synthetic final column.
pub(crate) const SYSTEM_COLUMNS: &[&str] = &[
    "id",
    "ts",
    "cpu_percent",
    "cpu_count",
    "memory_total",
    "memory_available",
    "memory_percent",
    "disk_total",
    "disk_used",
    "disk_percent",
    "disk_read_bytes",
    "disk_write_bytes",
    "load_1min",
    "load_5min",
    "load_15min",
];

pub(crate) const NETWORK_COLUMNS: &[&str] = &[
    "id",
    "ts",
    "bytes_sent",
    "bytes_recv",
    "packets_sent",
    "packets_recv",
    "errors_in",
    "errors_out",
    "drops_in",
    "drops_out",
    "connections_established",
    "connections_listen",
    "connections_time_wait",
];

pub(crate) const LOG_COLUMNS: &[&str] =
    &["id", "ts", "source", "level", "message", "ip", "user", "service", "action", "metadata"];

/// Format a unix timestamp with the configured strftime pattern, local
/// time.
pub(crate) fn format_timestamp(ts: i64, format: &str) -> String {
    chrono::Local
        .timestamp_opt(ts, 0)
        .single()
        .map(|dt| dt.format(format).to_string())
        .unwrap_or_default()
}

/// Serialize a row struct into a JSON object and attach `timestamp_str`
/// derived from its `ts` field.
pub(crate) fn row_to_object<T: serde::Serialize>(
    row: &T,
    timestamp_format: &str,
) -> serde_json::Map<String, serde_json::Value> {
    let mut object = match serde_json::to_value(row) {
        Ok(serde_json::Value::Object(map)) => map,
        _ => serde_json::Map::new(),
    };
    let ts = object.get("ts").and_then(serde_json::Value::as_i64).unwrap_or(0);
    object.insert(
        "timestamp_str".to_string(),
        serde_json::Value::String(format_timestamp(ts, timestamp_format)),
    );
    object
}
