//! Daemon configuration.
//!
//! A YAML file is merged over the built-in defaults with a recursive map
//! merge (nested mappings merge key by key, scalars and sequences from the
//! file overwrite the default). Every section below therefore works with a
//! partial file, or with no file at all.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised while loading configuration. These fail fast before the
/// scheduler starts.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("invalid config: {0}")]
    Parse(#[from] serde_yaml::Error),
}

/// Top-level daemon configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LoglyConfig {
    pub database: DatabaseConfig,
    pub collection: CollectionConfig,
    pub system: SystemConfig,
    pub network: NetworkConfig,
    pub logs: LogsConfig,
    pub aggregation: AggregationConfig,
    pub export: ExportConfig,
    pub query: QueryConfig,
    pub logging: LoggingConfig,
}

impl LoglyConfig {
    /// Load configuration, merging `path` (when given) over the defaults.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let defaults = serde_yaml::to_value(Self::default())?;
        let merged = match path {
            Some(path) => {
                let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
                    path: path.to_path_buf(),
                    source,
                })?;
                let overlay: serde_yaml::Value = serde_yaml::from_str(&text)?;
                deep_merge(defaults, overlay)
            }
            None => defaults,
        };
        Ok(serde_yaml::from_value(merged)?)
    }

    /// Data directory the pinned database path derives from.
    #[must_use]
    pub fn data_dir(&self) -> &Path {
        self.database.path.parent().unwrap_or_else(|| Path::new("."))
    }
}

/// Recursive map merge: mappings merge key by key, anything else from the
/// overlay overwrites the base.
fn deep_merge(base: serde_yaml::Value, overlay: serde_yaml::Value) -> serde_yaml::Value {
    match (base, overlay) {
        (serde_yaml::Value::Mapping(mut base), serde_yaml::Value::Mapping(overlay)) => {
            for (key, value) in overlay {
                let merged = match base.remove(&key) {
                    Some(existing) => deep_merge(existing, value),
                    None => value,
                };
                base.insert(key, merged);
            }
            serde_yaml::Value::Mapping(base)
        }
        (_, overlay) => overlay,
    }
}

/// Database location and retention horizon.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Path to the database file. The file name is pinned; see
    /// `storage::paths`.
    pub path: PathBuf,
    /// Days of raw data to keep before the retention sweep deletes it.
    pub retention_days: i64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self { path: PathBuf::from("data/logly.db"), retention_days: 90 }
    }
}

/// Collector tick intervals in seconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CollectionConfig {
    pub system_metrics: u64,
    pub network_metrics: u64,
    pub log_parsing: u64,
}

impl Default for CollectionConfig {
    fn default() -> Self {
        Self { system_metrics: 60, network_metrics: 60, log_parsing: 300 }
    }
}

/// System sampler switches.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SystemConfig {
    pub enabled: bool,
    /// Which metric families to sample each tick.
    pub metrics: Vec<String>,
}

impl Default for SystemConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            metrics: [
                "cpu_percent",
                "cpu_count",
                "memory_total",
                "memory_available",
                "memory_percent",
                "disk_percent",
                "disk_io",
                "load_average",
            ]
            .iter()
            .map(ToString::to_string)
            .collect(),
        }
    }
}

/// Network sampler switches.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    pub enabled: bool,
    pub metrics: Vec<String>,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            metrics: ["bytes_sent", "bytes_recv", "packets_sent", "packets_recv", "connections"]
                .iter()
                .map(ToString::to_string)
                .collect(),
        }
    }
}

/// One tailed log file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogSourceConfig {
    pub path: PathBuf,
    pub enabled: bool,
}

impl Default for LogSourceConfig {
    fn default() -> Self {
        Self { path: PathBuf::new(), enabled: true }
    }
}

/// Log tailer switches and source table.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogsConfig {
    pub enabled: bool,
    pub sources: BTreeMap<String, LogSourceConfig>,
}

impl Default for LogsConfig {
    fn default() -> Self {
        let mut sources = BTreeMap::new();
        for (name, path) in [
            ("fail2ban", "/var/log/fail2ban.log"),
            ("auth", "/var/log/auth.log"),
            ("syslog", "/var/log/syslog"),
        ] {
            sources.insert(
                name.to_string(),
                LogSourceConfig { path: PathBuf::from(path), enabled: true },
            );
        }
        Self { enabled: true, sources }
    }
}

/// Roll-up switches.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AggregationConfig {
    pub enabled: bool,
    /// Which roll-up intervals run ("hourly", "daily").
    pub intervals: Vec<String>,
    pub keep_raw_data_days: i64,
}

impl Default for AggregationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            intervals: vec!["hourly".to_string(), "daily".to_string()],
            keep_raw_data_days: 7,
        }
    }
}

/// Export defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportConfig {
    pub default_format: String,
    /// strftime-style format for the synthetic `timestamp_str` column.
    pub timestamp_format: String,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            default_format: "csv".to_string(),
            timestamp_format: "%Y-%m-%d %H:%M:%S".to_string(),
        }
    }
}

/// Issue detection thresholds. Defaults match the documented detector
/// contract; any of them can be overridden under `query.thresholds`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Thresholds {
    pub high_cpu_percent: f64,
    pub high_memory_percent: f64,
    pub disk_space_critical: f64,
    pub error_spike_multiplier: f64,
    pub failed_login_threshold: u64,
    pub threat_score_high: i64,
    pub network_error_rate: f64,
    pub sustained_duration_min: i64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            high_cpu_percent: 85.0,
            high_memory_percent: 90.0,
            disk_space_critical: 90.0,
            error_spike_multiplier: 3.0,
            failed_login_threshold: 5,
            threat_score_high: 70,
            network_error_rate: 5.0,
            sustained_duration_min: 300,
        }
    }
}

/// Query-layer defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueryConfig {
    /// Default analysis window in hours.
    pub default_time_window: i64,
    pub thresholds: Thresholds,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self { default_time_window: 24, thresholds: Thresholds::default() }
    }
}

/// Logging verbosity.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: "info".to_string() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_are_complete() {
        let config = LoglyConfig::load(None).unwrap();
        assert_eq!(config.database.retention_days, 90);
        assert_eq!(config.collection.system_metrics, 60);
        assert_eq!(config.collection.log_parsing, 300);
        assert_eq!(config.query.thresholds.failed_login_threshold, 5);
        assert!((config.query.thresholds.error_spike_multiplier - 3.0).abs() < f64::EPSILON);
        assert!(config.logs.sources.contains_key("fail2ban"));
    }

    #[test]
    fn partial_file_merges_over_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "database:\n  retention_days: 7\nquery:\n  thresholds:\n    high_cpu_percent: 70"
        )
        .unwrap();

        let config = LoglyConfig::load(Some(file.path())).unwrap();
        // Overridden scalars...
        assert_eq!(config.database.retention_days, 7);
        assert!((config.query.thresholds.high_cpu_percent - 70.0).abs() < f64::EPSILON);
        // ...while sibling keys keep their defaults.
        assert_eq!(config.database.path, PathBuf::from("data/logly.db"));
        assert!((config.query.thresholds.high_memory_percent - 90.0).abs() < f64::EPSILON);
        assert_eq!(config.query.default_time_window, 24);
    }

    #[test]
    fn invalid_yaml_fails_fast() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "database: [not, a, mapping").unwrap();
        assert!(LoglyConfig::load(Some(file.path())).is_err());
    }

    #[test]
    fn missing_file_fails_fast() {
        let err = LoglyConfig::load(Some(Path::new("/nonexistent/logly.yml"))).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }

    #[test]
    fn data_dir_is_database_parent() {
        let config = LoglyConfig::default();
        assert_eq!(config.data_dir(), Path::new("data"));
    }
}
