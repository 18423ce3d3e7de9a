//! JSON export: an envelope of `{type, start_time, end_time, [filters],
//! count, data[]}` where each record carries both the numeric `ts` and a
//! formatted `timestamp_str`.

use std::path::Path;

use serde::Serialize;

use crate::storage::Store;

use super::row_to_object;

#[derive(Debug, Serialize)]
struct Envelope {
    #[serde(rename = "type")]
    kind: &'static str,
    start_time: i64,
    end_time: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    source: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    level: Option<String>,
    count: usize,
    data: Vec<serde_json::Map<String, serde_json::Value>>,
}

pub struct JsonExporter<'a> {
    store: &'a Store,
    timestamp_format: String,
}

impl<'a> JsonExporter<'a> {
    #[must_use]
    pub fn new(store: &'a Store, timestamp_format: impl Into<String>) -> Self {
        Self { store, timestamp_format: timestamp_format.into() }
    }

    pub async fn export_system_metrics(
        &self,
        output: &Path,
        start: i64,
        end: i64,
    ) -> anyhow::Result<usize> {
        let rows = self.store.get_system_metrics(start, end, None).await?;
        let data: Vec<_> =
            rows.iter().map(|row| row_to_object(row, &self.timestamp_format)).collect();
        self.write(output, Envelope {
            kind: "system_metrics",
            start_time: start,
            end_time: end,
            source: None,
            level: None,
            count: data.len(),
            data,
        })?;
        tracing::info!(count = rows.len(), path = %output.display(), "exported system metrics");
        Ok(rows.len())
    }

    pub async fn export_network_metrics(
        &self,
        output: &Path,
        start: i64,
        end: i64,
    ) -> anyhow::Result<usize> {
        let rows = self.store.get_network_metrics(start, end, None).await?;
        let data: Vec<_> =
            rows.iter().map(|row| row_to_object(row, &self.timestamp_format)).collect();
        self.write(output, Envelope {
            kind: "network_metrics",
            start_time: start,
            end_time: end,
            source: None,
            level: None,
            count: data.len(),
            data,
        })?;
        tracing::info!(count = rows.len(), path = %output.display(), "exported network metrics");
        Ok(rows.len())
    }

    pub async fn export_log_events(
        &self,
        output: &Path,
        start: i64,
        end: i64,
        source: Option<&str>,
        level: Option<&str>,
    ) -> anyhow::Result<usize> {
        let rows = self.store.get_log_events(start, end, source, level, None).await?;
        let data: Vec<_> =
            rows.iter().map(|row| row_to_object(row, &self.timestamp_format)).collect();
        self.write(output, Envelope {
            kind: "log_events",
            start_time: start,
            end_time: end,
            source: source.map(ToString::to_string),
            level: level.map(ToString::to_string),
            count: data.len(),
            data,
        })?;
        tracing::info!(count = rows.len(), path = %output.display(), "exported log events");
        Ok(rows.len())
    }

    fn write(&self, output: &Path, envelope: Envelope) -> anyhow::Result<()> {
        let file = std::io::BufWriter::new(std::fs::File::create(output)?);
        serde_json::to_writer_pretty(file, &envelope)?;
        Ok(())
    }
}
