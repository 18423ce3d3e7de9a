//! CSV export: header row from the column names, one row per record,
//! plus a synthetic `timestamp_str` column in the configured format.

use std::io::Write;
use std::path::Path;

use crate::storage::Store;

use super::{row_to_object, LOG_COLUMNS, NETWORK_COLUMNS, SYSTEM_COLUMNS};

pub struct CsvExporter<'a> {
    store: &'a Store,
    timestamp_format: String,
}

impl<'a> CsvExporter<'a> {
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
        let objects: Vec<_> =
            rows.iter().map(|row| row_to_object(row, &self.timestamp_format)).collect();
        self.write_csv(output, SYSTEM_COLUMNS, &objects)?;
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
        let objects: Vec<_> =
            rows.iter().map(|row| row_to_object(row, &self.timestamp_format)).collect();
        self.write_csv(output, NETWORK_COLUMNS, &objects)?;
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
        let objects: Vec<_> =
            rows.iter().map(|row| row_to_object(row, &self.timestamp_format)).collect();
        self.write_csv(output, LOG_COLUMNS, &objects)?;
        tracing::info!(count = rows.len(), path = %output.display(), "exported log events");
        Ok(rows.len())
    }

    fn write_csv(
        &self,
        output: &Path,
        columns: &[&str],
        rows: &[serde_json::Map<String, serde_json::Value>],
    ) -> anyhow::Result<()> {
        let mut file = std::io::BufWriter::new(std::fs::File::create(output)?);

        let mut header: Vec<&str> = columns.to_vec();
        header.push("timestamp_str");
        writeln!(file, "{}", header.join(","))?;

        for row in rows {
            let fields: Vec<String> = header
                .iter()
                .map(|column| cell(row.get(*column).unwrap_or(&serde_json::Value::Null)))
                .collect();
            writeln!(file, "{}", fields.join(","))?;
        }

        file.flush()?;
        Ok(())
    }
}

/// Render one cell, quoting values that contain separators or quotes.
fn cell(value: &serde_json::Value) -> String {
    let text = match value {
        serde_json::Value::Null => String::new(),
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    };
    if text.contains(',') || text.contains('"') || text.contains('\n') {
        format!("\"{}\"", text.replace('"', "\"\""))
    } else {
        text
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{LogEvent, SystemMetric};
    use tempfile::TempDir;

    #[test]
    fn cells_quote_separators_and_quotes() {
        assert_eq!(cell(&serde_json::json!("plain")), "plain");
        assert_eq!(cell(&serde_json::json!("a,b")), "\"a,b\"");
        assert_eq!(cell(&serde_json::json!(r#"say "hi""#)), r#""say ""hi""""#);
        assert_eq!(cell(&serde_json::Value::Null), "");
        assert_eq!(cell(&serde_json::json!(42)), "42");
    }

    #[tokio::test]
    async fn system_export_round_trips_values() {
        let dir = TempDir::new().unwrap();
        let store = Store::open(dir.path()).await.unwrap();
        store
            .insert_system_metric(&SystemMetric {
                cpu_percent: Some(42.5),
                memory_percent: Some(61.0),
                ..SystemMetric::at(1_700_000_000)
            })
            .await
            .unwrap();

        let output = dir.path().join("system.csv");
        let exporter = CsvExporter::new(&store, "%Y-%m-%d %H:%M:%S");
        let count =
            exporter.export_system_metrics(&output, 0, 2_000_000_000).await.unwrap();
        assert_eq!(count, 1);

        let text = std::fs::read_to_string(&output).unwrap();
        let mut lines = text.lines();
        let header = lines.next().unwrap();
        assert!(header.starts_with("id,ts,cpu_percent"));
        assert!(header.ends_with("timestamp_str"));

        let row = lines.next().unwrap();
        let fields: Vec<&str> = row.split(',').collect();
        assert_eq!(fields[1], "1700000000");
        assert_eq!(fields[2], "42.5");
    }

    #[tokio::test]
    async fn log_export_applies_filters_and_quotes_messages() {
        let dir = TempDir::new().unwrap();
        let store = Store::open(dir.path()).await.unwrap();
        let mut event = LogEvent::new(100, "nginx", r#"GET /a,b "weird" path"#);
        event.level = Some("ERROR".to_string());
        store.insert_log_event(&event).await.unwrap();
        store.insert_log_event(&LogEvent::new(100, "auth", "other")).await.unwrap();

        let output = dir.path().join("logs.csv");
        let exporter = CsvExporter::new(&store, "%Y-%m-%d %H:%M:%S");
        let count = exporter
            .export_log_events(&output, 0, 200, Some("nginx"), None)
            .await
            .unwrap();
        assert_eq!(count, 1);

        let text = std::fs::read_to_string(&output).unwrap();
        assert!(text.contains(r#""GET /a,b ""weird"" path""#));
        assert!(!text.contains("other"));
    }
}
