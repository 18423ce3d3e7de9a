//! Roll-up driver: decides which window to aggregate and delegates the
//! SQL to the store.

use std::sync::Arc;

use chrono::{Duration, Utc};

use crate::config::AggregationConfig;
use crate::storage::Store;

pub struct Aggregator {
    store: Arc<Store>,
    enabled: bool,
    intervals: Vec<String>,
}

impl Aggregator {
    #[must_use]
    pub fn new(store: Arc<Store>, config: &AggregationConfig) -> Self {
        Self { store, enabled: config.enabled, intervals: config.intervals.clone() }
    }

    fn interval_enabled(&self, interval: &str) -> bool {
        self.enabled && self.intervals.iter().any(|i| i == interval)
    }

    /// Roll up the previous complete hour.
    pub async fn run_hourly(&self) -> anyhow::Result<()> {
        if !self.interval_enabled("hourly") {
            return Ok(());
        }
        let now = Utc::now().timestamp();
        let hour_ts = now - now % 3600 - 3600;
        tracing::info!(hour_ts, "running hourly aggregation");
        self.store.compute_hourly_aggregates(hour_ts).await?;
        Ok(())
    }

    /// Roll up yesterday (UTC date key).
    pub async fn run_daily(&self) -> anyhow::Result<()> {
        if !self.interval_enabled("daily") {
            return Ok(());
        }
        let date = (Utc::now() - Duration::days(1)).format("%Y-%m-%d").to_string();
        tracing::info!(%date, "running daily aggregation");
        self.store.compute_daily_aggregates(&date).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::SystemMetric;
    use tempfile::TempDir;

    #[tokio::test]
    async fn disabled_intervals_are_no_ops() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(Store::open(dir.path()).await.unwrap());
        let now = Utc::now().timestamp();
        let prev_hour = now - now % 3600 - 3600;
        store
            .insert_system_metric(&SystemMetric {
                cpu_percent: Some(50.0),
                ..SystemMetric::at(prev_hour + 10)
            })
            .await
            .unwrap();

        let config = AggregationConfig { enabled: false, ..AggregationConfig::default() };
        let aggregator = Aggregator::new(Arc::clone(&store), &config);
        aggregator.run_hourly().await.unwrap();
        assert!(store.get_hourly_aggregate(prev_hour).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn hourly_rolls_up_previous_hour() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(Store::open(dir.path()).await.unwrap());
        let now = Utc::now().timestamp();
        let prev_hour = now - now % 3600 - 3600;
        store
            .insert_system_metric(&SystemMetric {
                cpu_percent: Some(50.0),
                ..SystemMetric::at(prev_hour + 10)
            })
            .await
            .unwrap();

        let aggregator = Aggregator::new(Arc::clone(&store), &AggregationConfig::default());
        aggregator.run_hourly().await.unwrap();

        let row = store.get_hourly_aggregate(prev_hour).await.unwrap().unwrap();
        assert_eq!(row.avg_cpu_percent, Some(50.0));
    }
}
