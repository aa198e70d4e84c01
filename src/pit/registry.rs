use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::pit::datapoint::DataSourceType;

#[derive(Debug, Clone, Default, Serialize)]
pub struct SourceStats {
    pub success_count: u64,
    pub failure_count: u64,
    pub total_latency_ms: f64,
    pub total_records: u64,
    pub last_success: Option<DateTime<Utc>>,
    pub last_failure: Option<DateTime<Utc>>,
}

impl SourceStats {
    pub fn total_fetches(&self) -> u64 {
        self.success_count + self.failure_count
    }

    /// Success ratio; an untried source is assumed reliable.
    pub fn reliability(&self) -> f64 {
        let total = self.total_fetches();
        if total == 0 {
            1.0
        } else {
            self.success_count as f64 / total as f64
        }
    }

    /// Mean latency over successful fetches only.
    pub fn avg_latency_ms(&self) -> f64 {
        if self.success_count == 0 {
            0.0
        } else {
            self.total_latency_ms / self.success_count as f64
        }
    }

    fn merge(&mut self, other: &SourceStats) {
        self.success_count += other.success_count;
        self.failure_count += other.failure_count;
        self.total_latency_ms += other.total_latency_ms;
        self.total_records += other.total_records;
        self.last_success = self.last_success.max(other.last_success);
        self.last_failure = self.last_failure.max(other.last_failure);
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SourceSummary {
    pub source: DataSourceType,
    pub tickers: usize,
    pub reliability: f64,
    pub avg_latency_ms: f64,
    pub total_fetches: u64,
    pub total_records: u64,
    pub last_success: Option<DateTime<Utc>>,
    pub last_failure: Option<DateTime<Utc>>,
}

/// Per-(source, ticker) fetch health. Display only; nothing gates on it.
#[derive(Debug, Default)]
pub struct SourceRegistry {
    entries: BTreeMap<(DataSourceType, String), SourceStats>,
}

impl SourceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_fetch(&mut self, source: DataSourceType, ticker: &str, success: bool, latency_ms: f64) {
        self.record_fetch_with_count(source, ticker, success, latency_ms, 0);
    }

    pub fn record_fetch_with_count(
        &mut self,
        source: DataSourceType,
        ticker: &str,
        success: bool,
        latency_ms: f64,
        record_count: u64,
    ) {
        let entry = self.entries.entry((source, ticker.to_string())).or_default();
        let now = Utc::now();
        if success {
            entry.success_count += 1;
            entry.total_latency_ms += latency_ms.max(0.0);
            entry.total_records += record_count;
            entry.last_success = Some(now);
        } else {
            entry.failure_count += 1;
            entry.last_failure = Some(now);
        }
    }

    pub fn stats(&self, source: DataSourceType, ticker: &str) -> Option<&SourceStats> {
        self.entries.get(&(source, ticker.to_string()))
    }

    pub fn get_reliability(&self, source: DataSourceType, ticker: &str) -> f64 {
        self.stats(source, ticker).map_or(1.0, |s| s.reliability())
    }

    pub fn get_avg_latency_ms(&self, source: DataSourceType, ticker: &str) -> f64 {
        self.stats(source, ticker).map_or(0.0, |s| s.avg_latency_ms())
    }

    /// One line per source, aggregated across tickers.
    pub fn get_summary(&self) -> Vec<SourceSummary> {
        let mut by_source: BTreeMap<DataSourceType, (usize, SourceStats)> = BTreeMap::new();
        for ((source, _), stats) in &self.entries {
            let agg = by_source.entry(*source).or_default();
            agg.0 += 1;
            agg.1.merge(stats);
        }
        by_source
            .into_iter()
            .map(|(source, (tickers, s))| SourceSummary {
                source,
                tickers,
                reliability: (s.reliability() * 1000.0).round() / 1000.0,
                avg_latency_ms: (s.avg_latency_ms() * 10.0).round() / 10.0,
                total_fetches: s.total_fetches(),
                total_records: s.total_records,
                last_success: s.last_success,
                last_failure: s.last_failure,
            })
            .collect()
    }
}
