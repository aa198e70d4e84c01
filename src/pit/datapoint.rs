use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Freshness threshold for a single value, independent of its source.
pub const DEFAULT_STALE_SECS: f64 = 300.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataSourceType {
    KisRealtime,
    KisHistorical,
    Yfinance,
    Naver,
    Manual,
    Screenshot,
    Backtest,
    /// Degraded/fallback path: the value has no known origin.
    None,
}

impl DataSourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DataSourceType::KisRealtime => "kis_realtime",
            DataSourceType::KisHistorical => "kis_historical",
            DataSourceType::Yfinance => "yfinance",
            DataSourceType::Naver => "naver",
            DataSourceType::Manual => "manual",
            DataSourceType::Screenshot => "screenshot",
            DataSourceType::Backtest => "backtest",
            DataSourceType::None => "none",
        }
    }

    /// Typical delay between the market event and our receipt of it.
    pub fn nominal_latency_secs(&self) -> f64 {
        match self {
            DataSourceType::KisRealtime => 0.5,
            DataSourceType::Yfinance => 900.0,
            DataSourceType::Naver => 1200.0,
            _ => 0.0,
        }
    }
}

impl fmt::Display for DataSourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DataSourceType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "kis_realtime" => DataSourceType::KisRealtime,
            "kis_historical" => DataSourceType::KisHistorical,
            "yfinance" => DataSourceType::Yfinance,
            "naver" => DataSourceType::Naver,
            "manual" => DataSourceType::Manual,
            "screenshot" => DataSourceType::Screenshot,
            "backtest" => DataSourceType::Backtest,
            "none" | "" => DataSourceType::None,
            other => anyhow::bail!("unknown data source: {}", other),
        })
    }
}

/// A single value stamped with when it happened, when we saw it, and where
/// it came from.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DataPoint<T> {
    pub value: T,
    pub event_time: DateTime<Utc>,
    pub ingest_time: DateTime<Utc>,
    pub source: DataSourceType,
    pub ticker: String,
    pub field_name: String,
    /// 0..1; manual and OCR inputs are usually lower.
    pub confidence: f64,
}

impl<T> DataPoint<T> {
    /// Live tick: event time and ingest time are both "now".
    pub fn now(value: T, source: DataSourceType, ticker: &str, field_name: &str) -> Self {
        let now = Utc::now();
        Self::historical(value, now, now, source, ticker, field_name)
    }

    /// Back-fill with an explicit (earlier) event time.
    pub fn historical(
        value: T,
        event_time: DateTime<Utc>,
        ingest_time: DateTime<Utc>,
        source: DataSourceType,
        ticker: &str,
        field_name: &str,
    ) -> Self {
        Self {
            value,
            event_time,
            ingest_time,
            source,
            ticker: ticker.to_string(),
            field_name: field_name.to_string(),
            confidence: 1.0,
        }
    }

    /// Live value whose event time is backdated by the source's typical delay.
    pub fn with_nominal_latency(value: T, source: DataSourceType, ticker: &str, field_name: &str) -> Self {
        let now = Utc::now();
        let lag = Duration::milliseconds((source.nominal_latency_secs() * 1000.0) as i64);
        Self::historical(value, now - lag, now, source, ticker, field_name)
    }

    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = confidence.clamp(0.0, 1.0);
        self
    }

    pub fn latency_seconds(&self) -> f64 {
        (self.ingest_time - self.event_time).num_milliseconds() as f64 / 1000.0
    }

    pub fn is_stale(&self) -> bool {
        self.is_stale_after(DEFAULT_STALE_SECS)
    }

    pub fn is_stale_after(&self, threshold_secs: f64) -> bool {
        self.latency_seconds() > threshold_secs
    }
}

impl<T: Serialize> DataPoint<T> {
    pub fn to_dict(&self) -> Value {
        json!({
            "value": self.value,
            "event_time": self.event_time.to_rfc3339(),
            "ingest_time": self.ingest_time.to_rfc3339(),
            "source": self.source.as_str(),
            "ticker": self.ticker,
            "field_name": self.field_name,
            "confidence": self.confidence,
            "latency_s": (self.latency_seconds() * 100.0).round() / 100.0,
        })
    }
}
