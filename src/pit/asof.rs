use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::logging::{log, obj, v_num, v_str, Domain, Level};
use crate::pit::datapoint::DataSourceType;

/// One row of a tagged batch. `source` is mandatory, so every consumer can
/// rely on a provenance tag being present (`DataSourceType::None` when
/// degraded).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PitRow<T> {
    pub value: T,
    pub event_time: DateTime<Utc>,
    pub ingest_time: DateTime<Utc>,
    pub source: DataSourceType,
    pub ticker: String,
}

impl<T> PitRow<T> {
    pub fn latency_seconds(&self) -> f64 {
        (self.ingest_time - self.event_time).num_milliseconds() as f64 / 1000.0
    }
}

/// Lookahead guard over tagged rows.
#[derive(Debug, Default, Clone, Copy)]
pub struct AsOfJoinEngine;

impl AsOfJoinEngine {
    pub fn new() -> Self {
        Self
    }

    /// Tag `(event_time, value)` rows; the whole batch shares one ingest time.
    pub fn tag_rows<T>(
        &self,
        rows: Vec<(DateTime<Utc>, T)>,
        source: DataSourceType,
        ticker: &str,
    ) -> Vec<PitRow<T>> {
        self.tag_rows_at(rows, source, ticker, Utc::now())
    }

    pub fn tag_rows_at<T>(
        &self,
        rows: Vec<(DateTime<Utc>, T)>,
        source: DataSourceType,
        ticker: &str,
        ingest_time: DateTime<Utc>,
    ) -> Vec<PitRow<T>> {
        rows.into_iter()
            .map(|(event_time, value)| PitRow {
                value,
                event_time,
                ingest_time,
                source,
                ticker: ticker.to_string(),
            })
            .collect()
    }

    /// Rows with `event_time <= cutoff`, input order preserved.
    pub fn filter_asof<'a, T>(&self, rows: &'a [PitRow<T>], cutoff: DateTime<Utc>) -> Vec<&'a PitRow<T>> {
        let kept: Vec<&PitRow<T>> = rows.iter().filter(|r| r.event_time <= cutoff).collect();
        let dropped = rows.len() - kept.len();
        if dropped > 0 {
            log(
                Level::Debug,
                Domain::Data,
                "asof_filter",
                obj(&[
                    ("cutoff", v_str(&cutoff.to_rfc3339())),
                    ("dropped", v_num(dropped as f64)),
                    ("kept", v_num(kept.len() as f64)),
                ]),
            );
        }
        kept
    }

    /// Newest row at or before `cutoff`.
    pub fn latest_asof<'a, T>(&self, rows: &'a [PitRow<T>], cutoff: DateTime<Utc>) -> Option<&'a PitRow<T>> {
        rows.iter()
            .filter(|r| r.event_time <= cutoff)
            .max_by_key(|r| r.event_time)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn day(d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, d, 6, 30, 0).unwrap()
    }

    fn closes() -> Vec<PitRow<f64>> {
        let engine = AsOfJoinEngine::new();
        engine.tag_rows(
            vec![(day(2), 100.0), (day(3), 101.0), (day(6), 99.0), (day(7), 104.0)],
            DataSourceType::KisHistorical,
            "005930",
        )
    }

    #[test]
    fn tagging_sets_provenance_on_every_row() {
        let rows = closes();
        assert!(rows.iter().all(|r| r.source == DataSourceType::KisHistorical));
        assert!(rows.iter().all(|r| r.ingest_time == rows[0].ingest_time));
        assert!(rows.iter().all(|r| r.ticker == "005930"));
    }

    #[test]
    fn filter_drops_future_rows() {
        let rows = closes();
        let engine = AsOfJoinEngine::new();
        let kept = engine.filter_asof(&rows, day(3));
        assert_eq!(kept.len(), 2);
        assert!(kept.iter().all(|r| r.event_time <= day(3)));
        // cutoff is inclusive
        assert_eq!(kept[1].value, 101.0);
    }

    #[test]
    fn latest_asof_picks_newest_qualifying() {
        let rows = closes();
        let engine = AsOfJoinEngine::new();
        let row = engine.latest_asof(&rows, day(6) + Duration::hours(1)).unwrap();
        assert_eq!(row.value, 99.0);
        assert!(engine.latest_asof(&rows, day(1)).is_none());
    }
}
