use std::collections::BTreeSet;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::pit::asof::PitRow;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ViolationKind {
    /// A row is timestamped after the reference time: lookahead.
    FutureData,
    /// Event times are not non-decreasing.
    TimeReversal,
    /// Ingest lagged event by more than the stale threshold.
    StaleData,
    /// More than one source inside a single batch.
    SourceMismatch,
}

impl ViolationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ViolationKind::FutureData => "future_data",
            ViolationKind::TimeReversal => "time_reversal",
            ViolationKind::StaleData => "stale_data",
            ViolationKind::SourceMismatch => "source_mismatch",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ViolationSeverity {
    Warning,
    Critical,
}

impl fmt::Display for ViolationSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ViolationSeverity::Warning => "warning",
            ViolationSeverity::Critical => "critical",
        })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PitViolation {
    pub kind: ViolationKind,
    pub severity: ViolationSeverity,
    pub description: String,
    pub count: usize,
    /// Distinct sources, only for `SourceMismatch`.
    pub sources: Vec<String>,
    /// Worst latency in seconds, only for `StaleData`.
    pub max_latency_s: Option<f64>,
}

impl PitViolation {
    fn new(kind: ViolationKind, severity: ViolationSeverity, count: usize, description: String) -> Self {
        Self {
            kind,
            severity,
            description,
            count,
            sources: Vec::new(),
            max_latency_s: None,
        }
    }

    pub fn is_critical(&self) -> bool {
        self.severity == ViolationSeverity::Critical
    }
}

#[derive(Debug, Clone)]
pub struct PitValidator {
    pub stale_threshold_secs: f64,
}

impl Default for PitValidator {
    fn default() -> Self {
        Self::new(600.0)
    }
}

impl PitValidator {
    pub fn new(stale_threshold_secs: f64) -> Self {
        Self { stale_threshold_secs }
    }

    pub fn validate<T>(&self, rows: &[PitRow<T>], reference_time: DateTime<Utc>) -> Vec<PitViolation> {
        let mut out = Vec::new();
        if rows.is_empty() {
            return out;
        }

        let future = rows.iter().filter(|r| r.event_time > reference_time).count();
        if future > 0 {
            out.push(PitViolation::new(
                ViolationKind::FutureData,
                ViolationSeverity::Critical,
                future,
                format!("{} row(s) dated after {}; lookahead risk", future, reference_time.to_rfc3339()),
            ));
        }

        let reversals = rows
            .windows(2)
            .filter(|w| w[1].event_time < w[0].event_time)
            .count();
        if reversals > 0 {
            out.push(PitViolation::new(
                ViolationKind::TimeReversal,
                ViolationSeverity::Warning,
                reversals,
                format!("{} time reversal(s); rows need sorting", reversals),
            ));
        }

        let latencies: Vec<f64> = rows.iter().map(|r| r.latency_seconds()).collect();
        let stale = latencies.iter().filter(|l| **l > self.stale_threshold_secs).count();
        if stale > 0 {
            let worst = latencies.iter().cloned().fold(f64::MIN, f64::max);
            let mut v = PitViolation::new(
                ViolationKind::StaleData,
                ViolationSeverity::Warning,
                stale,
                format!("{} stale row(s) (latency > {}s)", stale, self.stale_threshold_secs),
            );
            v.max_latency_s = Some((worst * 10.0).round() / 10.0);
            out.push(v);
        }

        let sources: BTreeSet<&str> = rows.iter().map(|r| r.source.as_str()).collect();
        if sources.len() > 1 {
            let names: Vec<String> = sources.iter().map(|s| s.to_string()).collect();
            let mut v = PitViolation::new(
                ViolationKind::SourceMismatch,
                ViolationSeverity::Warning,
                names.len(),
                format!("{} sources mixed in one batch: {}", names.len(), names.join(", ")),
            );
            v.sources = names;
            out.push(v);
        }

        out
    }
}
