use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::events::{Event, EventLog, EventSeverity, EventType};
use crate::logging::{log, obj, v_num, v_str, Domain, Level};
use crate::reconcile::safety::{Activator, SafetyLevel, SafetyModeManager};

/// A holding as either side reports it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub ticker: String,
    #[serde(default)]
    pub name: String,
    pub quantity: i64,
    #[serde(default)]
    pub avg_price: f64,
}

impl Position {
    pub fn new(ticker: &str, quantity: i64, avg_price: f64) -> Self {
        Self { ticker: ticker.to_string(), name: String::new(), quantity, avg_price }
    }

    fn label(&self) -> &str {
        if self.name.is_empty() {
            &self.ticker
        } else {
            &self.name
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MismatchType {
    QuantityDiff,
    PriceDiff,
    /// Broker holds something we never recorded.
    PhantomPosition,
    /// We believe we hold something the broker does not report.
    MissingPosition,
}

impl MismatchType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MismatchType::QuantityDiff => "quantity_diff",
            MismatchType::PriceDiff => "price_diff",
            MismatchType::PhantomPosition => "phantom_position",
            MismatchType::MissingPosition => "missing_position",
        }
    }
}

impl fmt::Display for MismatchType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MismatchSeverity {
    Medium,
    High,
    Critical,
}

impl MismatchSeverity {
    pub fn as_str(&self) -> &'static str {
        match self {
            MismatchSeverity::Medium => "medium",
            MismatchSeverity::High => "high",
            MismatchSeverity::Critical => "critical",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Mismatch {
    pub ticker: String,
    pub name: String,
    pub mismatch_type: MismatchType,
    pub severity: MismatchSeverity,
    pub internal_qty: i64,
    pub broker_qty: i64,
    pub internal_price: f64,
    pub broker_price: f64,
    pub description: String,
}

impl Mismatch {
    pub fn is_critical(&self) -> bool {
        self.severity == MismatchSeverity::Critical
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ReconStatus {
    Ok,
    Mismatch,
}

impl ReconStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReconStatus::Ok => "ok",
            ReconStatus::Mismatch => "mismatch",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ReconciliationReport {
    pub timestamp: DateTime<Utc>,
    pub status: ReconStatus,
    pub mismatches: Vec<Mismatch>,
    pub matched_positions: usize,
    pub mismatch_count: usize,
    pub has_critical: bool,
    pub internal_positions: usize,
    pub broker_positions: usize,
    pub safety_level_before: SafetyLevel,
    pub safety_level_after: SafetyLevel,
    /// The broker snapshot was unavailable; the broker side was treated as empty.
    pub degraded: bool,
}

impl ReconciliationReport {
    pub fn critical_count(&self) -> usize {
        self.mismatches.iter().filter(|m| m.is_critical()).count()
    }

    pub fn to_dict(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

#[derive(Debug)]
pub struct PositionReconciler {
    price_diff_pct: f64,
    last_report: Option<ReconciliationReport>,
}

impl PositionReconciler {
    pub fn new(price_diff_pct: f64) -> Self {
        Self { price_diff_pct, last_report: None }
    }

    pub fn last_report(&self) -> Option<&ReconciliationReport> {
        self.last_report.as_ref()
    }

    /// Compare both sides and drive the safety ladder from the result.
    pub fn reconcile(
        &mut self,
        internal: &[Position],
        broker: &[Position],
        safety: &mut SafetyModeManager,
        events: &mut EventLog,
    ) -> ReconciliationReport {
        self.run(internal, broker, false, safety, events)
    }

    /// Broker snapshot could not be fetched (timeout or error). Every
    /// internal holding surfaces as `missing_position`.
    pub fn reconcile_degraded(
        &mut self,
        internal: &[Position],
        cause: &str,
        safety: &mut SafetyModeManager,
        events: &mut EventLog,
    ) -> ReconciliationReport {
        events.log(
            Event::new(
                EventType::ReconDegraded,
                EventSeverity::Warning,
                format!("broker snapshot unavailable: {}", cause),
            )
            .from_source("reconciler"),
        );
        self.run(internal, &[], true, safety, events)
    }

    fn run(
        &mut self,
        internal: &[Position],
        broker: &[Position],
        degraded: bool,
        safety: &mut SafetyModeManager,
        events: &mut EventLog,
    ) -> ReconciliationReport {
        let before = safety.level();
        let internal_map: BTreeMap<&str, &Position> =
            internal.iter().filter(|p| !p.ticker.is_empty()).map(|p| (p.ticker.as_str(), p)).collect();
        let broker_map: BTreeMap<&str, &Position> =
            broker.iter().filter(|p| !p.ticker.is_empty()).map(|p| (p.ticker.as_str(), p)).collect();
        let tickers: BTreeSet<&str> = internal_map.keys().chain(broker_map.keys()).copied().collect();

        let mut mismatches = Vec::new();
        let mut matched = 0;
        for ticker in tickers {
            let before_len = mismatches.len();
            match (internal_map.get(ticker), broker_map.get(ticker)) {
                (Some(i), None) => mismatches.push(Mismatch {
                    ticker: ticker.to_string(),
                    name: i.name.clone(),
                    mismatch_type: MismatchType::MissingPosition,
                    severity: MismatchSeverity::High,
                    internal_qty: i.quantity,
                    broker_qty: 0,
                    internal_price: i.avg_price,
                    broker_price: 0.0,
                    description: format!("{}: {} shares recorded internally, none at broker", i.label(), i.quantity),
                }),
                (None, Some(b)) => mismatches.push(Mismatch {
                    ticker: ticker.to_string(),
                    name: b.name.clone(),
                    mismatch_type: MismatchType::PhantomPosition,
                    severity: MismatchSeverity::Critical,
                    internal_qty: 0,
                    broker_qty: b.quantity,
                    internal_price: 0.0,
                    broker_price: b.avg_price,
                    description: format!("{}: broker holds {} shares with no internal record", b.label(), b.quantity),
                }),
                (Some(i), Some(b)) => {
                    let name = if i.name.is_empty() { b.name.clone() } else { i.name.clone() };
                    if i.quantity != b.quantity {
                        mismatches.push(Mismatch {
                            ticker: ticker.to_string(),
                            name: name.clone(),
                            mismatch_type: MismatchType::QuantityDiff,
                            severity: MismatchSeverity::High,
                            internal_qty: i.quantity,
                            broker_qty: b.quantity,
                            internal_price: i.avg_price,
                            broker_price: b.avg_price,
                            description: format!(
                                "{}: quantity internal {} vs broker {}",
                                i.label(),
                                i.quantity,
                                b.quantity
                            ),
                        });
                    }
                    if i.avg_price > 0.0 && b.avg_price > 0.0 {
                        let diff = (i.avg_price - b.avg_price).abs() / b.avg_price;
                        if diff > self.price_diff_pct {
                            mismatches.push(Mismatch {
                                ticker: ticker.to_string(),
                                name,
                                mismatch_type: MismatchType::PriceDiff,
                                severity: MismatchSeverity::Medium,
                                internal_qty: i.quantity,
                                broker_qty: b.quantity,
                                internal_price: i.avg_price,
                                broker_price: b.avg_price,
                                description: format!(
                                    "{}: avg price internal {:.0} vs broker {:.0} ({:.1}% apart)",
                                    i.label(),
                                    i.avg_price,
                                    b.avg_price,
                                    diff * 100.0
                                ),
                            });
                        }
                    }
                }
                (None, None) => {}
            }
            if mismatches.len() == before_len {
                matched += 1;
            }
        }

        let mismatch_count = mismatches.len();
        let has_critical = mismatches.iter().any(|m| m.is_critical());
        let status = if mismatch_count == 0 { ReconStatus::Ok } else { ReconStatus::Mismatch };

        if has_critical {
            let reason = format!("critical reconciliation mismatch ({} total)", mismatch_count);
            safety.arm(&reason, Activator::Reconciliation, events);
            safety.set_level(SafetyLevel::Lockdown, &reason, events);
        } else if mismatch_count > 0 {
            safety.escalate(&format!("reconciliation mismatch ({})", mismatch_count), events);
        } else if safety.level() != SafetyLevel::Normal {
            safety.set_level(SafetyLevel::Normal, "reconciliation clean", events);
        }

        let report = ReconciliationReport {
            timestamp: Utc::now(),
            status,
            mismatches,
            matched_positions: matched,
            mismatch_count,
            has_critical,
            internal_positions: internal.len(),
            broker_positions: broker.len(),
            safety_level_before: before,
            safety_level_after: safety.level(),
            degraded,
        };

        self.log_outcome(&report, events);
        self.last_report = Some(report.clone());
        report
    }

    fn log_outcome(&self, report: &ReconciliationReport, events: &mut EventLog) {
        log(
            Level::Info,
            Domain::Recon,
            "reconcile",
            obj(&[
                ("internal", v_num(report.internal_positions as f64)),
                ("broker", v_num(report.broker_positions as f64)),
                ("matched", v_num(report.matched_positions as f64)),
                ("mismatches", v_num(report.mismatch_count as f64)),
                ("level_after", v_str(report.safety_level_after.as_str())),
            ]),
        );
        match report.status {
            ReconStatus::Ok => {
                events.log(
                    Event::new(
                        EventType::ReconOk,
                        EventSeverity::Info,
                        format!("reconciliation ok: {} positions matched", report.matched_positions),
                    )
                    .from_source("reconciler"),
                );
            }
            ReconStatus::Mismatch => {
                let severity = if report.has_critical { EventSeverity::Critical } else { EventSeverity::Warning };
                events.log(
                    Event::new(
                        EventType::ReconMismatch,
                        severity,
                        format!(
                            "reconciliation mismatch: {} issue(s), level {} -> {}",
                            report.mismatch_count, report.safety_level_before, report.safety_level_after
                        ),
                    )
                    .from_source("reconciler")
                    .with("critical", json!(report.critical_count()))
                    .with("degraded", json!(report.degraded)),
                );
                for m in &report.mismatches {
                    let severity = if m.is_critical() { EventSeverity::Critical } else { EventSeverity::Warning };
                    events.log(
                        Event::new(EventType::ReconMismatch, severity, m.description.clone())
                            .from_source("reconciler")
                            .for_ticker(&m.ticker)
                            .with("mismatch_type", json!(m.mismatch_type.as_str()))
                            .with("internal_qty", json!(m.internal_qty))
                            .with("broker_qty", json!(m.broker_qty)),
                    );
                }
            }
        }
    }
}
