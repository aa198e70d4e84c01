use std::collections::BTreeMap;

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use serde::Deserialize;
use serde_json::json;

use crate::config::Config;
use crate::events::{Event, EventLog, EventSeverity, EventType};
use crate::logging::{json_log, log_store_error, obj, v_num, v_str};
use crate::orders::ledger::{apply_to_position, OrderLedger, OrderOutcome};
use crate::orders::pretrade::{OrderRequest, PreTradeLimits};
use crate::orders::state_machine::Side;
use crate::pit::asof::{AsOfJoinEngine, PitRow};
use crate::pit::datapoint::{DataPoint, DataSourceType};
use crate::pit::registry::SourceRegistry;
use crate::pit::validator::{PitValidator, PitViolation};
use crate::reconcile::positions::{Position, PositionReconciler, ReconciliationReport};
use crate::reconcile::safety::{Activator, SafetyLevel, SafetyModeManager, SafetyStatus};
use crate::reconcile::source::BrokerSnapshot;
use crate::refinery::cv::{Fold, PurgedKFoldCV};
use crate::refinery::pruner::{RefineryReport, SignalPruner};
use crate::replay::engine::{BacktestPrediction, ExecutionRecord, ReplayDashboard, ReplayEngine, ReplayRow};
use crate::storage::AuditStore;

/// A live value pushed by a price feed.
#[derive(Debug, Clone)]
pub struct Tick {
    pub ticker: String,
    pub field: String,
    pub value: f64,
    pub source: DataSourceType,
    /// Exchange timestamp when known; otherwise the tick is stamped on arrival.
    pub event_time: Option<DateTime<Utc>>,
    pub fetch_latency_ms: f64,
}

impl Tick {
    pub fn new(ticker: &str, field: &str, value: f64, source: DataSourceType) -> Self {
        Self {
            ticker: ticker.to_string(),
            field: field.to_string(),
            value,
            source,
            event_time: None,
            fetch_latency_ms: 0.0,
        }
    }
}

#[derive(Debug, Deserialize)]
struct HoldingRecord {
    ticker: String,
    #[serde(default)]
    name: Option<String>,
    quantity: i64,
    avg_price: f64,
}

/// Read the starting holdings book: a JSON list of
/// `{ticker, name?, quantity, avg_price}`.
pub fn load_holdings(path: &str) -> Result<Vec<Position>> {
    let raw = std::fs::read_to_string(path).with_context(|| format!("reading holdings {}", path))?;
    let records: Vec<HoldingRecord> =
        serde_json::from_str(&raw).with_context(|| format!("parsing holdings {}", path))?;
    Ok(records
        .into_iter()
        .map(|r| {
            let mut p = Position::new(&r.ticker, r.quantity, r.avg_price);
            p.name = r.name.unwrap_or_default();
            p
        })
        .collect())
}

/// Composition root: one instance of every component, one owner.
pub struct GuardCore {
    pub config: Config,
    pub events: EventLog,
    pub safety: SafetyModeManager,
    pub ledger: OrderLedger,
    pub reconciler: PositionReconciler,
    pub replay: ReplayEngine,
    pub registry: SourceRegistry,
    pub validator: PitValidator,
    pub asof: AsOfJoinEngine,
    pub pruner: SignalPruner,
    pub cv: PurgedKFoldCV,
    holdings: BTreeMap<String, Position>,
    latest: BTreeMap<(String, String), DataPoint<f64>>,
    store: Option<AuditStore>,
}

impl GuardCore {
    pub fn new(config: Config) -> Self {
        let limits = PreTradeLimits { max_order_pct: config.max_order_pct, max_daily_orders: config.max_daily_orders };
        Self {
            events: EventLog::new(config.event_log_max),
            safety: SafetyModeManager::new(),
            ledger: OrderLedger::new(config.idempotency_window_secs, limits),
            reconciler: PositionReconciler::new(config.price_diff_pct),
            replay: ReplayEngine::new(config.drift_threshold, config.sharpe_decay),
            registry: SourceRegistry::new(),
            validator: PitValidator::new(config.pit_stale_secs),
            asof: AsOfJoinEngine::new(),
            pruner: SignalPruner::new(config.corr_threshold),
            cv: PurgedKFoldCV::new(config.cv_splits, config.purge_gap),
            holdings: BTreeMap::new(),
            latest: BTreeMap::new(),
            store: None,
            config,
        }
    }

    /// Core with the SQLite mirror and holdings book wired from config.
    pub fn open(config: Config) -> Result<Self> {
        let mut store = AuditStore::new(&config.sqlite_path)?;
        store.init()?;
        let holdings = match &config.holdings_path {
            Some(path) => load_holdings(path)?,
            None => Vec::new(),
        };
        let mut core = Self::new(config).with_store(store);
        core.seed_holdings(holdings);
        Ok(core)
    }

    pub fn with_store(mut self, store: AuditStore) -> Self {
        self.events.enable_mirror();
        self.store = Some(store);
        self
    }

    pub fn store(&self) -> Option<&AuditStore> {
        self.store.as_ref()
    }

    pub fn seed_holdings(&mut self, positions: Vec<Position>) {
        for p in positions {
            self.holdings.insert(p.ticker.clone(), p);
        }
        json_log("holdings", obj(&[("seeded", v_num(self.holdings.len() as f64))]));
    }

    /// Internal side of reconciliation; flat tickers are omitted.
    pub fn holdings(&self) -> Vec<Position> {
        self.holdings.values().filter(|p| p.quantity != 0).cloned().collect()
    }

    pub fn start(&mut self) {
        self.events.log(
            Event::new(EventType::SystemStart, EventSeverity::Info, "guard core started")
                .from_source("core")
                .with("holdings", json!(self.holdings.len()))
                .with("event_log_max", json!(self.config.event_log_max)),
        );
        self.mirror_events();
    }

    pub fn create_order(&mut self, req: OrderRequest) -> OrderOutcome {
        let outcome = self.ledger.create_order(req, &self.safety, &mut self.events);
        self.mirror_events();
        outcome
    }

    pub fn place_order(&mut self, order_id: &str, broker_order_id: &str) -> bool {
        let ok = self.ledger.place(order_id, broker_order_id, &mut self.events);
        self.mirror_events();
        ok
    }

    /// Apply a broker fill to the order and the holdings book, and record it
    /// as an execution for replay. Sells realize a return against the book's
    /// average price; buys record 0 until closed.
    pub fn apply_fill(&mut self, order_id: &str, qty: i64, price: f64) -> bool {
        let ok = self.ledger.fill(order_id, qty, price, &mut self.events);
        if ok {
            if let Some(order) = self.ledger.get(order_id) {
                let pos = self.holdings.entry(order.ticker.clone()).or_insert_with(|| {
                    let mut p = Position::new(&order.ticker, 0, 0.0);
                    p.name = order.name.clone();
                    p
                });
                let pnl_pct = match order.side {
                    Side::Sell if pos.quantity > 0 && pos.avg_price > 0.0 => (price - pos.avg_price) / pos.avg_price,
                    _ => 0.0,
                };
                apply_to_position(pos, order.side, qty, price);
                json_log(
                    "holdings",
                    obj(&[
                        ("ticker", v_str(&pos.ticker)),
                        ("quantity", v_num(pos.quantity as f64)),
                        ("avg_price", v_num(pos.avg_price)),
                    ]),
                );
                let record = ExecutionRecord {
                    trade_id: format!("{}-{}", order.order_id, order.filled_quantity),
                    ticker: order.ticker.clone(),
                    name: order.name.clone(),
                    side: order.side,
                    strategy: order.strategy.clone(),
                    signal_time: order.created_at,
                    signal_price: order.price,
                    execution_time: Utc::now(),
                    execution_price: price,
                    quantity: qty,
                    pnl_pct,
                    commission: 0.0,
                };
                self.record_execution(record);
            }
        }
        self.mirror_events();
        ok
    }

    pub fn block_order(&mut self, order_id: &str, reason: &str) -> bool {
        let ok = self.ledger.block(order_id, reason, &mut self.events);
        self.mirror_events();
        ok
    }

    /// Reconcile holdings against a broker snapshot. An unavailable snapshot
    /// reconciles against an empty broker side and is flagged degraded.
    pub fn reconcile(&mut self, snapshot: BrokerSnapshot) -> ReconciliationReport {
        let internal = self.holdings();
        let report = match snapshot {
            BrokerSnapshot::Available(broker) => {
                self.reconciler.reconcile(&internal, &broker, &mut self.safety, &mut self.events)
            }
            BrokerSnapshot::Unavailable(cause) => {
                self.reconciler.reconcile_degraded(&internal, &cause, &mut self.safety, &mut self.events)
            }
        };
        if let Some(store) = self.store.as_mut() {
            if let Err(err) = store.add_reconciliation(&report) {
                log_store_error("reconciliation_log", &err);
            }
        }
        self.mirror_events();
        report
    }

    pub fn record_execution(&mut self, record: ExecutionRecord) -> ReplayRow {
        let row = self.replay.replay_row(&record);
        json_log(
            "execution",
            obj(&[
                ("ticker", v_str(&record.ticker)),
                ("strategy", v_str(&record.strategy)),
                ("slippage_pct", v_num(record.slippage_pct())),
                ("pnl_pct", v_num(record.pnl_pct)),
            ]),
        );
        self.replay.add_execution(record);
        if let Some(store) = self.store.as_mut() {
            if let Err(err) = store.add_execution_replay(&row) {
                log_store_error("execution_replay", &err);
            }
        }
        row
    }

    pub fn record_prediction(&mut self, prediction: BacktestPrediction) {
        self.replay.add_prediction(prediction);
    }

    /// Resolve backtest predictions for one day with the realized return.
    pub fn record_actual(&mut self, ticker: &str, strategy: &str, date: NaiveDate, actual_return_pct: f64) -> usize {
        let updated = self.replay.record_actual(ticker, strategy, date, actual_return_pct);
        json_log(
            "replay",
            obj(&[
                ("ticker", v_str(ticker)),
                ("strategy", v_str(strategy)),
                ("date", v_str(&date.to_string())),
                ("resolved", v_num(updated as f64)),
            ]),
        );
        updated
    }

    pub fn dashboard(&self) -> ReplayDashboard {
        self.replay.create_dashboard()
    }

    /// Stamp a feed value, credit its source, and flag it when stale.
    pub fn ingest_tick(&mut self, tick: Tick) -> DataPoint<f64> {
        let point = match tick.event_time {
            Some(at) => DataPoint::historical(tick.value, at, Utc::now(), tick.source, &tick.ticker, &tick.field),
            None => DataPoint::now(tick.value, tick.source, &tick.ticker, &tick.field),
        };
        self.registry.record_fetch(tick.source, &tick.ticker, true, tick.fetch_latency_ms);

        if tick.source == DataSourceType::None {
            self.events.log(
                Event::new(EventType::DataFallback, EventSeverity::Warning, "value arrived without a known source")
                    .from_source("pit")
                    .for_ticker(&tick.ticker)
                    .with("field", json!(tick.field)),
            );
        }
        if point.is_stale_after(self.config.stale_secs) {
            self.events.log(
                Event::new(
                    EventType::DataStale,
                    EventSeverity::Warning,
                    format!("{} {} is {:.0}s old", tick.ticker, tick.field, point.latency_seconds()),
                )
                .from_source("pit")
                .for_ticker(&tick.ticker)
                .with("source", json!(tick.source.as_str()))
                .with("latency_s", json!(point.latency_seconds())),
            );
        }
        self.latest.insert((tick.ticker, tick.field), point.clone());
        self.mirror_events();
        point
    }

    pub fn latest(&self, ticker: &str, field: &str) -> Option<&DataPoint<f64>> {
        self.latest.get(&(ticker.to_string(), field.to_string()))
    }

    /// Run the PIT validator over a batch and log each violation.
    pub fn validate_rows<T>(&mut self, rows: &[PitRow<T>], reference_time: DateTime<Utc>) -> Vec<PitViolation> {
        let violations = self.validator.validate(rows, reference_time);
        for v in &violations {
            let severity = if v.is_critical() { EventSeverity::Critical } else { EventSeverity::Warning };
            let mut event = Event::new(EventType::DataPitViolation, severity, v.description.clone())
                .from_source("pit_validator")
                .with("kind", json!(v.kind.as_str()))
                .with("count", json!(v.count));
            if let Some(first) = rows.first() {
                event = event.for_ticker(&first.ticker);
            }
            self.events.log(event);
        }
        self.mirror_events();
        violations
    }

    pub fn refine_signals(
        &mut self,
        signals: &BTreeMap<String, Vec<f64>>,
        quality: Option<&BTreeMap<String, f64>>,
        target_count: Option<usize>,
    ) -> RefineryReport {
        let report = self.pruner.prune(signals, quality, target_count);
        self.events.log(
            Event::new(
                EventType::SignalRefined,
                EventSeverity::Info,
                format!("{} signals refined to {}", report.total_signals, report.selected_signals),
            )
            .from_source("signal_refinery")
            .with("clusters", json!(report.clusters.len()))
            .with("threshold", json!(report.threshold)),
        );
        self.mirror_events();
        report
    }

    pub fn cv_folds(&self, n_samples: usize) -> Vec<Fold> {
        self.cv.split(n_samples)
    }

    /// Operator halt: arm the switch and drop to Lockdown.
    pub fn activate_kill_switch(&mut self, reason: &str) -> bool {
        let armed = self.safety.arm(reason, Activator::Manual, &mut self.events);
        self.safety.set_level(SafetyLevel::Lockdown, reason, &mut self.events);
        self.mirror_events();
        armed
    }

    pub fn deactivate_kill_switch(&mut self, reason: &str) -> bool {
        let ok = self.safety.deactivate_kill_switch(reason, &mut self.events);
        self.mirror_events();
        ok
    }

    pub fn safety_status(&self) -> SafetyStatus {
        self.safety.get_status()
    }

    /// Flush newly logged events into the durable store. Store failures are
    /// logged and dropped; the in-memory log is unaffected.
    pub fn mirror_events(&mut self) {
        let pending = self.events.drain_mirror();
        if pending.is_empty() {
            return;
        }
        if let Some(store) = self.store.as_mut() {
            if let Err(err) = store.add_events(&pending) {
                log_store_error("event_log", &err);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orders::state_machine::OrderState;

    fn core() -> GuardCore {
        GuardCore::new(Config::default())
    }

    #[test]
    fn fills_feed_holdings_and_reconcile_clean() {
        let mut c = core();
        let req = OrderRequest::new("005930", "Samsung Electronics", Side::Buy, 10, 75_000.0);
        let id = c.create_order(req).order.order_id;
        assert!(c.place_order(&id, "KIS-1"));
        assert!(c.apply_fill(&id, 10, 75_000.0));
        assert_eq!(c.ledger.get(&id).unwrap().state, OrderState::Filled);

        let held = c.holdings();
        assert_eq!(held.len(), 1);
        assert_eq!(held[0].quantity, 10);

        let report = c.reconcile(BrokerSnapshot::Available(vec![Position::new("005930", 10, 75_000.0)]));
        assert_eq!(report.mismatch_count, 0);
        assert_eq!(c.safety.level(), SafetyLevel::Normal);
    }

    #[test]
    fn fills_become_replay_executions() {
        let mut c = core();
        let buy = OrderRequest::new("005930", "Samsung Electronics", Side::Buy, 10, 75_000.0).with_strategy("swing");
        let id = c.create_order(buy).order.order_id;
        c.place_order(&id, "KIS-1");
        c.apply_fill(&id, 10, 75_150.0);

        let sell = OrderRequest::new("005930", "Samsung Electronics", Side::Sell, 10, 78_000.0).with_strategy("swing");
        let id = c.create_order(sell).order.order_id;
        c.place_order(&id, "KIS-2");
        c.apply_fill(&id, 10, 77_922.0);

        let execs = c.replay.executions();
        assert_eq!(execs.len(), 2);
        assert_eq!(execs[0].pnl_pct, 0.0);
        assert!((execs[0].slippage_pct() - 0.002).abs() < 1e-9);
        assert!((execs[1].pnl_pct - (77_922.0 - 75_150.0) / 75_150.0).abs() < 1e-12);
        assert!((execs[1].cost_slippage_pct() - 0.001).abs() < 1e-9);
        assert_eq!(c.dashboard().slippage.by_strategy.len(), 1);
        assert!(c.holdings().is_empty());
    }

    #[test]
    fn operator_halt_then_clear() {
        let mut c = core();
        assert!(c.activate_kill_switch("broker outage"));
        assert_eq!(c.safety.level(), SafetyLevel::Lockdown);
        assert_eq!(c.safety.kill_switch().activated_by(), Some(Activator::Manual));
        let req = OrderRequest::new("005930", "", Side::Sell, 1, 75_000.0);
        assert!(!c.create_order(req.clone()).is_validated());

        assert!(c.deactivate_kill_switch("outage over"));
        c.reconcile(BrokerSnapshot::Available(Vec::new()));
        assert!(c.create_order(req).is_validated());
    }

    #[test]
    fn actuals_resolve_predictions() {
        let mut c = core();
        let date = NaiveDate::from_ymd_opt(2025, 3, 3).unwrap();
        c.record_prediction(BacktestPrediction {
            ticker: "005930".into(),
            strategy: "swing".into(),
            prediction_date: date,
            predicted_return_pct: 0.02,
            predicted_win_prob: 0.6,
            confidence: 0.5,
            actual_return_pct: None,
        });
        assert_eq!(c.record_actual("005930", "swing", date, 0.01), 1);
        assert_eq!(c.dashboard().accuracy_rate, 1.0);
    }

    #[test]
    fn unavailable_broker_is_degraded_missing() {
        let mut c = core();
        c.seed_holdings(vec![Position::new("000660", 5, 120_000.0)]);
        let report = c.reconcile(BrokerSnapshot::Unavailable("timed out".into()));
        assert!(report.degraded);
        assert_eq!(report.mismatch_count, 1);
        assert!(!report.has_critical);
        assert_eq!(c.safety.level(), SafetyLevel::Caution);
    }

    #[test]
    fn stale_tick_is_flagged() {
        let mut c = core();
        let mut tick = Tick::new("005930", "close", 75_000.0, DataSourceType::Yfinance);
        tick.event_time = Some(Utc::now() - chrono::Duration::minutes(30));
        let point = c.ingest_tick(tick);
        assert!(point.latency_seconds() > 1700.0);
        assert_eq!(c.events.count_by_type()[&EventType::DataStale], 1);
        assert!(c.latest("005930", "close").is_some());
        assert_eq!(c.registry.get_reliability(DataSourceType::Yfinance, "005930"), 1.0);
    }

    #[test]
    fn future_rows_log_critical_violation() {
        let mut c = core();
        let now = Utc::now();
        let rows = c.asof.tag_rows(
            vec![(now - chrono::Duration::days(1), 1.0), (now + chrono::Duration::days(1), 2.0)],
            DataSourceType::Backtest,
            "005930",
        );
        let violations = c.validate_rows(&rows, now);
        assert!(violations.iter().any(|v| v.is_critical()));
        assert!(!c.events.get_errors(10).is_empty());
    }

    #[test]
    fn holdings_file_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("holdings.json");
        std::fs::write(
            &path,
            r#"[{"ticker":"005930","name":"Samsung","quantity":100,"avg_price":75000},
                {"ticker":"035420","quantity":3,"avg_price":210000}]"#,
        )
        .unwrap();
        let held = load_holdings(path.to_str().unwrap()).unwrap();
        assert_eq!(held.len(), 2);
        assert_eq!(held[0].name, "Samsung");
        assert!(held[1].name.is_empty());
        assert!(load_holdings("/nonexistent/holdings.json").is_err());
    }
}
