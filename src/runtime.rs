use std::sync::Arc;

use anyhow::Result;
use chrono::NaiveDate;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Duration, Instant, MissedTickBehavior};

use crate::guard::{GuardCore, Tick};
use crate::orders::ledger::OrderOutcome;
use crate::orders::pretrade::OrderRequest;
use crate::logging::{json_log, obj, v_num, v_str};
use crate::reconcile::positions::Position;
use crate::reconcile::source::{fetch_with_timeout, BrokerSnapshot, PositionSource};

/// Everything a feed may hand to the core. Feeds never touch core state
/// directly; they only send these.
#[derive(Debug)]
pub enum FeedMessage {
    Tick(Tick),
    /// Submit an order; the outcome (with its assigned id) goes back on `reply`.
    Order {
        request: OrderRequest,
        reply: Option<oneshot::Sender<OrderOutcome>>,
    },
    Place { order_id: String, broker_order_id: String },
    Fill { order_id: String, qty: i64, price: f64 },
    /// Realized return for a day's backtest predictions.
    Outcome { ticker: String, strategy: String, date: NaiveDate, actual_return_pct: f64 },
    /// A broker client pushed a fresh snapshot; reconcile against it now.
    BrokerSnapshot(Vec<Position>),
    /// Reconcile now, fetching from the configured source.
    Reconcile,
    ActivateKillSwitch { reason: String },
    DeactivateKillSwitch { reason: String },
    Shutdown,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RunSummary {
    pub messages: u64,
    pub ticks: u64,
    pub orders: u64,
    pub fills: u64,
    pub reconciliations: u64,
}

async fn scheduled_reconcile(core: &mut GuardCore, source: &dyn PositionSource) {
    let limit = Duration::from_millis(core.config.broker_timeout_ms);
    let snapshot = fetch_with_timeout(source, limit).await;
    let report = core.reconcile(snapshot);
    json_log(
        "reconcile",
        obj(&[
            ("source", v_str(source.name())),
            ("status", v_str(report.status.as_str())),
            ("mismatches", v_num(report.mismatch_count as f64)),
            ("safety_level", v_str(report.safety_level_after.as_str())),
        ]),
    );
}

fn submit_order(core: &mut GuardCore, request: OrderRequest, reply: Option<oneshot::Sender<OrderOutcome>>) {
    let outcome = core.create_order(request);
    json_log(
        "order",
        obj(&[
            ("order_id", v_str(&outcome.order.order_id)),
            ("ticker", v_str(&outcome.order.ticker)),
            ("state", v_str(outcome.order.state.as_str())),
            ("msg", v_str(&outcome.message)),
        ]),
    );
    if let Some(tx) = reply {
        // the submitter may have gone away; the order stands either way
        let _ = tx.send(outcome);
    }
}

/// Single consuming loop: owns the core and applies feed messages in arrival
/// order. With a `source`, it also reconciles every `reconcile_secs`; without
/// one, only pushed snapshots reconcile. Returns the core when the channel
/// closes or a `Shutdown` arrives.
pub async fn run(
    mut core: GuardCore,
    mut rx: mpsc::Receiver<FeedMessage>,
    source: Option<Arc<dyn PositionSource>>,
) -> Result<(GuardCore, RunSummary)> {
    let period = Duration::from_secs(core.config.reconcile_secs.max(1));
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut summary = RunSummary::default();

    core.start();
    loop {
        tokio::select! {
            msg = rx.recv() => {
                let Some(msg) = msg else {
                    json_log("runtime", obj(&[("status", v_str("channel_closed"))]));
                    break;
                };
                summary.messages += 1;
                match msg {
                    FeedMessage::Tick(tick) => {
                        summary.ticks += 1;
                        core.ingest_tick(tick);
                    }
                    FeedMessage::Order { request, reply } => {
                        summary.orders += 1;
                        submit_order(&mut core, request, reply);
                    }
                    FeedMessage::Place { order_id, broker_order_id } => {
                        core.place_order(&order_id, &broker_order_id);
                    }
                    FeedMessage::Fill { order_id, qty, price } => {
                        summary.fills += 1;
                        core.apply_fill(&order_id, qty, price);
                    }
                    FeedMessage::Outcome { ticker, strategy, date, actual_return_pct } => {
                        core.record_actual(&ticker, &strategy, date, actual_return_pct);
                    }
                    FeedMessage::BrokerSnapshot(positions) => {
                        summary.reconciliations += 1;
                        core.reconcile(BrokerSnapshot::Available(positions));
                    }
                    FeedMessage::Reconcile => match &source {
                        Some(src) => {
                            summary.reconciliations += 1;
                            scheduled_reconcile(&mut core, src.as_ref()).await;
                        }
                        None => {
                            json_log(
                                "reconcile",
                                obj(&[("status", v_str("skipped")), ("msg", v_str("no position source; push a snapshot"))]),
                            );
                        }
                    },
                    FeedMessage::ActivateKillSwitch { reason } => {
                        core.activate_kill_switch(&reason);
                    }
                    FeedMessage::DeactivateKillSwitch { reason } => {
                        core.deactivate_kill_switch(&reason);
                    }
                    FeedMessage::Shutdown => {
                        json_log("runtime", obj(&[("status", v_str("shutdown"))]));
                        break;
                    }
                }
            }
            _ = ticker.tick(), if source.is_some() => {
                if let Some(src) = &source {
                    summary.reconciliations += 1;
                    scheduled_reconcile(&mut core, src.as_ref()).await;
                }
            }
        }
    }

    core.mirror_events();
    json_log(
        "runtime",
        obj(&[
            ("messages", v_num(summary.messages as f64)),
            ("ticks", v_num(summary.ticks as f64)),
            ("orders", v_num(summary.orders as f64)),
            ("fills", v_num(summary.fills as f64)),
            ("reconciliations", v_num(summary.reconciliations as f64)),
        ]),
    );
    Ok((core, summary))
}

/// Move the core onto its own task and hand back the feed side of the channel.
pub fn spawn(
    core: GuardCore,
    source: Option<Arc<dyn PositionSource>>,
) -> (mpsc::Sender<FeedMessage>, JoinHandle<Result<(GuardCore, RunSummary)>>) {
    let (tx, rx) = mpsc::channel(core.config.feed_channel_capacity.max(1));
    let handle = tokio::spawn(run(core, rx, source));
    (tx, handle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::reconcile::source::StaticSource;
    use crate::reconcile::safety::SafetyLevel;

    #[tokio::test]
    async fn messages_apply_in_order_then_shutdown() {
        let core = GuardCore::new(Config::default());
        let (tx, handle) = spawn(core, Some(Arc::new(StaticSource::default())));
        tx.send(FeedMessage::BrokerSnapshot(vec![Position::new("005930", 100, 75_000.0)])).await.unwrap();
        tx.send(FeedMessage::Shutdown).await.unwrap();
        let (core, summary) = handle.await.unwrap().unwrap();
        assert_eq!(summary.reconciliations, 1);
        assert_eq!(core.safety.level(), SafetyLevel::Lockdown);
        assert!(core.safety.kill_switch().is_active());
    }

    #[tokio::test(start_paused = true)]
    async fn interval_reconciles_without_messages() {
        let mut cfg = Config::default();
        cfg.reconcile_secs = 10;
        let core = GuardCore::new(cfg);
        let (tx, handle) = spawn(core, Some(Arc::new(StaticSource::default())));
        tokio::time::sleep(Duration::from_secs(35)).await;
        drop(tx);
        let (_, summary) = handle.await.unwrap().unwrap();
        assert_eq!(summary.messages, 0);
        assert_eq!(summary.reconciliations, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn no_source_means_no_schedule() {
        let mut cfg = Config::default();
        cfg.reconcile_secs = 10;
        let mut core = GuardCore::new(cfg);
        core.seed_holdings(vec![Position::new("005930", 10, 75_000.0)]);
        let (tx, handle) = spawn(core, None);
        tokio::time::sleep(Duration::from_secs(35)).await;
        tx.send(FeedMessage::Reconcile).await.unwrap();
        drop(tx);
        let (core, summary) = handle.await.unwrap().unwrap();
        assert_eq!(summary.reconciliations, 0);
        assert!(core.reconciler.last_report().is_none());
        assert_eq!(core.safety.level(), SafetyLevel::Normal);
    }
}
