use std::io::{self, BufRead};
use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, NaiveDate, Utc};
use serde::Deserialize;
use serde_json::json;
use tokio::sync::oneshot;

use tradeguard::config::Config;
use tradeguard::guard::{GuardCore, Tick};
use tradeguard::logging::{json_log, obj, run_id, v_num, v_str};
use tradeguard::pit::DataSourceType;
use tradeguard::orders::{OrderRequest, Side};
use tradeguard::reconcile::{JsonFileSource, Position, PositionSource};
use tradeguard::report;
use tradeguard::runtime::{self, FeedMessage};

/// One JSON line on stdin, as written by an external feed client.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum FeedLine {
    Tick {
        ticker: String,
        field: String,
        value: f64,
        #[serde(default)]
        source: Option<DataSourceType>,
        #[serde(default)]
        event_time: Option<DateTime<Utc>>,
        #[serde(default)]
        latency_ms: f64,
    },
    Order {
        ticker: String,
        #[serde(default)]
        name: String,
        side: Side,
        quantity: i64,
        price: f64,
        #[serde(default)]
        total_eval: Option<f64>,
        #[serde(default)]
        strategy: String,
    },
    Place {
        order_id: String,
        broker_order_id: String,
    },
    Fill {
        order_id: String,
        qty: i64,
        price: f64,
    },
    Outcome {
        ticker: String,
        strategy: String,
        date: NaiveDate,
        actual_return_pct: f64,
    },
    Snapshot {
        positions: Vec<Position>,
    },
    Reconcile,
    Kill {
        reason: String,
    },
    Resume {
        reason: String,
    },
    Shutdown,
}

impl From<FeedLine> for FeedMessage {
    fn from(line: FeedLine) -> Self {
        match line {
            FeedLine::Tick { ticker, field, value, source, event_time, latency_ms } => {
                let mut tick = Tick::new(&ticker, &field, value, source.unwrap_or(DataSourceType::None));
                tick.event_time = event_time;
                tick.fetch_latency_ms = latency_ms;
                FeedMessage::Tick(tick)
            }
            FeedLine::Order { ticker, name, side, quantity, price, total_eval, strategy } => {
                let mut request = OrderRequest::new(&ticker, &name, side, quantity, price).with_strategy(&strategy);
                request.total_eval = total_eval;
                FeedMessage::Order { request, reply: None }
            }
            FeedLine::Place { order_id, broker_order_id } => FeedMessage::Place { order_id, broker_order_id },
            FeedLine::Fill { order_id, qty, price } => FeedMessage::Fill { order_id, qty, price },
            FeedLine::Outcome { ticker, strategy, date, actual_return_pct } => {
                FeedMessage::Outcome { ticker, strategy, date, actual_return_pct }
            }
            FeedLine::Snapshot { positions } => FeedMessage::BrokerSnapshot(positions),
            FeedLine::Reconcile => FeedMessage::Reconcile,
            FeedLine::Kill { reason } => FeedMessage::ActivateKillSwitch { reason },
            FeedLine::Resume { reason } => FeedMessage::DeactivateKillSwitch { reason },
            FeedLine::Shutdown => FeedMessage::Shutdown,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cfg = Config::from_env();
    json_log(
        "startup",
        obj(&[
            ("run_id", v_str(run_id())),
            ("sqlite_path", v_str(&cfg.sqlite_path)),
            ("reconcile_secs", v_num(cfg.reconcile_secs as f64)),
        ]),
    );

    let core = GuardCore::open(cfg.clone())?;
    let source: Option<Arc<dyn PositionSource>> = match &cfg.broker_snapshot_path {
        Some(path) => Some(Arc::new(JsonFileSource::new(path))),
        None => {
            json_log(
                "startup",
                obj(&[("warning", v_str("no BROKER_SNAPSHOT_PATH; scheduled reconciliation off, push snapshot lines"))]),
            );
            None
        }
    };

    let (tx, handle) = runtime::spawn(core, source);

    // Feed thread: blocking stdin reads, handed to the core over the channel.
    let feed = std::thread::spawn(move || {
        let stdin = io::stdin();
        for line in stdin.lock().lines() {
            let Ok(line) = line else { break };
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            match serde_json::from_str::<FeedLine>(trimmed) {
                Ok(parsed) => {
                    let mut msg: FeedMessage = parsed.into();
                    let mut pending = None;
                    if let FeedMessage::Order { reply, .. } = &mut msg {
                        let (otx, orx) = oneshot::channel();
                        *reply = Some(otx);
                        pending = Some(orx);
                    }
                    if tx.blocking_send(msg).is_err() {
                        return;
                    }
                    // order ids are only known once the core answers
                    if let Some(Ok(outcome)) = pending.map(|rx| rx.blocking_recv()) {
                        let line = json!({
                            "order_id": outcome.order.order_id,
                            "state": outcome.order.state.as_str(),
                            "message": outcome.message,
                        });
                        println!("{}", line);
                    }
                }
                Err(err) => {
                    json_log("feed", obj(&[("status", v_str("bad_line")), ("error", v_str(&err.to_string()))]));
                }
            }
        }
        let _ = tx.blocking_send(FeedMessage::Shutdown);
    });

    let (core, summary) = handle.await??;
    let _ = feed.join();

    println!("{}", report::format_safety_status(&core.safety_status()));
    if let Some(last) = core.reconciler.last_report() {
        println!("{}", report::format_reconciliation_report(last));
    }
    println!("{}", report::format_order_ledger_summary(&core.ledger.get_stats(), &core.ledger.active_orders()));
    println!("{}", report::format_source_summary(&core.registry.get_summary()));
    println!("{}", report::format_event_summary(&core.events));
    json_log(
        "shutdown",
        obj(&[
            ("messages", v_num(summary.messages as f64)),
            ("reconciliations", v_num(summary.reconciliations as f64)),
        ]),
    );
    Ok(())
}
