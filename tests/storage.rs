//! SQLite mirror: every operation lands in the append-only tables.

use chrono::{NaiveDate, Utc};
use tempfile::tempdir;

use tradeguard::config::Config;
use tradeguard::guard::GuardCore;
use tradeguard::orders::{OrderRequest, Side};
use tradeguard::reconcile::{BrokerSnapshot, Position};
use tradeguard::replay::{BacktestPrediction, ExecutionRecord};
use tradeguard::storage::AuditStore;

fn core_at(path: &str) -> GuardCore {
    let cfg = Config { sqlite_path: path.to_string(), ..Config::default() };
    GuardCore::open(cfg).unwrap()
}

#[test]
fn events_and_reconciliations_are_mirrored() {
    let dir = tempdir().unwrap();
    let db = dir.path().join("audit.sqlite");
    let db = db.to_str().unwrap();
    {
        let mut core = core_at(db);
        core.create_order(OrderRequest::new("005930", "Samsung", Side::Buy, 10, 75_000.0));
        core.create_order(OrderRequest::new("005930", "Samsung", Side::Buy, 10, 75_000.0));
        core.reconcile(BrokerSnapshot::Available(vec![Position::new("035720", 3, 50_000.0)]));
    }

    let store = AuditStore::open_read_only(db).unwrap();
    let blocked = store.get_events(Some("order.blocked"), 10).unwrap();
    assert_eq!(blocked.len(), 1);
    assert_eq!(blocked[0].ticker.as_deref(), Some("005930"));

    let all = store.get_events(None, 100).unwrap();
    assert!(all.windows(2).all(|w| w[0].id > w[1].id));
    assert!(all.iter().any(|e| e.event_type == "risk.kill_switch" && e.severity == "critical"));

    let recon = store.get_reconciliations(5).unwrap();
    assert_eq!(recon.len(), 1);
    assert_eq!(recon[0].status, "mismatch");
    assert_eq!(recon[0].critical_count, 1);
    assert_eq!(recon[0].safety_level, "lockdown");
}

#[test]
fn execution_replay_rows_join_predictions() {
    let dir = tempdir().unwrap();
    let db = dir.path().join("replay.sqlite");
    let mut core = core_at(db.to_str().unwrap());

    core.record_prediction(BacktestPrediction {
        ticker: "005930".into(),
        strategy: "swing".into(),
        prediction_date: NaiveDate::from_ymd_opt(2025, 3, 3).unwrap(),
        predicted_return_pct: 0.03,
        predicted_win_prob: 0.6,
        confidence: 0.7,
        actual_return_pct: None,
    });
    let now = Utc::now();
    for (strategy, pnl) in [("swing", -0.01), ("momentum", 0.02)] {
        core.record_execution(ExecutionRecord {
            trade_id: format!("T-{}", strategy),
            ticker: "005930".into(),
            name: "Samsung".into(),
            side: Side::Buy,
            strategy: strategy.into(),
            signal_time: now,
            signal_price: 75_000.0,
            execution_time: now,
            execution_price: 75_300.0,
            quantity: 10,
            pnl_pct: pnl,
            commission: 0.0,
        });
    }

    let store = core.store().unwrap();
    assert_eq!(store.get_execution_replays(10).unwrap().len(), 2);
    let swing = store.get_execution_replays_by_strategy("swing", 10).unwrap();
    assert_eq!(swing.len(), 1);
    assert_eq!(swing[0].bt_predicted_return, Some(0.03));
    assert_eq!(swing[0].direction_match, Some(false));
    assert!((swing[0].slippage_pct - 0.004).abs() < 1e-9);

    let momentum = store.get_execution_replays_by_strategy("momentum", 10).unwrap();
    assert_eq!(momentum[0].bt_predicted_return, None);
    assert_eq!(momentum[0].direction_match, None);
}

#[test]
fn missing_holdings_file_fails_open() {
    let dir = tempdir().unwrap();
    let cfg = Config {
        sqlite_path: dir.path().join("x.sqlite").to_str().unwrap().to_string(),
        holdings_path: Some(dir.path().join("absent.json").to_str().unwrap().to_string()),
        ..Config::default()
    };
    assert!(GuardCore::open(cfg).is_err());
}
