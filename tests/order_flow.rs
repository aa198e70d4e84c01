//! End-to-end order and safety scenarios through the composition root.

use tradeguard::config::Config;
use tradeguard::events::{EventQuery, EventType};
use tradeguard::guard::GuardCore;
use tradeguard::orders::{OrderRequest, OrderState, Side};
use tradeguard::reconcile::{Activator, BrokerSnapshot, Position, ReconStatus, SafetyLevel};

fn samsung(side: Side, qty: i64) -> OrderRequest {
    OrderRequest::new("005930", "Samsung Electronics", side, qty, 75_000.0)
}

#[test]
fn duplicate_submission_is_blocked() {
    let mut core = GuardCore::new(Config::default());
    let first = core.create_order(samsung(Side::Buy, 10));
    assert_eq!(first.order.state, OrderState::Validated);
    assert!(first.message.contains("pass"));

    let second = core.create_order(samsung(Side::Buy, 10));
    assert_eq!(second.order.state, OrderState::Blocked);
    assert!(second.order.block_reason.as_deref().unwrap_or("").contains("duplicate"));

    let blocked = core.events.query(&EventQuery {
        event_type: Some(EventType::OrderBlocked),
        limit: Some(10),
        ..Default::default()
    });
    assert_eq!(blocked.len(), 1);
}

#[test]
fn phantom_position_locks_everything_down() {
    let mut core = GuardCore::new(Config::default());
    let report = core.reconcile(BrokerSnapshot::Available(vec![Position::new("005930", 100, 75_000.0)]));
    assert!(report.has_critical);
    assert_eq!(report.safety_level_after, SafetyLevel::Lockdown);
    assert!(core.safety.kill_switch().is_active());
    assert_eq!(core.safety.kill_switch().activated_by(), Some(Activator::Reconciliation));

    // the very next order sees the switch
    let sell = core.create_order(samsung(Side::Sell, 1));
    assert_eq!(sell.order.state, OrderState::Blocked);
    assert!(sell.message.contains("kill switch"));

    // a clean pass resets the level but leaves the switch alone
    let clean = core.reconcile(BrokerSnapshot::Available(Vec::new()));
    assert_eq!(clean.status, ReconStatus::Ok);
    assert_eq!(core.safety.level(), SafetyLevel::Normal);
    assert!(core.safety.kill_switch().is_active());
    assert!(!core.create_order(samsung(Side::Buy, 3)).is_validated());

    assert!(core.deactivate_kill_switch("operator reviewed broker statement"));
    assert!(core.create_order(samsung(Side::Buy, 3)).is_validated());
}

#[test]
fn quantity_drift_escalates_one_rung_at_a_time() {
    let mut core = GuardCore::new(Config::default());
    core.seed_holdings(vec![Position::new("000660", 10, 120_000.0)]);
    let broker = vec![Position::new("000660", 8, 120_000.0)];

    core.reconcile(BrokerSnapshot::Available(broker.clone()));
    assert_eq!(core.safety.level(), SafetyLevel::Caution);
    core.reconcile(BrokerSnapshot::Available(broker));
    assert_eq!(core.safety.level(), SafetyLevel::Safe);

    // buys stop at Safe, sells still go through
    assert!(!core.create_order(samsung(Side::Buy, 1)).is_validated());
    assert!(core.create_order(samsung(Side::Sell, 1)).is_validated());
}

#[test]
fn full_lifecycle_trail_is_chronological() {
    let mut core = GuardCore::new(Config::default());
    let id = core.create_order(samsung(Side::Buy, 10)).order.order_id;
    assert!(core.place_order(&id, "KIS-77"));
    assert!(core.apply_fill(&id, 3, 75_100.0));
    assert!(!core.apply_fill(&id, 8, 75_100.0));
    assert!(core.apply_fill(&id, 7, 75_000.0));
    assert!(!core.block_order(&id, "too late"));

    let order = core.ledger.get(&id).unwrap();
    assert_eq!(order.state, OrderState::Filled);
    assert_eq!(order.filled_quantity, 10);

    let trail = core.events.get_order_trail(&id);
    assert!(trail.windows(2).all(|w| w[0].seq < w[1].seq));
    assert_eq!(trail.first().unwrap().event_type, EventType::OrderCreated);
    assert_eq!(trail.iter().filter(|e| e.event_type == EventType::OrderAnomaly).count(), 2);

    let held = core.holdings();
    assert_eq!(held[0].quantity, 10);
    let report = core.reconcile(BrokerSnapshot::Available(held));
    assert_eq!(report.status, ReconStatus::Ok);
}

#[test]
fn oversized_order_is_rejected_with_reason() {
    let mut core = GuardCore::new(Config::default());
    let req = samsung(Side::Buy, 100).with_total_eval(10_000_000.0);
    let outcome = core.create_order(req);
    assert_eq!(outcome.order.state, OrderState::Blocked);
    let reasons = outcome.validation.unwrap().reasons;
    assert!(reasons.iter().any(|r| r.contains("cap")));
}
