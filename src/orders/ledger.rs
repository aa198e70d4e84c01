use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::json;

use crate::events::{Event, EventLog, EventSeverity, EventType};
use crate::orders::idempotency::{IdempotencyGuard, KeyCheck};
use crate::orders::pretrade::{OrderRequest, PreTradeLimits, PreTradeValidator, ValidationResult};
use crate::orders::state_machine::{ManagedOrder, OrderState, Side};
use crate::reconcile::positions::Position;
use crate::reconcile::safety::SafetyModeManager;

#[derive(Debug, Clone)]
pub struct OrderOutcome {
    pub order: ManagedOrder,
    pub message: String,
    /// Present only when the pre-trade validator ran.
    pub validation: Option<ValidationResult>,
}

impl OrderOutcome {
    pub fn is_validated(&self) -> bool {
        self.order.state == OrderState::Validated
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct LedgerStats {
    pub total_orders: usize,
    pub today_orders: usize,
    pub active_orders: usize,
    pub blocked_orders: usize,
    pub filled_orders: usize,
    pub partial_orders: usize,
}

/// Owns every managed order plus the idempotency guard and pre-trade gate.
#[derive(Debug)]
pub struct OrderLedger {
    orders: BTreeMap<String, ManagedOrder>,
    guard: IdempotencyGuard,
    validator: PreTradeValidator,
    next_id: u64,
}

impl OrderLedger {
    pub fn new(window_seconds: i64, limits: PreTradeLimits) -> Self {
        Self {
            orders: BTreeMap::new(),
            guard: IdempotencyGuard::new(window_seconds),
            validator: PreTradeValidator::new(limits),
            next_id: 1,
        }
    }

    fn next_order_id(&mut self, now: DateTime<Utc>) -> String {
        let id = format!("ORD-{}-{:06}", now.format("%Y%m%d"), self.next_id);
        self.next_id += 1;
        id
    }

    /// Idempotency first, then the pre-trade gate, then Intent -> Validated.
    /// Every outcome, including a block, is recorded and logged.
    pub fn create_order(
        &mut self,
        req: OrderRequest,
        safety: &SafetyModeManager,
        events: &mut EventLog,
    ) -> OrderOutcome {
        let now = Utc::now();
        let key = IdempotencyGuard::generate_key(&req.ticker, req.side, req.quantity);
        let order_id = self.next_order_id(now);
        let mut order = ManagedOrder::new(&order_id, &key, &req.ticker, &req.name, req.side, req.quantity, req.price);
        order.strategy = req.strategy.clone();

        events.log(
            Event::new(
                EventType::OrderCreated,
                EventSeverity::Info,
                format!("order created: {} {} {} @ {}", req.ticker, req.side, req.quantity, req.price),
            )
            .from_source("order_ledger")
            .for_ticker(&req.ticker)
            .for_order(&order_id)
            .with("side", json!(req.side.as_str()))
            .with("quantity", json!(req.quantity))
            .with("price", json!(req.price)),
        );

        let check = self.guard.check_and_register_at(&key, now);
        let (message, validation) = match check {
            KeyCheck::Duplicate { .. } => {
                let message = check.message();
                order.block(&message);
                (message, None)
            }
            KeyCheck::Registered => {
                let today = self.orders_today(now);
                let result = self.validator.validate(&req, safety, today);
                if result.approved {
                    order.validate();
                    (format!("order validated: {}", result.summary()), Some(result))
                } else {
                    let reason = result.summary();
                    order.block(&reason);
                    self.guard.release(&key);
                    (format!("order blocked: {}", reason), Some(result))
                }
            }
        };

        match order.state {
            OrderState::Validated => {
                events.log(
                    Event::new(EventType::OrderValidated, EventSeverity::Info, message.clone())
                        .from_source("order_ledger")
                        .for_ticker(&order.ticker)
                        .for_order(&order_id),
                );
            }
            _ => {
                events.log(
                    Event::new(EventType::OrderBlocked, EventSeverity::Warning, message.clone())
                        .from_source("order_ledger")
                        .for_ticker(&order.ticker)
                        .for_order(&order_id)
                        .with("reason", json!(order.block_reason))
                        .with("kill_switch", json!(safety.kill_switch().is_active()))
                        .with("safety_level", json!(safety.level().as_str())),
                );
            }
        }

        let snapshot = order.clone();
        self.orders.insert(order_id, order);
        OrderOutcome { order: snapshot, message, validation }
    }

    pub fn place(&mut self, order_id: &str, broker_order_id: &str, events: &mut EventLog) -> bool {
        let Some(order) = self.orders.get_mut(order_id) else {
            log_unknown(order_id, "place", events);
            return false;
        };
        let ok = order.place(broker_order_id);
        if ok {
            events.log(
                Event::new(EventType::OrderPlaced, EventSeverity::Info, format!("order placed as {}", broker_order_id))
                    .from_source("order_ledger")
                    .for_ticker(&order.ticker)
                    .for_order(order_id)
                    .with("broker_order_id", json!(broker_order_id)),
            );
        } else {
            log_anomaly(order, events);
        }
        ok
    }

    pub fn fill(&mut self, order_id: &str, qty: i64, price: f64, events: &mut EventLog) -> bool {
        let Some(order) = self.orders.get_mut(order_id) else {
            log_unknown(order_id, "fill", events);
            return false;
        };
        let ok = order.fill(qty, price);
        if ok {
            events.log(
                Event::new(
                    EventType::OrderFilled,
                    EventSeverity::Info,
                    format!(
                        "fill {} @ {} ({}/{})",
                        qty, price, order.filled_quantity, order.quantity
                    ),
                )
                .from_source("order_ledger")
                .for_ticker(&order.ticker)
                .for_order(order_id)
                .with("fill_qty", json!(qty))
                .with("fill_price", json!(price))
                .with("state", json!(order.state.as_str())),
            );
        } else {
            log_anomaly(order, events);
        }
        ok
    }

    /// Block a live order and free its idempotency key.
    pub fn block(&mut self, order_id: &str, reason: &str, events: &mut EventLog) -> bool {
        let Some(order) = self.orders.get_mut(order_id) else {
            log_unknown(order_id, "block", events);
            return false;
        };
        let ok = order.block(reason);
        if ok {
            self.guard.release(&order.idempotency_key);
            events.log(
                Event::new(EventType::OrderBlocked, EventSeverity::Warning, format!("order blocked: {}", reason))
                    .from_source("order_ledger")
                    .for_ticker(&order.ticker)
                    .for_order(order_id)
                    .with("reason", json!(reason)),
            );
        } else {
            log_anomaly(order, events);
        }
        ok
    }

    pub fn get(&self, order_id: &str) -> Option<&ManagedOrder> {
        self.orders.get(order_id)
    }

    pub fn orders(&self) -> impl Iterator<Item = &ManagedOrder> {
        self.orders.values()
    }

    pub fn active_orders(&self) -> Vec<&ManagedOrder> {
        self.orders.values().filter(|o| !o.is_terminal()).collect()
    }

    /// Orders created today that made it past the pre-trade gate.
    pub fn orders_today(&self, now: DateTime<Utc>) -> u32 {
        let today = now.date_naive();
        self.orders
            .values()
            .filter(|o| o.created_at.date_naive() == today)
            .filter(|o| o.transitions.iter().any(|t| t.accepted && t.to == OrderState::Validated))
            .count() as u32
    }

    /// Net filled positions per ticker; flat tickers are dropped.
    pub fn positions(&self) -> Vec<Position> {
        let mut book: BTreeMap<&str, Position> = BTreeMap::new();
        for o in self.orders.values().filter(|o| o.filled_quantity > 0) {
            let p = book.entry(o.ticker.as_str()).or_insert_with(|| {
                let mut p = Position::new(&o.ticker, 0, 0.0);
                p.name = o.name.clone();
                p
            });
            apply_to_position(p, o.side, o.filled_quantity, o.avg_fill_price);
        }
        book.into_values().filter(|p| p.quantity != 0).collect()
    }

    pub fn get_stats(&self) -> LedgerStats {
        let today = Utc::now().date_naive();
        let mut stats = LedgerStats { total_orders: self.orders.len(), ..Default::default() };
        for o in self.orders.values() {
            if o.created_at.date_naive() == today {
                stats.today_orders += 1;
            }
            match o.state {
                OrderState::Blocked => stats.blocked_orders += 1,
                OrderState::Filled => stats.filled_orders += 1,
                OrderState::Partial => {
                    stats.partial_orders += 1;
                    stats.active_orders += 1;
                }
                _ => stats.active_orders += 1,
            }
        }
        stats
    }
}

/// Fold one fill into a running position. Buys average in; sells keep the
/// average price and only shrink the quantity.
pub fn apply_to_position(pos: &mut Position, side: Side, qty: i64, price: f64) {
    match side {
        Side::Buy => {
            let total = pos.quantity.saturating_add(qty);
            if total > 0 {
                pos.avg_price = (pos.avg_price * pos.quantity.max(0) as f64 + price * qty as f64)
                    / (pos.quantity.max(0) as f64 + qty as f64);
            }
            pos.quantity = total;
        }
        Side::Sell => {
            pos.quantity = pos.quantity.saturating_sub(qty);
            if pos.quantity <= 0 {
                pos.avg_price = if pos.quantity == 0 { 0.0 } else { price };
            }
        }
    }
}

fn log_anomaly(order: &ManagedOrder, events: &mut EventLog) {
    let note = order.last_rejection().unwrap_or("invalid transition").to_string();
    events.log(
        Event::new(EventType::OrderAnomaly, EventSeverity::Warning, note)
            .from_source("order_ledger")
            .for_ticker(&order.ticker)
            .for_order(&order.order_id)
            .with("state", json!(order.state.as_str())),
    );
}

fn log_unknown(order_id: &str, action: &str, events: &mut EventLog) {
    events.log(
        Event::new(EventType::OrderAnomaly, EventSeverity::Warning, format!("{} on unknown order", action))
            .from_source("order_ledger")
            .for_order(order_id),
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reconcile::safety::SafetyLevel;

    fn ledger() -> OrderLedger {
        OrderLedger::new(60, PreTradeLimits::default())
    }

    fn samsung_buy() -> OrderRequest {
        OrderRequest::new("005930", "Samsung Electronics", Side::Buy, 10, 75_000.0)
    }

    #[test]
    fn create_then_duplicate() {
        let mut l = ledger();
        let safety = SafetyModeManager::new();
        let mut events = EventLog::new(100);

        let first = l.create_order(samsung_buy(), &safety, &mut events);
        assert_eq!(first.order.state, OrderState::Validated);
        assert!(first.message.contains("pass"));

        let second = l.create_order(samsung_buy(), &safety, &mut events);
        assert_eq!(second.order.state, OrderState::Blocked);
        assert!(second.message.contains("duplicate"));
        assert!(second.order.block_reason.unwrap().contains("duplicate"));
        assert_ne!(first.order.order_id, second.order.order_id);
    }

    #[test]
    fn rejection_releases_key() {
        let mut l = ledger();
        let mut events = EventLog::new(100);
        let mut safety = SafetyModeManager::new();
        safety.set_level(SafetyLevel::Safe, "test", &mut events);

        let blocked = l.create_order(samsung_buy(), &safety, &mut events);
        assert_eq!(blocked.order.state, OrderState::Blocked);
        assert!(!blocked.validation.unwrap().approved);

        safety.set_level(SafetyLevel::Normal, "test", &mut events);
        let retry = l.create_order(samsung_buy(), &safety, &mut events);
        assert_eq!(retry.order.state, OrderState::Validated);
    }

    #[test]
    fn lifecycle_and_trail() {
        let mut l = ledger();
        let safety = SafetyModeManager::new();
        let mut events = EventLog::new(100);
        let id = l.create_order(samsung_buy(), &safety, &mut events).order.order_id;

        assert!(l.place(&id, "KIS-1", &mut events));
        assert!(l.fill(&id, 4, 75_100.0, &mut events));
        assert!(!l.fill(&id, 7, 75_100.0, &mut events));
        assert!(l.fill(&id, 6, 75_200.0, &mut events));
        assert_eq!(l.get(&id).unwrap().state, OrderState::Filled);

        let trail: Vec<EventType> = events.get_order_trail(&id).iter().map(|e| e.event_type).collect();
        assert_eq!(
            trail,
            vec![
                EventType::OrderCreated,
                EventType::OrderValidated,
                EventType::OrderPlaced,
                EventType::OrderFilled,
                EventType::OrderAnomaly,
                EventType::OrderFilled,
            ]
        );
    }

    #[test]
    fn manual_block_frees_key() {
        let mut l = ledger();
        let safety = SafetyModeManager::new();
        let mut events = EventLog::new(100);
        let id = l.create_order(samsung_buy(), &safety, &mut events).order.order_id;
        assert!(l.block(&id, "user cancelled", &mut events));
        assert!(l.active_orders().is_empty());
        let again = l.create_order(samsung_buy(), &safety, &mut events);
        assert!(again.is_validated());
    }

    #[test]
    fn stats_count_states() {
        let mut l = ledger();
        let safety = SafetyModeManager::new();
        let mut events = EventLog::new(100);
        l.create_order(samsung_buy(), &safety, &mut events);
        l.create_order(samsung_buy(), &safety, &mut events);
        let stats = l.get_stats();
        assert_eq!(stats.total_orders, 2);
        assert_eq!(stats.today_orders, 2);
        assert_eq!(stats.blocked_orders, 1);
        assert_eq!(stats.active_orders, 1);
        assert_eq!(l.orders_today(Utc::now()), 1);
    }

    #[test]
    fn positions_follow_fills() {
        let mut l = ledger();
        let safety = SafetyModeManager::new();
        let mut events = EventLog::new(100);
        let buy = l.create_order(samsung_buy(), &safety, &mut events).order.order_id;
        l.place(&buy, "B1", &mut events);
        l.fill(&buy, 10, 70_000.0, &mut events);

        let sell_req = OrderRequest::new("005930", "Samsung Electronics", Side::Sell, 4, 72_000.0);
        let sell = l.create_order(sell_req, &safety, &mut events).order.order_id;
        l.place(&sell, "B2", &mut events);
        l.fill(&sell, 4, 72_000.0, &mut events);

        let pos = l.positions();
        assert_eq!(pos.len(), 1);
        assert_eq!(pos[0].quantity, 6);
        assert!((pos[0].avg_price - 70_000.0).abs() < 1e-9);
    }

    #[test]
    fn overflowing_fill_leaves_order_and_book_intact() {
        let mut l = ledger();
        let safety = SafetyModeManager::new();
        let mut events = EventLog::new(100);
        let id = l.create_order(samsung_buy(), &safety, &mut events).order.order_id;
        l.place(&id, "B1", &mut events);
        assert!(l.fill(&id, 5, 75_000.0, &mut events));
        assert!(!l.fill(&id, i64::MAX, 75_000.0, &mut events));

        let o = l.get(&id).unwrap();
        assert_eq!(o.filled_quantity, 5);
        assert_eq!(o.state, OrderState::Partial);
        assert_eq!(l.positions()[0].quantity, 5);
        assert_eq!(events.get_order_trail(&id).last().unwrap().event_type, EventType::OrderAnomaly);
    }

    #[test]
    fn position_math_saturates() {
        let mut pos = Position::new("005930", i64::MAX - 1, 75_000.0);
        apply_to_position(&mut pos, Side::Buy, 10, 75_000.0);
        assert_eq!(pos.quantity, i64::MAX);
        assert!(pos.avg_price.is_finite());

        let mut short = Position::new("005930", i64::MIN + 1, 75_000.0);
        apply_to_position(&mut short, Side::Sell, 10, 75_000.0);
        assert_eq!(short.quantity, i64::MIN);
    }

    #[test]
    fn unknown_order_is_anomaly() {
        let mut l = ledger();
        let mut events = EventLog::new(100);
        assert!(!l.place("nope", "B", &mut events));
        assert_eq!(events.count_by_type()[&EventType::OrderAnomaly], 1);
    }
}
