use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::logging::log_order_transition;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderState {
    Intent,
    Validated,
    Placed,
    Partial,
    Filled,
    Blocked,
}

impl OrderState {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderState::Intent => "intent",
            OrderState::Validated => "validated",
            OrderState::Placed => "placed",
            OrderState::Partial => "partial",
            OrderState::Filled => "filled",
            OrderState::Blocked => "blocked",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, OrderState::Filled | OrderState::Blocked)
    }
}

impl fmt::Display for OrderState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Buy => "buy",
            Side::Sell => "sell",
        }
    }

    /// +1 for buys, -1 for sells.
    pub fn sign(&self) -> f64 {
        match self {
            Side::Buy => 1.0,
            Side::Sell => -1.0,
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Side {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "buy" | "b" => Ok(Side::Buy),
            "sell" | "s" => Ok(Side::Sell),
            other => anyhow::bail!("unknown side: {}", other),
        }
    }
}

#[derive(Debug, Clone)]
pub enum OrderEvent {
    Validate,
    Place { broker_order_id: String },
    Fill { qty: i64, price: f64 },
    Block { reason: String },
}

impl OrderEvent {
    fn label(&self) -> &'static str {
        match self {
            OrderEvent::Validate => "validate",
            OrderEvent::Place { .. } => "place",
            OrderEvent::Fill { .. } => "fill",
            OrderEvent::Block { .. } => "block",
        }
    }
}

#[derive(Debug, Clone)]
pub struct TransitionError {
    pub msg: String,
}

impl fmt::Display for TransitionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.msg)
    }
}

/// One attempted transition; rejected attempts are recorded too.
#[derive(Debug, Clone, Serialize)]
pub struct Transition {
    pub event: &'static str,
    pub from: OrderState,
    pub to: OrderState,
    pub accepted: bool,
    pub note: String,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ManagedOrder {
    pub order_id: String,
    pub idempotency_key: String,
    pub ticker: String,
    pub name: String,
    pub side: Side,
    pub quantity: i64,
    pub price: f64,
    pub strategy: String,
    pub state: OrderState,
    pub filled_quantity: i64,
    pub avg_fill_price: f64,
    pub broker_order_id: Option<String>,
    pub block_reason: Option<String>,
    pub transitions: Vec<Transition>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ManagedOrder {
    pub fn new(
        order_id: &str,
        idempotency_key: &str,
        ticker: &str,
        name: &str,
        side: Side,
        quantity: i64,
        price: f64,
    ) -> Self {
        let now = Utc::now();
        Self {
            order_id: order_id.to_string(),
            idempotency_key: idempotency_key.to_string(),
            ticker: ticker.to_string(),
            name: name.to_string(),
            side,
            quantity,
            price,
            strategy: String::new(),
            state: OrderState::Intent,
            filled_quantity: 0,
            avg_fill_price: 0.0,
            broker_order_id: None,
            block_reason: None,
            transitions: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    pub fn remaining_quantity(&self) -> i64 {
        self.quantity - self.filled_quantity
    }

    pub fn validate(&mut self) -> bool {
        self.apply(OrderEvent::Validate)
    }

    pub fn place(&mut self, broker_order_id: &str) -> bool {
        self.apply(OrderEvent::Place { broker_order_id: broker_order_id.to_string() })
    }

    pub fn fill(&mut self, qty: i64, price: f64) -> bool {
        self.apply(OrderEvent::Fill { qty, price })
    }

    pub fn block(&mut self, reason: &str) -> bool {
        self.apply(OrderEvent::Block { reason: reason.to_string() })
    }

    /// Run one event through the state machine, recording the attempt.
    /// Invalid attempts leave the order untouched and return false.
    pub fn apply(&mut self, event: OrderEvent) -> bool {
        let label = event.label();
        let from = self.state;
        let outcome = apply_event(self, event);
        let now = Utc::now();
        let (accepted, note) = match outcome {
            Ok(()) => (true, String::new()),
            Err(e) => (false, e.msg),
        };
        self.transitions.push(Transition { event: label, from, to: self.state, accepted, note, at: now });
        if accepted {
            self.updated_at = now;
        }
        log_order_transition(&self.order_id, &self.ticker, from.as_str(), self.state.as_str(), accepted);
        accepted
    }

    pub fn last_rejection(&self) -> Option<&str> {
        self.transitions.iter().rev().find(|t| !t.accepted).map(|t| t.note.as_str())
    }

    pub fn to_dict(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

fn reject(msg: String) -> Result<(), TransitionError> {
    Err(TransitionError { msg })
}

pub fn apply_event(order: &mut ManagedOrder, event: OrderEvent) -> Result<(), TransitionError> {
    match (order.state, event) {
        (OrderState::Intent, OrderEvent::Validate) => {
            order.state = OrderState::Validated;
            Ok(())
        }
        (OrderState::Validated, OrderEvent::Place { broker_order_id }) => {
            order.broker_order_id = Some(broker_order_id);
            order.state = OrderState::Placed;
            Ok(())
        }
        (OrderState::Placed, OrderEvent::Fill { qty, price })
        | (OrderState::Partial, OrderEvent::Fill { qty, price }) => {
            if qty <= 0 {
                return reject(format!("fill quantity must be positive, got {}", qty));
            }
            if !(price > 0.0) {
                return reject(format!("fill price must be positive, got {}", price));
            }
            if qty > order.remaining_quantity() {
                return reject(format!(
                    "overfill: {} + {} exceeds order quantity {}",
                    order.filled_quantity, qty, order.quantity
                ));
            }
            let notional = order.avg_fill_price * order.filled_quantity as f64 + price * qty as f64;
            order.filled_quantity += qty;
            order.avg_fill_price = notional / order.filled_quantity as f64;
            order.state = if order.filled_quantity == order.quantity {
                OrderState::Filled
            } else {
                OrderState::Partial
            };
            Ok(())
        }
        (state, OrderEvent::Block { reason }) if !state.is_terminal() => {
            order.block_reason = Some(reason);
            order.state = OrderState::Blocked;
            Ok(())
        }
        (state, event) if state.is_terminal() => {
            reject(format!("order is {} (terminal); {} ignored", state, event.label()))
        }
        (state, event) => reject(format!("invalid lifecycle transition: {} on {}", event.label(), state)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn order(qty: i64) -> ManagedOrder {
        ManagedOrder::new("T-1", "k", "005930", "Samsung Electronics", Side::Buy, qty, 75_000.0)
    }

    #[test]
    fn happy_path_to_filled() {
        let mut o = order(10);
        assert_eq!(o.state, OrderState::Intent);
        assert!(o.validate());
        assert!(o.place("BROKER-001"));
        assert!(o.fill(10, 75_100.0));
        assert_eq!(o.state, OrderState::Filled);
        assert!(o.is_terminal());
        assert_eq!(o.transitions.len(), 3);
        assert_eq!(o.broker_order_id.as_deref(), Some("BROKER-001"));
    }

    #[test]
    fn huge_fill_after_partial_is_rejected() {
        let mut o = order(10);
        o.validate();
        o.place("BROKER-002");
        assert!(o.fill(5, 75_000.0));
        assert!(!o.fill(i64::MAX, 75_000.0));
        assert_eq!(o.filled_quantity, 5);
        assert_eq!(o.state, OrderState::Partial);
        assert!(o.last_rejection().unwrap().contains("overfill"));
        assert!(o.fill(5, 75_000.0));
        assert_eq!(o.state, OrderState::Filled);
    }

    #[test]
    fn fill_before_place_is_rejected_noop() {
        let mut o = order(10);
        assert!(!o.fill(10, 75_000.0));
        assert_eq!(o.state, OrderState::Intent);
        assert_eq!(o.filled_quantity, 0);
        assert_eq!(o.transitions.len(), 1);
        assert!(!o.transitions[0].accepted);
    }

    #[test]
    fn partial_then_filled_with_vwap() {
        let mut o = order(20);
        o.validate();
        o.place("B-004");
        assert!(o.fill(10, 75_100.0));
        assert_eq!(o.state, OrderState::Partial);
        assert_eq!(o.filled_quantity, 10);
        assert!(o.fill(10, 75_300.0));
        assert_eq!(o.state, OrderState::Filled);
        assert_eq!(o.filled_quantity, 20);
        assert!((o.avg_fill_price - 75_200.0).abs() < 1e-9);
    }

    #[test]
    fn overfill_rejected() {
        let mut o = order(10);
        o.validate();
        o.place("B");
        assert!(o.fill(6, 1.0));
        assert!(!o.fill(5, 1.0));
        assert_eq!(o.filled_quantity, 6);
        assert_eq!(o.state, OrderState::Partial);
        assert!(o.last_rejection().unwrap().contains("overfill"));
    }

    #[test]
    fn block_from_any_pre_terminal_state() {
        for steps in 0..4 {
            let mut o = order(10);
            if steps >= 1 {
                o.validate();
            }
            if steps >= 2 {
                o.place("B");
            }
            if steps >= 3 {
                o.fill(3, 1.0);
            }
            assert!(o.block("risk limit"));
            assert_eq!(o.state, OrderState::Blocked);
            assert_eq!(o.block_reason.as_deref(), Some("risk limit"));
        }
    }

    #[test]
    fn terminal_states_are_immutable() {
        let mut o = order(1);
        o.block("x");
        assert!(!o.validate());
        assert!(!o.block("y"));
        assert_eq!(o.block_reason.as_deref(), Some("x"));

        let mut f = order(1);
        f.validate();
        f.place("B");
        f.fill(1, 1.0);
        assert!(!f.block("late"));
        assert_eq!(f.state, OrderState::Filled);
    }

    #[test]
    fn to_dict_uses_lowercase_state() {
        let d = order(10).to_dict();
        assert_eq!(d["ticker"], "005930");
        assert_eq!(d["state"], "intent");
        assert_eq!(d["side"], "buy");
    }
}
