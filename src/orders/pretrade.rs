use serde::Serialize;

use crate::logging::log_risk_check;
use crate::orders::state_machine::Side;
use crate::reconcile::safety::{SafetyLevel, SafetyModeManager};

/// A trading decision before it becomes a managed order.
#[derive(Debug, Clone)]
pub struct OrderRequest {
    pub ticker: String,
    pub name: String,
    pub side: Side,
    pub quantity: i64,
    pub price: f64,
    /// Total account evaluation, when known, for the per-order size cap.
    pub total_eval: Option<f64>,
    /// Strategy that produced the decision; tags fills in execution replay.
    pub strategy: String,
}

impl OrderRequest {
    pub fn new(ticker: &str, name: &str, side: Side, quantity: i64, price: f64) -> Self {
        Self {
            ticker: ticker.to_string(),
            name: name.to_string(),
            side,
            quantity,
            price,
            total_eval: None,
            strategy: String::new(),
        }
    }

    pub fn with_total_eval(mut self, total_eval: f64) -> Self {
        self.total_eval = Some(total_eval);
        self
    }

    pub fn with_strategy(mut self, strategy: &str) -> Self {
        self.strategy = strategy.to_string();
        self
    }

    pub fn notional(&self) -> f64 {
        self.quantity as f64 * self.price
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ValidationResult {
    pub approved: bool,
    pub reasons: Vec<String>,
    pub warnings: Vec<String>,
}

impl ValidationResult {
    pub fn summary(&self) -> String {
        if self.approved {
            "pre-trade checks passed".to_string()
        } else {
            self.reasons.join("; ")
        }
    }
}

#[derive(Debug, Clone)]
pub struct PreTradeLimits {
    pub max_order_pct: f64,
    pub max_daily_orders: u32,
}

impl Default for PreTradeLimits {
    fn default() -> Self {
        Self { max_order_pct: 0.30, max_daily_orders: 50 }
    }
}

#[derive(Debug, Clone, Default)]
pub struct PreTradeValidator {
    pub limits: PreTradeLimits,
}

impl PreTradeValidator {
    pub fn new(limits: PreTradeLimits) -> Self {
        Self { limits }
    }

    /// Reads the kill switch and safety level from `safety` on every call.
    /// A live kill switch short-circuits every other check.
    pub fn validate(&self, req: &OrderRequest, safety: &SafetyModeManager, orders_today: u32) -> ValidationResult {
        let ks = safety.kill_switch();
        if ks.is_active() {
            log_risk_check("kill_switch", "reject", 1.0, 0.0);
            return ValidationResult {
                approved: false,
                reasons: vec![format!("kill switch active: {}", ks.reason())],
                warnings: Vec::new(),
            };
        }

        let mut reasons = Vec::new();
        let mut warnings = Vec::new();

        if req.quantity <= 0 {
            reasons.push(format!("quantity must be positive, got {}", req.quantity));
        }
        if !(req.price > 0.0) {
            reasons.push(format!("price must be positive, got {}", req.price));
        }

        let level = safety.level();
        match req.side {
            Side::Buy if !level.is_buy_allowed() => {
                reasons.push(format!("buying disabled at safety level {}", level));
            }
            Side::Sell if !level.is_sell_allowed() => {
                reasons.push(format!("selling disabled at safety level {}", level));
            }
            _ => {}
        }
        if level == SafetyLevel::Caution {
            warnings.push("safety level caution: review before placing".to_string());
        }

        if let Some(total_eval) = req.total_eval.filter(|t| *t > 0.0) {
            let pct = req.notional() / total_eval;
            if pct > self.limits.max_order_pct {
                log_risk_check("max_order_pct", "reject", pct, self.limits.max_order_pct);
                reasons.push(format!(
                    "order value {:.1}% of account exceeds {:.1}% cap",
                    pct * 100.0,
                    self.limits.max_order_pct * 100.0
                ));
            }
        }

        if orders_today >= self.limits.max_daily_orders {
            log_risk_check(
                "max_daily_orders",
                "reject",
                orders_today as f64,
                self.limits.max_daily_orders as f64,
            );
            reasons.push(format!("daily order limit reached ({})", self.limits.max_daily_orders));
        }

        ValidationResult { approved: reasons.is_empty(), reasons, warnings }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventLog;

    fn buy(qty: i64) -> OrderRequest {
        OrderRequest::new("005930", "Samsung Electronics", Side::Buy, qty, 75_000.0)
    }

    #[test]
    fn clean_order_passes() {
        let v = PreTradeValidator::default();
        let r = v.validate(&buy(10).with_total_eval(100_000_000.0), &SafetyModeManager::new(), 0);
        assert!(r.approved, "{:?}", r.reasons);
    }

    #[test]
    fn kill_switch_reported_first() {
        let mut events = EventLog::new(10);
        let mut safety = SafetyModeManager::new();
        safety.set_level(SafetyLevel::Lockdown, "drill", &mut events);
        let r = PreTradeValidator::default().validate(&buy(0), &safety, 0);
        assert!(!r.approved);
        assert_eq!(r.reasons.len(), 1);
        assert!(r.reasons[0].contains("kill switch"));
    }

    #[test]
    fn zero_and_negative_quantity_rejected() {
        let v = PreTradeValidator::default();
        let safety = SafetyModeManager::new();
        assert!(!v.validate(&buy(0), &safety, 0).approved);
        assert!(!v.validate(&buy(-5), &safety, 0).approved);
    }

    #[test]
    fn safe_level_blocks_buys_not_sells() {
        let mut events = EventLog::new(10);
        let mut safety = SafetyModeManager::new();
        safety.set_level(SafetyLevel::Safe, "mismatch", &mut events);
        let v = PreTradeValidator::default();
        assert!(!v.validate(&buy(1), &safety, 0).approved);
        let sell = OrderRequest::new("005930", "", Side::Sell, 1, 75_000.0);
        assert!(v.validate(&sell, &safety, 0).approved);
    }

    #[test]
    fn size_cap_and_daily_limit() {
        let v = PreTradeValidator::new(PreTradeLimits { max_order_pct: 0.1, max_daily_orders: 3 });
        let safety = SafetyModeManager::new();
        let big = buy(100).with_total_eval(10_000_000.0);
        let r = v.validate(&big, &safety, 0);
        assert!(!r.approved);
        assert!(r.reasons[0].contains("cap"));
        let r = v.validate(&buy(1), &safety, 3);
        assert!(r.reasons.iter().any(|x| x.contains("daily")));
    }
}
