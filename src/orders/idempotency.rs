use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use sha2::{Digest, Sha256};

use crate::orders::state_machine::Side;

/// Outcome of [`IdempotencyGuard::check_and_register`].
#[derive(Debug, Clone, PartialEq)]
pub enum KeyCheck {
    Registered,
    Duplicate { age_secs: f64 },
}

impl KeyCheck {
    pub fn is_allowed(&self) -> bool {
        matches!(self, KeyCheck::Registered)
    }

    pub fn message(&self) -> String {
        match self {
            KeyCheck::Registered => "idempotency check passed".to_string(),
            KeyCheck::Duplicate { age_secs } => {
                format!("duplicate order: identical intent submitted {:.1}s ago", age_secs)
            }
        }
    }
}

/// Blocks re-submission of the same logical order inside a time window.
///
/// Expiry is lazy: stale keys are only dropped when they are looked up
/// (or by `purge_expired`). `check_and_register` takes `&mut self` and has
/// no suspension point, so two submissions of one key can never both pass.
#[derive(Debug)]
pub struct IdempotencyGuard {
    window: Duration,
    registered: HashMap<String, DateTime<Utc>>,
}

impl IdempotencyGuard {
    pub fn new(window_seconds: i64) -> Self {
        let window = Duration::try_seconds(window_seconds.max(0)).unwrap_or(Duration::MAX);
        Self { window, registered: HashMap::new() }
    }

    /// Deterministic fingerprint of an order's intent.
    pub fn generate_key(ticker: &str, side: Side, quantity: i64) -> String {
        let mut hasher = Sha256::new();
        hasher.update(format!("{}|{}|{}", ticker, side.as_str(), quantity).as_bytes());
        let digest = hex::encode(hasher.finalize());
        digest[..16].to_string()
    }

    pub fn check_and_register(&mut self, key: &str) -> KeyCheck {
        self.check_and_register_at(key, Utc::now())
    }

    pub fn check_and_register_at(&mut self, key: &str, now: DateTime<Utc>) -> KeyCheck {
        if let Some(registered_at) = self.registered.get(key) {
            let age = now - *registered_at;
            if age < self.window {
                return KeyCheck::Duplicate { age_secs: age.num_milliseconds() as f64 / 1000.0 };
            }
        }
        self.registered.insert(key.to_string(), now);
        KeyCheck::Registered
    }

    /// Forget a key early, e.g. when its order was blocked.
    pub fn release(&mut self, key: &str) -> bool {
        self.registered.remove(key).is_some()
    }

    pub fn purge_expired(&mut self, now: DateTime<Utc>) -> usize {
        let before = self.registered.len();
        let window = self.window;
        self.registered.retain(|_, at| now - *at < window);
        before - self.registered.len()
    }

    pub fn active_keys(&self) -> usize {
        self.registered.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn oversized_window_is_clamped() {
        let mut guard = IdempotencyGuard::new(i64::MAX);
        let key = IdempotencyGuard::generate_key("005930", Side::Sell, 1);
        let t0 = Utc::now();
        assert!(guard.check_and_register_at(&key, t0).is_allowed());
        assert!(!guard.check_and_register_at(&key, t0 + Duration::days(3650)).is_allowed());
        assert_eq!(guard.purge_expired(t0 + Duration::days(3650)), 0);
    }

    #[test]
    fn same_key_twice_is_duplicate() {
        let mut guard = IdempotencyGuard::new(5);
        let key = IdempotencyGuard::generate_key("005930", Side::Buy, 10);
        assert!(guard.check_and_register(&key).is_allowed());
        let second = guard.check_and_register(&key);
        assert!(!second.is_allowed());
        assert!(second.message().contains("duplicate"));
    }

    #[test]
    fn side_changes_key() {
        let k1 = IdempotencyGuard::generate_key("005930", Side::Buy, 10);
        let k2 = IdempotencyGuard::generate_key("005930", Side::Sell, 10);
        assert_ne!(k1, k2);
        assert_eq!(k1, IdempotencyGuard::generate_key("005930", Side::Buy, 10));
        assert_eq!(k1.len(), 16);
    }

    #[test]
    fn release_allows_resubmission() {
        let mut guard = IdempotencyGuard::new(5);
        let key = IdempotencyGuard::generate_key("005930", Side::Buy, 10);
        guard.check_and_register(&key);
        assert!(guard.release(&key));
        assert!(guard.check_and_register(&key).is_allowed());
    }

    #[test]
    fn ttl_expires_lazily() {
        let mut guard = IdempotencyGuard::new(5);
        let t0 = Utc::now();
        assert!(guard.check_and_register_at("k", t0).is_allowed());
        assert!(!guard.check_and_register_at("k", t0 + Duration::seconds(4)).is_allowed());
        assert!(guard.check_and_register_at("k", t0 + Duration::seconds(5)).is_allowed());
        // re-registration restarts the window
        assert!(!guard.check_and_register_at("k", t0 + Duration::seconds(6)).is_allowed());
    }

    #[test]
    fn purge_drops_only_expired() {
        let mut guard = IdempotencyGuard::new(10);
        let t0 = Utc::now();
        guard.check_and_register_at("old", t0);
        guard.check_and_register_at("new", t0 + Duration::seconds(8));
        assert_eq!(guard.purge_expired(t0 + Duration::seconds(12)), 1);
        assert_eq!(guard.active_keys(), 1);
    }
}
