use std::str::FromStr;

#[derive(Debug, Clone)]
pub struct Config {
    pub sqlite_path: String,
    pub event_log_max: usize,
    /// DataPoint freshness threshold.
    pub stale_secs: f64,
    /// Batch-level stale warning threshold used by the PIT validator.
    pub pit_stale_secs: f64,
    pub idempotency_window_secs: i64,
    /// Max single-order value as a fraction of total account evaluation.
    pub max_order_pct: f64,
    pub max_daily_orders: u32,
    pub price_diff_pct: f64,
    pub reconcile_secs: u64,
    pub broker_timeout_ms: u64,
    pub drift_threshold: f64,
    /// Live Sharpe below `backtest * (1 - sharpe_decay)` counts as drift.
    pub sharpe_decay: f64,
    pub corr_threshold: f64,
    pub cv_splits: usize,
    pub purge_gap: usize,
    pub feed_channel_capacity: usize,
    pub broker_snapshot_path: Option<String>,
    pub holdings_path: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            sqlite_path: "./tradeguard.sqlite".to_string(),
            event_log_max: 5000,
            stale_secs: 300.0,
            pit_stale_secs: 600.0,
            idempotency_window_secs: 60,
            max_order_pct: 0.30,
            max_daily_orders: 50,
            price_diff_pct: 0.05,
            reconcile_secs: 300,
            broker_timeout_ms: 5000,
            drift_threshold: 0.30,
            sharpe_decay: 0.50,
            corr_threshold: 0.70,
            cv_splits: 5,
            purge_gap: 5,
            feed_channel_capacity: 256,
            broker_snapshot_path: None,
            holdings_path: None,
        }
    }
}

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

impl Config {
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            sqlite_path: std::env::var("SQLITE_PATH").unwrap_or(d.sqlite_path),
            event_log_max: env_or("EVENT_LOG_MAX", d.event_log_max),
            stale_secs: env_or("STALE_SECS", d.stale_secs),
            pit_stale_secs: env_or("PIT_STALE_SECS", d.pit_stale_secs),
            idempotency_window_secs: env_or("IDEMPOTENCY_WINDOW_SECS", d.idempotency_window_secs),
            max_order_pct: env_or("MAX_ORDER_PCT", d.max_order_pct),
            max_daily_orders: env_or("MAX_DAILY_ORDERS", d.max_daily_orders),
            price_diff_pct: env_or("PRICE_DIFF_PCT", d.price_diff_pct),
            reconcile_secs: env_or("RECONCILE_SECS", d.reconcile_secs),
            broker_timeout_ms: env_or("BROKER_TIMEOUT_MS", d.broker_timeout_ms),
            drift_threshold: env_or("DRIFT_THRESHOLD", d.drift_threshold),
            sharpe_decay: env_or("SHARPE_DECAY", d.sharpe_decay),
            corr_threshold: env_or("CORR_THRESHOLD", d.corr_threshold),
            cv_splits: env_or("CV_SPLITS", d.cv_splits),
            purge_gap: env_or("PURGE_GAP", d.purge_gap),
            feed_channel_capacity: env_or("FEED_CHANNEL_CAP", d.feed_channel_capacity),
            broker_snapshot_path: std::env::var("BROKER_SNAPSHOT_PATH").ok(),
            holdings_path: std::env::var("HOLDINGS_PATH").ok(),
        }
    }
}
