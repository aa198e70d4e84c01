use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;

use crate::orders::state_machine::Side;
use crate::replay::stats::{expected_max_sharpe, mean, normal_cdf, sharpe, skew_kurtosis};

/// One live fill compared against the price that triggered it.
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionRecord {
    pub trade_id: String,
    pub ticker: String,
    pub name: String,
    pub side: Side,
    pub strategy: String,
    pub signal_time: DateTime<Utc>,
    pub signal_price: f64,
    pub execution_time: DateTime<Utc>,
    pub execution_price: f64,
    pub quantity: i64,
    /// Realized return of the round trip, 0 while the position is open.
    pub pnl_pct: f64,
    pub commission: f64,
}

impl ExecutionRecord {
    /// `(execution - signal) / signal`; positive means we paid up.
    pub fn slippage_pct(&self) -> f64 {
        if self.signal_price > 0.0 && self.execution_price > 0.0 {
            (self.execution_price - self.signal_price) / self.signal_price
        } else {
            0.0
        }
    }

    /// Slippage signed so that positive is always a cost (buy higher, sell lower).
    pub fn cost_slippage_pct(&self) -> f64 {
        self.slippage_pct() * self.side.sign()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct BacktestPrediction {
    pub ticker: String,
    pub strategy: String,
    pub prediction_date: NaiveDate,
    pub predicted_return_pct: f64,
    pub predicted_win_prob: f64,
    pub confidence: f64,
    pub actual_return_pct: Option<f64>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct SlippageAnalysis {
    pub total_trades: usize,
    pub avg_slippage_pct: f64,
    pub avg_cost_slippage_pct: f64,
    pub max_slippage_pct: f64,
    pub total_slippage_cost: f64,
    pub by_strategy: BTreeMap<String, f64>,
    pub by_side: BTreeMap<String, f64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StrategyDrift {
    pub strategy: String,
    pub bt_sharpe: f64,
    pub live_sharpe: f64,
    pub bt_win_rate: f64,
    pub live_win_rate: f64,
    pub bt_avg_return: f64,
    pub live_avg_return: f64,
    /// 0..1, higher means live diverges more from the backtest.
    pub drift_score: f64,
    pub is_drifting: bool,
    pub recommendation: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReplayDashboard {
    pub timestamp: DateTime<Utc>,
    pub total_live_trades: usize,
    pub total_bt_predictions: usize,
    pub slippage: SlippageAnalysis,
    pub drift_results: Vec<StrategyDrift>,
    pub strategies_tested: usize,
    pub deflated_sharpe: f64,
    pub overall_bt_sharpe: f64,
    pub overall_live_sharpe: f64,
    pub accuracy_rate: f64,
    pub recommendations: Vec<String>,
}

/// Row shape mirrored into the durable `execution_replay` table.
#[derive(Debug, Clone, Serialize)]
pub struct ReplayRow {
    pub ticker: String,
    pub strategy: String,
    pub side: String,
    pub signal_price: f64,
    pub execution_price: f64,
    pub slippage_pct: f64,
    pub pnl_pct: f64,
    pub bt_predicted_return: Option<f64>,
    pub bt_win_prob: Option<f64>,
    pub direction_match: Option<bool>,
}

fn round_to(v: f64, places: i32) -> f64 {
    let f = 10f64.powi(places);
    (v * f).round() / f
}

/// Live executions versus backtest predictions.
#[derive(Debug)]
pub struct ReplayEngine {
    executions: Vec<ExecutionRecord>,
    predictions: Vec<BacktestPrediction>,
    pub drift_threshold: f64,
    pub sharpe_decay: f64,
}

impl ReplayEngine {
    pub fn new(drift_threshold: f64, sharpe_decay: f64) -> Self {
        Self { executions: Vec::new(), predictions: Vec::new(), drift_threshold, sharpe_decay }
    }

    pub fn add_execution(&mut self, record: ExecutionRecord) {
        self.executions.push(record);
    }

    pub fn add_prediction(&mut self, prediction: BacktestPrediction) {
        self.predictions.push(prediction);
    }

    pub fn executions(&self) -> &[ExecutionRecord] {
        &self.executions
    }

    pub fn predictions(&self) -> &[BacktestPrediction] {
        &self.predictions
    }

    /// Fill in the realized return for every open prediction matching
    /// `(ticker, strategy, date)`. Returns how many were updated.
    pub fn record_actual(&mut self, ticker: &str, strategy: &str, date: NaiveDate, actual_return_pct: f64) -> usize {
        let mut n = 0;
        for p in self
            .predictions
            .iter_mut()
            .filter(|p| p.ticker == ticker && p.strategy == strategy && p.prediction_date == date)
        {
            p.actual_return_pct = Some(actual_return_pct);
            n += 1;
        }
        n
    }

    pub fn analyze_slippage(&self) -> SlippageAnalysis {
        if self.executions.is_empty() {
            return SlippageAnalysis::default();
        }
        let raw: Vec<f64> = self.executions.iter().map(|e| e.slippage_pct()).collect();
        let cost: Vec<f64> = self.executions.iter().map(|e| e.cost_slippage_pct()).collect();

        let mut by_strategy: BTreeMap<String, Vec<f64>> = BTreeMap::new();
        let mut by_side: BTreeMap<String, Vec<f64>> = BTreeMap::new();
        for e in &self.executions {
            by_strategy.entry(e.strategy.clone()).or_default().push(e.cost_slippage_pct());
            by_side.entry(e.side.as_str().to_string()).or_default().push(e.cost_slippage_pct());
        }

        SlippageAnalysis {
            total_trades: self.executions.len(),
            avg_slippage_pct: mean(&raw),
            avg_cost_slippage_pct: mean(&cost),
            max_slippage_pct: raw.iter().map(|s| s.abs()).fold(0.0, f64::max),
            total_slippage_cost: self
                .executions
                .iter()
                .map(|e| e.slippage_pct().abs() * e.execution_price * e.quantity as f64)
                .sum(),
            by_strategy: by_strategy.into_iter().map(|(k, v)| (k, mean(&v))).collect(),
            by_side: by_side.into_iter().map(|(k, v)| (k, mean(&v))).collect(),
        }
    }

    /// Per-strategy comparison for every strategy seen on either side.
    pub fn drift_report(&self) -> Vec<StrategyDrift> {
        let strategies: BTreeSet<&str> = self
            .executions
            .iter()
            .map(|e| e.strategy.as_str())
            .chain(self.predictions.iter().map(|p| p.strategy.as_str()))
            .filter(|s| !s.is_empty())
            .collect();

        strategies.into_iter().map(|s| self.strategy_drift(s)).collect()
    }

    /// Only the strategies whose divergence crosses the configured threshold.
    pub fn analyze_drift(&self) -> Vec<StrategyDrift> {
        self.drift_report().into_iter().filter(|d| d.is_drifting).collect()
    }

    fn strategy_drift(&self, strategy: &str) -> StrategyDrift {
        let live: Vec<f64> = self
            .executions
            .iter()
            .filter(|e| e.strategy == strategy && e.pnl_pct != 0.0)
            .map(|e| e.pnl_pct)
            .collect();
        let preds: Vec<&BacktestPrediction> = self.predictions.iter().filter(|p| p.strategy == strategy).collect();
        let bt: Vec<f64> = preds
            .iter()
            .map(|p| p.predicted_return_pct)
            .filter(|r| *r != 0.0)
            .collect();

        let live_sharpe = sharpe(&live);
        let bt_sharpe = sharpe(&bt);
        let live_win_rate = if live.is_empty() {
            0.0
        } else {
            live.iter().filter(|r| **r > 0.0).count() as f64 / live.len() as f64
        };
        let win_probs: Vec<f64> = preds.iter().map(|p| p.predicted_win_prob).collect();
        let bt_win_rate = mean(&win_probs);
        let live_avg = mean(&live);
        let bt_avg = mean(&bt);

        let win_drift = (bt_win_rate - live_win_rate).abs();
        let return_drift = (bt_avg - live_avg).abs() / bt_avg.abs().max(0.01);
        let sharpe_drift = if bt_sharpe != 0.0 {
            (bt_sharpe - live_sharpe).abs() / bt_sharpe.abs().max(0.01)
        } else {
            0.0
        };
        let drift_score = ((win_drift + return_drift * 0.3 + sharpe_drift * 0.3) / 1.6).min(1.0);

        let is_drifting = drift_score > self.drift_threshold
            || (bt_sharpe > 0.0 && live_sharpe < bt_sharpe * (1.0 - self.sharpe_decay));

        let recommendation = if !is_drifting {
            format!("strategy {}: within expectations", strategy)
        } else if live_sharpe < 0.0 {
            format!("strategy {}: negative live performance, consider disabling", strategy)
        } else if drift_score > 0.6 {
            format!("strategy {}: severe divergence, re-optimize parameters", strategy)
        } else {
            format!("strategy {}: divergence detected, monitor closely", strategy)
        };

        StrategyDrift {
            strategy: strategy.to_string(),
            bt_sharpe: round_to(bt_sharpe, 3),
            live_sharpe: round_to(live_sharpe, 3),
            bt_win_rate: round_to(bt_win_rate, 3),
            live_win_rate: round_to(live_win_rate, 3),
            bt_avg_return: round_to(bt_avg, 4),
            live_avg_return: round_to(live_avg, 4),
            drift_score: round_to(drift_score, 3),
            is_drifting,
            recommendation,
        }
    }

    /// Share of resolved predictions whose sign matched the realized return.
    pub fn compute_accuracy(&self) -> f64 {
        let resolved: Vec<(f64, f64)> = self
            .predictions
            .iter()
            .filter_map(|p| p.actual_return_pct.map(|a| (p.predicted_return_pct, a)))
            .collect();
        if resolved.is_empty() {
            return 0.0;
        }
        let hits = resolved
            .iter()
            .filter(|(pred, act)| (*pred > 0.0 && *act > 0.0) || (*pred < 0.0 && *act < 0.0))
            .count();
        hits as f64 / resolved.len() as f64
    }

    /// Sharpe deflated for the number of variants tried.
    ///
    /// One trial passes through untouched. With more, a non-positive Sharpe
    /// is 0; otherwise the observed value is scaled by the probability that
    /// it beats the expected maximum of `n_trials` null draws, so the result
    /// stays in `[0, observed]` and never rises as `n_trials` grows.
    pub fn compute_deflated_sharpe(observed_sharpe: f64, n_trials: usize, trial_returns: Option<&[f64]>) -> f64 {
        if n_trials <= 1 {
            return observed_sharpe;
        }
        if !(observed_sharpe > 0.0) {
            return 0.0;
        }
        let e_max = expected_max_sharpe(n_trials);
        let var_sharpe = match trial_returns {
            Some(r) if r.len() > 3 => {
                let (skew, kurt) = skew_kurtosis(r);
                let s = observed_sharpe;
                (1.0 + 0.5 * s * s - skew * s + (kurt / 4.0) * s * s) / (r.len() - 1) as f64
            }
            _ => 1.0,
        };
        let std_sharpe = var_sharpe.max(1e-10).sqrt();
        let prob = normal_cdf((observed_sharpe - e_max) / std_sharpe);
        (observed_sharpe * prob).clamp(0.0, observed_sharpe)
    }

    /// The durable-store row for `record`, joined with its latest matching prediction.
    pub fn replay_row(&self, record: &ExecutionRecord) -> ReplayRow {
        let pred = self
            .predictions
            .iter()
            .filter(|p| p.ticker == record.ticker && p.strategy == record.strategy)
            .max_by_key(|p| p.prediction_date);
        let direction_match = pred.and_then(|p| {
            if record.pnl_pct == 0.0 || p.predicted_return_pct == 0.0 {
                None
            } else {
                Some((record.pnl_pct > 0.0) == (p.predicted_return_pct > 0.0))
            }
        });
        ReplayRow {
            ticker: record.ticker.clone(),
            strategy: record.strategy.clone(),
            side: record.side.as_str().to_string(),
            signal_price: record.signal_price,
            execution_price: record.execution_price,
            slippage_pct: record.slippage_pct(),
            pnl_pct: record.pnl_pct,
            bt_predicted_return: pred.map(|p| p.predicted_return_pct),
            bt_win_prob: pred.map(|p| p.predicted_win_prob),
            direction_match,
        }
    }

    pub fn create_dashboard(&self) -> ReplayDashboard {
        let slippage = self.analyze_slippage();
        let drift_results = self.drift_report();
        let accuracy = self.compute_accuracy();

        let live: Vec<f64> = self.executions.iter().map(|e| e.pnl_pct).filter(|r| *r != 0.0).collect();
        let bt: Vec<f64> = self
            .predictions
            .iter()
            .map(|p| p.predicted_return_pct)
            .filter(|r| *r != 0.0)
            .collect();
        let live_sharpe = sharpe(&live);
        let bt_sharpe = sharpe(&bt);

        let strategies_tested = self
            .executions
            .iter()
            .filter(|e| !e.strategy.is_empty())
            .map(|e| e.strategy.as_str())
            .collect::<BTreeSet<_>>()
            .len();
        let dsr = Self::compute_deflated_sharpe(live_sharpe, strategies_tested.max(1), Some(&live));

        let mut recommendations = Vec::new();
        if slippage.avg_cost_slippage_pct > 0.005 {
            recommendations.push(format!(
                "average slippage {:.2}%: shift more volume to limit orders",
                slippage.avg_cost_slippage_pct * 100.0
            ));
        }
        for d in drift_results.iter().filter(|d| d.is_drifting) {
            recommendations.push(d.recommendation.clone());
        }
        if dsr < 0.3 && strategies_tested > 2 {
            recommendations.push(format!(
                "deflated Sharpe {:.2} across {} strategies: overfitting risk",
                dsr, strategies_tested
            ));
        }
        if accuracy < 0.4 {
            recommendations.push(format!(
                "direction accuracy {:.0}%: review the signal model",
                accuracy * 100.0
            ));
        }

        ReplayDashboard {
            timestamp: Utc::now(),
            total_live_trades: self.executions.len(),
            total_bt_predictions: self.predictions.len(),
            slippage,
            drift_results,
            strategies_tested,
            deflated_sharpe: round_to(dsr, 4),
            overall_bt_sharpe: round_to(bt_sharpe, 3),
            overall_live_sharpe: round_to(live_sharpe, 3),
            accuracy_rate: round_to(accuracy, 3),
            recommendations,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn exec(strategy: &str, side: Side, signal: f64, fill: f64, pnl: f64) -> ExecutionRecord {
        let now = Utc::now();
        ExecutionRecord {
            trade_id: format!("T-{}-{}", strategy, fill),
            ticker: "005930".into(),
            name: "Samsung Electronics".into(),
            side,
            strategy: strategy.into(),
            signal_time: now,
            signal_price: signal,
            execution_time: now,
            execution_price: fill,
            quantity: 10,
            pnl_pct: pnl,
            commission: 0.0,
        }
    }

    fn pred(strategy: &str, ret: f64, win: f64, actual: Option<f64>) -> BacktestPrediction {
        BacktestPrediction {
            ticker: "005930".into(),
            strategy: strategy.into(),
            prediction_date: NaiveDate::from_ymd_opt(2025, 3, 3).unwrap(),
            predicted_return_pct: ret,
            predicted_win_prob: win,
            confidence: 0.5,
            actual_return_pct: actual,
        }
    }

    #[test]
    fn slippage_raw_and_cost() {
        let mut eng = ReplayEngine::new(0.3, 0.5);
        eng.add_execution(exec("A", Side::Buy, 100.0, 101.0, 0.0));
        eng.add_execution(exec("A", Side::Sell, 100.0, 99.0, 0.0));
        let s = eng.analyze_slippage();
        assert_eq!(s.total_trades, 2);
        assert!(s.avg_slippage_pct.abs() < 1e-12);
        assert!((s.avg_cost_slippage_pct - 0.01).abs() < 1e-12);
        assert!((s.max_slippage_pct - 0.01).abs() < 1e-12);
        assert!((s.total_slippage_cost - (0.01 * 101.0 * 10.0 + 0.01 * 99.0 * 10.0)).abs() < 1e-9);
        assert!((s.by_side["sell"] - 0.01).abs() < 1e-12);
    }

    #[test]
    fn accuracy_counts_resolved_only() {
        let mut eng = ReplayEngine::new(0.3, 0.5);
        eng.add_prediction(pred("A", 0.02, 0.6, Some(0.01)));
        eng.add_prediction(pred("A", -0.02, 0.6, Some(0.01)));
        eng.add_prediction(pred("A", 0.02, 0.6, None));
        assert!((eng.compute_accuracy() - 0.5).abs() < 1e-12);
        assert_eq!(ReplayEngine::new(0.3, 0.5).compute_accuracy(), 0.0);
    }

    #[test]
    fn recorded_actuals_feed_accuracy() {
        let mut eng = ReplayEngine::new(0.3, 0.5);
        let day = NaiveDate::from_ymd_opt(2025, 3, 3).unwrap();
        eng.add_prediction(pred("A", 0.02, 0.6, None));
        eng.add_prediction(pred("B", -0.01, 0.4, None));
        let mut other_day = pred("A", 0.03, 0.7, None);
        other_day.prediction_date = NaiveDate::from_ymd_opt(2025, 3, 4).unwrap();
        eng.add_prediction(other_day);
        assert_eq!(eng.compute_accuracy(), 0.0);

        assert_eq!(eng.record_actual("005930", "A", day, 0.015), 1);
        assert_eq!(eng.record_actual("000660", "A", day, 0.015), 0);
        assert!((eng.compute_accuracy() - 1.0).abs() < 1e-12);

        assert_eq!(eng.record_actual("005930", "B", day, 0.02), 1);
        assert!((eng.compute_accuracy() - 0.5).abs() < 1e-12);
        assert_eq!(eng.predictions().iter().filter(|p| p.actual_return_pct.is_some()).count(), 2);

        let dash = eng.create_dashboard();
        assert!((dash.accuracy_rate - 0.5).abs() < 1e-12);
        assert!(!dash.recommendations.iter().any(|r| r.contains("accuracy")));

        // a later miss drops accuracy below the review line
        eng.record_actual("005930", "A", day, -0.02);
        assert_eq!(eng.compute_accuracy(), 0.0);
        assert!(eng.create_dashboard().recommendations.iter().any(|r| r.contains("accuracy")));
    }

    #[test]
    fn deflated_sharpe_properties() {
        for s in [-1.5, -0.1, 0.0, 0.3, 2.5] {
            assert_eq!(ReplayEngine::compute_deflated_sharpe(s, 1, None), s);
        }
        for n in 2..20 {
            assert_eq!(ReplayEngine::compute_deflated_sharpe(0.0, n, None), 0.0);
            assert_eq!(ReplayEngine::compute_deflated_sharpe(-0.7, n, None), 0.0);
            let d = ReplayEngine::compute_deflated_sharpe(1.2, n, None);
            assert!(d >= 0.0 && d <= 1.2);
            let next = ReplayEngine::compute_deflated_sharpe(1.2, n + 1, None);
            assert!(next <= d);
        }
    }

    #[test]
    fn drift_flags_collapsed_strategy() {
        let mut eng = ReplayEngine::new(0.3, 0.5);
        for r in [0.02, 0.03, 0.025, 0.018] {
            eng.add_prediction(pred("B", r, 0.7, None));
        }
        for pnl in [-0.02, -0.01, 0.005, -0.03] {
            eng.add_execution(exec("B", Side::Buy, 100.0, 100.0, pnl));
        }
        for pnl in [0.02, 0.025] {
            eng.add_execution(exec("C", Side::Buy, 100.0, 100.0, pnl));
            eng.add_prediction(pred("C", pnl, 1.0, None));
        }
        let all = eng.drift_report();
        assert_eq!(all.len(), 2);
        let drifting = eng.analyze_drift();
        assert_eq!(drifting.len(), 1);
        assert_eq!(drifting[0].strategy, "B");
        assert!(drifting[0].recommendation.contains("negative"));
    }

    #[test]
    fn dashboard_bundles_everything() {
        let mut eng = ReplayEngine::new(0.3, 0.5);
        eng.add_execution(exec("A", Side::Buy, 100.0, 102.0, 0.01));
        eng.add_prediction(pred("A", 0.02, 0.6, Some(-0.01)));
        let d = eng.create_dashboard();
        assert_eq!(d.total_live_trades, 1);
        assert_eq!(d.total_bt_predictions, 1);
        assert_eq!(d.strategies_tested, 1);
        assert!(d.recommendations.iter().any(|r| r.contains("slippage")));
        assert!(d.recommendations.iter().any(|r| r.contains("accuracy")));

        let row = eng.replay_row(&eng.executions()[0]);
        assert_eq!(row.bt_predicted_return, Some(0.02));
        assert_eq!(row.direction_match, Some(true));
    }
}
