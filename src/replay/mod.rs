//! Execution replay: live fills against backtest expectations.

pub mod engine;
pub mod stats;

pub use engine::{
    BacktestPrediction, ExecutionRecord, ReplayDashboard, ReplayEngine, ReplayRow, SlippageAnalysis, StrategyDrift,
};
