//! Correctness and safety layer for an automated trading assistant:
//! point-in-time data tagging, gated order lifecycle, position
//! reconciliation with a kill switch, execution replay and signal pruning.

pub mod config;
pub mod events;
pub mod guard;
pub mod logging;
pub mod orders;
pub mod pit;
pub mod reconcile;
pub mod refinery;
pub mod replay;
pub mod report;
pub mod runtime;
pub mod storage;
