//! Position reconciliation and the safety gate it drives.

pub mod positions;
pub mod safety;
pub mod source;

pub use positions::{
    Mismatch, MismatchSeverity, MismatchType, Position, PositionReconciler, ReconStatus, ReconciliationReport,
};
pub use safety::{Activator, KillSwitch, LevelChange, SafetyLevel, SafetyModeManager, SafetyStatus};
pub use source::{fetch_with_timeout, BrokerSnapshot, JsonFileSource, PositionSource, StaticSource};
