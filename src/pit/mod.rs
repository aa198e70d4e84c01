//! Point-in-time tagging: when a value happened, when we saw it, where it
//! came from, and whether a decision at time T could legitimately use it.

pub mod asof;
pub mod datapoint;
pub mod registry;
pub mod validator;

pub use asof::{AsOfJoinEngine, PitRow};
pub use datapoint::{DataPoint, DataSourceType, DEFAULT_STALE_SECS};
pub use registry::{SourceRegistry, SourceStats, SourceSummary};
pub use validator::{PitValidator, PitViolation, ViolationKind, ViolationSeverity};
