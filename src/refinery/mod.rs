//! Signal refinery: collapse correlated signals and split time series
//! for leakage-free validation.

pub mod catalog;
pub mod correlation;
pub mod cv;
pub mod pruner;

pub use catalog::{get_signal_catalog, SignalCategory, SignalMeta, SIGNAL_CATALOG};
pub use correlation::{pearson, SignalCorrelationMatrix};
pub use cv::{Fold, PurgedKFoldCV};
pub use pruner::{variance_score, CorrelationCluster, RefineryReport, SignalPruner, SignalQuality};
