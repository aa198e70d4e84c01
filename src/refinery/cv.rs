use serde::Serialize;

use crate::logging::{log, obj, v_num, Domain, Level};

/// One fold: training indices (purged) and the contiguous test block.
pub type Fold = (Vec<usize>, Vec<usize>);

/// K-fold over a time-ordered index with a purge buffer on both sides of
/// every test block.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct PurgedKFoldCV {
    pub n_splits: usize,
    pub purge_gap: usize,
}

impl Default for PurgedKFoldCV {
    fn default() -> Self {
        Self { n_splits: 5, purge_gap: 5 }
    }
}

impl PurgedKFoldCV {
    pub fn new(n_splits: usize, purge_gap: usize) -> Self {
        Self { n_splits, purge_gap }
    }

    /// Each test block is `n_samples / n_splits` long; the last one takes the
    /// remainder. Returns no folds at all rather than a degenerate set.
    pub fn split(&self, n_samples: usize) -> Vec<Fold> {
        if self.n_splits < 2 || n_samples < self.n_splits.saturating_mul(3) {
            log(
                Level::Warn,
                Domain::Signal,
                "cv_insufficient_samples",
                obj(&[
                    ("n_samples", v_num(n_samples as f64)),
                    ("required", v_num(self.n_splits.max(2).saturating_mul(3) as f64)),
                ]),
            );
            return Vec::new();
        }

        let fold_size = n_samples / self.n_splits;
        let mut folds = Vec::with_capacity(self.n_splits);
        for i in 0..self.n_splits {
            let test_start = i * fold_size;
            let test_end = if i + 1 == self.n_splits { n_samples } else { test_start + fold_size };
            let purge_start = test_start.saturating_sub(self.purge_gap);
            let purge_end = test_end.saturating_add(self.purge_gap).min(n_samples);

            let train: Vec<usize> = (0..purge_start).chain(purge_end..n_samples).collect();
            if train.is_empty() {
                log(
                    Level::Warn,
                    Domain::Signal,
                    "cv_empty_train",
                    obj(&[("fold", v_num(i as f64)), ("purge_gap", v_num(self.purge_gap as f64))]),
                );
                return Vec::new();
            }
            folds.push((train, (test_start..test_end).collect()));
        }
        folds
    }
}
