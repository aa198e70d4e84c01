use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::logging::{log, obj, v_num, Domain, Level};
use crate::refinery::correlation::SignalCorrelationMatrix;
use crate::replay::stats::sample_std;

#[derive(Debug, Clone, Serialize)]
pub struct SignalQuality {
    pub name: String,
    pub score: f64,
    pub is_selected: bool,
}

/// A connected group of signals linked by `|r| >= threshold`.
#[derive(Debug, Clone, Serialize)]
pub struct CorrelationCluster {
    pub cluster_id: usize,
    pub signals: Vec<String>,
    pub avg_correlation: f64,
    pub representative: String,
    pub removed: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RefineryReport {
    pub timestamp: DateTime<Utc>,
    pub total_signals: usize,
    pub selected_signals: usize,
    pub removed_signals: usize,
    /// Highest score first.
    pub quality_scores: Vec<SignalQuality>,
    pub clusters: Vec<CorrelationCluster>,
    pub threshold: f64,
    pub recommendations: Vec<String>,
}

impl RefineryReport {
    fn empty(threshold: f64) -> Self {
        Self {
            timestamp: Utc::now(),
            total_signals: 0,
            selected_signals: 0,
            removed_signals: 0,
            quality_scores: Vec::new(),
            clusters: Vec::new(),
            threshold,
            recommendations: Vec::new(),
        }
    }

    /// Surviving signal names, sorted; the feature list for a trainer.
    pub fn selected_names(&self) -> Vec<String> {
        let mut names: Vec<String> =
            self.quality_scores.iter().filter(|q| q.is_selected).map(|q| q.name.clone()).collect();
        names.sort();
        names
    }
}

/// Fallback quality when no score map is supplied: spread times the share
/// of non-zero observations, capped at 100.
pub fn variance_score(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let nonzero = values.iter().filter(|v| **v != 0.0).count() as f64 / values.len() as f64;
    (sample_std(values) * 10.0 * nonzero).min(100.0)
}

struct UnionFind {
    parent: Vec<usize>,
}

impl UnionFind {
    fn new(n: usize) -> Self {
        Self { parent: (0..n).collect() }
    }

    fn find(&mut self, mut x: usize) -> usize {
        while self.parent[x] != x {
            self.parent[x] = self.parent[self.parent[x]];
            x = self.parent[x];
        }
        x
    }

    fn union(&mut self, a: usize, b: usize) {
        let (ra, rb) = (self.find(a), self.find(b));
        if ra != rb {
            self.parent[ra] = rb;
        }
    }
}

#[derive(Debug, Clone)]
pub struct SignalPruner {
    pub threshold: f64,
}

impl SignalPruner {
    pub fn new(threshold: f64) -> Self {
        Self { threshold }
    }

    /// Collapse each correlation cluster to its best signal, then trim to
    /// `target_count` by dropping the weakest survivors. Ties go to the
    /// lexicographically smaller name.
    pub fn prune(
        &self,
        signals: &BTreeMap<String, Vec<f64>>,
        quality_map: Option<&BTreeMap<String, f64>>,
        target_count: Option<usize>,
    ) -> RefineryReport {
        if signals.is_empty() {
            return RefineryReport::empty(self.threshold);
        }

        let names: Vec<&String> = signals.keys().collect();
        let index: BTreeMap<&str, usize> = names.iter().enumerate().map(|(i, n)| (n.as_str(), i)).collect();
        let matrix = SignalCorrelationMatrix::compute(signals);
        let high = matrix.find_high_correlation_pairs(self.threshold);

        let quality: BTreeMap<&str, f64> = names
            .iter()
            .map(|n| {
                let q = match quality_map {
                    Some(m) => m.get(n.as_str()).copied().unwrap_or(0.0),
                    None => variance_score(&signals[*n]),
                };
                (n.as_str(), q)
            })
            .collect();
        // best first: higher quality, then smaller name
        let rank = |a: &&str, b: &&str| quality[b].total_cmp(&quality[a]).then_with(|| a.cmp(b));

        let mut uf = UnionFind::new(names.len());
        for (a, b, _) in &high {
            uf.union(index[a.as_str()], index[b.as_str()]);
        }
        let mut groups: BTreeMap<usize, Vec<&str>> = BTreeMap::new();
        for (i, n) in names.iter().enumerate() {
            groups.entry(uf.find(i)).or_default().push(n.as_str());
        }
        let mut groups: Vec<Vec<&str>> = groups.into_values().collect();
        groups.sort_by(|a, b| b.len().cmp(&a.len()).then_with(|| a[0].cmp(b[0])));

        let mut selected: BTreeSet<&str> = BTreeSet::new();
        let mut clusters = Vec::new();
        for members in groups {
            if members.len() == 1 {
                selected.insert(members[0]);
                continue;
            }
            let mut ranked = members.clone();
            ranked.sort_by(rank);
            let representative = ranked[0];
            selected.insert(representative);

            let mut corr = Vec::new();
            for (i, a) in members.iter().enumerate() {
                for b in &members[i + 1..] {
                    if let Some(r) = matrix.get(a, b) {
                        corr.push(r.abs());
                    }
                }
            }
            let avg = if corr.is_empty() { 0.0 } else { corr.iter().sum::<f64>() / corr.len() as f64 };

            clusters.push(CorrelationCluster {
                cluster_id: clusters.len(),
                signals: members.iter().map(|s| s.to_string()).collect(),
                avg_correlation: (avg * 1000.0).round() / 1000.0,
                representative: representative.to_string(),
                removed: ranked[1..].iter().map(|s| s.to_string()).collect(),
            });
        }

        if let Some(target) = target_count {
            if selected.len() > target {
                let mut survivors: Vec<&str> = selected.iter().copied().collect();
                survivors.sort_by(rank);
                for weak in &survivors[target..] {
                    selected.remove(weak);
                }
            }
        }

        let mut quality_scores: Vec<SignalQuality> = names
            .iter()
            .map(|n| SignalQuality {
                name: n.to_string(),
                score: (quality[n.as_str()] * 100.0).round() / 100.0,
                is_selected: selected.contains(n.as_str()),
            })
            .collect();
        quality_scores.sort_by(|a, b| b.score.total_cmp(&a.score).then_with(|| a.name.cmp(&b.name)));

        let total = names.len();
        let removed = total - selected.len();
        let mut recommendations = Vec::new();
        if removed > 0 {
            recommendations.push(format!(
                "refined {} signals down to {} (|r| >= {:.2})",
                total,
                selected.len(),
                self.threshold
            ));
        }
        for c in clusters.iter().filter(|c| c.signals.len() > 2).take(3) {
            recommendations.push(format!(
                "cluster {}: {} (avg |r| {:.2}), keep {}",
                c.cluster_id,
                c.signals.iter().take(3).cloned().collect::<Vec<_>>().join(", "),
                c.avg_correlation,
                c.representative
            ));
        }

        log(
            Level::Info,
            Domain::Signal,
            "signals_refined",
            obj(&[
                ("total", v_num(total as f64)),
                ("selected", v_num(selected.len() as f64)),
                ("clusters", v_num(clusters.len() as f64)),
                ("threshold", v_num(self.threshold)),
            ]),
        );

        RefineryReport {
            timestamp: Utc::now(),
            total_signals: total,
            selected_signals: selected.len(),
            removed_signals: removed,
            quality_scores,
            clusters,
            threshold: self.threshold,
            recommendations,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn noise(rng: &mut StdRng, n: usize) -> Vec<f64> {
        (0..n).map(|_| rng.gen_range(-1.0..1.0)).collect()
    }

    #[test]
    fn bridge_signal_joins_cluster() {
        let mut rng = StdRng::seed_from_u64(7);
        let base: Vec<f64> = (0..200).map(|i| i as f64).collect();
        let a = base.clone();
        // b is a noisy copy of a, c a noisier copy of b
        let b: Vec<f64> = a.iter().map(|v| v + rng.gen_range(-40.0..40.0)).collect();
        let c: Vec<f64> = b.iter().map(|v| v + rng.gen_range(-60.0..60.0)).collect();
        let d = noise(&mut rng, 200);

        let mut signals = BTreeMap::new();
        signals.insert("a".to_string(), a);
        signals.insert("b".to_string(), b);
        signals.insert("c".to_string(), c);
        signals.insert("d".to_string(), d);

        let m = SignalCorrelationMatrix::compute(&signals);
        let threshold = m.get("a", "b").unwrap().min(m.get("b", "c").unwrap()) - 1e-9;
        // a and c are only linked through b
        assert!(m.get("a", "c").unwrap() < threshold);

        let mut quality = BTreeMap::new();
        quality.insert("a".to_string(), 1.0);
        quality.insert("b".to_string(), 5.0);
        quality.insert("c".to_string(), 2.0);
        quality.insert("d".to_string(), 0.1);

        let report = SignalPruner::new(threshold).prune(&signals, Some(&quality), None);
        assert_eq!(report.total_signals, 4);
        assert_eq!(report.selected_signals, 2);
        assert_eq!(report.removed_signals, 2);
        assert_eq!(report.selected_names(), vec!["b".to_string(), "d".to_string()]);
        assert_eq!(report.clusters.len(), 1);
        assert_eq!(report.clusters[0].representative, "b");
    }

    #[test]
    fn independent_signals_all_survive_then_trim() {
        let mut rng = StdRng::seed_from_u64(42);
        let mut signals = BTreeMap::new();
        for i in 0..6 {
            let scale = (i + 1) as f64;
            signals.insert(format!("s{}", i), noise(&mut rng, 300).into_iter().map(|v| v * scale).collect());
        }
        let pruner = SignalPruner::new(0.7);
        let report = pruner.prune(&signals, None, None);
        assert_eq!(report.selected_signals, 6);
        assert!(report.clusters.is_empty());

        let trimmed = pruner.prune(&signals, None, Some(3));
        assert_eq!(trimmed.selected_signals, 3);
        // widest spread scores highest
        assert_eq!(trimmed.selected_names(), vec!["s3".to_string(), "s4".to_string(), "s5".to_string()]);
    }

    #[test]
    fn ties_break_by_name() {
        let mut signals = BTreeMap::new();
        signals.insert("beta".to_string(), vec![1.0, 2.0, 3.0, 4.0]);
        signals.insert("alpha".to_string(), vec![1.0, 2.0, 3.0, 4.0]);
        let mut quality = BTreeMap::new();
        quality.insert("alpha".to_string(), 1.0);
        quality.insert("beta".to_string(), 1.0);
        let report = SignalPruner::new(0.7).prune(&signals, Some(&quality), None);
        assert_eq!(report.selected_names(), vec!["alpha".to_string()]);
    }

    #[test]
    fn variance_score_penalizes_constant() {
        assert_eq!(variance_score(&[0.0; 10]), 0.0);
        assert_eq!(variance_score(&[1.0]), 0.0);
        assert!(variance_score(&[1.0, -1.0, 1.0, -1.0]) > 0.0);
        assert_eq!(variance_score(&[100.0, -100.0]), 100.0);
    }

    #[test]
    fn empty_input() {
        let report = SignalPruner::new(0.7).prune(&BTreeMap::new(), None, None);
        assert_eq!(report.total_signals, 0);
        assert!(report.selected_names().is_empty());
    }
}
