use std::collections::BTreeMap;

/// Pearson correlation over the common prefix of `x` and `y`.
/// Fewer than three points or a constant series gives 0.
pub fn pearson(x: &[f64], y: &[f64]) -> f64 {
    let n = x.len().min(y.len());
    if n < 3 {
        return 0.0;
    }
    let (x, y) = (&x[..n], &y[..n]);
    let mx = x.iter().sum::<f64>() / n as f64;
    let my = y.iter().sum::<f64>() / n as f64;

    let mut cov = 0.0;
    let mut sxx = 0.0;
    let mut syy = 0.0;
    for (xi, yi) in x.iter().zip(y) {
        let dx = xi - mx;
        let dy = yi - my;
        cov += dx * dy;
        sxx += dx * dx;
        syy += dy * dy;
    }
    if sxx == 0.0 || syy == 0.0 {
        return 0.0;
    }
    cov / (sxx.sqrt() * syy.sqrt())
}

/// Pairwise correlations keyed by `(a, b)`; both orders are present.
#[derive(Debug, Clone, Default)]
pub struct SignalCorrelationMatrix {
    pairs: BTreeMap<(String, String), f64>,
}

impl SignalCorrelationMatrix {
    pub fn compute(signals: &BTreeMap<String, Vec<f64>>) -> Self {
        let names: Vec<&String> = signals.keys().collect();
        let mut pairs = BTreeMap::new();
        for (i, a) in names.iter().enumerate() {
            for b in &names[i + 1..] {
                let r = pearson(&signals[*a], &signals[*b]);
                pairs.insert(((*a).clone(), (*b).clone()), r);
                pairs.insert(((*b).clone(), (*a).clone()), r);
            }
        }
        Self { pairs }
    }

    pub fn get(&self, a: &str, b: &str) -> Option<f64> {
        self.pairs.get(&(a.to_string(), b.to_string())).copied()
    }

    /// Number of unordered pairs.
    pub fn len(&self) -> usize {
        self.pairs.len() / 2
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    /// Unordered pairs with `|r| >= threshold`, strongest first.
    pub fn find_high_correlation_pairs(&self, threshold: f64) -> Vec<(String, String, f64)> {
        let mut out: Vec<(String, String, f64)> = self
            .pairs
            .iter()
            .filter(|((a, b), r)| a < b && r.abs() >= threshold)
            .map(|((a, b), r)| (a.clone(), b.clone(), *r))
            .collect();
        out.sort_by(|x, y| y.2.abs().total_cmp(&x.2.abs()).then_with(|| (&x.0, &x.1).cmp(&(&y.0, &y.1))));
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pearson_basic_cases() {
        let x = [1.0, 2.0, 3.0, 4.0, 5.0];
        let up = [2.0, 4.0, 6.0, 8.0, 10.0];
        let down = [5.0, 4.0, 3.0, 2.0, 1.0];
        assert!((pearson(&x, &up) - 1.0).abs() < 1e-12);
        assert!((pearson(&x, &down) + 1.0).abs() < 1e-12);
        assert_eq!(pearson(&x, &[3.0; 5]), 0.0);
        assert_eq!(pearson(&[1.0, 2.0], &[1.0, 2.0]), 0.0);
    }

    #[test]
    fn matrix_is_symmetric_and_pairs_dedup() {
        let mut signals = BTreeMap::new();
        signals.insert("a".to_string(), vec![1.0, 2.0, 3.0, 4.0]);
        signals.insert("b".to_string(), vec![2.0, 4.0, 6.0, 8.1]);
        signals.insert("c".to_string(), vec![4.0, 1.0, 3.0, 2.0]);
        let m = SignalCorrelationMatrix::compute(&signals);
        assert_eq!(m.len(), 3);
        assert_eq!(m.get("a", "c"), m.get("c", "a"));

        let high = m.find_high_correlation_pairs(0.9);
        assert_eq!(high.len(), 1);
        assert_eq!((high[0].0.as_str(), high[0].1.as_str()), ("a", "b"));
    }
}
