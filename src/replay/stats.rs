//! Small statistics helpers for the replay engine.

pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f64>() / values.len() as f64
    }
}

/// Sample standard deviation (n - 1).
pub fn sample_std(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let m = mean(values);
    let var = values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / (values.len() - 1) as f64;
    var.sqrt()
}

/// Per-observation Sharpe ratio, zero risk-free rate. Needs two points.
pub fn sharpe(returns: &[f64]) -> f64 {
    if returns.len() < 2 {
        return 0.0;
    }
    let std = sample_std(returns);
    mean(returns) / if std > 0.0 { std } else { 1e-8 }
}

/// Population skewness and excess kurtosis.
pub fn skew_kurtosis(values: &[f64]) -> (f64, f64) {
    let n = values.len() as f64;
    if values.is_empty() {
        return (0.0, 0.0);
    }
    let m = mean(values);
    let var = values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / n;
    let std = if var > 0.0 { var.sqrt() } else { 1e-8 };
    let skew = values.iter().map(|v| (v - m).powi(3)).sum::<f64>() / (n * std.powi(3));
    let kurt = values.iter().map(|v| (v - m).powi(4)).sum::<f64>() / (n * std.powi(4)) - 3.0;
    (skew, kurt)
}

/// Expected maximum of `n` standard-normal Sharpe draws, sqrt(2 ln n).
pub fn expected_max_sharpe(n_trials: usize) -> f64 {
    if n_trials <= 1 {
        return 0.0;
    }
    (2.0 * (n_trials as f64).ln()).sqrt()
}

pub fn normal_cdf(x: f64) -> f64 {
    0.5 * (1.0 + erf(x / std::f64::consts::SQRT_2))
}

/// Abramowitz and Stegun 7.1.26, |error| < 1.5e-7.
fn erf(x: f64) -> f64 {
    let a1 = 0.254829592;
    let a2 = -0.284496736;
    let a3 = 1.421413741;
    let a4 = -1.453152027;
    let a5 = 1.061405429;
    let p = 0.3275911;

    let sign = if x < 0.0 { -1.0 } else { 1.0 };
    let x = x.abs();

    let t = 1.0 / (1.0 + p * x);
    let y = 1.0 - (((((a5 * t + a4) * t) + a3) * t + a2) * t + a1) * t * (-x * x).exp();

    sign * y
}
