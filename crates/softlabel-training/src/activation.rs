//! Row-wise softmax helpers for turning raw logits into distributions.

use ndarray::{Array2, ArrayView1, Axis};

fn log_sum_exp(row: ArrayView1<'_, f64>) -> f64 {
    let max = row.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    if !max.is_finite() {
        return max;
    }
    max + row.iter().map(|v| (v - max).exp()).sum::<f64>().ln()
}

/// Log-probabilities for each row of `logits`.
#[must_use]
pub fn log_softmax(logits: &Array2<f64>) -> Array2<f64> {
    let mut out = logits.clone();
    for mut row in out.axis_iter_mut(Axis(0)) {
        let lse = log_sum_exp(row.view());
        row.mapv_inplace(|v| v - lse);
    }
    out
}

/// Probabilities for each row of `logits`; every row sums to one.
#[must_use]
pub fn softmax(logits: &Array2<f64>) -> Array2<f64> {
    log_softmax(logits).mapv(f64::exp)
}
