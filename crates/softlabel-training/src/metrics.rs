//! Distribution metrics for soft-label predictions.
//!
//! Every function takes a prediction matrix `P` (N×C, rows already softmaxed)
//! and a target matrix `T` (N×C, non-negative frequencies or probabilities).
//! Per-sample metrics are averaged over the N rows; the correlation metrics
//! are computed once over the flattened matrices.
//!
//! Zero probabilities and zero-norm rows are absorbed by the [`EPSILON`]
//! floor, so numerically awkward input degrades a metric instead of failing
//! the evaluation. The only fallible metric is [`mean_average_precision`],
//! which reports a [`MetricError`] that [`evaluate`] turns into NaN.

use crate::error::{MetricError, TrainingError, TrainingResult};
use ndarray::{Array2, ArrayView1, Axis};
use serde::{Deserialize, Deserializer, Serialize};
use std::cmp::Ordering;
use std::collections::HashSet;

/// Floor applied to probabilities before any logarithm or ratio.
pub const EPSILON: f64 = 1e-10;

// JSON has no NaN; serde_json writes it as `null`, so read `null` back as NaN.
fn nan_if_null<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
    Ok(Option::<f64>::deserialize(deserializer)?.unwrap_or(f64::NAN))
}

/// Scalar summary of one evaluation pass over a split.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsReport {
    pub kl_mean: f64,
    pub js_mean: f64,
    pub emd_mean: f64,
    pub cosine_mean: f64,
    #[serde(deserialize_with = "nan_if_null")]
    pub pearson: f64,
    #[serde(deserialize_with = "nan_if_null")]
    pub spearman: f64,
    pub top1_acc: f64,
    pub top3_acc: f64,
    #[serde(deserialize_with = "nan_if_null")]
    pub map_macro: f64,
    pub per_class_kl_mean: f64,
}

impl MetricsReport {
    /// Metric keys in the order they are logged.
    pub const KEYS: [&'static str; 10] = [
        "kl_mean",
        "js_mean",
        "emd_mean",
        "cosine_mean",
        "pearson",
        "spearman",
        "top1_acc",
        "top3_acc",
        "map_macro",
        "per_class_kl_mean",
    ];

    /// `(name, value)` pairs in [`Self::KEYS`] order.
    #[must_use]
    pub fn entries(&self) -> Vec<(&'static str, f64)> {
        let values = [
            self.kl_mean,
            self.js_mean,
            self.emd_mean,
            self.cosine_mean,
            self.pearson,
            self.spearman,
            self.top1_acc,
            self.top3_acc,
            self.map_macro,
            self.per_class_kl_mean,
        ];
        Self::KEYS.into_iter().zip(values).collect()
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<f64> {
        self.entries().into_iter().find(|(key, _)| *key == name).map(|(_, v)| v)
    }

    /// A human-readable summary line suitable for logging.
    #[must_use]
    pub fn summary(&self) -> String {
        format!(
            "kl={:.4} js={:.4} emd={:.4} cos={:.4} top1={:.3} top3={:.3}",
            self.kl_mean, self.js_mean, self.emd_mean, self.cosine_mean, self.top1_acc, self.top3_acc
        )
    }
}

fn check_shapes(preds: &Array2<f64>, targets: &Array2<f64>) -> TrainingResult<()> {
    if preds.dim() != targets.dim() {
        return Err(TrainingError::shape_mismatch("metrics", targets.shape(), preds.shape()));
    }
    if preds.nrows() == 0 {
        return Err(TrainingError::Dataset("cannot evaluate an empty split".to_string()));
    }
    Ok(())
}

/// Compute the full metric suite.
///
/// Fails only on malformed input (mismatched shapes or zero rows).
pub fn evaluate(preds: &Array2<f64>, targets: &Array2<f64>) -> TrainingResult<MetricsReport> {
    check_shapes(preds, targets)?;

    let map_macro = match mean_average_precision(preds, targets) {
        Ok(value) => value,
        Err(e) => {
            tracing::warn!(error = %e, "mean average precision unavailable");
            f64::NAN
        }
    };

    Ok(MetricsReport {
        kl_mean: kl_divergence_mean(preds, targets),
        js_mean: js_divergence_mean(preds, targets),
        emd_mean: emd_mean(preds, targets),
        cosine_mean: cosine_similarity_mean(preds, targets),
        pearson: pearson(preds.iter().copied(), targets.iter().copied()),
        spearman: spearman(preds.iter().copied(), targets.iter().copied()),
        top1_acc: top_k_accuracy(preds, targets, 1),
        top3_acc: top_k_accuracy(preds, targets, 3),
        map_macro,
        per_class_kl_mean: per_class_kl_mean(preds, targets),
    })
}

fn row_mean<F>(preds: &Array2<f64>, targets: &Array2<f64>, per_row: F) -> f64
where
    F: Fn(ArrayView1<'_, f64>, ArrayView1<'_, f64>) -> f64,
{
    let n = preds.nrows();
    if n == 0 {
        return f64::NAN;
    }
    let total: f64 = preds
        .axis_iter(Axis(0))
        .zip(targets.axis_iter(Axis(0)))
        .map(|(p, t)| per_row(p, t))
        .sum();
    total / n as f64
}

fn kl_floored<I>(pairs: I) -> f64
where
    I: Iterator<Item = (f64, f64)>,
{
    pairs
        .map(|(p, t)| {
            let p = p.max(EPSILON);
            let t = t.max(EPSILON);
            t * (t / p).ln()
        })
        .sum()
}

fn normalized_floored(values: ArrayView1<'_, f64>) -> Vec<f64> {
    let floored: Vec<f64> = values.iter().map(|v| v.max(EPSILON)).collect();
    let total: f64 = floored.iter().sum();
    floored.into_iter().map(|v| v / total).collect()
}

/// Mean over samples of `Σ t·ln(t/p)`, both sides floored at [`EPSILON`].
#[must_use]
pub fn kl_divergence_mean(preds: &Array2<f64>, targets: &Array2<f64>) -> f64 {
    row_mean(preds, targets, |p, t| kl_floored(p.iter().copied().zip(t.iter().copied())))
}

/// Mean over samples of the squared Jensen-Shannon distance (base 2).
#[must_use]
pub fn js_divergence_mean(preds: &Array2<f64>, targets: &Array2<f64>) -> f64 {
    row_mean(preds, targets, |p, t| {
        let p = normalized_floored(p);
        let t = normalized_floored(t);
        let mut js = 0.0;
        for (pi, ti) in p.iter().zip(t.iter()) {
            let m = 0.5 * (pi + ti);
            js += 0.5 * pi * (pi / m).log2() + 0.5 * ti * (ti / m).log2();
        }
        js.max(0.0)
    })
}

/// Mean over samples of the 1-D Wasserstein distance between the two rows,
/// read as weights over the class indices `0..C`.
#[must_use]
pub fn emd_mean(preds: &Array2<f64>, targets: &Array2<f64>) -> f64 {
    row_mean(preds, targets, |p, t| {
        let p_total = p.sum().max(EPSILON);
        let t_total = t.sum().max(EPSILON);
        let mut cdf_p = 0.0;
        let mut cdf_t = 0.0;
        let mut distance = 0.0;
        // Unit spacing between neighbouring class indices.
        for i in 0..p.len().saturating_sub(1) {
            cdf_p += p[i] / p_total;
            cdf_t += t[i] / t_total;
            distance += (cdf_p - cdf_t).abs();
        }
        distance
    })
}

/// Mean over samples of `dot(t, p) / (‖t‖·‖p‖ + ε)`.
#[must_use]
pub fn cosine_similarity_mean(preds: &Array2<f64>, targets: &Array2<f64>) -> f64 {
    row_mean(preds, targets, |p, t| {
        let dot = p.dot(&t);
        let norms = p.dot(&p).sqrt() * t.dot(&t).sqrt();
        dot / (norms + EPSILON)
    })
}

/// Pearson correlation of two equally long sequences; NaN when either side
/// has zero variance.
pub fn pearson<I, J>(xs: I, ys: J) -> f64
where
    I: IntoIterator<Item = f64>,
    J: IntoIterator<Item = f64>,
{
    let xs: Vec<f64> = xs.into_iter().collect();
    let ys: Vec<f64> = ys.into_iter().collect();
    let n = xs.len().min(ys.len());
    if n < 2 {
        return f64::NAN;
    }
    let mean_x = xs[..n].iter().sum::<f64>() / n as f64;
    let mean_y = ys[..n].iter().sum::<f64>() / n as f64;

    let mut sxy = 0.0;
    let mut sxx = 0.0;
    let mut syy = 0.0;
    for (x, y) in xs[..n].iter().zip(&ys[..n]) {
        let dx = x - mean_x;
        let dy = y - mean_y;
        sxy += dx * dy;
        sxx += dx * dx;
        syy += dy * dy;
    }
    let denom = (sxx * syy).sqrt();
    if denom == 0.0 {
        return f64::NAN;
    }
    (sxy / denom).clamp(-1.0, 1.0)
}

/// 1-based ranks with ties sharing their average rank.
fn average_ranks(values: &[f64]) -> Vec<f64> {
    let mut order: Vec<usize> = (0..values.len()).collect();
    order.sort_by(|&a, &b| values[a].total_cmp(&values[b]));

    let mut ranks = vec![0.0; values.len()];
    let mut start = 0;
    while start < order.len() {
        let mut end = start + 1;
        while end < order.len() && values[order[end]] == values[order[start]] {
            end += 1;
        }
        let rank = (start + end + 1) as f64 / 2.0;
        for &idx in &order[start..end] {
            ranks[idx] = rank;
        }
        start = end;
    }
    ranks
}

/// Spearman rank correlation: Pearson over average ranks.
pub fn spearman<I, J>(xs: I, ys: J) -> f64
where
    I: IntoIterator<Item = f64>,
    J: IntoIterator<Item = f64>,
{
    let xs: Vec<f64> = xs.into_iter().collect();
    let ys: Vec<f64> = ys.into_iter().collect();
    pearson(average_ranks(&xs), average_ranks(&ys))
}

/// Indices of the `k` largest entries, unordered.
fn top_k_indices(row: ArrayView1<'_, f64>, k: usize) -> Vec<usize> {
    let mut idx: Vec<usize> = (0..row.len()).collect();
    if k == 0 {
        return Vec::new();
    }
    if k < idx.len() {
        idx.select_nth_unstable_by(k - 1, |&a, &b| row[b].total_cmp(&row[a]));
        idx.truncate(k);
    }
    idx
}

/// Fraction of samples whose top-`k` predicted classes share at least one
/// class with their top-`k` target classes.
#[must_use]
pub fn top_k_accuracy(preds: &Array2<f64>, targets: &Array2<f64>, k: usize) -> f64 {
    row_mean(preds, targets, |p, t| {
        let predicted: HashSet<usize> = top_k_indices(p, k).into_iter().collect();
        let hit = top_k_indices(t, k).iter().any(|c| predicted.contains(c));
        if hit { 1.0 } else { 0.0 }
    })
}

/// Average precision of one class column. `None` when the column has no
/// positive label.
fn average_precision(scores: ArrayView1<'_, f64>, labels: ArrayView1<'_, f64>) -> Option<f64> {
    let positives = labels.iter().filter(|&&l| l > 0.0).count();
    if positives == 0 {
        return None;
    }

    let mut order: Vec<usize> = (0..scores.len()).collect();
    order.sort_by(|&a, &b| scores[b].total_cmp(&scores[a]));

    let mut tp = 0usize;
    let mut fp = 0usize;
    let mut prev_recall = 0.0;
    let mut ap = 0.0;
    let mut i = 0;
    while i < order.len() {
        // Samples sharing a score form one threshold.
        let threshold = scores[order[i]];
        while i < order.len() && scores[order[i]].total_cmp(&threshold) == Ordering::Equal {
            if labels[order[i]] > 0.0 {
                tp += 1;
            } else {
                fp += 1;
            }
            i += 1;
        }
        let precision = tp as f64 / (tp + fp) as f64;
        let recall = tp as f64 / positives as f64;
        ap += (recall - prev_recall) * precision;
        prev_recall = recall;
    }
    Some(ap)
}

/// Macro-averaged average precision, treating `targets > 0` as multi-label
/// ground truth and `preds` as scores. Classes without positives are left out
/// of the average.
pub fn mean_average_precision(
    preds: &Array2<f64>,
    targets: &Array2<f64>,
) -> Result<f64, MetricError> {
    if preds.nrows() == 0 || preds.ncols() == 0 {
        return Err(MetricError::Empty);
    }
    if preds.iter().any(|v| !v.is_finite()) {
        return Err(MetricError::NonFiniteScores);
    }
    let per_class: Vec<f64> = preds
        .axis_iter(Axis(1))
        .zip(targets.axis_iter(Axis(1)))
        .filter_map(|(scores, labels)| average_precision(scores, labels))
        .collect();
    if per_class.is_empty() {
        return Err(MetricError::NoPositiveLabels);
    }
    Ok(per_class.iter().sum::<f64>() / per_class.len() as f64)
}

/// KL divergence computed per class column, each column normalized into a
/// distribution over samples, averaged over the classes.
#[must_use]
pub fn per_class_kl_mean(preds: &Array2<f64>, targets: &Array2<f64>) -> f64 {
    let classes = preds.ncols();
    if classes == 0 || preds.nrows() == 0 {
        return f64::NAN;
    }
    let total: f64 = preds
        .axis_iter(Axis(1))
        .zip(targets.axis_iter(Axis(1)))
        .map(|(p, t)| {
            let p = normalized_floored(p);
            let t = normalized_floored(t);
            p.iter().zip(&t).map(|(pi, ti)| ti * (ti / pi).ln()).sum::<f64>()
        })
        .sum();
    total / classes as f64
}
