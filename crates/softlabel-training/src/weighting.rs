//! Per-class weights that emphasise rare classes.

use crate::metrics::EPSILON;
use ndarray::{Array1, Array2, Axis};

/// Derive class weights from per-class positive-label counts.
///
/// `w = 1 / ln(1 + f + ε)`, normalized to mean 1, then raised to `gamma`.
/// After the exponent the mean is only approximately 1.
#[must_use]
pub fn class_weights(frequencies: &Array1<f64>, gamma: f64) -> Array1<f64> {
    let raw = frequencies.mapv(|f| 1.0 / (1.0 + f + EPSILON).ln());
    let mean = raw.mean().unwrap_or(1.0);
    raw.mapv(|w| (w / mean).powf(gamma))
}

/// Count, per class, how many target rows put positive mass on that class.
#[must_use]
pub fn label_frequencies(targets: &Array2<f64>) -> Array1<f64> {
    targets.map_axis(Axis(0), |column| column.iter().filter(|&&v| v > 0.0).count() as f64)
}
