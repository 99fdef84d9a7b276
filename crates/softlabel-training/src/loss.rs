//! KL-divergence training objective with optional class weighting.

use crate::error::{TrainingError, TrainingResult};
use ndarray::{Array1, Array2, Axis, Zip};
use serde::{Deserialize, Serialize};

/// How the per-cell loss terms are reduced to a scalar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LossReduction {
    /// Sum over all cells divided by the batch size.
    #[default]
    #[serde(rename = "batchmean")]
    BatchMean,
    /// Mean over all `N×C` cells.
    Mean,
}

impl LossReduction {
    fn divisor(self, rows: usize, cols: usize) -> f64 {
        match self {
            Self::BatchMean => rows.max(1) as f64,
            Self::Mean => (rows * cols).max(1) as f64,
        }
    }
}

/// `t·(ln t − log p)` per cell, optionally scaled by a per-class weight.
#[derive(Debug, Clone, Default)]
pub struct WeightedKlLoss {
    weights: Option<Array1<f64>>,
    reduction: LossReduction,
}

impl WeightedKlLoss {
    #[must_use]
    pub fn new(reduction: LossReduction) -> Self {
        Self { weights: None, reduction }
    }

    #[must_use]
    pub fn with_class_weights(mut self, weights: Array1<f64>) -> Self {
        self.weights = Some(weights);
        self
    }

    #[must_use]
    pub fn reduction(&self) -> LossReduction {
        self.reduction
    }

    #[must_use]
    pub fn class_weights(&self) -> Option<&Array1<f64>> {
        self.weights.as_ref()
    }

    fn check(&self, log_probs: &Array2<f64>, targets: &Array2<f64>) -> TrainingResult<()> {
        if log_probs.dim() != targets.dim() {
            return Err(TrainingError::shape_mismatch("loss", targets.shape(), log_probs.shape()));
        }
        if let Some(w) = &self.weights {
            if w.len() != targets.ncols() {
                return Err(TrainingError::shape_mismatch(
                    "class weights",
                    &[targets.ncols()],
                    &[w.len()],
                ));
            }
        }
        Ok(())
    }

    fn weight(&self, class: usize) -> f64 {
        self.weights.as_ref().map_or(1.0, |w| w[class])
    }

    /// Scalar loss for a batch of log-probabilities against targets.
    pub fn forward(&self, log_probs: &Array2<f64>, targets: &Array2<f64>) -> TrainingResult<f64> {
        self.check(log_probs, targets)?;

        let mut total = 0.0;
        for (row_lp, row_t) in log_probs.axis_iter(Axis(0)).zip(targets.axis_iter(Axis(0))) {
            for (class, (&lp, &t)) in row_lp.iter().zip(row_t.iter()).enumerate() {
                // 0·ln 0 contributes nothing.
                if t > 0.0 {
                    total += self.weight(class) * t * (t.ln() - lp);
                }
            }
        }
        Ok(total / self.reduction.divisor(targets.nrows(), targets.ncols()))
    }

    /// Gradient of [`Self::forward`] with respect to the logits that produced
    /// `log_probs` through a log-softmax.
    pub fn backward(
        &self,
        log_probs: &Array2<f64>,
        targets: &Array2<f64>,
    ) -> TrainingResult<Array2<f64>> {
        self.check(log_probs, targets)?;

        let divisor = self.reduction.divisor(targets.nrows(), targets.ncols());
        let mut grad = Array2::zeros(targets.raw_dim());
        for ((mut g, lp), t) in grad
            .axis_iter_mut(Axis(0))
            .zip(log_probs.axis_iter(Axis(0)))
            .zip(targets.axis_iter(Axis(0)))
        {
            let weighted_mass: f64 =
                t.iter().enumerate().map(|(class, &tc)| self.weight(class) * tc).sum();
            let mut class = 0;
            Zip::from(&mut g).and(&lp).and(&t).for_each(|g, &lp, &tc| {
                *g = (lp.exp() * weighted_mass - self.weight(class) * tc) / divisor;
                class += 1;
            });
        }
        Ok(grad)
    }
}
