//! Feed-forward head trained on precomputed feature vectors.
//!
//! One hidden ReLU layer followed by a linear output layer that produces
//! logits. Parameters are split into two groups, `hidden` and `output`, each
//! with its own SGD learning rate. Checkpoints are plain JSON.

use crate::error::{TrainingError, TrainingResult};
use crate::model::Model;
use ndarray::{Array1, Array2, Axis};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct HeadParams {
    w1: Array2<f64>,
    b1: Array1<f64>,
    w2: Array2<f64>,
    b2: Array1<f64>,
}

struct ForwardCache {
    inputs: Array2<f64>,
    hidden_pre: Array2<f64>,
    hidden: Array2<f64>,
}

pub struct FeedForwardHead {
    params: HeadParams,
    hidden_lr: f64,
    output_lr: f64,
    cache: Option<ForwardCache>,
}

fn uniform(rng: &mut StdRng, rows: usize, cols: usize) -> Array2<f64> {
    let bound = 1.0 / (rows.max(1) as f64).sqrt();
    Array2::from_shape_fn((rows, cols), |_| rng.gen_range(-bound..bound))
}

impl FeedForwardHead {
    /// Randomly initialised head; `lrs` are the hidden and output group
    /// learning rates.
    #[must_use]
    pub fn new(input_dim: usize, hidden_dim: usize, num_classes: usize, lrs: [f64; 2], seed: u64) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        let params = HeadParams {
            w1: uniform(&mut rng, input_dim, hidden_dim),
            b1: Array1::zeros(hidden_dim),
            w2: uniform(&mut rng, hidden_dim, num_classes),
            b2: Array1::zeros(num_classes),
        };
        Self { params, hidden_lr: lrs[0], output_lr: lrs[1], cache: None }
    }

    #[must_use]
    pub fn num_classes(&self) -> usize {
        self.params.b2.len()
    }

    fn hidden(&self, inputs: &Array2<f64>) -> TrainingResult<(Array2<f64>, Array2<f64>)> {
        if inputs.ncols() != self.params.w1.nrows() {
            return Err(TrainingError::shape_mismatch(
                "head input",
                &[inputs.nrows(), self.params.w1.nrows()],
                inputs.shape(),
            ));
        }
        let pre = inputs.dot(&self.params.w1) + &self.params.b1;
        let act = pre.mapv(|v| v.max(0.0));
        Ok((pre, act))
    }

    fn logits(&self, hidden: &Array2<f64>) -> Array2<f64> {
        hidden.dot(&self.params.w2) + &self.params.b2
    }
}

impl Model for FeedForwardHead {
    fn id(&self) -> &'static str {
        "feedforward-head"
    }

    fn forward(&mut self, inputs: &Array2<f64>) -> TrainingResult<Array2<f64>> {
        let (hidden_pre, hidden) = self.hidden(inputs)?;
        let logits = self.logits(&hidden);
        self.cache = Some(ForwardCache { inputs: inputs.clone(), hidden_pre, hidden });
        Ok(logits)
    }

    fn predict(&self, inputs: &Array2<f64>) -> TrainingResult<Array2<f64>> {
        let (_, hidden) = self.hidden(inputs)?;
        Ok(self.logits(&hidden))
    }

    fn update(&mut self, grad_logits: &Array2<f64>) -> TrainingResult<()> {
        let cache = self
            .cache
            .take()
            .ok_or_else(|| TrainingError::Trainer("update called without a preceding forward pass".to_string()))?;
        if grad_logits.dim() != (cache.hidden.nrows(), self.num_classes()) {
            return Err(TrainingError::shape_mismatch(
                "logit gradient",
                &[cache.hidden.nrows(), self.num_classes()],
                grad_logits.shape(),
            ));
        }

        let grad_w2 = cache.hidden.t().dot(grad_logits);
        let grad_b2 = grad_logits.sum_axis(Axis(0));
        let mut grad_hidden = grad_logits.dot(&self.params.w2.t());
        grad_hidden.zip_mut_with(&cache.hidden_pre, |g, &pre| {
            if pre <= 0.0 {
                *g = 0.0;
            }
        });
        let grad_w1 = cache.inputs.t().dot(&grad_hidden);
        let grad_b1 = grad_hidden.sum_axis(Axis(0));

        self.params.w2.scaled_add(-self.output_lr, &grad_w2);
        self.params.b2.scaled_add(-self.output_lr, &grad_b2);
        self.params.w1.scaled_add(-self.hidden_lr, &grad_w1);
        self.params.b1.scaled_add(-self.hidden_lr, &grad_b1);
        Ok(())
    }

    fn learning_rates(&self) -> Vec<f64> {
        vec![self.hidden_lr, self.output_lr]
    }

    fn set_learning_rates(&mut self, rates: &[f64]) -> TrainingResult<()> {
        let [hidden, output] = rates else {
            return Err(TrainingError::shape_mismatch("learning rates", &[2], &[rates.len()]));
        };
        self.hidden_lr = *hidden;
        self.output_lr = *output;
        Ok(())
    }

    fn save(&self, path: &Path) -> TrainingResult<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_vec(&self.params)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    fn load(&mut self, path: &Path) -> TrainingResult<()> {
        let bytes = std::fs::read(path)
            .map_err(|e| TrainingError::checkpoint(format!("cannot read checkpoint: {e}"), path))?;
        let params: HeadParams = serde_json::from_slice(&bytes)?;
        if params.w1.dim() != self.params.w1.dim() || params.w2.dim() != self.params.w2.dim() {
            return Err(TrainingError::checkpoint("checkpoint shape does not match the head", path));
        }
        self.params = params;
        self.cache = None;
        Ok(())
    }
}
