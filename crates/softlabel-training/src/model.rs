use crate::error::TrainingResult;
use ndarray::Array2;
use std::path::Path;

/// The trainable model behind a training run.
///
/// The training loop only sees logits and hands back the gradient of the loss
/// with respect to those logits; how parameters are stored and updated is up
/// to the implementation.
pub trait Model {
    /// Engine-facing identifier recorded in run manifests.
    fn id(&self) -> &'static str;

    /// Training-mode forward pass. Keeps whatever [`Model::update`] needs.
    fn forward(&mut self, inputs: &Array2<f64>) -> TrainingResult<Array2<f64>>;

    /// Inference-mode forward pass; never changes parameters.
    fn predict(&self, inputs: &Array2<f64>) -> TrainingResult<Array2<f64>>;

    /// One optimizer step from the gradient of the loss with respect to the
    /// logits returned by the latest [`Model::forward`].
    fn update(&mut self, grad_logits: &Array2<f64>) -> TrainingResult<()>;

    /// Current learning rate of every parameter group.
    fn learning_rates(&self) -> Vec<f64>;

    fn set_learning_rates(&mut self, rates: &[f64]) -> TrainingResult<()>;

    fn save(&self, path: &Path) -> TrainingResult<()>;

    fn load(&mut self, path: &Path) -> TrainingResult<()>;
}
