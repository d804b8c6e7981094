use crate::{dataset::BatchRef, error::Result};

/// The result of a forward pass.
#[derive(Debug, Clone, PartialEq)]
pub struct Forward {
    /// One prediction per sample.
    pub output: Vec<f32>,
    /// The batch's mean loss.
    pub loss: f32,
}

/// A model that can be trained one batch at a time.
///
/// Parameters are a flat `f32` buffer so they can be reduced and broadcast
/// as is. `backward` differentiates the loss of the last `forward`.
pub trait TrainableModel: Send {
    /// Returns the amount of parameters in the model.
    fn num_params(&self) -> usize;

    fn params(&self) -> &[f32];

    fn params_mut(&mut self) -> &mut [f32];

    /// Runs the model over `batch`, keeping whatever `backward` needs.
    fn forward(&mut self, batch: BatchRef<'_>) -> Result<Forward>;

    /// Writes the gradient of `loss` with respect to the parameters into `grads`.
    ///
    /// # Arguments
    /// * `loss` - The loss returned by the last `forward`.
    /// * `grads` - A `num_params` long buffer, overwritten.
    fn backward(&mut self, loss: f32, grads: &mut [f32]) -> Result<()>;

    /// Steps the parameters with the model's optimizer.
    fn apply_update(&mut self, grads: &[f32]) -> Result<()>;
}
