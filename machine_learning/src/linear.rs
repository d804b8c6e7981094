use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use crate::{
    dataset::BatchRef,
    error::{MlErr, Result},
    model::{Forward, TrainableModel},
    optimization::Optimizer,
};

/// Half width of the interval `seeded` draws the starting parameters from.
const INIT_SCALE: f32 = 0.1;

/// Linear regression trained on mean squared error.
///
/// The parameters are the `dim` weights followed by the bias.
#[derive(Debug)]
pub struct LinearRegression<O> {
    dim: usize,
    params: Vec<f32>,
    optimizer: O,
    features: Vec<f32>,
    residuals: Vec<f32>,
}

impl<O: Optimizer> LinearRegression<O> {
    /// Creates a new `LinearRegression` with every parameter at zero.
    ///
    /// # Arguments
    /// * `dim` - The amount of features per sample.
    /// * `optimizer` - Applies the gradients on `apply_update`.
    pub fn new(dim: usize, optimizer: O) -> Self {
        Self {
            dim,
            params: vec![0.0; dim + 1],
            optimizer,
            features: Vec::new(),
            residuals: Vec::new(),
        }
    }

    /// Same as `new` but with parameters drawn uniformly from a seeded generator.
    pub fn seeded(dim: usize, seed: u64, optimizer: O) -> Self {
        let mut model = Self::new(dim, optimizer);
        let mut rng = ChaCha8Rng::seed_from_u64(seed);

        model
            .params
            .iter_mut()
            .for_each(|p| *p = rng.random_range(-INIT_SCALE..INIT_SCALE));

        model
    }

    pub fn weights(&self) -> &[f32] {
        &self.params[..self.dim]
    }

    pub fn bias(&self) -> f32 {
        self.params[self.dim]
    }

    fn check_len(&self, what: &'static str, got: usize) -> Result<()> {
        if got != self.params.len() {
            return Err(MlErr::SizeMismatch {
                a: what,
                b: "parameters",
                got,
                expected: self.params.len(),
            });
        }

        Ok(())
    }
}

impl<O: Optimizer> TrainableModel for LinearRegression<O> {
    fn num_params(&self) -> usize {
        self.params.len()
    }

    fn params(&self) -> &[f32] {
        &self.params
    }

    fn params_mut(&mut self) -> &mut [f32] {
        &mut self.params
    }

    fn forward(&mut self, batch: BatchRef<'_>) -> Result<Forward> {
        if batch.is_empty() {
            return Err(MlErr::EmptyBatch);
        }

        if batch.dim != self.dim {
            return Err(MlErr::SizeMismatch {
                a: "batch features",
                b: "model inputs",
                got: batch.dim,
                expected: self.dim,
            });
        }

        let (weights, bias) = self.params.split_at(self.dim);
        let bias = bias[0];

        self.residuals.clear();
        let output: Vec<f32> = batch
            .rows()
            .map(|(x, y)| {
                let y_pred = x.iter().zip(weights).map(|(x, w)| x * w).sum::<f32>() + bias;
                self.residuals.push(y_pred - y);
                y_pred
            })
            .collect();

        let loss = self.residuals.iter().map(|r| r * r).sum::<f32>() / batch.len() as f32;

        if !loss.is_finite() {
            return Err(MlErr::NonFinite { what: "loss", value: loss });
        }

        self.features.clear();
        self.features.extend_from_slice(batch.features);

        Ok(Forward { output, loss })
    }

    fn backward(&mut self, loss: f32, grads: &mut [f32]) -> Result<()> {
        self.check_len("gradient", grads.len())?;

        if !loss.is_finite() {
            return Err(MlErr::NonFinite { what: "loss", value: loss });
        }

        if self.residuals.is_empty() {
            return Err(MlErr::NoForwardPass);
        }

        let scale = 2.0 / self.residuals.len() as f32;
        let (grad_w, grad_b) = grads.split_at_mut(self.dim);
        grad_w.fill(0.0);
        grad_b[0] = 0.0;

        for (x, r) in self.features.chunks_exact(self.dim.max(1)).zip(&self.residuals) {
            let r = scale * r;

            for (g, x) in grad_w.iter_mut().zip(x) {
                *g += r * x;
            }

            grad_b[0] += r;
        }

        Ok(())
    }

    fn apply_update(&mut self, grads: &[f32]) -> Result<()> {
        self.check_len("gradient", grads.len())?;
        self.optimizer.update_params(&mut self.params, grads);
        Ok(())
    }
}
