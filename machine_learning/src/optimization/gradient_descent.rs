use super::Optimizer;

/// Plain gradient descent, `w -= lr * g`.
#[derive(Debug, Clone, Copy)]
pub struct GradientDescent {
    learning_rate: f32,
}

impl GradientDescent {
    /// Creates a new `GradientDescent`.
    ///
    /// # Arguments
    /// * `learning_rate` - The length of the step taken against the gradient.
    pub fn new(learning_rate: f32) -> Self {
        Self { learning_rate }
    }
}

impl Optimizer for GradientDescent {
    fn update_params(&mut self, params: &mut [f32], grad: &[f32]) {
        let lr = self.learning_rate;
        params.iter_mut().zip(grad).for_each(|(w, g)| *w -= lr * g);
    }
}
