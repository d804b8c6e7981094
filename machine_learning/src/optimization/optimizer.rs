/// Applies a gradient to a set of parameters.
pub trait Optimizer: Send {
    fn update_params(&mut self, params: &mut [f32], grad: &[f32]);
}

impl<T: Optimizer + ?Sized> Optimizer for Box<T> {
    fn update_params(&mut self, params: &mut [f32], grad: &[f32]) {
        (**self).update_params(params, grad)
    }
}
