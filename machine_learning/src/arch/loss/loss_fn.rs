use ndarray::{Array2, ArrayView2};

/// A loss function over a batch of predictions.
pub trait LossFn {
    /// Returns the loss of `y_pred` against `y`.
    fn loss(&self, y_pred: ArrayView2<f32>, y: ArrayView2<f32>) -> f32;

    /// Returns the derivative of the loss with respect to `y_pred`.
    fn loss_prime(&self, y_pred: ArrayView2<f32>, y: ArrayView2<f32>) -> Array2<f32>;
}
