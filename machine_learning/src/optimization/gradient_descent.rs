use super::{Optimizer, OptimizerState, optimizer::check_sizes};
use crate::Result;

const KIND: &str = "gradient_descent";

/// Gradient descent optimization algorithm.
#[derive(Debug, Clone)]
pub struct GradientDescent {
    learning_rate: f32,
}

impl GradientDescent {
    /// Creates a new `GradientDescent` optimizer.
    ///
    /// # Arguments
    /// * `learning_rate` - The small coefficient that modulates the amount of training per update.
    ///
    /// # Returns
    /// A new `GradientDescent` instance.
    pub fn new(learning_rate: f32) -> Self {
        Self { learning_rate }
    }
}

impl Optimizer for GradientDescent {
    /// Makes a step in the opposite direction of the gradient, with a length of `learning_rate`.
    fn update_params(&mut self, grad: &[f32], params: &mut [f32]) -> Result<()> {
        check_sizes(grad, params)?;

        let lr = self.learning_rate;

        for (p, g) in params.iter_mut().zip(grad) {
            *p -= lr * g;
        }

        Ok(())
    }

    fn state_dict(&self) -> OptimizerState {
        OptimizerState::new(KIND).with_scalar("lr", self.learning_rate)
    }

    fn load_state_dict(&mut self, state: &OptimizerState) -> Result<()> {
        state.expect_kind(KIND)?;
        self.learning_rate = state.scalar("lr")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn steps_against_the_gradient() {
        let mut optimizer = GradientDescent::new(0.5);
        let mut params = [1.0, 2.0];

        optimizer.update_params(&[2.0, -2.0], &mut params).unwrap();
        assert_eq!(params, [0.0, 3.0]);
    }

    #[test]
    fn mismatched_sizes_fail() {
        let mut optimizer = GradientDescent::new(0.5);
        assert!(optimizer.update_params(&[1.0], &mut [1.0, 2.0]).is_err());
    }
}
