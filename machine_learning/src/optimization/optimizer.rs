use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::{MlErr, Result};

/// A snapshot of an optimizer's internal state.
///
/// Scalars hold hyperparameters and step-dependent values, buffers hold the per-parameter
/// vectors some algorithms keep (momentum, moment estimates, ...). Buffers are skipped by serde
/// since they are meant to be stored as tensors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizerState {
    pub kind: String,
    pub scalars: BTreeMap<String, f32>,
    #[serde(skip)]
    pub buffers: BTreeMap<String, Vec<f32>>,
}

impl OptimizerState {
    /// Creates a new empty `OptimizerState` for the given kind of optimizer.
    pub fn new(kind: &str) -> Self {
        Self {
            kind: kind.to_string(),
            scalars: BTreeMap::new(),
            buffers: BTreeMap::new(),
        }
    }

    pub fn with_scalar(mut self, name: &str, value: f32) -> Self {
        self.scalars.insert(name.to_string(), value);
        self
    }

    pub fn with_buffer(mut self, name: &str, buffer: &[f32]) -> Self {
        self.buffers.insert(name.to_string(), buffer.to_vec());
        self
    }

    /// Fails unless this state was produced by an optimizer of the given kind.
    pub fn expect_kind(&self, kind: &str) -> Result<()> {
        if self.kind != kind {
            return Err(MlErr::StateMismatch {
                expected: kind.to_string(),
                got: self.kind.clone(),
            });
        }

        Ok(())
    }

    /// Returns the scalar named `name`.
    pub fn scalar(&self, name: &str) -> Result<f32> {
        self.scalars
            .get(name)
            .copied()
            .ok_or_else(|| MlErr::MissingParam(name.to_string()))
    }

    /// Copies the buffer named `name` into `dst`.
    ///
    /// # Returns
    /// An error if the buffer is missing or its length differs from `dst`'s.
    pub fn copy_buffer(&self, name: &str, dst: &mut [f32]) -> Result<()> {
        let src = self
            .buffers
            .get(name)
            .ok_or_else(|| MlErr::MissingParam(name.to_string()))?;

        if src.len() != dst.len() {
            return Err(MlErr::SizeMismatch {
                what: "optimizer buffer",
                got: src.len(),
                expected: dst.len(),
            });
        }

        dst.copy_from_slice(src);
        Ok(())
    }
}

/// Defines the strategy for updating model parameters based on calculated gradients.
pub trait Optimizer {
    /// Makes a single optimization step over `params`.
    ///
    /// # Arguments
    /// * `grad` - A reference to the model's gradient.
    /// * `params` - The parameters to update.
    ///
    /// # Returns
    /// An error if there's a mismatch in the sizes of `grad` and `params`.
    fn update_params(&mut self, grad: &[f32], params: &mut [f32]) -> Result<()>;

    /// Returns a snapshot of the optimizer's internal state.
    fn state_dict(&self) -> OptimizerState;

    /// Restores the optimizer's internal state from a snapshot.
    ///
    /// # Returns
    /// An error if the snapshot belongs to another kind of optimizer or its buffers don't fit.
    fn load_state_dict(&mut self, state: &OptimizerState) -> Result<()>;
}

impl<T: Optimizer + ?Sized> Optimizer for Box<T> {
    fn update_params(&mut self, grad: &[f32], params: &mut [f32]) -> Result<()> {
        (**self).update_params(grad, params)
    }

    fn state_dict(&self) -> OptimizerState {
        (**self).state_dict()
    }

    fn load_state_dict(&mut self, state: &OptimizerState) -> Result<()> {
        (**self).load_state_dict(state)
    }
}

pub(super) fn check_sizes(grad: &[f32], params: &[f32]) -> Result<()> {
    if grad.len() != params.len() {
        return Err(MlErr::SizeMismatch {
            what: "gradient",
            got: grad.len(),
            expected: params.len(),
        });
    }

    Ok(())
}
