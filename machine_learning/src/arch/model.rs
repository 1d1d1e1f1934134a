use std::collections::BTreeMap;

use ndarray::{Array2, ArrayD, ArrayView2};

use crate::error::Result;

/// The named parameter tensors of a model, keyed by their qualified name.
pub type StateDict = BTreeMap<String, ArrayD<f32>>;

/// The loss produced by a single forward pass.
#[derive(Debug, Clone, PartialEq)]
pub enum Loss {
    /// A single loss for the whole batch.
    Scalar(f32),
    /// One loss per replica the batch was scattered across.
    PerReplica(Vec<f32>),
}

impl Loss {
    /// Collapses the loss into a single scalar.
    ///
    /// # Returns
    /// The value itself for `Scalar` and the mean over the replicas for `PerReplica`.
    pub fn mean(&self) -> f32 {
        match self {
            Loss::Scalar(loss) => *loss,
            Loss::PerReplica(losses) => losses.iter().sum::<f32>() / losses.len() as f32,
        }
    }
}

/// The result of running a model over a batch.
#[derive(Debug, Clone)]
pub struct ModelOutput {
    pub output: Array2<f32>,
    pub loss: Loss,
}

/// A trainable model that owns its parameters and their gradient.
///
/// The model is called with both the inputs and the targets and returns the prediction together
/// with the loss, keeping whatever it needs from the forward pass to later run `backward`.
pub trait Model {
    /// Returns the amount of parameters in the model.
    fn size(&self) -> usize;

    /// Switches the model between training and evaluation mode. In evaluation mode the forward
    /// pass keeps nothing for a later `backward`.
    ///
    /// # Arguments
    /// * `training` - Whether the model should be in training mode.
    fn set_training(&mut self, training: bool);

    /// Returns whether the model is in training mode.
    fn is_training(&self) -> bool;

    /// Makes a forward pass through the model and computes the loss against the targets.
    ///
    /// # Arguments
    /// * `x` - The input batch, one sample per row.
    /// * `y` - The expected output batch, one sample per row.
    ///
    /// # Returns
    /// The prediction and the loss or an error if the shapes don't fit the model.
    fn forward(&mut self, x: ArrayView2<f32>, y: ArrayView2<f32>) -> Result<ModelOutput>;

    /// Clears the accumulated gradient.
    fn zero_grad(&mut self);

    /// Backpropagates the loss of the last training forward pass, accumulating into the gradient.
    ///
    /// # Returns
    /// An error if there was no training forward pass to backpropagate.
    fn backward(&mut self) -> Result<()>;

    /// Returns the model's parameters.
    fn params(&self) -> &[f32];

    /// Returns the model's accumulated gradient.
    fn grad(&self) -> &[f32];

    /// Returns the model's accumulated gradient.
    fn grad_mut(&mut self) -> &mut [f32];

    /// Splits the model into its parameters and gradient, to be handed to an optimizer.
    fn params_and_grad(&mut self) -> (&mut [f32], &[f32]);

    /// Returns a copy of the model's parameters as named tensors.
    fn state_dict(&self) -> StateDict;

    /// Overwrites the model's parameters with the ones in `state`.
    ///
    /// # Arguments
    /// * `state` - A state dict, as returned by `state_dict`.
    ///
    /// # Returns
    /// An error if an entry is missing or has the wrong shape.
    fn load_state_dict(&mut self, state: &StateDict) -> Result<()>;
}

/// Access to the model that actually holds the parameters, bypassing any execution wrapper.
pub trait RawModel {
    type Raw: Model;

    fn raw_model(&self) -> &Self::Raw;

    fn raw_model_mut(&mut self) -> &mut Self::Raw;
}
