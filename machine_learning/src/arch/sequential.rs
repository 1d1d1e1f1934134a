use ndarray::{Array2, ArrayD, ArrayView2, IxDyn};
use rand::Rng;

use super::{
    Loss, Model, ModelOutput, RawModel, StateDict, init::WeightInit, layers::Layer, loss::LossFn,
};
use crate::{MlErr, Result};

/// A sequential model: information flows forward when computing an output and backward when
/// computing the *deltas* of its layers.
///
/// The model owns a single flat parameter buffer and a gradient buffer of the same size, each
/// layer reading its own contiguous slice of them.
#[derive(Clone, Debug)]
pub struct Sequential<L> {
    layers: Vec<Layer>,
    loss_fn: L,
    params: Vec<f32>,
    grad: Vec<f32>,
    training: bool,

    // Delta of the last training forward pass, consumed by `backward`.
    d_out: Option<Array2<f32>>,
}

impl<L: LossFn> Sequential<L> {
    /// Creates a new `Sequential` with every parameter set to zero.
    ///
    /// # Arguments
    /// * `layers` - The layers the sequential is composed of.
    /// * `loss_fn` - The loss function the forward pass is measured with.
    ///
    /// # Returns
    /// A new `Sequential` instance, in training mode.
    pub fn new<I>(layers: I, loss_fn: L) -> Self
    where
        I: IntoIterator<Item = Layer>,
    {
        let layers: Vec<Layer> = layers.into_iter().collect();
        let size = layers.iter().map(Layer::size).sum();

        Self {
            layers,
            loss_fn,
            params: vec![0.; size],
            grad: vec![0.; size],
            training: true,
            d_out: None,
        }
    }

    /// Replaces the parameters of the model.
    ///
    /// # Arguments
    /// * `params` - The new flat parameter buffer.
    ///
    /// # Returns
    /// The model or an error if `params` doesn't have exactly `size()` elements.
    pub fn with_params(mut self, params: Vec<f32>) -> Result<Self> {
        if params.len() != self.params.len() {
            return Err(MlErr::SizeMismatch {
                what: "sequential parameters",
                got: params.len(),
                expected: self.params.len(),
            });
        }

        self.params = params;
        Ok(self)
    }

    /// Initializes the weights of every dense layer following `init`, biases are set to zero.
    ///
    /// # Arguments
    /// * `init` - The initialization scheme.
    /// * `rng` - The random number generator to sample from.
    pub fn init<R: Rng>(&mut self, init: WeightInit, rng: &mut R) -> Result<()> {
        let mut offset = 0;

        for layer in &self.layers {
            for (name, shape) in layer.param_shapes() {
                let len: usize = shape.iter().product();
                let chunk = &mut self.params[offset..offset + len];

                if name == "weight" {
                    init.fill(rng, shape[0], shape[1], chunk)
                        .map_err(|_| MlErr::InvalidInput("invalid weight initialization range"))?;
                } else {
                    chunk.fill(0.);
                }

                offset += len;
            }
        }

        Ok(())
    }

    /// Returns the layers of the model.
    pub fn layers(&self) -> &[Layer] {
        &self.layers
    }

    /// Computes the model's prediction without measuring any loss.
    ///
    /// # Arguments
    /// * `x` - The input batch.
    ///
    /// # Returns
    /// The prediction for the given input or an error if occurred.
    pub fn predict(&mut self, x: ArrayView2<f32>) -> Result<Array2<f32>> {
        let Self { layers, params, .. } = self;
        let mut a = x.to_owned();
        let mut offset = 0;

        for layer in layers.iter_mut() {
            let size = layer.size();
            a = layer.forward(&params[offset..offset + size], a.view())?;
            offset += size;
        }

        Ok(a)
    }

    /// Iterates the named tensors of the model along with their shape and offset in the
    /// parameter buffer.
    fn named_params(&self) -> Vec<(String, Vec<usize>, usize)> {
        let mut named = Vec::new();
        let mut offset = 0;

        for (i, layer) in self.layers.iter().enumerate() {
            for (name, shape) in layer.param_shapes() {
                let len = shape.iter().product::<usize>();
                named.push((format!("layers.{i}.{name}"), shape, offset));
                offset += len;
            }
        }

        named
    }
}

impl<L: LossFn> Model for Sequential<L> {
    fn size(&self) -> usize {
        self.params.len()
    }

    fn set_training(&mut self, training: bool) {
        self.training = training;

        if !training {
            self.d_out = None;
        }
    }

    fn is_training(&self) -> bool {
        self.training
    }

    fn forward(&mut self, x: ArrayView2<f32>, y: ArrayView2<f32>) -> Result<ModelOutput> {
        let y_pred = self.predict(x)?;

        if y_pred.dim() != y.dim() {
            return Err(MlErr::SizeMismatch {
                what: "targets",
                got: y.len(),
                expected: y_pred.len(),
            });
        }

        let loss = self.loss_fn.loss(y_pred.view(), y);

        if self.training {
            self.d_out = Some(self.loss_fn.loss_prime(y_pred.view(), y));
        }

        Ok(ModelOutput {
            output: y_pred,
            loss: Loss::Scalar(loss),
        })
    }

    fn zero_grad(&mut self) {
        self.grad.fill(0.);
    }

    fn backward(&mut self) -> Result<()> {
        let mut d = self.d_out.take().ok_or(MlErr::InvalidInput(
            "backward called without a training forward pass",
        ))?;

        let Self {
            layers,
            params,
            grad,
            ..
        } = self;
        let mut end = params.len();

        for layer in layers.iter_mut().rev() {
            let start = end - layer.size();
            d = layer.backward(&params[start..end], &mut grad[start..end], d)?;
            end = start;
        }

        Ok(())
    }

    fn params(&self) -> &[f32] {
        &self.params
    }

    fn grad(&self) -> &[f32] {
        &self.grad
    }

    fn grad_mut(&mut self) -> &mut [f32] {
        &mut self.grad
    }

    fn params_and_grad(&mut self) -> (&mut [f32], &[f32]) {
        (&mut self.params, &self.grad)
    }

    fn state_dict(&self) -> StateDict {
        self.named_params()
            .into_iter()
            .map(|(name, shape, offset)| {
                let len = shape.iter().product::<usize>();
                let data = self.params[offset..offset + len].to_vec();

                let tensor = ArrayD::from_shape_vec(IxDyn(&shape), data)
                    .expect("shape product equals len");
                (name, tensor)
            })
            .collect()
    }

    fn load_state_dict(&mut self, state: &StateDict) -> Result<()> {
        for (name, shape, offset) in self.named_params() {
            let tensor = state
                .get(&name)
                .ok_or_else(|| MlErr::MissingParam(name.clone()))?;

            if tensor.shape() != shape.as_slice() {
                return Err(MlErr::StateMismatch {
                    expected: format!("{name} with shape {shape:?}"),
                    got: format!("{name} with shape {:?}", tensor.shape()),
                });
            }

            let len = tensor.len();
            for (p, v) in self.params[offset..offset + len].iter_mut().zip(tensor.iter()) {
                *p = *v;
            }
        }

        Ok(())
    }
}

impl<L: LossFn> RawModel for Sequential<L> {
    type Raw = Self;

    fn raw_model(&self) -> &Self::Raw {
        self
    }

    fn raw_model_mut(&mut self) -> &mut Self::Raw {
        self
    }
}
