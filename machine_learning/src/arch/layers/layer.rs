use ndarray::{Array2, ArrayView2};

use super::{Dense, Sigmoid};
use crate::Result;

#[derive(Clone, Debug)]
pub enum Layer {
    Dense(Dense),
    Sigmoid(Sigmoid),
}
use Layer::*;

impl Layer {
    pub fn dense(dim: (usize, usize)) -> Self {
        Self::Dense(Dense::new(dim))
    }

    pub fn sigmoid(amp: f32) -> Self {
        Self::Sigmoid(Sigmoid::new(amp))
    }

    /// Returns the amount of parameters this layer has.
    pub fn size(&self) -> usize {
        match self {
            Dense(l) => l.size(),
            Sigmoid(_) => 0,
        }
    }

    /// Returns the name and shape of each tensor this layer's parameters are made of, in the
    /// order they are laid out in the parameter slice.
    pub fn param_shapes(&self) -> Vec<(&'static str, Vec<usize>)> {
        match self {
            Dense(l) => {
                let (n, m) = l.dim();
                vec![("weight", vec![n, m]), ("bias", vec![m])]
            }
            Sigmoid(_) => Vec::new(),
        }
    }

    pub fn forward(&mut self, params: &[f32], x: ArrayView2<f32>) -> Result<Array2<f32>> {
        match self {
            Dense(l) => l.forward(params, x),
            Sigmoid(l) => Ok(l.forward(x)),
        }
    }

    pub fn backward(
        &mut self,
        params: &[f32],
        grad: &mut [f32],
        d: Array2<f32>,
    ) -> Result<Array2<f32>> {
        match self {
            Dense(l) => l.backward(params, grad, d),
            Sigmoid(l) => l.backward(d),
        }
    }
}
