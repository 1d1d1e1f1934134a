use std::{num::NonZeroUsize, path::PathBuf};

use machine_learning::{
    arch::{init::WeightInit, layers::Layer, loss::Mse, Sequential},
    dataset::InMemoryDataset,
    optimization::{Adam, GradientDescent, GradientDescentWithMomentum, Optimizer},
};
use serde::{Deserialize, Serialize};

/// The specification for an activation layer following a dense one.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActFnSpec {
    Sigmoid { amp: f32 },
}

/// The specification for the `Layer` enum.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LayerSpec {
    Dense {
        dim: (usize, usize),
        act_fn: Option<ActFnSpec>,
    },
}

/// The specification for the `WeightInit` enum.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WeightInitSpec {
    Const {
        value: f32,
    },
    Uniform {
        low: f32,
        high: f32,
    },
    #[default]
    XavierUniform,
    LecunUniform,
}

/// The specification for the `Optimizer` trait.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OptimizerSpec {
    Adam {
        learning_rate: f32,
        beta1: f32,
        beta2: f32,
        epsilon: f32,
    },
    GradientDescent {
        learning_rate: f32,
    },
    GradientDescentWithMomentum {
        learning_rate: f32,
        momentum: f32,
    },
}

/// The specification for an `InMemoryDataset`.
#[derive(Debug, Serialize, Deserialize)]
pub struct DatasetSpec {
    pub data: Vec<f32>,
    pub x_size: usize,
    pub y_size: usize,
}

/// Everything the binary needs besides the trainer's own options.
#[derive(Debug, Serialize, Deserialize)]
pub struct RunSpec {
    pub layers: Vec<LayerSpec>,
    pub optimizer: OptimizerSpec,
    #[serde(default)]
    pub init: WeightInitSpec,
    pub replicas: Option<NonZeroUsize>,
    pub train_data: DatasetSpec,
    pub test_data: Option<DatasetSpec>,
    pub resume_from: Option<PathBuf>,
}

impl LayerSpec {
    fn layers(self) -> Vec<Layer> {
        let LayerSpec::Dense { dim, act_fn } = self;
        let mut layers = vec![Layer::dense(dim)];

        if let Some(ActFnSpec::Sigmoid { amp }) = act_fn {
            layers.push(Layer::sigmoid(amp));
        }

        layers
    }
}

impl From<WeightInitSpec> for WeightInit {
    fn from(spec: WeightInitSpec) -> Self {
        match spec {
            WeightInitSpec::Const { value } => WeightInit::Constant(value),
            WeightInitSpec::Uniform { low, high } => WeightInit::Uniform { low, high },
            WeightInitSpec::XavierUniform => WeightInit::XavierUniform,
            WeightInitSpec::LecunUniform => WeightInit::LecunUniform,
        }
    }
}

impl OptimizerSpec {
    /// Builds the optimizer for a model of `len` parameters.
    pub fn build(self, len: usize) -> Box<dyn Optimizer + Send> {
        match self {
            OptimizerSpec::Adam {
                learning_rate,
                beta1,
                beta2,
                epsilon,
            } => Box::new(Adam::new(len, learning_rate, beta1, beta2, epsilon)),
            OptimizerSpec::GradientDescent { learning_rate } => {
                Box::new(GradientDescent::new(learning_rate))
            }
            OptimizerSpec::GradientDescentWithMomentum {
                learning_rate,
                momentum,
            } => Box::new(GradientDescentWithMomentum::new(len, learning_rate, momentum)),
        }
    }
}

impl DatasetSpec {
    pub fn build(self) -> machine_learning::Result<InMemoryDataset> {
        InMemoryDataset::new(self.data, self.x_size, self.y_size)
    }
}

/// Builds a sequential model out of its layers, with every parameter set to zero.
pub fn sequential(layers: &[LayerSpec]) -> Sequential<Mse> {
    let layers = layers.iter().flat_map(|spec| spec.layers());
    Sequential::new(layers, Mse::new())
}
