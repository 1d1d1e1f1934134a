use std::num::NonZeroUsize;

use log::debug;
use ndarray::{ArrayView2, Axis, concatenate};
use rayon::prelude::*;

use super::{Loss, Model, ModelOutput, RawModel, StateDict};
use crate::{MlErr, Result};

const MODULE_PREFIX: &str = "module.";

/// Runs a model over several replicas at once, scattering every batch across them.
///
/// Before each forward pass the replicas are synced with the wrapped module's parameters, the
/// batch is split row-wise in contiguous chunks and every replica processes one chunk in
/// parallel. The loss is reported per replica and the backward pass averages the replicas'
/// gradients into the wrapped module, so optimizers only ever see the module's buffers.
#[derive(Debug)]
pub struct DataParallel<M> {
    module: M,
    replicas: Vec<M>,
    active: usize,
}

impl<M: Model + Clone> DataParallel<M> {
    /// Creates a new `DataParallel`.
    ///
    /// # Arguments
    /// * `module` - The model to replicate.
    /// * `nreplicas` - The amount of replicas to scatter each batch across.
    ///
    /// # Returns
    /// A new `DataParallel` instance.
    pub fn new(module: M, nreplicas: NonZeroUsize) -> Self {
        let replicas = (0..nreplicas.get()).map(|_| module.clone()).collect();

        Self {
            module,
            replicas,
            active: 0,
        }
    }
}

impl<M> DataParallel<M> {
    /// Returns the amount of replicas.
    pub fn nreplicas(&self) -> usize {
        self.replicas.len()
    }

    /// Unwraps the inner module.
    pub fn into_inner(self) -> M {
        self.module
    }
}

impl<M: Model + Send> Model for DataParallel<M> {
    fn size(&self) -> usize {
        self.module.size()
    }

    fn set_training(&mut self, training: bool) {
        self.module.set_training(training);

        for replica in &mut self.replicas {
            replica.set_training(training);
        }
    }

    fn is_training(&self) -> bool {
        self.module.is_training()
    }

    fn forward(&mut self, x: ArrayView2<f32>, y: ArrayView2<f32>) -> Result<ModelOutput> {
        let rows = x.nrows();

        if rows == 0 {
            return Err(MlErr::InvalidInput("cannot scatter an empty batch"));
        }

        if y.nrows() != rows {
            return Err(MlErr::SizeMismatch {
                what: "target rows",
                got: y.nrows(),
                expected: rows,
            });
        }

        let chunk = rows.div_ceil(self.replicas.len());
        let xs: Vec<_> = x.axis_chunks_iter(Axis(0), chunk).collect();
        let ys: Vec<_> = y.axis_chunks_iter(Axis(0), chunk).collect();
        let used = xs.len();

        let params = self.module.params();
        let training = self.module.is_training();

        for replica in &mut self.replicas[..used] {
            replica.params_and_grad().0.copy_from_slice(params);
            replica.set_training(training);
        }

        let outputs = self.replicas[..used]
            .par_iter_mut()
            .zip(xs.into_par_iter().zip(ys))
            .map(|(replica, (x, y))| replica.forward(x, y))
            .collect::<Result<Vec<_>>>()?;

        debug!("scattered a batch of {rows} rows across {used} replica(s)");
        self.active = used;

        let views: Vec<_> = outputs.iter().map(|out| out.output.view()).collect();
        let output = concatenate(Axis(0), &views)?;
        let losses = outputs.iter().map(|out| out.loss.mean()).collect();

        Ok(ModelOutput {
            output,
            loss: Loss::PerReplica(losses),
        })
    }

    fn zero_grad(&mut self) {
        self.module.zero_grad();
    }

    fn backward(&mut self) -> Result<()> {
        let active = self.active;

        if active == 0 {
            return Err(MlErr::InvalidInput(
                "backward called without a training forward pass",
            ));
        }

        self.replicas[..active]
            .par_iter_mut()
            .map(|replica| {
                replica.zero_grad();
                replica.backward()
            })
            .collect::<Result<()>>()?;

        self.active = 0;

        let scale = 1. / active as f32;
        let grad = self.module.grad_mut();

        for replica in &self.replicas[..active] {
            for (g, rg) in grad.iter_mut().zip(replica.grad()) {
                *g += scale * rg;
            }
        }

        Ok(())
    }

    fn params(&self) -> &[f32] {
        self.module.params()
    }

    fn grad(&self) -> &[f32] {
        self.module.grad()
    }

    fn grad_mut(&mut self) -> &mut [f32] {
        self.module.grad_mut()
    }

    fn params_and_grad(&mut self) -> (&mut [f32], &[f32]) {
        self.module.params_and_grad()
    }

    fn state_dict(&self) -> StateDict {
        self.module
            .state_dict()
            .into_iter()
            .map(|(name, tensor)| (format!("{MODULE_PREFIX}{name}"), tensor))
            .collect()
    }

    fn load_state_dict(&mut self, state: &StateDict) -> Result<()> {
        let inner = state
            .iter()
            .map(|(name, tensor)| {
                let name = name.strip_prefix(MODULE_PREFIX).unwrap_or(name);
                (name.to_string(), tensor.clone())
            })
            .collect();

        self.module.load_state_dict(&inner)
    }
}

impl<M: Model + Send> RawModel for DataParallel<M> {
    type Raw = M;

    fn raw_model(&self) -> &Self::Raw {
        &self.module
    }

    fn raw_model_mut(&mut self) -> &mut Self::Raw {
        &mut self.module
    }
}

#[cfg(test)]
mod tests {
    use ndarray::array;

    use super::*;
    use crate::arch::{Sequential, layers::Layer, loss::Mse};

    fn linear() -> Sequential<Mse> {
        Sequential::new([Layer::dense((1, 1))], Mse)
            .with_params(vec![2.0, 0.0])
            .unwrap()
    }

    #[test]
    fn forward_reports_one_loss_per_replica() {
        let mut model = DataParallel::new(linear(), NonZeroUsize::new(2).unwrap());
        let x = array![[1.0], [2.0], [3.0], [4.0]];
        let y = array![[2.0], [4.0], [6.0], [9.0]];

        let out = model.forward(x.view(), y.view()).unwrap();
        assert_eq!(out.output, array![[2.0], [4.0], [6.0], [8.0]]);
        assert_eq!(out.loss, Loss::PerReplica(vec![0.0, 0.5]));
        assert_eq!(out.loss.mean(), 0.25);
    }

    #[test]
    fn small_batches_use_fewer_replicas() {
        let mut model = DataParallel::new(linear(), NonZeroUsize::new(4).unwrap());
        let x = array![[1.0], [2.0]];
        let y = array![[2.0], [4.0]];

        let out = model.forward(x.view(), y.view()).unwrap();
        assert_eq!(out.loss, Loss::PerReplica(vec![0.0, 0.0]));
    }

    #[test]
    fn backward_averages_the_replica_gradients() {
        let mut parallel = DataParallel::new(linear(), NonZeroUsize::new(2).unwrap());
        let mut single = linear();
        let x = array![[1.0], [2.0]];
        let y = array![[0.0], [0.0]];

        parallel.forward(x.view(), y.view()).unwrap();
        parallel.zero_grad();
        parallel.backward().unwrap();

        // Each replica sees a single row, so the mean of their gradients matches the gradient
        // of the mean loss over the whole batch.
        single.forward(x.view(), y.view()).unwrap();
        single.zero_grad();
        single.backward().unwrap();

        assert_eq!(parallel.grad(), single.grad());
    }

    #[test]
    fn state_dict_is_prefixed_but_the_raw_model_is_not() {
        let model = DataParallel::new(linear(), NonZeroUsize::new(2).unwrap());

        assert!(model.state_dict().contains_key("module.layers.0.weight"));
        assert!(model.raw_model().state_dict().contains_key("layers.0.weight"));
    }

    #[test]
    fn loading_a_prefixed_state_dict_reaches_the_module() {
        let source = DataParallel::new(linear(), NonZeroUsize::new(2).unwrap());
        let mut target = DataParallel::new(
            Sequential::new([Layer::dense((1, 1))], Mse),
            NonZeroUsize::new(2).unwrap(),
        );

        target.load_state_dict(&source.state_dict()).unwrap();
        assert_eq!(target.params(), [2.0, 0.0]);
    }
}
