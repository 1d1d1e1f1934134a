use std::{
    collections::{BTreeMap, HashMap},
    ffi::OsString,
    fs,
    path::{Path, PathBuf},
};

use log::info;
use machine_learning::{
    MlErr,
    arch::{Model, StateDict},
    optimization::{Optimizer, OptimizerState},
};
use ndarray::{ArrayD, IxDyn};
use safetensors::{
    SafeTensors,
    tensor::{Dtype, TensorView, serialize},
};

use crate::error::{Result, TrainerErr};

const MODEL_PREFIX: &str = "model_state_dict.";
const OPTIMIZER_PREFIX: &str = "optimizer_state_dict.";
const OPTIMIZER_KEY: &str = "optimizer_state_dict";
const TRAIN_LOSS_KEY: &str = "train_loss";
const TEST_LOSS_KEY: &str = "test_loss";

/// Everything a training run leaves behind.
///
/// On disk a checkpoint is a single safetensors file. Model parameters are stored as
/// `model_state_dict.<name>` tensors and optimizer buffers as `optimizer_state_dict.<name>`
/// tensors, while the optimizer's scalars and both losses travel as JSON in the file's metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct Checkpoint {
    pub model_state_dict: StateDict,
    pub optimizer_state_dict: OptimizerState,
    pub train_loss: Option<f32>,
    pub test_loss: Option<f32>,
}

impl Checkpoint {
    /// Snapshots a model and its optimizer.
    ///
    /// # Arguments
    /// * `model` - The model holding the parameters, not a wrapper around it.
    /// * `optimizer` - The optimizer updating `model`.
    /// * `train_loss` - The last train epoch's loss.
    /// * `test_loss` - The test pass' loss.
    pub fn capture<M, O>(
        model: &M,
        optimizer: &O,
        train_loss: Option<f32>,
        test_loss: Option<f32>,
    ) -> Self
    where
        M: Model + ?Sized,
        O: Optimizer + ?Sized,
    {
        Self {
            model_state_dict: model.state_dict(),
            optimizer_state_dict: optimizer.state_dict(),
            train_loss,
            test_loss,
        }
    }

    /// Serializes the checkpoint in the safetensors format.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut tensors: Vec<(String, Vec<usize>, Vec<f32>)> = Vec::new();

        for (name, tensor) in &self.model_state_dict {
            let data = tensor.iter().copied().collect();
            tensors.push((format!("{MODEL_PREFIX}{name}"), tensor.shape().to_vec(), data));
        }

        for (name, buffer) in &self.optimizer_state_dict.buffers {
            tensors.push((
                format!("{OPTIMIZER_PREFIX}{name}"),
                vec![buffer.len()],
                buffer.clone(),
            ));
        }

        let views = tensors
            .iter()
            .map(|(name, shape, data)| {
                let bytes: &[u8] = bytemuck::cast_slice(data);
                TensorView::new(Dtype::F32, shape.clone(), bytes).map(|view| (name.as_str(), view))
            })
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let metadata = HashMap::from([
            (
                OPTIMIZER_KEY.to_string(),
                serde_json::to_string(&self.optimizer_state_dict)?,
            ),
            (
                TRAIN_LOSS_KEY.to_string(),
                serde_json::to_string(&self.train_loss)?,
            ),
            (
                TEST_LOSS_KEY.to_string(),
                serde_json::to_string(&self.test_loss)?,
            ),
        ]);

        Ok(serialize(views, &Some(metadata))?)
    }

    /// Writes the checkpoint to `path`.
    ///
    /// The bytes go to a sibling temporary file first, which is then renamed over `path`, so a
    /// reader never observes a partially written checkpoint.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let bytes = self.to_bytes()?;
        let tmp = tmp_path(path);

        fs::write(&tmp, &bytes)?;
        fs::rename(&tmp, path)?;

        info!(bytes = bytes.len(); "checkpoint written to {}", path.display());
        Ok(())
    }

    /// Parses a checkpoint out of safetensors bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let (_, metadata) = SafeTensors::read_metadata(bytes)?;
        let metadata = metadata.metadata().clone().unwrap_or_default();

        let entry = |key: &str| {
            metadata
                .get(key)
                .ok_or_else(|| TrainerErr::CorruptCheckpoint(format!("missing `{key}` metadata")))
        };

        let mut optimizer_state_dict: OptimizerState =
            serde_json::from_str(entry(OPTIMIZER_KEY)?)?;
        let train_loss = serde_json::from_str(entry(TRAIN_LOSS_KEY)?)?;
        let test_loss = serde_json::from_str(entry(TEST_LOSS_KEY)?)?;

        let mut model_state_dict = BTreeMap::new();

        for (name, view) in SafeTensors::deserialize(bytes)?.tensors() {
            if view.dtype() != Dtype::F32 {
                return Err(TrainerErr::CorruptCheckpoint(format!(
                    "tensor `{name}` is {:?}, expected F32",
                    view.dtype()
                )));
            }

            let data: Vec<f32> = bytemuck::pod_collect_to_vec(view.data());

            if let Some(param) = name.strip_prefix(MODEL_PREFIX) {
                let tensor = ArrayD::from_shape_vec(IxDyn(view.shape()), data).map_err(MlErr::from)?;
                model_state_dict.insert(param.to_string(), tensor);
            } else if let Some(buffer) = name.strip_prefix(OPTIMIZER_PREFIX) {
                optimizer_state_dict.buffers.insert(buffer.to_string(), data);
            } else {
                return Err(TrainerErr::CorruptCheckpoint(format!(
                    "unexpected tensor `{name}`"
                )));
            }
        }

        Ok(Self {
            model_state_dict,
            optimizer_state_dict,
            train_loss,
            test_loss,
        })
    }

    /// Reads a checkpoint from `path`.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let bytes = fs::read(path)?;
        Self::from_bytes(&bytes)
    }

    /// Loads the stored parameters and optimizer state into `model` and `optimizer`.
    ///
    /// `model` must be the model holding the parameters, the stored names carry no wrapper
    /// prefix.
    pub fn restore<M, O>(&self, model: &mut M, optimizer: &mut O) -> Result<()>
    where
        M: Model + ?Sized,
        O: Optimizer + ?Sized,
    {
        model.load_state_dict(&self.model_state_dict)?;
        optimizer.load_state_dict(&self.optimizer_state_dict)?;
        Ok(())
    }
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|name| name.to_os_string())
        .unwrap_or_else(|| OsString::from("checkpoint"));

    name.push(".tmp");
    path.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use machine_learning::{
        arch::{Sequential, layers::Layer, loss::Mse},
        optimization::{Adam, GradientDescent},
    };

    use super::*;

    fn model() -> Sequential<Mse> {
        Sequential::new([Layer::dense((2, 1)), Layer::sigmoid(1.0)], Mse::new())
            .with_params(vec![0.1, -0.2, 0.3])
            .unwrap()
    }

    #[test]
    fn bytes_round_trip() {
        let model = model();
        let optimizer = Adam::new(model.size(), 0.01, 0.9, 0.999, 1e-8);
        let ckpt = Checkpoint::capture(&model, &optimizer, Some(0.5), None);

        let parsed = Checkpoint::from_bytes(&ckpt.to_bytes().unwrap()).unwrap();
        assert_eq!(parsed, ckpt);
        assert_eq!(parsed.test_loss, None);
    }

    #[test]
    fn tensors_are_namespaced() {
        let model = model();
        let ckpt = Checkpoint::capture(&model, &GradientDescent::new(0.1), None, None);
        let bytes = ckpt.to_bytes().unwrap();
        let st = SafeTensors::deserialize(&bytes).unwrap();

        let mut names = st.names();
        names.sort();
        assert_eq!(
            names,
            ["model_state_dict.layers.0.bias", "model_state_dict.layers.0.weight"]
        );
        assert_eq!(st.tensor("model_state_dict.layers.0.weight").unwrap().shape(), [2, 1]);
    }

    #[test]
    fn foreign_tensors_are_rejected() {
        let data = [1f32];
        let view = TensorView::new(Dtype::F32, vec![1], bytemuck::cast_slice(&data)).unwrap();
        let metadata = HashMap::from([
            (OPTIMIZER_KEY.to_string(), r#"{"kind":"gradient_descent","scalars":{}}"#.to_string()),
            (TRAIN_LOSS_KEY.to_string(), "null".to_string()),
            (TEST_LOSS_KEY.to_string(), "null".to_string()),
        ]);
        let bytes = serialize([("stray", view)], &Some(metadata)).unwrap();

        assert!(matches!(
            Checkpoint::from_bytes(&bytes),
            Err(TrainerErr::CorruptCheckpoint(_))
        ));
    }

    #[test]
    fn tmp_file_sits_next_to_the_target() {
        assert_eq!(
            tmp_path(Path::new("/ckpt/model.safetensors")),
            Path::new("/ckpt/model.safetensors.tmp")
        );
    }
}
