use std::{
    fs,
    io::{self, Write},
    num::NonZeroUsize,
    path::PathBuf,
    sync::{Arc, Mutex},
};

use machine_learning::{
    MlErr,
    arch::{Loss, Model, ModelOutput, RawModel, Sequential, StateDict, layers::Layer, loss::Mse},
    dataset::InMemoryDataset,
    optimization::{GradientDescent, Optimizer},
};
use ndarray::{Array2, ArrayView2};
use trainer::{Checkpoint, RunOptions, Split, Trainer, TrainerConfig, TrainerErr};

fn nz(n: usize) -> NonZeroUsize {
    NonZeroUsize::new(n).unwrap()
}

fn tmp_ckpt(name: &str) -> PathBuf {
    let path = std::env::temp_dir().join(format!(
        "minitrain-loop-{}-{name}.safetensors",
        std::process::id()
    ));
    let _ = fs::remove_file(&path);
    path
}

/// A model that records how it's driven; its loss is the amount of rows in the batch.
#[derive(Debug, Default)]
struct Counting {
    params: Vec<f32>,
    grad: Vec<f32>,
    training: bool,
    pending: bool,
    train_forwards: usize,
    eval_forwards: usize,
    backwards: usize,
    zero_grads: usize,
}

impl Counting {
    fn new() -> Self {
        Self {
            params: vec![0.; 2],
            grad: vec![1.; 2],
            ..Default::default()
        }
    }
}

impl Model for Counting {
    fn size(&self) -> usize {
        self.params.len()
    }

    fn set_training(&mut self, training: bool) {
        self.training = training;
    }

    fn is_training(&self) -> bool {
        self.training
    }

    fn forward(
        &mut self,
        x: ArrayView2<f32>,
        _y: ArrayView2<f32>,
    ) -> machine_learning::Result<ModelOutput> {
        if self.training {
            self.train_forwards += 1;
            self.pending = true;
        } else {
            self.eval_forwards += 1;
        }

        Ok(ModelOutput {
            output: Array2::zeros((x.nrows(), 1)),
            loss: Loss::Scalar(x.nrows() as f32),
        })
    }

    fn zero_grad(&mut self) {
        self.zero_grads += 1;
        self.grad.fill(0.);
    }

    fn backward(&mut self) -> machine_learning::Result<()> {
        if !self.pending {
            return Err(MlErr::InvalidInput("nothing to backpropagate"));
        }

        self.pending = false;
        self.backwards += 1;
        self.grad.fill(1.);
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
        StateDict::new()
    }

    fn load_state_dict(&mut self, _state: &StateDict) -> machine_learning::Result<()> {
        Ok(())
    }
}

impl RawModel for Counting {
    type Raw = Self;

    fn raw_model(&self) -> &Self {
        self
    }

    fn raw_model_mut(&mut self) -> &mut Self {
        self
    }
}

/// `n` samples with a single input and output each.
fn dataset(n: usize) -> InMemoryDataset {
    let data = (0..n).flat_map(|i| [i as f32, 0.]).collect();
    InMemoryDataset::new(data, 1, 1).unwrap()
}

/// Collects what a trainer prints.
#[derive(Debug, Clone, Default)]
struct SharedBuf(Arc<Mutex<Vec<u8>>>);

impl SharedBuf {
    fn lines(&self) -> Vec<String> {
        let bytes = self.0.lock().unwrap();
        String::from_utf8_lossy(&bytes).lines().map(String::from).collect()
    }
}

impl Write for SharedBuf {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

fn and_gate() -> InMemoryDataset {
    InMemoryDataset::new(
        vec![
            0., 0., 0., //
            0., 1., 0., //
            1., 0., 0., //
            1., 1., 1., //
        ],
        2,
        1,
    )
    .unwrap()
}

#[test]
fn every_batch_of_every_epoch_is_trained_on() {
    let path = tmp_ckpt("counting");
    let config = TrainerConfig::new()
        .with_max_epochs(nz(3))
        .with_batch_size(nz(2))
        .with_ckpt_path(&path);

    let mut trainer = Trainer::new(
        Counting::new(),
        GradientDescent::new(0.5),
        dataset(5),
        Some(dataset(3)),
        config,
    );
    trainer.train(&RunOptions::single()).unwrap();

    let model = trainer.model();
    assert_eq!(model.train_forwards, 9);
    assert_eq!(model.backwards, 9);
    assert_eq!(model.zero_grads, 9);
    assert_eq!(model.eval_forwards, 2);

    // one step of -0.5 * 1.0 per batch
    assert_eq!(model.params(), [-4.5, -4.5]);

    // batches of 2, 2 and 1 rows
    assert_eq!(trainer.train_loss(), Some(5. / 3.));
    // batches of 2 and 1 rows
    assert_eq!(trainer.test_loss(), Some(1.5));

    fs::remove_file(&path).unwrap();
}

#[test]
fn test_loss_stays_unset_without_a_test_dataset() {
    let path = tmp_ckpt("no-test");
    let config = TrainerConfig::new()
        .with_max_epochs(nz(1))
        .with_batch_size(nz(4))
        .with_ckpt_path(&path);

    let mut trainer = Trainer::new(
        Counting::new(),
        GradientDescent::new(0.1),
        dataset(4),
        None,
        config,
    );
    trainer.train(&RunOptions::single()).unwrap();

    assert_eq!(trainer.model().eval_forwards, 0);
    assert_eq!(trainer.test_loss(), None);

    let ckpt = Checkpoint::load(&path).unwrap();
    assert_eq!(ckpt.train_loss, Some(4.));
    assert_eq!(ckpt.test_loss, None);

    fs::remove_file(&path).unwrap();
}

#[test]
fn saving_without_a_checkpoint_path_fails() {
    let config = TrainerConfig::new().with_max_epochs(nz(1));
    let mut trainer = Trainer::new(
        Counting::new(),
        GradientDescent::new(0.1),
        dataset(2),
        None,
        config,
    );

    assert!(matches!(
        trainer.save_checkpoint(),
        Err(TrainerErr::MissingCheckpointPath)
    ));

    // training itself completes, only the final save fails
    assert!(matches!(
        trainer.train(&RunOptions::single()),
        Err(TrainerErr::MissingCheckpointPath)
    ));
    assert_eq!(trainer.train_loss(), Some(2.));
}

#[test]
fn testing_without_a_test_dataset_fails() {
    let mut trainer = Trainer::new(
        Counting::new(),
        GradientDescent::new(0.1),
        dataset(2),
        None,
        TrainerConfig::new(),
    );

    assert!(matches!(
        trainer.run_epoch(Split::Test, 0),
        Err(TrainerErr::MissingTestDataset)
    ));
}

#[test]
fn empty_splits_are_rejected() {
    let mut trainer = Trainer::new(
        Counting::new(),
        GradientDescent::new(0.1),
        dataset(0),
        None,
        TrainerConfig::new(),
    );

    assert!(matches!(
        trainer.run_epoch(Split::Train, 0),
        Err(TrainerErr::EmptySplit {
            split: Split::Train
        })
    ));
}

#[test]
fn test_pass_leaves_the_parameters_alone() {
    let model = Sequential::new([Layer::dense((2, 1)), Layer::sigmoid(1.)], Mse::new())
        .with_params(vec![0.3, -0.7, 0.1])
        .unwrap();
    let mut trainer = Trainer::new(
        model,
        GradientDescent::new(1.),
        and_gate(),
        Some(and_gate()),
        TrainerConfig::new().with_batch_size(nz(2)),
    );

    let loss = trainer.run_epoch(Split::Test, 0).unwrap();

    assert_eq!(trainer.model().params(), [0.3, -0.7, 0.1]);
    assert!(!trainer.model().is_training());
    assert_eq!(trainer.test_loss(), Some(loss));
    assert_eq!(trainer.train_loss(), None);
}

#[test]
fn end_to_end_run_with_parallel_loading() {
    let path = tmp_ckpt("end-to-end");
    let config = TrainerConfig::new()
        .with_max_epochs(nz(2))
        .with_batch_size(nz(2))
        .with_num_workers(2)
        .with_seed(42)
        .with_ckpt_path(&path);

    let model = Sequential::new([Layer::dense((2, 1)), Layer::sigmoid(1.)], Mse::new())
        .with_params(vec![0.5, 0.5, -0.5])
        .unwrap();
    let test = InMemoryDataset::new(vec![0., 0., 0., 1., 1., 1.], 2, 1).unwrap();

    let mut trainer = Trainer::new(model, GradientDescent::new(0.5), and_gate(), Some(test), config);
    trainer.train(&RunOptions::single()).unwrap();

    let train_loss = trainer.train_loss().unwrap();
    let test_loss = trainer.test_loss().unwrap();
    assert!(train_loss.is_finite() && train_loss > 0.);
    assert!(test_loss.is_finite() && test_loss > 0.);

    let ckpt = Checkpoint::load(&path).unwrap();
    assert_eq!(ckpt.train_loss, Some(train_loss));
    assert_eq!(ckpt.test_loss, Some(test_loss));
    assert_eq!(ckpt.optimizer_state_dict, trainer.optimizer().state_dict());
    assert_eq!(ckpt.model_state_dict, trainer.model().state_dict());

    fs::remove_file(&path).unwrap();
}

#[test]
fn progress_is_reported_for_every_split() {
    let path = tmp_ckpt("progress");
    let out = SharedBuf::default();
    let config = TrainerConfig::new()
        .with_max_epochs(nz(2))
        .with_batch_size(nz(2))
        .with_ckpt_path(&path);

    let mut trainer = Trainer::new(
        Counting::new(),
        GradientDescent::new(0.1),
        dataset(4),
        Some(dataset(2)),
        config,
    )
    .with_progress(out.clone());
    trainer.train(&RunOptions::single()).unwrap();

    assert_eq!(
        out.lines(),
        [
            "Epoch: 0 | Iteration: 0 of 2 | Loss (up to this point in this epoch): 2",
            "Epoch: 0 | Iteration: 1 of 2 | Loss (up to this point in this epoch): 2",
            "Epoch: 1 | Iteration: 0 of 2 | Loss (up to this point in this epoch): 2",
            "Epoch: 1 | Iteration: 1 of 2 | Loss (up to this point in this epoch): 2",
            "Epoch: 2 | Iteration: 0 of 1 | Loss (up to this point in this epoch): 2",
        ]
    );

    fs::remove_file(&path).unwrap();
}

#[test]
fn train_keeps_the_shuffling_sequence_of_earlier_epochs() {
    let path = tmp_ckpt("seeded");
    let build = || {
        let model = Sequential::new([Layer::dense((1, 1))], Mse::new())
            .with_params(vec![0.5, 0.1])
            .unwrap();
        let config = TrainerConfig::new()
            .with_max_epochs(nz(1))
            .with_batch_size(nz(1))
            .with_seed(9)
            .with_ckpt_path(&path);

        Trainer::new(model, GradientDescent::new(0.01), dataset(6), None, config)
            .with_progress(io::sink())
    };

    let mut stepped = build();
    stepped.run_epoch(Split::Train, 0).unwrap();
    stepped.run_epoch(Split::Train, 1).unwrap();

    // the second epoch must draw the next permutation, not restart the seeded sequence
    let mut resumed = build();
    resumed.run_epoch(Split::Train, 0).unwrap();
    resumed.train(&RunOptions::single()).unwrap();

    assert_eq!(resumed.model().params(), stepped.model().params());

    fs::remove_file(&path).unwrap();
}
