use std::{
    fmt,
    io::{self, Write},
    path::Path,
};

use log::{debug, info};
use machine_learning::{
    arch::{Model, ModelOutput, RawModel},
    dataset::Dataset,
    optimization::Optimizer,
};
use rayon::ThreadPool;

use crate::{
    checkpoint::Checkpoint,
    config::TrainerConfig,
    data::{Batch, DataLoader, DistributedSampler, RandomSampler, Sampler, worker_pool},
    error::{Result, TrainerErr},
    options::RunOptions,
};

/// The datasets a trainer iterates over.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Split {
    Train,
    Test,
}

impl fmt::Display for Split {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Split::Train => write!(f, "train"),
            Split::Test => write!(f, "test"),
        }
    }
}

/// How often progress is reported for an epoch of `num_batches` batches, roughly five times.
pub fn print_freq(num_batches: usize) -> usize {
    (num_batches / 5).max(1)
}

/// Formats the progress report of iteration `it` out of `num_batches`.
pub fn progress_line(epoch: usize, it: usize, num_batches: usize, running_loss: f32) -> String {
    format!(
        "Epoch: {epoch} | Iteration: {it} of {num_batches} | Loss (up to this point in this epoch): {running_loss}"
    )
}

fn mean(values: &[f32]) -> f32 {
    let sum: f64 = values.iter().map(|&v| f64::from(v)).sum();
    (sum / values.len() as f64) as f32
}

/// Drives the training of a model.
///
/// Each epoch walks the train dataset in batches, running the model forward, backpropagating
/// the loss and stepping the optimizer. Once every epoch ran, the test dataset, if any, is
/// evaluated once and the main process saves a checkpoint.
pub struct Trainer<M, O, D> {
    model: M,
    optimizer: O,
    train_dataset: D,
    test_dataset: Option<D>,
    config: TrainerConfig,
    sampler: Option<Sampler>,
    pool: Option<ThreadPool>,
    progress: Box<dyn Write + Send>,
    train_loss: Option<f32>,
    test_loss: Option<f32>,
}

impl<M, O, D> Trainer<M, O, D>
where
    M: Model + RawModel,
    O: Optimizer,
    D: Dataset,
{
    /// Creates a new `Trainer`.
    ///
    /// # Arguments
    /// * `model` - The model to train, possibly wrapped for parallel execution.
    /// * `optimizer` - The optimizer updating the model's parameters.
    /// * `train_dataset` - The dataset to train on.
    /// * `test_dataset` - The dataset to evaluate on after training, if any.
    /// * `config` - The training configuration.
    ///
    /// # Returns
    /// A new `Trainer` with no recorded losses.
    pub fn new(
        model: M,
        optimizer: O,
        train_dataset: D,
        test_dataset: Option<D>,
        config: TrainerConfig,
    ) -> Self {
        Self {
            model,
            optimizer,
            train_dataset,
            test_dataset,
            config,
            sampler: None,
            pool: None,
            progress: Box::new(io::stdout()),
            train_loss: None,
            test_loss: None,
        }
    }

    /// Sends the progress lines to `writer` instead of stdout.
    pub fn with_progress<W: Write + Send + 'static>(mut self, writer: W) -> Self {
        self.progress = Box::new(writer);
        self
    }

    pub fn model(&self) -> &M {
        &self.model
    }

    pub fn optimizer(&self) -> &O {
        &self.optimizer
    }

    pub fn config(&self) -> &TrainerConfig {
        &self.config
    }

    /// Returns the loss of the last train epoch, if any ran.
    pub fn train_loss(&self) -> Option<f32> {
        self.train_loss
    }

    /// Returns the loss of the test pass, if it ran.
    pub fn test_loss(&self) -> Option<f32> {
        self.test_loss
    }

    /// Gives the model and the optimizer back.
    pub fn into_parts(self) -> (M, O) {
        (self.model, self.optimizer)
    }

    /// Runs the whole training.
    ///
    /// Trains for `max_epochs` epochs, evaluates the test dataset once if there's one and,
    /// on rank 0, saves the final checkpoint.
    ///
    /// # Arguments
    /// * `opts` - The process this trainer runs in.
    ///
    /// # Errors
    /// Any failure loading data, running the model, stepping the optimizer or saving the
    /// checkpoint stops the run.
    pub fn train(&mut self, opts: &RunOptions) -> Result<()> {
        if opts.is_distributed() {
            let seed = self.config.seed().unwrap_or(0);
            let sampler = DistributedSampler::new(opts.rank(), opts.world_size(), seed);
            self.sampler = Some(Sampler::Distributed(sampler));
        } else if matches!(self.sampler, Some(Sampler::Distributed(_))) {
            self.sampler = None;
        }

        let max_epochs = self.config.max_epochs();

        info!(
            rank = opts.rank(),
            world_size = opts.world_size().get(),
            params = self.model.size();
            "training for {max_epochs} epoch(s)"
        );

        for epoch in 0..max_epochs {
            self.run_epoch(Split::Train, epoch)?;
        }

        if self.test_dataset.is_some() {
            self.run_epoch(Split::Test, max_epochs)?;
        }

        if !opts.is_main_process() {
            debug!(rank = opts.rank(); "not the main process, skipping checkpoint");
            return Ok(());
        }

        self.save_checkpoint()?;
        info!("training finished");
        Ok(())
    }

    /// Walks one split of the data once.
    ///
    /// The train split runs the model in training mode and steps the optimizer after every
    /// batch. The test split runs it in evaluation mode and only measures the loss.
    ///
    /// # Arguments
    /// * `split` - Which dataset to walk.
    /// * `epoch` - The epoch number, used for reporting and to reseed the distributed sampler.
    ///
    /// # Returns
    /// The mean loss over the split's batches, which is also recorded as the split's loss.
    pub fn run_epoch(&mut self, split: Split, epoch: usize) -> Result<f32> {
        if self.pool.is_none() {
            self.pool = worker_pool(self.config.num_workers())?;
        }

        let Self {
            model,
            optimizer,
            train_dataset,
            test_dataset,
            config,
            sampler,
            pool,
            progress,
            train_loss,
            test_loss,
        } = self;

        let dataset = match split {
            Split::Train => &*train_dataset,
            Split::Test => test_dataset.as_ref().ok_or(TrainerErr::MissingTestDataset)?,
        };

        let training = split == Split::Train;
        model.set_training(training);

        let sampler =
            sampler.get_or_insert_with(|| Sampler::Random(RandomSampler::new(config.seed())));
        let indices = sampler.epoch_indices(epoch, dataset.len());
        let loader = DataLoader::new(dataset, indices, config.batch_size(), pool.as_ref());
        let num_batches = loader.num_batches();

        if num_batches == 0 {
            return Err(TrainerErr::EmptySplit { split });
        }

        debug!("epoch {epoch}: {num_batches} {split} batch(es)");

        let print_freq = print_freq(num_batches);
        let mut losses = Vec::with_capacity(num_batches);

        for (it, batch) in loader.enumerate() {
            let Batch { x, y } = batch?;
            let ModelOutput { loss, .. } = model.forward(x.view(), y.view())?;
            losses.push(loss.mean());

            if training {
                model.zero_grad();
                model.backward()?;

                let (params, grad) = model.params_and_grad();
                optimizer.update_params(grad, params)?;
            }

            if it % print_freq == 0 {
                let line = progress_line(epoch, it, num_batches, mean(&losses));
                writeln!(progress, "{line}")?;
            }
        }

        progress.flush()?;
        let epoch_loss = mean(&losses);

        match split {
            Split::Train => *train_loss = Some(epoch_loss),
            Split::Test => *test_loss = Some(epoch_loss),
        }

        Ok(epoch_loss)
    }

    /// Saves the model's parameters, the optimizer's state and both losses to `ckpt_path`.
    ///
    /// Parallel wrappers are looked through, so the stored names are the same whether or not
    /// the model was replicated.
    ///
    /// # Errors
    /// Returns `TrainerErr::MissingCheckpointPath` if no `ckpt_path` was configured.
    pub fn save_checkpoint(&self) -> Result<()> {
        let path = self
            .config
            .ckpt_path()
            .ok_or(TrainerErr::MissingCheckpointPath)?;

        println!("Saving to: {}", path.display());

        Checkpoint::capture(
            self.model.raw_model(),
            &self.optimizer,
            self.train_loss,
            self.test_loss,
        )
        .save(path)
    }

    /// Restores the model, the optimizer and the recorded losses from a checkpoint.
    pub fn resume_from<P: AsRef<Path>>(&mut self, path: P) -> Result<()> {
        let path = path.as_ref();
        let ckpt = Checkpoint::load(path)?;
        ckpt.restore(self.model.raw_model_mut(), &mut self.optimizer)?;

        self.train_loss = ckpt.train_loss;
        self.test_loss = ckpt.test_loss;

        info!("resumed from {}", path.display());
        Ok(())
    }
}
