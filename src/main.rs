use std::{env, path::Path};

use anyhow::{Context, Result};
use log::info;
use machine_learning::{
    arch::{DataParallel, Model, RawModel},
    dataset::InMemoryDataset,
    optimization::Optimizer,
};
use rand::{rngs::StdRng, SeedableRng};
use trainer::{RunOptions, Trainer, TrainerConfig};

mod specs;

use specs::{DatasetSpec, RunSpec};

fn main() -> Result<()> {
    env_logger::init();

    let path = env::args()
        .nth(1)
        .or_else(|| env::var("CONFIG").ok())
        .context("usage: minitrain <config.json> (or set CONFIG)")?;

    let config = TrainerConfig::from_json_file(&path)
        .with_context(|| format!("failed to load config from {path}"))?;
    let opts = RunOptions::from_env()?;
    let RunSpec {
        layers,
        optimizer,
        init,
        replicas,
        train_data,
        test_data,
        resume_from,
    } = config
        .extra_as::<RunSpec>()
        .context("invalid model setup")?;

    info!(
        "rank {} of {}, distributed: {}",
        opts.rank(),
        opts.world_size(),
        opts.is_distributed()
    );

    let mut rng = match config.seed() {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_os_rng(),
    };

    let mut model = specs::sequential(&layers);
    model.init(init.into(), &mut rng)?;

    let optimizer = optimizer.build(model.size());
    let train_dataset = train_data.build()?;
    let test_dataset = test_data.map(DatasetSpec::build).transpose()?;
    let resume_from = resume_from.as_deref();

    match replicas {
        Some(replicas) if replicas.get() > 1 => {
            let model = DataParallel::new(model, replicas);
            let trainer = Trainer::new(model, optimizer, train_dataset, test_dataset, config);
            run(trainer, &opts, resume_from)
        }
        _ => {
            let trainer = Trainer::new(model, optimizer, train_dataset, test_dataset, config);
            run(trainer, &opts, resume_from)
        }
    }
}

fn run<M, O>(
    mut trainer: Trainer<M, O, InMemoryDataset>,
    opts: &RunOptions,
    resume_from: Option<&Path>,
) -> Result<()>
where
    M: Model + RawModel,
    O: Optimizer,
{
    if let Some(path) = resume_from {
        trainer
            .resume_from(path)
            .with_context(|| format!("failed to resume from {}", path.display()))?;
    }

    trainer.train(opts)?;

    info!(
        "final losses: train {:?}, test {:?}",
        trainer.train_loss(),
        trainer.test_loss()
    );

    Ok(())
}
