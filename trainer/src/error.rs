use std::{error::Error, fmt, io};

use machine_learning::MlErr;
use rayon::ThreadPoolBuildError;
use safetensors::SafeTensorError;

use crate::trainer::Split;

/// The trainer module's result type.
pub type Result<T> = std::result::Result<T, TrainerErr>;

/// Training runtime failures.
#[derive(Debug)]
pub enum TrainerErr {
    Ml(MlErr),
    Io(io::Error),
    Json(serde_json::Error),
    Safetensors(SafeTensorError),
    WorkerPool(ThreadPoolBuildError),
    MissingCheckpointPath,
    MissingTestDataset,
    InvalidConfig(String),
    EmptySplit { split: Split },
    CorruptCheckpoint(String),
}

impl fmt::Display for TrainerErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrainerErr::Ml(e) => write!(f, "machine learning error: {e}"),
            TrainerErr::Io(e) => write!(f, "io error: {e}"),
            TrainerErr::Json(e) => write!(f, "json error: {e}"),
            TrainerErr::Safetensors(e) => write!(f, "safetensors error: {e}"),
            TrainerErr::WorkerPool(e) => write!(f, "failed to spawn data loading workers: {e}"),
            TrainerErr::MissingCheckpointPath => {
                write!(f, "invalid checkpoint path: no ckpt_path was configured")
            }
            TrainerErr::MissingTestDataset => write!(f, "the trainer has no test dataset"),
            TrainerErr::InvalidConfig(msg) => write!(f, "invalid config: {msg}"),
            TrainerErr::EmptySplit { split } => {
                write!(f, "the {split} split produced no batches")
            }
            TrainerErr::CorruptCheckpoint(msg) => write!(f, "corrupt checkpoint: {msg}"),
        }
    }
}

impl Error for TrainerErr {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            TrainerErr::Ml(e) => Some(e),
            TrainerErr::Io(e) => Some(e),
            TrainerErr::Json(e) => Some(e),
            TrainerErr::Safetensors(e) => Some(e),
            TrainerErr::WorkerPool(e) => Some(e),
            _ => None,
        }
    }
}

impl From<MlErr> for TrainerErr {
    fn from(value: MlErr) -> Self {
        Self::Ml(value)
    }
}

impl From<io::Error> for TrainerErr {
    fn from(value: io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<serde_json::Error> for TrainerErr {
    fn from(value: serde_json::Error) -> Self {
        Self::Json(value)
    }
}

impl From<SafeTensorError> for TrainerErr {
    fn from(value: SafeTensorError) -> Self {
        Self::Safetensors(value)
    }
}

impl From<ThreadPoolBuildError> for TrainerErr {
    fn from(value: ThreadPoolBuildError) -> Self {
        Self::WorkerPool(value)
    }
}
