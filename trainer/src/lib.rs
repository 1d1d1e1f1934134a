mod checkpoint;
mod config;
pub mod data;
mod error;
mod options;
mod trainer;

pub use checkpoint::Checkpoint;
pub use config::TrainerConfig;
pub use error::{Result, TrainerErr};
pub use options::RunOptions;
pub use trainer::{Split, Trainer, print_freq, progress_line};
