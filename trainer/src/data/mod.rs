mod loader;
mod sampler;

pub use loader::{Batch, DataLoader, worker_pool};
pub use sampler::{DistributedSampler, RandomSampler, Sampler, shard_range};
