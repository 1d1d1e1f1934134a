use std::{env, num::NonZeroUsize};

use crate::error::{Result, TrainerErr};

/// Describes the process the trainer runs in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunOptions {
    distributed: bool,
    rank: usize,
    world_size: NonZeroUsize,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self::single()
    }
}

impl RunOptions {
    /// A lone, non-distributed process.
    pub fn single() -> Self {
        Self {
            distributed: false,
            rank: 0,
            world_size: NonZeroUsize::MIN,
        }
    }

    /// One process out of `world_size` cooperating ones.
    ///
    /// # Arguments
    /// * `rank` - This process' index, in `0..world_size`.
    /// * `world_size` - The amount of processes taking part in the run.
    ///
    /// # Returns
    /// The options or an error if `rank` is out of range.
    pub fn distributed(rank: usize, world_size: NonZeroUsize) -> Result<Self> {
        if rank >= world_size.get() {
            return Err(TrainerErr::InvalidConfig(format!(
                "rank {rank} is out of range for a world of size {world_size}"
            )));
        }

        Ok(Self {
            distributed: true,
            rank,
            world_size,
        })
    }

    /// Reads the options from the `RANK` and `WORLD_SIZE` environment variables.
    ///
    /// A missing `WORLD_SIZE`, or one equal to 1, means a single process run.
    pub fn from_env() -> Result<Self> {
        let Ok(world_size) = env::var("WORLD_SIZE") else {
            return Ok(Self::single());
        };

        let world_size: NonZeroUsize = world_size
            .trim()
            .parse()
            .map_err(|e| TrainerErr::InvalidConfig(format!("WORLD_SIZE: {e}")))?;

        if world_size.get() == 1 {
            return Ok(Self::single());
        }

        let rank = env::var("RANK")
            .map_err(|e| TrainerErr::InvalidConfig(format!("RANK: {e}")))?
            .trim()
            .parse()
            .map_err(|e| TrainerErr::InvalidConfig(format!("RANK: {e}")))?;

        Self::distributed(rank, world_size)
    }

    pub fn is_distributed(&self) -> bool {
        self.distributed
    }

    pub fn rank(&self) -> usize {
        self.rank
    }

    pub fn world_size(&self) -> NonZeroUsize {
        self.world_size
    }

    /// Whether this process is the one in charge of side effects such as saving checkpoints.
    pub fn is_main_process(&self) -> bool {
        self.rank == 0
    }
}
