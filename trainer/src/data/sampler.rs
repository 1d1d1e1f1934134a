use std::{num::NonZeroUsize, ops::Range};

use rand::{SeedableRng, rngs::StdRng, seq::SliceRandom};

/// Splits `total` samples among `num_shards` and returns the range for `shard`.
///
/// Ranges are contiguous, disjoint and cover `0..total`, their sizes differ by at most 1.
pub fn shard_range(total: usize, shard: usize, num_shards: NonZeroUsize) -> Range<usize> {
    let num_shards = num_shards.get();
    let base = total / num_shards;
    let rem = total % num_shards;

    let start = shard * base + shard.min(rem);
    let extra = usize::from(shard < rem);

    start..start + base + extra
}

/// Yields every index of a dataset once, in random order.
#[derive(Debug, Clone)]
pub struct RandomSampler {
    rng: StdRng,
}

impl RandomSampler {
    /// Creates a new `RandomSampler`.
    ///
    /// # Arguments
    /// * `seed` - Makes the sequence of permutations reproducible, the OS entropy is used if
    ///   there's none.
    pub fn new(seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };

        Self { rng }
    }

    /// Returns a fresh permutation of `0..len`.
    pub fn indices(&mut self, len: usize) -> Vec<usize> {
        let mut indices: Vec<_> = (0..len).collect();
        indices.shuffle(&mut self.rng);
        indices
    }
}

/// Gives each process of a distributed run its own part of the dataset.
///
/// Every rank draws the same permutation, derived from `seed` and the current epoch, extends it
/// by wrapping around until its length is a multiple of the world size and keeps its contiguous
/// slice of it. All ranks get the same number of samples, so they run the same number of steps,
/// and together they cover the whole dataset. The few padding samples are seen twice in the
/// epoch, and the membership of each shard changes from one epoch to the next.
#[derive(Debug, Clone)]
pub struct DistributedSampler {
    rank: usize,
    world_size: NonZeroUsize,
    seed: u64,
    epoch: u64,
}

impl DistributedSampler {
    pub fn new(rank: usize, world_size: NonZeroUsize, seed: u64) -> Self {
        Self {
            rank,
            world_size,
            seed,
            epoch: 0,
        }
    }

    /// Reseeds the permutation for the given epoch.
    pub fn set_epoch(&mut self, epoch: usize) {
        self.epoch = epoch as u64;
    }

    pub fn epoch(&self) -> usize {
        self.epoch as usize
    }

    /// Returns this rank's shard of `0..len` for the current epoch.
    ///
    /// The shard holds `len.div_ceil(world_size)` indices, empty only if `len` is 0.
    pub fn indices(&self, len: usize) -> Vec<usize> {
        let mut rng = StdRng::seed_from_u64(self.seed.wrapping_add(self.epoch));
        let mut indices: Vec<_> = (0..len).collect();
        indices.shuffle(&mut rng);

        let total = len.div_ceil(self.world_size.get()) * self.world_size.get();
        let range = shard_range(total, self.rank, self.world_size);

        indices
            .iter()
            .cycle()
            .skip(range.start)
            .take(range.len())
            .copied()
            .collect()
    }
}

/// The order in which a trainer walks its datasets.
#[derive(Debug, Clone)]
pub enum Sampler {
    Random(RandomSampler),
    Distributed(DistributedSampler),
}

impl Sampler {
    /// Returns the indices to visit during `epoch`.
    pub fn epoch_indices(&mut self, epoch: usize, len: usize) -> Vec<usize> {
        match self {
            Sampler::Random(sampler) => sampler.indices(len),
            Sampler::Distributed(sampler) => {
                sampler.set_epoch(epoch);
                sampler.indices(len)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn nz(n: usize) -> NonZeroUsize {
        NonZeroUsize::new(n).unwrap()
    }

    #[test]
    fn shard_range_balanced() {
        // sizes 4, 3, 3
        assert_eq!(shard_range(10, 0, nz(3)), 0..4);
        assert_eq!(shard_range(10, 1, nz(3)), 4..7);
        assert_eq!(shard_range(10, 2, nz(3)), 7..10);
    }

    #[test]
    fn shard_range_with_more_shards_than_samples() {
        assert_eq!(shard_range(2, 0, nz(3)), 0..1);
        assert_eq!(shard_range(2, 1, nz(3)), 1..2);
        assert_eq!(shard_range(2, 2, nz(3)), 2..2);
    }

    #[test]
    fn random_sampler_yields_a_permutation() {
        let mut sampler = RandomSampler::new(Some(7));
        let mut indices = sampler.indices(20);
        indices.sort_unstable();
        assert_eq!(indices, (0..20).collect::<Vec<_>>());
    }

    #[test]
    fn seeded_random_samplers_agree() {
        let mut a = RandomSampler::new(Some(3));
        let mut b = RandomSampler::new(Some(3));
        assert_eq!(a.indices(32), b.indices(32));
        assert_eq!(a.indices(32), b.indices(32));
    }

    #[test]
    fn distributed_sampler_follows_its_epoch() {
        let mut sampler = Sampler::Distributed(DistributedSampler::new(0, nz(2), 0));
        let first = sampler.epoch_indices(0, 64);
        let again = sampler.epoch_indices(0, 64);
        let next = sampler.epoch_indices(1, 64);

        assert_eq!(first.len(), 32);
        assert_eq!(first, again);
        assert_ne!(first, next);
    }

    #[test]
    fn distributed_shards_have_equal_sizes() {
        let sizes: Vec<_> = (0..2)
            .map(|rank| DistributedSampler::new(rank, nz(2), 0).indices(5).len())
            .collect();

        assert_eq!(sizes, [3, 3]);
    }

    #[test]
    fn distributed_shards_wrap_around_small_datasets() {
        for rank in 0..3 {
            let shard = DistributedSampler::new(rank, nz(3), 4).indices(2);
            assert_eq!(shard.len(), 1);
            assert!(shard[0] < 2);
        }
    }

    #[test]
    fn distributed_shards_of_an_empty_dataset_are_empty() {
        assert!(DistributedSampler::new(1, nz(2), 0).indices(0).is_empty());
    }
}
