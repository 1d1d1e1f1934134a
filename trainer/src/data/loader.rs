use std::num::NonZeroUsize;

use machine_learning::{
    MlErr,
    dataset::{Dataset, Sample},
};
use ndarray::Array2;
use rayon::{ThreadPool, ThreadPoolBuilder, prelude::*};

use crate::error::Result;

/// A batch of samples, one per row.
#[derive(Debug, Clone, PartialEq)]
pub struct Batch {
    pub x: Array2<f32>,
    pub y: Array2<f32>,
}

impl Batch {
    /// Stacks `samples` into a batch.
    ///
    /// # Returns
    /// The batch or an error if a sample doesn't have the expected sizes.
    pub fn collate(samples: &[Sample], x_size: usize, y_size: usize) -> Result<Self> {
        let n = samples.len();
        let mut x = Vec::with_capacity(n * x_size);
        let mut y = Vec::with_capacity(n * y_size);

        for sample in samples {
            check_len("sample input", sample.x.len(), x_size)?;
            check_len("sample output", sample.y.len(), y_size)?;

            x.extend_from_slice(&sample.x);
            y.extend_from_slice(&sample.y);
        }

        Ok(Self {
            x: Array2::from_shape_vec((n, x_size), x).map_err(MlErr::from)?,
            y: Array2::from_shape_vec((n, y_size), y).map_err(MlErr::from)?,
        })
    }

    pub fn len(&self) -> usize {
        self.x.nrows()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn check_len(what: &'static str, got: usize, expected: usize) -> Result<()> {
    if got != expected {
        return Err(MlErr::SizeMismatch {
            what,
            got,
            expected,
        }
        .into());
    }

    Ok(())
}

/// Builds the pool the data loaders fetch samples on.
///
/// # Returns
/// `None` for `num_workers == 0`, meaning batches are assembled on the calling thread.
pub fn worker_pool(num_workers: usize) -> Result<Option<ThreadPool>> {
    if num_workers == 0 {
        return Ok(None);
    }

    let pool = ThreadPoolBuilder::new()
        .num_threads(num_workers)
        .thread_name(|i| format!("loader-{i}"))
        .build()?;

    Ok(Some(pool))
}

/// Walks a dataset in a given order, yielding batches of at most `batch_size` samples.
///
/// The last batch holds the remainder and may be smaller.
pub struct DataLoader<'d, D: Dataset> {
    dataset: &'d D,
    indices: Vec<usize>,
    batch_size: usize,
    pool: Option<&'d ThreadPool>,
    cursor: usize,
}

impl<'d, D: Dataset> DataLoader<'d, D> {
    /// Creates a new `DataLoader`.
    ///
    /// # Arguments
    /// * `dataset` - The dataset to read from.
    /// * `indices` - The order in which to visit the samples.
    /// * `batch_size` - The maximum amount of samples per batch.
    /// * `pool` - Where to fetch samples in parallel, if anywhere.
    pub fn new(
        dataset: &'d D,
        indices: Vec<usize>,
        batch_size: NonZeroUsize,
        pool: Option<&'d ThreadPool>,
    ) -> Self {
        Self {
            dataset,
            indices,
            batch_size: batch_size.get(),
            pool,
            cursor: 0,
        }
    }

    /// Returns the total amount of batches this loader yields.
    pub fn num_batches(&self) -> usize {
        self.indices.len().div_ceil(self.batch_size)
    }

    fn fetch(&self, indices: &[usize]) -> Result<Vec<Sample>> {
        let dataset = self.dataset;

        let samples = match self.pool {
            Some(pool) => pool.install(|| {
                indices
                    .par_iter()
                    .map(|&i| dataset.get(i))
                    .collect::<std::result::Result<Vec<_>, _>>()
            }),
            None => indices.iter().map(|&i| dataset.get(i)).collect(),
        };

        Ok(samples?)
    }
}

impl<D: Dataset> Iterator for DataLoader<'_, D> {
    type Item = Result<Batch>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.cursor >= self.indices.len() {
            return None;
        }

        let end = (self.cursor + self.batch_size).min(self.indices.len());
        let batch = self.fetch(&self.indices[self.cursor..end]).and_then(|samples| {
            Batch::collate(&samples, self.dataset.x_size(), self.dataset.y_size())
        });

        self.cursor = end;
        Some(batch)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let left = (self.indices.len() - self.cursor).div_ceil(self.batch_size);
        (left, Some(left))
    }
}

impl<D: Dataset> ExactSizeIterator for DataLoader<'_, D> {}
