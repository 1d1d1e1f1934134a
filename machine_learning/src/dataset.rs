use crate::{MlErr, Result};

/// A single supervised sample (x, y).
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    pub x: Vec<f32>,
    pub y: Vec<f32>,
}

/// A collection of samples that can be consumed by a trainer.
///
/// A `Dataset` is responsible only for *providing access* to samples. It does not define how
/// they are batched, ordered or split among processes. Datasets are read concurrently by the
/// data loading workers, hence the `Sync` bound.
pub trait Dataset: Sync {
    /// Returns the amount of input features per sample.
    fn x_size(&self) -> usize;

    /// Returns the amount of expected outputs per sample.
    fn y_size(&self) -> usize;

    /// Returns the total number of samples.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Fetches a sample by index.
    ///
    /// # Errors
    /// Returns `MlErr::OutOfBounds` if `index` is invalid.
    fn get(&self, index: usize) -> Result<Sample>;
}

/// A minimal in-memory dataset.
///
/// Samples are stored row-major in a single buffer, each row holding `x_size` inputs followed by
/// `y_size` expected outputs.
#[derive(Debug, Clone)]
pub struct InMemoryDataset {
    data: Vec<f32>,
    x_size: usize,
    y_size: usize,
}

impl InMemoryDataset {
    /// Creates a new `InMemoryDataset`.
    ///
    /// # Arguments
    /// * `data` - The samples, one row after the other.
    /// * `x_size` - The amount of inputs per row.
    /// * `y_size` - The amount of expected outputs per row.
    ///
    /// # Returns
    /// A new `InMemoryDataset` or an error if `data` can't be split in whole rows.
    pub fn new(data: Vec<f32>, x_size: usize, y_size: usize) -> Result<Self> {
        let row_size = x_size + y_size;

        if x_size == 0 || y_size == 0 {
            return Err(MlErr::InvalidInput(
                "a dataset needs at least one input and one output per sample",
            ));
        }

        if data.len() % row_size != 0 {
            return Err(MlErr::SizeMismatch {
                what: "dataset buffer",
                got: data.len(),
                expected: data.len().next_multiple_of(row_size),
            });
        }

        Ok(Self {
            data,
            x_size,
            y_size,
        })
    }

    /// Creates a new `InMemoryDataset` from separate sample pairs.
    ///
    /// # Returns
    /// A new `InMemoryDataset` or an error if the samples have different sizes.
    pub fn from_samples<I>(samples: I) -> Result<Self>
    where
        I: IntoIterator<Item = Sample>,
    {
        let mut samples = samples.into_iter().peekable();
        let Some(first) = samples.peek() else {
            return Err(MlErr::InvalidInput("cannot infer sample sizes from no samples"));
        };

        let (x_size, y_size) = (first.x.len(), first.y.len());
        let mut data = Vec::new();

        for Sample { x, y } in samples {
            if x.len() != x_size || y.len() != y_size {
                return Err(MlErr::SizeMismatch {
                    what: "sample",
                    got: x.len() + y.len(),
                    expected: x_size + y_size,
                });
            }

            data.extend(x);
            data.extend(y);
        }

        Self::new(data, x_size, y_size)
    }
}

impl Dataset for InMemoryDataset {
    fn x_size(&self) -> usize {
        self.x_size
    }

    fn y_size(&self) -> usize {
        self.y_size
    }

    fn len(&self) -> usize {
        self.data.len() / (self.x_size + self.y_size)
    }

    fn get(&self, index: usize) -> Result<Sample> {
        let len = self.len();

        if index >= len {
            return Err(MlErr::OutOfBounds { index, len });
        }

        let row_size = self.x_size + self.y_size;
        let row = &self.data[index * row_size..(index + 1) * row_size];
        let (x, y) = row.split_at(self.x_size);

        Ok(Sample {
            x: x.to_vec(),
            y: y.to_vec(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dataset_basic() {
        let ds = InMemoryDataset::new(vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0], 2, 1).unwrap();
        assert_eq!(ds.len(), 2);
        assert_eq!(
            ds.get(1).unwrap(),
            Sample {
                x: vec![4.0, 5.0],
                y: vec![6.0]
            }
        );
        assert!(matches!(
            ds.get(2),
            Err(MlErr::OutOfBounds { index: 2, len: 2 })
        ));
    }

    #[test]
    fn ragged_buffers_are_rejected() {
        assert!(InMemoryDataset::new(vec![1.0, 2.0, 3.0, 4.0], 2, 1).is_err());
        assert!(InMemoryDataset::new(vec![1.0], 1, 0).is_err());
    }

    #[test]
    fn from_samples_lays_rows_out_in_order() {
        let ds = InMemoryDataset::from_samples([
            Sample {
                x: vec![0.0],
                y: vec![1.0],
            },
            Sample {
                x: vec![2.0],
                y: vec![3.0],
            },
        ])
        .unwrap();

        assert_eq!(ds.x_size(), 1);
        assert_eq!(ds.get(1).unwrap().y, vec![3.0]);
    }
}
