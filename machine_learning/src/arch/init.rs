use rand::Rng;
use rand_distr::{Distribution, Uniform, uniform::Error as UniformError};

/// How to initialize the weights of a layer.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum WeightInit {
    /// Every weight takes the same value.
    Constant(f32),
    /// Weights are sampled from `[low, high)`.
    Uniform { low: f32, high: f32 },
    /// Weights are sampled from `[-r, r)` with `r = sqrt(6 / (fan_in + fan_out))`.
    XavierUniform,
    /// Weights are sampled from `[-r, r)` with `r = sqrt(3 / fan_in)`.
    LecunUniform,
}

impl WeightInit {
    /// Fills `weights` following this initialization scheme.
    ///
    /// # Arguments
    /// * `rng` - The random number generator to sample from.
    /// * `fan_in` - The number of input units of the layer.
    /// * `fan_out` - The number of output units of the layer.
    /// * `weights` - The buffer to write to.
    ///
    /// # Returns
    /// An error if the resulting sampling range is invalid.
    pub fn fill<R: Rng>(
        &self,
        rng: &mut R,
        fan_in: usize,
        fan_out: usize,
        weights: &mut [f32],
    ) -> Result<(), UniformError> {
        let (low, high) = match *self {
            WeightInit::Constant(value) => {
                weights.fill(value);
                return Ok(());
            }
            WeightInit::Uniform { low, high } => (low, high),
            WeightInit::XavierUniform => {
                let range = (6. / (fan_in + fan_out) as f32).sqrt();
                (-range, range)
            }
            WeightInit::LecunUniform => {
                let range = (3. / fan_in as f32).sqrt();
                (-range, range)
            }
        };

        let distribution = Uniform::new(low, high)?;
        for w in weights.iter_mut() {
            *w = distribution.sample(rng);
        }

        Ok(())
    }
}
