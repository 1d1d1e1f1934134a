use ndarray::{Array2, ArrayView2};

use crate::{MlErr, Result};

/// Parameterless sigmoid activation scaled by `amp`.
#[derive(Clone, Debug, Default)]
pub struct Sigmoid {
    amp: f32,
    a: Option<Array2<f32>>,
}

impl Sigmoid {
    pub fn new(amp: f32) -> Self {
        Self { amp, a: None }
    }

    fn sigmoid(&self, z: f32) -> f32 {
        self.amp / (1. + (-z).exp())
    }

    pub fn forward(&mut self, z: ArrayView2<f32>) -> Array2<f32> {
        let a = z.mapv(|z| self.sigmoid(z));
        self.a = Some(a.clone());
        a
    }

    pub fn backward(&mut self, mut d: Array2<f32>) -> Result<Array2<f32>> {
        let a = self
            .a
            .as_ref()
            .ok_or(MlErr::InvalidInput("sigmoid backward called before forward"))?;

        let amp = self.amp;
        d.zip_mut_with(a, |d, &a| {
            *d *= (a * (amp - a)) / amp;
        });

        Ok(d)
    }
}
