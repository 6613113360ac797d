use crate::blob::Blob;
use anyhow::{bail, Result};
use rand::{distributions::Uniform, Rng};
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};

/// Parameter initialization.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum Filler {
    /// Every element is `value`.
    Constant {
        /// The value.
        value: f32,
    },
    /// Uniform in `[min, max)`.
    Uniform {
        /// Lower bound.
        min: f32,
        /// Upper bound.
        max: f32,
    },
    /// Normal distribution.
    Gaussian {
        /// The mean.
        mean: f32,
        /// The standard deviation.
        std: f32,
    },
    /// Uniform in `(-a, a)` where `a = sqrt(3 / fan_in)`.
    ///
    /// `fan_in` is the number of elements divided by the first dimension.
    Xavier,
}

impl Default for Filler {
    fn default() -> Self {
        Self::Constant { value: 0. }
    }
}

impl Filler {
    /// Fills the value of `blob`.
    ///
    /// **Errors**
    ///
    /// The distribution parameters are invalid.
    pub fn fill<R: Rng + ?Sized>(&self, blob: &Blob, rng: &mut R) -> Result<()> {
        let mut value = blob.value_mut();
        match *self {
            Self::Constant { value: x } => value.fill(x),
            Self::Uniform { min, max } => {
                if !(min < max && (max - min).is_finite()) {
                    bail!("Uniform filler requires finite min < max, found [{min}, {max})!");
                }
                let distr = Uniform::new(min, max);
                value.iter_mut().for_each(|x| *x = distr.sample(rng));
            }
            Self::Gaussian { mean, std } => {
                let distr = Normal::new(mean, std)?;
                value.iter_mut().for_each(|x| *x = distr.sample(rng));
            }
            Self::Xavier => {
                let fan_in = match value.shape().first() {
                    Some(&outputs) if outputs > 0 => value.len() / outputs,
                    _ => value.len(),
                };
                let a = (3. / fan_in.max(1) as f32).sqrt();
                let distr = Uniform::new_inclusive(-a, a);
                value.iter_mut().for_each(|x| *x = distr.sample(rng));
            }
        }
        Ok(())
    }
}
