use crate::algorithms::initializer;
use crate::error::CdlError;
use ndarray::Array2;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Standard deviation of the additive Gaussian corruption.
pub const GAUSSIAN_NOISE_STD: f32 = 0.1;

/// Corruption applied to content rows before they enter the denoising autoencoder.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum NoiseSpec {
    /// i.i.d. N(0, 0.1^2) added to every element.
    Gaussian,
    /// Zero `round(fraction * row_len)` distinct columns per row.
    Mask { fraction: f64 },
    /// Salt-and-pepper placeholder; passes input through unchanged.
    SaltPepper,
}

impl NoiseSpec {
    /// Returns a corrupted copy of `batch`; the caller's buffer is untouched.
    pub fn corrupt<R: Rng + ?Sized>(&self, batch: &Array2<f32>, rng: &mut R) -> Array2<f32> {
        match *self {
            NoiseSpec::Gaussian => {
                let mut out = batch.clone();
                out.mapv_inplace(|x| x + initializer::standard_normal(rng) * GAUSSIAN_NOISE_STD);
                out
            }
            NoiseSpec::Mask { fraction } => {
                let mut out = batch.clone();
                let row_len = out.ncols();
                let count = masked_count(fraction, row_len);
                for mut row in out.rows_mut() {
                    for col in rand::seq::index::sample(rng, row_len, count).into_iter() {
                        row[col] = 0.0;
                    }
                }
                out
            }
            NoiseSpec::SaltPepper => batch.clone(),
        }
    }
}

/// Number of columns zeroed per row; halves round to even.
pub fn masked_count(fraction: f64, row_len: usize) -> usize {
    ((fraction * row_len as f64).round_ties_even() as usize).min(row_len)
}

impl FromStr for NoiseSpec {
    type Err = CdlError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "gaussian" => Ok(NoiseSpec::Gaussian),
            "sp" => Ok(NoiseSpec::SaltPepper),
            _ => {
                let raw = s
                    .strip_prefix("mask-")
                    .ok_or_else(|| CdlError::InvalidNoiseSpec(s.to_string()))?;
                let fraction: f64 = raw
                    .parse()
                    .map_err(|_| CdlError::InvalidNoiseSpec(s.to_string()))?;
                if !(0.0..=1.0).contains(&fraction) {
                    return Err(CdlError::InvalidNoiseSpec(format!(
                        "{}: mask fraction must lie in [0, 1]",
                        s
                    )));
                }
                Ok(NoiseSpec::Mask { fraction })
            }
        }
    }
}

impl TryFrom<String> for NoiseSpec {
    type Error = CdlError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<NoiseSpec> for String {
    fn from(spec: NoiseSpec) -> Self {
        spec.to_string()
    }
}

impl fmt::Display for NoiseSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NoiseSpec::Gaussian => f.write_str("gaussian"),
            NoiseSpec::Mask { fraction } => write!(f, "mask-{}", fraction),
            NoiseSpec::SaltPepper => f.write_str("sp"),
        }
    }
}
