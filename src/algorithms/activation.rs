use crate::error::CdlError;
use ndarray::{Array2, Axis, Zip};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Hidden-layer nonlinearity, resolved once from its config name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Activation {
    Sigmoid,
    Softmax,
    Linear,
    Tanh,
    Relu,
}

impl Activation {
    pub fn apply(&self, linear: &Array2<f32>) -> Array2<f32> {
        match self {
            Activation::Sigmoid => linear.mapv(crate::utils::sigmoid),
            Activation::Linear => linear.clone(),
            Activation::Tanh => linear.mapv(f32::tanh),
            Activation::Relu => linear.mapv(crate::utils::relu),
            Activation::Softmax => {
                let mut out = linear.clone();
                for mut row in out.rows_mut() {
                    let max = row.fold(f32::NEG_INFINITY, |a, &b| a.max(b));
                    row.mapv_inplace(|x| (x - max).exp());
                    let sum = row.sum();
                    if sum > 0.0 {
                        row.mapv_inplace(|x| x / sum);
                    }
                }
                out
            }
        }
    }

    /// Maps the gradient w.r.t. the activation output back to the
    /// pre-activation, given the pre-activation `linear` and output `activated`.
    pub fn backward(
        &self,
        linear: &Array2<f32>,
        activated: &Array2<f32>,
        grad_out: &Array2<f32>,
    ) -> Array2<f32> {
        match self {
            Activation::Linear => grad_out.clone(),
            Activation::Sigmoid => {
                let mut grad = grad_out.clone();
                Zip::from(&mut grad)
                    .and(activated)
                    .for_each(|g, &h| *g *= h * (1.0 - h));
                grad
            }
            Activation::Tanh => {
                let mut grad = grad_out.clone();
                Zip::from(&mut grad)
                    .and(activated)
                    .for_each(|g, &h| *g *= 1.0 - h * h);
                grad
            }
            Activation::Relu => {
                let mut grad = grad_out.clone();
                Zip::from(&mut grad)
                    .and(linear)
                    .for_each(|g, &a| {
                        if a <= 0.0 {
                            *g = 0.0;
                        }
                    });
                grad
            }
            Activation::Softmax => {
                // dL/da_k = h_k * (g_k - sum_j g_j h_j), row by row
                let weighted = (grad_out * activated).sum_axis(Axis(1));
                let mut grad = grad_out.clone();
                for ((mut row, h_row), &dot) in grad
                    .rows_mut()
                    .into_iter()
                    .zip(activated.rows())
                    .zip(weighted.iter())
                {
                    Zip::from(&mut row)
                        .and(&h_row)
                        .for_each(|g, &h| *g = h * (*g - dot));
                }
                grad
            }
        }
    }
}

impl fmt::Display for Activation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Activation::Sigmoid => "sigmoid",
            Activation::Softmax => "softmax",
            Activation::Linear => "linear",
            Activation::Tanh => "tanh",
            Activation::Relu => "relu",
        };
        f.write_str(name)
    }
}

impl FromStr for Activation {
    type Err = CdlError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sigmoid" => Ok(Activation::Sigmoid),
            "softmax" => Ok(Activation::Softmax),
            "linear" => Ok(Activation::Linear),
            "tanh" => Ok(Activation::Tanh),
            "relu" => Ok(Activation::Relu),
            other => Err(CdlError::InvalidConfig(format!("unknown activation '{}'", other))),
        }
    }
}

/// Reconstruction loss used by the autoencoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LossType {
    #[serde(rename = "mse", alias = "rmse")]
    MeanSquaredError,
    #[serde(rename = "cross-entropy")]
    CrossEntropy,
}

impl fmt::Display for LossType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LossType::MeanSquaredError => f.write_str("mse"),
            LossType::CrossEntropy => f.write_str("cross-entropy"),
        }
    }
}

impl FromStr for LossType {
    type Err = CdlError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "mse" | "rmse" => Ok(LossType::MeanSquaredError),
            "cross-entropy" => Ok(LossType::CrossEntropy),
            other => Err(CdlError::InvalidConfig(format!("unknown loss type '{}'", other))),
        }
    }
}
