use crate::algorithms::{Activation, LossType, NoiseSpec};
use crate::error::{CdlError, Result};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub model: ModelConfig,
    pub pmf: PmfConfig,
    pub training: TrainingConfig,
    pub compute: ComputeConfig,
    pub storage: StorageConfig,
    pub evaluation: EvaluationConfig,
}

/// Autoencoder architecture.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    pub input_dim: usize,
    pub hidden_dim: usize,
    /// Latent code width; also the width of U, V and Theta.
    pub num_factors: usize,
    pub activation: Activation,
    pub loss_type: LossType,
}

/// Confidence weights and prior strengths for the PMF solver.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PmfConfig {
    pub a: f64,
    pub b: f64,
    pub lambda_u: f64,
    pub lambda_v: f64,
    pub lambda_r: f64,
    pub max_iter: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingConfig {
    pub batch_size: usize,
    pub n_epochs: usize,
    pub learning_rate: f64,
    pub print_step: usize,
    pub noise: NoiseSpec,
    pub keep_prob: f32,
    pub seed: u64,
    pub verbose: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComputeConfig {
    pub num_threads: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub weight_path: String,
    pub pmf_path: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluationConfig {
    pub top_m: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            model: ModelConfig {
                input_dim: 8000,
                hidden_dim: 200,
                num_factors: 50,
                activation: Activation::Sigmoid,
                loss_type: LossType::CrossEntropy,
            },
            pmf: PmfConfig {
                a: 1.0,
                b: 0.01,
                lambda_u: 0.1,
                lambda_v: 10.0,
                lambda_r: 1.0,
                max_iter: 10,
            },
            training: TrainingConfig {
                batch_size: 128,
                n_epochs: 10,
                learning_rate: 0.001,
                print_step: 50,
                noise: NoiseSpec::Mask { fraction: 0.3 },
                keep_prob: 1.0,
                seed: 0,
                verbose: true,
            },
            compute: ComputeConfig {
                num_threads: num_cpus::get(),
            },
            storage: StorageConfig {
                weight_path: "model/cdl_weights.json".to_string(),
                pmf_path: Some("model/cdl_factors.json".to_string()),
            },
            evaluation: EvaluationConfig { top_m: 300 },
        }
    }
}

impl Config {
    pub fn from_file(path: &str) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name(path))
            .add_source(config::Environment::with_prefix("CDL").separator("__"))
            .build()?;

        let config: Config = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let pmf = &self.pmf;
        if !(pmf.b >= 0.0 && pmf.b < pmf.a) {
            return Err(CdlError::InvalidConfig(format!(
                "confidence weights must satisfy 0 <= b < a (a={}, b={})",
                pmf.a, pmf.b
            )));
        }
        for (name, value) in [
            ("lambda_u", pmf.lambda_u),
            ("lambda_v", pmf.lambda_v),
            ("lambda_r", pmf.lambda_r),
        ] {
            if !(value.is_finite() && value > 0.0) {
                return Err(CdlError::InvalidConfig(format!("{} must be positive, got {}", name, value)));
            }
        }

        let model = &self.model;
        for (name, value) in [
            ("input_dim", model.input_dim),
            ("hidden_dim", model.hidden_dim),
            ("num_factors", model.num_factors),
            ("batch_size", self.training.batch_size),
            ("num_threads", self.compute.num_threads),
        ] {
            if value == 0 {
                return Err(CdlError::InvalidConfig(format!("{} must be greater than 0", name)));
            }
        }

        let training = &self.training;
        if !(training.keep_prob > 0.0 && training.keep_prob <= 1.0) {
            return Err(CdlError::InvalidConfig(format!(
                "keep_prob must lie in (0, 1], got {}",
                training.keep_prob
            )));
        }
        if !(training.learning_rate.is_finite() && training.learning_rate > 0.0) {
            return Err(CdlError::InvalidConfig(format!(
                "learning_rate must be positive, got {}",
                training.learning_rate
            )));
        }

        Ok(())
    }

    /// Coefficient on the latent alignment term of the autoencoder loss.
    pub fn alignment_weight(&self) -> f32 {
        (self.pmf.lambda_v / self.pmf.lambda_r) as f32
    }
}
