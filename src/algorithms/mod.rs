pub mod activation;
pub mod autoencoder;
pub mod initializer;
pub mod noise;
pub mod optimizer;
pub mod pmf;
pub mod sampler;
pub mod trainer;

pub use activation::{Activation, LossType};
pub use autoencoder::{Autoencoder, AutoencoderGrads, AutoencoderParams, LossBreakdown, TrainStep};
pub use noise::NoiseSpec;
pub use optimizer::{Adam, Optimizer};
pub use pmf::PmfSolver;
pub use sampler::{BatchSampler, RandomBatchSampler};
pub use trainer::AutoencoderTrainer;
