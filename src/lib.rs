pub mod algorithms;
pub mod config;
pub mod error;
pub mod models;
pub mod services;
pub mod utils;

pub use config::Config;
pub use error::{CdlError, FactorSide, Result};
pub use models::*;
pub use services::dataset::Dataset;
pub use services::persistence::ModelStore;
pub use services::training::TrainingService;

pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();
}
